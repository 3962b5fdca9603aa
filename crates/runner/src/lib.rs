//! Mirror Runner
//!
//! Runs the terminal mirror against a live server or a recorded capture:
//!
//! - **Session**: WebSocket session with reconnects and periodic reports
//! - **Replay**: feeds a JSON-lines packet capture through the client offline
//! - **Transport**: reconnect-safe sender handles for the client
//! - **Latency**: sliding-window reservoir for processing latency
//!
//! ## Architecture
//!
//! ```text
//!   ┌──────────────┐     ┌──────────────────┐
//!   │  WsClient    │     │  capture.jsonl   │
//!   └──────┬───────┘     └────────┬─────────┘
//!          │ WsEvent               │ lines
//!          ▼                       ▼
//!   ┌──────────────┐     ┌──────────────────┐
//!   │ LiveSession  │     │     replay       │
//!   └──────┬───────┘     └────────┬─────────┘
//!          └───────────┬──────────┘
//!                      ▼
//!             ┌─────────────────┐
//!             │ StreamingClient │──► TerminalState per account
//!             └─────────────────┘
//! ```

pub mod latency;
pub mod replay;
pub mod report;
pub mod session;
pub mod transport;

pub use latency::SlidingReservoir;
pub use replay::{OfflineTransport, ReplayError, ReplayStats, offline_client, replay_file, replay_reader};
pub use session::{LiveSession, SessionError};
pub use transport::SharedConnection;
