//! Mirror Sync
//!
//! Streaming synchronization client for a remote trading terminal. Keeps an
//! in-memory mirror of each account's terminal consistent with a numbered,
//! possibly duplicated and reordered packet stream.
//!
//! ## Architecture
//!
//! ```text
//!            WebSocket (WsClient)
//!                   │ synchronization packets
//!                   ▼
//!         ┌───────────────────┐        subscribe / synchronize
//!         │  StreamingClient  │ ─────────────────────────────────┐
//!         └─────────┬─────────┘                                  │
//!                   │                                            │
//!         ┌─────────▼─────────┐   stuck gap   ┌──────────────────▼──┐
//!         │  PacketSequencer  │ ────────────► │ SubscriptionManager │
//!         └─────────┬─────────┘               └─────────────────────┘
//!                   │ ordered, per replica    ┌─────────────────────────┐
//!         ┌─────────▼─────────┐               │ SynchronizationThrottler│
//!         │ PacketDispatcher  │               └─────────────────────────┘
//!         └─────────┬─────────┘
//!                   │ listener callbacks
//!        ┌──────────┴───────────┐
//!        ▼                      ▼
//!  ┌───────────────┐   ┌──────────────────┐
//!  │ TerminalState │   │  HistoryStorage  │  (+ user listeners)
//!  └───────────────┘   └──────────────────┘
//! ```
//!
//! ## Layers
//!
//! - `domain`: pure per-instance projection state
//! - `application`: the synchronization components and the client
//! - `infrastructure`: WebSocket transport, packet parsing, history storage
//! - `config`: JSON configuration loading

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;

pub use application::{
    ClientConfig, PacketDispatcher, PacketSequencer, SlotBudget, StreamingClient,
    SubscriptionManager, SyncOutcome, SynchronizationThrottler, TerminalState,
};
pub use config::{MirrorConfigFile, load_config, load_config_from_str, load_default_config};
pub use domain::InstanceState;
pub use error::{ClientError, ParseError, SynchronizationError};
pub use infrastructure::{
    InMemoryHistoryStorage, WsClient, WsConnection, WsError, WsEvent, parse_packet,
    parse_packet_str,
};
