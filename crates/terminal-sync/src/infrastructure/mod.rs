//! Infrastructure Layer - Adapters to the outside world
//!
//! - WsClient: WebSocket transport carrying requests and the packet stream
//! - Parsers: JSON packet parsing into typed events
//! - InMemoryHistoryStorage: history storage kept in process memory

pub mod memory_history;
pub mod parsers;
pub mod ws_client;

pub use memory_history::InMemoryHistoryStorage;
pub use parsers::{parse_packet, parse_packet_str};
pub use ws_client::{WsClient, WsConnection, WsError, WsEvent};
