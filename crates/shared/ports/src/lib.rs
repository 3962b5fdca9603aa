//! Mirror Ports
//!
//! Port definitions (traits) for the terminal mirror.
//! These define the boundaries between the synchronization core and the
//! transport, persistence and statistics collaborators around it.

mod error;
mod history;
mod listener;
mod ordering;
mod reservoir;
mod transport;

pub use error::{ListenerError, ListenerResult, SubscribeError, TransportError};
pub use history::HistoryStorage;
pub use listener::SynchronizationListener;
pub use ordering::{OutOfOrderEvent, OutOfOrderListener};
pub use reservoir::Reservoir;
pub use transport::{SubscribeSender, SynchronizeSender};
