//! Application Layer - Synchronization components and their orchestration
//!
//! - PacketSequencer: per-replica resequencing with stuck-gap detection
//! - SynchronizationThrottler: admission control for full synchronizations
//! - SubscriptionManager: cancellable subscribe retry loops
//! - PacketDispatcher: ordered fan-out to synchronization listeners
//! - TerminalState: projection of an account's terminal
//! - StreamingClient: wires the above to one transport connection

pub mod config;
pub mod packet_dispatcher;
pub mod packet_sequencer;
pub mod streaming_client;
pub mod subscription_manager;
pub mod sweep;
pub mod synchronization_throttler;
pub mod terminal_state;

pub use config::{
    ClientConfig, SequencerConfig, SubscriptionConfig, TerminalStateConfig, ThrottlerConfig,
};
pub use packet_dispatcher::PacketDispatcher;
pub use packet_sequencer::PacketSequencer;
pub use streaming_client::StreamingClient;
pub use subscription_manager::SubscriptionManager;
pub use sweep::SweepHandle;
pub use synchronization_throttler::{
    SlotBudget, SubscribedAccounts, SyncOutcome, SynchronizationThrottler,
};
pub use terminal_state::TerminalState;
