use async_trait::async_trait;
use mirror_core::{InstanceIndex, Timestamp};

use crate::listener::SynchronizationListener;

/// Append-only store of history orders and deals
///
/// Receives history through the listener callbacks it inherits and answers
/// the "last known time" queries used to build synchronize requests.
#[async_trait]
pub trait HistoryStorage: SynchronizationListener {
    /// Time of the most recent history order known for the instance
    async fn last_history_order_time(&self, instance_index: InstanceIndex) -> Option<Timestamp>;

    /// Time of the most recent deal known for the instance
    async fn last_deal_time(&self, instance_index: InstanceIndex) -> Option<Timestamp>;

    /// True once both history streams finished synchronizing for the instance
    fn is_synchronized(&self, instance_index: InstanceIndex) -> bool;
}
