use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp in UTC
pub type Timestamp = DateTime<Utc>;

/// Symbol identifier for a tradeable instrument
pub type Symbol = String;

/// Index of one replica of an account's terminal stream
pub type InstanceIndex = u32;

/// Instance used whenever a packet or request omits `instanceIndex`.
///
/// An omitted index aliases instance 0 for ordering, admission and
/// subscription bookkeeping alike.
pub const DEFAULT_INSTANCE_INDEX: InstanceIndex = 0;

/// Identifies one logical terminal stream: (account, instance)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaKey {
    pub account_id: String,
    pub instance_index: InstanceIndex,
}

impl ReplicaKey {
    pub fn new(account_id: impl Into<String>, instance_index: InstanceIndex) -> Self {
        ReplicaKey {
            account_id: account_id.into(),
            instance_index,
        }
    }

    /// Build a key from an optional instance index, applying the default
    pub fn from_optional(account_id: impl Into<String>, instance_index: Option<InstanceIndex>) -> Self {
        Self::new(account_id, instance_index.unwrap_or(DEFAULT_INSTANCE_INDEX))
    }
}

impl fmt::Display for ReplicaKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.account_id, self.instance_index)
    }
}
