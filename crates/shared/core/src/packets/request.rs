use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::values::{DEFAULT_INSTANCE_INDEX, InstanceIndex, ReplicaKey, Timestamp};

/// Envelope of an outbound `synchronize` request.
///
/// The request id doubles as the synchronization id the server echoes back
/// on every packet of the resulting session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynchronizeRequest {
    pub request_id: String,
    pub account_id: String,
    pub instance_index: InstanceIndex,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starting_history_order_time: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starting_deal_time: Option<Timestamp>,
}

impl SynchronizeRequest {
    /// Create a request with a fresh synchronization id
    pub fn new(account_id: impl Into<String>) -> Self {
        SynchronizeRequest {
            request_id: Uuid::new_v4().to_string(),
            account_id: account_id.into(),
            instance_index: DEFAULT_INSTANCE_INDEX,
            host: None,
            starting_history_order_time: None,
            starting_deal_time: None,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn with_instance_index(mut self, instance_index: InstanceIndex) -> Self {
        self.instance_index = instance_index;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn with_starting_history_order_time(mut self, time: Option<Timestamp>) -> Self {
        self.starting_history_order_time = time;
        self
    }

    pub fn with_starting_deal_time(mut self, time: Option<Timestamp>) -> Self {
        self.starting_deal_time = time;
        self
    }

    pub fn synchronization_id(&self) -> &str {
        &self.request_id
    }

    pub fn replica_key(&self) -> ReplicaKey {
        ReplicaKey::new(self.account_id.clone(), self.instance_index)
    }
}
