use async_trait::async_trait;
use mirror_core::{ReplicaKey, SynchronizeRequest};

use crate::error::{SubscribeError, TransportError};

/// Port for sending `synchronize` requests
///
/// Implemented by the transport layer; resolves once the server acknowledged
/// the request.
#[async_trait]
pub trait SynchronizeSender: Send + Sync {
    async fn send_synchronize(&self, request: &SynchronizeRequest) -> Result<(), TransportError>;
}

/// Port for sending `subscribe` requests
#[async_trait]
pub trait SubscribeSender: Send + Sync {
    async fn send_subscribe(&self, key: &ReplicaKey) -> Result<(), SubscribeError>;
}
