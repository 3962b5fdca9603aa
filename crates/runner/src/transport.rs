use async_trait::async_trait;
use mirror_core::{ReplicaKey, SynchronizeRequest};
use mirror_ports::{SubscribeError, SubscribeSender, SynchronizeSender, TransportError};
use mirror_sync::WsConnection;
use parking_lot::RwLock;

/// Sender handle that survives reconnects
///
/// The streaming client keeps one sender for its whole life; the session
/// swaps the underlying connection in and out as the socket comes and goes.
#[derive(Default)]
pub struct SharedConnection {
    current: RwLock<Option<WsConnection>>,
}

impl SharedConnection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, connection: WsConnection) {
        *self.current.write() = Some(connection);
    }

    pub fn clear(&self) {
        *self.current.write() = None;
    }

    pub fn is_connected(&self) -> bool {
        self.current.read().is_some()
    }

    fn connection(&self) -> Result<WsConnection, TransportError> {
        self.current.read().clone().ok_or(TransportError::NotConnected)
    }
}

#[async_trait]
impl SynchronizeSender for SharedConnection {
    async fn send_synchronize(&self, request: &SynchronizeRequest) -> Result<(), TransportError> {
        self.connection()?.send_synchronize(request).await
    }
}

#[async_trait]
impl SubscribeSender for SharedConnection {
    async fn send_subscribe(&self, key: &ReplicaKey) -> Result<(), SubscribeError> {
        self.connection()?.send_subscribe(key).await
    }
}
