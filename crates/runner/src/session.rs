//! Live WebSocket session
//!
//! Connects, registers the configured accounts and pumps transport events
//! into the streaming client until shutdown. A dropped socket is reconnected
//! with capped exponential backoff.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use mirror_sync::config::MirrorConfigFile;
use mirror_sync::{
    InMemoryHistoryStorage, SlotBudget, StreamingClient, WsClient, WsError, WsEvent,
};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::latency::SlidingReservoir;
use crate::report;
use crate::transport::SharedConnection;

const REPORT_INTERVAL: Duration = Duration::from_secs(30);
const RECONNECT_INITIAL_DELAY: Duration = Duration::from_secs(1);
const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);
const LATENCY_WINDOW: usize = 1000;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("initial connection failed: {0}")]
    Connect(#[from] WsError),
}

pub struct LiveSession {
    config: MirrorConfigFile,
    ws: WsClient,
    transport: Arc<SharedConnection>,
    latency: Arc<SlidingReservoir>,
    client: StreamingClient,
}

impl LiveSession {
    pub fn new(config: MirrorConfigFile) -> Self {
        let transport = Arc::new(SharedConnection::new());
        let budget = Arc::new(SlotBudget::new(
            config.synchronization_throttler.global_max_concurrent_synchronizations,
        ));
        let client = StreamingClient::with_slot_budget(
            config.to_client_config(),
            transport.clone(),
            transport.clone(),
            budget,
        );
        let latency = Arc::new(SlidingReservoir::new(LATENCY_WINDOW));
        client.set_latency_reservoir(latency.clone());
        let ws = WsClient::new(
            config.connection.url.clone(),
            config.connection.request_timeout(),
        );

        LiveSession {
            config,
            ws,
            transport,
            latency,
            client,
        }
    }

    pub fn client(&self) -> &StreamingClient {
        &self.client
    }

    /// Run until `shutdown` resolves
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<(), SessionError> {
        info!(url = %self.config.connection.url, "Connecting");
        let mut events = self.connect().await?;

        for account in &self.config.connection.accounts {
            self.client.add_account(
                &account.account_id,
                account.replicas,
                Arc::new(InMemoryHistoryStorage::new()),
            );
        }
        self.client.start();

        let mut report_timer = tokio::time::interval(REPORT_INTERVAL);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = report_timer.tick() => {
                    report::log_client(&self.client, Some(self.latency.as_ref()));
                }
                event = events.recv() => match event {
                    Some(WsEvent::Packet(packet)) => self.client.handle_packet(packet),
                    Some(WsEvent::ProtocolError(message)) => {
                        warn!(%message, "Protocol violation on synchronization stream");
                    }
                    Some(WsEvent::Error(message)) => {
                        warn!(%message, "WebSocket error");
                    }
                    Some(WsEvent::Disconnected) | None => {
                        self.transport.clear();
                        self.client.on_transport_disconnected();
                        tokio::select! {
                            _ = &mut shutdown => break,
                            reconnected = self.reconnect() => {
                                events = reconnected;
                                self.client.on_transport_reconnected();
                            }
                        }
                    }
                }
            }
        }

        info!("Shutting down");
        self.client.stop();
        report::log_client(&self.client, Some(self.latency.as_ref()));
        Ok(())
    }

    async fn connect(&self) -> Result<mpsc::Receiver<WsEvent>, WsError> {
        let (connection, events) = self.ws.connect().await?;
        self.transport.replace(connection);
        info!("Connected");
        Ok(events)
    }

    async fn reconnect(&self) -> mpsc::Receiver<WsEvent> {
        let mut delay = RECONNECT_INITIAL_DELAY;
        loop {
            tokio::time::sleep(delay).await;
            match self.connect().await {
                Ok(events) => return events,
                Err(e) => {
                    warn!(error = %e, retry_in_secs = delay.as_secs(), "Reconnect failed");
                    delay = (delay * 2).min(RECONNECT_MAX_DELAY);
                }
            }
        }
    }
}
