//! Offline replay of a packet capture
//!
//! A capture holds one JSON packet per line, either bare or wrapped in the
//! `{"event":"synchronization","data":{..}}` frame the server sends. Blank
//! lines and lines starting with `#` are skipped. Accounts are registered the
//! first time they appear.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use mirror_core::{ReplicaKey, SyncPacket, SynchronizeRequest};
use mirror_ports::{SubscribeError, SubscribeSender, SynchronizeSender, TransportError};
use mirror_sync::{
    ClientConfig, InMemoryHistoryStorage, ParseError, StreamingClient, parse_packet,
};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("failed to read capture: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Non-empty, non-comment lines read
    pub lines: usize,
    pub packets: usize,
    pub rejected: usize,
}

/// Acknowledges every request without a server
#[derive(Default)]
pub struct OfflineTransport {
    synchronizations: AtomicUsize,
    subscribes: AtomicUsize,
}

impl OfflineTransport {
    pub fn synchronizations(&self) -> usize {
        self.synchronizations.load(Ordering::Relaxed)
    }

    pub fn subscribes(&self) -> usize {
        self.subscribes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SynchronizeSender for OfflineTransport {
    async fn send_synchronize(&self, request: &SynchronizeRequest) -> Result<(), TransportError> {
        debug!(replica = %request.replica_key(), synchronization_id = %request.request_id, "Offline synchronize");
        self.synchronizations.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[async_trait]
impl SubscribeSender for OfflineTransport {
    async fn send_subscribe(&self, key: &ReplicaKey) -> Result<(), SubscribeError> {
        debug!(replica = %key, "Offline subscribe");
        self.subscribes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// A client wired to an offline transport
pub fn offline_client(config: ClientConfig) -> (StreamingClient, Arc<OfflineTransport>) {
    let transport = Arc::new(OfflineTransport::default());
    let client = StreamingClient::new(config, transport.clone(), transport.clone());
    (client, transport)
}

pub async fn replay_file(
    path: impl AsRef<Path>,
    client: &StreamingClient,
) -> Result<ReplayStats, ReplayError> {
    let path = path.as_ref();
    info!(path = %path.display(), "Replaying capture");
    let file = File::open(path)?;
    replay_reader(BufReader::new(file), client).await
}

/// Feed every packet of the capture and wait until all were dispatched
pub async fn replay_reader<R: BufRead>(
    reader: R,
    client: &StreamingClient,
) -> Result<ReplayStats, ReplayError> {
    let mut stats = ReplayStats::default();

    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        stats.lines += 1;

        match packet_from_line(line) {
            Ok(packet) => {
                if client.terminal_state(&packet.account_id).is_none() {
                    client.add_account(
                        &packet.account_id,
                        packet.instance() + 1,
                        Arc::new(InMemoryHistoryStorage::new()),
                    );
                }
                client.handle_packet(packet);
                stats.packets += 1;
            }
            Err(e) => {
                warn!(line = index + 1, error = %e, "Skipping malformed packet");
                stats.rejected += 1;
            }
        }
    }

    client.flush().await;
    info!(lines = stats.lines, packets = stats.packets, rejected = stats.rejected, "Replay finished");
    Ok(stats)
}

fn packet_from_line(line: &str) -> Result<SyncPacket, ParseError> {
    let value: Value = serde_json::from_str(line)?;
    let is_frame = value.get("event").and_then(Value::as_str) == Some("synchronization");
    match value.get("data") {
        Some(data) if is_frame => parse_packet(data),
        _ => parse_packet(&value),
    }
}
