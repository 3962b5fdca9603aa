use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use mirror_core::{ReplicaKey, SyncPacket, SynchronizeRequest, Timestamp};
use mirror_ports::{SubscribeError, SubscribeSender, SynchronizeSender, TransportError};
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, trace, warn};
use uuid::Uuid;

use super::parsers::parse_packet;

/// Error name the server uses for rate-limit rejections
const TOO_MANY_REQUESTS: &str = "TooManyRequestsError";

#[derive(Error, Debug)]
pub enum WsError {
    #[error("Connection error: {0}")]
    Connection(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Channel closed")]
    ChannelClosed,
}

/// Events surfaced by the WebSocket connection
#[derive(Debug)]
pub enum WsEvent {
    /// Synchronization packet, not yet ordered
    Packet(SyncPacket),
    /// A frame violated the protocol (e.g. a packet without an account)
    ProtocolError(String),
    /// Connection error
    Error(String),
    Disconnected,
}

/// Inbound frames, tagged by `event`
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
enum WsFrame {
    #[serde(rename_all = "camelCase")]
    Response { request_id: String },
    #[serde(rename_all = "camelCase")]
    ProcessingError {
        request_id: String,
        error: String,
        #[serde(default)]
        message: String,
        #[serde(default)]
        metadata: Option<ErrorMetadata>,
    },
    Synchronization { data: Value },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorMetadata {
    #[serde(default, rename = "type")]
    limit_type: Option<String>,
    #[serde(default)]
    recommended_retry_time: Option<Timestamp>,
}

/// Server reply to one request
#[derive(Debug)]
enum Reply {
    Ok,
    Error {
        error: String,
        message: String,
        metadata: Option<ErrorMetadata>,
    },
}

type PendingReplies = Arc<DashMap<String, oneshot::Sender<Reply>>>;

/// WebSocket client for the terminal synchronization stream
pub struct WsClient {
    url: String,
    request_timeout: Duration,
}

impl WsClient {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Self {
        WsClient {
            url: url.into(),
            request_timeout,
        }
    }

    /// Connect and return a request handle plus the inbound event stream
    pub async fn connect(&self) -> Result<(WsConnection, mpsc::Receiver<WsEvent>), WsError> {
        let (ws_stream, _) = connect_async(&self.url).await?;
        let (mut write, mut read) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<String>(64);
        let (event_tx, event_rx) = mpsc::channel::<WsEvent>(1024);
        let pending: PendingReplies = Arc::new(DashMap::new());

        let writer_events = event_tx.clone();
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = write.send(Message::Text(text.into())).await {
                    let _ = writer_events.send(WsEvent::Error(e.to_string())).await;
                    break;
                }
            }
        });

        let reader_pending = Arc::clone(&pending);
        tokio::spawn(async move {
            while let Some(msg) = read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        if let Some(event) = handle_frame(&text, &reader_pending) {
                            if event_tx.send(event).await.is_err() {
                                break;
                            }
                        }
                    }
                    Ok(Message::Close(_)) => break,
                    Ok(Message::Ping(data)) => {
                        trace!("Received ping: {:?}", data);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let _ = event_tx.send(WsEvent::Error(e.to_string())).await;
                        break;
                    }
                }
            }
            // in-flight requests fail with ChannelClosed
            reader_pending.clear();
            let _ = event_tx.send(WsEvent::Disconnected).await;
        });

        Ok((
            WsConnection {
                tx: out_tx,
                pending,
                request_timeout: self.request_timeout,
            },
            event_rx,
        ))
    }
}

fn handle_frame(text: &str, pending: &PendingReplies) -> Option<WsEvent> {
    let frame = match serde_json::from_str::<WsFrame>(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!(error = %e, "Ignoring unrecognised frame");
            return None;
        }
    };

    match frame {
        WsFrame::Response { request_id } => {
            resolve(pending, &request_id, Reply::Ok);
            None
        }
        WsFrame::ProcessingError {
            request_id,
            error,
            message,
            metadata,
        } => {
            resolve(
                pending,
                &request_id,
                Reply::Error {
                    error,
                    message,
                    metadata,
                },
            );
            None
        }
        WsFrame::Synchronization { data } => match parse_packet(&data) {
            Ok(packet) => Some(WsEvent::Packet(packet)),
            Err(e) => {
                warn!(error = %e, "Malformed synchronization packet");
                Some(WsEvent::ProtocolError(e.to_string()))
            }
        },
    }
}

fn resolve(pending: &PendingReplies, request_id: &str, reply: Reply) {
    match pending.remove(request_id) {
        Some((_, waiter)) => {
            let _ = waiter.send(reply);
        }
        None => trace!(request_id, "Reply for unknown or expired request"),
    }
}

/// Handle for issuing correlated requests over the connection
#[derive(Clone)]
pub struct WsConnection {
    tx: mpsc::Sender<String>,
    pending: PendingReplies,
    request_timeout: Duration,
}

impl WsConnection {
    /// Send a request and wait for the reply carrying the same `requestId`
    async fn request(&self, request_id: &str, body: Value) -> Result<Reply, TransportError> {
        let text =
            serde_json::to_string(&body).map_err(|e| TransportError::Serialization(e.to_string()))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.insert(request_id.to_string(), reply_tx);

        if self.tx.send(text).await.is_err() {
            self.pending.remove(request_id);
            return Err(TransportError::ChannelClosed);
        }

        match tokio::time::timeout(self.request_timeout, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(TransportError::ChannelClosed),
            Err(_) => {
                self.pending.remove(request_id);
                Err(TransportError::Timeout)
            }
        }
    }

    /// Requests still waiting for a reply
    pub fn pending_requests(&self) -> usize {
        self.pending.len()
    }
}

#[async_trait]
impl SynchronizeSender for WsConnection {
    async fn send_synchronize(&self, request: &SynchronizeRequest) -> Result<(), TransportError> {
        let mut body =
            serde_json::to_value(request).map_err(|e| TransportError::Serialization(e.to_string()))?;
        if let Value::Object(fields) = &mut body {
            fields.insert("type".to_string(), json!("synchronize"));
        }

        match self.request(&request.request_id, body).await? {
            Reply::Ok => Ok(()),
            Reply::Error { error, message, .. } => Err(TransportError::Api {
                code: error,
                message,
            }),
        }
    }
}

#[async_trait]
impl SubscribeSender for WsConnection {
    async fn send_subscribe(&self, key: &ReplicaKey) -> Result<(), SubscribeError> {
        let request_id = Uuid::new_v4().to_string();
        let body = json!({
            "type": "subscribe",
            "requestId": request_id,
            "accountId": key.account_id,
            "instanceIndex": key.instance_index,
        });

        match self.request(&request_id, body).await {
            Ok(Reply::Ok) => Ok(()),
            Ok(Reply::Error {
                error, metadata, ..
            }) if error == TOO_MANY_REQUESTS => {
                let metadata = metadata.unwrap_or(ErrorMetadata {
                    limit_type: None,
                    recommended_retry_time: None,
                });
                Err(SubscribeError::TooManyRequests {
                    limit_type: metadata.limit_type.unwrap_or_default(),
                    recommended_retry_time: metadata.recommended_retry_time,
                })
            }
            Ok(Reply::Error { error, message, .. }) => Err(SubscribeError::Transport(
                TransportError::Api {
                    code: error,
                    message,
                },
            )),
            Err(TransportError::Timeout) => Err(SubscribeError::Timeout),
            Err(e) => Err(SubscribeError::Transport(e)),
        }
    }
}
