//! Integration test: WsClient against a loopback WebSocket server
//!
//! The server answers each request with whatever frames the test scripts
//! for it, then optionally pushes synchronization packets.

use futures_util::{SinkExt, StreamExt};
use mirror_core::{PacketEvent, ReplicaKey, SynchronizeRequest};
use mirror_ports::{SubscribeError, SubscribeSender, SynchronizeSender, TransportError};
use mirror_sync::{WsClient, WsEvent};
use serde_json::{Value, json};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::{accept_async, tungstenite::Message};

/// Start a single-connection server; `reply` maps each request to frames
async fn spawn_server<F>(reply: F) -> (String, mpsc::Receiver<Value>)
where
    F: Fn(&Value) -> Vec<Value> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (seen_tx, seen_rx) = mpsc::channel(16);

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = accept_async(stream).await.unwrap();
        while let Some(Ok(msg)) = ws.next().await {
            if let Message::Text(text) = msg {
                let request: Value = serde_json::from_str(&text).unwrap();
                for frame in reply(&request) {
                    if frame == json!("close") {
                        let _ = ws.close(None).await;
                        return;
                    }
                    ws.send(Message::Text(frame.to_string().into())).await.unwrap();
                }
                let _ = seen_tx.send(request).await;
            }
        }
    });

    (format!("ws://{addr}"), seen_rx)
}

#[tokio::test]
async fn test_subscribe_acknowledged_then_packets_stream() {
    let (url, mut seen) = spawn_server(|request| {
        vec![
            json!({"event": "response", "requestId": request["requestId"]}),
            json!({"event": "synchronization", "data": {
                "type": "authenticated", "accountId": request["accountId"],
                "instanceIndex": request["instanceIndex"], "host": "ps-mpa-0"
            }}),
        ]
    })
    .await;

    let (connection, mut events) = WsClient::new(url, Duration::from_secs(5))
        .connect()
        .await
        .unwrap();

    connection
        .send_subscribe(&ReplicaKey::new("acc", 1))
        .await
        .unwrap();

    let request = seen.recv().await.unwrap();
    assert_eq!(request["type"], "subscribe");
    assert_eq!(request["accountId"], "acc");
    assert_eq!(request["instanceIndex"], 1);

    match events.recv().await {
        Some(WsEvent::Packet(packet)) => {
            assert_eq!(packet.replica_key(), ReplicaKey::new("acc", 1));
            assert!(matches!(packet.event, PacketEvent::Authenticated { .. }));
        }
        other => panic!("expected packet, got {other:?}"),
    }
    assert_eq!(connection.pending_requests(), 0);
}

#[tokio::test]
async fn test_synchronize_request_envelope() {
    let (url, mut seen) =
        spawn_server(|request| vec![json!({"event": "response", "requestId": request["requestId"]})])
            .await;
    let (connection, _events) = WsClient::new(url, Duration::from_secs(5))
        .connect()
        .await
        .unwrap();

    let request = SynchronizeRequest::new("acc")
        .with_request_id("sync-1")
        .with_host("ps-mpa-1");
    connection.send_synchronize(&request).await.unwrap();

    let sent = seen.recv().await.unwrap();
    assert_eq!(sent["type"], "synchronize");
    assert_eq!(sent["requestId"], "sync-1");
    assert_eq!(sent["instanceIndex"], 0);
    assert_eq!(sent["host"], "ps-mpa-1");
}

#[tokio::test]
async fn test_rate_limited_subscribe() {
    let (url, _seen) = spawn_server(|request| {
        vec![json!({
            "event": "processingError",
            "requestId": request["requestId"],
            "error": "TooManyRequestsError",
            "message": "One user can subscribe to one account at a time",
            "metadata": {
                "type": "LIMIT_ACCOUNT_SUBSCRIPTIONS_PER_USER",
                "recommendedRetryTime": "2030-01-01T00:00:00Z"
            }
        })]
    })
    .await;
    let (connection, _events) = WsClient::new(url, Duration::from_secs(5))
        .connect()
        .await
        .unwrap();

    let error = connection
        .send_subscribe(&ReplicaKey::new("acc", 0))
        .await
        .unwrap_err();

    match error {
        SubscribeError::TooManyRequests {
            limit_type,
            recommended_retry_time,
        } => {
            assert_eq!(limit_type, "LIMIT_ACCOUNT_SUBSCRIPTIONS_PER_USER");
            assert!(recommended_retry_time.is_some());
        }
        other => panic!("expected rate limit, got {other:?}"),
    }
}

#[tokio::test]
async fn test_other_errors_surface_as_api_errors() {
    let (url, _seen) = spawn_server(|request| {
        vec![json!({
            "event": "processingError",
            "requestId": request["requestId"],
            "error": "NotFoundError",
            "message": "Account not found"
        })]
    })
    .await;
    let (connection, _events) = WsClient::new(url, Duration::from_secs(5))
        .connect()
        .await
        .unwrap();

    let error = connection
        .send_synchronize(&SynchronizeRequest::new("missing"))
        .await
        .unwrap_err();

    assert_eq!(
        error,
        TransportError::Api {
            code: "NotFoundError".to_string(),
            message: "Account not found".to_string(),
        }
    );
}

#[tokio::test]
async fn test_unanswered_subscribe_times_out() {
    let (url, _seen) = spawn_server(|_| Vec::new()).await;
    let (connection, _events) = WsClient::new(url, Duration::from_millis(200))
        .connect()
        .await
        .unwrap();

    let error = connection
        .send_subscribe(&ReplicaKey::new("acc", 0))
        .await
        .unwrap_err();

    assert_eq!(error, SubscribeError::Timeout);
    assert_eq!(connection.pending_requests(), 0);
}

#[tokio::test]
async fn test_server_close_reports_disconnect() {
    let (url, _seen) = spawn_server(|_| vec![json!("close")]).await;
    let (connection, mut events) = WsClient::new(url, Duration::from_secs(5))
        .connect()
        .await
        .unwrap();

    let error = connection
        .send_subscribe(&ReplicaKey::new("acc", 0))
        .await
        .unwrap_err();
    assert_eq!(error, SubscribeError::Transport(TransportError::ChannelClosed));

    loop {
        match events.recv().await {
            Some(WsEvent::Disconnected) => break,
            Some(_) => continue,
            None => panic!("event stream ended without a disconnect"),
        }
    }
}
