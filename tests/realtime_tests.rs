use std::time::Duration;

use bookmark_sync::auth::{Auth, Session, User};
use bookmark_sync::bookmarks::{ChangeFeed, ChangeFilter, RealtimeChangeFeed};
use bookmark_sync::config::ClientOptions;
use bookmark_sync::error::Error;
use bookmark_sync::realtime::{
    ChangeKind, ConnectionState, DatabaseChanges, RealtimeClient, RealtimeClientOptions, RealtimeMessage,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;

const WAIT: Duration = Duration::from_secs(5);

/// Accept one websocket and play the server side of the channel protocol.
///
/// Joins are answered with `join_status`; after a successful join one
/// INSERT for `bookmarks` is pushed. Every non-heartbeat frame is forwarded
/// to the returned receiver.
async fn start_server(join_status: &'static str) -> (String, mpsc::UnboundedReceiver<RealtimeMessage>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let (seen_tx, seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        while let Some(Ok(frame)) = ws.next().await {
            let text = match frame {
                Message::Text(text) => text,
                _ => continue,
            };
            let message: RealtimeMessage = serde_json::from_str(&text).unwrap();
            if message.event == "heartbeat" {
                continue;
            }

            if message.event == "phx_join" {
                let reply = json!({
                    "topic": message.topic,
                    "event": "phx_reply",
                    "payload": { "status": join_status, "response": {} },
                    "ref": message.message_ref,
                });
                ws.send(Message::Text(reply.to_string())).await.unwrap();

                if join_status == "ok" {
                    let change = json!({
                        "topic": message.topic,
                        "event": "postgres_changes",
                        "payload": {
                            "ids": [1],
                            "data": {
                                "type": "INSERT",
                                "schema": "public",
                                "table": "bookmarks",
                                "commit_timestamp": "2024-05-01T08:00:00Z",
                                "record": { "id": 1, "title": "Rust", "user_id": "u1" }
                            }
                        },
                        "ref": null,
                    });
                    ws.send(Message::Text(change.to_string())).await.unwrap();
                }
            }

            if seen_tx.send(message).is_err() {
                break;
            }
        }
    });

    (url, seen_rx)
}

fn quiet_options() -> RealtimeClientOptions {
    RealtimeClientOptions {
        heartbeat_interval: Duration::from_secs(60),
        join_timeout: Duration::from_secs(2),
    }
}

#[tokio::test]
async fn test_subscribe_receive_and_leave() {
    let (url, mut seen) = start_server("ok").await;
    let client = RealtimeClient::new_with_options(&url, "anon", quiet_options());
    let mut states = client.on_state_change();

    let (subscription, mut changes) = client
        .subscribe("bookmarks-u1", DatabaseChanges::new("bookmarks").eq("user_id", "u1"))
        .await
        .unwrap();
    assert_eq!(subscription.topic(), "realtime:bookmarks-u1");
    assert_eq!(client.get_connection_state().await, ConnectionState::Connected);
    assert_eq!(states.recv().await.unwrap(), ConnectionState::Connecting);
    assert_eq!(states.recv().await.unwrap(), ConnectionState::Connected);

    let join = timeout(WAIT, seen.recv()).await.unwrap().unwrap();
    assert_eq!(join.event, "phx_join");
    let binding = &join.payload["config"]["postgres_changes"][0];
    assert_eq!(binding["event"], "*");
    assert_eq!(binding["table"], "bookmarks");
    assert_eq!(binding["filter"], "user_id=eq.u1");

    let change = timeout(WAIT, changes.recv()).await.unwrap().unwrap();
    assert_eq!(change.kind, ChangeKind::Insert);
    assert_eq!(change.record["title"], "Rust");

    client.unsubscribe(&subscription).await.unwrap();
    let leave = timeout(WAIT, seen.recv()).await.unwrap().unwrap();
    assert_eq!(leave.event, "phx_leave");
    assert_eq!(leave.topic, "realtime:bookmarks-u1");
    assert_eq!(client.channel_count().await, 0);

    // a second unsubscribe does nothing
    client.unsubscribe(&subscription).await.unwrap();

    client.disconnect().await.unwrap();
    assert_eq!(client.get_connection_state().await, ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_rejected_join_is_an_error() {
    let (url, _seen) = start_server("error").await;
    let client = RealtimeClient::new_with_options(&url, "anon", quiet_options());

    let result = client
        .subscribe("bookmarks-u1", DatabaseChanges::new("bookmarks"))
        .await;

    assert!(matches!(result, Err(Error::Realtime(_))));
    assert_eq!(client.channel_count().await, 0);
}

#[tokio::test]
async fn test_connect_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let client = RealtimeClient::new_with_options(&url, "anon", quiet_options());
    let result = client.subscribe("x", DatabaseChanges::new("bookmarks")).await;

    assert!(matches!(result, Err(Error::WebSocket(_))));
    assert_eq!(client.get_connection_state().await, ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_change_feed_joins_with_user_token_and_owner_filter() {
    let (url, mut seen) = start_server("ok").await;

    let auth = Auth::new(&url, "anon", reqwest::Client::new(), ClientOptions::default());
    auth.set_session(Session::new(
        "user_token".to_string(),
        "refresh".to_string(),
        3600,
        User::new("u1", None),
    ))
    .await;
    let realtime = RealtimeClient::new_with_options(&url, "anon", quiet_options());
    let feed = RealtimeChangeFeed::new(realtime.clone(), auth);

    let filter = ChangeFilter {
        table: "bookmarks".to_string(),
        owner_column: "user_id".to_string(),
        owner_id: "u1".to_string(),
    };
    let (subscription, mut changes) = feed.subscribe(&filter).await.unwrap();

    let join = timeout(WAIT, seen.recv()).await.unwrap().unwrap();
    assert_eq!(join.topic, "realtime:bookmarks-u1");
    assert_eq!(join.payload["access_token"], "user_token");
    assert_eq!(join.payload["config"]["postgres_changes"][0]["filter"], "user_id=eq.u1");

    assert!(timeout(WAIT, changes.recv()).await.unwrap().is_some());

    feed.unsubscribe(&subscription).await.unwrap();
    assert_eq!(realtime.get_connection_state().await, ConnectionState::Disconnected);
}
