use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, RwLock};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, trace, warn};
use url::Url;

use super::channel::{Channel, DatabaseChanges, Subscription};
use super::message::{ChannelEvent, RealtimeMessage, ReplyPayload, RowChange};
use crate::error::{Error, Result};

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// RealtimeClient options
#[derive(Debug, Clone)]
pub struct RealtimeClientOptions {
    /// Interval between heartbeats on the `phoenix` topic
    pub heartbeat_interval: Duration,
    /// How long to wait for the server to acknowledge a join
    pub join_timeout: Duration,
}

impl Default for RealtimeClientOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            join_timeout: Duration::from_secs(10),
        }
    }
}

type ChannelMap = Arc<RwLock<HashMap<String, Arc<Channel>>>>;
type PendingReplies = Arc<Mutex<HashMap<String, oneshot::Sender<ReplyPayload>>>>;

/// Websocket client for Supabase Realtime postgres changes
#[derive(Clone)]
pub struct RealtimeClient {
    url: String,
    key: String,
    options: RealtimeClientOptions,
    next_ref: Arc<AtomicU32>,
    // topic -> channel
    channels: ChannelMap,
    // message ref -> waiting join
    pending: PendingReplies,
    socket: Arc<RwLock<Option<mpsc::Sender<Message>>>>,
    state: Arc<RwLock<ConnectionState>>,
    state_change: broadcast::Sender<ConnectionState>,
    access_token: Arc<RwLock<Option<String>>>,
    connect_lock: Arc<Mutex<()>>,
    closer: Arc<Mutex<Option<oneshot::Sender<()>>>>,
}

impl RealtimeClient {
    /// Create a client with default options.
    ///
    /// `url` is the project URL (`http(s)://` or `ws(s)://`).
    pub fn new(url: &str, key: &str) -> Self {
        Self::new_with_options(url, key, RealtimeClientOptions::default())
    }

    pub fn new_with_options(url: &str, key: &str, options: RealtimeClientOptions) -> Self {
        let (state_change, _) = broadcast::channel(16);
        Self {
            url: url.to_string(),
            key: key.to_string(),
            options,
            next_ref: Arc::new(AtomicU32::new(1)),
            channels: Arc::new(RwLock::new(HashMap::new())),
            pending: Arc::new(Mutex::new(HashMap::new())),
            socket: Arc::new(RwLock::new(None)),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            state_change,
            access_token: Arc::new(RwLock::new(None)),
            connect_lock: Arc::new(Mutex::new(())),
            closer: Arc::new(Mutex::new(None)),
        }
    }

    /// Set the user token sent with channel joins
    pub async fn set_auth(&self, token: Option<String>) {
        debug!(is_some = token.is_some(), "setting realtime auth token");
        *self.access_token.write().await = token;
    }

    /// Receiver for connection state changes
    pub fn on_state_change(&self) -> broadcast::Receiver<ConnectionState> {
        self.state_change.subscribe()
    }

    pub async fn get_connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Number of channels currently joined
    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }

    fn next_ref(&self) -> String {
        self.next_ref.fetch_add(1, Ordering::SeqCst).to_string()
    }

    /// Websocket endpoint derived from the project URL
    pub fn websocket_url(&self) -> Result<String> {
        let mut url = Url::parse(&self.url)?;
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(Error::realtime(format!("Unsupported URL scheme: {}", other))),
        };
        url.set_scheme(scheme)
            .map_err(|_| Error::realtime("failed to set websocket scheme"))?;
        let mut url = url.join("/realtime/v1/websocket")?;
        url.query_pairs_mut()
            .append_pair("apikey", &self.key)
            .append_pair("vsn", "1.0.0");
        Ok(url.to_string())
    }

    /// Open the websocket unless already connected
    pub async fn connect(&self) -> Result<()> {
        let _guard = self.connect_lock.lock().await;
        if self.get_connection_state().await == ConnectionState::Connected {
            return Ok(());
        }

        let ws_url = self.websocket_url()?;
        info!(url = %ws_url, "connecting to realtime");
        set_state(&self.state, &self.state_change, ConnectionState::Connecting).await;

        let ws_stream = match connect_async(ws_url.as_str()).await {
            Ok((stream, _response)) => stream,
            Err(e) => {
                error!(error = %e, "websocket connection failed");
                set_state(&self.state, &self.state_change, ConnectionState::Disconnected).await;
                return Err(Error::WebSocket(e));
            }
        };

        let (mut write, mut read) = ws_stream.split();
        let (socket_tx, mut socket_rx) = mpsc::channel::<Message>(100);
        let (close_tx, mut close_rx) = oneshot::channel::<()>();
        *self.socket.write().await = Some(socket_tx.clone());
        *self.closer.lock().await = Some(close_tx);
        set_state(&self.state, &self.state_change, ConnectionState::Connected).await;

        tokio::spawn(async move {
            while let Some(message) = socket_rx.recv().await {
                trace!(?message, "sending frame");
                if let Err(e) = write.send(message).await {
                    error!(error = %e, "websocket send failed");
                    break;
                }
            }
            let _ = write.close().await;
            debug!("writer task finished");
        });

        let channels = self.channels.clone();
        let pending = self.pending.clone();
        let socket = self.socket.clone();
        let state = self.state.clone();
        let state_change = self.state_change.clone();
        let next_ref = self.next_ref.clone();
        let heartbeat_every = self.options.heartbeat_interval;

        tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(heartbeat_every);
            // the first tick completes immediately
            heartbeat.tick().await;

            loop {
                tokio::select! {
                    _ = &mut close_rx => {
                        debug!("close requested");
                        break;
                    }
                    frame = read.next() => match frame {
                        Some(Ok(Message::Text(text))) => {
                            dispatch(&text, &channels, &pending).await;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            debug!(?frame, "server closed websocket");
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!(error = %e, "websocket read failed");
                            break;
                        }
                        None => break,
                    },
                    _ = heartbeat.tick() => {
                        let heartbeat_ref = next_ref.fetch_add(1, Ordering::SeqCst).to_string();
                        let frame = RealtimeMessage::new("phoenix", ChannelEvent::Heartbeat, serde_json::json!({}), Some(heartbeat_ref));
                        if socket_tx.send(Message::Text(encode(&frame))).await.is_err() {
                            debug!("heartbeat failed, writer is gone");
                            break;
                        }
                    }
                }
            }

            // dropping the channels closes every subscriber's receiver
            channels.write().await.clear();
            pending.lock().await.clear();
            *socket.write().await = None;
            set_state(&state, &state_change, ConnectionState::Disconnected).await;
            debug!("reader task finished");
        });

        Ok(())
    }

    /// Join a channel for `changes` and return the stream of row changes.
    pub async fn subscribe(
        &self,
        name: &str,
        changes: DatabaseChanges,
    ) -> Result<(Subscription, mpsc::UnboundedReceiver<RowChange>)> {
        self.connect().await?;

        let topic = format!("realtime:{}", name);
        let subscription = Subscription {
            id: uuid::Uuid::new_v4().to_string(),
            topic: topic.clone(),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let channel = Arc::new(Channel::new(topic.clone(), subscription.id.clone(), changes, tx));

        let previous = self.channels.write().await.insert(topic.clone(), channel.clone());
        if previous.is_some() {
            warn!(%topic, "replacing existing channel for topic");
        }

        let token = self.access_token.read().await.clone();
        let join_ref = self.next_ref();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().await.insert(join_ref.clone(), reply_tx);

        let join = RealtimeMessage::new(
            &topic,
            ChannelEvent::PhoenixJoin,
            channel.changes.join_payload(token.as_deref()),
            Some(join_ref.clone()),
        );

        if let Err(e) = self.send(&join).await {
            self.forget(&topic, &join_ref).await;
            return Err(e);
        }

        let reply = match timeout(self.options.join_timeout, reply_rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => {
                self.forget(&topic, &join_ref).await;
                return Err(Error::realtime("connection closed while joining"));
            }
            Err(_) => {
                self.forget(&topic, &join_ref).await;
                return Err(Error::Timeout);
            }
        };

        if !reply.is_ok() {
            self.forget(&topic, &join_ref).await;
            return Err(Error::realtime(format!("join rejected: {}", reply.response)));
        }

        info!(%topic, filter = ?channel.changes.filter(), "subscribed to changes");
        Ok((subscription, rx))
    }

    /// Leave the subscription's channel.
    ///
    /// Unknown or already closed subscriptions are ignored.
    pub async fn unsubscribe(&self, subscription: &Subscription) -> Result<()> {
        let removed = {
            let mut channels = self.channels.write().await;
            match channels.get(&subscription.topic) {
                Some(channel) if channel.subscription_id == subscription.id => {
                    channels.remove(&subscription.topic)
                }
                _ => None,
            }
        };

        if removed.is_none() {
            debug!(topic = %subscription.topic, "unsubscribe for unknown subscription");
            return Ok(());
        }

        if self.get_connection_state().await == ConnectionState::Connected {
            let leave = RealtimeMessage::new(
                &subscription.topic,
                ChannelEvent::PhoenixLeave,
                serde_json::json!({}),
                Some(self.next_ref()),
            );
            self.send(&leave).await?;
        }

        info!(topic = %subscription.topic, "unsubscribed");
        Ok(())
    }

    /// Close the websocket and drop every channel
    pub async fn disconnect(&self) -> Result<()> {
        info!("disconnecting realtime");
        self.channels.write().await.clear();
        if self.socket.write().await.take().is_none() {
            debug!("no active socket");
        }
        if let Some(close) = self.closer.lock().await.take() {
            let _ = close.send(());
        }
        set_state(&self.state, &self.state_change, ConnectionState::Disconnected).await;
        Ok(())
    }

    async fn send(&self, message: &RealtimeMessage) -> Result<()> {
        let socket = self.socket.read().await;
        let tx = socket
            .as_ref()
            .ok_or_else(|| Error::realtime("socket unavailable"))?;
        tx.send(Message::Text(encode(message)))
            .await
            .map_err(|e| Error::realtime(format!("failed to queue frame: {}", e)))
    }

    async fn forget(&self, topic: &str, join_ref: &str) {
        self.channels.write().await.remove(topic);
        self.pending.lock().await.remove(join_ref);
    }
}

fn encode(message: &RealtimeMessage) -> String {
    serde_json::to_string(message).unwrap_or_default()
}

async fn dispatch(text: &str, channels: &ChannelMap, pending: &PendingReplies) {
    let message = match serde_json::from_str::<RealtimeMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, raw = %text, "unparseable frame");
            return;
        }
    };

    if message.channel_event() == Some(ChannelEvent::PhoenixReply) {
        if let Some(message_ref) = &message.message_ref {
            if let Some(waiter) = pending.lock().await.remove(message_ref) {
                match serde_json::from_value::<ReplyPayload>(message.payload.clone()) {
                    Ok(reply) => {
                        let _ = waiter.send(reply);
                    }
                    Err(e) => warn!(error = %e, "malformed phx_reply"),
                }
            }
        }
        return;
    }

    let channel = channels.read().await.get(&message.topic).cloned();
    match channel {
        Some(channel) => channel.handle_message(&message),
        None => trace!(topic = %message.topic, "frame for unknown topic"),
    }
}

async fn set_state(
    state: &RwLock<ConnectionState>,
    state_change: &broadcast::Sender<ConnectionState>,
    new_state: ConnectionState,
) {
    let mut current = state.write().await;
    if *current != new_state {
        debug!(from = ?*current, to = ?new_state, "realtime state change");
        *current = new_state;
        let _ = state_change.send(new_state);
    }
}
