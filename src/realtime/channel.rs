use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::message::{ChannelEvent, RealtimeMessage, RowChange};

/// Which database changes a channel listens to
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatabaseChanges {
    event: String,
    schema: String,
    table: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    filter: Option<String>,
}

impl DatabaseChanges {
    /// All events on `public.{table}`
    pub fn new(table: &str) -> Self {
        Self {
            event: "*".to_string(),
            schema: "public".to_string(),
            table: table.to_string(),
            filter: None,
        }
    }

    pub fn schema(mut self, schema: &str) -> Self {
        self.schema = schema.to_string();
        self
    }

    /// Restrict to one of INSERT, UPDATE or DELETE
    pub fn event(mut self, event: &str) -> Self {
        self.event = event.to_string();
        self
    }

    /// Only rows where `column` equals `value`.
    ///
    /// The server accepts a single filter per binding; a second call replaces
    /// the first.
    pub fn eq<T: ToString>(mut self, column: &str, value: T) -> Self {
        self.filter = Some(format!("{}=eq.{}", column, value.to_string()));
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn filter(&self) -> Option<&str> {
        self.filter.as_deref()
    }

    /// Join payload for a channel carrying this binding
    pub(crate) fn join_payload(&self, access_token: Option<&str>) -> serde_json::Value {
        let mut payload = json!({
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [self],
            }
        });
        if let Some(token) = access_token {
            payload["access_token"] = json!(token);
        }
        payload
    }
}

/// Handle to an open subscription; pass it back to
/// [`RealtimeClient::unsubscribe`](super::RealtimeClient::unsubscribe).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub(crate) id: String,
    pub(crate) topic: String,
}

impl Subscription {
    /// Handle for a subscription opened by another change feed
    pub fn new(id: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            topic: topic.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }
}

/// Internal channel representation
pub(crate) struct Channel {
    pub(crate) topic: String,
    pub(crate) subscription_id: String,
    pub(crate) changes: DatabaseChanges,
    sender: mpsc::UnboundedSender<RowChange>,
}

impl Channel {
    pub(crate) fn new(
        topic: String,
        subscription_id: String,
        changes: DatabaseChanges,
        sender: mpsc::UnboundedSender<RowChange>,
    ) -> Self {
        Self {
            topic,
            subscription_id,
            changes,
            sender,
        }
    }

    /// Route a frame addressed to this channel's topic
    pub(crate) fn handle_message(&self, message: &RealtimeMessage) {
        match message.channel_event() {
            Some(ChannelEvent::PostgresChanges) => match RowChange::from_payload(&message.payload) {
                Ok(change) => {
                    if change.table != self.changes.table() {
                        debug!(topic = %self.topic, table = %change.table, "ignoring change for other table");
                        return;
                    }
                    if self.sender.send(change).is_err() {
                        debug!(topic = %self.topic, "change receiver dropped");
                    }
                }
                Err(e) => {
                    warn!(topic = %self.topic, error = %e, "failed to parse postgres_changes payload");
                }
            },
            Some(ChannelEvent::PhoenixError) | Some(ChannelEvent::PhoenixClose) => {
                warn!(topic = %self.topic, event = %message.event, payload = %message.payload, "channel closed by server");
            }
            Some(ChannelEvent::System) => {
                debug!(topic = %self.topic, payload = %message.payload, "system message");
            }
            _ => {
                debug!(topic = %self.topic, event = %message.event, "unhandled event");
            }
        }
    }
}
