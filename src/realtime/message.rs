use serde::{Deserialize, Serialize};

/// A Phoenix frame, received or sent over the websocket (serializer vsn 1.0.0).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(rename = "ref", default)]
    pub message_ref: Option<String>,
}

impl RealtimeMessage {
    pub fn new(topic: &str, event: ChannelEvent, payload: serde_json::Value, message_ref: Option<String>) -> Self {
        Self {
            topic: topic.to_string(),
            event: event.as_str().to_string(),
            payload,
            message_ref,
        }
    }

    pub fn channel_event(&self) -> Option<ChannelEvent> {
        ChannelEvent::parse(&self.event)
    }
}

/// Events the client understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEvent {
    PhoenixJoin,
    PhoenixReply,
    PhoenixLeave,
    PhoenixError,
    PhoenixClose,
    Heartbeat,
    PostgresChanges,
    System,
}

impl ChannelEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PhoenixJoin => "phx_join",
            Self::PhoenixReply => "phx_reply",
            Self::PhoenixLeave => "phx_leave",
            Self::PhoenixError => "phx_error",
            Self::PhoenixClose => "phx_close",
            Self::Heartbeat => "heartbeat",
            Self::PostgresChanges => "postgres_changes",
            Self::System => "system",
        }
    }

    pub fn parse(event: &str) -> Option<Self> {
        let event = match event {
            "phx_join" => Self::PhoenixJoin,
            "phx_reply" => Self::PhoenixReply,
            "phx_leave" => Self::PhoenixLeave,
            "phx_error" => Self::PhoenixError,
            "phx_close" => Self::PhoenixClose,
            "heartbeat" => Self::Heartbeat,
            "postgres_changes" => Self::PostgresChanges,
            "system" => Self::System,
            _ => return None,
        };
        Some(event)
    }
}

impl std::fmt::Display for ChannelEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row operation reported by the change feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One database change as delivered in `payload.data` of a
/// `postgres_changes` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RowChange {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub schema: String,
    pub table: String,
    #[serde(default)]
    pub commit_timestamp: Option<String>,
    #[serde(default)]
    pub record: serde_json::Value,
    #[serde(default)]
    pub old_record: serde_json::Value,
}

impl RowChange {
    /// Extract the change from a `postgres_changes` payload
    pub fn from_payload(payload: &serde_json::Value) -> Result<Self, serde_json::Error> {
        let data = payload.get("data").cloned().unwrap_or_else(|| payload.clone());
        serde_json::from_value(data)
    }
}

/// Status carried in a `phx_reply` payload
#[derive(Debug, Clone, Deserialize)]
pub struct ReplyPayload {
    pub status: String,
    #[serde(default)]
    pub response: serde_json::Value,
}

impl ReplyPayload {
    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}
