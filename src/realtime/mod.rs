//! Realtime change feed over the Supabase websocket
//!
//! Only the `postgres_changes` part of the protocol is implemented:
//! joining a channel with one filtered binding, receiving row changes and
//! leaving again.

mod channel;
mod client;
mod message;

pub use channel::{DatabaseChanges, Subscription};
pub use client::{ConnectionState, RealtimeClient, RealtimeClientOptions};
pub use message::{ChangeKind, ChannelEvent, RealtimeMessage, ReplyPayload, RowChange};
