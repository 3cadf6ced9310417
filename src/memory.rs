//! In-memory collaborators for tests and offline use.
//!
//! [`MemoryBackend`] is both the bookmark store and its change feed, so a
//! write through one controller is seen by every subscription the same way
//! the realtime service would deliver it.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

use crate::auth::{AuthCallback, OAuthProvider, OAuthSignInOptions, User};
use crate::bookmarks::{Bookmark, BookmarkId, BookmarkStore, ChangeFeed, ChangeFilter, IdentityProvider, NewBookmark};
use crate::error::{Error, Result};
use crate::realtime::{ChangeKind, RowChange, Subscription};

/// Operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryOp {
    List,
    Insert,
    Delete,
    Subscribe,
}

impl fmt::Display for MemoryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MemoryOp::List => "list",
            MemoryOp::Insert => "insert",
            MemoryOp::Delete => "delete",
            MemoryOp::Subscribe => "subscribe",
        };
        f.write_str(name)
    }
}

struct Feed {
    filter: ChangeFilter,
    sender: mpsc::UnboundedSender<RowChange>,
}

#[derive(Default)]
struct BackendState {
    rows: Vec<Bookmark>,
    next_id: i64,
    last_created: Option<DateTime<Utc>>,
    feeds: HashMap<String, Feed>,
    next_feed: u64,
    failures: HashMap<MemoryOp, u32>,
    delays: HashMap<MemoryOp, VecDeque<Duration>>,
    list_calls: usize,
    unsubscribe_calls: usize,
}

impl BackendState {
    fn take_failure(&mut self, op: MemoryOp) -> Result<()> {
        match self.failures.get_mut(&op) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Err(match op {
                    MemoryOp::Subscribe => Error::realtime(format!("injected {} failure", op)),
                    _ => Error::database(format!("injected {} failure", op)),
                })
            }
            _ => Ok(()),
        }
    }

    fn take_delay(&mut self, op: MemoryOp) -> Option<Duration> {
        self.delays.get_mut(&op).and_then(|queue| queue.pop_front())
    }

    // strictly increasing so newest-first order is total
    fn next_timestamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now();
        let at = match self.last_created {
            Some(last) if now <= last => last + ChronoDuration::microseconds(1),
            _ => now,
        };
        self.last_created = Some(at);
        at
    }

    fn publish(&mut self, kind: ChangeKind, row: &Bookmark) {
        self.feeds.retain(|id, feed| {
            let record = record_for(&feed.filter, row);
            if !feed.filter.matches(&record) {
                return true;
            }
            let (record, old_record) = match kind {
                ChangeKind::Delete => (serde_json::Value::Null, record),
                _ => (record, serde_json::Value::Null),
            };
            let change = RowChange {
                kind,
                schema: "public".to_string(),
                table: feed.filter.table.clone(),
                commit_timestamp: Some(Utc::now().to_rfc3339()),
                record,
                old_record,
            };
            let open = feed.sender.send(change).is_ok();
            if !open {
                debug!(subscription = %id, "dropping feed with closed receiver");
            }
            open
        });
    }
}

fn record_for(filter: &ChangeFilter, row: &Bookmark) -> serde_json::Value {
    let mut record = serde_json::json!({
        "id": row.id,
        "title": row.title,
        "url": row.url,
        "created_at": row.created_at,
    });
    record[filter.owner_column.as_str()] = serde_json::json!(row.user_id);
    record
}

/// Bookmark store and change feed kept in memory
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<BackendState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `times` calls of `op` fail
    pub async fn fail_next(&self, op: MemoryOp, times: u32) {
        *self.state.lock().await.failures.entry(op).or_insert(0) += times;
    }

    /// Delay the next call of `op`.
    ///
    /// A delayed list returns the rows as they were when it was called;
    /// delayed writes are applied after the delay.
    pub async fn delay_next(&self, op: MemoryOp, delay: Duration) {
        self.state
            .lock()
            .await
            .delays
            .entry(op)
            .or_default()
            .push_back(delay);
    }

    async fn pause(&self, op: MemoryOp) {
        let delay = self.state.lock().await.take_delay(op);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    /// Every stored row, oldest first
    pub async fn rows(&self) -> Vec<Bookmark> {
        self.state.lock().await.rows.clone()
    }

    pub async fn list_calls(&self) -> usize {
        self.state.lock().await.list_calls
    }

    pub async fn unsubscribe_calls(&self) -> usize {
        self.state.lock().await.unsubscribe_calls
    }

    /// Subscriptions still open
    pub async fn active_subscriptions(&self) -> usize {
        self.state.lock().await.feeds.len()
    }

    /// End every open subscription as if the connection dropped.
    ///
    /// Receivers see the feed close; nothing is unsubscribed.
    pub async fn close_feeds(&self) -> usize {
        let mut state = self.state.lock().await;
        let closed = state.feeds.len();
        state.feeds.clear();
        debug!(closed, "closed every change feed");
        closed
    }

    /// Deliver `change` to every open subscription, bypassing owner filters
    pub async fn emit(&self, change: RowChange) {
        let state = self.state.lock().await;
        for feed in state.feeds.values() {
            let _ = feed.sender.send(change.clone());
        }
    }
}

#[async_trait]
impl BookmarkStore for MemoryBackend {
    async fn list(&self, owner_id: &str) -> Result<Vec<Bookmark>> {
        let (rows, delay) = {
            let mut state = self.state.lock().await;
            state.list_calls += 1;
            state.take_failure(MemoryOp::List)?;
            let mut rows: Vec<Bookmark> = state
                .rows
                .iter()
                .filter(|b| b.user_id == owner_id)
                .cloned()
                .collect();
            rows.reverse();
            (rows, state.take_delay(MemoryOp::List))
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(rows)
    }

    async fn insert(&self, bookmark: &NewBookmark) -> Result<Bookmark> {
        self.pause(MemoryOp::Insert).await;
        let mut state = self.state.lock().await;
        state.take_failure(MemoryOp::Insert)?;

        state.next_id += 1;
        let row = Bookmark {
            id: BookmarkId::from(state.next_id),
            title: bookmark.title.clone(),
            url: bookmark.url.clone(),
            user_id: bookmark.user_id.clone(),
            created_at: state.next_timestamp(),
        };
        state.rows.push(row.clone());
        state.publish(ChangeKind::Insert, &row);
        Ok(row)
    }

    async fn delete(&self, id: &BookmarkId, owner_id: &str) -> Result<bool> {
        self.pause(MemoryOp::Delete).await;
        let mut state = self.state.lock().await;
        state.take_failure(MemoryOp::Delete)?;

        let position = state
            .rows
            .iter()
            .position(|b| &b.id == id && b.user_id == owner_id);
        match position {
            Some(index) => {
                let row = state.rows.remove(index);
                state.publish(ChangeKind::Delete, &row);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl ChangeFeed for MemoryBackend {
    async fn subscribe(
        &self,
        filter: &ChangeFilter,
    ) -> Result<(Subscription, mpsc::UnboundedReceiver<RowChange>)> {
        self.pause(MemoryOp::Subscribe).await;
        let mut state = self.state.lock().await;
        state.take_failure(MemoryOp::Subscribe)?;

        state.next_feed += 1;
        let id = format!("feed-{}", state.next_feed);
        let topic = format!("memory:{}-{}", filter.table, filter.owner_id);
        let (sender, receiver) = mpsc::unbounded_channel();
        state.feeds.insert(
            id.clone(),
            Feed {
                filter: filter.clone(),
                sender,
            },
        );
        Ok((Subscription::new(id, topic), receiver))
    }

    async fn unsubscribe(&self, subscription: &Subscription) -> Result<()> {
        let mut state = self.state.lock().await;
        state.unsubscribe_calls += 1;
        if state.feeds.remove(subscription.id()).is_none() {
            debug!(id = subscription.id(), "unsubscribe for unknown feed");
        }
        Ok(())
    }
}

#[derive(Default)]
struct IdentityState {
    user: Option<User>,
    codes: HashMap<String, User>,
    unreachable: bool,
    sign_outs: usize,
}

/// Identity provider that signs in whoever holds a registered code
#[derive(Clone, Default)]
pub struct MemoryIdentity {
    state: Arc<Mutex<IdentityState>>,
}

impl MemoryIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with `user` already signed in
    pub fn signed_in(user: User) -> Self {
        Self {
            state: Arc::new(Mutex::new(IdentityState {
                user: Some(user),
                ..IdentityState::default()
            })),
        }
    }

    /// Accept `code` as a callback signing in `user`
    pub async fn register_code(&self, code: &str, user: User) {
        self.state.lock().await.codes.insert(code.to_string(), user);
    }

    /// Make session lookups and sign-out fail as if the provider was down
    pub async fn set_unreachable(&self, unreachable: bool) {
        self.state.lock().await.unreachable = unreachable;
    }

    pub async fn sign_out_count(&self) -> usize {
        self.state.lock().await.sign_outs
    }
}

#[async_trait]
impl IdentityProvider for MemoryIdentity {
    async fn current_user(&self) -> Result<Option<User>> {
        let state = self.state.lock().await;
        if state.unreachable {
            return Err(Error::auth("identity provider unreachable"));
        }
        Ok(state.user.clone())
    }

    fn authorize_url(&self, provider: OAuthProvider, options: OAuthSignInOptions) -> String {
        let mut url = format!("memory://authorize?provider={}", provider.as_str());
        if let Some(redirect_to) = options.redirect_to {
            url.push_str(&format!("&redirect_to={}", urlencoding::encode(&redirect_to)));
        }
        url
    }

    async fn complete_sign_in(&self, callback: &str) -> Result<User> {
        let code = match AuthCallback::parse(callback)? {
            AuthCallback::Code(code) => code,
            AuthCallback::Tokens(_) => {
                return Err(Error::auth("token callbacks are not accepted here"));
            }
        };

        let mut state = self.state.lock().await;
        let user = state
            .codes
            .remove(&code)
            .ok_or_else(|| Error::auth("invalid authorization code"))?;
        state.user = Some(user.clone());
        Ok(user)
    }

    async fn sign_out(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.user = None;
        state.sign_outs += 1;
        if state.unreachable {
            return Err(Error::auth("identity provider unreachable"));
        }
        Ok(())
    }

    async fn access_token(&self) -> Option<String> {
        self.state
            .lock()
            .await
            .user
            .as_ref()
            .map(|u| format!("memory-token-{}", u.id))
    }
}
