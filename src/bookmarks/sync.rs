//! The bookmark controller
//!
//! [`BookmarkSync`] owns the session phase and the current owner's bookmark
//! list, runs the user's add and delete commands against the store and keeps
//! the list in step with remote changes through a debounced reload.
//!
//! Every piece of state a view needs is published as a [`SyncSnapshot`]
//! through a `watch` channel. Work started under one session is dropped if
//! the session changes before it completes.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::backend::{BookmarkStore, ChangeFeed, ChangeFilter, IdentityProvider};
use super::model::{sort_newest_first, Bookmark, BookmarkId, NewBookmark};
use super::state::{MutationKey, MutationStatus, SessionPhase, SyncSnapshot};
use crate::auth::{OAuthSignInOptions, User};
use crate::config::{ReconcileMode, SyncOptions};
use crate::error::{Error, Result};
use crate::realtime::{RowChange, Subscription};

struct ActiveSubscription {
    owner_id: String,
    // tells a reopened feed apart from the one it replaced
    generation: u64,
    subscription: Subscription,
    refresh: JoinHandle<()>,
}

/// A change made to the local list by a committed write
#[derive(Debug, Clone)]
enum LocalWrite {
    Upsert(Bookmark),
    Remove(BookmarkId),
}

impl LocalWrite {
    fn apply(&self, list: &mut Vec<Bookmark>) {
        match self {
            LocalWrite::Upsert(row) => {
                list.retain(|b| b.id != row.id);
                list.push(row.clone());
                sort_newest_first(list);
            }
            LocalWrite::Remove(id) => list.retain(|b| &b.id != id),
        }
    }
}

/// A committed write kept until a load issued after it has been applied
struct JournaledWrite {
    // `load_seq` at commit; loads with a ticket up to this may predate the write
    seq: u64,
    write: LocalWrite,
}

struct Inner {
    identity: Arc<dyn IdentityProvider>,
    store: Arc<dyn BookmarkStore>,
    feed: Arc<dyn ChangeFeed>,
    options: SyncOptions,
    state: watch::Sender<SyncSnapshot>,
    subscription: Mutex<Option<ActiveSubscription>>,
    feed_generation: AtomicU64,
    // bumped on every session change
    epoch: AtomicU64,
    // list loads issued / newest load applied
    load_seq: AtomicU64,
    applied_load: AtomicU64,
    // only locked inside a state modification
    journal: std::sync::Mutex<Vec<JournaledWrite>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(active) = self.subscription.get_mut().take() {
            active.refresh.abort();
            let feed = self.feed.clone();
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        if let Err(e) = feed.unsubscribe(&active.subscription).await {
                            warn!(error = %e, "failed to close change subscription on drop");
                        }
                    });
                }
                Err(_) => {
                    warn!(topic = active.subscription.topic(), "dropped outside a runtime, change subscription left open");
                }
            }
        }
    }
}

/// Controller for one user's bookmark list.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct BookmarkSync {
    inner: Arc<Inner>,
}

impl BookmarkSync {
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        store: Arc<dyn BookmarkStore>,
        feed: Arc<dyn ChangeFeed>,
        options: SyncOptions,
    ) -> Self {
        let (state, _) = watch::channel(SyncSnapshot::default());
        Self {
            inner: Arc::new(Inner {
                identity,
                store,
                feed,
                options,
                state,
                subscription: Mutex::new(None),
                feed_generation: AtomicU64::new(0),
                epoch: AtomicU64::new(0),
                load_seq: AtomicU64::new(0),
                applied_load: AtomicU64::new(0),
                journal: std::sync::Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.inner.options
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> SyncSnapshot {
        self.inner.state.borrow().clone()
    }

    /// Receiver notified on every state change
    pub fn watch(&self) -> watch::Receiver<SyncSnapshot> {
        self.inner.state.subscribe()
    }

    /// Ask the identity provider for the active user.
    ///
    /// Lookup failures are logged and treated as signed out.
    pub async fn resolve_session(&self) -> Option<User> {
        match self.inner.identity.current_user().await {
            Ok(user) => user,
            Err(e) => {
                warn!(error = %e, "session lookup failed, continuing signed out");
                None
            }
        }
    }

    /// Resolve the session and, if signed in, load the list and open the
    /// change subscription.
    pub async fn start(&self) -> Option<User> {
        match self.resolve_session().await {
            Some(user) => {
                self.enter_session(user.clone()).await;
                Some(user)
            }
            None => {
                info!("no active session");
                self.leave_session().await;
                None
            }
        }
    }

    /// Begin the provider redirect and return the URL to open
    pub fn sign_in(&self) -> Result<String> {
        if self.inner.state.borrow().is_authenticated() {
            return Err(Error::auth("already signed in"));
        }

        let options = OAuthSignInOptions {
            redirect_to: self.inner.options.redirect_to.clone(),
            scopes: self.inner.options.scopes.clone(),
        };
        let provider = self.inner.options.provider;
        let url = self.inner.identity.authorize_url(provider, options);

        info!(provider = provider.as_str(), "sign-in started");
        self.inner.state.send_modify(|s| {
            s.phase = SessionPhase::Authenticating {
                authorize_url: url.clone(),
            };
        });
        Ok(url)
    }

    /// Finish the redirect with the callback URL, code or fragment the
    /// provider sent back.
    pub async fn complete_sign_in(&self, callback: &str) -> Result<User> {
        match self.inner.identity.complete_sign_in(callback).await {
            Ok(user) => {
                self.enter_session(user.clone()).await;
                Ok(user)
            }
            Err(e) => {
                warn!(error = %e, "sign-in failed");
                self.inner.state.send_modify(|s| {
                    if s.phase != SessionPhase::Authenticated {
                        s.phase = SessionPhase::Anonymous;
                    }
                    s.last_error = Some(e.to_string());
                });
                Err(e)
            }
        }
    }

    /// End the session.
    ///
    /// Local state is cleared and the change subscription closed before the
    /// provider is told; a provider failure is returned but does not restore
    /// the session.
    pub async fn sign_out(&self) -> Result<()> {
        let previous = self.inner.state.borrow().owner_id().map(str::to_string);
        self.leave_session().await;

        match self.inner.identity.sign_out().await {
            Ok(()) => {
                info!(user_id = ?previous, "signed out");
                Ok(())
            }
            Err(e) => {
                warn!(user_id = ?previous, error = %e, "provider sign-out failed, local session cleared");
                Err(e)
            }
        }
    }

    /// Close the change subscription without touching the session
    pub async fn shutdown(&self) {
        self.close_subscription().await;
        debug!("bookmark sync shut down");
    }

    /// Fetch `owner_id`'s bookmarks and replace the local list.
    ///
    /// The list is only replaced when `owner_id` is the signed-in user and no
    /// newer load has been applied meanwhile. Writes committed after the load
    /// was issued are applied again on top of its rows. On failure the list
    /// is left as it was.
    pub async fn load_bookmarks(&self, owner_id: &str) -> Result<Vec<Bookmark>> {
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        let ticket = self.inner.load_seq.fetch_add(1, Ordering::SeqCst) + 1;

        let rows = match self.inner.store.list(owner_id).await {
            Ok(rows) => rows,
            Err(e) => {
                error!(owner_id, error = %e, "failed to load bookmarks");
                self.record_error(epoch, &e);
                return Err(e);
            }
        };

        let (mut owned, foreign): (Vec<_>, Vec<_>) =
            rows.into_iter().partition(|b| b.user_id == owner_id);
        if !foreign.is_empty() {
            warn!(owner_id, dropped = foreign.len(), "store returned rows of another owner");
        }
        sort_newest_first(&mut owned);

        let applied = self.inner.state.send_if_modified(|s| {
            if !self.is_current(epoch) || s.owner_id() != Some(owner_id) {
                return false;
            }
            if ticket <= self.inner.applied_load.load(Ordering::SeqCst) {
                return false;
            }
            self.inner.applied_load.store(ticket, Ordering::SeqCst);
            s.bookmarks = owned.clone();
            let mut journal = self.journal();
            journal.retain(|entry| entry.seq >= ticket);
            for entry in journal.iter() {
                entry.write.apply(&mut s.bookmarks);
            }
            true
        });

        if applied {
            debug!(owner_id, ticket, count = owned.len(), "bookmark list replaced");
        } else {
            debug!(owner_id, ticket, "discarding stale bookmark load");
        }
        Ok(owned)
    }

    /// Open the change subscription for `owner_id`, replacing any open one.
    ///
    /// Changes are coalesced over `refresh_debounce` and then trigger one
    /// reload.
    pub async fn subscribe_changes(&self, owner_id: &str) -> Result<()> {
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        let mut active = self.inner.subscription.lock().await;
        if let Some(previous) = active.take() {
            self.release(previous).await;
        }

        if !self.is_current(epoch) || self.inner.state.borrow().owner_id() != Some(owner_id) {
            return Err(Error::NotAuthenticated);
        }

        *active = Some(self.open_feed(epoch, owner_id).await?);
        Ok(())
    }

    /// Insert a bookmark for the signed-in user.
    ///
    /// Title and url are stored as given; an empty one is ignored and
    /// returns `Ok(None)`.
    pub async fn add_bookmark(&self, title: &str, url: &str) -> Result<Option<Bookmark>> {
        if title.is_empty() || url.is_empty() {
            debug!("ignoring bookmark with empty title or url");
            return Ok(None);
        }

        let (epoch, user_id) = self.session()?;
        let key = MutationKey::Add {
            title: title.to_string(),
            url: url.to_string(),
        };
        self.begin(&key)?;

        let new = NewBookmark {
            title: title.to_string(),
            url: url.to_string(),
            user_id: user_id.clone(),
        };

        match self.inner.store.insert(&new).await {
            Ok(row) if row.user_id != user_id => {
                let e = Error::database(format!("inserted row is owned by {}", row.user_id));
                error!(user_id = %user_id, id = %row.id, "store attributed new bookmark to another owner");
                self.fail(epoch, &key, &e);
                Err(e)
            }
            Ok(row) => {
                info!(user_id = %user_id, id = %row.id, "bookmark added");
                self.commit(epoch, &user_id, &key, LocalWrite::Upsert(row.clone()))
                    .await;
                Ok(Some(row))
            }
            Err(e) => {
                error!(user_id = %user_id, error = %e, "failed to add bookmark");
                self.fail(epoch, &key, &e);
                Err(e)
            }
        }
    }

    /// Delete one of the signed-in user's bookmarks.
    ///
    /// Returns [`Error::NotFound`] when the store has no such row for this
    /// owner; a stale local copy is dropped in that case.
    pub async fn delete_bookmark(&self, id: &BookmarkId) -> Result<()> {
        let (epoch, user_id) = self.session()?;
        let key = MutationKey::Delete(id.clone());
        self.begin(&key)?;

        match self.inner.store.delete(id, &user_id).await {
            Ok(true) => {
                info!(user_id = %user_id, %id, "bookmark deleted");
                self.commit(epoch, &user_id, &key, LocalWrite::Remove(id.clone()))
                    .await;
                Ok(())
            }
            Ok(false) => {
                warn!(user_id = %user_id, %id, "no bookmark to delete for this owner");
                let e = Error::NotFound(id.to_string());
                self.inner.state.send_if_modified(|s| {
                    if !self.is_current(epoch) {
                        return false;
                    }
                    self.apply_write(s, LocalWrite::Remove(id.clone()));
                    s.mutations.insert(key.clone(), MutationStatus::Failed(e.to_string()));
                    s.last_error = Some(e.to_string());
                    true
                });
                Err(e)
            }
            Err(e) => {
                error!(user_id = %user_id, %id, error = %e, "failed to delete bookmark");
                self.fail(epoch, &key, &e);
                Err(e)
            }
        }
    }

    async fn open_feed(&self, epoch: u64, owner_id: &str) -> Result<ActiveSubscription> {
        let filter = ChangeFilter {
            table: self.inner.options.table.clone(),
            owner_column: self.inner.options.owner_column.clone(),
            owner_id: owner_id.to_string(),
        };

        let (subscription, events) = match self.inner.feed.subscribe(&filter).await {
            Ok(opened) => opened,
            Err(e) => {
                error!(owner_id, error = %e, "failed to open change subscription");
                self.record_error(epoch, &e);
                return Err(e);
            }
        };

        // session ended while joining
        if !self.is_current(epoch) {
            if let Err(e) = self.inner.feed.unsubscribe(&subscription).await {
                warn!(error = %e, "failed to close abandoned change subscription");
            }
            return Err(Error::NotAuthenticated);
        }

        let generation = self.inner.feed_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let refresh = spawn_refresh(
            Arc::downgrade(&self.inner),
            generation,
            filter,
            events,
            self.inner.options.refresh_debounce,
        );

        info!(owner_id, topic = subscription.topic(), generation, "watching bookmark changes");
        Ok(ActiveSubscription {
            owner_id: owner_id.to_string(),
            generation,
            subscription,
            refresh,
        })
    }

    /// Called when feed `generation` ended without being closed here.
    ///
    /// The loss is recorded and a task reopens the feed with backoff.
    async fn feed_lost(&self, generation: u64, owner_id: &str) {
        if !self.is_lost_feed(generation, owner_id).await {
            return;
        }

        warn!(owner_id, generation, "change feed closed unexpectedly, reopening");
        let e = Error::realtime(FEED_LOST);
        self.record_error(self.inner.epoch.load(Ordering::SeqCst), &e);
        tokio::spawn(reopen_feed(
            Arc::downgrade(&self.inner),
            generation,
            owner_id.to_string(),
        ));
    }

    async fn is_lost_feed(&self, generation: u64, owner_id: &str) -> bool {
        let active = self.inner.subscription.lock().await;
        let same_feed = active.as_ref().map(|a| a.generation) == Some(generation);
        same_feed && self.inner.state.borrow().owner_id() == Some(owner_id)
    }

    /// One attempt to replace lost feed `generation`.
    ///
    /// Returns false when the attempt failed and is worth repeating.
    async fn try_reopen(&self, generation: u64, owner_id: &str) -> bool {
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        let dead = {
            let mut active = self.inner.subscription.lock().await;
            let wanted = active.as_ref().map(|a| a.generation) == Some(generation)
                && self.inner.state.borrow().owner_id() == Some(owner_id);
            if !wanted {
                debug!(owner_id, generation, "lost change feed no longer wanted");
                return true;
            }

            match self.open_feed(epoch, owner_id).await {
                Ok(opened) => active.replace(opened),
                Err(Error::NotAuthenticated) => return true,
                Err(e) => {
                    warn!(owner_id, error = %e, "reopening change feed failed");
                    return false;
                }
            }
        };

        if let Some(dead) = dead {
            self.release(dead).await;
        }
        let lost = Error::realtime(FEED_LOST).to_string();
        self.inner.state.send_if_modified(|s| {
            let recovered = self.is_current(epoch) && s.last_error.as_deref() == Some(lost.as_str());
            if recovered {
                s.last_error = None;
            }
            recovered
        });

        // changes made while the feed was down were never delivered
        if let Err(e) = self.load_bookmarks(owner_id).await {
            warn!(owner_id, error = %e, "reload after reopening change feed failed");
        }
        true
    }

    async fn enter_session(&self, user: User) {
        self.close_subscription().await;
        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let owner_id = user.id.clone();
        info!(user_id = %owner_id, "session established");

        self.inner.state.send_modify(|s| {
            if s.user.as_ref().map(|u| u.id != user.id).unwrap_or(true) {
                s.bookmarks.clear();
            }
            s.phase = SessionPhase::Authenticated;
            s.user = Some(user);
            s.mutations.clear();
            s.loading = true;
            s.last_error = None;
            self.journal().clear();
        });

        // failures are logged and recorded in the snapshot
        let _ = self.load_bookmarks(&owner_id).await;
        self.inner.state.send_if_modified(|s| {
            let done = self.is_current(epoch) && s.loading;
            if done {
                s.loading = false;
            }
            done
        });

        if self.is_current(epoch) {
            let _ = self.subscribe_changes(&owner_id).await;
        }
    }

    async fn leave_session(&self) {
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);
        self.inner.state.send_modify(|s| {
            *s = SyncSnapshot::default();
            self.journal().clear();
        });
        self.close_subscription().await;
    }

    async fn close_subscription(&self) {
        let active = self.inner.subscription.lock().await.take();
        if let Some(active) = active {
            self.release(active).await;
        }
    }

    async fn release(&self, active: ActiveSubscription) {
        active.refresh.abort();
        match self.inner.feed.unsubscribe(&active.subscription).await {
            Ok(()) => info!(owner_id = %active.owner_id, topic = active.subscription.topic(), "stopped watching bookmark changes"),
            Err(e) => warn!(owner_id = %active.owner_id, error = %e, "failed to close change subscription"),
        }
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.inner.epoch.load(Ordering::SeqCst) == epoch
    }

    fn session(&self) -> Result<(u64, String)> {
        let epoch = self.inner.epoch.load(Ordering::SeqCst);
        let owner = self.inner.state.borrow().owner_id().map(str::to_string);
        owner.map(|id| (epoch, id)).ok_or(Error::NotAuthenticated)
    }

    fn journal(&self) -> MutexGuard<'_, Vec<JournaledWrite>> {
        self.inner.journal.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Apply `write` to the list and keep it for loads already in flight
    fn apply_write(&self, s: &mut SyncSnapshot, write: LocalWrite) {
        write.apply(&mut s.bookmarks);
        let seq = self.inner.load_seq.load(Ordering::SeqCst);
        self.journal().push(JournaledWrite { seq, write });
    }

    fn begin(&self, key: &MutationKey) -> Result<()> {
        let mut in_flight = false;
        self.inner.state.send_if_modified(|s| {
            if s.mutations.get(key) == Some(&MutationStatus::Pending) {
                in_flight = true;
                return false;
            }
            // settled results stay visible until the next command starts
            s.mutations.retain(|_, status| *status == MutationStatus::Pending);
            s.mutations.insert(key.clone(), MutationStatus::Pending);
            true
        });

        if in_flight {
            debug!(%key, "rejecting duplicate mutation");
            return Err(Error::MutationInFlight(key.to_string()));
        }
        Ok(())
    }

    async fn commit(&self, epoch: u64, owner_id: &str, key: &MutationKey, write: LocalWrite) {
        match self.inner.options.reconcile {
            ReconcileMode::Patch => {
                self.inner.state.send_if_modified(|s| {
                    if !self.is_current(epoch) {
                        return false;
                    }
                    s.mutations.insert(key.clone(), MutationStatus::Committed);
                    self.apply_write(s, write);
                    true
                });
            }
            ReconcileMode::Reload => {
                self.inner.state.send_if_modified(|s| {
                    if !self.is_current(epoch) {
                        return false;
                    }
                    s.mutations.insert(key.clone(), MutationStatus::Committed);
                    true
                });
                if let Err(e) = self.load_bookmarks(owner_id).await {
                    warn!(owner_id, error = %e, "reload after write failed");
                }
            }
        }
    }

    fn fail(&self, epoch: u64, key: &MutationKey, e: &Error) {
        self.inner.state.send_if_modified(|s| {
            if !self.is_current(epoch) {
                return false;
            }
            s.mutations.insert(key.clone(), MutationStatus::Failed(e.to_string()));
            s.last_error = Some(e.to_string());
            true
        });
    }

    fn record_error(&self, epoch: u64, e: &Error) {
        self.inner.state.send_if_modified(|s| {
            if !self.is_current(epoch) {
                return false;
            }
            s.last_error = Some(e.to_string());
            true
        });
    }
}

/// Whether a change can concern `filter`'s owner. Changes without an owner
/// value (a delete without full replica identity) are assumed to.
fn concerns(filter: &ChangeFilter, change: &RowChange) -> bool {
    let owner = change
        .record
        .get(&filter.owner_column)
        .or_else(|| change.old_record.get(&filter.owner_column))
        .and_then(|v| v.as_str());
    owner.map(|o| o == filter.owner_id).unwrap_or(true)
}

const FEED_LOST: &str = "change feed closed";

// boxed: the refresh task can reopen its own feed, and that cycle needs
// a future type with a declared `Send` bound
fn spawn_refresh(
    inner: Weak<Inner>,
    generation: u64,
    filter: ChangeFilter,
    events: mpsc::UnboundedReceiver<RowChange>,
    debounce: Duration,
) -> JoinHandle<()> {
    let task: Pin<Box<dyn Future<Output = ()> + Send>> =
        Box::pin(refresh_on_change(inner, generation, filter, events, debounce));
    tokio::spawn(task)
}

async fn refresh_on_change(
    inner: Weak<Inner>,
    generation: u64,
    filter: ChangeFilter,
    mut events: mpsc::UnboundedReceiver<RowChange>,
    debounce: Duration,
) {
    let owner_id = filter.owner_id.as_str();

    while let Some(change) = events.recv().await {
        if !concerns(&filter, &change) {
            debug!(owner_id, kind = ?change.kind, "ignoring change for another owner");
            continue;
        }

        let mut coalesced = 1usize;
        let mut closed = false;
        let window = tokio::time::sleep(debounce);
        tokio::pin!(window);
        loop {
            tokio::select! {
                _ = &mut window => break,
                next = events.recv() => match next {
                    Some(next) if concerns(&filter, &next) => coalesced += 1,
                    Some(_) => {}
                    None => {
                        closed = true;
                        break;
                    }
                },
            }
        }

        let Some(inner) = inner.upgrade() else {
            break;
        };
        debug!(owner_id, kind = ?change.kind, coalesced, "refreshing after remote change");
        let sync = BookmarkSync { inner };
        if let Err(e) = sync.load_bookmarks(owner_id).await {
            warn!(owner_id, error = %e, "refresh after remote change failed");
        }

        if closed {
            break;
        }
    }
    debug!(owner_id, generation, "change feed closed");

    // a feed closed from here aborts this task before it gets this far
    if let Some(inner) = inner.upgrade() {
        BookmarkSync { inner }.feed_lost(generation, owner_id).await;
    }
}

async fn reopen_feed(inner: Weak<Inner>, generation: u64, owner_id: String) {
    let mut delay = match inner.upgrade() {
        Some(inner) => inner.options.resubscribe_interval,
        None => return,
    };

    loop {
        tokio::time::sleep(delay).await;
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let sync = BookmarkSync { inner };
        if sync.try_reopen(generation, &owner_id).await {
            return;
        }
        delay = sync.inner.options.next_resubscribe_delay(delay);
    }
}
