//! Collaborator seams of the bookmark controller

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::model::{Bookmark, BookmarkId, NewBookmark};
use crate::auth::{OAuthProvider, OAuthSignInOptions, User};
use crate::error::Result;
use crate::realtime::{RowChange, Subscription};

/// Identity collaborator: session lookup and the OAuth round trip
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The active user, or `None` when signed out
    async fn current_user(&self) -> Result<Option<User>>;

    /// URL that starts the provider redirect
    fn authorize_url(&self, provider: OAuthProvider, options: OAuthSignInOptions) -> String;

    /// Turn the redirect target into a session
    async fn complete_sign_in(&self, callback: &str) -> Result<User>;

    async fn sign_out(&self) -> Result<()>;

    async fn access_token(&self) -> Option<String>;
}

/// Query and write access to the bookmarks collection
#[async_trait]
pub trait BookmarkStore: Send + Sync {
    /// All rows owned by `owner_id`, newest first
    async fn list(&self, owner_id: &str) -> Result<Vec<Bookmark>>;

    /// Insert one row and return it as stored
    async fn insert(&self, bookmark: &NewBookmark) -> Result<Bookmark>;

    /// Delete the row with `id` owned by `owner_id`; `false` when no row matched
    async fn delete(&self, id: &BookmarkId, owner_id: &str) -> Result<bool>;
}

/// Rows a change subscription is scoped to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeFilter {
    pub table: String,
    pub owner_column: String,
    pub owner_id: String,
}

impl ChangeFilter {
    /// Whether a row (as JSON) belongs to this filter's owner
    pub fn matches(&self, row: &serde_json::Value) -> bool {
        row.get(&self.owner_column).and_then(|v| v.as_str()) == Some(self.owner_id.as_str())
    }
}

/// Standing subscription to row changes
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(
        &self,
        filter: &ChangeFilter,
    ) -> Result<(Subscription, mpsc::UnboundedReceiver<RowChange>)>;

    /// Close a subscription; unknown handles are ignored
    async fn unsubscribe(&self, subscription: &Subscription) -> Result<()>;
}
