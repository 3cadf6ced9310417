//! Supabase-backed collaborators: GoTrue identity, PostgREST rows and the
//! realtime change feed.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::backend::{BookmarkStore, ChangeFeed, ChangeFilter, IdentityProvider};
use super::model::{Bookmark, BookmarkId, NewBookmark};
use crate::auth::{Auth, OAuthProvider, OAuthSignInOptions, User};
use crate::error::{Error, Result};
use crate::postgrest::{Order, PostgrestClient};
use crate::realtime::{DatabaseChanges, RealtimeClient, RowChange, Subscription};

const COLUMNS: &str = "id,title,url,created_at";

#[async_trait]
impl IdentityProvider for Auth {
    async fn current_user(&self) -> Result<Option<User>> {
        Auth::current_user(self).await
    }

    fn authorize_url(&self, provider: OAuthProvider, options: OAuthSignInOptions) -> String {
        self.sign_in_with_oauth(provider, Some(options))
    }

    async fn complete_sign_in(&self, callback: &str) -> Result<User> {
        let session = self.session_from_callback(callback).await?;
        Ok(session.user)
    }

    async fn sign_out(&self) -> Result<()> {
        Auth::sign_out(self).await
    }

    async fn access_token(&self) -> Option<String> {
        Auth::access_token(self).await
    }
}

/// Bookmark rows over PostgREST, authorized with the signed-in user's token
#[derive(Clone)]
pub struct RestBookmarkStore {
    url: String,
    key: String,
    client: Client,
    auth: Auth,
    table: String,
    owner_column: String,
    schema: String,
}

impl RestBookmarkStore {
    pub fn new(url: &str, key: &str, client: Client, auth: Auth) -> Self {
        Self {
            url: url.to_string(),
            key: key.to_string(),
            client,
            auth,
            table: "bookmarks".to_string(),
            owner_column: "user_id".to_string(),
            schema: "public".to_string(),
        }
    }

    pub fn with_table(mut self, table: &str) -> Self {
        self.table = table.to_string();
        self
    }

    pub fn with_owner_column(mut self, column: &str) -> Self {
        self.owner_column = column.to_string();
        self
    }

    pub fn with_schema(mut self, schema: &str) -> Self {
        self.schema = schema.to_string();
        self
    }

    async fn rest(&self) -> Result<PostgrestClient> {
        let token = self.auth.access_token().await.ok_or(Error::MissingSession)?;
        Ok(PostgrestClient::new(&self.url, &self.key, &self.table, self.client.clone())
            .with_auth(&token)
            .with_schema(&self.schema))
    }

    fn columns(&self) -> String {
        format!("{},{}", COLUMNS, self.owner_column)
    }

    /// Map a row with the configured owner column onto [`Bookmark`]
    fn decode(&self, mut row: Value) -> Result<Bookmark> {
        if self.owner_column != "user_id" {
            if let Some(fields) = row.as_object_mut() {
                if let Some(owner) = fields.remove(&self.owner_column) {
                    fields.insert("user_id".to_string(), owner);
                }
            }
        }
        Ok(serde_json::from_value(row)?)
    }
}

#[async_trait]
impl BookmarkStore for RestBookmarkStore {
    async fn list(&self, owner_id: &str) -> Result<Vec<Bookmark>> {
        let rows: Vec<Value> = self
            .rest()
            .await?
            .select(&self.columns())
            .eq(&self.owner_column, owner_id)
            .order("created_at", Order::Descending)
            .execute()
            .await?;

        debug!(table = %self.table, owner_id, count = rows.len(), "listed bookmarks");
        rows.into_iter().map(|row| self.decode(row)).collect()
    }

    async fn insert(&self, bookmark: &NewBookmark) -> Result<Bookmark> {
        let mut body = Map::new();
        body.insert("title".to_string(), Value::from(bookmark.title.as_str()));
        body.insert("url".to_string(), Value::from(bookmark.url.as_str()));
        body.insert(self.owner_column.clone(), Value::from(bookmark.user_id.as_str()));

        let rows: Vec<Value> = self
            .rest()
            .await?
            .insert(Value::Object(body))
            .execute()
            .await?;

        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| Error::database("insert returned no rows"))?;
        self.decode(row)
    }

    async fn delete(&self, id: &BookmarkId, owner_id: &str) -> Result<bool> {
        let deleted: Vec<Value> = self
            .rest()
            .await?
            .delete()
            .eq("id", id)
            .eq(&self.owner_column, owner_id)
            .execute()
            .await?;

        debug!(table = %self.table, %id, owner_id, rows = deleted.len(), "deleted bookmark");
        Ok(!deleted.is_empty())
    }
}

/// Change feed over the realtime websocket.
///
/// The user's token is handed to the socket before each join so row level
/// security applies to the delivered changes.
#[derive(Clone)]
pub struct RealtimeChangeFeed {
    realtime: RealtimeClient,
    auth: Auth,
    schema: String,
}

impl RealtimeChangeFeed {
    pub fn new(realtime: RealtimeClient, auth: Auth) -> Self {
        Self {
            realtime,
            auth,
            schema: "public".to_string(),
        }
    }

    pub fn with_schema(mut self, schema: &str) -> Self {
        self.schema = schema.to_string();
        self
    }
}

#[async_trait]
impl ChangeFeed for RealtimeChangeFeed {
    async fn subscribe(
        &self,
        filter: &ChangeFilter,
    ) -> Result<(Subscription, mpsc::UnboundedReceiver<RowChange>)> {
        self.realtime.set_auth(self.auth.access_token().await).await;

        let changes = DatabaseChanges::new(&filter.table)
            .schema(&self.schema)
            .eq(&filter.owner_column, &filter.owner_id);
        let name = format!("{}-{}", filter.table, filter.owner_id);
        self.realtime.subscribe(&name, changes).await
    }

    async fn unsubscribe(&self, subscription: &Subscription) -> Result<()> {
        self.realtime.unsubscribe(subscription).await?;
        if self.realtime.channel_count().await == 0 {
            info!("last channel closed, disconnecting realtime");
            self.realtime.disconnect().await?;
        }
        Ok(())
    }
}
