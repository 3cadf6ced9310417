//! Bookmark sync client for Supabase
//!
//! Keeps a signed-in user's bookmark list in step with a Supabase project:
//! OAuth sign-in through GoTrue, reads and writes through PostgREST and live
//! updates from the Realtime websocket, all driven by [`BookmarkSync`].
//!
//! [`BookmarkSync`]: bookmarks::BookmarkSync

pub mod auth;
pub mod bookmarks;
pub mod config;
pub mod error;
pub mod fetch;
pub mod memory;
pub mod postgrest;
pub mod realtime;

use reqwest::Client;
use std::sync::Arc;
use tracing::debug;

use crate::auth::Auth;
use crate::bookmarks::{BookmarkSync, RealtimeChangeFeed, RestBookmarkStore};
use crate::config::{ClientOptions, SupabaseConfig, SyncOptions};
use crate::error::Result;
use crate::postgrest::PostgrestClient;
use crate::realtime::RealtimeClient;

/// The main entry point: one project, one HTTP client, one realtime socket
pub struct Supabase {
    /// The base URL for the Supabase project
    pub url: String,
    /// The anonymous API key for the Supabase project
    pub key: String,
    /// HTTP client used for requests
    pub http_client: Client,
    /// Auth client for sign-in and session management
    pub auth: Auth,
    /// Client options
    pub options: ClientOptions,
    realtime: RealtimeClient,
}

impl Supabase {
    /// Create a client with default options
    ///
    /// # Example
    ///
    /// ```
    /// use bookmark_sync::{config::SupabaseConfig, Supabase};
    ///
    /// let config = SupabaseConfig::new("https://your-project-url.supabase.co", "your-anon-key").unwrap();
    /// let supabase = Supabase::new(config).unwrap();
    /// ```
    pub fn new(config: SupabaseConfig) -> Result<Self> {
        Self::new_with_options(config, ClientOptions::default())
    }

    /// Create a client with custom options
    ///
    /// # Example
    ///
    /// ```
    /// use bookmark_sync::{config::{ClientOptions, SupabaseConfig}, Supabase};
    /// use std::time::Duration;
    ///
    /// let config = SupabaseConfig::new("https://your-project-url.supabase.co", "your-anon-key").unwrap();
    /// let options = ClientOptions::default().with_request_timeout(Some(Duration::from_secs(5)));
    /// let supabase = Supabase::new_with_options(config, options).unwrap();
    /// ```
    pub fn new_with_options(config: SupabaseConfig, options: ClientOptions) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = options.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http_client = builder.build()?;

        let url = config.base_url();
        let key = config.anon_key;
        debug!(%url, "creating supabase client");

        let auth = Auth::new(&url, &key, http_client.clone(), options.clone());
        let realtime = RealtimeClient::new(&url, &key);

        Ok(Self {
            url,
            key,
            http_client,
            auth,
            options,
            realtime,
        })
    }

    /// Create a client from `SUPABASE_URL` and `SUPABASE_ANON_KEY`
    pub fn from_env() -> Result<Self> {
        Self::new(SupabaseConfig::from_env()?)
    }

    /// The auth client for sign-in and session management
    pub fn auth(&self) -> &Auth {
        &self.auth
    }

    /// Create a PostgrestClient for one table, authorized with the anon key
    ///
    /// # Example
    ///
    /// ```
    /// use bookmark_sync::{config::SupabaseConfig, Supabase};
    ///
    /// let config = SupabaseConfig::new("https://your-project-url.supabase.co", "your-anon-key").unwrap();
    /// let supabase = Supabase::new(config).unwrap();
    /// let bookmarks = supabase.from("bookmarks");
    /// assert!(bookmarks.url().ends_with("/rest/v1/bookmarks"));
    /// ```
    pub fn from(&self, table: &str) -> PostgrestClient {
        PostgrestClient::new(&self.url, &self.key, table, self.http_client.clone())
            .with_schema(&self.options.db_schema)
    }

    /// The shared realtime client
    pub fn realtime(&self) -> &RealtimeClient {
        &self.realtime
    }

    /// Build a bookmark controller backed by this project.
    ///
    /// # Example
    ///
    /// ```
    /// use bookmark_sync::{config::{SupabaseConfig, SyncOptions}, Supabase};
    ///
    /// let config = SupabaseConfig::new("https://your-project-url.supabase.co", "your-anon-key").unwrap();
    /// let supabase = Supabase::new(config).unwrap();
    /// let sync = supabase.bookmarks(SyncOptions::default().with_redirect_to("http://localhost:3000"));
    /// assert!(!sync.snapshot().is_authenticated());
    /// ```
    pub fn bookmarks(&self, options: SyncOptions) -> BookmarkSync {
        let store = RestBookmarkStore::new(&self.url, &self.key, self.http_client.clone(), self.auth.clone())
            .with_table(&options.table)
            .with_owner_column(&options.owner_column)
            .with_schema(&self.options.db_schema);
        let feed = RealtimeChangeFeed::new(self.realtime.clone(), self.auth.clone())
            .with_schema(&self.options.db_schema);

        BookmarkSync::new(Arc::new(self.auth.clone()), Arc::new(store), Arc::new(feed), options)
    }
}

/// A convenience module for common imports
pub mod prelude {
    pub use crate::bookmarks::{Bookmark, BookmarkId, BookmarkSync, MutationStatus, SessionPhase, SyncSnapshot};
    pub use crate::config::{ClientOptions, ReconcileMode, SupabaseConfig, SyncOptions};
    pub use crate::error::{Error, Result};
    pub use crate::Supabase;
}
