//! Configuration for the backend clients and the bookmark controller

use std::time::Duration;
use url::Url;

use crate::auth::OAuthProvider;
use crate::error::{Error, Result};

/// Project coordinates for the Supabase backend.
///
/// Load these from the environment or a secure config source, never from
/// source code.
#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub url: Url,
    pub anon_key: String,
}

impl SupabaseConfig {
    /// Creates a new configuration, validating the URL and key.
    pub fn new(url_str: &str, anon_key: impl Into<String>) -> Result<Self> {
        let url = Url::parse(url_str)?;
        let anon_key = anon_key.into();
        if anon_key.is_empty() {
            return Err(Error::config("anon_key cannot be empty"));
        }
        Ok(Self { url, anon_key })
    }

    /// Reads `SUPABASE_URL` and `SUPABASE_ANON_KEY`, falling back to the
    /// `NEXT_PUBLIC_` prefixed names used by web front ends.
    pub fn from_env() -> Result<Self> {
        let url_str = env_with_fallback("SUPABASE_URL")?;
        let anon_key = env_with_fallback("SUPABASE_ANON_KEY")?;
        Self::new(&url_str, anon_key)
    }

    /// Base URL without a trailing slash, suitable for path concatenation
    pub fn base_url(&self) -> String {
        self.url.as_str().trim_end_matches('/').to_string()
    }
}

fn env_with_fallback(name: &str) -> Result<String> {
    std::env::var(name)
        .or_else(|_| std::env::var(format!("NEXT_PUBLIC_{}", name)))
        .map_err(|_| Error::config(format!("{} environment variable not found", name)))
}

/// Options shared by the HTTP clients
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Refresh an expired session before using it
    pub auto_refresh_token: bool,

    /// Keep the session returned by sign-in in memory
    pub persist_session: bool,

    /// Timeout applied to every HTTP request
    pub request_timeout: Option<Duration>,

    /// The database schema
    pub db_schema: String,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            auto_refresh_token: true,
            persist_session: true,
            request_timeout: Some(Duration::from_secs(30)),
            db_schema: "public".to_string(),
        }
    }
}

impl ClientOptions {
    /// Set whether to automatically refresh the token
    pub fn with_auto_refresh_token(mut self, value: bool) -> Self {
        self.auto_refresh_token = value;
        self
    }

    /// Set whether to persist the session
    pub fn with_persist_session(mut self, value: bool) -> Self {
        self.persist_session = value;
        self
    }

    /// Set the request timeout
    pub fn with_request_timeout(mut self, value: Option<Duration>) -> Self {
        self.request_timeout = value;
        self
    }

    /// Set the database schema
    pub fn with_db_schema(mut self, value: &str) -> Self {
        self.db_schema = value.to_string();
        self
    }
}

/// How the local list catches up after a successful mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconcileMode {
    /// Patch the list with the row the store returned
    #[default]
    Patch,
    /// Re-fetch the whole list
    Reload,
}

/// Options for the bookmark controller
#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub table: String,
    pub owner_column: String,
    pub reconcile: ReconcileMode,
    /// Window in which change-feed events are coalesced into one reload
    pub refresh_debounce: Duration,
    pub provider: OAuthProvider,
    pub redirect_to: Option<String>,
    pub scopes: Option<String>,
    /// First wait before reopening a change feed that closed on its own
    pub resubscribe_interval: Duration,
    /// Growth of the wait after each failed reopen
    pub resubscribe_backoff_factor: f64,
    pub max_resubscribe_interval: Duration,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            table: "bookmarks".to_string(),
            owner_column: "user_id".to_string(),
            reconcile: ReconcileMode::Patch,
            refresh_debounce: Duration::from_millis(250),
            provider: OAuthProvider::Google,
            redirect_to: None,
            scopes: None,
            resubscribe_interval: Duration::from_secs(1),
            resubscribe_backoff_factor: 1.5,
            max_resubscribe_interval: Duration::from_secs(30),
        }
    }
}

impl SyncOptions {
    pub fn with_table(mut self, value: &str) -> Self {
        self.table = value.to_string();
        self
    }

    pub fn with_owner_column(mut self, value: &str) -> Self {
        self.owner_column = value.to_string();
        self
    }

    pub fn with_reconcile(mut self, value: ReconcileMode) -> Self {
        self.reconcile = value;
        self
    }

    pub fn with_refresh_debounce(mut self, value: Duration) -> Self {
        self.refresh_debounce = value;
        self
    }

    pub fn with_provider(mut self, value: OAuthProvider) -> Self {
        self.provider = value;
        self
    }

    pub fn with_redirect_to(mut self, value: &str) -> Self {
        self.redirect_to = Some(value.to_string());
        self
    }

    pub fn with_scopes(mut self, value: &str) -> Self {
        self.scopes = Some(value.to_string());
        self
    }

    pub fn with_resubscribe_interval(mut self, value: Duration) -> Self {
        self.resubscribe_interval = value;
        self
    }

    /// Wait before the next reopen attempt, given the previous wait
    pub(crate) fn next_resubscribe_delay(&self, previous: Duration) -> Duration {
        previous
            .mul_f64(self.resubscribe_backoff_factor.max(1.0))
            .min(self.max_resubscribe_interval)
    }
}
