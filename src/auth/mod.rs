//! Authentication and session management against the GoTrue API

mod session;
mod types;

use reqwest::Client;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::ClientOptions;
use crate::error::{Error, Result};
use crate::fetch::Fetch;

pub use session::*;
pub use types::*;

/// Client for Supabase Authentication
#[derive(Clone)]
pub struct Auth {
    /// The base URL for the Supabase project
    url: String,

    /// The anonymous API key for the Supabase project
    key: String,

    /// HTTP client used for requests
    client: Client,

    /// The current session
    session: Arc<RwLock<Option<Session>>>,

    /// Client options
    options: ClientOptions,
}

impl Auth {
    /// Create a new Auth client
    pub fn new(url: &str, key: &str, client: Client, options: ClientOptions) -> Self {
        Self {
            url: url.trim_end_matches('/').to_string(),
            key: key.to_string(),
            client,
            session: Arc::new(RwLock::new(None)),
            options,
        }
    }

    fn get_auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1{}", self.url, path)
    }

    /// The anon key, used as bearer token when no session is held
    pub fn anon_key(&self) -> &str {
        &self.key
    }

    /// Build the URL that starts the OAuth redirect flow
    pub fn get_oauth_sign_in_url(
        &self,
        provider: OAuthProvider,
        options: Option<OAuthSignInOptions>,
    ) -> String {
        let options = options.unwrap_or_default();

        let mut url = self.get_auth_url(&format!("/authorize?provider={}", provider.as_str()));

        if let Some(redirect_to) = options.redirect_to {
            url.push_str(&format!("&redirect_to={}", urlencoding::encode(&redirect_to)));
        }

        if let Some(scopes) = options.scopes {
            url.push_str(&format!("&scopes={}", urlencoding::encode(&scopes)));
        }

        url
    }

    /// Start an OAuth sign-in.
    ///
    /// Returns the authorize URL; opening it is up to the caller. The session
    /// only exists once the provider redirects back and the callback is
    /// passed to [`Auth::session_from_callback`].
    pub fn sign_in_with_oauth(
        &self,
        provider: OAuthProvider,
        options: Option<OAuthSignInOptions>,
    ) -> String {
        let url = self.get_oauth_sign_in_url(provider, options);
        info!(provider = provider.as_str(), "starting OAuth sign-in");
        url
    }

    /// Exchange an authorization code for a session
    pub async fn exchange_code_for_session(&self, code: &str) -> Result<Session> {
        let url = self.get_auth_url("/token?grant_type=authorization_code");

        let session = Fetch::post(&self.client, &url)
            .header("apikey", &self.key)
            .map_status_error(Error::Auth)
            .json(&serde_json::json!({ "code": code }))?
            .execute::<Session>()
            .await?
            .stamped();

        self.store_session(session.clone()).await;
        Ok(session)
    }

    /// Complete a sign-in from whatever the redirect delivered
    pub async fn session_from_callback(&self, callback: &str) -> Result<Session> {
        match AuthCallback::parse(callback)? {
            AuthCallback::Code(code) => self.exchange_code_for_session(&code).await,
            AuthCallback::Tokens(tokens) => {
                let user = self.fetch_user(&tokens.access_token).await?;
                let mut session = Session::new(
                    tokens.access_token,
                    tokens.refresh_token,
                    tokens.expires_in,
                    user,
                );
                session.token_type = tokens.token_type;
                self.store_session(session.clone()).await;
                Ok(session)
            }
        }
    }

    /// Get the user data for the currently authenticated user
    pub async fn get_user(&self) -> Result<User> {
        let token = self.current_token().await?;
        self.fetch_user(&token).await
    }

    async fn fetch_user(&self, token: &str) -> Result<User> {
        let url = self.get_auth_url("/user");

        Fetch::get(&self.client, &url)
            .header("apikey", &self.key)
            .bearer_auth(token)
            .map_status_error(Error::Auth)
            .execute::<User>()
            .await
    }

    /// Trade the refresh token for a new session
    pub async fn refresh_session(&self) -> Result<Session> {
        let refresh_token = {
            let guard = self.session.read().await;
            guard
                .as_ref()
                .map(|s| s.refresh_token.clone())
                .ok_or(Error::MissingSession)?
        };

        let url = self.get_auth_url("/token?grant_type=refresh_token");

        let session = Fetch::post(&self.client, &url)
            .header("apikey", &self.key)
            .map_status_error(Error::Auth)
            .json(&serde_json::json!({ "refresh_token": refresh_token }))?
            .execute::<Session>()
            .await?
            .stamped();

        debug!(user_id = %session.user.id, "session refreshed");
        self.store_session(session.clone()).await;
        Ok(session)
    }

    /// Resolve the active user, refreshing an expired session first.
    ///
    /// Returns `Ok(None)` when no session is held.
    pub async fn current_user(&self) -> Result<Option<User>> {
        let expired = match self.session.read().await.as_ref() {
            Some(session) => session.is_expired(),
            None => return Ok(None),
        };

        if expired {
            if !self.options.auto_refresh_token {
                warn!("session expired and auto refresh is disabled");
                self.clear_session().await;
                return Ok(None);
            }
            self.refresh_session().await?;
        }

        self.get_user().await.map(Some)
    }

    /// Sign out the current user.
    ///
    /// The local session is cleared even when the logout request fails.
    pub async fn sign_out(&self) -> Result<()> {
        let session = self.session.write().await.take();
        let session = match session {
            Some(session) => session,
            None => return Ok(()),
        };

        let url = self.get_auth_url("/logout");

        Fetch::post(&self.client, &url)
            .header("apikey", &self.key)
            .bearer_auth(&session.access_token)
            .map_status_error(Error::Auth)
            .execute_checked()
            .await?;

        info!(user_id = %session.user.id, "signed out");
        Ok(())
    }

    /// Get the current session
    pub async fn get_session(&self) -> Option<Session> {
        self.session.read().await.clone()
    }

    /// Set the session
    pub async fn set_session(&self, session: Session) {
        *self.session.write().await = Some(session.stamped());
    }

    async fn clear_session(&self) {
        *self.session.write().await = None;
    }

    async fn store_session(&self, session: Session) {
        if self.options.persist_session {
            *self.session.write().await = Some(session);
        }
    }

    async fn current_token(&self) -> Result<String> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.access_token.clone())
            .ok_or(Error::MissingSession)
    }

    /// The access token of the current session, if any
    pub async fn access_token(&self) -> Option<String> {
        self.current_token().await.ok()
    }
}
