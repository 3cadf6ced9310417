//! Error handling for the bookmark sync client

use std::fmt;
use thiserror::Error;

/// Unified error type for the bookmark sync client
#[derive(Error, Debug)]
pub enum Error {
    /// Network or HTTP related errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization or deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing errors
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// JWT errors
    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    /// WebSocket transport errors
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Authentication errors reported by the identity provider
    #[error("Authentication error: {0}")]
    Auth(String),

    /// No session is held by the auth client
    #[error("Missing session")]
    MissingSession,

    /// Database query errors
    #[error("Database error: {0}")]
    Database(String),

    /// Realtime subscription errors
    #[error("Realtime error: {0}")]
    Realtime(String),

    /// A header value that cannot be sent, named by header
    #[error("Invalid value for header {0}")]
    InvalidHeader(String),

    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// A command that needs a signed-in user was issued while anonymous
    #[error("Not authenticated")]
    NotAuthenticated,

    /// The same mutation is already pending
    #[error("Mutation already in flight: {0}")]
    MutationInFlight(String),

    /// The targeted row does not exist for the current owner
    #[error("Not found: {0}")]
    NotFound(String),

    /// A remote call did not complete in time
    #[error("Operation timed out")]
    Timeout,
}

impl Error {
    /// Create a new authentication error
    pub fn auth<T: fmt::Display>(msg: T) -> Self {
        Error::Auth(msg.to_string())
    }

    /// Create a new database error
    pub fn database<T: fmt::Display>(msg: T) -> Self {
        Error::Database(msg.to_string())
    }

    /// Create a new realtime error
    pub fn realtime<T: fmt::Display>(msg: T) -> Self {
        Error::Realtime(msg.to_string())
    }

    /// Create a new configuration error
    pub fn config<T: fmt::Display>(msg: T) -> Self {
        Error::Config(msg.to_string())
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;
