//! Types for authentication and user management

use serde::{Deserialize, Serialize};

/// User data as returned by `GET /auth/v1/user`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// The user ID, used as the owner id of every bookmark
    pub id: String,

    /// The user's email address
    #[serde(default)]
    pub email: Option<String>,

    /// The user's phone number
    #[serde(default)]
    pub phone: Option<String>,

    /// The user's role
    #[serde(default)]
    pub role: Option<String>,

    /// The app metadata
    #[serde(default)]
    pub app_metadata: serde_json::Value,

    /// The user metadata
    #[serde(default)]
    pub user_metadata: serde_json::Value,

    /// The creation time
    #[serde(default)]
    pub created_at: Option<String>,

    /// The update time
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl User {
    /// Minimal user carrying only the fields the bookmark controller reads
    pub fn new(id: impl Into<String>, email: Option<&str>) -> Self {
        Self {
            id: id.into(),
            email: email.map(str::to_string),
            ..Default::default()
        }
    }
}

/// OAuth providers supported by the authorize endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OAuthProvider {
    Google,
    Github,
    Gitlab,
    Apple,
    Discord,
    Azure,
}

impl OAuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Google => "google",
            Self::Github => "github",
            Self::Gitlab => "gitlab",
            Self::Apple => "apple",
            Self::Discord => "discord",
            Self::Azure => "azure",
        }
    }
}

/// Options for the OAuth authorize redirect
#[derive(Debug, Clone, Default, Serialize)]
pub struct OAuthSignInOptions {
    pub redirect_to: Option<String>,
    pub scopes: Option<String>,
}

/// Claims read from a GoTrue access token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject, the user id
    pub sub: String,

    /// Expiry as a unix timestamp
    pub exp: i64,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub role: Option<String>,
}
