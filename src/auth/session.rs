//! Session management for authentication

use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use url::Url;

use super::types::{Claims, User};
use crate::error::{Error, Result};

/// Session data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// The access token
    pub access_token: String,

    /// The refresh token
    pub refresh_token: String,

    /// The token type
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// The lifetime in seconds
    pub expires_in: i64,

    /// The expiry timestamp
    #[serde(default)]
    pub expires_at: Option<i64>,

    /// The signed-in user
    pub user: User,
}

fn default_token_type() -> String {
    "bearer".to_string()
}

impl Session {
    /// Create a new session that expires `expires_in` seconds from now
    pub fn new(access_token: String, refresh_token: String, expires_in: i64, user: User) -> Self {
        Self {
            access_token,
            refresh_token,
            token_type: default_token_type(),
            expires_in,
            expires_at: Some(Utc::now().timestamp() + expires_in),
            user,
        }
    }

    /// Fill in `expires_at` from `expires_in` when the server omitted it
    pub(crate) fn stamped(mut self) -> Self {
        if self.expires_at.is_none() {
            self.expires_at = Some(Utc::now().timestamp() + self.expires_in);
        }
        self
    }

    /// Check if the session has expired
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(expires_at) => Utc::now().timestamp() >= expires_at,
            None => false,
        }
    }

    /// Decode the access token claims.
    ///
    /// The signature is not checked here; the backend verifies it on every
    /// request.
    pub fn claims(&self) -> Result<Claims> {
        decode_claims(&self.access_token)
    }
}

pub(crate) fn decode_claims(token: &str) -> Result<Claims> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)?;
    Ok(data.claims)
}

/// Tokens carried in an implicit-flow redirect fragment
#[derive(Debug, Clone, PartialEq)]
pub struct RedirectTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub token_type: String,
}

/// What the provider handed back on the redirect
#[derive(Debug, Clone, PartialEq)]
pub enum AuthCallback {
    /// Authorization code to exchange at the token endpoint
    Code(String),
    /// Tokens delivered directly in the URL fragment
    Tokens(RedirectTokens),
}

impl AuthCallback {
    /// Parse a redirect URL, or treat the input as a bare authorization code.
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(Error::auth("empty sign-in callback"));
        }

        let url = match Url::parse(input) {
            Ok(url) => url,
            Err(_) => return Ok(AuthCallback::Code(input.to_string())),
        };

        let query: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let fragment: Vec<(String, String)> = url
            .fragment()
            .map(|f| url::form_urlencoded::parse(f.as_bytes()).into_owned().collect())
            .unwrap_or_default();

        let lookup = |key: &str| {
            fragment
                .iter()
                .chain(query.iter())
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        };

        if let Some(description) = lookup("error_description").or_else(|| lookup("error")) {
            return Err(Error::auth(description));
        }

        if let Some(access_token) = lookup("access_token") {
            let refresh_token = lookup("refresh_token")
                .ok_or_else(|| Error::auth("redirect is missing refresh_token"))?;
            let expires_in = lookup("expires_in")
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(3600);
            let token_type = lookup("token_type").unwrap_or_else(default_token_type);
            return Ok(AuthCallback::Tokens(RedirectTokens {
                access_token,
                refresh_token,
                expires_in,
                token_type,
            }));
        }

        match lookup("code") {
            Some(code) => Ok(AuthCallback::Code(code)),
            None => Err(Error::auth("redirect carries neither a code nor tokens")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    #[test]
    fn new_session_is_not_expired() {
        let session = Session::new("a".into(), "r".into(), 3600, User::new("u1", None));
        assert!(!session.is_expired());

        let mut expired = session.clone();
        expired.expires_at = Some(Utc::now().timestamp() - 10);
        assert!(expired.is_expired());
    }

    #[test]
    fn claims_are_read_without_signature_check() {
        let claims = Claims {
            sub: "u1".into(),
            exp: 2_000_000_000,
            email: Some("u1@example.com".into()),
            role: Some("authenticated".into()),
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(b"server-secret")).unwrap();
        let session = Session::new(token, "r".into(), 3600, User::new("u1", None));

        assert_eq!(session.claims().unwrap(), claims);
    }

    #[test]
    fn parse_bare_code() {
        assert_eq!(AuthCallback::parse("abc123").unwrap(), AuthCallback::Code("abc123".into()));
    }

    #[test]
    fn parse_code_from_query() {
        let callback = AuthCallback::parse("http://localhost:3000/?code=xyz").unwrap();
        assert_eq!(callback, AuthCallback::Code("xyz".into()));
    }

    #[test]
    fn parse_tokens_from_fragment() {
        let callback = AuthCallback::parse(
            "http://localhost:3000/#access_token=at&expires_in=60&refresh_token=rt&token_type=bearer",
        )
        .unwrap();
        assert_eq!(
            callback,
            AuthCallback::Tokens(RedirectTokens {
                access_token: "at".into(),
                refresh_token: "rt".into(),
                expires_in: 60,
                token_type: "bearer".into(),
            })
        );
    }

    #[test]
    fn parse_provider_error() {
        let err = AuthCallback::parse("http://localhost:3000/?error=access_denied&error_description=denied+by+user")
            .unwrap_err();
        match err {
            Error::Auth(msg) => assert_eq!(msg, "denied by user"),
            other => panic!("Expected Auth error, got {:?}", other),
        }
    }
}
