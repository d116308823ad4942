//! Caller authentication.
//!
//! Bearer tokens are resolved to a [`Principal`] by a pluggable
//! [`Authenticator`]. Token cryptography is out of scope here; the shipped
//! implementations are a static token table and a development bypass.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{header::AUTHORIZATION, HeaderMap};
use serde::Serialize;

use crate::config::schema::AuthConfig;

/// An authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub subject: String,
    pub scopes: BTreeSet<String>,
}

impl Principal {
    pub fn new<I, S>(subject: impl Into<String>, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            subject: subject.into(),
            scopes: scopes.into_iter().map(Into::into).collect(),
        }
    }

    /// Whether every scope in `required` was granted.
    pub fn has_scopes(&self, required: &[String]) -> bool {
        required.iter().all(|scope| self.scopes.contains(scope))
    }
}

/// Authentication failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Missing bearer token")]
    MissingToken,

    #[error("Invalid token")]
    InvalidToken,
}

/// Resolves request headers to a principal.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, headers: &HeaderMap) -> Result<Principal, AuthError>;
}

/// Extract the token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// A fixed token → principal table.
#[derive(Debug, Default)]
pub struct StaticTokenAuthenticator {
    tokens: HashMap<String, Principal>,
}

impl StaticTokenAuthenticator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(mut self, token: impl Into<String>, principal: Principal) -> Self {
        self.tokens.insert(token.into(), principal);
        self
    }
}

#[async_trait]
impl Authenticator for StaticTokenAuthenticator {
    async fn authenticate(&self, headers: &HeaderMap) -> Result<Principal, AuthError> {
        let token = bearer_token(headers).ok_or(AuthError::MissingToken)?;
        self.tokens.get(token).cloned().ok_or(AuthError::InvalidToken)
    }
}

/// Accepts every caller with a fixed scope set. Local development only.
#[derive(Debug, Clone)]
pub struct BypassAuthenticator {
    principal: Principal,
}

impl BypassAuthenticator {
    pub fn new<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            principal: Principal::new("local-dev", scopes),
        }
    }
}

#[async_trait]
impl Authenticator for BypassAuthenticator {
    async fn authenticate(&self, _headers: &HeaderMap) -> Result<Principal, AuthError> {
        Ok(self.principal.clone())
    }
}

/// Build the authenticator selected by `config`.
pub fn authenticator_from_config(config: &AuthConfig) -> Arc<dyn Authenticator> {
    if config.bypass {
        tracing::warn!("Authentication bypass enabled; every caller is trusted");
        return Arc::new(BypassAuthenticator::new(config.bypass_scopes.iter().cloned()));
    }

    let authenticator = config
        .tokens
        .iter()
        .fold(StaticTokenAuthenticator::new(), |auth, grant| {
            let subject = if grant.subject.is_empty() {
                "anonymous".to_string()
            } else {
                grant.subject.clone()
            };
            auth.with_token(grant.token.clone(), Principal::new(subject, grant.scopes.iter().cloned()))
        });
    Arc::new(authenticator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::TokenGrant;
    use axum::http::HeaderValue;

    fn headers(auth: Option<&str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(value) = auth {
            headers.insert(AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        }
        headers
    }

    #[tokio::test]
    async fn test_static_tokens() {
        let auth = StaticTokenAuthenticator::new()
            .with_token("t1", Principal::new("agent", ["case:write"]));

        let principal = auth.authenticate(&headers(Some("Bearer t1"))).await.unwrap();
        assert_eq!(principal.subject, "agent");

        assert_eq!(auth.authenticate(&headers(None)).await, Err(AuthError::MissingToken));
        assert_eq!(auth.authenticate(&headers(Some("Basic t1"))).await, Err(AuthError::MissingToken));
        assert_eq!(auth.authenticate(&headers(Some("Bearer nope"))).await, Err(AuthError::InvalidToken));
    }

    #[test]
    fn test_scope_superset() {
        let principal = Principal::new("a", ["customer:read", "case:write"]);
        assert!(principal.has_scopes(&[]));
        assert!(principal.has_scopes(&["case:write".to_string()]));
        assert!(!principal.has_scopes(&["case:write".to_string(), "note:write".to_string()]));
    }

    #[tokio::test]
    async fn test_from_config() {
        let mut config = AuthConfig::default();
        config.tokens.push(TokenGrant {
            token: "secret".into(),
            subject: String::new(),
            scopes: vec!["customer:read".into()],
        });
        let auth = authenticator_from_config(&config);
        let principal = auth.authenticate(&headers(Some("Bearer secret"))).await.unwrap();
        assert_eq!(principal.subject, "anonymous");

        config.bypass = true;
        let auth = authenticator_from_config(&config);
        let principal = auth.authenticate(&headers(None)).await.unwrap();
        assert!(principal.has_scopes(&["note:write".to_string()]));
    }
}
