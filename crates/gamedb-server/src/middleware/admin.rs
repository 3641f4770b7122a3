//! Administrator identification
//!
//! Handlers take a [`Caller`] and ask it for an [`AdminCapability`] before
//! doing anything with side effects. Commands that mutate state require the
//! capability as an argument, so they cannot be reached without the check.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts, HeaderMap},
};
use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;
use thiserror::Error;

/// Decides whether a request comes from an administrator
pub trait Authorizer: Send + Sync {
    fn is_admin(&self, headers: &HeaderMap) -> bool;
}

/// Accepts `Authorization: Bearer <token>` for a fixed set of tokens
pub struct TokenAuthorizer {
    tokens: HashSet<String>,
}

impl TokenAuthorizer {
    pub fn new<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            tokens: tokens
                .into_iter()
                .map(Into::into)
                .filter(|t: &String| !t.is_empty())
                .collect(),
        }
    }
}

impl std::fmt::Debug for TokenAuthorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenAuthorizer")
            .field("tokens", &self.tokens.len())
            .finish()
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then(|| token.trim())
        .filter(|t| !t.is_empty())
}

impl Authorizer for TokenAuthorizer {
    fn is_admin(&self, headers: &HeaderMap) -> bool {
        bearer_token(headers).is_some_and(|token| self.tokens.contains(token))
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct Unauthorized(pub String);

/// Proof that the current request was made by an administrator
#[derive(Debug)]
pub struct AdminCapability {
    _private: (),
}

#[cfg(test)]
impl AdminCapability {
    pub(crate) fn for_tests() -> Self {
        Self { _private: () }
    }
}

/// Who is calling. Extraction never fails; non-admins are rejected by
/// [`Caller::require_admin`].
#[derive(Debug, Clone, Copy)]
pub struct Caller {
    is_admin: bool,
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        self.is_admin
    }

    /// `message` is returned to non-admin callers
    pub fn require_admin(&self, message: &str) -> Result<AdminCapability, Unauthorized> {
        if self.is_admin {
            Ok(AdminCapability { _private: () })
        } else {
            Err(Unauthorized(message.to_string()))
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Caller
where
    Arc<dyn Authorizer>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let authorizer = Arc::<dyn Authorizer>::from_ref(state);
        let is_admin = authorizer.is_admin(&parts.headers);
        if !is_admin {
            tracing::debug!(path = %parts.uri.path(), "Request from non-admin caller");
        }
        Ok(Caller { is_admin })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(auth: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(auth).unwrap());
        headers
    }

    #[test]
    fn test_token_authorizer() {
        let authorizer = TokenAuthorizer::new(["s3cret", ""]);
        assert!(authorizer.is_admin(&headers("Bearer s3cret")));
        assert!(authorizer.is_admin(&headers("bearer  s3cret ")));
        assert!(!authorizer.is_admin(&headers("Bearer wrong")));
        assert!(!authorizer.is_admin(&headers("Basic s3cret")));
        assert!(!authorizer.is_admin(&headers("Bearer ")));
        assert!(!authorizer.is_admin(&HeaderMap::new()));
    }

    #[test]
    fn test_require_admin() {
        let caller = Caller { is_admin: false };
        let err = caller
            .require_admin("You are not allowed to import games.")
            .unwrap_err();
        assert_eq!(err.to_string(), "You are not allowed to import games.");

        assert!(Caller { is_admin: true }.require_admin("nope").is_ok());
    }

    #[test]
    fn test_debug_does_not_leak_tokens() {
        let rendered = format!("{:?}", TokenAuthorizer::new(["s3cret"]));
        assert!(!rendered.contains("s3cret"));
    }
}
