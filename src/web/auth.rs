//! Authorization gate for the `/api` routes.
//!
//! Handlers take an `Authorized` argument; extraction fails with 401/403
//! before the handler body, and so before any core operation, runs.

use axum::Json;
use axum::extract::FromRequestParts;
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use std::collections::HashSet;
use tracing::warn;

use super::{ErrorBody, WebState};

/// Decides whether a bearer token may use the panel.
pub trait Authorizer: Send + Sync {
    /// `None` when the request carried no token.
    fn authorize(&self, token: Option<&str>) -> AuthDecision;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    Allow,
    /// No credentials presented
    Unauthenticated,
    /// Credentials presented but not accepted
    Forbidden,
}

/// Accepts a fixed set of bearer tokens. An empty set admits everyone.
pub struct TokenAuthorizer {
    tokens: HashSet<String>,
}

impl TokenAuthorizer {
    pub fn new(tokens: impl IntoIterator<Item = String>) -> Self {
        Self {
            tokens: tokens.into_iter().filter(|t| !t.is_empty()).collect(),
        }
    }

    pub fn is_open(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl Authorizer for TokenAuthorizer {
    fn authorize(&self, token: Option<&str>) -> AuthDecision {
        if self.is_open() {
            return AuthDecision::Allow;
        }
        match token {
            None => AuthDecision::Unauthenticated,
            Some(token) if self.tokens.contains(token) => AuthDecision::Allow,
            Some(_) => AuthDecision::Forbidden,
        }
    }
}

/// Proof that the request passed the authorization gate.
#[derive(Debug, Clone, Copy)]
pub struct Authorized;

impl FromRequestParts<WebState> for Authorized {
    type Rejection = (StatusCode, Json<ErrorBody>);

    async fn from_request_parts(
        parts: &mut Parts,
        state: &WebState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim);

        match state.authorizer.authorize(token) {
            AuthDecision::Allow => Ok(Authorized),
            AuthDecision::Unauthenticated => Err((
                StatusCode::UNAUTHORIZED,
                Json(ErrorBody::new("Missing Authorization header")),
            )),
            AuthDecision::Forbidden => {
                warn!(path = %parts.uri.path(), "Rejected request with unknown token");
                Err((StatusCode::FORBIDDEN, Json(ErrorBody::new("Unauthorized"))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_token_list_is_open() {
        let auth = TokenAuthorizer::new(Vec::new());
        assert_eq!(auth.authorize(None), AuthDecision::Allow);
        assert_eq!(auth.authorize(Some("anything")), AuthDecision::Allow);
    }

    #[test]
    fn test_token_list_gates_access() {
        let auth = TokenAuthorizer::new(vec!["s3cret".to_string()]);
        assert_eq!(auth.authorize(None), AuthDecision::Unauthenticated);
        assert_eq!(auth.authorize(Some("wrong")), AuthDecision::Forbidden);
        assert_eq!(auth.authorize(Some("s3cret")), AuthDecision::Allow);
    }
}
