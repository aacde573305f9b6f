//! Bearer-token guard for the address endpoints

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::warn;

/// Token every protected request must present
#[derive(Clone)]
pub struct BearerToken(Arc<str>);

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Arc::from(token.into()))
    }

    fn matches(&self, presented: &str) -> bool {
        !self.0.is_empty() && *self.0 == *presented
    }
}

/// Extract bearer token from headers
fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

fn unauthorized() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "Unauthorized" })),
    )
        .into_response()
}

/// Reject requests without the configured bearer token
pub async fn require_bearer(
    State(token): State<BearerToken>,
    request: Request,
    next: Next,
) -> Response {
    match extract_bearer_token(request.headers()) {
        Some(presented) if token.matches(presented) => next.run(request).await,
        _ => {
            warn!(path = %request.uri().path(), "Rejected unauthorized request");
            unauthorized()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value.parse().unwrap());
        headers
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(extract_bearer_token(&headers("Bearer abc")), Some("abc"));
        assert_eq!(extract_bearer_token(&headers("Basic abc")), None);
        assert_eq!(extract_bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn test_empty_token_never_matches() {
        assert!(!BearerToken::new("").matches(""));
        assert!(BearerToken::new("abc").matches("abc"));
        assert!(!BearerToken::new("abc").matches("abcd"));
    }
}
