//! Bearer-token authentication middleware
//!
//! Resolves `Authorization: Bearer <token>` to the subject it was issued to
//! and makes it available to handlers as an [`AuthenticatedSubject`]
//! extension. Applied only to routes that require a signed-in caller.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::sync::Arc;

use super::response::ApiError;
use crate::storage::models::TokenScope;
use crate::AppState;

/// The subject behind a validated authentication token
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedSubject(pub u64);

pub async fn require_authentication(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let token = match bearer_token(request.headers()) {
        Some(token) => token,
        None => {
            return ApiError::unauthorized("you must be authenticated to access this resource")
                .into_response();
        }
    };

    match state
        .tokens
        .validate(&token, TokenScope::Authentication)
        .await
    {
        Ok(subject_id) => {
            request
                .extensions_mut()
                .insert(AuthenticatedSubject(subject_id));
            next.run(request).await
        }
        Err(e) if e.is_credential_failure() => {
            // The reason is for operators only; clients always see the same answer
            tracing::debug!(reason = %e, "Rejected authentication token");
            ApiError::unauthorized("invalid or missing authentication token").into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to validate authentication token");
            ApiError::internal("the server encountered an error and could not process your request")
                .into_response()
        }
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(
            bearer_token(&headers("Bearer Y3QMGX3PJ3WLRL2YRTQGQ6KRHU")).as_deref(),
            Some("Y3QMGX3PJ3WLRL2YRTQGQ6KRHU")
        );
        assert_eq!(
            bearer_token(&headers("bearer abc")).as_deref(),
            Some("abc")
        );
        assert_eq!(bearer_token(&headers("Basic abc")), None);
        assert_eq!(bearer_token(&headers("Bearer")), None);
        assert_eq!(bearer_token(&headers("Bearer  ")), None);
        assert_eq!(bearer_token(&HeaderMap::new()), None);
    }
}
