use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::SERVER_ERROR_MESSAGE;
use crate::api::middleware::AuthenticatedSubject;
use crate::api::response::{ApiError, AppJson, JSend};
use crate::storage::models::TokenScope;
use crate::tokens::TokenError;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubjectRequest {
    pub subject_id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TokenRequest {
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActivationPendingResponse {
    pub expiry: DateTime<Utc>,
    pub message: String,
    pub subject_id: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AuthenticationTokenResponse {
    pub expiry: DateTime<Utc>,
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActivatedResponse {
    pub authentication_token: AuthenticationTokenResponse,
    pub revoked: usize,
    pub subject_id: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RevokedResponse {
    pub revoked: usize,
}

fn token_error(e: TokenError) -> ApiError {
    tracing::error!(error = %e, "Token operation failed");
    ApiError::internal(SERVER_ERROR_MESSAGE)
}

/// POST /v1/tokens/activation
///
/// Delivery runs on the supervisor so the response never waits on the mailer,
/// and shutdown still waits for it.
pub async fn create_activation_token(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<SubjectRequest>,
) -> Result<(StatusCode, Json<JSend<ActivationPendingResponse>>), ApiError> {
    let token = state
        .tokens
        .mint(
            req.subject_id,
            state.config.tokens.activation_ttl(),
            TokenScope::Activation,
        )
        .await
        .map_err(token_error)?;

    let expiry = token.expiry;
    let mailer = Arc::clone(&state.mailer);
    state.tasks.spawn("activation-mail", async move {
        if let Err(e) = mailer.send_activation(&token).await {
            tracing::error!(
                subject_id = token.subject_id,
                fingerprint = %token.fingerprint(),
                error = %e,
                "Failed to deliver activation token"
            );
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        JSend::success(ActivationPendingResponse {
            expiry,
            message: "an email will be sent to you containing activation instructions"
                .to_string(),
            subject_id: req.subject_id,
        }),
    ))
}

async fn mint_authentication(
    state: &AppState,
    subject_id: u64,
) -> Result<AuthenticationTokenResponse, ApiError> {
    let token = state
        .tokens
        .mint(
            subject_id,
            state.config.tokens.authentication_ttl(),
            TokenScope::Authentication,
        )
        .await
        .map_err(token_error)?;

    Ok(AuthenticationTokenResponse {
        expiry: token.expiry,
        token: token.plaintext,
    })
}

/// PUT /v1/tokens/activation
///
/// Redeems the activation token (and every sibling of it) and signs the
/// subject in. Replaying the same token fails like any unknown token.
pub async fn activate(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<TokenRequest>,
) -> Result<(StatusCode, Json<JSend<ActivatedResponse>>), ApiError> {
    let redeemed = match state
        .tokens
        .consume(&req.token, TokenScope::Activation)
        .await
    {
        Ok(redeemed) => redeemed,
        Err(e) if e.is_credential_failure() => {
            tracing::debug!(reason = %e, "Rejected activation token");
            return Err(ApiError::unprocessable("invalid or expired activation token"));
        }
        Err(e) => return Err(token_error(e)),
    };

    let authentication_token = mint_authentication(&state, redeemed.subject_id).await?;

    tracing::info!(subject_id = redeemed.subject_id, "Subject activated");
    Ok((
        StatusCode::CREATED,
        JSend::success(ActivatedResponse {
            authentication_token,
            revoked: redeemed.revoked,
            subject_id: redeemed.subject_id,
        }),
    ))
}

/// POST /v1/tokens/authentication
///
/// Issues a fresh authentication token to an already authenticated subject.
pub async fn create_authentication_token(
    State(state): State<Arc<AppState>>,
    Extension(subject): Extension<AuthenticatedSubject>,
) -> Result<(StatusCode, Json<JSend<AuthenticationTokenResponse>>), ApiError> {
    let token = mint_authentication(&state, subject.0).await?;
    Ok((StatusCode::CREATED, JSend::success(token)))
}

/// DELETE /v1/tokens/authentication
pub async fn revoke_authentication_tokens(
    State(state): State<Arc<AppState>>,
    Extension(subject): Extension<AuthenticatedSubject>,
) -> Result<Json<JSend<RevokedResponse>>, ApiError> {
    let revoked = state
        .tokens
        .revoke_all(subject.0, TokenScope::Authentication)
        .await
        .map_err(token_error)?;

    Ok(JSend::success(RevokedResponse { revoked }))
}
