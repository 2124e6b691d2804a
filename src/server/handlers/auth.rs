// src/server/handlers/auth.rs

//! Authentication endpoints

use super::{bearer, ApiError};
use crate::server::{auth, AppState};
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct ExchangeRequest {
    pub provider: String,
    pub code: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub id_token: String,
    pub refresh_token: String,
    pub refresh_token_exp: DateTime<Utc>,
}

/// POST /auth - exchange a third-party OAuth code for a session.
pub async fn exchange(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ExchangeRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let identity = auth::exchange_oauth_code(&state.config, &request.provider, &request.code).await?;
    let user = state.db.upsert_user(&identity.email)?;
    info!("user {} logged in via {}", user.pseudo, request.provider);

    let id_token = auth::issue_id_token(&state.config.jwt_secret, &user)?;
    let (refresh_token, refresh_token_exp) = auth::issue_refresh_token(&state.db, &user)?;
    Ok(Json(TokenResponse {
        id_token,
        refresh_token,
        refresh_token_exp,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RotateRequest {
    pub refresh_token: String,
}

/// POST /auth/token - rotate a refresh token.
///
/// Rotation and reuse revocation both happen inside the database
/// transaction; a reused token answers 403 after burning the user's whole
/// refresh-token set.
pub async fn rotate(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RotateRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    let new_token = auth::random_token();
    let expires = Utc::now() + chrono::Duration::days(auth::REFRESH_TOKEN_TTL_DAYS);
    let user = state
        .db
        .rotate_refresh_token(&request.refresh_token, &new_token, expires)?;
    let id_token = auth::issue_id_token(&state.config.jwt_secret, &user)?;
    Ok(Json(TokenResponse {
        id_token,
        refresh_token: new_token,
        refresh_token_exp: expires,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CliTokenEntry {
    pub id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub created: DateTime<Utc>,
    /// Only present in the creation response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// GET /auth/cli-tokens - list, token values elided.
pub async fn list_cli_tokens(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<CliTokenEntry>>, ApiError> {
    let user = auth::authenticate(&state.db, &state.config.jwt_secret, bearer(&headers)?)?;
    let tokens = state.db.list_cli_tokens(user.id)?;
    Ok(Json(
        tokens
            .into_iter()
            .map(|t| CliTokenEntry {
                id: t.id,
                label: t.label,
                created: t.created_at,
                token: None,
            })
            .collect(),
    ))
}

#[derive(Debug, Default, Deserialize)]
pub struct CreateCliTokenRequest {
    pub label: Option<String>,
}

/// POST /auth/cli-tokens - the only moment the token value is revealed.
pub async fn create_cli_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CreateCliTokenRequest>,
) -> Result<Json<CliTokenEntry>, ApiError> {
    let user = auth::authenticate(&state.db, &state.config.jwt_secret, bearer(&headers)?)?;
    let token = auth::random_token();
    let id = state
        .db
        .create_cli_token(user.id, &token, request.label.as_deref())?;
    Ok(Json(CliTokenEntry {
        id,
        label: request.label,
        created: Utc::now(),
        token: Some(token),
    }))
}

/// DELETE /auth/cli-tokens/:id
pub async fn revoke_cli_token(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<i64>,
) -> Result<(), ApiError> {
    let user = auth::authenticate(&state.db, &state.config.jwt_secret, bearer(&headers)?)?;
    if !state.db.revoke_cli_token(user.id, id)? {
        return Err(ApiError::not_found(format!("cli token {id}")));
    }
    Ok(())
}
