// src/server/routes.rs

//! Router assembly
//!
//! The API mounts at the root, or under `/api` with CORS for the frontend
//! origin when one is configured.

use super::handlers::{archives, auth, packages};
use super::AppState;
use axum::http::HeaderValue;
use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

pub fn create_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/auth", post(auth::exchange))
        .route("/auth/token", post(auth::rotate))
        .route(
            "/auth/cli-tokens",
            get(auth::list_cli_tokens).post(auth::create_cli_token),
        )
        .route("/auth/cli-tokens/:id", delete(auth::revoke_cli_token))
        .route("/archive", post(archives::upload))
        .route("/archive/:name", get(archives::download))
        .route(
            "/v1/packages",
            get(packages::search).post(packages::announce),
        )
        .route("/v1/packages/:pack/versions", get(packages::versions))
        .route(
            "/v1/packages/:pack/recipes/:version",
            get(packages::recipe),
        )
        .route("/health", get(|| async { "OK" }))
        .layer(TraceLayer::new_for_http());

    let frontend_origin = state.config.frontend_origin.clone();
    let api = api.with_state(state);

    match frontend_origin {
        Some(origin) => {
            let cors = match origin.parse::<HeaderValue>() {
                Ok(value) => CorsLayer::new()
                    .allow_origin(value)
                    .allow_methods(tower_http::cors::Any)
                    .allow_headers(tower_http::cors::Any),
                Err(_) => {
                    warn!("unparseable DOP_FRONTEND_ORIGIN `{origin}`, CORS disabled");
                    CorsLayer::new()
                }
            };
            Router::new().nest("/api", api).layer(cors)
        }
        None => api,
    }
}
