//! API module for the issuer service

pub mod error;
pub mod handlers;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use handlers::AppState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Readiness check response
#[derive(Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
    pub kid: String,
    pub revoked_count: usize,
    pub generation: u64,
}

/// Health check endpoint
///
/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}

/// Readiness check endpoint
///
/// GET /ready
pub async fn ready(State(state): State<Arc<AppState>>) -> Json<ReadyResponse> {
    Json(ReadyResponse {
        ready: true,
        kid: state.keys.current_kid(),
        revoked_count: state.revocations.len(),
        generation: state.generation.current(),
    })
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    // Verifiers embedded in browser pages call verify and jwks directly
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health endpoints
        .route("/health", get(health))
        .route("/ready", get(ready))
        // Token endpoints
        .route("/v1/tokens/mint", post(handlers::mint_token))
        .route("/v1/tokens/verify", post(handlers::verify_token))
        // Revocation endpoints
        .route("/v1/revocations", post(handlers::revoke_token))
        .route("/v1/revocations/root", get(handlers::revocation_root))
        .route("/v1/revocations/device", post(handlers::revoke_device))
        .route("/v1/revocations/{token_hash}", get(handlers::revocation_status))
        .route("/v1/revocations/{token_hash}/proof", get(handlers::revocation_proof))
        // Generation endpoints
        .route("/v1/generation", get(handlers::get_generation))
        .route("/v1/generation/bump", post(handlers::bump_generation))
        // Key and trust anchor endpoints
        .route("/.well-known/jwks.json", get(handlers::jwks))
        .route("/v1/issuer/info", get(handlers::issuer_info))
        .route("/v1/issuer/thumbprint/publish", post(handlers::publish_thumbprint))
        .route("/v1/issuer/keys/rotate", post(handlers::rotate_key))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
