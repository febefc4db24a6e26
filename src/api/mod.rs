// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{
    routing::{get, post},
    Json, Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;

use crate::state::AppState;

pub mod health;
pub mod sessions;

pub fn router(state: AppState) -> Router {
    Router::new()
        // Session endpoints
        .route("/api/request-wallet", post(sessions::request_wallet))
        .route("/api/status", get(sessions::session_status))
        .route("/api/claim-wallet", get(sessions::claim_wallet))
        // Health endpoint (no state required, kept uniform)
        .route("/health", get(health::health))
        // OpenAPI document
        .route("/api-doc/openapi.json", get(openapi_json))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer())
        .with_state(state)
}

async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Build CORS layer from environment configuration.
///
/// - If `CORS_ALLOWED_ORIGINS` is set, only those origins are allowed.
///   Multiple origins can be comma-separated.
/// - If not set, falls back to permissive CORS (development only).
fn build_cors_layer() -> CorsLayer {
    if let Ok(origins) = std::env::var("CORS_ALLOWED_ORIGINS") {
        let allowed: Vec<_> = origins
            .split(',')
            .map(|s| s.trim().parse().expect("Invalid CORS origin"))
            .collect();
        tracing::info!(origins = %origins, "CORS: restricting to configured origins");
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(allowed))
            .allow_methods(tower_http::cors::Any)
            .allow_headers(tower_http::cors::Any)
    } else {
        tracing::warn!("CORS_ALLOWED_ORIGINS not set - using permissive CORS (development only)");
        CorsLayer::permissive()
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        sessions::request_wallet,
        sessions::session_status,
        sessions::claim_wallet,
        health::health
    ),
    components(
        schemas(
            sessions::RequestWalletBody,
            sessions::RequestWalletResponse,
            sessions::SessionStatusResponse,
            sessions::ClaimWalletResponse,
            crate::models::SessionStatus,
            health::HealthResponse
        )
    ),
    tags(
        (name = "Sessions", description = "Unlinking session lifecycle"),
        (name = "Health", description = "Liveness checks")
    )
)]
struct ApiDoc;
