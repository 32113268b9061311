//! Fleetlink Backend Library
//!
//! Control API for a small fleet of tunnel-connected nodes: node registry,
//! heartbeat-driven presence tracking and relaying of requests to node agents.

pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod presence;
pub mod relay;
pub mod telemetry;
pub mod tunnel;

use axum::http::{header, HeaderValue, Method};
use axum::{
    middleware,
    routing::{any, get, patch, post},
    Router,
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::api::openapi::ApiDoc;
use crate::api::AppState;

/// Create the application router with the given state
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_allowed_origins);

    // Agents and dashboards reach these without a token
    let public = Router::new()
        .route("/health", get(api::health::health_check))
        .route("/auth", post(api::auth::login))
        .route("/nodes/events", get(api::events::status_events))
        .route("/nodes/:id", patch(api::nodes::heartbeat));

    let protected = Router::new()
        .route("/logout", post(api::auth::logout))
        .route("/me", get(api::auth::me))
        .route("/nodes", get(api::nodes::list).post(api::nodes::create))
        .route("/nodes/:id", get(api::nodes::get).put(api::nodes::update))
        .route("/nodes/:id/proxy", any(api::proxy::proxy))
        .route("/nodes/:id/proxy-sse", get(api::proxy::proxy_sse))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            api::auth::require_auth,
        ));

    Router::new()
        .merge(public)
        .merge(protected)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// `*` allows any origin; otherwise a comma-separated list
fn cors_layer(allowed_origins: &str) -> CorsLayer {
    let origin = if allowed_origins.trim() == "*" {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = allowed_origins
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        AllowOrigin::list(origins)
    };

    CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
        ])
}
