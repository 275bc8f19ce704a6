//! Legal MCP server library.
//!
//! This module exposes the application builder for use in tests.

use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::{routing::get, Extension, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub mod analysis;
pub mod api;
pub mod auth;
pub mod config;
pub mod llm;
pub mod mcp;
pub mod paths;
pub mod state;
pub mod storage;

#[cfg(test)]
mod test_support;

use api::mcp::{AllowedOrigins, MCP_SESSION_ID_HEADER};
use mcp::{McpRouter, SessionRegistry};
use state::AppState;

/// Create the Axum application router with open access.
///
/// This function is used both by the main server binary and by integration tests.
pub fn create_app(state: AppState, registry: SessionRegistry) -> Router {
    create_app_with_config(state, registry, auth::AuthConfig::default(), Vec::new())
}

/// Create the Axum application router with auth configuration and CORS origins.
///
/// If `cors_allowed_origins` is empty, any origin is allowed.
/// Otherwise, only the specified origins are allowed.
pub fn create_app_with_config(
    state: AppState,
    registry: SessionRegistry,
    auth_config: auth::AuthConfig,
    cors_allowed_origins: Vec<String>,
) -> Router {
    if auth_config.enabled {
        tracing::info!("API key authentication enabled for /mcp");
    } else {
        tracing::warn!("Authentication disabled - the MCP endpoint is public!");
    }

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            HeaderName::from_static("x-api-key"),
            HeaderName::from_static(MCP_SESSION_ID_HEADER),
        ])
        .expose_headers([HeaderName::from_static(MCP_SESSION_ID_HEADER)]);

    let cors = if cors_allowed_origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = cors_allowed_origins
            .iter()
            .filter_map(|o| o.parse::<HeaderValue>().ok())
            .collect();
        cors.allow_origin(origins)
    };

    let router = McpRouter::new(registry, state);

    Router::new()
        .route("/health", get(health))
        .route(
            "/mcp",
            get(api::mcp::mcp_get)
                .post(api::mcp::mcp_post)
                .delete(api::mcp::mcp_delete),
        )
        .layer(Extension(router))
        .layer(Extension(Arc::new(auth_config)))
        .layer(Extension(Arc::new(AllowedOrigins::new(cors_allowed_origins))))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Health check endpoint.
async fn health() -> &'static str {
    "OK"
}
