//! REST API for the license service.
//!
//! Routes are compatible with the legacy license service the gateway calls:
//!
//! - `GET /users/:user_id/authorizations` - current authorization, defaults for unknown users
//! - `PUT /users/:user_id/authorizations` - partial update (also accepted as `PATCH`)
//! - `GET /health` - liveness
//! - `GET /metrics` - Prometheus exposition

mod handlers;
pub mod middleware;

use std::sync::Arc;

use axum::{middleware as axum_middleware, routing::get, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::service::LicenseService;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<LicenseService>,
    pub service_name: Arc<str>,
}

impl AppState {
    pub fn new(service: Arc<LicenseService>, service_name: impl Into<Arc<str>>) -> Self {
        Self {
            service,
            service_name: service_name.into(),
        }
    }
}

/// Build the API router.
///
/// # Example
///
/// ```rust,ignore
/// let state = AppState::new(service, "license-service");
/// let app = build_router(state);
/// ```
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::prometheus_metrics))
        .route(
            "/users/:user_id/authorizations",
            get(handlers::get_authorization)
                .put(handlers::update_authorization)
                .patch(handlers::update_authorization),
        )
        .layer(axum_middleware::from_fn(middleware::request_headers))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
