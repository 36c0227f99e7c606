use axum::Router;
use axum::extract::Extension;
use axum::routing::{any, get};

use super::handlers::{self, RestState};

/// Builds the HTTP router; `prefix` is where admin routes are mounted.
#[must_use]
pub fn router(state: RestState, prefix: &str) -> Router {
    let prefix = prefix.trim_end_matches('/');
    Router::new()
        .route("/healthz", get(handlers::healthz))
        .route("/control-plane/modules", get(handlers::list_modules))
        .route("/control-plane/routes", get(handlers::list_routes))
        .route(&format!("{prefix}/{{*path}}"), any(handlers::resolve_admin_route))
        .layer(Extension(state))
}
