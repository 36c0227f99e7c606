use std::sync::Arc;

use axum::Json;
use axum::extract::Extension;
use axum::http::{Method, StatusCode, Uri};
use control_plane_sdk::RouteAction;

use super::dto::{HealthDto, ModuleDto, RouteSetDto};
use super::error::{ApiError, ApiResult};
use crate::domain::admin::AdminRouteService;
use crate::domain::registry::RegistryService;
use crate::infra::router::{LiveRouteTable, ResolvedRoute};

/// Handles shared by every endpoint.
#[derive(Clone)]
pub struct RestState {
    pub instance_id: String,
    pub registry: Arc<RegistryService>,
    pub admin: Arc<AdminRouteService>,
    pub table: Arc<LiveRouteTable>,
}

#[allow(clippy::unused_async)]
pub async fn healthz(Extension(state): Extension<RestState>) -> Json<HealthDto> {
    Json(HealthDto {
        status: "ok",
        instance: state.instance_id.clone(),
        modules: state.registry.snapshot().len(),
    })
}

#[allow(clippy::unused_async)]
pub async fn list_modules(Extension(state): Extension<RestState>) -> Json<Vec<ModuleDto>> {
    Json(
        state
            .registry
            .snapshot()
            .into_iter()
            .map(ModuleDto::from)
            .collect(),
    )
}

#[allow(clippy::unused_async)]
pub async fn list_routes(Extension(state): Extension<RestState>) -> Json<Vec<RouteSetDto>> {
    let sets = state.admin.route_sets();
    Json(
        sets.into_iter()
            .map(|set| {
                let mounted_paths = set
                    .routes
                    .iter()
                    .map(|r| state.table.mounted_path(&set.module_name, &r.options.path))
                    .collect();
                RouteSetDto { set, mounted_paths }
            })
            .collect(),
    )
}

/// Resolves a request under the admin prefix to the route a module
/// registered for it.
#[allow(clippy::unused_async)]
pub async fn resolve_admin_route(
    Extension(state): Extension<RestState>,
    method: Method,
    uri: Uri,
) -> ApiResult<Json<ResolvedRoute>> {
    let path = uri.path();
    let action: RouteAction = method
        .as_str()
        .parse()
        .map_err(|_| ApiError::new(StatusCode::METHOD_NOT_ALLOWED, format!("{method} is not routable")))?;

    if let Some(resolved) = state.table.resolve(action, path) {
        tracing::debug!(path = %path, %action, module = %resolved.target.module_name, "admin route resolved");
        return Ok(Json(resolved));
    }
    if state.table.allowed_actions(path).is_empty() {
        Err(ApiError::not_found(format!("no admin route for {path}")))
    } else {
        Err(ApiError::new(
            StatusCode::METHOD_NOT_ALLOWED,
            format!("{action} is not registered for {path}"),
        ))
    }
}
