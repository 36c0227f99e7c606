//! gRPC server implementation for `AdminService`.

use std::sync::Arc;

use control_plane_grpc::convert::status_from_error;
use control_plane_grpc::pb::{Empty, PatchRouteMiddlewaresRequest, RegisterAdminRouteRequest};
use control_plane_grpc::{AdminService, AdminServiceServer, MODULE_NAME_METADATA};
use control_plane_sdk::{ModuleDirectory, PathDefinition, RouteAction};
use tonic::{Request, Response, Status};

use super::domain_status;
use crate::domain::admin::AdminRouteService;

/// gRPC service implementation of `AdminService`.
#[derive(Clone)]
pub struct AdminServiceImpl {
    admin: Arc<AdminRouteService>,
    directory: Arc<dyn ModuleDirectory>,
}

impl AdminServiceImpl {
    #[must_use]
    pub fn new(admin: Arc<AdminRouteService>, directory: Arc<dyn ModuleDirectory>) -> Self {
        Self { admin, directory }
    }
}

fn calling_module<T>(request: &Request<T>) -> Option<String> {
    request
        .metadata()
        .get(MODULE_NAME_METADATA)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(ToOwned::to_owned)
}

#[tonic::async_trait]
impl AdminService for AdminServiceImpl {
    async fn register_admin_route(
        &self,
        request: Request<RegisterAdminRouteRequest>,
    ) -> Result<Response<Empty>, Status> {
        let module_name = calling_module(&request).ok_or_else(|| {
            Status::invalid_argument(format!("'{MODULE_NAME_METADATA}' metadata is required"))
        })?;
        let req = request.into_inner();
        let routes = req
            .routes
            .into_iter()
            .map(PathDefinition::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(status_from_error)?;

        self.admin
            .register_admin_route(&module_name, req.router_url, routes)
            .await
            .map_err(domain_status)?;
        Ok(Response::new(Empty {}))
    }

    async fn patch_route_middlewares(
        &self,
        request: Request<PatchRouteMiddlewaresRequest>,
    ) -> Result<Response<Empty>, Status> {
        // A named caller must be registered; its url decides what it may remove.
        let caller_url = match calling_module(&request) {
            Some(name) => Some(
                self.directory
                    .get_module_url_by_name(&name)
                    .await
                    .map_err(|e| {
                        Status::permission_denied(format!(
                            "calling module '{name}' is not registered: {e}"
                        ))
                    })?,
            ),
            None => None,
        };
        let req = request.into_inner();
        let action: RouteAction = req.action.parse().map_err(status_from_error)?;

        self.admin
            .patch_route_middlewares(&req.path, action, &req.middlewares, caller_url.as_deref())
            .await
            .map_err(domain_status)?;
        Ok(Response::new(Empty {}))
    }
}

/// Create an `AdminService` server.
#[must_use]
pub fn make_admin_service(service: AdminServiceImpl) -> AdminServiceServer<AdminServiceImpl> {
    AdminServiceServer::new(service)
}
