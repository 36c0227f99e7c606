//! Conversions between `control_plane.v1` messages and SDK models.

use control_plane_sdk::{
    ControlPlaneError, PathDefinition, RegisteredModule, RouteAction, RouteOptions,
};
use serde_json::Value;
use tonic::{Code, Status};

use crate::pb;

/// Maps a control plane error onto the matching gRPC status code.
#[must_use]
pub fn status_from_error(err: ControlPlaneError) -> Status {
    match err {
        ControlPlaneError::InvalidArgument(m) => Status::invalid_argument(m),
        ControlPlaneError::NotFound(m) => Status::not_found(m),
        ControlPlaneError::AlreadyExists(m) => Status::already_exists(m),
        ControlPlaneError::PermissionDenied(m) => Status::permission_denied(m),
        ControlPlaneError::FailedPrecondition(m) => Status::failed_precondition(m),
        ControlPlaneError::Internal(m) => Status::internal(m),
    }
}

/// Maps a gRPC status received by a client back onto a control plane error.
#[must_use]
pub fn error_from_status(status: &Status) -> ControlPlaneError {
    let message = status.message().to_owned();
    match status.code() {
        Code::InvalidArgument => ControlPlaneError::InvalidArgument(message),
        Code::NotFound => ControlPlaneError::NotFound(message),
        Code::AlreadyExists => ControlPlaneError::AlreadyExists(message),
        Code::PermissionDenied => ControlPlaneError::PermissionDenied(message),
        Code::FailedPrecondition => ControlPlaneError::FailedPrecondition(message),
        code => ControlPlaneError::Internal(format!("{code}: {message}")),
    }
}

/// Parses a JSON payload carried as a string field.
///
/// # Errors
/// Returns `InvalidArgument` naming `field` when the payload is not valid JSON.
pub fn parse_json(field: &str, raw: &str) -> Result<Value, ControlPlaneError> {
    serde_json::from_str(raw)
        .map_err(|e| ControlPlaneError::invalid_argument(format!("{field} is not valid JSON: {e}")))
}

fn parse_optional_json(field: &str, raw: Option<String>) -> Result<Option<Value>, ControlPlaneError> {
    raw.filter(|s| !s.is_empty())
        .map(|s| parse_json(field, &s))
        .transpose()
}

impl From<&RegisteredModule> for pb::ModuleInfo {
    fn from(m: &RegisteredModule) -> Self {
        Self {
            module_name: m.name.clone(),
            url: m.address.clone(),
            serving: m.serving,
        }
    }
}

impl From<pb::ModuleInfo> for RegisteredModule {
    fn from(m: pb::ModuleInfo) -> Self {
        Self {
            name: m.module_name,
            address: m.url,
            serving: m.serving,
        }
    }
}

#[must_use]
pub fn module_list_response(modules: &[RegisteredModule]) -> pb::ModuleListResponse {
    pb::ModuleListResponse {
        modules: modules.iter().map(pb::ModuleInfo::from).collect(),
    }
}

impl From<&PathDefinition> for pb::PathDefinition {
    fn from(def: &PathDefinition) -> Self {
        let o = &def.options;
        Self {
            options: Some(pb::RouteOptions {
                path: o.path.clone(),
                action: o.action.as_str().to_owned(),
                description: o.description.clone(),
                url_params: o.url_params.as_ref().map(Value::to_string),
                query_params: o.query_params.as_ref().map(Value::to_string),
                body_params: o.body_params.as_ref().map(Value::to_string),
                middlewares: o.middlewares.clone(),
            }),
            return_type: def.return_type.clone(),
            grpc_function_name: def.grpc_function_name.clone(),
        }
    }
}

impl TryFrom<pb::PathDefinition> for PathDefinition {
    type Error = ControlPlaneError;

    fn try_from(def: pb::PathDefinition) -> Result<Self, Self::Error> {
        let o = def
            .options
            .ok_or_else(|| ControlPlaneError::invalid_argument("route options are required"))?;
        if o.path.is_empty() {
            return Err(ControlPlaneError::invalid_argument("route path is required"));
        }
        let action: RouteAction = o.action.parse()?;

        Ok(Self {
            options: RouteOptions {
                path: o.path,
                action,
                description: o.description.filter(|d| !d.is_empty()),
                url_params: parse_optional_json("urlParams", o.url_params)?,
                query_params: parse_optional_json("queryParams", o.query_params)?,
                body_params: parse_optional_json("bodyParams", o.body_params)?,
                middlewares: o.middlewares,
            },
            return_type: def.return_type,
            grpc_function_name: def.grpc_function_name,
        })
    }
}
