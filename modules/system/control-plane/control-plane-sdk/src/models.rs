//! Models shared across the control plane API.
//!
//! Types persisted in the shared state store or the database serialize with
//! camelCase field names.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ControlPlaneError;

/// Health of a module instance as reported on the wire.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    #[default]
    Unknown = 0,
    Serving = 1,
    NotServing = 2,
}

impl HealthStatus {
    #[must_use]
    pub fn is_serving(self) -> bool {
        self == Self::Serving
    }
}

impl TryFrom<i32> for HealthStatus {
    type Error = ControlPlaneError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Unknown),
            1 => Ok(Self::Serving),
            2 => Ok(Self::NotServing),
            other => Err(ControlPlaneError::invalid_argument(format!(
                "health status {other} is out of range (expected 0..=2)"
            ))),
        }
    }
}

impl From<HealthStatus> for i32 {
    fn from(value: HealthStatus) -> Self {
        value as i32
    }
}

/// A registered module as seen through the directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredModule {
    pub name: String,
    /// `host:port` of the module's gRPC endpoint.
    pub address: String,
    pub serving: bool,
}

/// HTTP verb of an admin route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RouteAction {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl RouteAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for RouteAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RouteAction {
    type Err = ControlPlaneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            _ => Err(ControlPlaneError::invalid_argument(format!(
                "unsupported route action '{s}'"
            ))),
        }
    }
}

/// Declarative part of a route descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteOptions {
    pub path: String,
    pub action: RouteAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_params: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body_params: Option<Value>,
    /// Ordered middleware chain applied before the handler.
    #[serde(default)]
    pub middlewares: Vec<String>,
}

impl RouteOptions {
    #[must_use]
    pub fn new(path: impl Into<String>, action: RouteAction) -> Self {
        Self {
            path: path.into(),
            action,
            description: None,
            url_params: None,
            query_params: None,
            body_params: None,
            middlewares: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_middlewares<I, S>(mut self, middlewares: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.middlewares = middlewares.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// A route descriptor pushed by a module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathDefinition {
    pub options: RouteOptions,
    #[serde(default)]
    pub return_type: String,
    /// Name of the module's gRPC function implementing the route.
    #[serde(default)]
    pub grpc_function_name: String,
}

impl PathDefinition {
    #[must_use]
    pub fn new(options: RouteOptions, grpc_function_name: impl Into<String>) -> Self {
        Self {
            options,
            return_type: String::new(),
            grpc_function_name: grpc_function_name.into(),
        }
    }

    #[must_use]
    pub fn matches(&self, path: &str, action: RouteAction) -> bool {
        self.options.path == path && self.options.action == action
    }
}

/// All routes a module registered under one router URL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredRouteSet {
    pub routes: Vec<PathDefinition>,
    pub url: String,
    pub module_name: String,
}

/// A middleware injected onto a route at runtime, persisted so the ordering
/// survives route re-registration and restarts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MiddlewarePatchRecord {
    pub path: String,
    pub action: RouteAction,
    pub middleware: String,
    /// Index in the live middleware chain.
    pub position: usize,
    /// URL of the module that injected the middleware.
    pub owner: String,
}

/// Subset of the `core` module config exposed to modules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
}

/// Where the shared state store can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateStoreDetails {
    pub host: String,
    pub port: u16,
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn health_status_range_is_validated() {
        assert_eq!(HealthStatus::try_from(0).unwrap(), HealthStatus::Unknown);
        assert_eq!(HealthStatus::try_from(1).unwrap(), HealthStatus::Serving);
        assert_eq!(HealthStatus::try_from(2).unwrap(), HealthStatus::NotServing);

        for bad in [-1, 3, 42] {
            let err = HealthStatus::try_from(bad).unwrap_err();
            assert!(matches!(err, ControlPlaneError::InvalidArgument(_)));
        }
        assert_eq!(i32::from(HealthStatus::NotServing), 2);
    }

    #[test]
    fn route_action_parses_case_insensitively() {
        assert_eq!("post".parse::<RouteAction>().unwrap(), RouteAction::Post);
        assert_eq!("DELETE".parse::<RouteAction>().unwrap(), RouteAction::Delete);
        assert!("TRACE".parse::<RouteAction>().is_err());
        assert_eq!(RouteAction::Patch.to_string(), "PATCH");
    }

    #[test]
    fn route_set_uses_camel_case_on_the_wire() {
        let set = RegisteredRouteSet {
            routes: vec![PathDefinition::new(
                RouteOptions::new("/rooms", RouteAction::Post).with_middlewares(["auth"]),
                "CreateRoom",
            )],
            url: "10.0.0.5:5000".to_owned(),
            module_name: "chat".to_owned(),
        };

        let value = serde_json::to_value(&set).unwrap();
        assert_eq!(value["moduleName"], json!("chat"));
        assert_eq!(value["routes"][0]["grpcFunctionName"], json!("CreateRoom"));
        assert_eq!(value["routes"][0]["options"]["action"], json!("POST"));
        assert_eq!(value["routes"][0]["options"]["middlewares"], json!(["auth"]));
        assert!(value["routes"][0]["options"].get("description").is_none());
    }

    #[test]
    fn path_definition_match_uses_path_and_action() {
        let def = PathDefinition::new(RouteOptions::new("/rooms", RouteAction::Post), "f");
        assert!(def.matches("/rooms", RouteAction::Post));
        assert!(!def.matches("/rooms", RouteAction::Get));
        assert!(!def.matches("/room", RouteAction::Post));
    }
}
