use control_plane_sdk::{RegisteredModule, RegisteredRouteSet};
use serde::Serialize;

/// One entry of `GET /control-plane/modules`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleDto {
    pub module_name: String,
    pub url: String,
    pub serving: bool,
}

impl From<RegisteredModule> for ModuleDto {
    fn from(m: RegisteredModule) -> Self {
        Self {
            module_name: m.name,
            url: m.address,
            serving: m.serving,
        }
    }
}

/// One entry of `GET /control-plane/routes`: a registered set plus where
/// its routes are served.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteSetDto {
    #[serde(flatten)]
    pub set: RegisteredRouteSet,
    pub mounted_paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthDto {
    pub status: &'static str,
    pub instance: String,
    pub modules: usize,
}
