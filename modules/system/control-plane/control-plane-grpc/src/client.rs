//! gRPC client for modules talking to the control plane.

use std::time::Duration;

use async_trait::async_trait;
use control_plane_sdk::{
    ConfigApi, ControlPlaneError, HealthStatus, ModuleDirectory, PathDefinition, RegisteredModule,
    RouteAction, ServerConfig, StateStoreDetails,
};
use futures::{Stream, StreamExt};
use serde_json::Value;
use tonic::Request;
use tonic::metadata::MetadataValue;
use tonic::transport::{Channel, Endpoint};
use tracing::Instrument;

use crate::convert::{error_from_status, parse_json};
use crate::pb;
use crate::{AdminServiceClient, ConfigServiceClient, MODULE_NAME_METADATA};

/// Transport settings for [`ControlPlaneGrpcClient`].
#[derive(Debug, Clone)]
pub struct GrpcClientConfig {
    /// Timeout for establishing the initial connection.
    pub connect_timeout: Duration,
    /// Timeout for individual RPC calls. Not applied to `WatchModules`.
    pub rpc_timeout: Duration,
}

impl Default for GrpcClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            rpc_timeout: Duration::from_secs(30),
        }
    }
}

/// Client for both control plane services over one channel.
///
/// When built with [`ControlPlaneGrpcClient::with_module_name`], admin calls
/// carry the module name so the coordinator can resolve the caller's URL.
#[derive(Clone)]
pub struct ControlPlaneGrpcClient {
    config: ConfigServiceClient<Channel>,
    admin: AdminServiceClient<Channel>,
    module_name: Option<String>,
    rpc_timeout: Duration,
}

impl ControlPlaneGrpcClient {
    /// Connects to the coordinator at `uri` (e.g. `http://127.0.0.1:55152`).
    ///
    /// # Errors
    /// Returns an error if the URI is invalid or the connection fails.
    pub async fn connect(
        uri: impl Into<String>,
        cfg: &GrpcClientConfig,
    ) -> Result<Self, tonic::transport::Error> {
        let uri = uri.into();
        let span = tracing::debug_span!("control_plane_connect", uri = %uri);

        async move {
            let channel = Endpoint::from_shared(uri)?
                .connect_timeout(cfg.connect_timeout)
                .tcp_keepalive(Some(Duration::from_secs(30)))
                .connect()
                .await?;
            tracing::debug!("connected to control plane");
            Ok(Self::from_channel(channel, cfg.rpc_timeout))
        }
        .instrument(span)
        .await
    }

    #[must_use]
    pub fn from_channel(channel: Channel, rpc_timeout: Duration) -> Self {
        Self {
            config: ConfigServiceClient::new(channel.clone()),
            admin: AdminServiceClient::new(channel),
            module_name: None,
            rpc_timeout,
        }
    }

    #[must_use]
    pub fn with_module_name(mut self, module_name: impl Into<String>) -> Self {
        self.module_name = Some(module_name.into());
        self
    }

    fn request<T>(&self, message: T) -> Result<Request<T>, ControlPlaneError> {
        let mut request = Request::new(message);
        request.set_timeout(self.rpc_timeout);
        if let Some(name) = &self.module_name {
            let value = MetadataValue::try_from(name.as_str()).map_err(|e| {
                ControlPlaneError::invalid_argument(format!("module name '{name}': {e}"))
            })?;
            request.metadata_mut().insert(MODULE_NAME_METADATA, value);
        }
        Ok(request)
    }

    /// Registers `name` at `url` with the given health.
    ///
    /// # Errors
    /// * `InvalidArgument` - the coordinator rejected the status
    /// * `Internal` - the coordinator could not reach the module
    pub async fn register_module(
        &self,
        name: &str,
        url: &str,
        status: HealthStatus,
    ) -> Result<bool, ControlPlaneError> {
        let req = self.request(pb::RegisterModuleRequest {
            module_name: name.to_owned(),
            url: url.to_owned(),
            health_status: status.into(),
        })?;
        let resp = self
            .config
            .clone()
            .register_module(req)
            .await
            .map_err(|s| error_from_status(&s))?;
        Ok(resp.into_inner().result)
    }

    /// Sends an out-of-band heartbeat.
    ///
    /// # Errors
    /// * `InvalidArgument` - the coordinator rejected the status
    pub async fn module_health_probe(
        &self,
        name: &str,
        url: &str,
        status: HealthStatus,
    ) -> Result<(), ControlPlaneError> {
        let req = self.request(pb::ModuleHealthProbeRequest {
            module_name: name.to_owned(),
            url: url.to_owned(),
            status: status.into(),
        })?;
        self.config
            .clone()
            .module_health_probe(req)
            .await
            .map_err(|s| error_from_status(&s))?;
        Ok(())
    }

    /// Opens the module snapshot stream.
    ///
    /// # Errors
    /// Returns an error if the stream cannot be opened.
    pub async fn watch_modules(
        &self,
    ) -> Result<
        impl Stream<Item = Result<Vec<RegisteredModule>, ControlPlaneError>> + use<>,
        ControlPlaneError,
    > {
        let resp = self
            .config
            .clone()
            .watch_modules(Request::new(pb::Empty {}))
            .await
            .map_err(|s| error_from_status(&s))?;

        Ok(resp.into_inner().map(|item| {
            item.map(|list| list.modules.into_iter().map(RegisteredModule::from).collect())
                .map_err(|s| error_from_status(&s))
        }))
    }

    /// Pushes this module's admin routes. Without `router_url` the
    /// coordinator resolves the URL from the module name metadata.
    ///
    /// # Errors
    /// * `Internal` - the router URL could not be resolved
    pub async fn register_admin_route(
        &self,
        router_url: Option<String>,
        routes: &[PathDefinition],
    ) -> Result<(), ControlPlaneError> {
        let req = self.request(pb::RegisterAdminRouteRequest {
            router_url,
            routes: routes.iter().map(pb::PathDefinition::from).collect(),
        })?;
        self.admin
            .clone()
            .register_admin_route(req)
            .await
            .map_err(|s| error_from_status(&s))?;
        Ok(())
    }

    /// Replaces the middleware chain of a registered route.
    ///
    /// # Errors
    /// * `NotFound` - no route matches `path` and `action`
    /// * `PermissionDenied` - the patch removes another module's middleware
    pub async fn patch_route_middlewares(
        &self,
        path: &str,
        action: RouteAction,
        middlewares: Vec<String>,
    ) -> Result<(), ControlPlaneError> {
        let req = self.request(pb::PatchRouteMiddlewaresRequest {
            path: path.to_owned(),
            action: action.as_str().to_owned(),
            middlewares,
        })?;
        self.admin
            .clone()
            .patch_route_middlewares(req)
            .await
            .map_err(|s| error_from_status(&s))?;
        Ok(())
    }

    /// # Errors
    /// * `NotFound` - the `core` module has no config yet
    pub async fn server_config(&self) -> Result<ServerConfig, ControlPlaneError> {
        let req = self.request(pb::Empty {})?;
        let resp = self
            .config
            .clone()
            .get_server_config(req)
            .await
            .map_err(|s| error_from_status(&s))?;
        let value = parse_json("data", &resp.into_inner().data)?;
        serde_json::from_value(value).map_err(|e| ControlPlaneError::internal(e.to_string()))
    }

    /// # Errors
    /// Returns an error if the call fails.
    pub async fn state_store_details(&self) -> Result<StateStoreDetails, ControlPlaneError> {
        let req = self.request(pb::Empty {})?;
        let resp = self
            .config
            .clone()
            .get_redis_details(req)
            .await
            .map_err(|s| error_from_status(&s))?
            .into_inner();
        let port = u16::try_from(resp.port)
            .map_err(|_| ControlPlaneError::internal(format!("invalid port {}", resp.port)))?;
        Ok(StateStoreDetails {
            host: resp.host,
            port,
        })
    }
}

#[async_trait]
impl ModuleDirectory for ControlPlaneGrpcClient {
    async fn get_module_url_by_name(&self, name: &str) -> Result<String, ControlPlaneError> {
        let req = self.request(pb::GetModuleUrlByNameRequest {
            name: name.to_owned(),
        })?;
        let resp = self
            .config
            .clone()
            .get_module_url_by_name(req)
            .await
            .map_err(|s| error_from_status(&s))?;
        Ok(resp.into_inner().module_url)
    }

    async fn module_exists(&self, name: &str) -> Result<String, ControlPlaneError> {
        let req = self.request(pb::ModuleExistsRequest {
            module_name: name.to_owned(),
        })?;
        let resp = self
            .config
            .clone()
            .module_exists(req)
            .await
            .map_err(|s| error_from_status(&s))?;
        Ok(resp.into_inner().url)
    }

    async fn list_modules(&self) -> Result<Vec<RegisteredModule>, ControlPlaneError> {
        let req = self.request(pb::Empty {})?;
        let resp = self
            .config
            .clone()
            .module_list(req)
            .await
            .map_err(|s| error_from_status(&s))?;
        Ok(resp
            .into_inner()
            .modules
            .into_iter()
            .map(RegisteredModule::from)
            .collect())
    }
}

#[async_trait]
impl ConfigApi for ControlPlaneGrpcClient {
    async fn get_config(&self, module: &str) -> Result<Value, ControlPlaneError> {
        let req = self.request(pb::GetRequest {
            key: module.to_owned(),
        })?;
        let resp = self
            .config
            .clone()
            .get(req)
            .await
            .map_err(|s| error_from_status(&s))?;
        parse_json("data", &resp.into_inner().data)
    }

    async fn update_config(&self, module: &str, config: Value) -> Result<Value, ControlPlaneError> {
        let req = self.request(pb::UpdateConfigRequest {
            module_name: module.to_owned(),
            config: config.to_string(),
        })?;
        let resp = self
            .config
            .clone()
            .update_config(req)
            .await
            .map_err(|s| error_from_status(&s))?;
        parse_json("result", &resp.into_inner().result)
    }

    async fn add_fields_to_config(
        &self,
        module: &str,
        fields: Value,
    ) -> Result<Value, ControlPlaneError> {
        let req = self.request(pb::UpdateConfigRequest {
            module_name: module.to_owned(),
            config: fields.to_string(),
        })?;
        let resp = self
            .config
            .clone()
            .add_fields_to_config(req)
            .await
            .map_err(|s| error_from_status(&s))?;
        parse_json("result", &resp.into_inner().result)
    }
}
