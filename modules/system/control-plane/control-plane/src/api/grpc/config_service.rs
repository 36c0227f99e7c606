//! gRPC server implementation for `ConfigService`.

use std::pin::Pin;
use std::sync::Arc;

use control_plane_grpc::convert::{module_list_response, parse_json, status_from_error};
use control_plane_grpc::pb::{
    ConfigResultResponse, Empty, GetModuleUrlByNameRequest, GetModuleUrlByNameResponse,
    GetRequest, GetResponse, ModuleExistsRequest, ModuleExistsResponse, ModuleHealthProbeRequest,
    ModuleListResponse, RedisDetailsResponse, RegisterModuleRequest, RegisterModuleResponse,
    UpdateConfigRequest,
};
use control_plane_grpc::{ConfigService, ConfigServiceServer};
use control_plane_sdk::{ModuleDirectory, StateStoreDetails};
use futures::{Stream, StreamExt};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};

use super::domain_status;
use crate::domain::config_store::ConfigStoreService;
use crate::domain::registry::RegistryService;

type ModuleListStream = Pin<Box<dyn Stream<Item = Result<ModuleListResponse, Status>> + Send>>;

/// gRPC service implementation of `ConfigService`.
#[derive(Clone)]
pub struct ConfigServiceImpl {
    registry: Arc<RegistryService>,
    config: Arc<ConfigStoreService>,
    state_store: StateStoreDetails,
    /// Ends open `WatchModules` streams on shutdown.
    shutdown: CancellationToken,
}

impl ConfigServiceImpl {
    #[must_use]
    pub fn new(
        registry: Arc<RegistryService>,
        config: Arc<ConfigStoreService>,
        state_store: StateStoreDetails,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            registry,
            config,
            state_store,
            shutdown,
        }
    }
}

#[tonic::async_trait]
impl ConfigService for ConfigServiceImpl {
    type WatchModulesStream = ModuleListStream;

    async fn get(&self, request: Request<GetRequest>) -> Result<Response<GetResponse>, Status> {
        let key = request.into_inner().key;
        let config = self.config.get(&key).await.map_err(domain_status)?;
        Ok(Response::new(GetResponse {
            data: config.to_string(),
        }))
    }

    async fn get_server_config(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<GetResponse>, Status> {
        let server = self.config.server_config().await.map_err(domain_status)?;
        let data = serde_json::to_string(&server).map_err(|e| Status::internal(e.to_string()))?;
        Ok(Response::new(GetResponse { data }))
    }

    async fn get_redis_details(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<RedisDetailsResponse>, Status> {
        Ok(Response::new(RedisDetailsResponse {
            host: self.state_store.host.clone(),
            port: u32::from(self.state_store.port),
        }))
    }

    async fn update_config(
        &self,
        request: Request<UpdateConfigRequest>,
    ) -> Result<Response<ConfigResultResponse>, Status> {
        let req = request.into_inner();
        let config = parse_json("config", &req.config).map_err(status_from_error)?;
        let stored = self
            .config
            .set(&req.module_name, config)
            .await
            .map_err(domain_status)?;
        Ok(Response::new(ConfigResultResponse {
            result: stored.to_string(),
        }))
    }

    async fn add_fields_to_config(
        &self,
        request: Request<UpdateConfigRequest>,
    ) -> Result<Response<ConfigResultResponse>, Status> {
        let req = request.into_inner();
        let fields = parse_json("config", &req.config).map_err(status_from_error)?;
        let merged = self
            .config
            .add_fields(&req.module_name, fields)
            .await
            .map_err(domain_status)?;
        Ok(Response::new(ConfigResultResponse {
            result: merged.to_string(),
        }))
    }

    async fn module_exists(
        &self,
        request: Request<ModuleExistsRequest>,
    ) -> Result<Response<ModuleExistsResponse>, Status> {
        let name = request.into_inner().module_name;
        let url = self
            .registry
            .module_exists(&name)
            .await
            .map_err(status_from_error)?;
        Ok(Response::new(ModuleExistsResponse { url }))
    }

    async fn register_module(
        &self,
        request: Request<RegisterModuleRequest>,
    ) -> Result<Response<RegisterModuleResponse>, Status> {
        let peer = request.remote_addr();
        let req = request.into_inner();
        let result = self
            .registry
            .register_module(&req.module_name, &req.url, req.health_status, peer)
            .await
            .map_err(|e| {
                tracing::warn!(module = %req.module_name, url = %req.url, error = %e, "registration rejected");
                domain_status(e)
            })?;
        Ok(Response::new(RegisterModuleResponse { result }))
    }

    async fn module_list(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<ModuleListResponse>, Status> {
        Ok(Response::new(module_list_response(
            &self.registry.snapshot(),
        )))
    }

    async fn watch_modules(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<Self::WatchModulesStream>, Status> {
        let (initial, rx) = self.registry.watch();
        tracing::debug!(modules = initial.len(), "module watcher subscribed");

        let first = futures::stream::once(async move { Ok(module_list_response(&initial)) });
        let updates = BroadcastStream::new(rx).filter_map(|item| async move {
            match item {
                Ok(snapshot) => Some(Ok(module_list_response(&snapshot))),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    // A later snapshot supersedes the skipped ones.
                    tracing::warn!(skipped, "module watcher lagged");
                    None
                }
            }
        });
        let stream = first
            .chain(updates)
            .take_until(self.shutdown.clone().cancelled_owned());
        Ok(Response::new(Box::pin(stream)))
    }

    async fn module_health_probe(
        &self,
        request: Request<ModuleHealthProbeRequest>,
    ) -> Result<Response<Empty>, Status> {
        let peer = request.remote_addr();
        let req = request.into_inner();
        self.registry
            .module_health_probe(&req.module_name, &req.url, req.status, peer)
            .await
            .map_err(domain_status)?;
        Ok(Response::new(Empty {}))
    }

    async fn get_module_url_by_name(
        &self,
        request: Request<GetModuleUrlByNameRequest>,
    ) -> Result<Response<GetModuleUrlByNameResponse>, Status> {
        let name = request.into_inner().name;
        let module_url = self
            .registry
            .get_module_url_by_name(&name)
            .await
            .map_err(status_from_error)?;
        Ok(Response::new(GetModuleUrlByNameResponse { module_url }))
    }
}

/// Create a `ConfigService` server around the registry and config store.
#[must_use]
pub fn make_config_service(service: ConfigServiceImpl) -> ConfigServiceServer<ConfigServiceImpl> {
    ConfigServiceServer::new(service)
}
