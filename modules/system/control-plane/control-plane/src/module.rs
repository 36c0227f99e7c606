//! Wiring of the three subsystems and their network surfaces.

use std::sync::Arc;

use anyhow::Context;
use control_plane_grpc::{AdminServiceServer, ConfigServiceServer};
use control_plane_sdk::StateStoreDetails;
use state_store::{MessageBus, StateStore};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::Server;

use crate::api::grpc::{
    AdminServiceImpl, ConfigServiceImpl, make_admin_service, make_config_service,
};
use crate::api::rest::{self, handlers::RestState};
use crate::config::ControlPlaneConfig;
use crate::domain::admin::{AdminReloadHook, AdminRouteService};
use crate::domain::config_store::ConfigStoreService;
use crate::domain::error::DomainError;
use crate::domain::probe::ModuleProbe;
use crate::domain::registry::RegistryService;
use crate::domain::repo::ConfigDatabase;
use crate::infra::router::LiveRouteTable;

/// Module whose config changes re-trigger the middleware pass.
const ADMIN_MODULE: &str = "admin";

/// One coordinator instance.
pub struct ControlPlane {
    cfg: ControlPlaneConfig,
    instance_id: String,
    registry: Arc<RegistryService>,
    config: Arc<ConfigStoreService>,
    admin: Arc<AdminRouteService>,
    table: Arc<LiveRouteTable>,
}

impl ControlPlane {
    #[must_use]
    pub fn new(
        cfg: ControlPlaneConfig,
        store: Arc<dyn StateStore>,
        bus: Arc<dyn MessageBus>,
        db: Arc<dyn ConfigDatabase>,
        probe: Arc<dyn ModuleProbe>,
    ) -> Self {
        let instance_id = cfg.resolve_instance_id();

        let registry = Arc::new(RegistryService::new(
            probe,
            store.clone(),
            bus.clone(),
            instance_id.clone(),
            cfg.health.clone(),
        ));
        let config = Arc::new(ConfigStoreService::new(
            store.clone(),
            bus.clone(),
            db.clone(),
            instance_id.clone(),
            cfg.reconcile.clone(),
        ));
        let table = Arc::new(LiveRouteTable::new(&cfg.admin.route_prefix));
        let admin = Arc::new(AdminRouteService::new(
            registry.clone(),
            table.clone(),
            store,
            bus,
            db,
            instance_id.clone(),
            cfg.admin.clone(),
        ));
        config.on_reload(ADMIN_MODULE, Arc::new(AdminReloadHook(admin.clone())));

        tracing::info!(instance = %instance_id, "control plane created");
        Self {
            cfg,
            instance_id,
            registry,
            config,
            admin,
            table,
        }
    }

    #[must_use]
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<RegistryService> {
        &self.registry
    }

    #[must_use]
    pub fn config_store(&self) -> &Arc<ConfigStoreService> {
        &self.config
    }

    #[must_use]
    pub fn admin(&self) -> &Arc<AdminRouteService> {
        &self.admin
    }

    #[must_use]
    pub fn route_table(&self) -> &Arc<LiveRouteTable> {
        &self.table
    }

    /// Restores modules and admin routes from the HA state in the shared
    /// store. Failures are logged; a cold start is still a valid start.
    pub async fn recover(&self) {
        match self.registry.recover_from_store().await {
            Ok(n) => tracing::debug!(restored = n, "registry recovery done"),
            Err(e) => tracing::warn!(error = %e, "registry recovery failed"),
        }
        match self.admin.recover_from_store().await {
            Ok(n) => tracing::debug!(restored = n, "admin route recovery done"),
            Err(e) => tracing::warn!(error = %e, "admin route recovery failed"),
        }
    }

    /// Starts the sweep, the reconciler and the bus listeners. Everything
    /// stops when `cancel` fires.
    ///
    /// # Errors
    /// Returns an error if a bus subscription cannot be opened.
    pub async fn spawn_background(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Vec<JoinHandle<()>>, DomainError> {
        let mut handles = vec![
            tokio::spawn(self.registry.clone().run_sweep_loop(cancel.clone())),
            tokio::spawn(self.config.clone().run_reconcile_loop(cancel.clone())),
            self.registry.spawn_bus_listener(cancel.clone()).await?,
            self.admin.spawn_bus_listener(cancel.clone()).await?,
        ];
        handles.extend(self.config.spawn_bus_listeners(cancel).await?);

        let admin = self.admin.clone();
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            cancel.cancelled().await;
            admin.shutdown();
        }));
        Ok(handles)
    }

    #[must_use]
    pub fn config_service(&self, cancel: &CancellationToken) -> ConfigServiceServer<ConfigServiceImpl> {
        make_config_service(ConfigServiceImpl::new(
            self.registry.clone(),
            self.config.clone(),
            StateStoreDetails {
                host: self.cfg.state_store.host.clone(),
                port: self.cfg.state_store.port,
            },
            cancel.clone(),
        ))
    }

    #[must_use]
    pub fn admin_service(&self) -> AdminServiceServer<AdminServiceImpl> {
        make_admin_service(AdminServiceImpl::new(
            self.admin.clone(),
            self.registry.clone(),
        ))
    }

    #[must_use]
    pub fn http_router(&self) -> axum::Router {
        rest::router(
            RestState {
                instance_id: self.instance_id.clone(),
                registry: self.registry.clone(),
                admin: self.admin.clone(),
                table: self.table.clone(),
            },
            &self.cfg.admin.route_prefix,
        )
    }

    /// Serves `ConfigService`, `AdminService` and `grpc.health.v1` on
    /// `listener` until `cancel` fires.
    ///
    /// # Errors
    /// Returns an error if the server fails.
    pub async fn serve_grpc(
        &self,
        listener: TcpListener,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        let (reporter, health) = tonic_health::server::health_reporter();
        reporter
            .set_serving::<ConfigServiceServer<ConfigServiceImpl>>()
            .await;
        reporter
            .set_serving::<AdminServiceServer<AdminServiceImpl>>()
            .await;

        tracing::info!(addr = ?listener.local_addr().ok(), "gRPC server listening");
        Server::builder()
            .add_service(health)
            .add_service(self.config_service(&cancel))
            .add_service(self.admin_service())
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                cancel.cancelled().await;
            })
            .await?;
        Ok(())
    }

    /// # Errors
    /// Returns an error if the server fails.
    pub async fn serve_http(
        &self,
        listener: TcpListener,
        cancel: CancellationToken,
    ) -> anyhow::Result<()> {
        tracing::info!(addr = ?listener.local_addr().ok(), "HTTP server listening");
        let shutdown = async move {
            cancel.cancelled().await;
            tracing::info!("HTTP server shutting down gracefully (cancellation)");
        };
        axum::serve(listener, self.http_router())
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| anyhow::anyhow!(e))
    }

    /// Recovers HA state, starts background work and serves both surfaces
    /// on the configured addresses until `cancel` fires.
    ///
    /// # Errors
    /// Returns an error if a listener cannot be bound or a server fails.
    pub async fn run(&self, cancel: CancellationToken) -> anyhow::Result<()> {
        self.recover().await;
        let background = self
            .spawn_background(&cancel)
            .await
            .context("failed to start background tasks")?;

        let grpc = TcpListener::bind(self.cfg.grpc_listen_addr)
            .await
            .with_context(|| format!("failed to bind gRPC on {}", self.cfg.grpc_listen_addr))?;
        let http = TcpListener::bind(self.cfg.http_listen_addr)
            .await
            .with_context(|| format!("failed to bind HTTP on {}", self.cfg.http_listen_addr))?;

        let served = tokio::try_join!(
            self.serve_grpc(grpc, cancel.clone()),
            self.serve_http(http, cancel.clone()),
        );
        // One server failing takes the whole instance down.
        cancel.cancel();
        for handle in background {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "background task ended abnormally");
            }
        }
        tracing::info!(instance = %self.instance_id, "control plane stopped");
        served?;
        Ok(())
    }
}
