use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use control_plane_sdk::{ControlPlaneError, HealthStatus, ModuleDirectory, RegisteredModule};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use state_store::{BusMessage, MessageBus, StateStore, StateStoreExt};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::table::{RegistryTable, SweepOutcome};
use crate::config::HealthConfig;
use crate::domain::error::DomainError;
use crate::domain::events::{ModuleEvents, ModuleSnapshot};
use crate::domain::keys::{CONFIG_KEY, CONFIG_TOPIC};
use crate::domain::probe::ModuleProbe;

/// HA snapshot stored under the `config` key.
#[derive(Debug, Default, Serialize, Deserialize)]
struct HaSnapshot {
    #[serde(default)]
    modules: Vec<HaModuleRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HaModuleRecord {
    name: String,
    url: String,
    #[serde(default)]
    instance: String,
    /// Fields other writers attached to the record (config schemas etc).
    #[serde(flatten)]
    extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RegistryEventKind {
    Register,
    Health,
}

/// Registry payload on the `config` topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RegistryEvent {
    #[serde(rename = "type")]
    kind: RegistryEventKind,
    name: String,
    url: String,
    instance: String,
    #[serde(default)]
    status: HealthStatus,
}

/// Service Registry and Health Monitor.
///
/// Owns the module and health tables; everything else gets copies through
/// [`ModuleDirectory`] or the snapshot accessors.
pub struct RegistryService {
    table: Mutex<RegistryTable>,
    probe: Arc<dyn ModuleProbe>,
    store: Arc<dyn StateStore>,
    bus: Arc<dyn MessageBus>,
    events: ModuleEvents,
    instance_id: String,
    cfg: HealthConfig,
    // Serializes read-modify-write of the `config` key on this instance.
    persist_lock: tokio::sync::Mutex<()>,
}

impl RegistryService {
    #[must_use]
    pub fn new(
        probe: Arc<dyn ModuleProbe>,
        store: Arc<dyn StateStore>,
        bus: Arc<dyn MessageBus>,
        instance_id: impl Into<String>,
        cfg: HealthConfig,
    ) -> Self {
        Self {
            table: Mutex::new(RegistryTable::default()),
            probe,
            store,
            bus,
            events: ModuleEvents::new(),
            instance_id: instance_id.into(),
            cfg,
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Registers (or refreshes) a module instance.
    ///
    /// Unknown modules are probed before they are accepted; known ones are
    /// trusted on their claimed status.
    ///
    /// # Errors
    /// * `InvalidArgument` - bad status, empty name or unusable url
    /// * `ModuleUnresponsive` - first registration and the probe failed
    /// * `StateStore` - the HA snapshot could not be written
    pub async fn register_module(
        &self,
        name: &str,
        url: &str,
        status: i32,
        peer: Option<SocketAddr>,
    ) -> Result<bool, DomainError> {
        let status = HealthStatus::try_from(status)?;
        if name.trim().is_empty() {
            return Err(DomainError::invalid_argument("module name is required"));
        }
        let address = resolve_address(url, peer)?;

        let known = self.table.lock().contains(name);
        if !known {
            self.probe.check(name, &address).await?;
        }

        let changed = self
            .table
            .lock()
            .upsert(name, &address, status, Instant::now());
        tracing::info!(module = %name, address = %address, ?status, changed, "module registered");

        self.persist_instance(name, &address).await?;
        if changed {
            self.emit_snapshot();
        }
        self.publish(RegistryEventKind::Register, name, &address, status)
            .await;
        Ok(true)
    }

    /// Out-of-band heartbeat from a registered module instance.
    ///
    /// `url` is normalized the same way as on registration, so the
    /// heartbeat refreshes the instance the registration created.
    ///
    /// # Errors
    /// * `InvalidArgument` - bad status or unusable url
    /// * `ModuleNotFound` - the module is not registered (for instance after
    ///   the sweep pruned it); the module has to register again
    pub async fn module_health_probe(
        &self,
        name: &str,
        url: &str,
        status: i32,
        peer: Option<SocketAddr>,
    ) -> Result<(), DomainError> {
        let status = HealthStatus::try_from(status)?;
        let address = resolve_address(url, peer)?;
        let changed = self
            .table
            .lock()
            .record_health(name, &address, status, Instant::now())
            .ok_or_else(|| DomainError::ModuleNotFound(name.to_owned()))?;

        tracing::trace!(module = %name, address = %address, ?status, "health probe");
        if changed {
            self.emit_snapshot();
        }
        self.publish(RegistryEventKind::Health, name, &address, status)
            .await;
        Ok(())
    }

    /// Runs one health sweep. Watchers get at most one update per sweep.
    pub async fn sweep_once(&self) -> SweepOutcome {
        let outcome = self
            .table
            .lock()
            .sweep(Instant::now(), self.cfg.staleness_window);

        if !outcome.removed_instances.is_empty() {
            tracing::info!(
                removed_instances = outcome.removed_instances.len(),
                removed_modules = ?outcome.removed_modules,
                "health sweep pruned instances"
            );
            if let Err(e) = self.forget_instances(&outcome.removed_instances).await {
                tracing::warn!(error = %e, "failed to prune HA snapshot");
            }
        }
        if outcome.changed {
            self.emit_snapshot();
        }
        outcome
    }

    /// Sweeps every `sweep_interval` until cancelled.
    pub async fn run_sweep_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.cfg.sweep_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
            }
        }
        tracing::debug!("health sweep stopped");
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<RegisteredModule> {
        self.table.lock().snapshot()
    }

    /// Current snapshot plus a receiver for every later change.
    #[must_use]
    pub fn watch(&self) -> (Vec<RegisteredModule>, broadcast::Receiver<ModuleSnapshot>) {
        // Subscribe before reading so no update slips in between.
        let rx = self.events.subscribe();
        (self.snapshot(), rx)
    }

    /// Last known health record of one instance, for diagnostics.
    #[must_use]
    pub fn instance_status(&self, name: &str, address: &str) -> Option<HealthStatus> {
        self.table
            .lock()
            .instance(name, address)
            .map(|r| r.status)
    }

    /// Reloads the HA snapshot and re-admits every module that still
    /// answers its probe. Returns how many were restored.
    ///
    /// # Errors
    /// Returns an error if the snapshot cannot be read.
    pub async fn recover_from_store(&self) -> Result<usize, DomainError> {
        let snapshot: HaSnapshot = self.store.get_json(CONFIG_KEY).await?.unwrap_or_default();
        let mut restored = 0;

        for record in snapshot.modules {
            match self.probe.check(&record.name, &record.url).await {
                Ok(status) => {
                    self.table
                        .lock()
                        .upsert(&record.name, &record.url, status, Instant::now());
                    restored += 1;
                }
                Err(e) => {
                    tracing::warn!(module = %record.name, url = %record.url, error = %e, "skipping module on recovery");
                }
            }
        }
        if restored > 0 {
            tracing::info!(restored, "modules recovered from shared state");
            self.emit_snapshot();
        }
        Ok(restored)
    }

    /// Applies a registry event published by a sibling coordinator.
    pub fn apply_bus_message(&self, message: &BusMessage) {
        if message.is_from(&self.instance_id) {
            return;
        }
        let Ok(event) = serde_json::from_value::<RegistryEvent>(message.payload.clone()) else {
            return;
        };

        let now = Instant::now();
        let changed = match event.kind {
            RegistryEventKind::Register => {
                self.table
                    .lock()
                    .upsert(&event.name, &event.url, event.status, now)
            }
            RegistryEventKind::Health => self
                .table
                .lock()
                .record_health(&event.name, &event.url, event.status, now)
                .unwrap_or(false),
        };
        tracing::debug!(module = %event.name, from = %message.instance, changed, "applied sibling registry event");
        if changed {
            self.emit_snapshot();
        }
    }

    /// Subscribes to the `config` topic and applies sibling events until
    /// cancelled.
    ///
    /// # Errors
    /// Returns an error if the subscription cannot be opened.
    pub async fn spawn_bus_listener(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, DomainError> {
        let mut sub = self.bus.subscribe(CONFIG_TOPIC).await?;
        let this = Arc::clone(self);
        Ok(tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    msg = sub.recv() => match msg {
                        Some(msg) => this.apply_bus_message(&msg),
                        None => break,
                    },
                }
            }
        }))
    }

    fn emit_snapshot(&self) {
        let snapshot: ModuleSnapshot = self.snapshot().into();
        self.events.emit(snapshot);
    }

    async fn publish(&self, kind: RegistryEventKind, name: &str, url: &str, status: HealthStatus) {
        let event = RegistryEvent {
            kind,
            name: name.to_owned(),
            url: url.to_owned(),
            instance: self.instance_id.clone(),
            status,
        };
        let payload = match serde_json::to_value(&event) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode registry event");
                return;
            }
        };
        if let Err(e) = self
            .bus
            .publish(CONFIG_TOPIC, BusMessage::new(self.instance_id.clone(), payload))
            .await
        {
            tracing::warn!(error = %e, module = %name, "failed to broadcast registry event");
        }
    }

    /// Upserts this instance into the HA snapshot, keeping whatever else
    /// other writers stored on the record.
    async fn persist_instance(&self, name: &str, url: &str) -> Result<(), DomainError> {
        let _guard = self.persist_lock.lock().await;
        let mut snapshot: HaSnapshot = self.store.get_json(CONFIG_KEY).await?.unwrap_or_default();

        if let Some(record) = snapshot
            .modules
            .iter_mut()
            .find(|r| r.name == name && r.url == url)
        {
            record.instance.clone_from(&self.instance_id);
        } else {
            snapshot.modules.push(HaModuleRecord {
                name: name.to_owned(),
                url: url.to_owned(),
                instance: self.instance_id.clone(),
                extra: Map::new(),
            });
        }
        self.store.set_json(CONFIG_KEY, &snapshot).await?;
        Ok(())
    }

    async fn forget_instances(&self, removed: &[(String, String)]) -> Result<(), DomainError> {
        let _guard = self.persist_lock.lock().await;
        let Some(mut snapshot) = self.store.get_json::<HaSnapshot>(CONFIG_KEY).await? else {
            return Ok(());
        };
        snapshot
            .modules
            .retain(|r| !removed.iter().any(|(n, u)| *n == r.name && *u == r.url));
        self.store.set_json(CONFIG_KEY, &snapshot).await?;
        Ok(())
    }
}

/// Normalizes a registration url into `host:port`.
///
/// A wildcard or missing host is replaced by the caller's peer address, so
/// modules listening on `0.0.0.0` register with a reachable address.
fn resolve_address(url: &str, peer: Option<SocketAddr>) -> Result<String, DomainError> {
    let url = url.trim();
    let url = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))
        .unwrap_or(url);
    if url.is_empty() {
        return Err(DomainError::invalid_argument("module url is required"));
    }

    let (host, port) = url
        .rsplit_once(':')
        .ok_or_else(|| DomainError::invalid_argument(format!("url '{url}' has no port")))?;
    let port: u16 = port
        .parse()
        .map_err(|_| DomainError::invalid_argument(format!("url '{url}' has an invalid port")))?;

    let wildcard = matches!(host, "" | "0.0.0.0" | "[::]" | "::");
    match (wildcard, peer) {
        (true, Some(peer)) => Ok(SocketAddr::new(peer.ip(), port).to_string()),
        _ => Ok(url.to_owned()),
    }
}

#[async_trait]
impl ModuleDirectory for RegistryService {
    async fn get_module_url_by_name(&self, name: &str) -> Result<String, ControlPlaneError> {
        self.table
            .lock()
            .address_of(name)
            .ok_or_else(|| DomainError::ModuleNotFound(name.to_owned()).into())
    }

    async fn module_exists(&self, name: &str) -> Result<String, ControlPlaneError> {
        self.get_module_url_by_name(name).await
    }

    async fn list_modules(&self) -> Result<Vec<RegisteredModule>, ControlPlaneError> {
        Ok(self.snapshot())
    }
}
