use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use control_plane_sdk::{ConfigApi, ControlPlaneError, ServerConfig};
use parking_lot::{Mutex, RwLock};
use rand::Rng;
use serde_json::{Map, Value};
use state_store::{BusMessage, BusSubscription, MessageBus, StateStore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::merge::{fill_missing, overlay};
use super::server_config::ServerConfigCache;
use crate::config::ReconcileConfig;
use crate::domain::error::DomainError;
use crate::domain::keys::{
    CONFIG_TOPIC, MODULE_CONFIGS_KEY, RECONCILE_DONE, RECONCILING, config_update_topic,
    module_config_key,
};
use crate::domain::repo::{ConfigDocument, ConfigDatabase};

/// Module whose config carries the server-wide settings.
pub const CORE_MODULE: &str = "core";

/// In-process callback fired after a module's config changes.
pub trait ConfigReloadHook: Send + Sync {
    fn on_config_reload(&self, module: &str, config: &Value);
}

/// Config Store and Reconciler.
///
/// The shared state store is authoritative for reads; the database gets a
/// best-effort mirror, with a queue of module names bridging the gaps while
/// it is down.
pub struct ConfigStoreService {
    store: Arc<dyn StateStore>,
    bus: Arc<dyn MessageBus>,
    db: Arc<dyn ConfigDatabase>,
    queue: Mutex<BTreeSet<String>>,
    /// When some instance (this one or a sibling) last announced it is
    /// reconciling. This is a hint for readers and for skipping overlapping
    /// passes, not a lock: two instances may still reconcile at once, which
    /// is harmless because every pass re-reads the state store.
    reconciling_since: Mutex<Option<Instant>>,
    db_synced: AtomicBool,
    hooks: RwLock<HashMap<String, Arc<dyn ConfigReloadHook>>>,
    server_config: Arc<ServerConfigCache>,
    instance_id: String,
    cfg: ReconcileConfig,
    bulk_lock: tokio::sync::Mutex<()>,
}

impl ConfigStoreService {
    #[must_use]
    pub fn new(
        store: Arc<dyn StateStore>,
        bus: Arc<dyn MessageBus>,
        db: Arc<dyn ConfigDatabase>,
        instance_id: impl Into<String>,
        cfg: ReconcileConfig,
    ) -> Self {
        let server_config = Arc::new(ServerConfigCache::default());
        let mut hooks: HashMap<String, Arc<dyn ConfigReloadHook>> = HashMap::new();
        hooks.insert(CORE_MODULE.to_owned(), server_config.clone());

        Self {
            store,
            bus,
            db,
            queue: Mutex::new(BTreeSet::new()),
            reconciling_since: Mutex::new(None),
            db_synced: AtomicBool::new(false),
            hooks: RwLock::new(hooks),
            server_config,
            instance_id: instance_id.into(),
            cfg,
            bulk_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Registers the reload callback of a well-known module (`core`, `admin`).
    pub fn on_reload(&self, module: impl Into<String>, hook: Arc<dyn ConfigReloadHook>) {
        self.hooks.write().insert(module.into(), hook);
    }

    /// Reads a module config from the state store. Never touches the
    /// database.
    ///
    /// # Errors
    /// * `ConfigNotSet` - nothing stored for the module
    pub async fn get(&self, module: &str) -> Result<Value, DomainError> {
        self.store
            .get(&module_config_key(module))
            .await?
            .ok_or_else(|| DomainError::ConfigNotSet(module.to_owned()))
    }

    /// Stores a module config.
    ///
    /// The state store write is awaited; the database mirror is best effort
    /// and a failure there only queues the module for reconciliation.
    ///
    /// # Errors
    /// * `InvalidArgument` - `config` is not a JSON object
    /// * `StateStore` - the state store write failed
    pub async fn set(&self, module: &str, config: Value) -> Result<Value, DomainError> {
        if module.is_empty() {
            return Err(DomainError::invalid_argument("module name is required"));
        }
        if !config.is_object() {
            return Err(DomainError::invalid_argument(format!(
                "config of '{module}' must be a JSON object"
            )));
        }

        self.store
            .set(&module_config_key(module), config.clone())
            .await?;
        self.update_bulk(module, &config).await?;

        self.mirror_to_db(module, &config).await;
        self.publish(
            &config_update_topic(module),
            BusMessage::new(self.instance_id.clone(), config.clone()),
        )
        .await;
        self.run_hook(module, &config);

        tracing::debug!(module = %module, "config stored");
        Ok(config)
    }

    /// Merges `fields` under the stored config of `module`; stored values
    /// win.
    ///
    /// # Errors
    /// * `InvalidArgument` - `fields` is not a JSON object
    /// * `StateStore` - the state store read or write failed
    pub async fn add_fields(&self, module: &str, fields: Value) -> Result<Value, DomainError> {
        let Value::Object(fields) = fields else {
            return Err(DomainError::invalid_argument(format!(
                "fields for '{module}' must be a JSON object"
            )));
        };
        let existing = match self.store.get(&module_config_key(module)).await? {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        let merged = fill_missing(&existing, &fields);
        self.set(module, Value::Object(merged)).await
    }

    /// `hostUrl` and `env` of the `core` module config.
    ///
    /// Served from the reload cache once `core` has been set on any
    /// instance; falls back to the bulk `moduleConfigs` key otherwise.
    ///
    /// # Errors
    /// * `ConfigNotSet` - the `core` module has no config yet
    pub async fn server_config(&self) -> Result<ServerConfig, DomainError> {
        if let Some(cached) = self.server_config.get() {
            return Ok(cached);
        }
        let bulk = self.store.get(MODULE_CONFIGS_KEY).await?;
        let core = match bulk.as_ref().and_then(|b| b.get(CORE_MODULE)) {
            Some(core) => core.clone(),
            None => self.get(CORE_MODULE).await?,
        };
        let server = ServerConfigCache::extract(&core);
        self.server_config.store(server.clone());
        Ok(server)
    }

    /// Module names waiting for the database.
    #[must_use]
    pub fn pending_reconciliation(&self) -> Vec<String> {
        self.queue.lock().iter().cloned().collect()
    }

    /// Whether a reconciliation pass is announced and not yet done. Stale
    /// announcements expire after `wait_timeout`.
    #[must_use]
    pub fn is_reconciling(&self) -> bool {
        self.reconciling_since
            .lock()
            .is_some_and(|since| since.elapsed() < self.cfg.wait_timeout)
    }

    /// Polls until no reconciliation is announced.
    pub async fn wait_for_reconcile(&self) {
        while self.is_reconciling() {
            tokio::time::sleep(self.cfg.wait_poll_interval).await;
        }
    }

    /// Copies every queued module's state store value into the database.
    /// Returns how many modules were written.
    ///
    /// Skips the pass while the database is down or another instance
    /// announced a pass of its own. Modules that fail go back on the queue.
    pub async fn reconcile_once(&self) -> usize {
        if !self.db.is_active() || self.queue.lock().is_empty() {
            return 0;
        }
        if self.is_reconciling() {
            tracing::debug!("reconciliation already announced, skipping pass");
            return 0;
        }

        *self.reconciling_since.lock() = Some(Instant::now());
        self.announce(RECONCILING).await;

        let pending = std::mem::take(&mut *self.queue.lock());
        let mut written = 0;
        for module in pending {
            match self.copy_to_db(&module).await {
                Ok(()) => written += 1,
                Err(e) => {
                    tracing::warn!(module = %module, error = %e, "reconciliation failed, requeued");
                    self.queue.lock().insert(module);
                }
            }
        }

        *self.reconciling_since.lock() = None;
        self.announce(RECONCILE_DONE).await;
        tracing::info!(written, "reconciliation pass finished");
        written
    }

    /// Syncs the database document with the state store after the database
    /// (re)connects.
    ///
    /// A missing document is created from the state store. An existing one
    /// gets the state store values laid over it, and modules only the
    /// database knows are copied back into the state store.
    ///
    /// # Errors
    /// Returns an error if either side cannot be read or written.
    pub async fn first_sync(&self) -> Result<(), DomainError> {
        self.wait_for_reconcile().await;

        let prefix = format!("{MODULE_CONFIGS_KEY}.");
        let mut known = BTreeMap::new();
        for key in self.store.keys(&prefix).await? {
            if let (Some(module), Some(config)) =
                (key.strip_prefix(&prefix), self.store.get(&key).await?)
            {
                known.insert(module.to_owned(), config);
            }
        }

        let document = match self.db.load_config_document().await? {
            None => {
                tracing::info!(modules = known.len(), "creating config document");
                ConfigDocument {
                    module_configs: known.clone(),
                }
            }
            Some(existing) => {
                for (module, config) in &existing.module_configs {
                    if !known.contains_key(module) {
                        self.store
                            .set(&module_config_key(module), config.clone())
                            .await?;
                        self.update_bulk(module, config).await?;
                    }
                }
                ConfigDocument {
                    module_configs: overlay(existing.module_configs, &known),
                }
            }
        };
        self.db.save_config_document(&document).await?;

        let mut queue = self.queue.lock();
        for module in known.keys() {
            queue.remove(module);
        }
        Ok(())
    }

    /// One reconciler cycle: first sync after a (re)connect, then a pass.
    pub async fn tick(&self) {
        if !self.db.is_active() {
            if self.db_synced.swap(false, Ordering::SeqCst) {
                tracing::warn!("database went inactive, queueing config writes");
            }
            return;
        }

        if !self.db_synced.load(Ordering::SeqCst) {
            match self.first_sync().await {
                Ok(()) => {
                    self.db_synced.store(true, Ordering::SeqCst);
                    tracing::info!("config document synced with state store");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "first database sync failed");
                    return;
                }
            }
        }

        self.reconcile_once().await;
    }

    /// Ticks every `interval` plus jitter until cancelled.
    pub async fn run_reconcile_loop(self: Arc<Self>, cancel: CancellationToken) {
        loop {
            let delay = self.cfg.interval + self.jitter();
            tokio::select! {
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(delay) => self.tick().await,
            }
        }
        tracing::debug!("reconciler stopped");
    }

    /// Follows sibling reconciliation hints and config updates of modules
    /// with a reload hook.
    ///
    /// # Errors
    /// Returns an error if a subscription cannot be opened.
    pub async fn spawn_bus_listeners(
        self: &Arc<Self>,
        cancel: &CancellationToken,
    ) -> Result<Vec<JoinHandle<()>>, DomainError> {
        let mut handles = Vec::new();

        let sub = self.bus.subscribe(CONFIG_TOPIC).await?;
        let this = Arc::clone(self);
        handles.push(spawn_listener(sub, cancel.clone(), move |msg| {
            this.apply_reconcile_hint(&msg);
        }));

        let modules: Vec<String> = self.hooks.read().keys().cloned().collect();
        for module in modules {
            let sub = self.bus.subscribe(&config_update_topic(&module)).await?;
            let this = Arc::clone(self);
            handles.push(spawn_listener(sub, cancel.clone(), move |msg| {
                if !msg.is_from(&this.instance_id) {
                    this.run_hook(&module, &msg.payload);
                }
            }));
        }
        Ok(handles)
    }

    /// Tracks a sibling's `reconciling` / `reconcile-done` announcement.
    pub fn apply_reconcile_hint(&self, message: &BusMessage) {
        if message.is_from(&self.instance_id) {
            return;
        }
        match message.payload.as_str() {
            Some(RECONCILING) => *self.reconciling_since.lock() = Some(Instant::now()),
            Some(RECONCILE_DONE) => *self.reconciling_since.lock() = None,
            _ => {}
        }
    }

    fn jitter(&self) -> Duration {
        let max = u64::try_from(self.cfg.max_jitter.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::rng().random_range(0..=max))
    }

    fn run_hook(&self, module: &str, config: &Value) {
        let hook = self.hooks.read().get(module).cloned();
        if let Some(hook) = hook {
            tracing::info!(module = %module, "config reload");
            hook.on_config_reload(module, config);
        }
    }

    async fn mirror_to_db(&self, module: &str, config: &Value) {
        if !self.db.is_active() {
            self.queue.lock().insert(module.to_owned());
            return;
        }
        if let Err(e) = self.db.set_module_config(module, config).await {
            tracing::warn!(module = %module, error = %e, "database write failed, queued for reconciliation");
            self.queue.lock().insert(module.to_owned());
        }
    }

    async fn copy_to_db(&self, module: &str) -> Result<(), DomainError> {
        match self.store.get(&module_config_key(module)).await? {
            Some(config) => self.db.set_module_config(module, &config).await,
            None => Ok(()),
        }
    }

    async fn update_bulk(&self, module: &str, config: &Value) -> Result<(), DomainError> {
        let _guard = self.bulk_lock.lock().await;
        let mut bulk = match self.store.get(MODULE_CONFIGS_KEY).await? {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        bulk.insert(module.to_owned(), config.clone());
        self.store
            .set(MODULE_CONFIGS_KEY, Value::Object(bulk))
            .await?;
        Ok(())
    }

    async fn announce(&self, state: &str) {
        self.publish(
            CONFIG_TOPIC,
            BusMessage::new(self.instance_id.clone(), Value::String(state.to_owned())),
        )
        .await;
    }

    async fn publish(&self, topic: &str, message: BusMessage) {
        if let Err(e) = self.bus.publish(topic, message).await {
            tracing::warn!(topic = %topic, error = %e, "bus publish failed");
        }
    }
}

fn spawn_listener<F>(mut sub: BusSubscription, cancel: CancellationToken, handler: F) -> JoinHandle<()>
where
    F: Fn(BusMessage) + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                msg = sub.recv() => match msg {
                    Some(msg) => handler(msg),
                    None => break,
                },
            }
        }
    })
}

#[async_trait]
impl ConfigApi for ConfigStoreService {
    async fn get_config(&self, module: &str) -> Result<Value, ControlPlaneError> {
        Ok(self.get(module).await?)
    }

    async fn update_config(&self, module: &str, config: Value) -> Result<Value, ControlPlaneError> {
        Ok(self.set(module, config).await?)
    }

    async fn add_fields_to_config(
        &self,
        module: &str,
        fields: Value,
    ) -> Result<Value, ControlPlaneError> {
        Ok(self.add_fields(module, fields).await?)
    }
}
