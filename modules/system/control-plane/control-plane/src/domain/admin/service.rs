use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use control_plane_sdk::{ModuleDirectory, PathDefinition, RegisteredRouteSet, RouteAction};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use state_store::{BusMessage, MessageBus, StateStore, StateStoreExt};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::mounter::RouteMounter;
use super::patch::{OPERATOR_OWNER, check_removals, diff, plan_records, splice};
use super::scheduler::Debouncer;
use crate::config::AdminConfig;
use crate::domain::config_store::ConfigReloadHook;
use crate::domain::error::DomainError;
use crate::domain::keys::{ADMIN_KEY, ADMIN_TOPIC};
use crate::domain::repo::ConfigDatabase;

/// Route state persisted under the `admin` key.
#[derive(Debug, Default, Serialize, Deserialize)]
struct AdminState {
    #[serde(default)]
    routes: Vec<RegisteredRouteSet>,
}

/// (router url, path, action) of a route whose persisted middlewares were
/// re-applied since it was last registered.
type AppliedKey = (String, String, RouteAction);

/// Admin Route Registry and Middleware Patch Engine.
pub struct AdminRouteService {
    /// Route sets keyed by router url.
    routes: RwLock<BTreeMap<String, RegisteredRouteSet>>,
    applied: Mutex<HashSet<AppliedKey>>,
    directory: Arc<dyn ModuleDirectory>,
    mounter: Arc<dyn RouteMounter>,
    store: Arc<dyn StateStore>,
    bus: Arc<dyn MessageBus>,
    db: Arc<dyn ConfigDatabase>,
    debouncer: Debouncer,
    cfg: AdminConfig,
    instance_id: String,
    persist_lock: tokio::sync::Mutex<()>,
    // One patch at a time; a patch reads, diffs and writes the same records.
    patch_lock: tokio::sync::Mutex<()>,
}

impl AdminRouteService {
    #[must_use]
    pub fn new(
        directory: Arc<dyn ModuleDirectory>,
        mounter: Arc<dyn RouteMounter>,
        store: Arc<dyn StateStore>,
        bus: Arc<dyn MessageBus>,
        db: Arc<dyn ConfigDatabase>,
        instance_id: impl Into<String>,
        cfg: AdminConfig,
    ) -> Self {
        Self {
            routes: RwLock::new(BTreeMap::new()),
            applied: Mutex::new(HashSet::new()),
            directory,
            mounter,
            store,
            bus,
            db,
            debouncer: Debouncer::new(cfg.apply_debounce),
            cfg,
            instance_id: instance_id.into(),
            persist_lock: tokio::sync::Mutex::new(()),
            patch_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Replaces the route set a module serves from `router_url` (or from
    /// its registered url when none is given).
    ///
    /// Routes missing from the new set are unmounted; other urls are left
    /// alone. Persisted middleware patches are re-applied after the
    /// debounce delay.
    ///
    /// # Errors
    /// * `InvalidArgument` - no module name
    /// * `Internal` - the router url could not be resolved
    /// * `RouteMount` - a route conflicts with a mounted one
    pub async fn register_admin_route(
        self: &Arc<Self>,
        module_name: &str,
        router_url: Option<String>,
        routes: Vec<PathDefinition>,
    ) -> Result<(), DomainError> {
        if module_name.trim().is_empty() {
            return Err(DomainError::invalid_argument("module name is required"));
        }
        let url = match router_url.filter(|u| !u.trim().is_empty()) {
            Some(url) => url,
            None => self
                .directory
                .get_module_url_by_name(module_name)
                .await
                .map_err(|e| {
                    DomainError::internal(format!(
                        "cannot resolve router url of '{module_name}': {e}"
                    ))
                })?,
        };

        let set = RegisteredRouteSet {
            routes,
            url,
            module_name: module_name.to_owned(),
        };
        for route in &set.routes {
            tracing::info!(
                module = %set.module_name,
                action = %route.options.action,
                path = %route.options.path,
                grpc_function = %route.grpc_function_name,
                "mounting admin route"
            );
        }
        self.install(&set)?;
        self.applied.lock().retain(|(url, _, _)| *url != set.url);

        self.persist_route_set(&set).await?;
        self.publish_route_set(&set).await;
        self.schedule_apply();
        Ok(())
    }

    /// Replaces the middleware chain of the route registered for `path` and
    /// `action`.
    ///
    /// `caller_url` is the url of the calling module, if known. A caller may
    /// only remove middlewares it owns; operator calls may remove any.
    ///
    /// # Errors
    /// * `RouteNotFound` - no registered route matches
    /// * `DatabaseWaitTimedOut` - the database stayed down past the wait timeout
    /// * `MiddlewareOwnership` - the patch removes another module's middleware
    pub async fn patch_route_middlewares(
        &self,
        path: &str,
        action: RouteAction,
        middlewares: &[String],
        caller_url: Option<&str>,
    ) -> Result<(), DomainError> {
        let _guard = self.patch_lock.lock().await;

        let (url, module_name, current) =
            self.find_route(path, action)
                .ok_or_else(|| DomainError::RouteNotFound {
                    path: path.to_owned(),
                    action: action.to_string(),
                })?;
        self.wait_for_db().await?;

        let records = self.db.middleware_records(path, action).await?;
        let changes = diff(&current, middlewares);
        check_removals(&changes, &records, &url, caller_url)?;

        // Records first: a failed write leaves the live chain as it was and
        // a retried patch recomputes the plan from whatever did land.
        let plan = plan_records(
            path,
            action,
            middlewares,
            &changes,
            &records,
            caller_url.unwrap_or(OPERATOR_OWNER),
        );
        for middleware in &plan.deletes {
            self.db
                .delete_middleware_record(path, action, middleware)
                .await?;
        }
        for record in &plan.upserts {
            self.db.upsert_middleware_record(record).await?;
        }

        self.mounter
            .set_middlewares(&module_name, path, action, middlewares)?;
        let updated = {
            let mut routes = self.routes.write();
            let set = routes.get_mut(&url).ok_or_else(|| {
                DomainError::internal(format!("route set of {url} vanished during patch"))
            })?;
            for route in &mut set.routes {
                if route.matches(path, action) {
                    route.options.middlewares = middlewares.to_vec();
                }
            }
            set.clone()
        };
        self.applied
            .lock()
            .insert((url.clone(), path.to_owned(), action));

        tracing::info!(
            path = %path,
            %action,
            injected = ?changes.injected,
            removed = ?changes.removed,
            caller = caller_url.unwrap_or(OPERATOR_OWNER),
            "route middlewares patched"
        );
        self.persist_route_set(&updated).await?;
        self.publish_route_set(&updated).await;
        Ok(())
    }

    /// Re-applies persisted middleware records to every route that has not
    /// had them applied since it was last registered. Returns how many
    /// routes changed.
    ///
    /// Skips the whole pass if the database does not come up in time.
    pub async fn apply_persisted_patches(&self) -> usize {
        if let Err(e) = self.wait_for_db().await {
            tracing::warn!(error = %e, "skipping middleware re-application");
            return 0;
        }

        let pending: Vec<(String, PathDefinition)> = {
            let routes = self.routes.read();
            let applied = self.applied.lock();
            routes
                .values()
                .flat_map(|set| set.routes.iter().map(move |r| (set.url.clone(), r.clone())))
                .filter(|(url, r)| {
                    !applied.contains(&(url.clone(), r.options.path.clone(), r.options.action))
                })
                .collect()
        };

        let mut patched = 0;
        for (url, route) in pending {
            let (path, action) = (route.options.path.as_str(), route.options.action);
            let records = match self.db.middleware_records(path, action).await {
                Ok(records) => records,
                Err(e) => {
                    tracing::warn!(path = %path, %action, error = %e, "cannot read middleware records");
                    continue;
                }
            };
            self.applied
                .lock()
                .insert((url, path.to_owned(), action));
            if records.is_empty() {
                continue;
            }

            let chain = splice(&route.options.middlewares, &records);
            if chain == route.options.middlewares {
                continue;
            }
            match self.patch_route_middlewares(path, action, &chain, None).await {
                Ok(()) => patched += 1,
                Err(e) => {
                    tracing::warn!(path = %path, %action, error = %e, "failed to re-apply middlewares");
                }
            }
        }
        if patched > 0 {
            tracing::info!(patched, "persisted middleware patches re-applied");
        }
        patched
    }

    /// (Re)starts the debounce timer of the re-application pass.
    pub fn schedule_apply(self: &Arc<Self>) {
        let this = Arc::clone(self);
        self.debouncer.schedule(async move {
            this.apply_persisted_patches().await;
        });
    }

    /// Whether a re-application pass is waiting or running.
    #[must_use]
    pub fn apply_pending(&self) -> bool {
        self.debouncer.is_pending()
    }

    /// Stops the debounce timer for good.
    pub fn shutdown(&self) {
        self.debouncer.shutdown();
    }

    #[must_use]
    pub fn route_sets(&self) -> Vec<RegisteredRouteSet> {
        self.routes.read().values().cloned().collect()
    }

    /// Remounts every route set persisted under the `admin` key. Returns
    /// how many sets were restored.
    ///
    /// # Errors
    /// Returns an error if the persisted state cannot be read.
    pub async fn recover_from_store(self: &Arc<Self>) -> Result<usize, DomainError> {
        let state: AdminState = self.store.get_json(ADMIN_KEY).await?.unwrap_or_default();
        let mut restored = 0;
        for set in state.routes {
            match self.install(&set) {
                Ok(()) => restored += 1,
                Err(e) => {
                    tracing::warn!(url = %set.url, module = %set.module_name, error = %e, "skipping route set on recovery");
                }
            }
        }
        if restored > 0 {
            tracing::info!(restored, "admin routes recovered from shared state");
            self.schedule_apply();
        }
        Ok(restored)
    }

    /// Installs a route set broadcast by a sibling coordinator.
    pub fn apply_bus_message(&self, message: &BusMessage) {
        if message.is_from(&self.instance_id) {
            return;
        }
        let set = match serde_json::from_value::<RegisteredRouteSet>(message.payload.clone()) {
            Ok(set) => set,
            Err(e) => {
                tracing::debug!(error = %e, "ignoring malformed admin broadcast");
                return;
            }
        };
        match self.install(&set) {
            Ok(()) => {
                tracing::debug!(url = %set.url, from = %message.instance, "applied sibling route set");
            }
            Err(e) => {
                tracing::warn!(url = %set.url, error = %e, "failed to apply sibling route set");
            }
        }
    }

    /// # Errors
    /// Returns an error if the subscription cannot be opened.
    pub async fn spawn_bus_listener(
        self: &Arc<Self>,
        cancel: CancellationToken,
    ) -> Result<JoinHandle<()>, DomainError> {
        let mut sub = self.bus.subscribe(ADMIN_TOPIC).await?;
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

    /// Swaps `set` in for its predecessor under the same url.
    ///
    /// Routes the new set drops are unmounted first so a reshaped path
    /// (`/rooms/:id` -> `/rooms/:roomId`) does not conflict with its old
    /// self. If any mount fails, every route touched here is put back the
    /// way the registry still describes it.
    fn install(&self, set: &RegisteredRouteSet) -> Result<(), DomainError> {
        let previous = self.routes.read().get(&set.url).cloned();

        let mut dropped = Vec::new();
        if let Some(previous) = &previous {
            for route in &previous.routes {
                let (path, action) = (route.options.path.as_str(), route.options.action);
                let kept = previous.module_name == set.module_name
                    && set.routes.iter().any(|r| r.matches(path, action));
                if !kept && !self.mounted_elsewhere(&set.url, &previous.module_name, path, action) {
                    self.mounter.unmount(&previous.module_name, path, action);
                    dropped.push((previous.module_name.clone(), path.to_owned(), action));
                }
            }
        }

        let mut mounted = Vec::with_capacity(set.routes.len());
        for route in &set.routes {
            if let Err(e) = self.mounter.mount(&set.module_name, &set.url, route) {
                for (module, path, action) in mounted.iter().chain(&dropped) {
                    self.restore_mount(module, path, *action);
                }
                return Err(e);
            }
            mounted.push((
                set.module_name.clone(),
                route.options.path.clone(),
                route.options.action,
            ));
        }

        for (module, path, action) in &dropped {
            tracing::info!(module = %module, %action, path = %path, "admin route removed");
        }
        self.routes.write().insert(set.url.clone(), set.clone());
        Ok(())
    }

    /// Remounts whatever registered set owns (module, path, action), or
    /// unmounts it when none does.
    fn restore_mount(&self, module_name: &str, path: &str, action: RouteAction) {
        let owner = self
            .routes
            .read()
            .values()
            .filter(|set| set.module_name == module_name)
            .find_map(|set| {
                set.routes
                    .iter()
                    .find(|r| r.matches(path, action))
                    .map(|route| (set.url.clone(), route.clone()))
            });
        match owner {
            Some((url, route)) => {
                if let Err(e) = self.mounter.mount(module_name, &url, &route) {
                    tracing::warn!(module = %module_name, %action, path = %path, error = %e, "failed to restore admin route");
                }
            }
            None => {
                self.mounter.unmount(module_name, path, action);
            }
        }
    }

    fn mounted_elsewhere(&self, url: &str, module_name: &str, path: &str, action: RouteAction) -> bool {
        self.routes.read().iter().any(|(other, set)| {
            other != url
                && set.module_name == module_name
                && set.routes.iter().any(|r| r.matches(path, action))
        })
    }

    fn find_route(&self, path: &str, action: RouteAction) -> Option<(String, String, Vec<String>)> {
        let routes = self.routes.read();
        routes.values().find_map(|set| {
            set.routes
                .iter()
                .find(|r| r.matches(path, action))
                .map(|r| {
                    (
                        set.url.clone(),
                        set.module_name.clone(),
                        r.options.middlewares.clone(),
                    )
                })
        })
    }

    async fn wait_for_db(&self) -> Result<(), DomainError> {
        let deadline = Instant::now() + self.cfg.db_wait_timeout;
        while !self.db.is_active() {
            if Instant::now() >= deadline {
                return Err(DomainError::DatabaseWaitTimedOut(self.cfg.db_wait_timeout));
            }
            tokio::time::sleep(self.cfg.db_poll_interval).await;
        }
        Ok(())
    }

    /// Replaces the entry for `set.url` in the `admin` key, keeping others.
    async fn persist_route_set(&self, set: &RegisteredRouteSet) -> Result<(), DomainError> {
        let _guard = self.persist_lock.lock().await;
        let mut state: AdminState = self.store.get_json(ADMIN_KEY).await?.unwrap_or_default();
        match state.routes.iter_mut().find(|s| s.url == set.url) {
            Some(existing) => *existing = set.clone(),
            None => state.routes.push(set.clone()),
        }
        self.store.set_json(ADMIN_KEY, &state).await?;
        Ok(())
    }

    async fn publish_route_set(&self, set: &RegisteredRouteSet) {
        let payload = match serde_json::to_value(set) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "failed to encode route set");
                return;
            }
        };
        if let Err(e) = self
            .bus
            .publish(ADMIN_TOPIC, BusMessage::new(self.instance_id.clone(), payload))
            .await
        {
            tracing::warn!(url = %set.url, error = %e, "failed to broadcast route set");
        }
    }
}

/// Re-runs the middleware pass when the `admin` module config changes.
pub struct AdminReloadHook(pub Arc<AdminRouteService>);

impl ConfigReloadHook for AdminReloadHook {
    fn on_config_reload(&self, _module: &str, _config: &Value) {
        self.0.schedule_apply();
    }
}
