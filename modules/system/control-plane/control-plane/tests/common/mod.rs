#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use control_plane::domain::probe::ModuleProbe;
use control_plane::{ControlPlane, ControlPlaneConfig, DomainError, InMemoryConfigDatabase};
use control_plane_sdk::{HealthStatus, PathDefinition, RouteAction, RouteOptions};
use parking_lot::Mutex;
use state_store::InMemoryStateStore;

pub const CHAT_URL: &str = "10.0.0.5:5000";
pub const AUTH_URL: &str = "10.0.0.6:6000";
pub const SERVING: i32 = 1;
pub const NOT_SERVING: i32 = 2;

/// Probe that answers `Serving` unless told a module is down.
#[derive(Default)]
pub struct StaticProbe {
    down: Mutex<HashSet<String>>,
    calls: AtomicUsize,
}

impl StaticProbe {
    pub fn set_down(&self, module: &str, down: bool) {
        let mut set = self.down.lock();
        if down {
            set.insert(module.to_owned());
        } else {
            set.remove(module);
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModuleProbe for StaticProbe {
    async fn check(&self, module: &str, address: &str) -> Result<HealthStatus, DomainError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.lock().contains(module) {
            return Err(DomainError::ModuleUnresponsive {
                module: module.to_owned(),
                address: address.to_owned(),
                reason: "connection refused".to_owned(),
            });
        }
        Ok(HealthStatus::Serving)
    }
}

/// One coordinator instance plus handles to its doubles.
pub struct Node {
    pub cp: ControlPlane,
    pub probe: Arc<StaticProbe>,
    pub db: Arc<InMemoryConfigDatabase>,
    pub store: InMemoryStateStore,
}

pub fn config(instance: &str) -> ControlPlaneConfig {
    ControlPlaneConfig {
        instance_id: Some(instance.to_owned()),
        ..ControlPlaneConfig::default()
    }
}

/// A node on `store` with its own database.
pub fn node(store: &InMemoryStateStore, instance: &str) -> Node {
    node_with_db(store, Arc::new(InMemoryConfigDatabase::default()), instance)
}

/// A node on `store` sharing `db` with its siblings.
pub fn node_with_db(
    store: &InMemoryStateStore,
    db: Arc<InMemoryConfigDatabase>,
    instance: &str,
) -> Node {
    let probe = Arc::new(StaticProbe::default());
    let cp = ControlPlane::new(
        config(instance),
        Arc::new(store.clone()),
        Arc::new(store.clone()),
        db.clone(),
        probe.clone(),
    );
    Node {
        cp,
        probe,
        db,
        store: store.clone(),
    }
}

pub fn route(path: &str, action: RouteAction, middlewares: &[&str]) -> PathDefinition {
    PathDefinition::new(
        RouteOptions::new(path, action).with_middlewares(middlewares.iter().copied()),
        "Handle",
    )
}

pub fn names(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| (*s).to_owned()).collect()
}

/// Polls `check` until it holds, failing the test after two seconds.
pub async fn eventually<F>(mut check: F)
where
    F: FnMut() -> bool,
{
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached in time");
}
