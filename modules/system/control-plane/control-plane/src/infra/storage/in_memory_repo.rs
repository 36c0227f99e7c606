//! In-memory [`ConfigDatabase`] with an availability switch.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use control_plane_sdk::{MiddlewarePatchRecord, RouteAction};
use parking_lot::RwLock;
use serde_json::Value;

use crate::domain::error::DomainError;
use crate::domain::repo::{ConfigDatabase, ConfigDocument};

type RecordKey = (String, RouteAction, String);

#[derive(Default)]
struct State {
    document: Option<ConfigDocument>,
    records: BTreeMap<RecordKey, MiddlewarePatchRecord>,
}

/// Keeps the Config document and middleware records in process memory.
///
/// While switched off every call fails with
/// [`DomainError::DatabaseUnavailable`], which is how an outage looks to the
/// reconciler and the patch engine.
pub struct InMemoryConfigDatabase {
    state: RwLock<State>,
    active: AtomicBool,
}

impl Default for InMemoryConfigDatabase {
    fn default() -> Self {
        Self::new(true)
    }
}

impl InMemoryConfigDatabase {
    #[must_use]
    pub fn new(active: bool) -> Self {
        Self {
            state: RwLock::new(State::default()),
            active: AtomicBool::new(active),
        }
    }

    pub fn set_active(&self, active: bool) {
        let was = self.active.swap(active, Ordering::SeqCst);
        if was != active {
            tracing::info!(active, "config database availability changed");
        }
    }

    /// The stored document, regardless of availability.
    #[must_use]
    pub fn document(&self) -> Option<ConfigDocument> {
        self.state.read().document.clone()
    }

    /// Every stored record, regardless of availability.
    #[must_use]
    pub fn all_records(&self) -> Vec<MiddlewarePatchRecord> {
        self.state.read().records.values().cloned().collect()
    }

    fn ensure_active(&self) -> Result<(), DomainError> {
        if self.active.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DomainError::DatabaseUnavailable)
        }
    }
}

#[async_trait]
impl ConfigDatabase for InMemoryConfigDatabase {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn load_config_document(&self) -> Result<Option<ConfigDocument>, DomainError> {
        self.ensure_active()?;
        Ok(self.state.read().document.clone())
    }

    async fn save_config_document(&self, document: &ConfigDocument) -> Result<(), DomainError> {
        self.ensure_active()?;
        self.state.write().document = Some(document.clone());
        Ok(())
    }

    async fn set_module_config(&self, module: &str, config: &Value) -> Result<(), DomainError> {
        self.ensure_active()?;
        self.state
            .write()
            .document
            .get_or_insert_with(ConfigDocument::default)
            .module_configs
            .insert(module.to_owned(), config.clone());
        Ok(())
    }

    async fn middleware_records(
        &self,
        path: &str,
        action: RouteAction,
    ) -> Result<Vec<MiddlewarePatchRecord>, DomainError> {
        self.ensure_active()?;
        let mut records: Vec<MiddlewarePatchRecord> = self
            .state
            .read()
            .records
            .values()
            .filter(|r| r.path == path && r.action == action)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.position);
        Ok(records)
    }

    async fn upsert_middleware_record(
        &self,
        record: &MiddlewarePatchRecord,
    ) -> Result<(), DomainError> {
        self.ensure_active()?;
        let key = (
            record.path.clone(),
            record.action,
            record.middleware.clone(),
        );
        self.state.write().records.insert(key, record.clone());
        Ok(())
    }

    async fn delete_middleware_record(
        &self,
        path: &str,
        action: RouteAction,
        middleware: &str,
    ) -> Result<bool, DomainError> {
        self.ensure_active()?;
        let key = (path.to_owned(), action, middleware.to_owned());
        Ok(self.state.write().records.remove(&key).is_some())
    }
}
