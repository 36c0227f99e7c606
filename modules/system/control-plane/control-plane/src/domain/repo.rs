//! Durable database collaborator.

use std::collections::BTreeMap;

use async_trait::async_trait;
use control_plane_sdk::{MiddlewarePatchRecord, RouteAction};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::DomainError;

/// The single Config document kept in the database.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigDocument {
    #[serde(default)]
    pub module_configs: BTreeMap<String, Value>,
}

/// Durable storage for module configs and middleware patch records.
///
/// The database may be unavailable for stretches of time; callers check
/// [`ConfigDatabase::is_active`] and treat every call as fallible.
#[async_trait]
pub trait ConfigDatabase: Send + Sync {
    /// Whether the database connection is currently up.
    fn is_active(&self) -> bool;

    /// Loads the Config document, if one was ever created.
    ///
    /// # Errors
    /// Returns [`DomainError::DatabaseUnavailable`] while the database is down.
    async fn load_config_document(&self) -> Result<Option<ConfigDocument>, DomainError>;

    /// Writes the whole Config document.
    ///
    /// # Errors
    /// Returns [`DomainError::DatabaseUnavailable`] while the database is down.
    async fn save_config_document(&self, document: &ConfigDocument) -> Result<(), DomainError>;

    /// Writes one module's entry into the Config document, creating the
    /// document if needed.
    ///
    /// # Errors
    /// Returns [`DomainError::DatabaseUnavailable`] while the database is down.
    async fn set_module_config(&self, module: &str, config: &Value) -> Result<(), DomainError>;

    /// Records persisted for one route, ordered by position.
    ///
    /// # Errors
    /// Returns [`DomainError::DatabaseUnavailable`] while the database is down.
    async fn middleware_records(
        &self,
        path: &str,
        action: RouteAction,
    ) -> Result<Vec<MiddlewarePatchRecord>, DomainError>;

    /// Inserts or replaces the record keyed by (path, action, middleware).
    ///
    /// # Errors
    /// Returns [`DomainError::DatabaseUnavailable`] while the database is down.
    async fn upsert_middleware_record(
        &self,
        record: &MiddlewarePatchRecord,
    ) -> Result<(), DomainError>;

    /// Deletes the record keyed by (path, action, middleware). Returns
    /// whether one existed.
    ///
    /// # Errors
    /// Returns [`DomainError::DatabaseUnavailable`] while the database is down.
    async fn delete_middleware_record(
        &self,
        path: &str,
        action: RouteAction,
        middleware: &str,
    ) -> Result<bool, DomainError>;
}
