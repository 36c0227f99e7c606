//! API traits consumed by the coordinator's own subsystems and by modules.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::ControlPlaneError;
use crate::models::RegisteredModule;

/// Read-only view over the module registry.
///
/// Callers receive copies; nothing handed out references the registry's
/// internal tables.
#[async_trait]
pub trait ModuleDirectory: Send + Sync {
    /// Resolves the address a module registered with.
    ///
    /// # Errors
    /// * `NotFound` - if no module with that name is registered
    async fn get_module_url_by_name(&self, name: &str) -> Result<String, ControlPlaneError>;

    /// Same lookup as [`ModuleDirectory::get_module_url_by_name`], exposed
    /// separately on the wire as the existence check.
    ///
    /// # Errors
    /// * `NotFound` - if no module with that name is registered
    async fn module_exists(&self, name: &str) -> Result<String, ControlPlaneError>;

    /// Point-in-time snapshot of every registered module, sorted by name.
    ///
    /// # Errors
    /// * `Internal` - if the snapshot cannot be obtained
    async fn list_modules(&self) -> Result<Vec<RegisteredModule>, ControlPlaneError>;
}

/// Per-module configuration blobs.
#[async_trait]
pub trait ConfigApi: Send + Sync {
    /// Returns the stored config of `module`.
    ///
    /// # Errors
    /// * `NotFound` - if no config has been set for the module
    async fn get_config(&self, module: &str) -> Result<Value, ControlPlaneError>;

    /// Replaces the config of `module` and returns the stored value.
    ///
    /// # Errors
    /// * `InvalidArgument` - if `config` is not a JSON object
    /// * `Internal` - if the shared state store rejects the write
    async fn update_config(&self, module: &str, config: Value) -> Result<Value, ControlPlaneError>;

    /// Fills missing top-level fields of the stored config from `fields` and
    /// returns the merged result. Fields already stored are kept.
    ///
    /// # Errors
    /// * `InvalidArgument` - if `fields` is not a JSON object
    /// * `Internal` - if the shared state store rejects the write
    async fn add_fields_to_config(
        &self,
        module: &str,
        fields: Value,
    ) -> Result<Value, ControlPlaneError>;
}
