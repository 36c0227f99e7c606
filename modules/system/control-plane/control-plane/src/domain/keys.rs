//! Shared state store keys and bus topics.

/// HA module-location snapshot: `{modules:[{name,url,instance}]}`.
pub const CONFIG_KEY: &str = "config";

/// Persisted admin route state: `{routes:[{routes,url,moduleName}]}`.
pub const ADMIN_KEY: &str = "admin";

/// Bulk map of every module config, used by server-config lookups.
pub const MODULE_CONFIGS_KEY: &str = "moduleConfigs";

/// Registry and reconciliation events.
pub const CONFIG_TOPIC: &str = "config";

/// Route registration broadcasts.
pub const ADMIN_TOPIC: &str = "admin";

/// Bus payloads marking the reconciliation hint.
pub const RECONCILING: &str = "reconciling";
pub const RECONCILE_DONE: &str = "reconcile-done";

/// Per-module config key, `moduleConfigs.<name>`.
#[must_use]
pub fn module_config_key(module: &str) -> String {
    format!("{MODULE_CONFIGS_KEY}.{module}")
}

/// Topic announcing a module's config change, `<module>:config:update`.
#[must_use]
pub fn config_update_topic(module: &str) -> String {
    format!("{module}:config:update")
}
