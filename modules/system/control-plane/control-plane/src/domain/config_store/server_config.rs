use arc_swap::ArcSwapOption;
use control_plane_sdk::ServerConfig;
use serde_json::Value;
use std::sync::Arc;

use super::service::ConfigReloadHook;

/// Last known `hostUrl` / `env` of the `core` module, refreshed by the
/// `core` reload hook.
#[derive(Default)]
pub struct ServerConfigCache {
    current: ArcSwapOption<ServerConfig>,
}

impl ServerConfigCache {
    #[must_use]
    pub fn get(&self) -> Option<ServerConfig> {
        self.current.load_full().map(|c| c.as_ref().clone())
    }

    pub fn store(&self, config: ServerConfig) {
        self.current.store(Some(Arc::new(config)));
    }

    /// Extracts the server fields from a raw `core` config.
    #[must_use]
    pub fn extract(core: &Value) -> ServerConfig {
        let field = |name: &str| core.get(name).and_then(Value::as_str).map(ToOwned::to_owned);
        ServerConfig {
            host_url: field("hostUrl"),
            env: field("env"),
        }
    }
}

impl ConfigReloadHook for ServerConfigCache {
    fn on_config_reload(&self, _module: &str, config: &Value) {
        self.store(Self::extract(config));
    }
}
