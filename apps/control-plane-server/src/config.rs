//! Layered server configuration: defaults, then YAML, then `CP__*` env.

use std::path::Path;

use anyhow::{Context, Result, ensure};
use control_plane::ControlPlaneConfig;
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AppConfig {
    pub control_plane: ControlPlaneConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LoggingConfig {
    /// Default level when neither `RUST_LOG` nor `-v` says otherwise.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            json: false,
        }
    }
}

/// Overrides taken from the command line.
#[derive(Debug, Default, Clone, Copy)]
pub struct CliOverrides {
    pub grpc_port: Option<u16>,
    pub http_port: Option<u16>,
    pub verbose: u8,
}

impl AppConfig {
    /// Loads defaults, then the YAML file if given, then `CP__` environment
    /// variables (`CP__CONTROL_PLANE__HEALTH__SWEEP_INTERVAL=10s` maps to
    /// `control_plane.health.sweep_interval`).
    ///
    /// # Errors
    /// Returns an error if the file is missing or a layer does not parse.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(Self::default()));
        if let Some(path) = config_path {
            ensure!(
                path.is_file(),
                "config file does not exist: {}",
                path.to_string_lossy()
            );
            figment = figment.merge(Yaml::file(path));
        }

        figment
            .merge(Env::prefixed("CP__").split("__"))
            .extract()
            .context("Failed to extract config from figment")
    }

    pub fn apply_cli_overrides(&mut self, cli: CliOverrides) {
        if let Some(port) = cli.grpc_port {
            self.control_plane.grpc_listen_addr.set_port(port);
        }
        if let Some(port) = cli.http_port {
            self.control_plane.http_listen_addr.set_port(port);
        }
        let level = match cli.verbose {
            0 => None,
            1 => Some("info"),
            2 => Some("debug"),
            _ => Some("trace"),
        };
        if let Some(level) = level {
            level.clone_into(&mut self.logging.level);
        }
    }

    /// # Errors
    /// Returns an error if the config cannot be serialized.
    pub fn to_yaml(&self) -> Result<String> {
        serde_saphyr::to_string(self).context("Failed to serialize config to YAML")
    }
}
