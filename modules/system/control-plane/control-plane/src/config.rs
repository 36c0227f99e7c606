//! Configuration for the control plane.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use serde::{Deserialize, Serialize};

const DEFAULT_GRPC_ADDR: SocketAddr =
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 55152));
const DEFAULT_HTTP_ADDR: SocketAddr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 3030));

/// Top-level control plane configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ControlPlaneConfig {
    /// Listen address of the `ConfigService` / `AdminService` gRPC server.
    pub grpc_listen_addr: SocketAddr,

    /// Listen address of the HTTP surface (admin routes, read API).
    pub http_listen_addr: SocketAddr,

    /// Identity of this coordinator on the bus. A random id is generated
    /// when unset.
    pub instance_id: Option<String>,

    pub health: HealthConfig,
    pub reconcile: ReconcileConfig,
    pub admin: AdminConfig,
    pub state_store: StateStoreConfig,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            grpc_listen_addr: DEFAULT_GRPC_ADDR,
            http_listen_addr: DEFAULT_HTTP_ADDR,
            instance_id: None,
            health: HealthConfig::default(),
            reconcile: ReconcileConfig::default(),
            admin: AdminConfig::default(),
            state_store: StateStoreConfig::default(),
        }
    }
}

impl ControlPlaneConfig {
    /// Returns the configured instance id or a fresh random one.
    #[must_use]
    pub fn resolve_instance_id(&self) -> String {
        self.instance_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }
}

/// Health monitoring of registered modules.
///
/// `sweep_interval` and `staleness_window` are tuned independently: the
/// window decides when an instance counts as dead, the interval how often
/// dead instances are pruned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct HealthConfig {
    #[serde(with = "humantime_serde")]
    pub sweep_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub staleness_window: Duration,
    /// Connect timeout of the liveness probe run on first registration.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Timeout of the `grpc.health.v1` check itself.
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(30),
            staleness_window: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(2),
            probe_timeout: Duration::from_secs(2),
        }
    }
}

/// State store to database reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ReconcileConfig {
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Upper bound of the random delay added to every cycle.
    #[serde(with = "humantime_serde")]
    pub max_jitter: Duration,
    /// Poll period of `wait_for_reconcile`.
    #[serde(with = "humantime_serde")]
    pub wait_poll_interval: Duration,
    /// How long the first database sync waits for another instance's
    /// reconciliation to finish before going ahead anyway.
    #[serde(with = "humantime_serde")]
    pub wait_timeout: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1500),
            max_jitter: Duration::from_millis(300),
            wait_poll_interval: Duration::from_millis(100),
            wait_timeout: Duration::from_secs(5),
        }
    }
}

/// Admin route registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AdminConfig {
    /// Mount prefix; routes resolve at `<prefix>/<module>/<path>`.
    pub route_prefix: String,
    /// Quiet period after the last route registration before persisted
    /// middleware patches are re-applied.
    #[serde(with = "humantime_serde")]
    pub apply_debounce: Duration,
    /// How long a middleware pass waits for the database to come up.
    #[serde(with = "humantime_serde")]
    pub db_wait_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub db_poll_interval: Duration,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            route_prefix: "/admin".to_owned(),
            apply_debounce: Duration::from_secs(3),
            db_wait_timeout: Duration::from_secs(10),
            db_poll_interval: Duration::from_millis(250),
        }
    }
}

/// Location of the shared state store, reported to modules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct StateStoreConfig {
    pub host: String,
    pub port: u16,
}

impl Default for StateStoreConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_owned(),
            port: 6379,
        }
    }
}
