use async_trait::async_trait;
use control_plane_sdk::HealthStatus;

use super::error::DomainError;

/// Liveness check run against a module the registry has never seen.
#[async_trait]
pub trait ModuleProbe: Send + Sync {
    /// Contacts the module at `address` (`host:port`) and returns the health
    /// it reports.
    ///
    /// # Errors
    /// Returns [`DomainError::ModuleUnresponsive`] if the module cannot be
    /// reached within the probe timeouts.
    async fn check(&self, module: &str, address: &str) -> Result<HealthStatus, DomainError>;
}
