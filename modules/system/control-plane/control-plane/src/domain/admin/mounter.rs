use control_plane_sdk::{PathDefinition, RouteAction};

use crate::domain::error::DomainError;

/// The live HTTP router admin routes are mounted on.
///
/// Routes are addressed by the owning module name and the module-relative
/// path, the same way modules describe them.
pub trait RouteMounter: Send + Sync {
    /// Mounts `route`, replacing a previous mount of the same path and action.
    ///
    /// # Errors
    /// Returns [`DomainError::RouteMount`] if the path conflicts with a
    /// mounted one.
    fn mount(
        &self,
        module_name: &str,
        module_url: &str,
        route: &PathDefinition,
    ) -> Result<(), DomainError>;

    /// Returns whether anything was mounted there.
    fn unmount(&self, module_name: &str, path: &str, action: RouteAction) -> bool;

    /// # Errors
    /// Returns [`DomainError::RouteNotFound`] if nothing is mounted there.
    fn set_middlewares(
        &self,
        module_name: &str,
        path: &str,
        action: RouteAction,
        middlewares: &[String],
    ) -> Result<(), DomainError>;
}
