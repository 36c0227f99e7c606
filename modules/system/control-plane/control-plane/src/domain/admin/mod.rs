//! Admin Route Registry and Middleware Patch Engine.

mod mounter;
pub mod patch;
mod scheduler;
mod service;

pub use mounter::RouteMounter;
pub use scheduler::Debouncer;
pub use service::{AdminReloadHook, AdminRouteService};
