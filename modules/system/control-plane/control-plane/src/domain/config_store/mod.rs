//! Config Store and Reconciler.

mod merge;
mod server_config;
mod service;

pub use merge::{fill_missing, overlay};
pub use server_config::ServerConfigCache;
pub use service::{ConfigReloadHook, ConfigStoreService};
