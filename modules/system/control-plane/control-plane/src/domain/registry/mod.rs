//! Service Registry and Health Monitor.

mod service;
mod table;

pub use service::RegistryService;
pub use table::{HealthRecord, RegistryTable, SweepOutcome};
