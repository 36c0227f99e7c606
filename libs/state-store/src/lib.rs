#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Shared State Store
//!
//! Key-value store plus publish/subscribe bus shared by every control-plane
//! instance. The store holds mirrored module configuration and registry
//! snapshots; the bus carries invalidation events between instances and is
//! never the source of truth.

mod bus;
mod error;
mod memory;
mod store;

pub use bus::{BusMessage, BusSubscription, MessageBus};
pub use error::StateStoreError;
pub use memory::InMemoryStateStore;
pub use store::{StateStore, StateStoreExt};
