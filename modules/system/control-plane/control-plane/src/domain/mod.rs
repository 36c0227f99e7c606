pub mod admin;
pub mod config_store;
pub mod error;
pub mod events;
pub mod keys;
pub mod probe;
pub mod registry;
pub mod repo;
