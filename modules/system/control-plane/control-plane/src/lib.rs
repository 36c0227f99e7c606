#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
//! Control plane of a modular backend.
//!
//! Modules register with the Service Registry, keep their configuration in
//! the Config Store and push admin routes to the Admin Route Registry; the
//! coordinator serves all of it over gRPC and exposes the resulting route
//! table over HTTP.

pub mod api;
pub mod config;
pub mod domain;
pub mod infra;
pub mod module;

pub use config::{AdminConfig, ControlPlaneConfig, HealthConfig, ReconcileConfig, StateStoreConfig};
pub use domain::error::DomainError;
pub use infra::{GrpcHealthProbe, InMemoryConfigDatabase, LiveRouteTable};
pub use module::ControlPlane;
