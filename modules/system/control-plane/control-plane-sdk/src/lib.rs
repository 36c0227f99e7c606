//! Control Plane SDK
//!
//! Public contract of the control plane shared by the coordinator itself and
//! by modules talking to it:
//! - `ModuleDirectory` read view over registered modules
//! - `ConfigApi` for per-module configuration blobs
//! - route descriptor and middleware patch models
//! - `ControlPlaneError` taxonomy
//!
//! Both traits have a local implementation inside the coordinator and a gRPC
//! client implementation in `control-plane-grpc`.
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![forbid(unsafe_code)]

pub mod api;
pub mod error;
pub mod models;

pub use api::{ConfigApi, ModuleDirectory};
pub use error::ControlPlaneError;
pub use models::{
    HealthStatus, MiddlewarePatchRecord, PathDefinition, RegisteredModule, RegisteredRouteSet,
    RouteAction, RouteOptions, ServerConfig, StateStoreDetails,
};
