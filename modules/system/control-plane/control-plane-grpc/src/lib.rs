//! Control Plane gRPC Layer
//!
//! Generated protobuf types for `ConfigService` and `AdminService`, the
//! conversions between wire messages and SDK models, and a client that
//! implements the SDK traits over gRPC.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

mod client;
pub mod convert;

// Generated protobuf types for `control_plane.v1`
pub mod pb {
    tonic::include_proto!("control_plane.v1");
}

pub use pb::admin_service_client::AdminServiceClient;
pub use pb::admin_service_server::{AdminService, AdminServiceServer};
pub use pb::config_service_client::ConfigServiceClient;
pub use pb::config_service_server::{ConfigService, ConfigServiceServer};

pub use client::{ControlPlaneGrpcClient, GrpcClientConfig};

/// Request metadata key carrying the calling module's name.
pub const MODULE_NAME_METADATA: &str = "module-name";

/// Service name constant for `ConfigService`
pub const CONFIG_SERVICE_NAME: &str =
    <ConfigServiceServer<()> as tonic::server::NamedService>::NAME;

/// Service name constant for `AdminService`
pub const ADMIN_SERVICE_NAME: &str = <AdminServiceServer<()> as tonic::server::NamedService>::NAME;
