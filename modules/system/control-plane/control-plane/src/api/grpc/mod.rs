//! gRPC surface: `ConfigService` and `AdminService`.

mod admin_service;
mod config_service;

pub use admin_service::{AdminServiceImpl, make_admin_service};
pub use config_service::{ConfigServiceImpl, make_config_service};

use control_plane_grpc::convert::status_from_error;
use tonic::Status;

use crate::domain::error::DomainError;

fn domain_status(err: DomainError) -> Status {
    status_from_error(err.into())
}
