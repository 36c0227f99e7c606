//! Infrastructure adapters: the database double, the gRPC liveness probe
//! and the live admin route table.

pub mod probe;
pub mod router;
pub mod storage;

pub use probe::GrpcHealthProbe;
pub use router::{LiveRouteTable, ResolvedRoute, RouteTarget};
pub use storage::InMemoryConfigDatabase;
