mod grpc_health;

pub use grpc_health::GrpcHealthProbe;
