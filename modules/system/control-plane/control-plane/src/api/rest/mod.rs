//! HTTP surface: read API plus dynamic admin route resolution.

pub mod dto;
pub mod error;
pub mod handlers;
pub mod routes;

pub use routes::router;
