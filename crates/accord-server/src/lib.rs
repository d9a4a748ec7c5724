//! Wiring for the `accord-server` binary: startup configuration, the gRPC
//! service implementation, and the bounded-retry secret-store bootstrap.

pub mod config;
pub mod service;
pub mod startup;

pub use config::ServerConfig;
pub use service::CertAccorder;
