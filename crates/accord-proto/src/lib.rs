//! Generated gRPC wire schema for the certificate-issuance protocol.
//!
//! `build.rs` compiles `proto/accord.proto` via `tonic-build`; nothing in
//! this crate is hand-written except this module declaration.

tonic::include_proto!("accord");
