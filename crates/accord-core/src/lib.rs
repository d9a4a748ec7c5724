//! Core of the certificate-issuance protocol: key derivation, the AEAD
//! envelope used for host attestation, authorization, identity-provider
//! verification, the CA keyring, and certificate signing.
//!
//! This crate has no gRPC or CLI surface of its own -- `accord-server` and
//! `accord-client` wire these pieces together against the wire schema in
//! `accord-proto`.

pub mod authz;
pub mod ca;
pub mod certsign;
pub mod crypto;
pub mod error;
pub mod idp;
pub mod keyid;
pub mod psk;
pub mod secretstore;

pub use error::{AccordError, Result};
