//! The taxonomy of errors the issuance core can raise.
//!
//! Kept as one flat enum rather than per-module errors so that the gRPC
//! boundary has a single place to map onto `tonic::Code` (see
//! `accord-server::service`) and so the propagation policy (what retries,
//! what doesn't, what gets logged at what level) reads as one table
//! instead of being scattered across modules.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AccordError {
    /// AEAD seal or open failed. Deliberately collapses "wrong key",
    /// "unknown sender", and "tampered ciphertext" into one message: an
    /// attacker who can distinguish those cases gets an oracle.
    #[error("decrypt error")]
    DecryptionFailure,

    #[error("encrypt error")]
    EncryptionFailure,

    /// PSK lookup for a sender id came back empty. Surfaced identically to
    /// `DecryptionFailure` on the wire for the same reason.
    #[error("decrypt error")]
    KeyNotFound,

    #[error("identity provider rejected token: {0}")]
    AuthenticationFailure(String),

    #[error("authorization failed: {0}")]
    AuthorizationFailure(String),

    #[error("invalid certificate request: {0}")]
    RequestInvalid(#[from] crate::certsign::ValidationError),

    #[error("failed to sign certificate: {0}")]
    CaSigningFailure(String),

    #[error("transient I/O failure: {0}")]
    TransientIoFailure(String),
}

pub type Result<T> = std::result::Result<T, AccordError>;
