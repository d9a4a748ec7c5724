//! Agent-side library for the certificate issuance protocol: directory
//! scans for pending public keys, the host and user attestation round
//! trips, and the `known_hosts`/`sshd_config` trust-anchor rewriters.

pub mod certs;
pub mod host;
pub mod trust;
pub mod user;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("{0}")]
    Io(#[from] std::io::Error),
    #[error("{0} isn't writable, aborting before requesting certs")]
    DirNotWritable(String),
    #[error("no principals provided to request certificates for")]
    NoPrincipals,
    #[error("{0} doesn't look like a public key file")]
    NotAPublicKey(String),
    #[error("request to server failed: {0}")]
    Rpc(#[from] tonic::Status),
    #[error("attestation crypto failed: {0}")]
    Crypto(String),
    #[error("call authenticate() before requesting certificates")]
    NotAuthenticated,
}

pub type Result<T> = std::result::Result<T, AgentError>;
