//! Cert-sign request validation and certificate construction.
//!
//! Split in two: [`CertSignRequest::validate`] enforces the timing/identity
//! invariants every request must satisfy regardless of whether it's a host
//! or a user certificate, and [`sign`] does the actual OpenSSH certificate
//! construction and signing once a request has passed validation.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use ssh_key::certificate::{Builder, CertType};
use ssh_key::{PrivateKey, PublicKey};
use thiserror::Error;

const MAX_VALIDITY_SECS: u64 = 90 * 24 * 60 * 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("serial should be something meaningful, not 0")]
    InvalidSerial,
    #[error("cannot sign for certs with time in the past")]
    InvalidStartTime,
    #[error("end time cannot be before start time")]
    EndBeforeStart,
    #[error("empty id supplied")]
    EmptyId,
    #[error("the validity for certs is too long")]
    ValidityTooLong,
}

/// Extra critical options and extensions carried alongside a cert-sign
/// request. Neither is defaulted: an empty map means the resulting
/// certificate carries no critical options or extensions at all, it is
/// entirely up to the caller to populate them.
#[derive(Debug, Clone, Default)]
pub struct Permissions {
    pub critical_options: BTreeMap<String, String>,
    pub extensions: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct CertSignRequest {
    /// OpenSSH single-line authorized-key format.
    pub public_key: String,
    pub valid_from: u64,
    pub valid_until: u64,
    pub id: String,
    pub serial: u64,
    pub principals: Vec<String>,
    pub permissions: Permissions,
}

impl CertSignRequest {
    /// Runs the fixed-order checks the test suite asserts specific error
    /// kinds for; reordering these is a breaking change even though it
    /// looks like a no-op.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.serial == 0 {
            return Err(ValidationError::InvalidSerial);
        }
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before 1970")
            .as_secs();
        if self.valid_from < now {
            return Err(ValidationError::InvalidStartTime);
        }
        if self.valid_until < self.valid_from {
            return Err(ValidationError::EndBeforeStart);
        }
        if self.id.is_empty() {
            return Err(ValidationError::EmptyId);
        }
        if self.valid_until - self.valid_from > MAX_VALIDITY_SECS {
            return Err(ValidationError::ValidityTooLong);
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SignError {
    #[error("request failed validation: {0}")]
    Invalid(#[from] ValidationError),
    #[error("failed to parse public key: {0}")]
    BadPublicKey(ssh_key::Error),
    #[error("failed to build certificate: {0}")]
    Build(ssh_key::Error),
    #[error("failed to sign certificate: {0}")]
    Sign(ssh_key::Error),
    #[error("failed to serialize certificate: {0}")]
    Serialize(ssh_key::Error),
}

/// Parses `request.public_key`, builds an OpenSSH certificate of the given
/// type, and signs it with `signer`. Returns the serialized certificate
/// line, newline-terminated, with the comment preserved from the submitted
/// public key.
pub fn sign(
    request: &CertSignRequest,
    cert_type: CertType,
    signer: &PrivateKey,
) -> Result<Vec<u8>, SignError> {
    request.validate()?;

    let subject = PublicKey::from_openssh(&request.public_key).map_err(SignError::BadPublicKey)?;
    let comment = subject.comment().to_string();

    let mut builder = Builder::new_with_random_nonce(
        &mut rand::thread_rng(),
        subject.key_data().clone(),
        request.valid_from,
        request.valid_until,
    )
    .map_err(SignError::Build)?;

    builder.serial(request.serial).map_err(SignError::Build)?;
    builder.cert_type(cert_type);
    builder.key_id(&request.id).map_err(SignError::Build)?;

    for principal in &request.principals {
        builder.valid_principal(principal).map_err(SignError::Build)?;
    }
    for (name, value) in &request.permissions.critical_options {
        builder
            .critical_option(name, value)
            .map_err(SignError::Build)?;
    }
    for (name, value) in &request.permissions.extensions {
        builder.extension(name, value).map_err(SignError::Build)?;
    }
    if !comment.is_empty() {
        builder.comment(&comment);
    }

    let cert = builder.sign(signer).map_err(SignError::Sign)?;
    let mut line = cert.to_openssh().map_err(SignError::Serialize)?.into_bytes();
    if !line.ends_with(b"\n") {
        line.push(b'\n');
    }
    Ok(line)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_request() -> CertSignRequest {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();
        CertSignRequest {
            public_key: String::new(),
            valid_from: now + 10,
            valid_until: now + 10 + 3600,
            id: "web1.example.com".to_string(),
            serial: 1,
            principals: vec!["web1.example.com".to_string()],
            permissions: Permissions::default(),
        }
    }

    #[test]
    fn zero_serial_is_invalid() {
        let mut req = base_request();
        req.serial = 0;
        assert_eq!(req.validate(), Err(ValidationError::InvalidSerial));
    }

    #[test]
    fn start_time_in_the_past_is_invalid() {
        let mut req = base_request();
        req.valid_from -= 20;
        assert_eq!(req.validate(), Err(ValidationError::InvalidStartTime));
    }

    #[test]
    fn end_before_start_is_invalid() {
        let mut req = base_request();
        req.valid_until = req.valid_from - 1;
        assert_eq!(req.validate(), Err(ValidationError::EndBeforeStart));
    }

    #[test]
    fn empty_id_is_invalid() {
        let mut req = base_request();
        req.id.clear();
        assert_eq!(req.validate(), Err(ValidationError::EmptyId));
    }

    #[test]
    fn validity_over_ninety_days_is_invalid() {
        let mut req = base_request();
        req.valid_until = req.valid_from + 100 * 24 * 60 * 60;
        assert_eq!(req.validate(), Err(ValidationError::ValidityTooLong));
    }

    #[test]
    fn otherwise_valid_request_passes() {
        let req = base_request();
        assert!(req.validate().is_ok());
    }
}
