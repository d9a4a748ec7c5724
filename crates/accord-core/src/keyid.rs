//! Deterministic 32-bit tag for a (deployment id, salt) pair.
//!
//! This is a namespacing tag, not a secret: it only needs to look random
//! on the wire and to be cheap to recompute on both sides. Truncated MD5
//! is overkill cryptographically and deliberately not a guarantee against
//! collisions -- the fleet this was built for tops out in the thousands
//! of deployments.

use md5::{Digest, Md5};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyIdError {
    #[error("empty string given for id")]
    EmptyId,
}

/// Returns the first 4 bytes of MD5(salt || id).
pub fn derive(id: &str, salt: &str) -> Result<[u8; 4], KeyIdError> {
    if id.is_empty() {
        return Err(KeyIdError::EmptyId);
    }
    let mut hasher = Md5::new();
    hasher.update(salt.as_bytes());
    hasher.update(id.as_bytes());
    let sum = hasher.finalize();
    let mut out = [0u8; 4];
    out.copy_from_slice(&sum[..4]);
    Ok(out)
}

/// Same as [`derive`] but returns the 4 bytes interpreted as a big-endian
/// `u32`, which is how the key id travels as an envelope header and as a
/// PSK map key.
pub fn derive32(id: &str, salt: &str) -> Result<u32, KeyIdError> {
    derive(id, salt).map(u32::from_be_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_known_vectors() {
        assert_eq!(
            derive32("staging_ec2_660610034966_us-east-1", "hUYh5x4N2DOnTIce").unwrap(),
            3299138274
        );
        assert_eq!(derive32("test", "").unwrap(), 160394189);
    }

    #[test]
    fn rejects_empty_id() {
        assert_eq!(derive32("", "anysalt"), Err(KeyIdError::EmptyId));
        assert_eq!(derive32("", ""), Err(KeyIdError::EmptyId));
    }

    #[test]
    fn salt_and_id_are_not_interchangeable() {
        // swapping salt and id should (almost always) change the output,
        // guarding against an accidental concatenation-order regression
        let a = derive32("host-a", "salt-a").unwrap();
        let b = derive32("salt-a", "host-a").unwrap();
        assert_ne!(a, b);
    }
}
