//! AES-256-GCM envelope used for the host attestation handshake.
//!
//! Wire layout: `sender_id(4, BE) || nonce(12) || ciphertext || tag(16)`.
//! The 4-byte sender id is authenticated as AAD but not encrypted -- the
//! recipient needs it in the clear to know which PSK to look the key up
//! under.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;

use crate::psk::PskStore;

pub const NONCE_SIZE: usize = 12;
pub const SENDER_ID_SIZE: usize = 4;
const TAG_SIZE: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("decrypt error")]
    Decrypt,
    #[error("encrypt error")]
    Encrypt,
    #[error("key not found")]
    KeyNotFound,
}

/// Seals and opens envelopes against a shared [`PskStore`].
pub struct Aead256 {
    store: std::sync::Arc<dyn PskStore>,
}

impl Aead256 {
    pub fn new(store: std::sync::Arc<dyn PskStore>) -> Self {
        Self { store }
    }

    /// Seals `plaintext` under a fresh CSPRNG nonce, authenticated as
    /// having come from `sender_id`.
    pub fn seal(&self, plaintext: &[u8], sender_id: u32) -> Result<Vec<u8>, CryptoError> {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);
        self.seal_with_nonce(plaintext, &nonce, sender_id)
    }

    /// Seals `plaintext` under a caller-supplied nonce. Used by the server
    /// to reply to `HostAuth` under the same nonce the client chose, so
    /// that a successful `open` on the client side doubles as proof the
    /// server holds the matching PSK.
    ///
    /// Callers MUST NOT reuse a nonce for two different plaintexts under
    /// the same key; this type has no way to enforce that across calls.
    pub fn seal_with_nonce(
        &self,
        plaintext: &[u8],
        nonce: &[u8; NONCE_SIZE],
        sender_id: u32,
    ) -> Result<Vec<u8>, CryptoError> {
        let sender_bytes = sender_id.to_be_bytes();
        let key = self
            .store
            .get(&sender_bytes)
            .map_err(|_| CryptoError::KeyNotFound)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        let gcm_nonce = Nonce::from_slice(nonce);
        let ciphertext = cipher
            .encrypt(
                gcm_nonce,
                Payload {
                    msg: plaintext,
                    aad: &sender_bytes,
                },
            )
            .map_err(|_| CryptoError::Encrypt)?;

        let mut out = Vec::with_capacity(SENDER_ID_SIZE + NONCE_SIZE + ciphertext.len());
        out.extend_from_slice(&sender_bytes);
        out.extend_from_slice(nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Opens an envelope, returning `(plaintext, nonce, sender_id)`.
    pub fn open(&self, envelope: &[u8]) -> Result<(Vec<u8>, [u8; NONCE_SIZE], u32), CryptoError> {
        if envelope.len() <= SENDER_ID_SIZE + NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::Decrypt);
        }
        let sender_bytes: [u8; SENDER_ID_SIZE] = envelope[..SENDER_ID_SIZE].try_into().unwrap();
        let sender_id = u32::from_be_bytes(sender_bytes);
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&envelope[SENDER_ID_SIZE..SENDER_ID_SIZE + NONCE_SIZE]);
        let ciphertext = &envelope[SENDER_ID_SIZE + NONCE_SIZE..];

        let key = self
            .store
            .get(&sender_bytes)
            .map_err(|_| CryptoError::KeyNotFound)?;
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key));
        let gcm_nonce = Nonce::from_slice(&nonce);
        let plaintext = cipher
            .decrypt(
                gcm_nonce,
                Payload {
                    msg: ciphertext,
                    aad: &sender_bytes,
                },
            )
            .map_err(|_| CryptoError::Decrypt)?;

        Ok((plaintext, nonce, sender_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::psk::SingleEntryPskStore;
    use std::sync::Arc;

    fn aead(sender_id: u32) -> Aead256 {
        let store = Arc::new(SingleEntryPskStore::new(
            sender_id.to_be_bytes(),
            [42u8; crate::psk::KEY_SIZE],
        ));
        Aead256::new(store)
    }

    #[test]
    fn round_trips() {
        let a = aead(1);
        let sealed = a.seal(b"hello world", 1).unwrap();
        let (plaintext, _, sender) = a.open(&sealed).unwrap();
        assert_eq!(plaintext, b"hello world");
        assert_eq!(sender, 1);
    }

    #[test]
    fn tampering_the_sender_header_fails_open() {
        let a = aead(1);
        let mut sealed = a.seal(b"hello world", 1).unwrap();
        sealed[0] ^= 0xff;
        assert!(a.open(&sealed).is_err());
    }

    #[test]
    fn tampering_the_ciphertext_fails_open() {
        let a = aead(1);
        let mut sealed = a.seal(b"hello world", 1).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0xff;
        assert!(a.open(&sealed).is_err());
    }

    #[test]
    fn too_short_envelope_is_rejected() {
        let a = aead(1);
        assert!(a.open(&[0u8; 16]).is_err());
    }

    #[test]
    fn seal_with_nonce_preserves_the_callers_nonce() {
        let a = aead(7);
        let nonce = [9u8; NONCE_SIZE];
        let sealed = a.seal_with_nonce(b"reply", &nonce, 7).unwrap();
        let (plaintext, returned_nonce, sender) = a.open(&sealed).unwrap();
        assert_eq!(plaintext, b"reply");
        assert_eq!(returned_nonce, nonce);
        assert_eq!(sender, 7);
    }

    #[test]
    fn unknown_sender_id_is_key_not_found() {
        let a = aead(1);
        let sealed = a.seal(b"hi", 1).unwrap();
        let other = aead(2);
        assert!(matches!(other.open(&sealed), Err(CryptoError::KeyNotFound)));
    }
}
