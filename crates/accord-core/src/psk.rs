//! Pre-shared key storage.
//!
//! `PskStore` is a capability trait rather than a concrete type so that a
//! host agent, which must only ever be able to see its own deployment's
//! secret, and the server, which holds every deployment's secret, can share
//! the same [`crate::crypto::Aead`] code against two very different
//! backing stores.

use std::collections::HashMap;

use base64::Engine;
use thiserror::Error;

pub const KEY_SIZE: usize = 32;

#[derive(Debug, Error)]
pub enum PskError {
    #[error("key not found")]
    NotFound,
    #[error("psk secret for id {0} is not {KEY_SIZE} bytes")]
    WrongLength(String),
    #[error("failed to read psk file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse psk file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Looks up a 32-byte secret by the 4-byte big-endian key id that prefixes
/// every AEAD envelope. Deliberately has no way to enumerate entries: a
/// future HSM-backed implementation should not have to support iteration
/// just to satisfy this trait.
pub trait PskStore: Send + Sync {
    fn get(&self, key_id: &[u8; 4]) -> Result<[u8; KEY_SIZE], PskError>;
}

/// In-memory table loaded from `{"<keyid-as-decimal-string>": "<secret>"}`.
/// The secret string is accepted either as raw ASCII bytes (if it decodes
/// to exactly 32 bytes) or as base64.
pub struct JsonPskStore {
    entries: HashMap<u32, [u8; KEY_SIZE]>,
}

impl JsonPskStore {
    pub fn from_str(contents: &str) -> Result<Self, PskError> {
        let raw: HashMap<String, String> = serde_json::from_str(contents)?;
        let mut entries = HashMap::with_capacity(raw.len());
        for (id_str, secret) in raw {
            let id: u32 = id_str
                .parse()
                .map_err(|_| PskError::WrongLength(id_str.clone()))?;
            let bytes = decode_secret(&secret).ok_or_else(|| PskError::WrongLength(id_str.clone()))?;
            entries.insert(id, bytes);
        }
        Ok(Self { entries })
    }

    pub fn from_path(path: &camino::Utf8Path) -> Result<Self, PskError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_str(&contents)
    }
}

fn decode_secret(secret: &str) -> Option<[u8; KEY_SIZE]> {
    if secret.len() == KEY_SIZE {
        let mut out = [0u8; KEY_SIZE];
        out.copy_from_slice(secret.as_bytes());
        return Some(out);
    }
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(secret)
        .ok()?;
    if decoded.len() == KEY_SIZE {
        let mut out = [0u8; KEY_SIZE];
        out.copy_from_slice(&decoded);
        Some(out)
    } else {
        None
    }
}

impl PskStore for JsonPskStore {
    fn get(&self, key_id: &[u8; 4]) -> Result<[u8; KEY_SIZE], PskError> {
        let id = u32::from_be_bytes(*key_id);
        self.entries.get(&id).copied().ok_or(PskError::NotFound)
    }
}

/// A host only ever needs to authenticate as a single deployment. This
/// store carries exactly one (key id, secret) pair so a host process never
/// holds PSKs belonging to other deployments in memory, even if the
/// deployment-wide JSON file were somehow reachable from it.
pub struct SingleEntryPskStore {
    key_id: [u8; 4],
    secret: [u8; KEY_SIZE],
}

impl SingleEntryPskStore {
    pub fn new(key_id: [u8; 4], secret: [u8; KEY_SIZE]) -> Self {
        Self { key_id, secret }
    }
}

impl PskStore for SingleEntryPskStore {
    fn get(&self, key_id: &[u8; 4]) -> Result<[u8; KEY_SIZE], PskError> {
        if key_id == &self.key_id {
            Ok(self.secret)
        } else {
            Err(PskError::NotFound)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_ascii_and_base64_secrets() {
        let json = r#"{
            "912090709": "JpUtbRukLuIFyjeKpA4fIpjgs6MTV8eH"
        }"#;
        let store = JsonPskStore::from_str(json).unwrap();
        let key_id = 912090709u32.to_be_bytes();
        let secret = store.get(&key_id).unwrap();
        assert_eq!(&secret, b"JpUtbRukLuIFyjeKpA4fIpjgs6MTV8eH");
    }

    #[test]
    fn missing_id_is_not_found() {
        let store = JsonPskStore::from_str("{}").unwrap();
        assert!(matches!(store.get(&[0, 0, 0, 1]), Err(PskError::NotFound)));
    }

    #[test]
    fn single_entry_store_rejects_other_ids() {
        let store = SingleEntryPskStore::new([1, 2, 3, 4], [7u8; KEY_SIZE]);
        assert!(store.get(&[1, 2, 3, 4]).is_ok());
        assert!(matches!(
            store.get(&[9, 9, 9, 9]),
            Err(PskError::NotFound)
        ));
    }
}
