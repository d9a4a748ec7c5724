//! Discovery, metadata, and signing access for the host and user
//! certificate authorities.
//!
//! The keyring never holds decrypted private-key material: the passphrase
//! is fetched once at startup (and used there only to fail fast if it's
//! wrong), but every `sign_host`/`sign_user` call re-reads the private-key
//! file from disk and decrypts it fresh. That costs a file read and an
//! AES pass per signature in exchange for not keeping the CA's signing key
//! resident in memory any longer than a single request needs it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use ssh_key::certificate::CertType;
use ssh_key::{PrivateKey, PublicKey};

use crate::certsign::{self, CertSignRequest, SignError};
use crate::secretstore::SecretStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaType {
    User,
    Host,
}

#[derive(Debug, Deserialize)]
struct CertMetadata {
    id: u64,
    valid_from: DateTime<Utc>,
    valid_until: DateTime<Utc>,
}

struct CaCertPair {
    ca_type: CaType,
    id: u64,
    metadata: CertMetadata,
    private_key_path: PathBuf,
    public_key: PublicKey,
}

#[derive(Debug, Clone)]
pub struct CaPublic {
    pub id: u64,
    pub public_key: Vec<u8>,
    pub valid_from: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum CaError {
    #[error("failed to enumerate files in {0}: {1}")]
    ReadDir(PathBuf, std::io::Error),
    #[error("{0} doesn't look like a public key file: {1}")]
    BadPublicKey(PathBuf, ssh_key::Error),
    #[error("failed to parse metadata comment in {0}: {1}")]
    BadMetadata(PathBuf, serde_json::Error),
    #[error("ca id {0} is missing its {1} file")]
    IncompletePair(u64, &'static str),
    #[error("failed to fetch passphrase for ca {0}: {1}")]
    Passphrase(u64, crate::secretstore::SecretStoreError),
    #[error("failed to read private key {0}: {1}")]
    ReadPrivateKey(PathBuf, std::io::Error),
    #[error("failed to parse private key {0}: {1}")]
    ParsePrivateKey(PathBuf, ssh_key::Error),
    #[error("wrong passphrase for ca {0}")]
    WrongPassphrase(u64),
    #[error("no active {0:?} ca covers the current time")]
    NoActiveCa(CaType),
    #[error(transparent)]
    Sign(#[from] SignError),
}

pub struct CaKeyring {
    pairs: Vec<CaCertPair>,
    passphrases: HashMap<u64, String>,
}

fn filename_regex() -> Regex {
    Regex::new(r"^ca_(?P<type>user|host)_(?P<id>\d+)(?P<suffix>\.pub)?$").unwrap()
}

impl CaKeyring {
    /// Scans `dir` for `ca_(user|host)_<id>[.pub]` files, parses the
    /// public half of each pair for its JSON metadata comment, fetches the
    /// matching passphrase from `secret_store` at `<params_prefix>/<id>`,
    /// and validates it by decrypting the private key once up front
    /// (fail-fast, per the documented startup posture).
    pub async fn discover(
        dir: &camino::Utf8Path,
        secret_store: Arc<dyn SecretStore>,
        params_prefix: &str,
    ) -> Result<Self, CaError> {
        let mut private_paths: HashMap<(CaType, u64), PathBuf> = HashMap::new();
        let mut public_parsed: HashMap<(CaType, u64), (CertMetadata, PublicKey)> = HashMap::new();

        let re = filename_regex();
        let entries =
            std::fs::read_dir(dir).map_err(|e| CaError::ReadDir(dir.as_std_path().to_path_buf(), e))?;
        for entry in entries {
            let entry = entry.map_err(|e| CaError::ReadDir(dir.as_std_path().to_path_buf(), e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(captures) = re.captures(name) else {
                continue;
            };
            let ca_type = if &captures["type"] == "host" {
                CaType::Host
            } else {
                CaType::User
            };
            let id: u64 = captures["id"].parse().expect("regex guarantees digits");
            let path = entry.path();

            if captures.name("suffix").is_some() {
                let contents = std::fs::read_to_string(&path)
                    .map_err(|e| CaError::ReadDir(path.clone(), e))?;
                let public_key = PublicKey::from_openssh(contents.trim())
                    .map_err(|e| CaError::BadPublicKey(path.clone(), e))?;
                let metadata: CertMetadata = serde_json::from_str(public_key.comment())
                    .map_err(|e| CaError::BadMetadata(path.clone(), e))?;
                public_parsed.insert((ca_type, id), (metadata, public_key));
            } else {
                private_paths.insert((ca_type, id), path);
            }
        }

        let mut pairs = Vec::with_capacity(public_parsed.len());
        let mut passphrases = HashMap::with_capacity(public_parsed.len());
        for ((ca_type, id), (metadata, public_key)) in public_parsed {
            let private_key_path = private_paths
                .remove(&(ca_type, id))
                .ok_or(CaError::IncompletePair(id, "private"))?;

            let passphrase = secret_store
                .get_secret(&format!("{params_prefix}/{id}"))
                .await
                .map_err(|e| CaError::Passphrase(id, e))?;

            // fail fast: confirm the passphrase actually opens the key,
            // then let the decrypted material drop immediately
            decrypt_private_key(id, &private_key_path, &passphrase)?;

            passphrases.insert(id, passphrase);
            pairs.push(CaCertPair {
                ca_type,
                id,
                metadata,
                private_key_path,
                public_key,
            });
        }

        if !private_paths.is_empty() {
            let ((_, id), _) = private_paths.into_iter().next().unwrap();
            return Err(CaError::IncompletePair(id, "public"));
        }

        Ok(Self { pairs, passphrases })
    }

    pub fn host_cas(&self) -> Vec<CaPublic> {
        self.cas_of_type(CaType::Host)
    }

    pub fn user_cas(&self) -> Vec<CaPublic> {
        self.cas_of_type(CaType::User)
    }

    fn cas_of_type(&self, ca_type: CaType) -> Vec<CaPublic> {
        self.pairs
            .iter()
            .filter(|p| p.ca_type == ca_type)
            .map(|p| {
                let mut public_key = p.public_key.clone();
                public_key.set_comment("");
                CaPublic {
                    id: p.id,
                    public_key: public_key
                        .to_openssh()
                        .unwrap_or_default()
                        .into_bytes(),
                    valid_from: p.metadata.valid_from,
                    valid_until: p.metadata.valid_until,
                }
            })
            .collect()
    }

    fn active_pair(&self, ca_type: CaType) -> Result<&CaCertPair, CaError> {
        let now = Utc::now();
        self.pairs
            .iter()
            .filter(|p| p.ca_type == ca_type)
            .filter(|p| p.metadata.valid_from <= now && now <= p.metadata.valid_until)
            .max_by_key(|p| p.id)
            .ok_or(CaError::NoActiveCa(ca_type))
    }

    pub fn sign_host(&self, request: &CertSignRequest) -> Result<Vec<u8>, CaError> {
        self.sign(request, CaType::Host, CertType::Host)
    }

    pub fn sign_user(&self, request: &CertSignRequest) -> Result<Vec<u8>, CaError> {
        self.sign(request, CaType::User, CertType::User)
    }

    fn sign(
        &self,
        request: &CertSignRequest,
        ca_type: CaType,
        cert_type: CertType,
    ) -> Result<Vec<u8>, CaError> {
        let pair = self.active_pair(ca_type)?;
        let passphrase = self
            .passphrases
            .get(&pair.id)
            .expect("passphrase cached for every discovered pair");
        let signer = decrypt_private_key(pair.id, &pair.private_key_path, passphrase)?;
        Ok(certsign::sign(request, cert_type, &signer)?)
    }
}

fn decrypt_private_key(
    id: u64,
    path: &std::path::Path,
    passphrase: &str,
) -> Result<PrivateKey, CaError> {
    let contents =
        std::fs::read_to_string(path).map_err(|e| CaError::ReadPrivateKey(path.to_path_buf(), e))?;
    let key = PrivateKey::from_openssh(&contents)
        .map_err(|e| CaError::ParsePrivateKey(path.to_path_buf(), e))?;
    if key.is_encrypted() {
        key.decrypt(passphrase.as_bytes())
            .map_err(|_| CaError::WrongPassphrase(id))
    } else {
        Ok(key)
    }
}
