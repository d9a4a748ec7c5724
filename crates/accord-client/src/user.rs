//! User agent: exchanges an already-obtained identity-provider token for a
//! verified identity, then gets every pending public key in a directory
//! signed as a user certificate scoped to the requested principals.

use std::time::Duration;

use accord_proto::cert_client::CertClient;
use accord_proto::{OauthToken as ProtoOauthToken, UserAuthRequest, UserCertRequest};
use camino::{Utf8Path, Utf8PathBuf};
use tonic::transport::Channel;

use crate::certs::{cert_path, list_pub_keys_in_dir, read_public_key};
use crate::{AgentError, Result};

pub struct User {
    client: CertClient<Channel>,
    username: String,
    remote_username: String,
    keys_dir: Utf8PathBuf,
    principals: Vec<String>,
    token: ProtoOauthToken,
}

impl User {
    pub fn new(
        client: CertClient<Channel>,
        username: String,
        remote_username: String,
        keys_dir: Utf8PathBuf,
        principals: Vec<String>,
        access_token: String,
    ) -> Self {
        Self {
            client,
            username,
            remote_username,
            keys_dir,
            principals,
            token: ProtoOauthToken {
                access_token,
                token_type: "Bearer".to_string(),
                refresh_token: String::new(),
                expiry: None,
            },
        }
    }

    /// Validates the token against the server and returns `(valid,
    /// verified_user_id)`. The caller is expected to stop if `valid` is
    /// false rather than proceed to request certificates.
    pub async fn check_authorization(&mut self) -> Result<(bool, String)> {
        let request = tonic::Request::new(UserAuthRequest {
            request_time: Some(now_timestamp()),
            username: self.username.clone(),
            token: Some(self.token.clone()),
        });
        let response = self.client.user_auth(request).await?.into_inner();
        Ok((response.valid, response.user_id))
    }

    /// Signs every `*.pub` file in the keys directory, writing
    /// `<name>-cert.pub` next to each one. If a certificate already exists
    /// from a previous run, its bytes are sent along as `current_user_cert`
    /// so the server can log rotation.
    pub async fn request_certs(&mut self, user_id: &str, duration: Duration) -> Result<()> {
        if self.principals.is_empty() {
            return Err(AgentError::NoPrincipals);
        }
        check_writable(&self.keys_dir)?;
        let files = list_pub_keys_in_dir(&self.keys_dir)?;
        tracing::info!(count = files.len(), "found public keys to sign");

        let valid_from = std::time::SystemTime::now() + Duration::from_secs(10);
        let valid_until = valid_from + duration;

        for file in &files {
            let contents = read_public_key(file)?;
            let out = cert_path(file);
            let current_user_cert = std::fs::read(&out).unwrap_or_default();

            let request = tonic::Request::new(UserCertRequest {
                request_time: Some(now_timestamp()),
                user_id: user_id.to_string(),
                username: self.username.clone(),
                remote_username: self.remote_username.clone(),
                current_user_cert,
                public_key: contents,
                valid_from: Some(system_time_to_timestamp(valid_from)),
                valid_until: Some(system_time_to_timestamp(valid_until)),
                authorized_principals: self.principals.clone(),
            });
            let response = self.client.user_cert(request).await?.into_inner();

            tracing::info!(path = %out, "writing user certificate");
            std::fs::write(&out, response.user_cert)?;
        }
        Ok(())
    }
}

/// Probes for write access the portable way: attempt to create and remove
/// a throwaway file, since there is no cross-platform equivalent of POSIX
/// `access(2)`'s `W_OK` in `std`.
fn check_writable(dir: &Utf8Path) -> Result<()> {
    let probe = dir.join(".accord-write-probe");
    std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&probe)
        .map_err(|_| AgentError::DirNotWritable(dir.to_string()))?;
    let _ = std::fs::remove_file(&probe);
    Ok(())
}

fn now_timestamp() -> prost_types::Timestamp {
    system_time_to_timestamp(std::time::SystemTime::now())
}

fn system_time_to_timestamp(t: std::time::SystemTime) -> prost_types::Timestamp {
    let dur = t
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    prost_types::Timestamp {
        seconds: dur.as_secs() as i64,
        nanos: dur.subsec_nanos() as i32,
    }
}
