//! Fetching and publishing the server's trust anchors. Used both by the
//! `trustedcerts` read-only task and by the two file-rewriting tasks, none
//! of which need a fully set-up [`crate::host::Host`] or
//! [`crate::user::User`] -- just a connected client.

use accord_proto::cert_client::CertClient;
use accord_proto::PublicTrustedCaRequest;
use camino::Utf8Path;
use tonic::transport::Channel;

use crate::Result;

pub struct TrustedCas {
    pub host_cas: Vec<Vec<u8>>,
    pub user_cas: Vec<Vec<u8>>,
}

pub async fn fetch(client: &mut CertClient<Channel>) -> Result<TrustedCas> {
    let request = tonic::Request::new(PublicTrustedCaRequest { request_time: None });
    let response = client.public_trusted_ca(request).await?.into_inner();
    Ok(TrustedCas {
        host_cas: response.host_cas.into_iter().map(|ca| ca.public_key).collect(),
        user_cas: response.user_cas.into_iter().map(|ca| ca.public_key).collect(),
    })
}

/// Rewrites the `known_hosts` trusted-hosts block from the server's
/// published host CAs.
pub async fn update_known_hosts(client: &mut CertClient<Channel>, known_hosts_file: &Utf8Path) -> Result<()> {
    let trusted = fetch(client).await?;
    crate::certs::update_known_hosts_cert_authority(known_hosts_file, &trusted.host_cas)
}

/// Rewrites the sshd `TrustedUserCAKeys` file from the server's published
/// user CAs.
pub async fn update_trusted_user_ca_file(client: &mut CertClient<Channel>, file_path: &Utf8Path) -> Result<()> {
    let trusted = fetch(client).await?;
    crate::certs::update_users_cert_authority(file_path, &trusted.user_cas)
}

/// Points `sshd_config`'s `TrustedUserCAKeys` directive at `user_ca_path`.
/// Unlike [`update_trusted_user_ca_file`], this doesn't talk to the server
/// at all -- it only edits the directive, leaving the CA-keys file itself
/// (wherever it points) to be kept current by that other task.
pub fn update_sshd_config(sshd_config_path: &Utf8Path, user_ca_path: &Utf8Path) -> Result<()> {
    crate::certs::update_sshd_trusted_user_ca(sshd_config_path, user_ca_path)
}
