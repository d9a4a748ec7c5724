//! The `Cert` gRPC service: wires the host and user attestation/signing
//! flows from `accord-core` onto the generated `tonic` service trait.
//!
//! `CertAccorder` holds read-only references to the PSK store, CA
//! keyring, authz policy, and identity provider, and each RPC method runs
//! through the fixed sequence of operations its corresponding protocol
//! step requires. Error handling maps the core's error taxonomy onto
//! `tonic::Status` codes at this boundary -- see `core_error_to_status`
//! and `ca_error_to_status` below.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use accord_core::authz::AuthzPolicy;
use accord_core::ca::CaKeyring;
use accord_core::certsign::{CertSignRequest, Permissions};
use accord_core::crypto::Aead256;
use accord_core::idp::{IdentityProvider, OauthToken};
use tonic::{Request, Response, Status};

use accord_proto::cert_server::Cert;
use accord_proto::{
    CertificateAuthority, HostAuthRequest, HostAuthResponse, HostCertRequest, HostCertResponse,
    PingRequest, PingResponse, PublicTrustedCaRequest, PublicTrustedCaResponse, ReplyMetadata,
    UserAuthRequest, UserAuthResponse, UserCertRequest, UserCertResponse,
};

pub struct CertAccorder {
    aead: Aead256,
    ca_keyring: Arc<CaKeyring>,
    authz: Arc<AuthzPolicy>,
    idp: Arc<dyn IdentityProvider>,
}

impl CertAccorder {
    pub fn new(
        aead: Aead256,
        ca_keyring: Arc<CaKeyring>,
        authz: Arc<AuthzPolicy>,
        idp: Arc<dyn IdentityProvider>,
    ) -> Self {
        Self {
            aead,
            ca_keyring,
            authz,
            idp,
        }
    }
}

fn now_timestamp() -> prost_types::Timestamp {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    prost_types::Timestamp {
        seconds: now.as_secs() as i64,
        nanos: now.subsec_nanos() as i32,
    }
}

fn reply_metadata(request_time: Option<prost_types::Timestamp>) -> ReplyMetadata {
    ReplyMetadata {
        request_time,
        response_time: Some(now_timestamp()),
    }
}

fn unix_secs(ts: Option<prost_types::Timestamp>) -> Result<u64, Status> {
    let ts = ts.ok_or_else(|| Status::invalid_argument("missing timestamp"))?;
    u64::try_from(ts.seconds).map_err(|_| Status::invalid_argument("timestamp out of range"))
}

/// Every fallible operation in the issuance core lands on one of these
/// status codes; deterministic client errors are `InvalidArgument`, crypto
/// and identity failures are opaque on purpose (§7: don't hand an attacker
/// an oracle distinguishing "wrong key" from "tampered").
fn core_error_to_status(err: impl std::fmt::Display, code: tonic::Code) -> Status {
    Status::new(code, err.to_string())
}

/// A `CaError::Sign(SignError::Invalid(_))` traces back to the request
/// itself failing §4.8 validation and is the client's to fix; every other
/// CA-keyring failure (bad passphrase, missing file, no active CA) is a
/// server-side signing failure, fatal for this request but not the process.
fn ca_error_to_status(err: accord_core::ca::CaError) -> Status {
    use accord_core::ca::CaError;
    use accord_core::certsign::SignError;
    match err {
        CaError::Sign(SignError::Invalid(validation)) => {
            Status::invalid_argument(validation.to_string())
        }
        other => {
            tracing::error!(error = %other, "certificate signing failed");
            Status::internal(other.to_string())
        }
    }
}

/// Renders 16 random bytes as the canonical `8-4-4-4-12` hex string. This
/// only needs to look like a UUID to the client, not carry RFC 4122
/// version/variant bits -- it's an advisory per-host tag, not a real UUID.
fn make_uuid() -> [u8; 16] {
    let mut bytes = [0u8; 16];
    rand::RngCore::fill_bytes(&mut rand::thread_rng(), &mut bytes);
    bytes
}

#[tonic::async_trait]
impl Cert for CertAccorder {
    async fn host_auth(
        &self,
        request: Request<HostAuthRequest>,
    ) -> Result<Response<HostAuthResponse>, Status> {
        let req = request.into_inner();
        tracing::info!("received host auth request");

        let (plaintext, nonce, sender_id) = self
            .aead
            .open(&req.auth_info)
            .map_err(|e| core_error_to_status(e, tonic::Code::PermissionDenied))?;
        tracing::debug!(
            sender_id,
            instance_document = %String::from_utf8_lossy(&plaintext),
            "decrypted host attestation payload"
        );

        let uuid_bytes = make_uuid();
        let uuid = uuid::Uuid::from_bytes(uuid_bytes);
        let sealed = self
            .aead
            .seal_with_nonce(uuid.to_string().as_bytes(), &nonce, sender_id)
            .map_err(|e| core_error_to_status(e, tonic::Code::Internal))?;

        Ok(Response::new(HostAuthResponse {
            metadata: Some(reply_metadata(req.request_time)),
            auth_response: sealed,
        }))
    }

    async fn host_cert(
        &self,
        request: Request<HostCertRequest>,
    ) -> Result<Response<HostCertResponse>, Status> {
        let req = request.into_inner();

        let sign_request = CertSignRequest {
            public_key: String::from_utf8_lossy(&req.public_key).into_owned(),
            valid_from: unix_secs(req.valid_from)?,
            valid_until: unix_secs(req.valid_until)?,
            // The UUID from HostAuth, echoed back here. The server does not
            // validate that this UUID was ever actually issued -- see the
            // "HostCert id validation" decision in DESIGN.md. Any string
            // the client sends becomes the certificate's key id verbatim.
            id: String::from_utf8_lossy(&req.id).into_owned(),
            serial: 1,
            principals: req.hostnames,
            permissions: Permissions::default(),
        };

        let host_cert = self
            .ca_keyring
            .sign_host(&sign_request)
            .map_err(ca_error_to_status)?;

        Ok(Response::new(HostCertResponse {
            metadata: Some(reply_metadata(req.request_time)),
            host_cert,
        }))
    }

    async fn user_auth(
        &self,
        request: Request<UserAuthRequest>,
    ) -> Result<Response<UserAuthResponse>, Status> {
        let req = request.into_inner();
        let token = req
            .token
            .ok_or_else(|| Status::invalid_argument("missing oauth token"))?;

        let oauth_token = OauthToken {
            access_token: token.access_token,
            token_type: token.token_type,
            refresh_token: token.refresh_token,
            expiry: token
                .expiry
                .map(|ts| {
                    chrono::DateTime::from_timestamp(ts.seconds, ts.nanos as u32)
                        .unwrap_or_default()
                })
                .unwrap_or_default(),
        };

        match self.idp.verify(&oauth_token).await {
            Ok(identity) => Ok(Response::new(UserAuthResponse {
                metadata: Some(reply_metadata(req.request_time)),
                user_id: identity.email,
                valid: true,
            })),
            Err(err) => {
                tracing::warn!(%err, "identity provider rejected token");
                Ok(Response::new(UserAuthResponse {
                    metadata: Some(reply_metadata(req.request_time)),
                    user_id: String::new(),
                    valid: false,
                }))
            }
        }
    }

    async fn user_cert(
        &self,
        request: Request<UserCertRequest>,
    ) -> Result<Response<UserCertResponse>, Status> {
        let req = request.into_inner();

        let granted = self
            .authz
            .authorize(&req.user_id, &req.authorized_principals)
            .map_err(|e| core_error_to_status(e, tonic::Code::PermissionDenied))?;

        let sign_request = CertSignRequest {
            public_key: String::from_utf8_lossy(&req.public_key).into_owned(),
            valid_from: unix_secs(req.valid_from)?,
            valid_until: unix_secs(req.valid_until)?,
            id: req.remote_username,
            serial: 1,
            // A grant reduced to empty still proceeds to sign a
            // principal-less certificate -- see the "empty grant" decision
            // in DESIGN.md.
            principals: granted,
            permissions: Permissions::default(),
        };

        let user_cert = self
            .ca_keyring
            .sign_user(&sign_request)
            .map_err(ca_error_to_status)?;

        Ok(Response::new(UserCertResponse {
            metadata: Some(reply_metadata(req.request_time)),
            user_cert,
        }))
    }

    async fn public_trusted_ca(
        &self,
        request: Request<PublicTrustedCaRequest>,
    ) -> Result<Response<PublicTrustedCaResponse>, Status> {
        let req = request.into_inner();
        let to_proto = |ca: accord_core::ca::CaPublic| CertificateAuthority {
            id: ca.id,
            public_key: ca.public_key,
            valid_from: Some(prost_types::Timestamp {
                seconds: ca.valid_from.timestamp(),
                nanos: ca.valid_from.timestamp_subsec_nanos() as i32,
            }),
            valid_until: Some(prost_types::Timestamp {
                seconds: ca.valid_until.timestamp(),
                nanos: ca.valid_until.timestamp_subsec_nanos() as i32,
            }),
        };

        Ok(Response::new(PublicTrustedCaResponse {
            metadata: Some(reply_metadata(req.request_time)),
            host_cas: self.ca_keyring.host_cas().into_iter().map(to_proto).collect(),
            user_cas: self.ca_keyring.user_cas().into_iter().map(to_proto).collect(),
        }))
    }

    async fn ping(&self, request: Request<PingRequest>) -> Result<Response<PingResponse>, Status> {
        let req = request.into_inner();
        Ok(Response::new(PingResponse {
            metadata: Some(reply_metadata(req.request_time)),
            message: format!("Hello {}", req.name),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use accord_core::authz::AuthzPolicy;
    use accord_core::ca::CaKeyring;
    use accord_core::idp::StaticIdentityProvider;
    use accord_core::psk::SingleEntryPskStore;
    use accord_core::secretstore::StaticSecretStore;
    use std::collections::HashMap;

    fn write_ca_pair(dir: &camino::Utf8Path, ca_type: &str, id: u64) {
        let key = ssh_key::PrivateKey::random(
            &mut rand::thread_rng(),
            ssh_key::Algorithm::Ed25519,
        )
        .unwrap();
        let metadata = serde_json::json!({
            "id": id,
            "valid_from": chrono::Utc::now() - chrono::Duration::hours(1),
            "valid_until": chrono::Utc::now() + chrono::Duration::days(1),
        });
        let mut public = key.public_key().clone();
        public.set_comment(metadata.to_string());
        std::fs::write(
            dir.join(format!("ca_{ca_type}_{id}.pub")),
            public.to_openssh().unwrap(),
        )
        .unwrap();
        std::fs::write(
            dir.join(format!("ca_{ca_type}_{id}")),
            key.to_openssh(ssh_key::LineEnding::LF).unwrap(),
        )
        .unwrap();
    }

    async fn test_accorder(dir: &camino::Utf8Path) -> CertAccorder {
        write_ca_pair(dir, "host", 1);
        write_ca_pair(dir, "user", 7);
        let mut secrets = HashMap::new();
        secrets.insert("/accord/ca/1".to_string(), "unused".to_string());
        secrets.insert("/accord/ca/7".to_string(), "unused".to_string());
        let secret_store = Arc::new(StaticSecretStore(secrets));
        let ca_keyring = Arc::new(
            CaKeyring::discover(dir, secret_store, "/accord/ca")
                .await
                .unwrap(),
        );
        let authz = Arc::new(
            AuthzPolicy::from_str(r#"{"principals":["web1"],"admin_users":[],"access_map":{}}"#)
                .unwrap(),
        );
        let idp = Arc::new(StaticIdentityProvider::valid("u@d.com"));
        let psk = Arc::new(SingleEntryPskStore::new([0, 0, 0, 1], [9u8; 32]));
        CertAccorder::new(Aead256::new(psk), ca_keyring, authz, idp)
    }

    #[tokio::test]
    async fn ping_echoes_the_name() {
        let dir = tempfile::tempdir().unwrap();
        let dir = camino::Utf8Path::from_path(dir.path()).unwrap();
        let accorder = test_accorder(dir).await;
        let resp = accorder
            .ping(Request::new(PingRequest {
                request_time: None,
                name: "world".to_string(),
            }))
            .await
            .unwrap();
        assert_eq!(resp.into_inner().message, "Hello world");
    }

    #[tokio::test]
    async fn host_auth_round_trips_through_the_returned_uuid() {
        let dir = tempfile::tempdir().unwrap();
        let dir = camino::Utf8Path::from_path(dir.path()).unwrap();
        let accorder = test_accorder(dir).await;

        let sealed = accorder.aead.seal(b"{\"region\":\"us-east-1\"}", 1).unwrap();
        let resp = accorder
            .host_auth(Request::new(HostAuthRequest {
                request_time: None,
                auth_info: sealed,
            }))
            .await
            .unwrap()
            .into_inner();

        let (plaintext, _, sender) = accorder.aead.open(&resp.auth_response).unwrap();
        assert_eq!(sender, 1);
        assert_eq!(String::from_utf8(plaintext).unwrap().len(), 36);
    }

    #[tokio::test]
    async fn public_trusted_ca_reports_discovered_cas() {
        let dir = tempfile::tempdir().unwrap();
        let dir = camino::Utf8Path::from_path(dir.path()).unwrap();
        let accorder = test_accorder(dir).await;

        let resp = accorder
            .public_trusted_ca(Request::new(PublicTrustedCaRequest { request_time: None }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(resp.host_cas.len(), 1);
        assert_eq!(resp.user_cas.len(), 1);
        assert_eq!(resp.host_cas[0].id, 1);
        assert_eq!(resp.user_cas[0].id, 7);
    }
}
