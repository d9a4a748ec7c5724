//! End-to-end check that the host and user agents round-trip against a
//! real `CertAccorder` over the wire, not just against the protocol
//! structs directly.

use std::collections::HashMap;
use std::sync::Arc;

use accord_client::host::Host;
use accord_client::user::User;
use accord_core::authz::AuthzPolicy;
use accord_core::ca::CaKeyring;
use accord_core::crypto::Aead256;
use accord_core::idp::StaticIdentityProvider;
use accord_core::keyid;
use accord_core::psk::SingleEntryPskStore;
use accord_core::secretstore::StaticSecretStore;
use accord_proto::cert_client::CertClient;
use accord_proto::cert_server::CertServer;
use accord_server::CertAccorder;
use camino::Utf8PathBuf;

const DEPLOYMENT_ID: &str = "test-deployment";
const HOST_SALT: &str = "test-salt";
const PSK_SECRET: [u8; 32] = [7u8; 32];

fn write_ca_pair(dir: &camino::Utf8Path, ca_type: &str, id: u64) {
    let key = ssh_key::PrivateKey::random(&mut rand::thread_rng(), ssh_key::Algorithm::Ed25519).unwrap();
    let metadata = serde_json::json!({
        "id": id,
        "valid_from": chrono::Utc::now() - chrono::Duration::hours(1),
        "valid_until": chrono::Utc::now() + chrono::Duration::days(1),
    });
    let mut public = key.public_key().clone();
    public.set_comment(metadata.to_string());
    std::fs::write(dir.join(format!("ca_{ca_type}_{id}.pub")), public.to_openssh().unwrap()).unwrap();
    std::fs::write(
        dir.join(format!("ca_{ca_type}_{id}")),
        key.to_openssh(ssh_key::LineEnding::LF).unwrap(),
    )
    .unwrap();
}

async fn spawn_server(addr: std::net::SocketAddr) {
    let dir = tempfile::tempdir().unwrap();
    let dir = camino::Utf8Path::from_path(dir.path()).unwrap();
    write_ca_pair(dir, "host", 1);
    write_ca_pair(dir, "user", 3);

    let mut secrets = HashMap::new();
    secrets.insert("/accord/ca/1".to_string(), "unused".to_string());
    secrets.insert("/accord/ca/3".to_string(), "unused".to_string());
    let secret_store = Arc::new(StaticSecretStore(secrets));
    let ca_keyring = Arc::new(CaKeyring::discover(dir, secret_store, "/accord/ca").await.unwrap());
    let authz = Arc::new(
        AuthzPolicy::from_str(r#"{"principals":["db"],"admin_users":[],"access_map":{"u@d.com":["db"]}}"#).unwrap(),
    );
    let idp = Arc::new(StaticIdentityProvider::valid("u@d.com"));

    let sender_id = keyid::derive32(DEPLOYMENT_ID, HOST_SALT).unwrap();
    let psk = Arc::new(SingleEntryPskStore::new(sender_id.to_be_bytes(), PSK_SECRET));
    let accorder = CertAccorder::new(Aead256::new(psk), ca_keyring, authz, idp);

    tokio::spawn(async move {
        tonic::transport::Server::builder()
            .add_service(CertServer::new(accorder))
            .serve(addr)
            .await
            .unwrap();
    });

    // give the listener a moment to bind before the client dials it
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
}

async fn connect(addr: std::net::SocketAddr) -> CertClient<tonic::transport::Channel> {
    for _ in 0..20 {
        if let Ok(client) = CertClient::connect(format!("http://{addr}")).await {
            return client;
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    }
    panic!("could not connect to test server at {addr}");
}

#[tokio::test]
async fn host_agent_authenticates_and_signs_a_certificate() {
    let addr: std::net::SocketAddr = "127.0.0.1:51871".parse().unwrap();
    spawn_server(addr).await;
    let client = connect(addr).await;

    let sender_id = keyid::derive32(DEPLOYMENT_ID, HOST_SALT).unwrap();
    let psk = Arc::new(SingleEntryPskStore::new(sender_id.to_be_bytes(), PSK_SECRET));
    let aead = Aead256::new(psk);

    let keys_dir = tempfile::tempdir().unwrap();
    let keys_dir = Utf8PathBuf::from_path_buf(keys_dir.path().to_path_buf()).unwrap();
    let key = ssh_key::PrivateKey::random(&mut rand::thread_rng(), ssh_key::Algorithm::Ed25519).unwrap();
    std::fs::write(keys_dir.join("id_ed25519.pub"), key.public_key().to_openssh().unwrap()).unwrap();

    let mut host = Host::new(client, aead, sender_id, keys_dir.clone(), vec!["web1".to_string()]);
    let uuid = host.authenticate().await.unwrap();
    assert_eq!(uuid.len(), 36);

    host.request_certs(std::time::Duration::from_secs(3600)).await.unwrap();
    let cert_bytes = std::fs::read(keys_dir.join("id_ed25519-cert.pub")).unwrap();
    assert!(String::from_utf8_lossy(&cert_bytes).starts_with("ssh-ed25519-cert-v01@openssh.com"));
}

#[tokio::test]
async fn user_agent_checks_authorization_and_signs_a_certificate() {
    let addr: std::net::SocketAddr = "127.0.0.1:51872".parse().unwrap();
    spawn_server(addr).await;
    let client = connect(addr).await;

    let keys_dir = tempfile::tempdir().unwrap();
    let keys_dir = Utf8PathBuf::from_path_buf(keys_dir.path().to_path_buf()).unwrap();
    let key = ssh_key::PrivateKey::random(&mut rand::thread_rng(), ssh_key::Algorithm::Ed25519).unwrap();
    std::fs::write(keys_dir.join("id_ed25519.pub"), key.public_key().to_openssh().unwrap()).unwrap();

    let mut user = User::new(
        client,
        "u".to_string(),
        "u".to_string(),
        keys_dir.clone(),
        vec!["db".to_string()],
        "any-token".to_string(),
    );
    let (valid, user_id) = user.check_authorization().await.unwrap();
    assert!(valid);
    assert_eq!(user_id, "u@d.com");

    user.request_certs(&user_id, std::time::Duration::from_secs(3600)).await.unwrap();
    let cert_bytes = std::fs::read(keys_dir.join("id_ed25519-cert.pub")).unwrap();
    assert!(String::from_utf8_lossy(&cert_bytes).starts_with("ssh-ed25519-cert-v01@openssh.com"));
}

#[tokio::test]
async fn trust_module_fetches_published_cas() {
    let addr: std::net::SocketAddr = "127.0.0.1:51873".parse().unwrap();
    spawn_server(addr).await;
    let mut client = connect(addr).await;

    let trusted = accord_client::trust::fetch(&mut client).await.unwrap();
    assert_eq!(trusted.host_cas.len(), 1);
    assert_eq!(trusted.user_cas.len(), 1);
}
