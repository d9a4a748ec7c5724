use std::sync::Arc;

use accord_core::authz::AuthzPolicy;
use accord_core::ca::CaKeyring;
use accord_core::crypto::Aead256;
use accord_core::idp::GoogleTokenVerifier;
use accord_core::psk::JsonPskStore;
use accord_core::secretstore::{EnvSecretStore, SecretStore, SsmSecretStore};
use accord_server::config::SecretBackend;
use accord_server::{CertAccorder, ServerConfig};
use accord_proto::cert_server::CertServer;
use anyhow::Context;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServerConfig::load();

    let psk_store = Arc::new(
        JsonPskStore::from_path(&config.psk_file)
            .with_context(|| format!("failed to load psk file {}", config.psk_file))?,
    );
    let authz = Arc::new(
        AuthzPolicy::from_path(&config.authz_file)
            .with_context(|| format!("failed to load authz policy {}", config.authz_file))?,
    );

    let secret_store: Arc<dyn SecretStore> = match config.secret_backend {
        SecretBackend::Ssm => Arc::new(SsmSecretStore::new(config.aws_region.clone()).await),
        SecretBackend::Env => Arc::new(EnvSecretStore),
    };

    let ca_keyring = accord_server::startup::with_backoff(|| {
        let secret_store = secret_store.clone();
        async { CaKeyring::discover(&config.ca_dir, secret_store, &config.secret_prefix).await }
    })
    .await
    .context("failed to discover CA keyring after retrying")?;

    let idp = Arc::new(GoogleTokenVerifier::new(
        config.idp_domain.clone(),
        config.idp_client_id.clone(),
    ));

    let accorder = CertAccorder::new(Aead256::new(psk_store), Arc::new(ca_keyring), authz, idp);

    let addr = config.listen.parse().context("invalid --listen address")?;
    tracing::info!(%addr, "accord-server listening");

    tonic::transport::Server::builder()
        .add_service(CertServer::new(accorder))
        .serve(addr)
        .await
        .context("gRPC server exited with an error")?;

    Ok(())
}
