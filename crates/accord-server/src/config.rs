//! Startup configuration for `accord-server`.
//!
//! Spelled as long `clap` flags with matching `env` fallthroughs, since
//! this is a daemon meant to run under an init system or container
//! orchestrator where flags are awkward and env vars are not.

use camino::Utf8PathBuf;
use clap::Parser;

#[derive(Debug, Clone, clap::ValueEnum)]
pub enum SecretBackend {
    /// AWS Systems Manager Parameter Store.
    Ssm,
    /// Environment variables; for local development and tests.
    Env,
}

#[derive(Debug, Parser)]
#[command(name = "accord-server", about = "SSH certificate authority RPC server")]
pub struct ServerConfig {
    /// Address to listen on, e.g. `0.0.0.0:50051`.
    #[arg(long, env = "ACCORD_LISTEN", default_value = "0.0.0.0:50051")]
    pub listen: String,

    /// Directory containing `ca_(user|host)_<id>[.pub]` key pairs.
    #[arg(long, env = "ACCORD_CA_DIR")]
    pub ca_dir: Utf8PathBuf,

    /// JSON file mapping decimal key-id strings to PSK secrets.
    #[arg(long, env = "ACCORD_PSK_FILE")]
    pub psk_file: Utf8PathBuf,

    /// JSON authorization policy (principals / admin_users / access_map).
    #[arg(long, env = "ACCORD_AUTHZ_FILE")]
    pub authz_file: Utf8PathBuf,

    /// Hosted domain the identity provider's `hd` claim must match.
    #[arg(long, env = "ACCORD_IDP_DOMAIN")]
    pub idp_domain: String,

    /// OAuth client id the identity provider's `aud` claim must match.
    #[arg(long, env = "ACCORD_IDP_CLIENT_ID")]
    pub idp_client_id: String,

    /// Prefix under which CA passphrases live in the secret store, e.g.
    /// `/accord/ca`; the passphrase for CA id `N` is fetched from
    /// `<prefix>/N`.
    #[arg(long, env = "ACCORD_SECRET_PREFIX")]
    pub secret_prefix: String,

    #[arg(long, env = "ACCORD_SECRET_BACKEND", value_enum, default_value = "ssm")]
    pub secret_backend: SecretBackend,

    /// AWS region for the SSM client, when `--secret-backend=ssm`.
    #[arg(long, env = "ACCORD_AWS_REGION")]
    pub aws_region: Option<String>,
}

impl ServerConfig {
    /// Parses from `std::env::args`, first loading a `.env` file if present
    /// as a convenience for local development.
    pub fn load() -> Self {
        let _ = dotenvy::dotenv();
        Self::parse()
    }
}
