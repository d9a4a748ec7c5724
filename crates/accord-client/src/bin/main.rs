//! Agent CLI: one `clap` subcommand per certificate-issuance task.

use std::time::Duration;

use accord_client::host::Host;
use accord_client::user::User;
use accord_core::crypto::Aead256;
use accord_core::keyid;
use accord_core::psk::SingleEntryPskStore;
use accord_proto::cert_client::CertClient;
use anyhow::Context;
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

const DEFAULT_HOST_SALT: &str = "hUYh5x4N2DOnTIce";

#[derive(Debug, Parser)]
#[command(name = "accord-client", about = "SSH certificate agent")]
struct Cli {
    /// gRPC address of the accord-server to contact.
    #[arg(long, env = "ACCORD_SERVER", default_value = "http://127.0.0.1:50051")]
    server: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Authenticate this host and sign every pending public key in
    /// `--hostkeys`.
    HostCert {
        #[arg(long, env = "ACCORD_DEPLOYMENT_ID")]
        deployment_id: String,
        #[arg(long, env = "ACCORD_HOST_SALT", default_value = DEFAULT_HOST_SALT)]
        host_salt: String,
        #[arg(long, env = "ACCORD_PSK")]
        psk: String,
        #[arg(long, env = "ACCORD_HOSTKEYS", default_value = "/etc/ssh")]
        hostkeys: Utf8PathBuf,
        #[arg(long = "host")]
        hostnames: Vec<String>,
        /// Certificate validity, e.g. `720h` for 30 days.
        #[arg(long, value_parser = parse_duration, default_value = "720h")]
        duration: Duration,
    },
    /// Validate an already-obtained identity-provider token and sign every
    /// pending public key in `--userkeys`.
    UserCert {
        #[arg(long, env = "ACCORD_ACCESS_TOKEN")]
        access_token: String,
        #[arg(long, env = "USER")]
        username: String,
        #[arg(long)]
        remote_username: Option<String>,
        #[arg(long, env = "ACCORD_USERKEYS")]
        userkeys: Utf8PathBuf,
        #[arg(long = "principal")]
        principals: Vec<String>,
        #[arg(long, value_parser = parse_duration, default_value = "24h")]
        duration: Duration,
    },
    /// Print the server's currently trusted host and user CAs.
    TrustedCerts,
    /// Rewrite the `known_hosts` trusted-hosts block from the server's
    /// published host CAs.
    UpdateHostCerts {
        #[arg(long, env = "ACCORD_KNOWN_HOSTS")]
        known_hosts: Utf8PathBuf,
    },
    /// Rewrite the `TrustedUserCAKeys` file from the server's published
    /// user CAs.
    UpdateUserCerts {
        #[arg(long, env = "ACCORD_USER_CA", default_value = "/etc/ssh/users_ca.pub")]
        user_ca: Utf8PathBuf,
    },
    /// Point sshd_config's `TrustedUserCAKeys` directive at `--user-ca`.
    UpdateSshd {
        #[arg(long, env = "ACCORD_SSHD_CONFIG", default_value = "/etc/ssh/sshd_config")]
        sshd_config: Utf8PathBuf,
        #[arg(long, env = "ACCORD_USER_CA", default_value = "/etc/ssh/users_ca.pub")]
        user_ca: Utf8PathBuf,
    },
}

fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    let (digits, unit) = s.split_at(s.len() - 1);
    let n: u64 = digits.parse().map_err(|_| format!("invalid duration {s}"))?;
    match unit {
        "s" => Ok(Duration::from_secs(n)),
        "m" => Ok(Duration::from_secs(n * 60)),
        "h" => Ok(Duration::from_secs(n * 3600)),
        "d" => Ok(Duration::from_secs(n * 86400)),
        _ => Err(format!("unknown duration unit in {s}, expected s/m/h/d")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // UpdateSshd only edits a local file and never talks to the server, so
    // it's handled before dialing out.
    if let Command::UpdateSshd { sshd_config, user_ca } = &cli.command {
        accord_client::trust::update_sshd_config(sshd_config, user_ca)
            .with_context(|| format!("failed to update sshd_config {sshd_config}"))?;
        return Ok(());
    }

    let client = CertClient::connect(cli.server.clone())
        .await
        .with_context(|| format!("failed to connect to {}", cli.server))?;

    match cli.command {
        Command::HostCert {
            deployment_id,
            host_salt,
            psk,
            hostkeys,
            hostnames,
            duration,
        } => {
            let sender_id = keyid::derive32(&deployment_id, &host_salt)
                .context("failed to derive key id from deployment id")?;
            let secret = decode_psk(&psk)?;
            let psk_store = std::sync::Arc::new(SingleEntryPskStore::new(sender_id.to_be_bytes(), secret));
            let aead = Aead256::new(psk_store);
            let mut host = Host::new(client, aead, sender_id, hostkeys, hostnames);

            let uuid = host.authenticate().await.context("host authentication failed")?;
            tracing::info!(%uuid, "authenticated");
            host.request_certs(duration).await.context("failed to get host certificates")?;
        }
        Command::UserCert {
            access_token,
            username,
            remote_username,
            userkeys,
            principals,
            duration,
        } => {
            let remote_username = remote_username.unwrap_or_else(|| username.clone());
            let mut user = User::new(client, username, remote_username, userkeys, principals, access_token);

            let (valid, user_id) = user.check_authorization().await.context("failed to check authorization")?;
            if !valid {
                anyhow::bail!("server rejected the identity token; cannot continue");
            }
            tracing::info!(user_id, "authorized");
            user.request_certs(&user_id, duration).await.context("failed to get user certificates")?;
        }
        Command::TrustedCerts => {
            let mut client = client;
            let trusted = accord_client::trust::fetch(&mut client).await?;
            println!("=== Host CAs ===");
            for ca in trusted.host_cas {
                println!("{}", String::from_utf8_lossy(&ca));
            }
            println!("=== User CAs ===");
            for ca in trusted.user_cas {
                println!("{}", String::from_utf8_lossy(&ca));
            }
        }
        Command::UpdateHostCerts { known_hosts } => {
            let mut client = client;
            accord_client::trust::update_known_hosts(&mut client, &known_hosts)
                .await
                .with_context(|| format!("failed to update known hosts file {known_hosts}"))?;
        }
        Command::UpdateUserCerts { user_ca } => {
            let mut client = client;
            accord_client::trust::update_trusted_user_ca_file(&mut client, &user_ca)
                .await
                .with_context(|| format!("failed to update trusted user CA file {user_ca}"))?;
        }
        Command::UpdateSshd { .. } => unreachable!("handled before connecting to the server"),
    }

    Ok(())
}

fn decode_psk(psk: &str) -> anyhow::Result<[u8; accord_core::psk::KEY_SIZE]> {
    use base64::Engine;
    if psk.len() == accord_core::psk::KEY_SIZE {
        let mut out = [0u8; accord_core::psk::KEY_SIZE];
        out.copy_from_slice(psk.as_bytes());
        return Ok(out);
    }
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(psk)
        .context("psk is neither 32 raw bytes nor valid base64")?;
    decoded
        .try_into()
        .map_err(|_| anyhow::anyhow!("decoded psk is not {} bytes", accord_core::psk::KEY_SIZE))
}
