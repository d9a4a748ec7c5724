//! Filesystem side of the agent: finding public keys to sign, naming the
//! certificate next to them, and rewriting the two trust-anchor files
//! `known_hosts` and `sshd_config`'s `TrustedUserCAKeys` point at.

use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;

use crate::{AgentError, Result};

const KNOWN_HOSTS_START: &str = "#accord-trusted-hosts-start";
const KNOWN_HOSTS_END: &str = "#accord-trusted-hosts-end";

/// `id_ed25519.pub` -> `id_ed25519-cert.pub`, matching the first `.`-separated
/// component so `id_ed25519.pub` and `id_ed25519.something.pub` both land on
/// `id_ed25519-cert.pub`.
pub fn cert_path(pub_key_path: &Utf8Path) -> Utf8PathBuf {
    let dir = pub_key_path.parent().unwrap_or_else(|| Utf8Path::new("."));
    let base = pub_key_path.file_name().unwrap_or_default();
    let prefix = base.split('.').next().unwrap_or(base);
    dir.join(format!("{prefix}-cert.pub"))
}

/// Every `*.pub` file in `dir` that isn't itself a previously-written
/// certificate.
pub fn list_pub_keys_in_dir(dir: &Utf8Path) -> Result<Vec<Utf8PathBuf>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.ends_with(".pub") && !name.contains("cert") {
            out.push(dir.join(name.as_ref()));
        }
    }
    out.sort();
    Ok(out)
}

/// Parses an authorized-keys-format public key, returning the raw file
/// contents unchanged if it looks well-formed.
pub fn read_public_key(path: &Utf8Path) -> Result<Vec<u8>> {
    let contents = fs::read(path)?;
    ssh_key::PublicKey::from_openssh(&String::from_utf8_lossy(&contents))
        .map_err(|_| AgentError::NotAPublicKey(path.to_string()))?;
    Ok(contents)
}

/// Overwrites `file_path` with one line per trusted user CA, trailing
/// newline guaranteed.
pub fn update_users_cert_authority(file_path: &Utf8Path, trusted_user_cas: &[Vec<u8>]) -> Result<()> {
    let mut contents = Vec::new();
    for ca in trusted_user_cas {
        contents.extend_from_slice(ca);
        if ca.last() != Some(&b'\n') {
            contents.push(b'\n');
        }
    }
    fs::write(file_path, contents)?;
    Ok(())
}

/// Ensures `sshd_config`'s `TrustedUserCAKeys` directive points at
/// `user_ca_path`, rewriting the existing directive in place if present or
/// appending one if not. The previous contents are kept at
/// `<file_path>.bak` before every rewrite, so running this twice with the
/// same `user_ca_path` leaves a `.bak` that is itself already-rewritten
/// content and a main file that is byte-identical to what was just there.
pub fn update_sshd_trusted_user_ca(file_path: &Utf8Path, user_ca_path: &Utf8Path) -> Result<()> {
    let input = fs::read_to_string(file_path)?;
    let directive = format!("TrustedUserCAKeys {user_ca_path}");

    let mut found = false;
    let mut lines: Vec<String> = input
        .lines()
        .map(|line| {
            if line.trim_start().starts_with("TrustedUserCAKeys") {
                found = true;
                directive.clone()
            } else {
                line.to_string()
            }
        })
        .collect();
    if !found {
        lines.push(directive);
    }
    let mut output = lines.join("\n");
    output.push('\n');

    let backup_path = format!("{file_path}.bak");
    tracing::info!(backup = %backup_path, "copied old sshd_config before rewriting");
    fs::rename(file_path, &backup_path)?;
    fs::write(file_path, output)?;
    Ok(())
}

/// Replaces the `#accord-trusted-hosts-start`/`-end` block in a
/// `known_hosts` file with one `@cert-authority * <key>` line per trusted
/// host CA, preserving everything outside the block. The previous file is
/// kept at `<file_path>.bak`.
pub fn update_known_hosts_cert_authority(file_path: &Utf8Path, trusted_host_cas: &[Vec<u8>]) -> Result<()> {
    let input = fs::read_to_string(file_path)?;
    let block_re = Regex::new(&format!(
        r"(?ms)^{}(.*){}",
        regex::escape(KNOWN_HOSTS_START),
        regex::escape(KNOWN_HOSTS_END)
    ))
    .expect("static pattern is valid");
    let stripped = block_re.replace_all(&input, "");

    let mut lines: Vec<String> = stripped.split('\n').map(str::to_string).collect();
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }

    lines.push(KNOWN_HOSTS_START.to_string());
    for ca in trusted_host_cas {
        let line = String::from_utf8_lossy(ca);
        let line = line.trim_end_matches('\n');
        lines.push(format!("@cert-authority * {line}"));
    }
    lines.push(KNOWN_HOSTS_END.to_string());
    lines.push(String::new());

    let backup_path = format!("{file_path}.bak");
    tracing::info!(backup = %backup_path, "copied old known_hosts file before rewriting");
    fs::rename(file_path, &backup_path)?;
    fs::write(file_path, lines.join("\n"))?;
    Ok(())
}
