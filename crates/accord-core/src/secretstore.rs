//! External secret store for CA private-key passphrases.
//!
//! The only concern this trait exists to isolate is "get me the string at
//! this path"; retry/backoff policy around *startup* calls lives in
//! `accord-server`, not here, since only the server knows the ceiling it's
//! willing to wait for.

use async_trait::async_trait;

#[derive(Debug, thiserror::Error)]
pub enum SecretStoreError {
    #[error("secret not found at {0}")]
    NotFound(String),
    #[error("transient secret-store failure: {0}")]
    Transient(String),
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn get_secret(&self, path: &str) -> Result<String, SecretStoreError>;
}

/// Fetches `SecureString` parameters from AWS Systems Manager Parameter
/// Store: one `aws-config`-loaded client, one call per passphrase lookup.
pub struct SsmSecretStore {
    client: aws_sdk_ssm::Client,
}

impl SsmSecretStore {
    pub async fn new(region: Option<String>) -> Self {
        let mut loader = aws_config::from_env();
        if let Some(region) = region {
            loader = loader.region(aws_config::meta::region::RegionProviderChain::first_try(
                aws_sdk_ssm::config::Region::new(region),
            ));
        }
        let config = loader.load().await;
        Self {
            client: aws_sdk_ssm::Client::new(&config),
        }
    }
}

#[async_trait]
impl SecretStore for SsmSecretStore {
    async fn get_secret(&self, path: &str) -> Result<String, SecretStoreError> {
        let response = self
            .client
            .get_parameter()
            .name(path)
            .with_decryption(true)
            .send()
            .await
            .map_err(|e| SecretStoreError::Transient(e.to_string()))?;

        response
            .parameter
            .and_then(|p| p.value)
            .ok_or_else(|| SecretStoreError::NotFound(path.to_string()))
    }
}

/// Reads secrets from environment variables, with `/` in the path
/// translated to `_` and upper-cased. Used for local development and
/// integration tests so they don't need real AWS credentials.
pub struct EnvSecretStore;

#[async_trait]
impl SecretStore for EnvSecretStore {
    async fn get_secret(&self, path: &str) -> Result<String, SecretStoreError> {
        let var_name = path.trim_start_matches('/').replace(['/', '-'], "_").to_uppercase();
        std::env::var(&var_name).map_err(|_| SecretStoreError::NotFound(path.to_string()))
    }
}

/// In-memory map, used directly by unit and integration tests.
pub struct StaticSecretStore(pub std::collections::HashMap<String, String>);

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn get_secret(&self, path: &str) -> Result<String, SecretStoreError> {
        self.0
            .get(path)
            .cloned()
            .ok_or_else(|| SecretStoreError::NotFound(path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn static_store_returns_configured_secret() {
        let mut map = std::collections::HashMap::new();
        map.insert("accord/1".to_string(), "hunter2".to_string());
        let store = StaticSecretStore(map);
        assert_eq!(store.get_secret("accord/1").await.unwrap(), "hunter2");
        assert!(store.get_secret("accord/2").await.is_err());
    }
}
