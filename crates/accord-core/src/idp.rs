//! Third-party identity-provider token verification.
//!
//! The protocol only ever needs one fact from the identity provider: "is
//! this access token current, issued for our client, inside our hosted
//! domain, and which email does it belong to." Everything else about the
//! provider (refresh flow, browser redirect, token storage) lives in the
//! agent, outside this crate.

use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct OauthToken {
    pub access_token: String,
    pub token_type: String,
    pub refresh_token: String,
    pub expiry: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedIdentity {
    pub email: String,
}

#[derive(Debug, thiserror::Error)]
pub enum IdpError {
    #[error("token request failed: {0}")]
    Transport(String),
    #[error("token is expired")]
    Expired,
    #[error("token audience does not match configured client id")]
    WrongAudience,
    #[error("token hosted domain does not match configured domain")]
    WrongHostedDomain,
    #[error("identity provider did not return an email claim")]
    MissingEmail,
}

/// Capability trait for validating an out-of-band-obtained access token.
/// Production uses [`GoogleTokenVerifier`]; tests substitute a fixed-answer
/// double.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn verify(&self, token: &OauthToken) -> Result<VerifiedIdentity, IdpError>;
}

#[derive(Debug, Deserialize)]
struct TokenInfo {
    email: Option<String>,
    #[serde(default)]
    email_verified: Option<String>,
    hd: Option<String>,
    aud: Option<String>,
    exp: Option<String>,
}

/// Verifies tokens against Google's `tokeninfo` endpoint. Re-checks `hd`,
/// `aud`, and `exp` locally rather than trusting the endpoint's HTTP status
/// alone, since a 200 response there only means "this token exists", not
/// "this token authorizes this deployment".
pub struct GoogleTokenVerifier {
    http: reqwest::Client,
    hosted_domain: String,
    client_id: String,
    tokeninfo_url: String,
}

impl GoogleTokenVerifier {
    pub fn new(hosted_domain: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            hosted_domain: hosted_domain.into(),
            client_id: client_id.into(),
            tokeninfo_url: "https://oauth2.googleapis.com/tokeninfo".to_string(),
        }
    }

    #[cfg(test)]
    fn with_endpoint(hosted_domain: impl Into<String>, client_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            hosted_domain: hosted_domain.into(),
            client_id: client_id.into(),
            tokeninfo_url: url.into(),
        }
    }
}

#[async_trait]
impl IdentityProvider for GoogleTokenVerifier {
    async fn verify(&self, token: &OauthToken) -> Result<VerifiedIdentity, IdpError> {
        let info: TokenInfo = self
            .http
            .get(&self.tokeninfo_url)
            .query(&[("access_token", token.access_token.as_str())])
            .send()
            .await
            .map_err(|e| IdpError::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| IdpError::Transport(e.to_string()))?;

        if let Some(exp) = info.exp.as_deref().and_then(|e| e.parse::<i64>().ok()) {
            if exp < chrono::Utc::now().timestamp() {
                return Err(IdpError::Expired);
            }
        }
        if info.aud.as_deref() != Some(self.client_id.as_str()) {
            return Err(IdpError::WrongAudience);
        }
        if info.hd.as_deref() != Some(self.hosted_domain.as_str()) {
            return Err(IdpError::WrongHostedDomain);
        }
        info.email.map(|email| VerifiedIdentity { email }).ok_or(IdpError::MissingEmail)
    }
}

/// Fixed-answer double for tests and for local/offline deployments that
/// trust a pre-verified identity.
pub struct StaticIdentityProvider {
    pub answer: Result<VerifiedIdentity, IdpError>,
}

impl StaticIdentityProvider {
    pub fn valid(email: impl Into<String>) -> Self {
        Self {
            answer: Ok(VerifiedIdentity { email: email.into() }),
        }
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentityProvider {
    async fn verify(&self, _token: &OauthToken) -> Result<VerifiedIdentity, IdpError> {
        match &self.answer {
            Ok(identity) => Ok(identity.clone()),
            Err(_) => Err(IdpError::MissingEmail),
        }
    }
}
