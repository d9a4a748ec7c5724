//! User -> principal authorization.
//!
//! Deliberately simple: an allow-list plus an admin override, loaded once
//! at startup and treated as immutable. Anything fancier (LDAP, group
//! membership, SSO claims) belongs behind a new implementation of the same
//! shape, not inside this one.

use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthzError {
    #[error("principal {0} is unknown")]
    UnknownPrincipal(String),
    #[error("user not granted any access yet, talk to your administrator")]
    NoAccess,
}

#[derive(Debug, Deserialize)]
pub struct AuthzPolicy {
    pub principals: HashSet<String>,
    #[serde(default)]
    pub admin_users: HashSet<String>,
    #[serde(default)]
    pub access_map: HashMap<String, HashSet<String>>,
}

impl AuthzPolicy {
    pub fn from_str(contents: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(contents)
    }

    pub fn from_path(path: &camino::Utf8Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::from_str(&contents)?)
    }

    fn is_admin(&self, user: &str) -> bool {
        self.admin_users.contains(user)
    }

    fn validate_principals(&self, principals: &[String]) -> Result<(), AuthzError> {
        for p in principals {
            if !self.principals.contains(p) {
                return Err(AuthzError::UnknownPrincipal(p.clone()));
            }
        }
        Ok(())
    }

    /// Returns the subset of `requested_principals` this user may be
    /// granted. Order is preserved from the request. An unknown principal
    /// is rejected before any per-user check runs -- the principal
    /// vocabulary is closed even to admins.
    pub fn authorize(
        &self,
        user: &str,
        requested_principals: &[String],
    ) -> Result<Vec<String>, AuthzError> {
        self.validate_principals(requested_principals)?;

        if self.is_admin(user) {
            return Ok(requested_principals.to_vec());
        }

        let granted = self
            .access_map
            .get(user)
            .ok_or(AuthzError::NoAccess)?;

        Ok(requested_principals
            .iter()
            .filter(|p| granted.contains(*p))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> AuthzPolicy {
        AuthzPolicy::from_str(
            r#"{
                "principals": ["root-everywhere", "zones-db", "zones-chocolatefactory-denied"],
                "admin_users": ["user1@ex.ample.com"],
                "access_map": {
                    "user2@ex.ample.com": ["zones-db"]
                }
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn admin_gets_requested_principals_unchanged() {
        let p = policy();
        let granted = p
            .authorize("user1@ex.ample.com", &["root-everywhere".to_string()])
            .unwrap();
        assert_eq!(granted, vec!["root-everywhere".to_string()]);
    }

    #[test]
    fn user_gets_only_whats_in_the_access_map() {
        let p = policy();
        let granted = p
            .authorize("user2@ex.ample.com", &["zones-db".to_string()])
            .unwrap();
        assert_eq!(granted, vec!["zones-db".to_string()]);
    }

    #[test]
    fn unknown_user_with_known_principal_is_denied() {
        let p = policy();
        let err = p
            .authorize("user3@ex.ample.com", &["zones-db".to_string()])
            .unwrap_err();
        assert_eq!(err, AuthzError::NoAccess);
    }

    #[test]
    fn unknown_principal_is_denied_even_for_admins() {
        let p = policy();
        let err = p
            .authorize("user1@ex.ample.com", &["zones-chocolatefactory".to_string()])
            .unwrap_err();
        assert_eq!(
            err,
            AuthzError::UnknownPrincipal("zones-chocolatefactory".to_string())
        );
    }

    #[test]
    fn grant_can_be_empty_without_being_an_error() {
        let p = policy();
        let granted = p
            .authorize("user2@ex.ample.com", &["root-everywhere".to_string()])
            .unwrap();
        assert!(granted.is_empty());
    }
}
