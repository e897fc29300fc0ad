//! Credential-to-identity resolution.
//!
//! Maps a presented credential (public key fingerprint or username/password
//! pair) to a stable alias. The lookup tables are built once from the
//! identity source supplied at startup and are immutable afterwards;
//! rebuilding means constructing a fresh [`IdentityDirectory`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One authorized public key and the alias it resolves to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyIdentity {
    /// SHA-256 fingerprint of the key material, as produced by the
    /// transport library for a presented key.
    pub fingerprint: String,
    pub alias: String,
}

/// One username/password pair and the alias it resolves to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasswordIdentity {
    pub username: String,
    pub password: String,
    pub alias: String,
}

/// The identity source: a plain list of records, loadable from JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentityConfig {
    #[serde(default)]
    pub keys: Vec<KeyIdentity>,
    #[serde(default)]
    pub passwords: Vec<PasswordIdentity>,
}

/// A credential presented during the transport handshake.
#[derive(Debug, Clone, Copy)]
pub enum Credential<'a> {
    /// Content hash of the presented public key.
    PublicKey(&'a str),
    /// Exact username/password pair.
    Password { username: &'a str, password: &'a str },
}

/// Precomputed lookup tables. Pure data; no side effects on lookup.
#[derive(Debug, Default)]
pub struct IdentityDirectory {
    by_fingerprint: HashMap<String, String>,
    by_password: HashMap<String, String>,
}

impl IdentityDirectory {
    /// Build the lookup tables from an identity source.
    ///
    /// Idempotent: building twice from the same config yields the same
    /// directory. Later duplicate records win, matching plain map insertion.
    pub fn build(config: &IdentityConfig) -> Self {
        let mut by_fingerprint = HashMap::with_capacity(config.keys.len());
        for key in &config.keys {
            by_fingerprint.insert(key.fingerprint.clone(), key.alias.clone());
        }

        let mut by_password = HashMap::with_capacity(config.passwords.len());
        for record in &config.passwords {
            by_password.insert(
                composite_key(&record.username, &record.password),
                record.alias.clone(),
            );
        }

        Self {
            by_fingerprint,
            by_password,
        }
    }

    /// Resolve a credential to its alias, or `None` for unregistered
    /// credentials. Callers decide whether an anonymous path applies.
    pub fn resolve(&self, credential: Credential<'_>) -> Option<&str> {
        match credential {
            Credential::PublicKey(fingerprint) => {
                self.by_fingerprint.get(fingerprint).map(String::as_str)
            }
            Credential::Password { username, password } => self
                .by_password
                .get(&composite_key(username, password))
                .map(String::as_str),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.by_fingerprint.is_empty() && self.by_password.is_empty()
    }
}

fn composite_key(username: &str, password: &str) -> String {
    format!("{username}:{password}")
}
