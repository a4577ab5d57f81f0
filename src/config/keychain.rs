//! Credential storage
//!
//! Site passwords live in the system keychain, keyed by site id.
//! Uses the `keyring` crate for cross-platform keychain access.

use std::collections::HashMap;
use std::fmt;

use keyring::Entry;
use parking_lot::Mutex;
use uuid::Uuid;
use zeroize::Zeroizing;

/// Service name for keychain entries
const SERVICE_NAME: &str = "com.fileserver-client.sites";

/// Keychain errors
#[derive(Debug, thiserror::Error)]
pub enum KeychainError {
    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Secret not found for site: {0}")]
    NotFound(Uuid),
}

/// A site password, wiped from memory on drop
#[derive(Clone)]
pub struct Credential(Zeroizing<String>);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(Zeroizing::new(secret.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Secret store keyed by site identity
pub trait CredentialStore: Send + Sync {
    fn store(&self, site_id: Uuid, secret: &Credential) -> Result<(), KeychainError>;
    fn get(&self, site_id: Uuid) -> Result<Credential, KeychainError>;
    /// Missing entries are not an error
    fn delete(&self, site_id: Uuid) -> Result<(), KeychainError>;
}

/// System keychain backed store
pub struct Keychain {
    service: String,
}

impl Keychain {
    pub fn new() -> Self {
        Self {
            service: SERVICE_NAME.to_string(),
        }
    }

    /// Create with custom service name (for testing)
    pub fn with_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    // Explicit username keeps the keychain identity stable on macOS
    fn entry(&self, site_id: Uuid) -> Result<Entry, KeychainError> {
        let account = format!("{}@{}", whoami::username(), site_id);
        Ok(Entry::new(&self.service, &account)?)
    }
}

impl Default for Keychain {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore for Keychain {
    fn store(&self, site_id: Uuid, secret: &Credential) -> Result<(), KeychainError> {
        tracing::info!("Keychain store: service={}, site={}", self.service, site_id);
        self.entry(site_id)?
            .set_password(secret.expose())
            .map_err(|e| {
                tracing::error!("Keychain store failed: site={}, error={:?}", site_id, e);
                KeychainError::Keyring(e)
            })
    }

    fn get(&self, site_id: Uuid) -> Result<Credential, KeychainError> {
        match self.entry(site_id)?.get_password() {
            Ok(secret) => Ok(Credential::new(secret)),
            Err(keyring::Error::NoEntry) => {
                tracing::warn!("Keychain get: no entry for site={}", site_id);
                Err(KeychainError::NotFound(site_id))
            }
            Err(e) => Err(KeychainError::Keyring(e)),
        }
    }

    fn delete(&self, site_id: Uuid) -> Result<(), KeychainError> {
        match self.entry(site_id)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(KeychainError::Keyring(e)),
        }
    }
}

/// In-process store for tests and headless use
#[derive(Default)]
pub struct MemoryCredentialStore {
    secrets: Mutex<HashMap<Uuid, Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn store(&self, site_id: Uuid, secret: &Credential) -> Result<(), KeychainError> {
        self.secrets.lock().insert(site_id, secret.clone());
        Ok(())
    }

    fn get(&self, site_id: Uuid) -> Result<Credential, KeychainError> {
        self.secrets
            .lock()
            .get(&site_id)
            .cloned()
            .ok_or(KeychainError::NotFound(site_id))
    }

    fn delete(&self, site_id: Uuid) -> Result<(), KeychainError> {
        self.secrets.lock().remove(&site_id);
        Ok(())
    }
}
