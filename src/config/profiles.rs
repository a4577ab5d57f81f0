//! Profile store
//!
//! Known sites plus session settings, persisted through `ConfigStorage`.
//! Passwords never touch the profiles file; they go to the credential store
//! keyed by site id.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use super::keychain::{Credential, CredentialStore, KeychainError};
use super::storage::{ConfigStorage, StorageError};
use super::types::{ProfilesFile, SessionSettings, Site};

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Keychain(#[from] KeychainError),

    #[error("Site not found: {0}")]
    NotFound(Uuid),
}

pub struct ProfileStore {
    storage: ConfigStorage,
    credentials: Arc<dyn CredentialStore>,
    file: ProfilesFile,
}

impl ProfileStore {
    pub async fn load(
        storage: ConfigStorage,
        credentials: Arc<dyn CredentialStore>,
    ) -> Result<Self, ProfileError> {
        let file = storage.load().await?;
        info!(
            "Loaded {} site(s) from {:?}",
            file.sites.len(),
            storage.path()
        );
        Ok(Self {
            storage,
            credentials,
            file,
        })
    }

    pub fn sites(&self) -> &[Site] {
        &self.file.sites
    }

    pub fn get(&self, id: Uuid) -> Option<&Site> {
        self.file.sites.iter().find(|s| s.id == id)
    }

    pub fn find_duplicate(&self, host: &str, port: u16, username: &str) -> Option<&Site> {
        self.file
            .sites
            .iter()
            .find(|s| s.same_endpoint(host, port, username))
    }

    /// Add a site and remember its password.
    ///
    /// Returns `false` without touching anything when a site with the same
    /// host, port and username already exists.
    pub async fn add(&mut self, site: Site, password: &Credential) -> Result<bool, ProfileError> {
        if let Some(existing) = self.find_duplicate(&site.host, site.port, &site.username) {
            info!(
                "Site {}@{}:{} already saved as '{}'",
                site.username, site.host, site.port, existing.name
            );
            return Ok(false);
        }

        let id = site.id;
        self.file.sites.push(site);
        self.storage.save(&self.file).await?;
        self.credentials.store(id, password)?;
        Ok(true)
    }

    /// Replace a site's fields, keeping its id
    pub async fn update(&mut self, site: Site) -> Result<(), ProfileError> {
        let slot = self
            .file
            .sites
            .iter_mut()
            .find(|s| s.id == site.id)
            .ok_or(ProfileError::NotFound(site.id))?;
        *slot = site;
        self.storage.save(&self.file).await?;
        Ok(())
    }

    pub async fn remove(&mut self, id: Uuid) -> Result<(), ProfileError> {
        let before = self.file.sites.len();
        self.file.sites.retain(|s| s.id != id);
        if self.file.sites.len() == before {
            return Err(ProfileError::NotFound(id));
        }
        self.storage.save(&self.file).await?;
        if let Err(e) = self.credentials.delete(id) {
            warn!("Failed to delete stored password for site {}: {}", id, e);
        }
        Ok(())
    }

    pub fn password_for(&self, site: &Site) -> Result<Credential, ProfileError> {
        Ok(self.credentials.get(site.id)?)
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.file.settings
    }

    pub async fn set_settings(&mut self, settings: SessionSettings) -> Result<(), ProfileError> {
        self.file.settings = settings;
        self.storage.save(&self.file).await?;
        Ok(())
    }
}
