//! Configuration Management Module
//!
//! Connection profiles, session settings, and credential storage via the
//! system keychain.

pub mod keychain;
pub mod profiles;
pub mod storage;
pub mod types;

pub use keychain::{Credential, CredentialStore, Keychain, KeychainError, MemoryCredentialStore};
pub use profiles::{ProfileError, ProfileStore};
pub use storage::{config_dir, profiles_file, ConfigStorage, StorageError};
pub use types::{ProfilesFile, ProtocolKind, SessionSettings, Site, CONFIG_VERSION};
