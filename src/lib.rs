//! Remote file session engine
//!
//! Browse and transfer files on a remote server over SFTP or plain FTP.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use fileserver_client::config::{ConfigStorage, Keychain};
//! use fileserver_client::{ProfileStore, SessionHandle};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! fileserver_client::init_logging();
//!
//! let profiles = ProfileStore::load(ConfigStorage::new()?, Arc::new(Keychain::new())).await?;
//! let site = profiles.sites()[0].clone();
//! let password = profiles.password_for(&site)?;
//!
//! let session = SessionHandle::new(profiles.settings().clone());
//! session.load_profile(site, password)?;
//! session.change_directory("/pub")?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod config;
pub mod session;
pub mod transfer;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub use backend::{BackendError, Capability, RemoteBackend, RemoteFile};
pub use config::{Credential, ProfileStore, ProtocolKind, SessionSettings, Site};
pub use session::{
    ConnectionState, SessionError, SessionEvent, SessionHandle, SessionSnapshot, TransferOutcome,
};
pub use transfer::{TransferDirection, TransferId, TransferSnapshot};

/// Install the default `tracing` subscriber (`RUST_LOG`, falling back to `info`).
///
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
