//! Protocol Backends
//!
//! One capability set, two implementations:
//! - `SftpBackend`: SFTP over an SSH connection (russh / russh-sftp)
//! - `FtpBackend`: plain FTP (suppaftp), stateless between requests
//!
//! Callers ask `supports()` before issuing an operation; a backend that lacks
//! a capability answers `BackendError::Unsupported` without touching the network.

pub mod error;
pub mod ftp;
pub mod known_hosts;
pub mod path_utils;
pub mod sftp;
pub mod ssh;
pub mod types;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::{Credential, ProtocolKind, SessionSettings, Site};
use crate::transfer::{SpeedLimits, TransferControl};

pub use error::BackendError;
pub use ftp::FtpBackend;
pub use known_hosts::{HostKeyVerification, KnownHostsStore};
pub use sftp::SftpBackend;
pub use types::RemoteFile;
pub use worker::BackendWorker;

/// Operations a backend may or may not offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    List,
    Upload,
    Download,
    Remove,
    Rename,
    SetPermissions,
    Exists,
    Stat,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::List => "listing",
            Capability::Upload => "upload",
            Capability::Download => "download",
            Capability::Remove => "delete",
            Capability::Rename => "move/rename",
            Capability::SetPermissions => "permission change",
            Capability::Exists => "existence check",
            Capability::Stat => "file info",
        };
        f.write_str(name)
    }
}

/// Byte-level progress: `(transferred, total)`. `total` is 0 when unknown.
pub type ProgressFn = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// Where and as whom to connect
#[derive(Debug, Clone)]
pub struct ConnectTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: Credential,
}

impl ConnectTarget {
    pub fn new(site: &Site, password: Credential) -> Self {
        Self {
            host: site.host.clone(),
            port: site.port,
            username: site.username.clone(),
            password,
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Remote file protocol capability provider.
///
/// Every operation reports its outcome as a `Result`; nothing panics past
/// this boundary.
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    fn protocol(&self) -> ProtocolKind;

    fn supports(&self, capability: Capability) -> bool;

    async fn connect(&self, target: &ConnectTarget) -> Result<(), BackendError>;

    async fn list(&self, path: &str) -> Result<Vec<RemoteFile>, BackendError>;

    /// Returns the number of bytes written
    async fn upload(
        &self,
        local: &Path,
        remote: &str,
        progress: ProgressFn,
        control: Arc<TransferControl>,
    ) -> Result<u64, BackendError>;

    /// Returns the number of bytes received
    async fn download(
        &self,
        remote: &str,
        local: &Path,
        progress: ProgressFn,
        control: Arc<TransferControl>,
    ) -> Result<u64, BackendError>;

    async fn remove(&self, path: &str) -> Result<(), BackendError>;

    async fn rename(&self, from: &str, to: &str) -> Result<(), BackendError>;

    /// Result reflects only the call on `path` itself, never on its children
    async fn set_permissions(
        &self,
        path: &str,
        mode: u32,
        recursive: bool,
    ) -> Result<(), BackendError>;

    async fn exists(&self, path: &str) -> Result<bool, BackendError>;

    async fn stat(&self, path: &str) -> Result<RemoteFile, BackendError>;

    async fn disconnect(&self);
}

/// Shared resources handed to every backend a session creates
#[derive(Clone)]
pub struct BackendContext {
    pub speed: SpeedLimits,
    pub connect_timeout: Duration,
    pub strict_host_key_checking: bool,
}

impl BackendContext {
    pub fn from_settings(settings: &SessionSettings, speed: SpeedLimits) -> Self {
        Self {
            speed,
            connect_timeout: Duration::from_secs(settings.connect_timeout_secs),
            strict_host_key_checking: settings.strict_host_key_checking,
        }
    }
}

/// Builds the backend matching a site's protocol
pub trait BackendFactory: Send + Sync {
    fn create(&self, site: &Site, ctx: &BackendContext) -> Arc<dyn RemoteBackend>;
}

pub struct DefaultBackendFactory {
    known_hosts: Arc<KnownHostsStore>,
}

impl DefaultBackendFactory {
    pub fn new() -> Self {
        Self {
            known_hosts: Arc::new(KnownHostsStore::new()),
        }
    }

    pub fn with_known_hosts(known_hosts: Arc<KnownHostsStore>) -> Self {
        Self { known_hosts }
    }
}

impl Default for DefaultBackendFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendFactory for DefaultBackendFactory {
    fn create(&self, site: &Site, ctx: &BackendContext) -> Arc<dyn RemoteBackend> {
        match site.protocol {
            ProtocolKind::Sftp => Arc::new(SftpBackend::new(ctx.clone(), self.known_hosts.clone())),
            ProtocolKind::Ftp => Arc::new(FtpBackend::new(ctx.clone())),
        }
    }
}
