//! SFTP backend
//!
//! Runs every operation under one async mutex, so connect, listing, transfers
//! and metadata calls on the same backend never interleave on the wire.

use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client;
use russh_sftp::client::error::Error as SftpErrorInner;
use russh_sftp::client::SftpSession as RusshSftpSession;
use russh_sftp::protocol::FileAttributes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::error::BackendError;
use super::known_hosts::KnownHostsStore;
use super::path_utils::{file_name, join_remote_path, normalize_dir};
use super::ssh::{self, ClientHandler};
use super::types::RemoteFile;
use super::{BackendContext, Capability, ConnectTarget, ProgressFn, RemoteBackend};
use crate::config::ProtocolKind;
use crate::transfer::{Throttle, TransferControl};

/// Transfer chunk size
const CHUNK_SIZE: usize = 64 * 1024;

/// Per-chunk I/O timeout so a dead connection cannot park a transfer forever
const SFTP_IO_TIMEOUT: Duration = Duration::from_secs(300);

struct Connection {
    handle: client::Handle<ClientHandler>,
    sftp: RusshSftpSession,
}

pub struct SftpBackend {
    ctx: BackendContext,
    known_hosts: Arc<KnownHostsStore>,
    conn: Mutex<Option<Connection>>,
}

impl SftpBackend {
    pub fn new(ctx: BackendContext, known_hosts: Arc<KnownHostsStore>) -> Self {
        Self {
            ctx,
            known_hosts,
            conn: Mutex::new(None),
        }
    }

    async fn close(conn: Connection) {
        if let Err(e) = conn.sftp.close().await {
            debug!("SFTP close failed: {}", e);
        }
        let _ = conn
            .handle
            .disconnect(russh::Disconnect::ByApplication, "Session closed", "en")
            .await;
    }
}

fn map_sftp_error(err: SftpErrorInner, path: &str) -> BackendError {
    let err_str = err.to_string();
    if err_str.contains("No such file") || err_str.contains("not found") {
        BackendError::FileNotFound(path.to_string())
    } else if err_str.contains("Permission denied") {
        BackendError::PermissionDenied(path.to_string())
    } else {
        BackendError::from_transport_message(err_str)
    }
}

/// I/O error on a remote file handle
fn map_remote_io(err: io::Error) -> BackendError {
    match err.kind() {
        io::ErrorKind::BrokenPipe
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::UnexpectedEof => BackendError::TransportClosed(err.to_string()),
        _ => BackendError::from_transport_message(err.to_string()),
    }
}

async fn with_io_timeout<T, F>(what: &str, fut: F) -> Result<T, BackendError>
where
    F: std::future::Future<Output = io::Result<T>>,
{
    match tokio::time::timeout(SFTP_IO_TIMEOUT, fut).await {
        Ok(result) => result.map_err(map_remote_io),
        Err(_) => {
            warn!("SFTP {} timeout after {:?}", what, SFTP_IO_TIMEOUT);
            Err(BackendError::Timeout(format!(
                "Remote {} timeout after {:?} - connection may be dead",
                what, SFTP_IO_TIMEOUT
            )))
        }
    }
}

fn to_remote_file(name: String, path: String, attrs: &FileAttributes) -> RemoteFile {
    RemoteFile {
        name,
        path,
        is_dir: attrs.is_dir(),
        size: attrs.size.unwrap_or(0),
        modified: attrs.mtime.map(|t| t as i64).unwrap_or(0),
        permissions: attrs.permissions.map(|p| p & 0o777),
    }
}

/// Stream `reader` into a new file at `local`. A partial file is removed
/// when the copy fails or is cancelled.
async fn download_into<R>(
    reader: &mut R,
    local: &Path,
    total_bytes: u64,
    progress: &ProgressFn,
    control: &TransferControl,
    throttle: &Throttle,
) -> Result<u64, BackendError>
where
    R: AsyncRead + Unpin,
{
    let mut local_file = tokio::fs::File::create(local).await?;
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut transferred = 0u64;
    progress(0, total_bytes);

    let result = loop {
        if control.is_cancelled() {
            info!("Download cancelled at {} bytes", transferred);
            break Err(BackendError::Cancelled);
        }

        let bytes_read = match with_io_timeout("read", reader.read(&mut buffer)).await {
            Ok(0) => break local_file.flush().await.map_err(BackendError::from),
            Ok(n) => n,
            Err(e) => break Err(e),
        };

        if let Err(e) = local_file.write_all(&buffer[..bytes_read]).await {
            break Err(e.into());
        }
        transferred += bytes_read as u64;
        progress(transferred, total_bytes);
        throttle.pace(transferred).await;
    };

    drop(local_file);
    match result {
        Ok(()) => Ok(transferred),
        Err(e) => {
            if let Err(rm) = tokio::fs::remove_file(local).await {
                warn!("Failed to remove partial download {:?}: {}", local, rm);
            }
            Err(e)
        }
    }
}

#[async_trait]
impl RemoteBackend for SftpBackend {
    fn protocol(&self) -> ProtocolKind {
        ProtocolKind::Sftp
    }

    fn supports(&self, _capability: Capability) -> bool {
        true
    }

    async fn connect(&self, target: &ConnectTarget) -> Result<(), BackendError> {
        let mut guard = self.conn.lock().await;
        if let Some(old) = guard.take() {
            Self::close(old).await;
        }

        let handle = ssh::connect(
            target,
            self.ctx.connect_timeout,
            self.ctx.strict_host_key_checking,
            self.known_hosts.clone(),
        )
        .await?;

        let channel = handle.channel_open_session().await?;
        channel.request_subsystem(true, "sftp").await.map_err(|e| {
            BackendError::ConnectionFailed(format!("Failed to request SFTP subsystem: {}", e))
        })?;
        let sftp = RusshSftpSession::new(channel.into_stream())
            .await
            .map_err(|e| BackendError::ConnectionFailed(e.to_string()))?;

        info!("SFTP subsystem opened for {}", target.addr());
        *guard = Some(Connection { handle, sftp });
        Ok(())
    }

    async fn list(&self, path: &str) -> Result<Vec<RemoteFile>, BackendError> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(BackendError::NotConnected)?;

        let base = normalize_dir(path);
        debug!("Listing directory: {}", base);

        let read_dir = conn
            .sftp
            .read_dir(base.as_str())
            .await
            .map_err(|e| map_sftp_error(e, &base))?;

        let mut entries: Vec<RemoteFile> = read_dir
            .into_iter()
            .filter_map(|entry| {
                let name = entry.file_name();
                if name == "." || name == ".." {
                    return None;
                }
                let full_path = format!("{}{}", base, name);
                Some(to_remote_file(name, full_path, &entry.metadata()))
            })
            .collect();

        // Directories first, then by name
        entries.sort_by(|a, b| {
            b.is_dir
                .cmp(&a.is_dir)
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        });

        debug!("Listed {} entries in {}", entries.len(), base);
        Ok(entries)
    }

    async fn upload(
        &self,
        local: &Path,
        remote: &str,
        progress: ProgressFn,
        control: Arc<TransferControl>,
    ) -> Result<u64, BackendError> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(BackendError::NotConnected)?;

        let mut local_file = tokio::fs::File::open(local).await?;
        let total_bytes = local_file.metadata().await?.len();
        info!("Uploading {:?} -> {} ({} bytes)", local, remote, total_bytes);

        let mut remote_file = conn
            .sftp
            .create(remote)
            .await
            .map_err(|e| map_sftp_error(e, remote))?;

        let throttle = self.ctx.speed.upload_throttle();
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut transferred = 0u64;
        progress(0, total_bytes);

        loop {
            if control.is_cancelled() {
                info!("Upload cancelled at {} bytes", transferred);
                return Err(BackendError::Cancelled);
            }

            let bytes_read = local_file.read(&mut buffer).await?;
            if bytes_read == 0 {
                break;
            }

            with_io_timeout("write", remote_file.write_all(&buffer[..bytes_read])).await?;
            transferred += bytes_read as u64;
            progress(transferred, total_bytes);
            throttle.pace(transferred).await;
        }

        with_io_timeout("flush", remote_file.flush()).await?;
        with_io_timeout("close", remote_file.shutdown()).await?;

        info!("Upload complete: {} ({} bytes)", remote, transferred);
        Ok(transferred)
    }

    async fn download(
        &self,
        remote: &str,
        local: &Path,
        progress: ProgressFn,
        control: Arc<TransferControl>,
    ) -> Result<u64, BackendError> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(BackendError::NotConnected)?;

        let total_bytes = conn
            .sftp
            .metadata(remote)
            .await
            .map_err(|e| map_sftp_error(e, remote))?
            .size
            .unwrap_or(0);
        let mut remote_file = conn
            .sftp
            .open(remote)
            .await
            .map_err(|e| map_sftp_error(e, remote))?;
        info!("Downloading {} -> {:?} ({} bytes)", remote, local, total_bytes);

        let throttle = self.ctx.speed.download_throttle();
        let transferred =
            download_into(&mut remote_file, local, total_bytes, &progress, &control, &throttle)
                .await?;
        info!("Download complete: {} ({} bytes)", remote, transferred);
        Ok(transferred)
    }

    async fn remove(&self, path: &str) -> Result<(), BackendError> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(BackendError::NotConnected)?;
        info!("Deleting: {}", path);

        let attrs = conn
            .sftp
            .metadata(path)
            .await
            .map_err(|e| map_sftp_error(e, path))?;
        let result = if attrs.is_dir() {
            conn.sftp.remove_dir(path).await
        } else {
            conn.sftp.remove_file(path).await
        };
        result.map_err(|e| map_sftp_error(e, path))
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), BackendError> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(BackendError::NotConnected)?;
        info!("Renaming {} to {}", from, to);

        conn.sftp
            .rename(from, to)
            .await
            .map_err(|e| map_sftp_error(e, from))
    }

    async fn set_permissions(
        &self,
        path: &str,
        mode: u32,
        recursive: bool,
    ) -> Result<(), BackendError> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(BackendError::NotConnected)?;
        info!("chmod {:o} {} (recursive: {})", mode, path, recursive);

        let tree = SftpTree { sftp: &conn.sftp };
        apply_mode_recursive(&tree, path, mode, recursive).await
    }

    async fn exists(&self, path: &str) -> Result<bool, BackendError> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(BackendError::NotConnected)?;

        match conn.sftp.metadata(path).await {
            Ok(_) => Ok(true),
            Err(e) => match map_sftp_error(e, path) {
                BackendError::FileNotFound(_) => Ok(false),
                other => Err(other),
            },
        }
    }

    async fn stat(&self, path: &str) -> Result<RemoteFile, BackendError> {
        let guard = self.conn.lock().await;
        let conn = guard.as_ref().ok_or(BackendError::NotConnected)?;

        let attrs = conn
            .sftp
            .metadata(path)
            .await
            .map_err(|e| map_sftp_error(e, path))?;
        let name = file_name(path).unwrap_or("/").to_string();
        Ok(to_remote_file(name, path.to_string(), &attrs))
    }

    async fn disconnect(&self) {
        if let Some(conn) = self.conn.lock().await.take() {
            Self::close(conn).await;
            info!("SFTP backend disconnected");
        }
    }
}

/// The slice of a remote filesystem recursive chmod needs
#[async_trait]
pub(crate) trait ModeTree: Send + Sync {
    async fn set_mode(&self, path: &str, mode: u32) -> Result<(), BackendError>;
    async fn is_dir(&self, path: &str) -> Result<bool, BackendError>;
    /// Immediate children as `(path, is_dir)`
    async fn children(&self, path: &str) -> Result<Vec<(String, bool)>, BackendError>;
}

struct SftpTree<'a> {
    sftp: &'a RusshSftpSession,
}

#[async_trait]
impl ModeTree for SftpTree<'_> {
    async fn set_mode(&self, path: &str, mode: u32) -> Result<(), BackendError> {
        let attrs = FileAttributes {
            permissions: Some(mode),
            ..Default::default()
        };
        self.sftp
            .set_metadata(path, attrs)
            .await
            .map_err(|e| map_sftp_error(e, path))
    }

    async fn is_dir(&self, path: &str) -> Result<bool, BackendError> {
        self.sftp
            .metadata(path)
            .await
            .map(|attrs| attrs.is_dir())
            .map_err(|e| map_sftp_error(e, path))
    }

    async fn children(&self, path: &str) -> Result<Vec<(String, bool)>, BackendError> {
        let read_dir = self
            .sftp
            .read_dir(path)
            .await
            .map_err(|e| map_sftp_error(e, path))?;
        Ok(read_dir
            .into_iter()
            .filter(|entry| {
                let name = entry.file_name();
                name != "." && name != ".."
            })
            .map(|entry| {
                (
                    join_remote_path(path, &entry.file_name()),
                    entry.metadata().is_dir(),
                )
            })
            .collect())
    }
}

/// Set `mode` on `path` and, when recursive, on everything below it.
///
/// A failing child is logged and skipped; its siblings and (for a directory)
/// its own children are still attempted. Only the root call decides the result.
pub(crate) async fn apply_mode_recursive<T: ModeTree + ?Sized>(
    tree: &T,
    path: &str,
    mode: u32,
    recursive: bool,
) -> Result<(), BackendError> {
    tree.set_mode(path, mode).await?;

    if !recursive {
        return Ok(());
    }
    match tree.is_dir(path).await {
        Ok(true) => {}
        Ok(false) => return Ok(()),
        Err(e) => {
            warn!("chmod -R: cannot stat {}: {}", path, e);
            return Ok(());
        }
    }

    let mut pending = vec![path.to_string()];
    while let Some(dir) = pending.pop() {
        let children = match tree.children(&dir).await {
            Ok(children) => children,
            Err(e) => {
                warn!("chmod -R: cannot list {}: {}", dir, e);
                continue;
            }
        };
        for (child, is_dir) in children {
            if let Err(e) = tree.set_mode(&child, mode).await {
                warn!("chmod -R: {} failed: {}", child, e);
            }
            if is_dir {
                pending.push(child);
            }
        }
    }
    Ok(())
}
