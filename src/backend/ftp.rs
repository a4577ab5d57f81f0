//! FTP backend
//!
//! Stateless: `connect` only remembers the target. Each request opens its own
//! control connection, logs in, does its work and quits, on a blocking thread.
//! Only listing and download are offered.

use std::io::{self, Read, Write};
use std::net::ToSocketAddrs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::error::BackendError;
use super::path_utils::join_remote_path;
use super::types::RemoteFile;
use super::{BackendContext, Capability, ConnectTarget, ProgressFn, RemoteBackend};
use crate::config::ProtocolKind;
use crate::transfer::{Throttle, TransferControl};

const CHUNK_SIZE: usize = 64 * 1024;

/// `ls -l` lines shorter than this are not entries ("total 12" etc.)
const MIN_LISTING_FIELDS: usize = 9;

/// Position of the size column in an `ls -l` line
const SIZE_FIELD: usize = 4;

pub struct FtpBackend {
    ctx: BackendContext,
    target: Mutex<Option<ConnectTarget>>,
    /// One request at a time
    gate: Semaphore,
}

impl FtpBackend {
    pub fn new(ctx: BackendContext) -> Self {
        Self {
            ctx,
            target: Mutex::new(None),
            gate: Semaphore::new(1),
        }
    }

    /// Open a logged-in connection, run `f` on it, quit.
    async fn run<T, F>(&self, f: F) -> Result<T, BackendError>
    where
        F: FnOnce(&mut FtpStream) -> Result<T, BackendError> + Send + 'static,
        T: Send + 'static,
    {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| BackendError::Internal("FTP gate closed".to_string()))?;
        let target = self
            .target
            .lock()
            .clone()
            .ok_or(BackendError::NotConnected)?;
        let timeout = self.ctx.connect_timeout;

        tokio::task::spawn_blocking(move || {
            let mut stream = open_stream(&target, timeout)?;
            let result = f(&mut stream);
            if let Err(e) = stream.quit() {
                debug!("FTP QUIT failed: {}", e);
            }
            result
        })
        .await
        .map_err(|e| BackendError::Internal(format!("FTP worker failed: {}", e)))?
    }

    fn unsupported(&self, capability: Capability) -> BackendError {
        BackendError::unsupported(capability, ProtocolKind::Ftp)
    }
}

fn open_stream(target: &ConnectTarget, timeout: Duration) -> Result<FtpStream, BackendError> {
    let addr = target
        .addr()
        .to_socket_addrs()
        .map_err(|e| BackendError::ConnectionFailed(format!("Failed to resolve address: {}", e)))?
        .next()
        .ok_or_else(|| BackendError::ConnectionFailed("No address found".to_string()))?;

    let mut stream = FtpStream::connect_timeout(addr, timeout).map_err(|e| match e {
        FtpError::ConnectionError(io) => BackendError::from_socket_io(io),
        other => BackendError::ConnectionFailed(other.to_string()),
    })?;
    stream.get_ref().set_read_timeout(Some(timeout))?;

    stream
        .login(target.username.as_str(), target.password.expose())
        .map_err(|e| match e {
            FtpError::ConnectionError(io) => BackendError::from_socket_io(io),
            other => BackendError::AuthenticationFailed(other.to_string()),
        })?;
    Ok(stream)
}

fn map_ftp_error(err: FtpError, path: &str) -> BackendError {
    match err {
        FtpError::ConnectionError(io) => BackendError::from_socket_io(io),
        other => {
            let msg = other.to_string();
            if msg.contains("550") {
                BackendError::FileNotFound(path.to_string())
            } else if msg.contains("530") {
                BackendError::AuthenticationFailed(msg)
            } else {
                BackendError::Remote(msg)
            }
        }
    }
}

/// Parse `LIST` output.
///
/// Only the classic `ls -l` layout is understood: type flag in the first
/// character, size in the fifth field, name as the last token. Other
/// layouts are skipped or misread; modification time is not recovered.
pub fn parse_listing<I, S>(lines: I, base: &str) -> Vec<RemoteFile>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut entries = Vec::new();
    for chunk in lines {
        for line in chunk.as_ref().lines() {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < MIN_LISTING_FIELDS {
                continue;
            }
            let Some(name) = fields.last() else {
                continue;
            };
            if *name == "." || *name == ".." {
                continue;
            }
            entries.push(RemoteFile {
                name: name.to_string(),
                path: join_remote_path(base, name),
                is_dir: fields[0].starts_with('d'),
                size: fields[SIZE_FIELD].parse().unwrap_or(0),
                modified: 0,
                permissions: None,
            });
        }
    }
    entries
}

/// Copy a `RETR` data stream into a new file at `local`, chunk by chunk.
/// The file is removed again if the copy fails or is cancelled.
fn receive_blocking(
    reader: &mut dyn Read,
    local: &Path,
    total: u64,
    progress: &ProgressFn,
    control: &TransferControl,
    throttle: &Throttle,
) -> Result<u64, BackendError> {
    let mut file = std::fs::File::create(local)?;
    let mut buffer = vec![0u8; CHUNK_SIZE];
    let mut transferred = 0u64;
    progress(0, total);

    let result = loop {
        if control.is_cancelled() {
            info!("FTP download cancelled at {} bytes", transferred);
            break Err(BackendError::Cancelled);
        }
        let n = match reader.read(&mut buffer) {
            Ok(0) => break file.flush().map_err(BackendError::from),
            Ok(n) => n,
            Err(e) => break Err(BackendError::from_socket_io(e)),
        };
        if let Err(e) = file.write_all(&buffer[..n]) {
            break Err(e.into());
        }
        transferred += n as u64;
        progress(transferred, total);
        throttle.pace_blocking(transferred);
    };

    drop(file);
    match result {
        Ok(()) => Ok(transferred),
        Err(e) => {
            discard_partial(local);
            Err(e)
        }
    }
}

fn discard_partial(local: &Path) {
    match std::fs::remove_file(local) {
        Ok(()) => debug!("Removed partial download {:?}", local),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove partial download {:?}: {}", local, e),
    }
}

#[async_trait]
impl RemoteBackend for FtpBackend {
    fn protocol(&self) -> ProtocolKind {
        ProtocolKind::Ftp
    }

    fn supports(&self, capability: Capability) -> bool {
        matches!(capability, Capability::List | Capability::Download)
    }

    async fn connect(&self, target: &ConnectTarget) -> Result<(), BackendError> {
        info!(
            "FTP target set to {}@{} (login deferred to each request)",
            target.username,
            target.addr()
        );
        *self.target.lock() = Some(target.clone());
        Ok(())
    }

    async fn list(&self, path: &str) -> Result<Vec<RemoteFile>, BackendError> {
        let base = if path.is_empty() { "/" } else { path }.to_string();
        debug!("FTP LIST {}", base);

        let dir = base.clone();
        let lines = self
            .run(move |stream| {
                stream
                    .list(Some(dir.as_str()))
                    .map_err(|e| map_ftp_error(e, &dir))
            })
            .await?;

        let entries = parse_listing(&lines, &base);
        debug!("Listed {} entries in {}", entries.len(), base);
        Ok(entries)
    }

    async fn upload(
        &self,
        _local: &Path,
        _remote: &str,
        _progress: ProgressFn,
        _control: Arc<TransferControl>,
    ) -> Result<u64, BackendError> {
        Err(self.unsupported(Capability::Upload))
    }

    async fn download(
        &self,
        remote: &str,
        local: &Path,
        progress: ProgressFn,
        control: Arc<TransferControl>,
    ) -> Result<u64, BackendError> {
        let remote = remote.to_string();
        let local = local.to_path_buf();
        let throttle = self.ctx.speed.download_throttle();
        info!("FTP download {} -> {:?}", remote, local);

        self.run(move |stream| {
            // SIZE is optional on older servers
            let total = stream.size(remote.as_str()).map(|s| s as u64).unwrap_or(0);
            stream
                .transfer_type(FileType::Binary)
                .map_err(|e| map_ftp_error(e, &remote))?;

            let mut failure: Option<BackendError> = None;
            let result = stream.retr(remote.as_str(), |reader: &mut dyn Read| {
                receive_blocking(reader, &local, total, &progress, &control, &throttle).map_err(
                    |e| {
                        failure = Some(e);
                        FtpError::ConnectionError(io::Error::new(
                            io::ErrorKind::Interrupted,
                            "download aborted",
                        ))
                    },
                )
            });

            match (result, failure) {
                (Ok(transferred), _) => {
                    info!("FTP download complete: {} ({} bytes)", remote, transferred);
                    Ok(transferred)
                }
                // Partial file already removed by `receive_blocking`
                (Err(_), Some(e)) => Err(e),
                (Err(e), None) => {
                    discard_partial(&local);
                    Err(map_ftp_error(e, &remote))
                }
            }
        })
        .await
    }

    async fn remove(&self, _path: &str) -> Result<(), BackendError> {
        Err(self.unsupported(Capability::Remove))
    }

    async fn rename(&self, _from: &str, _to: &str) -> Result<(), BackendError> {
        Err(self.unsupported(Capability::Rename))
    }

    async fn set_permissions(
        &self,
        _path: &str,
        _mode: u32,
        _recursive: bool,
    ) -> Result<(), BackendError> {
        Err(self.unsupported(Capability::SetPermissions))
    }

    async fn exists(&self, _path: &str) -> Result<bool, BackendError> {
        Err(self.unsupported(Capability::Exists))
    }

    async fn stat(&self, _path: &str) -> Result<RemoteFile, BackendError> {
        Err(self.unsupported(Capability::Stat))
    }

    async fn disconnect(&self) {
        if self.target.lock().take().is_some() {
            info!("FTP backend disconnected");
        }
    }
}
