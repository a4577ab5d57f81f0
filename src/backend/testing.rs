//! Scripted backend for session tests

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::error::BackendError;
use super::path_utils::join_remote_path;
use super::types::RemoteFile;
use super::{
    BackendContext, BackendFactory, Capability, ConnectTarget, ProgressFn, RemoteBackend,
};
use crate::config::{ProtocolKind, Site};
use crate::transfer::TransferControl;

#[derive(Clone, Copy, Debug)]
pub(crate) enum MockFailure {
    TransportClosed,
    Remote,
}

impl MockFailure {
    fn to_error(self, path: &str) -> BackendError {
        match self {
            MockFailure::TransportClosed => {
                BackendError::TransportClosed("I/O: connection reset by peer".to_string())
            }
            MockFailure::Remote => BackendError::Remote(format!("failure on {}", path)),
        }
    }
}

#[derive(Default)]
struct Script {
    calls: Vec<String>,
    listings: HashMap<String, Vec<RemoteFile>>,
    list_delays: HashMap<String, Duration>,
    list_failures: HashMap<String, MockFailure>,
    op_failures: HashMap<String, MockFailure>,
    /// Time an upload or download to this remote path takes
    op_delays: HashMap<String, Duration>,
    connect_error: Option<String>,
    /// Uploads wait for cancellation instead of finishing
    hold_uploads: bool,
}

pub(crate) struct MockBackend {
    protocol: ProtocolKind,
    script: Mutex<Script>,
}

pub(crate) fn entry(dir: &str, name: &str, is_dir: bool) -> RemoteFile {
    RemoteFile {
        name: name.to_string(),
        path: join_remote_path(dir, name),
        is_dir,
        size: if is_dir { 0 } else { 100 },
        modified: 0,
        permissions: Some(0o644),
    }
}

impl MockBackend {
    pub fn new(protocol: ProtocolKind) -> Arc<Self> {
        Arc::new(Self {
            protocol,
            script: Mutex::new(Script::default()),
        })
    }

    pub fn set_listing(&self, path: &str, names: &[&str]) {
        let files = names.iter().map(|n| entry(path, n, false)).collect();
        self.script.lock().listings.insert(path.to_string(), files);
    }

    pub fn set_list_delay(&self, path: &str, delay: Duration) {
        self.script
            .lock()
            .list_delays
            .insert(path.to_string(), delay);
    }

    pub fn fail_list(&self, path: &str, failure: MockFailure) {
        self.script
            .lock()
            .list_failures
            .insert(path.to_string(), failure);
    }

    pub fn fail_op(&self, path: &str, failure: MockFailure) {
        self.script
            .lock()
            .op_failures
            .insert(path.to_string(), failure);
    }

    pub fn set_op_delay(&self, path: &str, delay: Duration) {
        self.script.lock().op_delays.insert(path.to_string(), delay);
    }

    pub fn fail_connect(&self, message: &str) {
        self.script.lock().connect_error = Some(message.to_string());
    }

    pub fn hold_uploads(&self) {
        self.script.lock().hold_uploads = true;
    }

    pub fn calls(&self) -> Vec<String> {
        self.script.lock().calls.clone()
    }

    /// Calls whose text starts with `prefix`
    pub fn calls_to(&self, prefix: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with(prefix))
            .collect()
    }

    fn record(&self, call: String) {
        self.script.lock().calls.push(call);
    }

    async fn op_delay(&self, path: &str) {
        let delay = self.script.lock().op_delays.get(path).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn op_result(&self, path: &str) -> Result<(), BackendError> {
        match self.script.lock().op_failures.get(path) {
            Some(failure) => Err(failure.to_error(path)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteBackend for MockBackend {
    fn protocol(&self) -> ProtocolKind {
        self.protocol
    }

    fn supports(&self, capability: Capability) -> bool {
        match self.protocol {
            ProtocolKind::Sftp => true,
            ProtocolKind::Ftp => matches!(capability, Capability::List | Capability::Download),
        }
    }

    async fn connect(&self, target: &ConnectTarget) -> Result<(), BackendError> {
        self.record(format!("connect {}", target.addr()));
        match self.script.lock().connect_error.clone() {
            Some(message) => Err(BackendError::AuthenticationFailed(message)),
            None => Ok(()),
        }
    }

    async fn list(&self, path: &str) -> Result<Vec<RemoteFile>, BackendError> {
        self.record(format!("list {}", path));
        let (delay, failure, files) = {
            let script = self.script.lock();
            (
                script.list_delays.get(path).copied(),
                script.list_failures.get(path).copied(),
                script.listings.get(path).cloned().unwrap_or_default(),
            )
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(failure) => Err(failure.to_error(path)),
            None => Ok(files),
        }
    }

    async fn upload(
        &self,
        local: &Path,
        remote: &str,
        progress: ProgressFn,
        control: Arc<TransferControl>,
    ) -> Result<u64, BackendError> {
        self.record(format!("upload {} {}", local.display(), remote));
        progress(10, 100);
        if self.script.lock().hold_uploads {
            control.cancelled().await;
            return Err(BackendError::Cancelled);
        }
        self.op_delay(remote).await;
        self.op_result(remote)?;
        progress(100, 100);
        Ok(100)
    }

    async fn download(
        &self,
        remote: &str,
        local: &Path,
        progress: ProgressFn,
        _control: Arc<TransferControl>,
    ) -> Result<u64, BackendError> {
        self.record(format!("download {} {}", remote, local.display()));
        self.op_delay(remote).await;
        self.op_result(remote)?;
        progress(100, 100);
        Ok(100)
    }

    async fn remove(&self, path: &str) -> Result<(), BackendError> {
        if !self.supports(Capability::Remove) {
            return Err(BackendError::unsupported(Capability::Remove, self.protocol));
        }
        self.record(format!("remove {}", path));
        self.op_result(path)
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), BackendError> {
        if !self.supports(Capability::Rename) {
            return Err(BackendError::unsupported(Capability::Rename, self.protocol));
        }
        self.record(format!("rename {} {}", from, to));
        self.op_result(from)
    }

    async fn set_permissions(
        &self,
        path: &str,
        mode: u32,
        recursive: bool,
    ) -> Result<(), BackendError> {
        self.record(format!("chmod {:o} {} {}", mode, path, recursive));
        self.op_result(path)
    }

    async fn exists(&self, path: &str) -> Result<bool, BackendError> {
        self.record(format!("exists {}", path));
        self.op_result(path)?;
        let script = self.script.lock();
        Ok(script
            .listings
            .values()
            .flatten()
            .any(|f| f.path == path))
    }

    async fn stat(&self, path: &str) -> Result<RemoteFile, BackendError> {
        self.record(format!("stat {}", path));
        self.op_result(path)?;
        let script = self.script.lock();
        script
            .listings
            .values()
            .flatten()
            .find(|f| f.path == path)
            .cloned()
            .ok_or_else(|| BackendError::FileNotFound(path.to_string()))
    }

    async fn disconnect(&self) {
        self.record("disconnect".to_string());
    }
}

/// Hands out the same mock for every site so tests can inspect it
pub(crate) struct MockFactory {
    backend: Arc<MockBackend>,
}

impl MockFactory {
    pub fn new(backend: Arc<MockBackend>) -> Arc<Self> {
        Arc::new(Self { backend })
    }
}

impl BackendFactory for MockFactory {
    fn create(&self, _site: &Site, _ctx: &BackendContext) -> Arc<dyn RemoteBackend> {
        self.backend.clone()
    }
}
