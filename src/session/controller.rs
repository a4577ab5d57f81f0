//! Session Controller
//!
//! Single owner of the connection, current path, file list and transfer
//! queue. Runs as one task; callers talk to it through `SessionHandle`.
//!
//! # Architecture
//!
//! ```text
//! SessionHandle ──SessionMsg──▶ Controller task ──jobs──▶ BackendWorker (serial)
//!                                    ▲                         │
//!                                    └──── completion msgs ────┘
//! ```
//!
//! Every completion carries the generation of the backend that produced it.
//! Completions from a backend replaced by `load_profile`/`disconnect` are
//! ignored. Listing completions additionally carry a `RequestEpoch`; only the
//! live epoch may touch the published file list.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use super::error::SessionError;
use super::navigation::{Debouncer, EpochCounter, RequestEpoch};
use super::types::{ConnectionState, SessionEvent, SessionSnapshot, TransferOutcome};
use crate::backend::path_utils::{file_name, join_remote_path, parent_path};
use crate::backend::{
    BackendContext, BackendError, BackendFactory, BackendWorker, Capability, ConnectTarget,
    DefaultBackendFactory, ProgressFn, RemoteBackend, RemoteFile,
};
use crate::config::{Credential, SessionSettings, Site};
use crate::transfer::{
    CancelOutcome, SpeedLimits, TransferDirection, TransferId, TransferQueue, TransferTask,
};

const EVENT_CAPACITY: usize = 64;

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

enum SessionMsg {
    LoadProfile {
        site: Site,
        credential: Credential,
    },
    ChangeDirectory(String),
    GoUp,
    ReloadFiles,
    Upload {
        source: PathBuf,
        destination_dir: String,
        reply: Reply<TransferId>,
    },
    Download {
        remote_path: String,
        local_dir: PathBuf,
        reply: Reply<TransferId>,
    },
    CancelTransfer(TransferId),
    Delete {
        path: String,
        reply: Reply<()>,
    },
    Move {
        from: String,
        to: String,
        reply: Reply<()>,
    },
    Rename {
        from: String,
        new_name: String,
        reply: Reply<()>,
    },
    ChangePermissions {
        path: String,
        mode: u32,
        recursive: bool,
        reply: Reply<()>,
    },
    FileExists {
        path: String,
        reply: Reply<bool>,
    },
    FileInfo {
        path: String,
        reply: Reply<RemoteFile>,
    },
    Disconnect,
    ClearError,
    SetSpeedLimits {
        upload_kbps: usize,
        download_kbps: usize,
    },
    Shutdown,

    // Completions
    ConnectDone {
        generation: RequestEpoch,
        result: Result<(), BackendError>,
    },
    DebounceElapsed {
        ticket: u64,
    },
    ListingDone {
        generation: RequestEpoch,
        epoch: RequestEpoch,
        path: String,
        result: Result<Vec<RemoteFile>, BackendError>,
    },
    TransferProgress {
        generation: RequestEpoch,
        id: TransferId,
        transferred: u64,
        total: u64,
    },
    TransferDone {
        generation: RequestEpoch,
        id: TransferId,
        result: Result<u64, BackendError>,
    },
    OperationDone {
        generation: RequestEpoch,
        result: Result<(), BackendError>,
        reply: Reply<()>,
    },
    TransportLost {
        generation: RequestEpoch,
        reason: String,
    },
}

fn post(tx: &mpsc::WeakUnboundedSender<SessionMsg>, msg: SessionMsg) {
    if let Some(tx) = tx.upgrade() {
        let _ = tx.send(msg);
    }
}

/// Cheap-to-clone handle to a running session.
///
/// The session task stops when every handle is dropped or on `shutdown`.
#[derive(Clone)]
pub struct SessionHandle {
    msg_tx: mpsc::UnboundedSender<SessionMsg>,
    state_rx: watch::Receiver<SessionSnapshot>,
    events_tx: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    /// Spawn a session using the real SFTP/FTP backends.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(settings: SessionSettings) -> Self {
        Self::with_factory(settings, Arc::new(DefaultBackendFactory::new()))
    }

    pub fn with_factory(settings: SessionSettings, factory: Arc<dyn BackendFactory>) -> Self {
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionSnapshot::default());
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);

        let controller = Controller {
            speed: SpeedLimits::new(settings.upload_limit_kbps, settings.download_limit_kbps),
            debouncer: Debouncer::new(Duration::from_millis(settings.debounce_ms)),
            settings,
            factory,
            self_tx: msg_tx.downgrade(),
            state_tx,
            events_tx: events_tx.clone(),
            active: None,
            generations: EpochCounter::new(),
            epochs: EpochCounter::new(),
            listing: None,
            reload_pending: false,
            queue: TransferQueue::new(),
            state: ConnectionState::Disconnected,
            server_name: None,
            current_path: "/".to_string(),
            files: Arc::new(Vec::new()),
            error: None,
        };
        tokio::spawn(controller.run(msg_rx));

        Self {
            msg_tx,
            state_rx,
            events_tx,
        }
    }

    fn send(&self, msg: SessionMsg) -> Result<(), SessionError> {
        self.msg_tx.send(msg).map_err(|_| SessionError::Closed)
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> SessionMsg,
    ) -> Result<T, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(make(reply_tx))?;
        reply_rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Drop the current connection (if any) and connect to `site`
    pub fn load_profile(&self, site: Site, credential: Credential) -> Result<(), SessionError> {
        self.send(SessionMsg::LoadProfile { site, credential })
    }

    /// Navigate; the listing follows once navigation settles
    pub fn change_directory(&self, path: impl Into<String>) -> Result<(), SessionError> {
        self.send(SessionMsg::ChangeDirectory(path.into()))
    }

    pub fn go_up(&self) -> Result<(), SessionError> {
        self.send(SessionMsg::GoUp)
    }

    pub fn reload_files(&self) -> Result<(), SessionError> {
        self.send(SessionMsg::ReloadFiles)
    }

    /// Queue `source` for upload into `destination_dir`
    pub async fn upload(
        &self,
        source: impl Into<PathBuf>,
        destination_dir: impl Into<String>,
    ) -> Result<TransferId, SessionError> {
        let source = source.into();
        let destination_dir = destination_dir.into();
        self.request(|reply| SessionMsg::Upload {
            source,
            destination_dir,
            reply,
        })
        .await
    }

    /// Queue `remote_path` for download into `local_dir`
    pub async fn download(
        &self,
        remote_path: impl Into<String>,
        local_dir: impl Into<PathBuf>,
    ) -> Result<TransferId, SessionError> {
        let remote_path = remote_path.into();
        let local_dir = local_dir.into();
        self.request(|reply| SessionMsg::Download {
            remote_path,
            local_dir,
            reply,
        })
        .await
    }

    pub fn cancel_transfer(&self, id: TransferId) -> Result<(), SessionError> {
        self.send(SessionMsg::CancelTransfer(id))
    }

    pub async fn delete(&self, path: impl Into<String>) -> Result<(), SessionError> {
        let path = path.into();
        self.request(|reply| SessionMsg::Delete { path, reply }).await
    }

    pub async fn move_path(
        &self,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Result<(), SessionError> {
        let (from, to) = (from.into(), to.into());
        self.request(|reply| SessionMsg::Move { from, to, reply })
            .await
    }

    /// Rename within the same directory
    pub async fn rename(
        &self,
        from: impl Into<String>,
        new_name: impl Into<String>,
    ) -> Result<(), SessionError> {
        let (from, new_name) = (from.into(), new_name.into());
        self.request(|reply| SessionMsg::Rename {
            from,
            new_name,
            reply,
        })
        .await
    }

    pub async fn change_permissions(
        &self,
        path: impl Into<String>,
        mode: u32,
        recursive: bool,
    ) -> Result<(), SessionError> {
        let path = path.into();
        self.request(|reply| SessionMsg::ChangePermissions {
            path,
            mode,
            recursive,
            reply,
        })
        .await
    }

    pub async fn file_exists(&self, path: impl Into<String>) -> Result<bool, SessionError> {
        let path = path.into();
        self.request(|reply| SessionMsg::FileExists { path, reply })
            .await
    }

    pub async fn file_info(&self, path: impl Into<String>) -> Result<RemoteFile, SessionError> {
        let path = path.into();
        self.request(|reply| SessionMsg::FileInfo { path, reply })
            .await
    }

    pub fn disconnect(&self) -> Result<(), SessionError> {
        self.send(SessionMsg::Disconnect)
    }

    /// Acknowledge the published error
    pub fn clear_error(&self) -> Result<(), SessionError> {
        self.send(SessionMsg::ClearError)
    }

    /// KB/s, 0 = unlimited. Applies to the running transfer too.
    pub fn set_speed_limits(
        &self,
        upload_kbps: usize,
        download_kbps: usize,
    ) -> Result<(), SessionError> {
        self.send(SessionMsg::SetSpeedLimits {
            upload_kbps,
            download_kbps,
        })
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionSnapshot> {
        self.state_rx.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    pub fn shutdown(&self) {
        let _ = self.send(SessionMsg::Shutdown);
    }
}

struct ActiveBackend {
    generation: RequestEpoch,
    site: Site,
    backend: Arc<dyn RemoteBackend>,
    worker: BackendWorker,
}

struct InFlightListing {
    epoch: RequestEpoch,
    path: String,
}

struct Controller {
    settings: SessionSettings,
    factory: Arc<dyn BackendFactory>,
    speed: SpeedLimits,
    self_tx: mpsc::WeakUnboundedSender<SessionMsg>,
    state_tx: watch::Sender<SessionSnapshot>,
    events_tx: broadcast::Sender<SessionEvent>,

    active: Option<ActiveBackend>,
    /// Identifies backend instances
    generations: EpochCounter,
    /// Identifies listing requests
    epochs: EpochCounter,
    listing: Option<InFlightListing>,
    /// A reload arrived while the same path was being listed
    reload_pending: bool,
    debouncer: Debouncer,
    queue: TransferQueue,

    state: ConnectionState,
    server_name: Option<String>,
    current_path: String,
    files: Arc<Vec<RemoteFile>>,
    error: Option<String>,
}

impl Controller {
    async fn run(mut self, mut msg_rx: mpsc::UnboundedReceiver<SessionMsg>) {
        info!("Session controller started");

        while let Some(msg) = msg_rx.recv().await {
            if matches!(msg, SessionMsg::Shutdown) {
                info!("Session shutdown requested");
                break;
            }
            self.handle(msg);
            self.publish();
        }

        self.teardown();
        self.state = ConnectionState::Disconnected;
        self.publish();
        info!("Session controller stopped");
    }

    fn handle(&mut self, msg: SessionMsg) {
        match msg {
            SessionMsg::LoadProfile { site, credential } => self.load_profile(site, credential),
            SessionMsg::ChangeDirectory(path) => self.change_directory(path),
            SessionMsg::GoUp => {
                if let Some(parent) = parent_path(&self.current_path) {
                    self.change_directory(parent);
                }
            }
            SessionMsg::ReloadFiles => self.reload_files(),
            SessionMsg::Upload {
                source,
                destination_dir,
                reply,
            } => {
                let _ = reply.send(self.enqueue_upload(source, destination_dir));
            }
            SessionMsg::Download {
                remote_path,
                local_dir,
                reply,
            } => {
                let _ = reply.send(self.enqueue_download(remote_path, local_dir));
            }
            SessionMsg::CancelTransfer(id) => self.cancel_transfer(id),
            SessionMsg::Delete { path, reply } => {
                self.run_mutation(Capability::Remove, reply, move |backend| async move {
                    backend.remove(&path).await
                })
            }
            SessionMsg::Move { from, to, reply } => {
                self.run_mutation(Capability::Rename, reply, move |backend| async move {
                    backend.rename(&from, &to).await
                })
            }
            SessionMsg::Rename {
                from,
                new_name,
                reply,
            } => {
                if new_name.is_empty() || new_name.contains('/') {
                    let _ = reply.send(Err(SessionError::InvalidPath(new_name)));
                    return;
                }
                let dir = parent_path(&from).unwrap_or_else(|| "/".to_string());
                let to = join_remote_path(&dir, &new_name);
                self.run_mutation(Capability::Rename, reply, move |backend| async move {
                    backend.rename(&from, &to).await
                })
            }
            SessionMsg::ChangePermissions {
                path,
                mode,
                recursive,
                reply,
            } => self.run_query(Capability::SetPermissions, reply, move |backend| async move {
                backend.set_permissions(&path, mode, recursive).await
            }),
            SessionMsg::FileExists { path, reply } => {
                self.run_query(Capability::Exists, reply, move |backend| async move {
                    backend.exists(&path).await
                })
            }
            SessionMsg::FileInfo { path, reply } => {
                self.run_query(Capability::Stat, reply, move |backend| async move {
                    backend.stat(&path).await
                })
            }
            SessionMsg::Disconnect => self.disconnect(),
            SessionMsg::ClearError => self.error = None,
            SessionMsg::SetSpeedLimits {
                upload_kbps,
                download_kbps,
            } => {
                self.settings.upload_limit_kbps = upload_kbps;
                self.settings.download_limit_kbps = download_kbps;
                self.speed.set_kbps(upload_kbps, download_kbps);
            }
            SessionMsg::Shutdown => {}

            SessionMsg::ConnectDone { generation, result } => {
                self.on_connect_done(generation, result)
            }
            SessionMsg::DebounceElapsed { ticket } => {
                if self.debouncer.complete(ticket) {
                    self.reload_files();
                }
            }
            SessionMsg::ListingDone {
                generation,
                epoch,
                path,
                result,
            } => self.on_listing_done(generation, epoch, path, result),
            SessionMsg::TransferProgress {
                generation,
                id,
                transferred,
                total,
            } => self.on_transfer_progress(generation, id, transferred, total),
            SessionMsg::TransferDone {
                generation,
                id,
                result,
            } => self.on_transfer_done(generation, id, result),
            SessionMsg::OperationDone {
                generation,
                result,
                reply,
            } => self.on_operation_done(generation, result, reply),
            SessionMsg::TransportLost { generation, reason } => {
                if self.is_live(generation) {
                    self.connection_lost(reason);
                }
            }
        }
    }

    // === Connection lifecycle ===

    fn load_profile(&mut self, site: Site, credential: Credential) {
        info!(
            "Loading profile '{}' ({} {}@{}:{})",
            site.name, site.protocol, site.username, site.host, site.port
        );
        self.teardown();
        self.state = ConnectionState::Connecting;
        self.server_name = None;
        self.current_path = "/".to_string();
        self.files = Arc::new(Vec::new());
        self.error = None;

        let generation = self.generations.advance();
        let ctx = BackendContext::from_settings(&self.settings, self.speed.clone());
        let backend = self.factory.create(&site, &ctx);
        let worker = BackendWorker::spawn(format!("{} #{}", site.name, generation.value()));

        let target = ConnectTarget::new(&site, credential);
        let job_backend = backend.clone();
        let tx = self.self_tx.clone();
        worker.submit(async move {
            let result = job_backend.connect(&target).await;
            post(&tx, SessionMsg::ConnectDone { generation, result });
        });

        self.active = Some(ActiveBackend {
            generation,
            site,
            backend,
            worker,
        });
    }

    fn on_connect_done(&mut self, generation: RequestEpoch, result: Result<(), BackendError>) {
        if !self.is_live(generation) {
            debug!("Ignoring connect result from a replaced backend");
            return;
        }
        match result {
            Ok(()) => {
                let name = self.active.as_ref().map(|a| a.site.name.clone());
                info!("Connected to {}", name.as_deref().unwrap_or("?"));
                self.state = ConnectionState::Connected;
                self.server_name = name;
                self.current_path = "/".to_string();
                // First paint: no debounce
                self.reload_files();
            }
            Err(e) => {
                warn!("Connection failed: {}", e);
                self.retire_backend();
                self.state = ConnectionState::Failed;
                self.error = Some(e.to_string());
                self.files = Arc::new(Vec::new());
            }
        }
    }

    fn disconnect(&mut self) {
        if self.active.is_some() {
            info!("Disconnecting");
        }
        self.teardown();
        self.state = ConnectionState::Disconnected;
        self.server_name = None;
        self.current_path = "/".to_string();
        self.files = Arc::new(Vec::new());
    }

    /// Socket-level failure: discard the backend, keep the reason visible
    fn connection_lost(&mut self, reason: String) {
        warn!("Connection lost: {}", reason);
        self.teardown();
        self.state = ConnectionState::Disconnected;
        self.server_name = None;
        self.files = Arc::new(Vec::new());
        self.error = Some(reason.clone());
        self.emit(SessionEvent::Disconnected { reason });
    }

    /// Stop everything tied to the current backend
    fn teardown(&mut self) {
        self.debouncer.cancel();
        self.epochs.invalidate();
        self.listing = None;
        self.reload_pending = false;
        for task in self.queue.clear() {
            self.emit(SessionEvent::TransferFinished {
                id: task.id,
                outcome: TransferOutcome::Cancelled,
            });
        }
        self.retire_backend();
    }

    fn retire_backend(&mut self) {
        if let Some(active) = self.active.take() {
            debug!("Retiring backend #{}", active.generation.value());
            let backend = active.backend;
            // Runs after whatever is already queued; the worker then exits
            active.worker.submit(async move { backend.disconnect().await });
        }
    }

    fn is_live(&self, generation: RequestEpoch) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.generation == generation)
    }

    fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected && self.active.is_some()
    }

    /// Backend handle for an operation, or the reason it cannot run
    fn require(
        &self,
        capability: Capability,
    ) -> Result<(Arc<dyn RemoteBackend>, RequestEpoch), SessionError> {
        let active = match &self.active {
            Some(active) if self.state == ConnectionState::Connected => active,
            _ => return Err(SessionError::NotConnected),
        };
        if !active.backend.supports(capability) {
            return Err(SessionError::Unsupported {
                operation: capability,
                protocol: active.backend.protocol(),
            });
        }
        Ok((active.backend.clone(), active.generation))
    }

    fn submit<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if let Some(active) = &self.active {
            active.worker.submit(job);
        }
    }

    // === Navigation ===

    fn change_directory(&mut self, path: String) {
        if !self.is_connected() {
            debug!("change_directory ignored: not connected");
            return;
        }
        let path = if path.is_empty() { "/".to_string() } else { path };
        if path == self.current_path {
            return;
        }
        debug!("Navigating to {}", path);
        self.current_path = path;

        // Whatever is being listed now belongs to the path we just left
        if let Some(listing) = self.listing.take() {
            debug!("Abandoning listing of {}", listing.path);
        }
        self.epochs.invalidate();
        self.reload_pending = false;

        let tx = self.self_tx.clone();
        self.debouncer
            .reset(move |ticket| post(&tx, SessionMsg::DebounceElapsed { ticket }));
    }

    fn reload_files(&mut self) {
        if !self.is_connected() {
            return;
        }
        let path = self.current_path.clone();

        if let Some(listing) = &self.listing {
            if listing.path == path {
                debug!("Listing of {} already in flight, coalescing", path);
                self.reload_pending = true;
                return;
            }
            debug!("Listing of {} superseded by {}", listing.path, path);
        }
        self.reload_pending = false;

        let epoch = self.epochs.advance();
        self.listing = Some(InFlightListing {
            epoch,
            path: path.clone(),
        });

        let Some(active) = &self.active else {
            return;
        };
        let backend = active.backend.clone();
        let generation = active.generation;
        let tx = self.self_tx.clone();
        active.worker.submit(async move {
            let result = backend.list(&path).await;
            post(
                &tx,
                SessionMsg::ListingDone {
                    generation,
                    epoch,
                    path,
                    result,
                },
            );
        });
    }

    fn on_listing_done(
        &mut self,
        generation: RequestEpoch,
        epoch: RequestEpoch,
        path: String,
        result: Result<Vec<RemoteFile>, BackendError>,
    ) {
        if !self.is_live(generation) {
            return;
        }
        self.emit(SessionEvent::SelectionReset);

        if !self.epochs.is_live(epoch) || path != self.current_path {
            debug!("Dropping stale listing of {}", path);
            return;
        }
        self.listing = None;

        match result {
            Ok(files) => {
                debug!("Listing of {}: {} entries", path, files.len());
                self.files = Arc::new(files);
            }
            Err(e) if e.is_transport_closed() => {
                self.connection_lost(e.to_string());
                return;
            }
            Err(e) => {
                warn!("Listing of {} failed: {}", path, e);
                self.error = Some(e.to_string());
                self.files = Arc::new(Vec::new());
            }
        }

        if std::mem::take(&mut self.reload_pending) {
            self.reload_files();
        }
    }

    // === Transfers ===

    fn enqueue_upload(
        &mut self,
        source: PathBuf,
        destination_dir: String,
    ) -> Result<TransferId, SessionError> {
        self.require(Capability::Upload)?;
        let name = source
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| SessionError::InvalidPath(source.display().to_string()))?;
        let destination = join_remote_path(&destination_dir, name);

        info!("Queueing upload {:?} -> {}", source, destination);
        let id = self.queue.enqueue(TransferTask::upload(source, destination));
        self.start_next_transfer();
        Ok(id)
    }

    fn enqueue_download(
        &mut self,
        remote_path: String,
        local_dir: PathBuf,
    ) -> Result<TransferId, SessionError> {
        self.require(Capability::Download)?;
        let name = file_name(&remote_path)
            .ok_or_else(|| SessionError::InvalidPath(remote_path.clone()))?;
        let destination = local_dir.join(name);

        info!("Queueing download {} -> {:?}", remote_path, destination);
        let id = self
            .queue
            .enqueue(TransferTask::download(remote_path, destination));
        self.start_next_transfer();
        Ok(id)
    }

    fn start_next_transfer(&mut self) {
        let Some(active) = &self.active else {
            return;
        };
        let Some(task) = self.queue.start_next() else {
            return;
        };
        let id = task.id;
        let direction = task.direction.clone();
        let control = task.control();

        let backend = active.backend.clone();
        let generation = active.generation;
        let tx = self.self_tx.clone();
        let progress_tx = tx.clone();
        let progress: ProgressFn = Arc::new(move |transferred, total| {
            post(
                &progress_tx,
                SessionMsg::TransferProgress {
                    generation,
                    id,
                    transferred,
                    total,
                },
            )
        });

        active.worker.submit(async move {
            let result = match &direction {
                TransferDirection::Upload {
                    source,
                    destination,
                } => backend.upload(source, destination, progress, control).await,
                TransferDirection::Download {
                    source,
                    destination,
                } => backend.download(source, destination, progress, control).await,
            };
            post(&tx, SessionMsg::TransferDone { generation, id, result });
        });
    }

    fn cancel_transfer(&mut self, id: TransferId) {
        match self.queue.cancel(id) {
            CancelOutcome::Removed(task) => {
                info!("Cancelled queued transfer {}", task.id);
                self.emit(SessionEvent::TransferFinished {
                    id: task.id,
                    outcome: TransferOutcome::Cancelled,
                });
            }
            CancelOutcome::Flagged => info!("Cancellation requested for transfer {}", id),
            CancelOutcome::NotFound => debug!("cancel_transfer: {} not queued", id),
        }
    }

    /// A cancelled task reported in: drop it quietly and move on
    fn retire_cancelled(&mut self, id: TransferId) {
        self.queue.finish(id);
        info!("Transfer {} cancelled", id);
        self.emit(SessionEvent::TransferFinished {
            id,
            outcome: TransferOutcome::Cancelled,
        });
        self.start_next_transfer();
    }

    fn on_transfer_progress(
        &mut self,
        generation: RequestEpoch,
        id: TransferId,
        transferred: u64,
        total: u64,
    ) {
        if !self.is_live(generation) {
            return;
        }
        let Some(cancelled) = self.queue.get(id).map(|task| task.cancelled) else {
            return;
        };
        if cancelled {
            self.retire_cancelled(id);
        } else {
            self.queue.update_progress(id, transferred, total);
        }
    }

    fn on_transfer_done(
        &mut self,
        generation: RequestEpoch,
        id: TransferId,
        result: Result<u64, BackendError>,
    ) {
        if !self.is_live(generation) {
            return;
        }
        let Some((cancelled, is_upload)) = self
            .queue
            .get(id)
            .map(|task| (task.cancelled, task.direction.is_upload()))
        else {
            return;
        };
        if cancelled {
            self.retire_cancelled(id);
            return;
        }
        self.queue.finish(id);

        match result {
            Ok(bytes) => {
                info!("Transfer {} complete ({} bytes)", id, bytes);
                self.emit(SessionEvent::TransferFinished {
                    id,
                    outcome: TransferOutcome::Completed,
                });
            }
            Err(e) => {
                let message = e.to_string();
                self.emit(SessionEvent::TransferFinished {
                    id,
                    outcome: TransferOutcome::Failed(message.clone()),
                });
                if e.is_transport_closed() {
                    self.connection_lost(message);
                    return;
                }
                warn!("Transfer {} failed: {}", id, message);
                self.error = Some(message);
            }
        }

        if is_upload {
            self.reload_files();
        }
        self.start_next_transfer();
    }

    // === File operations ===

    /// delete/move/rename: surface the error, then reload
    fn run_mutation<F, Fut>(&mut self, capability: Capability, reply: Reply<()>, op: F)
    where
        F: FnOnce(Arc<dyn RemoteBackend>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), BackendError>> + Send + 'static,
    {
        let (backend, generation) = match self.require(capability) {
            Ok(found) => found,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };
        let tx = self.self_tx.clone();
        self.submit(async move {
            let result = op(backend).await;
            post(
                &tx,
                SessionMsg::OperationDone {
                    generation,
                    result,
                    reply,
                },
            );
        });
    }

    fn on_operation_done(
        &mut self,
        generation: RequestEpoch,
        result: Result<(), BackendError>,
        reply: Reply<()>,
    ) {
        if !self.is_live(generation) {
            let _ = reply.send(result.map_err(SessionError::from));
            return;
        }
        let lost = match &result {
            Ok(()) => None,
            Err(e) if e.is_transport_closed() => Some(e.to_string()),
            Err(e) => {
                warn!("Operation failed: {}", e);
                self.error = Some(e.to_string());
                None
            }
        };
        let _ = reply.send(result.map_err(SessionError::from));

        match lost {
            Some(reason) => self.connection_lost(reason),
            None => self.reload_files(),
        }
    }

    /// chmod/exists/info: relay the backend's answer, no state change
    fn run_query<T, F, Fut>(&mut self, capability: Capability, reply: Reply<T>, op: F)
    where
        T: Send + 'static,
        F: FnOnce(Arc<dyn RemoteBackend>) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, BackendError>> + Send + 'static,
    {
        let (backend, generation) = match self.require(capability) {
            Ok(found) => found,
            Err(e) => {
                let _ = reply.send(Err(e));
                return;
            }
        };
        let tx = self.self_tx.clone();
        self.submit(async move {
            let result = op(backend).await;
            if let Err(e) = &result {
                if e.is_transport_closed() {
                    post(
                        &tx,
                        SessionMsg::TransportLost {
                            generation,
                            reason: e.to_string(),
                        },
                    );
                }
            }
            let _ = reply.send(result.map_err(SessionError::from));
        });
    }

    // === Publishing ===

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events_tx.send(event);
    }

    fn publish(&self) {
        let transfers = self.queue.snapshot();
        let active_transfer = transfers.iter().find(|t| t.active).cloned();
        self.state_tx.send_replace(SessionSnapshot {
            connection_state: self.state,
            connected: self.state == ConnectionState::Connected,
            server_name: self.server_name.clone(),
            current_path: self.current_path.clone(),
            files: self.files.clone(),
            error: self.error.clone(),
            loading: self.listing.is_some(),
            active_transfer,
            transfers,
            aggregate_progress: self.queue.aggregate_progress(),
        });
    }
}
