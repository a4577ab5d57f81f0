//! Sequential transfer queue
//!
//! FIFO of uploads/downloads with at most one active task. The front of the
//! queue is the only task that may be active; it leaves the queue when its
//! terminal callback fires and only then does the next one start.

use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::control::TransferControl;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransferId(Uuid);

impl TransferId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum TransferDirection {
    /// Local file to a remote path
    Upload { source: PathBuf, destination: String },
    /// Remote file to a local path
    Download { source: String, destination: PathBuf },
}

impl TransferDirection {
    pub fn is_upload(&self) -> bool {
        matches!(self, TransferDirection::Upload { .. })
    }
}

#[derive(Debug)]
pub struct TransferTask {
    pub id: TransferId,
    pub direction: TransferDirection,
    /// Fraction in [0, 1]
    pub progress: f64,
    pub cancelled: bool,
    /// Carried along, ordering is strictly FIFO
    pub priority: i32,
    control: Arc<TransferControl>,
}

impl TransferTask {
    pub fn new(direction: TransferDirection) -> Self {
        Self {
            id: TransferId::new(),
            direction,
            progress: 0.0,
            cancelled: false,
            priority: 0,
            control: Arc::new(TransferControl::new()),
        }
    }

    pub fn upload(source: PathBuf, destination: String) -> Self {
        Self::new(TransferDirection::Upload {
            source,
            destination,
        })
    }

    pub fn download(source: String, destination: PathBuf) -> Self {
        Self::new(TransferDirection::Download {
            source,
            destination,
        })
    }

    pub fn control(&self) -> Arc<TransferControl> {
        self.control.clone()
    }
}

/// Published view of a queued task
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferSnapshot {
    pub id: TransferId,
    pub direction: TransferDirection,
    pub progress: f64,
    pub cancelled: bool,
    pub active: bool,
}

/// Result of asking the queue to cancel a task
#[derive(Debug)]
pub enum CancelOutcome {
    /// Task had not started; it is out of the queue already
    Removed(TransferTask),
    /// Task is running; it leaves on its next callback
    Flagged,
    NotFound,
}

/// Progress fraction, 0 when the total is unknown or zero.
pub fn fraction(transferred: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (transferred as f64 / total as f64).clamp(0.0, 1.0)
}

#[derive(Debug, Default)]
pub struct TransferQueue {
    tasks: VecDeque<TransferTask>,
    active: Option<TransferId>,
}

impl TransferQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn enqueue(&mut self, task: TransferTask) -> TransferId {
        let id = task.id;
        debug!("Transfer {} queued at position {}", id, self.tasks.len());
        self.tasks.push_back(task);
        id
    }

    /// Mark the front task active. No-op while another task is active.
    pub fn start_next(&mut self) -> Option<&TransferTask> {
        if self.active.is_some() {
            return None;
        }
        let front = self.tasks.front()?;
        self.active = Some(front.id);
        debug!("Transfer {} is now active", front.id);
        Some(front)
    }

    pub fn active(&self) -> Option<&TransferTask> {
        let id = self.active?;
        self.get(id)
    }

    pub fn active_id(&self) -> Option<TransferId> {
        self.active
    }

    pub fn get(&self, id: TransferId) -> Option<&TransferTask> {
        self.tasks.iter().find(|t| t.id == id)
    }

    /// Record backend progress for the active task.
    ///
    /// Ignored for any task that is not the active one.
    pub fn update_progress(&mut self, id: TransferId, transferred: u64, total: u64) -> bool {
        if self.active != Some(id) {
            return false;
        }
        match self.tasks.iter_mut().find(|t| t.id == id) {
            Some(task) => {
                task.progress = fraction(transferred, total);
                true
            }
            None => false,
        }
    }

    /// Remove a task that reached a terminal callback.
    pub fn finish(&mut self, id: TransferId) -> Option<TransferTask> {
        let idx = self.tasks.iter().position(|t| t.id == id)?;
        if self.active == Some(id) {
            self.active = None;
        }
        self.tasks.remove(idx)
    }

    pub fn cancel(&mut self, id: TransferId) -> CancelOutcome {
        if self.active == Some(id) {
            if let Some(task) = self.tasks.iter_mut().find(|t| t.id == id) {
                task.cancelled = true;
                task.control.cancel();
                return CancelOutcome::Flagged;
            }
        }
        match self.tasks.iter().position(|t| t.id == id) {
            Some(idx) => match self.tasks.remove(idx) {
                Some(mut task) => {
                    task.cancelled = true;
                    task.control.cancel();
                    CancelOutcome::Removed(task)
                }
                None => CancelOutcome::NotFound,
            },
            None => CancelOutcome::NotFound,
        }
    }

    /// Drop every task, signalling the running one to stop.
    pub fn clear(&mut self) -> Vec<TransferTask> {
        self.active = None;
        let drained: Vec<TransferTask> = self.tasks.drain(..).collect();
        for task in &drained {
            task.control.cancel();
        }
        drained
    }

    /// Mean progress over every queued task (pending ones count as 0).
    pub fn aggregate_progress(&self) -> f64 {
        if self.tasks.is_empty() {
            return 0.0;
        }
        let total: f64 = self.tasks.iter().map(|t| t.progress).sum();
        total / self.tasks.len() as f64
    }

    pub fn snapshot(&self) -> Vec<TransferSnapshot> {
        self.tasks
            .iter()
            .map(|t| TransferSnapshot {
                id: t.id,
                direction: t.direction.clone(),
                progress: t.progress,
                cancelled: t.cancelled,
                active: self.active == Some(t.id),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(name: &str) -> TransferTask {
        TransferTask::upload(PathBuf::from(format!("/tmp/{}", name)), format!("/{}", name))
    }

    #[test]
    fn test_single_active_task() {
        let mut queue = TransferQueue::new();
        let u1 = queue.enqueue(upload("u1"));
        let u2 = queue.enqueue(upload("u2"));

        assert_eq!(queue.start_next().map(|t| t.id), Some(u1));
        // Already busy
        assert!(queue.start_next().is_none());
        assert_eq!(queue.active_id(), Some(u1));

        // Pending tasks keep their progress frozen
        assert!(!queue.update_progress(u2, 50, 100));
        assert!(queue.update_progress(u1, 50, 100));

        queue.finish(u1);
        assert_eq!(queue.start_next().map(|t| t.id), Some(u2));
    }

    #[test]
    fn test_aggregate_progress() {
        let mut queue = TransferQueue::new();
        assert_eq!(queue.aggregate_progress(), 0.0);

        let mut a = upload("a");
        a.progress = 1.0;
        let mut b = upload("b");
        b.progress = 0.5;
        queue.enqueue(a);
        queue.enqueue(b);
        queue.enqueue(upload("c"));

        assert!((queue.aggregate_progress() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_fraction_handles_unknown_total() {
        assert_eq!(fraction(10, 0), 0.0);
        assert_eq!(fraction(50, 200), 0.25);
        assert_eq!(fraction(300, 200), 1.0);
    }

    #[test]
    fn test_cancel_pending_and_active() {
        let mut queue = TransferQueue::new();
        let u1 = queue.enqueue(upload("u1"));
        let u2 = queue.enqueue(upload("u2"));
        queue.start_next();

        match queue.cancel(u2) {
            CancelOutcome::Removed(task) => {
                assert!(task.cancelled);
                assert!(task.control().is_cancelled());
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(queue.len(), 1);

        let control = queue.active().unwrap().control();
        assert!(matches!(queue.cancel(u1), CancelOutcome::Flagged));
        assert!(control.is_cancelled());
        // Still occupies the queue until its callback fires
        assert_eq!(queue.len(), 1);
        assert!(queue.active().unwrap().cancelled);

        assert!(matches!(queue.cancel(TransferId::new()), CancelOutcome::NotFound));
    }

    #[test]
    fn test_clear_signals_running_task() {
        let mut queue = TransferQueue::new();
        queue.enqueue(upload("a"));
        queue.enqueue(upload("b"));
        let control = queue.start_next().unwrap().control();

        let drained = queue.clear();
        assert_eq!(drained.len(), 2);
        assert!(control.is_cancelled());
        assert!(queue.is_empty());
        assert!(queue.active_id().is_none());
    }
}
