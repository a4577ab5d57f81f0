//! Serial executor for backend jobs
//!
//! One task per backend instance runs submitted jobs strictly one after the
//! other, in submission order. Dropping the worker lets queued jobs finish,
//! then the task exits.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::mpsc;
use tracing::debug;

type Job = Pin<Box<dyn Future<Output = ()> + Send>>;

pub struct BackendWorker {
    job_tx: mpsc::UnboundedSender<Job>,
}

impl BackendWorker {
    pub fn spawn(label: impl Into<String>) -> Self {
        let label = label.into();
        let (job_tx, mut job_rx) = mpsc::unbounded_channel::<Job>();

        tokio::spawn(async move {
            debug!("Backend worker started: {}", label);
            while let Some(job) = job_rx.recv().await {
                job.await;
            }
            debug!("Backend worker stopped: {}", label);
        });

        Self { job_tx }
    }

    /// Queue a job. Returns `false` if the worker task is gone.
    pub fn submit<F>(&self, job: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.job_tx.send(Box::pin(job)).is_ok()
    }
}
