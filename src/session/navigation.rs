//! Navigation debounce and request staleness
//!
//! `Debouncer` collapses a burst of path changes into one reload: every reset
//! aborts the pending countdown and starts a new one. `EpochCounter` stamps
//! each listing request; a completion whose epoch is no longer current is
//! dropped.

use std::time::Duration;

use tokio::task::JoinHandle;

/// Token for the latest authoritative request. 0 is never issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestEpoch(u64);

impl RequestEpoch {
    pub fn value(self) -> u64 {
        self.0
    }
}

/// Monotonic epoch source, owned by a single task
#[derive(Debug, Default)]
pub struct EpochCounter {
    current: u64,
}

impl EpochCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a new epoch, superseding every earlier one
    pub fn advance(&mut self) -> RequestEpoch {
        self.current += 1;
        RequestEpoch(self.current)
    }

    /// Supersede the current epoch without issuing a new one
    pub fn invalidate(&mut self) {
        self.current += 1;
    }

    pub fn is_live(&self, epoch: RequestEpoch) -> bool {
        epoch.0 != 0 && epoch.0 == self.current
    }
}

pub struct Debouncer {
    delay: Duration,
    pending: Option<JoinHandle<()>>,
    ticket: u64,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            pending: None,
            ticket: 0,
        }
    }

    /// Restart the countdown. `fire` gets the ticket once `delay` passes
    /// without another reset; pass it back to `complete`.
    pub fn reset<F>(&mut self, fire: F) -> u64
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.cancel();
        self.ticket += 1;
        let ticket = self.ticket;
        let delay = self.delay;
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire(ticket);
        }));
        ticket
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Accept a fired ticket. False for tickets superseded by a later reset
    /// or a cancel, whose signal may already have been in flight.
    pub fn complete(&mut self, ticket: u64) -> bool {
        if self.pending.is_some() && ticket == self.ticket {
            self.pending = None;
            true
        } else {
            false
        }
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
