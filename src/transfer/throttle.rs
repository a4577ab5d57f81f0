//! Transfer speed limiting
//!
//! Token-bucket style pacing: after each chunk the loop sleeps until
//! `bytes_sent / elapsed` is back under the configured rate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::info;

/// Upload/download limits in bytes per second (0 = unlimited).
///
/// Clones share the same atomics, so a change is seen by transfers already running.
#[derive(Debug, Clone, Default)]
pub struct SpeedLimits {
    upload_bps: Arc<AtomicUsize>,
    download_bps: Arc<AtomicUsize>,
}

impl SpeedLimits {
    pub fn new(upload_kbps: usize, download_kbps: usize) -> Self {
        let limits = Self::default();
        limits.set_kbps(upload_kbps, download_kbps);
        limits
    }

    /// Update both limits (in KB/s, 0 = unlimited)
    pub fn set_kbps(&self, upload_kbps: usize, download_kbps: usize) {
        self.upload_bps
            .store(upload_kbps.saturating_mul(1024), Ordering::SeqCst);
        self.download_bps
            .store(download_kbps.saturating_mul(1024), Ordering::SeqCst);
        info!(
            "Speed limits set: upload {} KB/s, download {} KB/s (0 = unlimited)",
            upload_kbps, download_kbps
        );
    }

    pub fn upload_bps(&self) -> usize {
        self.upload_bps.load(Ordering::SeqCst)
    }

    pub fn download_bps(&self) -> usize {
        self.download_bps.load(Ordering::SeqCst)
    }

    pub fn upload_throttle(&self) -> Throttle {
        Throttle::new(self.upload_bps.clone())
    }

    pub fn download_throttle(&self) -> Throttle {
        Throttle::new(self.download_bps.clone())
    }
}

/// Pacing state for one transfer
pub struct Throttle {
    limit_bps: Arc<AtomicUsize>,
    started: Instant,
}

impl Throttle {
    pub fn new(limit_bps: Arc<AtomicUsize>) -> Self {
        Self {
            limit_bps,
            started: Instant::now(),
        }
    }

    /// How long to wait after `bytes_sent` bytes so the rate stays under the limit.
    pub fn delay_for(&self, bytes_sent: u64) -> Option<Duration> {
        pacing_delay(
            self.limit_bps.load(Ordering::Relaxed),
            bytes_sent,
            self.started.elapsed(),
        )
    }

    pub async fn pace(&self, bytes_sent: u64) {
        if let Some(delay) = self.delay_for(bytes_sent) {
            tokio::time::sleep(delay).await;
        }
    }

    /// Same as `pace`, for loops running on a blocking thread.
    pub fn pace_blocking(&self, bytes_sent: u64) {
        if let Some(delay) = self.delay_for(bytes_sent) {
            std::thread::sleep(delay);
        }
    }
}

fn pacing_delay(limit_bps: usize, bytes_sent: u64, elapsed: Duration) -> Option<Duration> {
    if limit_bps == 0 {
        return None;
    }
    let expected_secs = bytes_sent as f64 / limit_bps as f64;
    let elapsed_secs = elapsed.as_secs_f64();
    if expected_secs > elapsed_secs {
        Some(Duration::from_secs_f64(expected_secs - elapsed_secs))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_never_waits() {
        assert_eq!(pacing_delay(0, 10_000_000, Duration::ZERO), None);
    }

    #[test]
    fn test_pacing_delay() {
        // 2048 bytes at 1 KB/s should take 2s; 0.5s already elapsed
        let delay = pacing_delay(1024, 2048, Duration::from_millis(500)).unwrap();
        assert_eq!(delay, Duration::from_millis(1500));

        // Already slower than the limit
        assert_eq!(pacing_delay(1024, 1024, Duration::from_secs(3)), None);
    }

    #[test]
    fn test_limits_shared_between_clones() {
        let limits = SpeedLimits::new(0, 0);
        let clone = limits.clone();
        let throttle = clone.upload_throttle();

        limits.set_kbps(100, 50);
        assert_eq!(clone.upload_bps(), 100 * 1024);
        assert_eq!(clone.download_bps(), 50 * 1024);
        assert!(throttle.delay_for(1024 * 1024).is_some());
    }
}
