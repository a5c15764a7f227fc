//! Readiness gate
//!
//! Decides whether a pack is worth handing out stream URLs for. The verdict
//! is advisory: callers log a timeout and carry on.

use std::time::Duration;

use tokio::time::MissedTickBehavior;

use super::Acquisition;

/// Default interval between progress checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Polls an acquisition until it reaches a minimum progress.
#[derive(Debug, Clone, Copy)]
pub struct ReadinessGate {
    poll_interval: Duration,
}

impl Default for ReadinessGate {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL)
    }
}

impl ReadinessGate {
    pub fn new(poll_interval: Duration) -> Self {
        Self {
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    /// Ready means at least `min_progress` downloaded, or the file list known.
    pub fn is_ready(acquisition: &Acquisition, min_progress: f64) -> bool {
        acquisition.progress() >= min_progress || !acquisition.files().is_empty()
    }

    /// Returns `true` once `acquisition` is ready, `false` if `timeout`
    /// passes first. Holds no locks; dropping the future stops the polling.
    pub async fn wait_until_ready(
        &self,
        acquisition: &Acquisition,
        min_progress: f64,
        timeout: Duration,
    ) -> bool {
        if Self::is_ready(acquisition, min_progress) {
            return true;
        }

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately.
        ticker.tick().await;

        let polled = tokio::time::timeout(timeout, async {
            loop {
                ticker.tick().await;
                if Self::is_ready(acquisition, min_progress) {
                    return;
                }
            }
        })
        .await;

        polled.is_ok() || Self::is_ready(acquisition, min_progress)
    }
}
