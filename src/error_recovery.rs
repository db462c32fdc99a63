//! Retry budgeting and backend availability tracking.
//!
//! Single-shot calls retry through [`crate::utils::retry_with_backoff`]. The
//! batch loop instead draws from a [`RetryBudget`] shared across the whole
//! run, so retries cannot multiply latency with the batch count.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

use crate::config::SentiscopeConfig;
use crate::error::Result;

/// Upper bound on retries for one analysis run.
#[derive(Debug)]
pub struct RetryBudget {
    remaining: AtomicU32,
    used: AtomicU32,
}

impl RetryBudget {
    pub fn new(max_retries: u32) -> Self {
        Self {
            remaining: AtomicU32::new(max_retries),
            used: AtomicU32::new(0),
        }
    }

    /// Takes one retry from the budget; `false` once exhausted.
    pub fn try_consume(&self) -> bool {
        let taken = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |r| r.checked_sub(1))
            .is_ok();
        if taken {
            self.used.fetch_add(1, Ordering::SeqCst);
        }
        taken
    }

    pub fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::SeqCst)
    }

    pub fn used(&self) -> u32 {
        self.used.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Backend status
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerStatus {
    Unknown,
    Checking,
    Connected,
    Error,
    Disconnected,
}

impl ServerStatus {
    pub fn is_connected(&self) -> bool {
        matches!(self, ServerStatus::Connected)
    }
}

/// Liveness probe used by the status monitor.
#[async_trait]
pub trait StatusProbe: Send + Sync {
    async fn probe(&self) -> Result<()>;
}

/// Exponential backoff: `base * 2^n`, capped at `max`.
#[derive(Debug, Clone)]
pub struct BackoffSchedule {
    base: Duration,
    max: Duration,
    attempt: u32,
}

impl BackoffSchedule {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
            attempt: 0,
        }
    }

    pub fn from_config(config: &SentiscopeConfig) -> Self {
        Self::new(
            Duration::from_secs(config.status_retry_interval_secs),
            Duration::from_secs(config.status_max_backoff_secs),
        )
    }

    pub fn next_delay(&mut self) -> Duration {
        let factor = 2u32.saturating_pow(self.attempt.min(16));
        self.attempt = self.attempt.saturating_add(1);
        self.base.saturating_mul(factor).min(self.max)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Probes once and records the outcome in `status`.
#[instrument(skip_all)]
pub async fn check_status(probe: &dyn StatusProbe, status: &RwLock<ServerStatus>) -> ServerStatus {
    *status.write().await = ServerStatus::Checking;
    let next = match probe.probe().await {
        Ok(()) => ServerStatus::Connected,
        Err(e) if e.is_unavailable() => {
            debug!("Backend unreachable: {}", e);
            ServerStatus::Disconnected
        }
        Err(e) => {
            warn!("Backend status check failed: {}", e);
            ServerStatus::Error
        }
    };
    *status.write().await = next;
    next
}

/// Re-probes the backend with exponential backoff until it reports
/// connected or `should_stop` is set.
pub fn spawn_status_monitor(
    probe: Arc<dyn StatusProbe>,
    status: Arc<RwLock<ServerStatus>>,
    mut schedule: BackoffSchedule,
    should_stop: Arc<RwLock<bool>>,
) -> JoinHandle<ServerStatus> {
    tokio::spawn(async move {
        loop {
            if *should_stop.read().await {
                debug!("Status monitor stopped");
                return *status.read().await;
            }

            let current = check_status(probe.as_ref(), &status).await;
            if current.is_connected() {
                info!("Backend connected");
                return current;
            }

            let delay = schedule.next_delay();
            debug!("Backend status {:?}, re-checking in {:?}", current, delay);
            sleep(delay).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SentiscopeError;

    struct FlakyProbe {
        failures_left: AtomicU32,
    }

    #[async_trait]
    impl StatusProbe for FlakyProbe {
        async fn probe(&self) -> Result<()> {
            let left = self.failures_left.load(Ordering::SeqCst);
            if left == 0 {
                return Ok(());
            }
            self.failures_left.store(left - 1, Ordering::SeqCst);
            Err(SentiscopeError::RemoteUnavailable("connection refused".into()))
        }
    }

    #[test]
    fn test_retry_budget_exhausts() {
        let budget = RetryBudget::new(2);
        assert!(budget.try_consume());
        assert!(budget.try_consume());
        assert!(!budget.try_consume());
        assert_eq!(budget.used(), 2);
        assert_eq!(budget.remaining(), 0);
    }

    #[test]
    fn test_backoff_is_capped() {
        let mut schedule = BackoffSchedule::new(Duration::from_secs(10), Duration::from_secs(120));
        let delays: Vec<u64> = (0..6).map(|_| schedule.next_delay().as_secs()).collect();
        assert_eq!(delays, vec![10, 20, 40, 80, 120, 120]);
        schedule.reset();
        assert_eq!(schedule.next_delay(), Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_check_status_marks_disconnected() {
        let probe = FlakyProbe { failures_left: AtomicU32::new(1) };
        let status = RwLock::new(ServerStatus::Unknown);
        assert_eq!(check_status(&probe, &status).await, ServerStatus::Disconnected);
        assert_eq!(check_status(&probe, &status).await, ServerStatus::Connected);
        assert_eq!(*status.read().await, ServerStatus::Connected);
    }

    #[tokio::test]
    async fn test_monitor_stops_once_connected() {
        let probe = Arc::new(FlakyProbe { failures_left: AtomicU32::new(2) });
        let status = Arc::new(RwLock::new(ServerStatus::Unknown));
        let handle = spawn_status_monitor(
            probe,
            status.clone(),
            BackoffSchedule::new(Duration::from_millis(1), Duration::from_millis(4)),
            Arc::new(RwLock::new(false)),
        );
        assert_eq!(handle.await.unwrap(), ServerStatus::Connected);
        assert!(status.read().await.is_connected());
    }

    #[tokio::test]
    async fn test_monitor_honours_stop_flag() {
        let probe = Arc::new(FlakyProbe { failures_left: AtomicU32::new(u32::MAX) });
        let status = Arc::new(RwLock::new(ServerStatus::Unknown));
        let handle = spawn_status_monitor(
            probe,
            status,
            BackoffSchedule::new(Duration::from_millis(1), Duration::from_millis(1)),
            Arc::new(RwLock::new(true)),
        );
        assert_eq!(handle.await.unwrap(), ServerStatus::Unknown);
    }
}
