//! Background workers
//!
//! Four periodic loops keep the lock manager live without any caller:
//! - **Queue processor**: grants queued requests that became grantable
//! - **Deadlock monitor**: reports requests that waited too long
//! - **Healer**: reclaims locks whose lease ran out
//! - **Janitor**: repeats the expiry sweep and trims the history
//!
//! A failed iteration is logged and followed by the error backoff (at least
//! one regular period); it never ends the loop.

use super::manager::Shared;
use super::types::{LockConfig, LockResult};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Worker {
    QueueProcessor,
    DeadlockMonitor,
    Healer,
    Janitor,
}

impl Worker {
    pub const ALL: [Worker; 4] = [
        Self::QueueProcessor,
        Self::DeadlockMonitor,
        Self::Healer,
        Self::Janitor,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::QueueProcessor => "queue_processor",
            Self::DeadlockMonitor => "deadlock_monitor",
            Self::Healer => "healer",
            Self::Janitor => "janitor",
        }
    }

    /// Time between two iterations
    pub fn period(&self, config: &LockConfig) -> Duration {
        match self {
            Self::QueueProcessor => config.queue_interval,
            Self::DeadlockMonitor => config.deadlock_check_interval,
            Self::Healer => config.heal_interval,
            Self::Janitor => config.janitor_interval,
        }
    }

    /// Pause after a failed iteration, never shorter than the regular period
    pub fn backoff(&self, config: &LockConfig) -> Duration {
        self.period(config).max(config.error_backoff)
    }

    /// Whether the worker is started at all under `config`
    pub fn is_enabled(&self, config: &LockConfig) -> bool {
        match self {
            Self::DeadlockMonitor => config.deadlock_detection_enabled,
            Self::Healer => config.healing_enabled,
            Self::QueueProcessor | Self::Janitor => true,
        }
    }

    /// Run a single iteration; returns how many items it acted on
    pub(crate) async fn run_once(&self, shared: &Shared) -> LockResult<usize> {
        match self {
            Self::QueueProcessor => shared.process_queue().await,
            Self::DeadlockMonitor => Ok(shared.detect_long_waits().await),
            Self::Healer => Ok(shared.heal_expired_locks().await),
            Self::Janitor => Ok(shared.run_janitor(shared.config.healing_enabled).await),
        }
    }
}

impl std::fmt::Display for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Running background workers of one manager
#[derive(Debug)]
pub(crate) struct WorkerSet {
    cancel: CancellationToken,
    handles: Vec<(Worker, JoinHandle<()>)>,
}

impl WorkerSet {
    /// Spawn every worker enabled by the shared config
    pub(crate) fn spawn(shared: Arc<Shared>) -> Self {
        let cancel = CancellationToken::new();
        let handles = Worker::ALL
            .into_iter()
            .filter(|worker| worker.is_enabled(&shared.config))
            .map(|worker| {
                let handle = tokio::spawn(run_worker(worker, shared.clone(), cancel.child_token()));
                (worker, handle)
            })
            .collect();

        Self { cancel, handles }
    }

    pub(crate) fn workers(&self) -> Vec<Worker> {
        self.handles.iter().map(|(worker, _)| *worker).collect()
    }

    /// Signal every worker to stop without waiting for it
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Stop every worker and wait until all of them have exited
    pub(crate) async fn shutdown(self) {
        self.cancel.cancel();
        for (worker, handle) in self.handles {
            if let Err(e) = handle.await {
                warn!(worker = %worker, error = %e, "Background worker ended abnormally");
            }
        }
    }
}

async fn run_worker(worker: Worker, shared: Arc<Shared>, cancel: CancellationToken) {
    let period = worker.period(&shared.config);
    info!(
        worker = %worker,
        period_ms = period.as_millis(),
        "Background worker started"
    );

    let mut delay = period;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = sleep(delay) => {}
        }

        delay = match worker.run_once(&shared).await {
            Ok(0) => period,
            Ok(count) => {
                debug!(worker = %worker, count, "Background worker iteration done");
                period
            }
            Err(e) => {
                let backoff = worker.backoff(&shared.config);
                error!(
                    worker = %worker,
                    code = e.code(),
                    error = %e,
                    backoff_ms = backoff.as_millis(),
                    "Background worker iteration failed"
                );
                backoff
            }
        };
    }

    info!(worker = %worker, "Background worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_periods() {
        let config = LockConfig::default();
        assert_eq!(Worker::QueueProcessor.period(&config), Duration::from_secs(1));
        assert_eq!(Worker::DeadlockMonitor.period(&config), Duration::from_secs(5));
        assert_eq!(Worker::Healer.period(&config), Duration::from_secs(10));
        assert_eq!(Worker::Janitor.period(&config), Duration::from_secs(60));
    }

    #[test]
    fn test_worker_enablement() {
        let config = LockConfig::default().deadlock_detection(false).healing(false);
        assert!(Worker::QueueProcessor.is_enabled(&config));
        assert!(Worker::Janitor.is_enabled(&config));
        assert!(!Worker::DeadlockMonitor.is_enabled(&config));
        assert!(!Worker::Healer.is_enabled(&config));

        let defaults = LockConfig::default();
        assert!(Worker::ALL.iter().all(|w| w.is_enabled(&defaults)));
    }

    #[test]
    fn test_backoff_is_at_least_the_period() {
        let config = LockConfig::default();
        assert_eq!(Worker::QueueProcessor.backoff(&config), Duration::from_secs(5));
        assert_eq!(Worker::DeadlockMonitor.backoff(&config), Duration::from_secs(5));
        assert_eq!(Worker::Healer.backoff(&config), Duration::from_secs(10));
        assert_eq!(Worker::Janitor.backoff(&config), Duration::from_secs(60));

        let slow = config.with_error_backoff(Duration::from_secs(120));
        assert_eq!(Worker::Janitor.backoff(&slow), Duration::from_secs(120));
    }

    #[test]
    fn test_worker_names() {
        assert_eq!(Worker::QueueProcessor.to_string(), "queue_processor");
        assert_eq!(Worker::Janitor.name(), "janitor");
    }
}
