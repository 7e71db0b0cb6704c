//! Lock manager for coordinating resource locks
//!
//! The lock manager is the only entry point for the rest of the platform.
//! It handles:
//! - Immediate grants checked against the compatibility matrix
//! - Priority queueing of requests that have to wait
//! - Waking waiters on every release, with a periodic queue sweep as backup
//! - Lifecycle of the background workers (queue, deadlock, healer, janitor)

use super::guard::{LockGuard, ReleaseNotifier};
use super::history::HistoryEntry;
use super::state::{LockState, PollOutcome};
use super::types::{
    AcquireOptions, Lock, LockConfig, LockError, LockManagerStatus, LockRequest, LockResult,
    LockType,
};
use super::workers::{Worker, WorkerSet};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, mpsc};
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// State shared between the manager, its waiters and its background workers
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) config: LockConfig,
    state: Mutex<LockState>,
    waiters: Arc<Notify>,
    release_tx: ReleaseNotifier,
}

impl Shared {
    fn new(config: LockConfig) -> Self {
        let (release_tx, release_rx) = mpsc::unbounded_channel();
        let state = LockState::new(config.history_capacity, release_rx);

        Self {
            config,
            state: Mutex::new(state),
            waiters: Arc::new(Notify::new()),
            release_tx,
        }
    }

    pub(crate) async fn process_queue(&self) -> LockResult<usize> {
        let pass = self.state.lock().await.process_queue(Utc::now());

        if !pass.granted.is_empty() {
            self.waiters.notify_waiters();
        }
        for lock in &pass.granted {
            info!(
                lock_id = %lock.id,
                resource = %lock.resource,
                owner = %lock.owner,
                lock_type = %lock.lock_type,
                "Queued lock granted by queue processor"
            );
        }

        let granted = pass.granted.len();
        let mut failures = pass.failed.into_iter();
        match failures.next() {
            Some((request_id, e)) => {
                for (other_id, other) in failures {
                    warn!(request_id = %other_id, error = %other, "Queued request could not be granted");
                }
                warn!(request_id = %request_id, error = %e, "Queued request could not be granted");
                Err(e)
            }
            None => Ok(granted),
        }
    }

    pub(crate) async fn detect_long_waits(&self) -> usize {
        let threshold = self.config.deadlock_threshold;
        let now = Utc::now();
        let flagged = self.state.lock().await.detect_long_waits(now, threshold);

        for request in &flagged {
            warn!(
                request_id = %request.id,
                resource = %request.resource,
                requester = %request.requester,
                lock_type = %request.lock_type,
                waited_ms = request.waited(now).as_millis(),
                threshold_ms = threshold.as_millis(),
                "Possible deadlock: lock request has been waiting beyond threshold"
            );
        }
        flagged.len()
    }

    pub(crate) async fn heal_expired_locks(&self) -> usize {
        let healed = self.state.lock().await.heal_expired(Utc::now());

        if !healed.is_empty() {
            self.waiters.notify_waiters();
        }
        for lock in &healed {
            warn!(
                lock_id = %lock.id,
                resource = %lock.resource,
                owner = %lock.owner,
                expired_at = %lock.expires_at,
                "Reclaimed lock with expired lease"
            );
        }
        healed.len()
    }

    pub(crate) async fn run_janitor(&self, sweep_expired: bool) -> usize {
        let healed = if sweep_expired {
            self.heal_expired_locks().await
        } else {
            0
        };
        let (trimmed, capacity) = {
            let mut state = self.state.lock().await;
            let trimmed = state.trim_history();
            (trimmed, state.table().history().capacity())
        };

        if trimmed > 0 {
            debug!(trimmed, capacity, "Trimmed lock history");
        }
        healed + trimmed
    }
}

/// Removes a queued request if its waiter is dropped before resolving
struct PendingRequest<'a> {
    shared: &'a Arc<Shared>,
    request_id: Uuid,
    armed: bool,
}

impl PendingRequest<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PendingRequest<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let shared = self.shared.clone();
        let request_id = self.request_id;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if shared.state.lock().await.abandon_queued(&request_id).is_some() {
                    debug!(request_id = %request_id, "Removed request of cancelled waiter");
                }
            });
        }
    }
}

/// Lock manager for coordinating resource locks
#[derive(Debug)]
pub struct LockManager {
    shared: Arc<Shared>,
    workers: Mutex<Option<WorkerSet>>,
}

impl LockManager {
    /// Create a new lock manager with the given configuration
    ///
    /// Background workers are not running until `start` is called.
    pub fn new(config: LockConfig) -> Self {
        Self {
            shared: Arc::new(Shared::new(config)),
            workers: Mutex::new(None),
        }
    }

    /// Create a lock manager with default configuration
    pub fn with_defaults() -> Self {
        Self::new(LockConfig::default())
    }

    /// Get the configuration
    pub fn config(&self) -> &LockConfig {
        &self.shared.config
    }

    /// Start the background workers; a no-op when already running
    pub async fn start(&self) {
        let mut workers = self.workers.lock().await;
        if workers.is_some() {
            debug!("Lock manager already running");
            return;
        }
        let set = WorkerSet::spawn(self.shared.clone());
        info!(workers = ?set.workers(), "Lock manager started");
        *workers = Some(set);
    }

    /// Stop the background workers and wait for them to exit
    pub async fn stop(&self) {
        let set = self.workers.lock().await.take();
        if let Some(set) = set {
            set.shutdown().await;
            info!("Lock manager stopped");
        }
    }

    /// Whether the background workers are running
    pub async fn is_running(&self) -> bool {
        self.workers.lock().await.is_some()
    }

    /// Names of the running background workers
    pub async fn running_workers(&self) -> Vec<Worker> {
        self.workers
            .lock()
            .await
            .as_ref()
            .map(WorkerSet::workers)
            .unwrap_or_default()
    }

    /// Acquire a lock, waiting up to the wait timeout
    ///
    /// Returns the lock id, which is needed to release it.
    pub async fn acquire_lock(
        &self,
        resource: &str,
        lock_type: LockType,
        requester: &str,
        options: AcquireOptions,
    ) -> LockResult<Uuid> {
        self.acquire(resource, lock_type, requester, options)
            .await
            .map(|lock| lock.id)
    }

    /// Acquire a lock and wrap it in a guard that releases it on drop
    pub async fn acquire_guard(
        &self,
        resource: &str,
        lock_type: LockType,
        requester: &str,
        options: AcquireOptions,
    ) -> LockResult<LockGuard> {
        let lock = self.acquire(resource, lock_type, requester, options).await?;
        Ok(LockGuard::new(
            lock,
            self.shared.release_tx.clone(),
            self.shared.waiters.clone(),
        ))
    }

    /// Try to acquire a lock without waiting
    pub async fn try_acquire_lock(
        &self,
        resource: &str,
        lock_type: LockType,
        requester: &str,
        options: AcquireOptions,
    ) -> LockResult<Option<Uuid>> {
        let request = self.new_request(resource, lock_type, requester, options)?;
        let granted = self.shared.state.lock().await.try_grant(&request, Utc::now())?;

        match &granted {
            Some(lock) => info!(
                lock_id = %lock.id,
                resource = %lock.resource,
                owner = %lock.owner,
                lock_type = %lock.lock_type,
                "Lock acquired"
            ),
            None => debug!(
                resource = %request.resource,
                requester = %request.requester,
                "Lock not immediately available"
            ),
        }
        Ok(granted.map(|lock| lock.id))
    }

    async fn acquire(
        &self,
        resource: &str,
        lock_type: LockType,
        requester: &str,
        options: AcquireOptions,
    ) -> LockResult<Lock> {
        let started = Instant::now();
        let request = self.new_request(resource, lock_type, requester, options)?;

        {
            let mut state = self.shared.state.lock().await;
            if let Some(lock) = state.try_grant(&request, Utc::now())? {
                drop(state);
                info!(
                    lock_id = %lock.id,
                    resource = %lock.resource,
                    owner = %lock.owner,
                    lock_type = %lock.lock_type,
                    "Lock acquired"
                );
                return Ok(lock);
            }
            let position = state.enqueue(request.clone());
            debug!(
                request_id = %request.id,
                resource = %request.resource,
                requester = %request.requester,
                priority = %request.priority,
                position,
                timeout_ms = request.wait_timeout.as_millis(),
                "Lock request queued"
            );
        }

        self.wait_for_grant(&request, started).await
    }

    async fn wait_for_grant(&self, request: &LockRequest, started: Instant) -> LockResult<Lock> {
        let mut pending = PendingRequest {
            shared: &self.shared,
            request_id: request.id,
            armed: true,
        };
        let poll_interval = self.shared.config.poll_interval;

        loop {
            let notified = self.shared.waiters.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let remaining = {
                let mut state = self.shared.state.lock().await;
                match state.poll_queued(&request.id, Utc::now()) {
                    Ok(PollOutcome::Granted(lock)) => {
                        pending.disarm();
                        drop(state);
                        info!(
                            lock_id = %lock.id,
                            resource = %lock.resource,
                            owner = %lock.owner,
                            lock_type = %lock.lock_type,
                            elapsed_ms = started.elapsed().as_millis(),
                            "Lock acquired after waiting"
                        );
                        return Ok(lock);
                    }
                    Ok(PollOutcome::GrantedElsewhere) => {
                        pending.disarm();
                        let lock = state.table().get(&request.id).cloned().ok_or_else(|| {
                            LockError::InvalidState(format!(
                                "lock {} on '{}' was reclaimed before its waiter resumed",
                                request.id, request.resource
                            ))
                        })?;
                        drop(state);
                        info!(
                            lock_id = %lock.id,
                            resource = %lock.resource,
                            owner = %lock.owner,
                            lock_type = %lock.lock_type,
                            elapsed_ms = started.elapsed().as_millis(),
                            "Lock acquired after waiting"
                        );
                        return Ok(lock);
                    }
                    Ok(PollOutcome::Pending) => {}
                    Err(e) => {
                        state.abandon_queued(&request.id);
                        pending.disarm();
                        return Err(e);
                    }
                }

                let elapsed = started.elapsed();
                if elapsed >= request.wait_timeout {
                    state.expire_queued(&request.id);
                    pending.disarm();
                    drop(state);
                    warn!(
                        request_id = %request.id,
                        resource = %request.resource,
                        requester = %request.requester,
                        elapsed_ms = elapsed.as_millis(),
                        "Lock request timed out"
                    );
                    return Err(LockError::Timeout {
                        resource: request.resource.clone(),
                        requester: request.requester.clone(),
                        waited_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
                    });
                }
                request.wait_timeout - elapsed
            };

            tokio::select! {
                _ = &mut notified => {}
                _ = sleep(poll_interval.min(remaining)) => {}
            }
        }
    }

    fn new_request(
        &self,
        resource: &str,
        lock_type: LockType,
        requester: &str,
        options: AcquireOptions,
    ) -> LockResult<LockRequest> {
        LockRequest::new(
            resource,
            lock_type,
            requester,
            options,
            self.shared.config.default_wait_timeout,
        )
    }

    /// Release a lock held by `requester`
    ///
    /// Returns false, without failing, when the id is unknown or the lock
    /// belongs to someone else; releasing twice is harmless.
    pub async fn release_lock(&self, lock_id: Uuid, requester: &str) -> bool {
        let released = self
            .shared
            .state
            .lock()
            .await
            .release(lock_id, requester, Utc::now());

        match released {
            Some(lock) => {
                self.shared.waiters.notify_waiters();
                let held_ms = (Utc::now() - lock.acquired_at).num_milliseconds();
                info!(
                    lock_id = %lock_id,
                    resource = %lock.resource,
                    owner = %lock.owner,
                    held_ms,
                    "Lock released"
                );
                true
            }
            None => {
                warn!(
                    lock_id = %lock_id,
                    requester = %requester,
                    "Release refused: lock unknown or held by another requester"
                );
                false
            }
        }
    }

    /// Remove a lock regardless of its owner
    pub async fn force_release_lock(&self, lock_id: Uuid) -> Option<Lock> {
        let lock = self
            .shared
            .state
            .lock()
            .await
            .force_release(lock_id, Utc::now())?;

        self.shared.waiters.notify_waiters();
        info!(
            lock_id = %lock_id,
            resource = %lock.resource,
            owner = %lock.owner,
            "Lock force-released"
        );
        Some(lock)
    }

    /// Apply releases posted by dropped guards
    pub async fn process_releases(&self) -> usize {
        let released = self.shared.state.lock().await.drain_releases(Utc::now());
        if !released.is_empty() {
            self.shared.waiters.notify_waiters();
        }
        released.len()
    }

    /// Counts and flags of the manager
    pub async fn get_status(&self) -> LockManagerStatus {
        let running = self.is_running().await;
        let state = self.shared.state.lock().await;

        LockManagerStatus {
            active_locks: state.table().len(),
            pending_requests: state.queue().len(),
            stats: state.stats(),
            deadlock_detection_enabled: self.shared.config.deadlock_detection_enabled,
            healing_enabled: self.shared.config.healing_enabled,
            running,
        }
    }

    /// Active locks on a resource
    pub async fn get_locks_for_resource(&self, resource: &str) -> Vec<Lock> {
        self.shared.state.lock().await.table().locks_for_resource(resource)
    }

    /// Active locks held by an owner
    pub async fn get_locks_for_owner(&self, owner: &str) -> Vec<Lock> {
        self.shared.state.lock().await.table().locks_for_owner(owner)
    }

    /// Look up an active lock
    pub async fn get_lock(&self, lock_id: Uuid) -> Option<Lock> {
        self.shared.state.lock().await.table().get(&lock_id).cloned()
    }

    /// List all active locks
    pub async fn list_active_locks(&self) -> Vec<Lock> {
        self.shared.state.lock().await.table().all()
    }

    /// Pending requests in queue order
    pub async fn pending_requests(&self) -> Vec<LockRequest> {
        self.shared.state.lock().await.queue().requests()
    }

    /// Most recent history entries, newest first
    pub async fn history(&self, limit: usize) -> Vec<HistoryEntry> {
        self.shared.state.lock().await.table().history().recent(limit)
    }

    // ========== Single maintenance passes ==========

    /// Run one queue processor pass
    pub async fn process_queue(&self) -> LockResult<usize> {
        self.shared.process_queue().await
    }

    /// Run one deadlock monitor pass
    pub async fn detect_long_waits(&self) -> usize {
        self.shared.detect_long_waits().await
    }

    /// Run one healer pass
    pub async fn heal_expired_locks(&self) -> usize {
        self.shared.heal_expired_locks().await
    }

    /// Run one janitor pass
    pub async fn run_janitor(&self) -> usize {
        self.shared.run_janitor(true).await
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        if let Ok(workers) = self.workers.try_lock() {
            if let Some(set) = workers.as_ref() {
                set.cancel();
            }
        }
    }
}
