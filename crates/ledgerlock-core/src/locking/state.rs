//! Serialized lock state
//!
//! The lock table, the wait queue and the counters change together, so they
//! live in one struct behind one mutex. Every check-then-mutate sequence
//! (can-grant then grant, dequeue then grant) is a single method call here.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::queue::WaitQueue;
use super::table::LockTable;
use super::types::{Lock, LockError, LockRequest, LockResult, LockStats};

/// Release posted by a dropped guard, applied inside the next critical section
#[derive(Debug, Clone)]
pub struct ReleaseNotice {
    pub lock_id: Uuid,
    pub requester: String,
}

/// Result of a waiter re-checking its queued request
#[derive(Debug)]
pub enum PollOutcome {
    /// The waiter's own poll granted the lock
    Granted(Lock),
    /// The request left the queue because the queue processor granted it
    GrantedElsewhere,
    /// Still waiting
    Pending,
}

/// Result of one queue processor pass
#[derive(Debug, Default)]
pub struct QueuePass {
    pub granted: Vec<Lock>,
    pub failed: Vec<(Uuid, LockError)>,
}

#[derive(Debug)]
pub struct LockState {
    table: LockTable,
    queue: WaitQueue,
    stats: LockStats,
    release_rx: mpsc::UnboundedReceiver<ReleaseNotice>,
}

impl LockState {
    pub fn new(history_capacity: usize, release_rx: mpsc::UnboundedReceiver<ReleaseNotice>) -> Self {
        Self {
            table: LockTable::new(history_capacity),
            queue: WaitQueue::new(),
            stats: LockStats::default(),
            release_rx,
        }
    }

    /// Grant right away if the table allows it; never queues
    pub fn try_grant(&mut self, request: &LockRequest, now: DateTime<Utc>) -> LockResult<Option<Lock>> {
        self.drain_releases(now);
        if !self.table.can_grant(&request.resource, request.lock_type) {
            return Ok(None);
        }
        self.grant(request, now).map(Some)
    }

    /// Park a request in the wait queue; returns its position
    pub fn enqueue(&mut self, request: LockRequest) -> usize {
        self.queue.push(request)
    }

    /// Re-check a queued request on behalf of its waiter
    pub fn poll_queued(&mut self, request_id: &Uuid, now: DateTime<Utc>) -> LockResult<PollOutcome> {
        self.drain_releases(now);
        let Some(request) = self.queue.get(request_id).cloned() else {
            return Ok(PollOutcome::GrantedElsewhere);
        };
        if !self.is_grantable(&request) {
            return Ok(PollOutcome::Pending);
        }
        let lock = self.grant(&request, now)?;
        self.queue.remove(request_id);
        Ok(PollOutcome::Granted(lock))
    }

    /// Drop a queued request whose waiter gave up; counts a timeout
    pub fn expire_queued(&mut self, request_id: &Uuid) -> Option<LockRequest> {
        let request = self.queue.remove(request_id)?;
        self.stats.timeouts += 1;
        Some(request)
    }

    /// Drop a queued request whose waiter failed for a reason other than timing out
    pub fn abandon_queued(&mut self, request_id: &Uuid) -> Option<LockRequest> {
        self.queue.remove(request_id)
    }

    /// Owner release; None when the id is unknown or foreign
    pub fn release(&mut self, lock_id: Uuid, requester: &str, now: DateTime<Utc>) -> Option<Lock> {
        let lock = self.table.release(lock_id, requester, now)?;
        self.stats.released += 1;
        Some(lock)
    }

    /// Administrative removal regardless of owner
    pub fn force_release(&mut self, lock_id: Uuid, now: DateTime<Utc>) -> Option<Lock> {
        self.table.reclaim(lock_id, now)
    }

    /// Grant every queued request that has become grantable, in queue order
    pub fn process_queue(&mut self, now: DateTime<Utc>) -> QueuePass {
        self.drain_releases(now);
        let mut pass = QueuePass::default();

        for request_id in self.queue.snapshot_ids() {
            let Some(request) = self.queue.get(&request_id).cloned() else {
                continue;
            };
            if !self.is_grantable(&request) {
                continue;
            }
            match self.grant(&request, now) {
                Ok(lock) => {
                    self.queue.remove(&request_id);
                    pass.granted.push(lock);
                }
                Err(e) => pass.failed.push((request_id, e)),
            }
        }

        pass
    }

    /// Queued requests waiting beyond `threshold`; each one counts on every pass
    pub fn detect_long_waits(&mut self, now: DateTime<Utc>, threshold: Duration) -> Vec<LockRequest> {
        let flagged = self.queue.long_waits(now, threshold);
        self.stats.deadlocks_detected += flagged.len() as u64;
        flagged
    }

    /// Reclaim every lock whose lease ran out
    pub fn heal_expired(&mut self, now: DateTime<Utc>) -> Vec<Lock> {
        self.drain_releases(now);
        let healed = self.table.reclaim_expired(now);
        self.stats.locks_healed += healed.len() as u64;
        healed
    }

    /// Cut the history back to its capacity
    pub fn trim_history(&mut self) -> usize {
        self.table.history_mut().trim()
    }

    /// Apply releases posted by dropped guards
    pub fn drain_releases(&mut self, now: DateTime<Utc>) -> Vec<Lock> {
        let mut released = Vec::new();
        while let Ok(notice) = self.release_rx.try_recv() {
            if let Some(lock) = self.release(notice.lock_id, &notice.requester, now) {
                released.push(lock);
            }
        }
        released
    }

    pub fn table(&self) -> &LockTable {
        &self.table
    }

    pub fn queue(&self) -> &WaitQueue {
        &self.queue
    }

    pub fn stats(&self) -> LockStats {
        self.stats
    }

    fn is_grantable(&self, request: &LockRequest) -> bool {
        !self.queue.is_blocked_by_earlier(&request.id)
            && self.table.can_grant(&request.resource, request.lock_type)
    }

    fn grant(&mut self, request: &LockRequest, now: DateTime<Utc>) -> LockResult<Lock> {
        let lock = self.table.grant(request, now)?;
        self.stats.granted += 1;
        Ok(lock)
    }
}
