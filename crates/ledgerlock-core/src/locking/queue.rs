//! Wait queue
//!
//! Pending requests ordered by priority (highest first) and, within one
//! priority, by arrival.

use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::time::Duration;
use uuid::Uuid;

use super::types::{LockPriority, LockRequest, compatible};

#[derive(Debug, Clone)]
struct QueuedRequest {
    request: LockRequest,
    seq: u64,
}

impl QueuedRequest {
    fn order_key(&self) -> (Reverse<LockPriority>, u64) {
        (Reverse(self.request.priority), self.seq)
    }
}

#[derive(Debug, Default)]
pub struct WaitQueue {
    entries: Vec<QueuedRequest>,
    next_seq: u64,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert behind every request of equal or higher priority; returns the position
    pub fn push(&mut self, request: LockRequest) -> usize {
        let entry = QueuedRequest {
            request,
            seq: self.next_seq,
        };
        self.next_seq += 1;

        let key = entry.order_key();
        let position = self.entries.partition_point(|e| e.order_key() < key);
        self.entries.insert(position, entry);
        position
    }

    pub fn remove(&mut self, request_id: &Uuid) -> Option<LockRequest> {
        let index = self.index_of(request_id)?;
        Some(self.entries.remove(index).request)
    }

    pub fn contains(&self, request_id: &Uuid) -> bool {
        self.index_of(request_id).is_some()
    }

    pub fn get(&self, request_id: &Uuid) -> Option<&LockRequest> {
        self.index_of(request_id).map(|i| &self.entries[i].request)
    }

    /// Whether an earlier queued request on the same resource conflicts with this one
    ///
    /// A request behind a conflicting one must not be granted first, or the
    /// queue order would only hold for whoever happens to poll first.
    pub fn is_blocked_by_earlier(&self, request_id: &Uuid) -> bool {
        let Some(index) = self.index_of(request_id) else {
            return false;
        };
        let request = &self.entries[index].request;
        self.entries[..index].iter().any(|earlier| {
            earlier.request.resource == request.resource
                && !compatible(request.lock_type, earlier.request.lock_type)
        })
    }

    /// Request ids in queue order
    pub fn snapshot_ids(&self) -> Vec<Uuid> {
        self.entries.iter().map(|e| e.request.id).collect()
    }

    /// Requests in queue order
    pub fn requests(&self) -> Vec<LockRequest> {
        self.entries.iter().map(|e| e.request.clone()).collect()
    }

    /// Requests that have been waiting longer than `threshold` as of `now`
    pub fn long_waits(&self, now: DateTime<Utc>, threshold: Duration) -> Vec<LockRequest> {
        self.entries
            .iter()
            .filter(|e| e.request.waited(now) > threshold)
            .map(|e| e.request.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn index_of(&self, request_id: &Uuid) -> Option<usize> {
        self.entries.iter().position(|e| &e.request.id == request_id)
    }
}
