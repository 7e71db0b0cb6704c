//! Lock history
//!
//! Append-only log of grants, releases and reclaims, bounded to a fixed
//! number of entries with the oldest evicted first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

use super::types::Lock;

/// What happened to a lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    /// A lock was granted
    Acquired,
    /// The owner released the lock
    Released,
    /// The lease ran out (or an operator forced it) and the lock was removed
    Reclaimed,
}

impl HistoryAction {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Acquired => "acquired",
            Self::Released => "released",
            Self::Reclaimed => "reclaimed",
        }
    }
}

impl std::fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single history record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub action: HistoryAction,
    pub lock_id: Uuid,
    pub resource: String,
    pub requester: String,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    fn for_lock(action: HistoryAction, lock: &Lock, timestamp: DateTime<Utc>) -> Self {
        Self {
            action,
            lock_id: lock.id,
            resource: lock.resource.clone(),
            requester: lock.owner.clone(),
            timestamp,
        }
    }
}

/// Bounded history log
#[derive(Debug, Clone)]
pub struct LockHistory {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl LockHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity,
        }
    }

    /// Append an entry for `lock`, evicting the oldest entry when full
    pub fn record(&mut self, action: HistoryAction, lock: &Lock, timestamp: DateTime<Utc>) {
        self.entries
            .push_back(HistoryEntry::for_lock(action, lock, timestamp));
        self.trim();
    }

    /// Drop the oldest entries beyond capacity; returns how many were dropped
    pub fn trim(&mut self) -> usize {
        let excess = self.entries.len().saturating_sub(self.capacity);
        self.entries.drain(..excess);
        excess
    }

    /// The most recent `limit` entries, newest first
    pub fn recent(&self, limit: usize) -> Vec<HistoryEntry> {
        self.entries.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locking::types::{AcquireOptions, LockRequest, LockType};
    use std::time::Duration;

    fn lock(resource: &str, owner: &str) -> Lock {
        let request = LockRequest::new(
            resource,
            LockType::Write,
            owner,
            AcquireOptions::new(),
            Duration::from_secs(30),
        )
        .unwrap();
        Lock::from_request(&request, Utc::now()).unwrap()
    }

    #[test]
    fn test_record_and_recent() {
        let mut history = LockHistory::new(10);
        let l = lock("R1", "alice");

        history.record(HistoryAction::Acquired, &l, l.acquired_at);
        history.record(HistoryAction::Released, &l, Utc::now());

        let recent = history.recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].action, HistoryAction::Released);
        assert_eq!(recent[1].action, HistoryAction::Acquired);
        assert_eq!(recent[1].lock_id, l.id);
        assert_eq!(recent[1].requester, "alice");
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let mut history = LockHistory::new(3);
        let locks: Vec<Lock> = (0..5).map(|i| lock(&format!("R{}", i), "alice")).collect();

        for l in &locks {
            history.record(HistoryAction::Acquired, l, Utc::now());
        }

        assert_eq!(history.len(), history.capacity());
        let resources: Vec<String> = history
            .recent(3)
            .into_iter()
            .map(|e| e.resource)
            .collect();
        assert_eq!(resources, vec!["R4", "R3", "R2"]);
    }

    #[test]
    fn test_trim_is_idempotent() {
        let mut history = LockHistory::new(2);
        let l = lock("R1", "alice");
        history.record(HistoryAction::Acquired, &l, Utc::now());

        assert_eq!(history.trim(), 0);
        assert_eq!(history.trim(), 0);
        assert_eq!(history.len(), 1);
    }

    #[test]
    fn test_action_display() {
        assert_eq!(HistoryAction::Acquired.to_string(), "acquired");
        assert_eq!(HistoryAction::Released.to_string(), "released");
        assert_eq!(HistoryAction::Reclaimed.to_string(), "reclaimed");
    }
}
