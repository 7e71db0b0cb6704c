//! Lock table
//!
//! Authoritative map of granted locks, indexed by id and by resource,
//! plus the bounded history of what happened to them.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use super::history::{HistoryAction, LockHistory};
use super::types::{Lock, LockRequest, LockResult, LockType, compatible};

#[derive(Debug)]
pub struct LockTable {
    locks: HashMap<Uuid, Lock>,
    by_resource: HashMap<String, HashSet<Uuid>>,
    history: LockHistory,
}

impl LockTable {
    pub fn new(history_capacity: usize) -> Self {
        Self {
            locks: HashMap::new(),
            by_resource: HashMap::new(),
            history: LockHistory::new(history_capacity),
        }
    }

    /// True when every active lock on `resource` is compatible with `lock_type`
    pub fn can_grant(&self, resource: &str, lock_type: LockType) -> bool {
        self.by_resource.get(resource).is_none_or(|ids| {
            ids.iter()
                .filter_map(|id| self.locks.get(id))
                .all(|held| compatible(lock_type, held.lock_type))
        })
    }

    /// Grant `request` as a lease starting at `now`
    ///
    /// Callers check `can_grant` first, inside the same critical section.
    pub fn grant(&mut self, request: &LockRequest, now: DateTime<Utc>) -> LockResult<Lock> {
        let lock = Lock::from_request(request, now)?;
        self.history.record(HistoryAction::Acquired, &lock, now);
        self.by_resource
            .entry(lock.resource.clone())
            .or_default()
            .insert(lock.id);
        self.locks.insert(lock.id, lock.clone());
        Ok(lock)
    }

    /// Release a lock on behalf of its owner
    ///
    /// Returns None when the id is unknown or owned by someone else; the
    /// lock is left untouched in that case.
    pub fn release(&mut self, lock_id: Uuid, requester: &str, now: DateTime<Utc>) -> Option<Lock> {
        if !self.locks.get(&lock_id)?.is_owned_by(requester) {
            return None;
        }
        let lock = self.remove(lock_id)?;
        self.history.record(HistoryAction::Released, &lock, now);
        Some(lock)
    }

    /// Remove a lock regardless of owner
    pub fn reclaim(&mut self, lock_id: Uuid, now: DateTime<Utc>) -> Option<Lock> {
        let lock = self.remove(lock_id)?;
        self.history.record(HistoryAction::Reclaimed, &lock, now);
        Some(lock)
    }

    /// Remove every lock whose lease ran out before `now`
    pub fn reclaim_expired(&mut self, now: DateTime<Utc>) -> Vec<Lock> {
        let expired: Vec<Uuid> = self
            .locks
            .values()
            .filter(|lock| lock.is_expired_at(now))
            .map(|lock| lock.id)
            .collect();

        expired
            .into_iter()
            .filter_map(|id| self.reclaim(id, now))
            .collect()
    }

    pub fn get(&self, lock_id: &Uuid) -> Option<&Lock> {
        self.locks.get(lock_id)
    }

    pub fn contains(&self, lock_id: &Uuid) -> bool {
        self.locks.contains_key(lock_id)
    }

    /// Locks on `resource`, oldest grant first
    pub fn locks_for_resource(&self, resource: &str) -> Vec<Lock> {
        let mut locks: Vec<Lock> = self
            .by_resource
            .get(resource)
            .into_iter()
            .flatten()
            .filter_map(|id| self.locks.get(id))
            .cloned()
            .collect();
        locks.sort_by_key(|lock| lock.acquired_at);
        locks
    }

    /// Locks held by `owner`, oldest grant first
    pub fn locks_for_owner(&self, owner: &str) -> Vec<Lock> {
        let mut locks: Vec<Lock> = self
            .locks
            .values()
            .filter(|lock| lock.is_owned_by(owner))
            .cloned()
            .collect();
        locks.sort_by_key(|lock| lock.acquired_at);
        locks
    }

    /// All active locks, oldest grant first
    pub fn all(&self) -> Vec<Lock> {
        let mut locks: Vec<Lock> = self.locks.values().cloned().collect();
        locks.sort_by_key(|lock| lock.acquired_at);
        locks
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    pub fn history(&self) -> &LockHistory {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut LockHistory {
        &mut self.history
    }

    fn remove(&mut self, lock_id: Uuid) -> Option<Lock> {
        let lock = self.locks.remove(&lock_id)?;
        if let Some(ids) = self.by_resource.get_mut(&lock.resource) {
            ids.remove(&lock_id);
            if ids.is_empty() {
                self.by_resource.remove(&lock.resource);
            }
        }
        Some(lock)
    }
}
