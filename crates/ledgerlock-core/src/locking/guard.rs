//! Lock guards for RAII-style lock management
//!
//! A guard posts a release notice when dropped, so a lease is given back
//! even on early returns. The notice is applied by the manager inside its
//! next critical section; waiters are woken right away.

use super::state::ReleaseNotice;
use super::types::{Lock, LockType};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Notify, mpsc};
use uuid::Uuid;

/// Channel for handing releases back to the lock manager
pub type ReleaseNotifier = mpsc::UnboundedSender<ReleaseNotice>;

/// Holds a granted lock until released or dropped
#[derive(Debug)]
pub struct LockGuard {
    /// The granted lock as it was at grant time
    lock: Lock,

    /// Channel to notify the lock manager of release
    release_tx: Option<ReleaseNotifier>,

    /// Wakes blocked acquirers once the release is posted
    waiters: Arc<Notify>,
}

impl LockGuard {
    pub(crate) fn new(lock: Lock, release_tx: ReleaseNotifier, waiters: Arc<Notify>) -> Self {
        Self {
            lock,
            release_tx: Some(release_tx),
            waiters,
        }
    }

    /// Get the lock ID
    pub fn id(&self) -> Uuid {
        self.lock.id
    }

    pub fn resource(&self) -> &str {
        &self.lock.resource
    }

    pub fn lock_type(&self) -> LockType {
        self.lock.lock_type
    }

    pub fn owner(&self) -> &str {
        &self.lock.owner
    }

    /// Get the lock as granted
    pub fn lock(&self) -> &Lock {
        &self.lock
    }

    /// Whether the lease is still running (the healer may reclaim it after this)
    pub fn is_within_lease(&self) -> bool {
        !self.lock.is_expired_at(chrono::Utc::now())
    }

    /// Give up the lock explicitly (normally done on drop)
    pub fn release(mut self) {
        self.do_release();
    }

    /// Keep the lock past the guard's lifetime; returns its id for `release_lock`
    pub fn into_lock_id(mut self) -> Uuid {
        self.release_tx = None;
        self.lock.id
    }

    fn do_release(&mut self) {
        if let Some(tx) = self.release_tx.take() {
            // The manager may already be gone, in which case there is nothing to release
            let _ = tx.send(ReleaseNotice {
                lock_id: self.lock.id,
                requester: self.lock.owner.clone(),
            });
            self.waiters.notify_waiters();
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.do_release();
    }
}

impl fmt::Display for LockGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Lock[{}:{}:{}]",
            self.lock.resource, self.lock.lock_type, self.lock.owner
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::locking::types::{AcquireOptions, LockRequest};
    use chrono::Utc;
    use std::time::Duration;

    fn test_guard() -> (LockGuard, mpsc::UnboundedReceiver<ReleaseNotice>) {
        let request = LockRequest::new(
            "ledger:1",
            LockType::Write,
            "alice",
            AcquireOptions::new(),
            Duration::from_secs(30),
        )
        .unwrap();
        let lock = Lock::from_request(&request, Utc::now()).unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        (LockGuard::new(lock, tx, Arc::new(Notify::new())), rx)
    }

    #[test]
    fn test_drop_posts_release() {
        let (guard, mut rx) = test_guard();
        let id = guard.id();
        drop(guard);

        let notice = rx.try_recv().unwrap();
        assert_eq!(notice.lock_id, id);
        assert_eq!(notice.requester, "alice");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_explicit_release_posts_once() {
        let (guard, mut rx) = test_guard();
        guard.release();

        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_into_lock_id_keeps_lock() {
        let (guard, mut rx) = test_guard();
        let expected = guard.id();
        let id = guard.into_lock_id();

        assert_eq!(id, expected);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_guard_accessors() {
        let (guard, _rx) = test_guard();
        assert_eq!(guard.resource(), "ledger:1");
        assert_eq!(guard.lock_type(), LockType::Write);
        assert_eq!(guard.owner(), "alice");
        assert!(guard.is_within_lease());
        assert_eq!(guard.to_string(), "Lock[ledger:1:write:alice]");
    }
}
