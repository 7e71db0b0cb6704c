//! Resource locking for financial record mutation
//!
//! In-process lock manager granting named-resource locks with read/write
//! semantics, queueing excess demand by priority and reclaiming abandoned
//! leases.
//!
//! # Architecture
//!
//! - **Compatibility matrix**: `compatible` decides which lock types may share a resource
//! - **Lock table**: active locks plus a bounded history
//! - **Wait queue**: pending requests, highest priority first, FIFO within a priority
//! - **Lock manager**: the facade; owns the state and the background workers
//! - **Workers**: queue processor, deadlock monitor, healer and janitor
//! - **Guards**: RAII-style lock guards for automatic release
//!
//! # Example
//!
//! ```ignore
//! use ledgerlock_core::locking::{AcquireOptions, LockConfig, LockManager, LockType};
//!
//! let manager = LockManager::new(LockConfig::default());
//! manager.start().await;
//!
//! let lock_id = manager
//!     .acquire_lock("account:42", LockType::Write, "payments", AcquireOptions::new())
//!     .await?;
//!
//! // Mutate the record...
//!
//! manager.release_lock(lock_id, "payments").await;
//! manager.stop().await;
//! ```

pub mod guard;
pub mod history;
pub mod manager;
pub mod queue;
pub mod state;
pub mod table;
pub mod types;
pub mod workers;

// Re-export main types
pub use guard::LockGuard;
pub use history::{HistoryAction, HistoryEntry, LockHistory};
pub use manager::LockManager;
pub use queue::WaitQueue;
pub use table::LockTable;
pub use types::{
    AcquireOptions, Lock, LockConfig, LockError, LockManagerStatus, LockPriority, LockRequest,
    LockResult, LockStats, LockType, Metadata, compatible,
};
pub use workers::Worker;
