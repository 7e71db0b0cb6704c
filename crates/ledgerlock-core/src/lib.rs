//! Ledgerlock Core Library
//!
//! This crate provides the in-process resource lock manager used by the
//! ledger platform, including:
//! - Read/Write/Exclusive/Shared locks on named resources
//! - Priority wait queue with bounded waits
//! - Heuristic deadlock reporting and lease healing
//! - File-backed configuration

pub mod config;
pub mod locking;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::locking::{
        AcquireOptions, LockConfig, LockError, LockManager, LockPriority, LockResult, LockType,
    };
}
