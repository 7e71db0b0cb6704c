//! Lock types and error definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Result type for lock operations
pub type LockResult<T> = std::result::Result<T, LockError>;

/// Opaque caller-supplied metadata carried by requests and locks
pub type Metadata = HashMap<String, serde_json::Value>;

/// Lock errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    /// Lock acquisition timed out
    #[error("Lock timeout: resource '{resource}' was not granted to {requester} within {waited_ms}ms")]
    Timeout {
        resource: String,
        requester: String,
        waited_ms: u64,
    },

    /// The request itself is malformed
    #[error("Invalid lock request: {0}")]
    InvalidRequest(String),

    /// Invalid lock state
    #[error("Invalid lock state: {0}")]
    InvalidState(String),
}

impl LockError {
    /// Get error code for this lock error
    pub fn code(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "E300",
            Self::InvalidRequest(_) => "E301",
            Self::InvalidState(_) => "E302",
        }
    }

    /// Whether the caller may sensibly retry the operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Kind of access a lock grants on its resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockType {
    Read,
    Write,
    Exclusive,
    Shared,
}

impl LockType {
    /// All lock types, in declaration order
    pub const ALL: [LockType; 4] = [Self::Read, Self::Write, Self::Exclusive, Self::Shared];

    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Exclusive => "exclusive",
            Self::Shared => "shared",
        }
    }

    /// Write and Exclusive locks admit no other holder on the resource
    pub fn is_exclusive(&self) -> bool {
        matches!(self, Self::Write | Self::Exclusive)
    }
}

impl fmt::Display for LockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LockType {
    type Err = LockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "read" => Ok(Self::Read),
            "write" => Ok(Self::Write),
            "exclusive" => Ok(Self::Exclusive),
            "shared" => Ok(Self::Shared),
            other => Err(LockError::InvalidRequest(format!(
                "unknown lock type '{}'",
                other
            ))),
        }
    }
}

/// Compatibility matrix: may `requested` be held alongside `existing` on one resource?
///
/// Read and Shared mix freely. Any pairing that involves Write or Exclusive
/// is refused, so the table gives the same answer in either argument order.
pub fn compatible(requested: LockType, existing: LockType) -> bool {
    !requested.is_exclusive() && !existing.is_exclusive()
}

/// Queue priority of a pending request
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum LockPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl LockPriority {
    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for LockPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LockPriority {
    type Err = LockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "normal" => Ok(Self::Normal),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(LockError::InvalidRequest(format!(
                "unknown lock priority '{}'",
                other
            ))),
        }
    }
}

/// Per-call acquisition options
#[derive(Debug, Clone, Default)]
pub struct AcquireOptions {
    /// Queue priority when the lock cannot be granted immediately
    pub priority: LockPriority,

    /// How long the caller may block (None = manager default)
    pub wait_timeout: Option<Duration>,

    /// Lease duration of the granted lock (None = same as the wait timeout)
    pub lease: Option<Duration>,

    /// Opaque metadata copied onto the granted lock
    pub metadata: Metadata,
}

impl AcquireOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the queue priority
    pub fn with_priority(mut self, priority: LockPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the wait timeout
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    /// Set an explicit lease, decoupled from the wait timeout
    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = Some(lease);
        self
    }

    /// Attach a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// A pending lock request
///
/// Lives only until it is granted (immediately or from the wait queue)
/// or times out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockRequest {
    /// Request ID, reused as the lock ID once granted
    pub id: Uuid,

    /// Name of the resource being locked
    pub resource: String,

    /// Requested access
    pub lock_type: LockType,

    /// Queue priority
    pub priority: LockPriority,

    /// Who is asking (becomes the lock owner)
    pub requester: String,

    /// When the request was created
    pub requested_at: DateTime<Utc>,

    /// How long the requester is willing to wait
    pub wait_timeout: Duration,

    /// Lease granted once the lock is acquired
    pub lease: Duration,

    /// Opaque caller metadata
    pub metadata: Metadata,
}

impl LockRequest {
    /// Build a request, resolving the options against a default wait timeout
    pub fn new(
        resource: &str,
        lock_type: LockType,
        requester: &str,
        options: AcquireOptions,
        default_wait_timeout: Duration,
    ) -> LockResult<Self> {
        if resource.trim().is_empty() {
            return Err(LockError::InvalidRequest(
                "resource name must not be empty".to_string(),
            ));
        }
        if requester.trim().is_empty() {
            return Err(LockError::InvalidRequest(
                "requester must not be empty".to_string(),
            ));
        }

        let wait_timeout = options.wait_timeout.unwrap_or(default_wait_timeout);
        let lease = options.lease.unwrap_or(wait_timeout);
        if lease.is_zero() {
            return Err(LockError::InvalidRequest(format!(
                "lease for resource '{}' must be longer than zero",
                resource
            )));
        }
        let requested_at = Utc::now();
        let fits_clock = chrono::Duration::from_std(lease)
            .ok()
            .and_then(|lease| requested_at.checked_add_signed(lease))
            .is_some();
        if !fits_clock {
            return Err(LockError::InvalidRequest(format!(
                "lease of {:?} for resource '{}' is too long",
                lease, resource
            )));
        }

        Ok(Self {
            id: Uuid::new_v4(),
            resource: resource.to_string(),
            lock_type,
            priority: options.priority,
            requester: requester.to_string(),
            requested_at,
            wait_timeout,
            lease,
            metadata: options.metadata,
        })
    }

    /// How long this request has been waiting as of `now`
    pub fn waited(&self, now: DateTime<Utc>) -> Duration {
        (now - self.requested_at).to_std().unwrap_or_default()
    }
}

/// A granted lease on a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lock {
    /// Lock ID (same as the originating request)
    pub id: Uuid,

    /// Name of the locked resource
    pub resource: String,

    /// Granted access
    pub lock_type: LockType,

    /// Requester that holds the lock
    pub owner: String,

    /// When the lock was granted
    pub acquired_at: DateTime<Utc>,

    /// When the lease runs out and the lock becomes reclaimable
    pub expires_at: DateTime<Utc>,

    /// Opaque caller metadata
    pub metadata: Metadata,
}

impl Lock {
    /// Turn a request into a lease starting at `now`
    pub fn from_request(request: &LockRequest, now: DateTime<Utc>) -> LockResult<Self> {
        let lease = chrono::Duration::from_std(request.lease).map_err(|e| {
            LockError::InvalidState(format!(
                "lease of {:?} for resource '{}' is out of range: {}",
                request.lease, request.resource, e
            ))
        })?;
        let expires_at = now.checked_add_signed(lease).ok_or_else(|| {
            LockError::InvalidState(format!(
                "lease of {:?} for resource '{}' overflows the clock",
                request.lease, request.resource
            ))
        })?;

        Ok(Self {
            id: request.id,
            resource: request.resource.clone(),
            lock_type: request.lock_type,
            owner: request.requester.clone(),
            acquired_at: now,
            expires_at,
            metadata: request.metadata.clone(),
        })
    }

    /// Check if the lease has run out as of `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }

    /// Check if the lock is owned by `requester`
    pub fn is_owned_by(&self, requester: &str) -> bool {
        self.owner == requester
    }
}

/// Process-wide counters; they only ever grow
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockStats {
    pub granted: u64,
    pub released: u64,
    pub deadlocks_detected: u64,
    pub locks_healed: u64,
    pub timeouts: u64,
}

/// Snapshot returned by `LockManager::get_status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockManagerStatus {
    pub active_locks: usize,
    pub pending_requests: usize,
    pub stats: LockStats,
    pub deadlock_detection_enabled: bool,
    pub healing_enabled: bool,
    pub running: bool,
}

/// Configuration for the lock manager
#[derive(Debug, Clone)]
pub struct LockConfig {
    /// How often a blocked caller re-checks its request
    pub poll_interval: Duration,

    /// Period of the queue processor
    pub queue_interval: Duration,

    /// Period of the deadlock monitor
    pub deadlock_check_interval: Duration,

    /// Wait after which a queued request is reported as a suspected deadlock
    pub deadlock_threshold: Duration,

    /// Period of the healer
    pub heal_interval: Duration,

    /// Period of the janitor
    pub janitor_interval: Duration,

    /// Pause after a failed background iteration
    pub error_backoff: Duration,

    /// Maximum number of history entries kept
    pub history_capacity: usize,

    /// Wait timeout used when a request does not set one
    pub default_wait_timeout: Duration,

    /// Whether the deadlock monitor runs
    pub deadlock_detection_enabled: bool,

    /// Whether the healer runs
    pub healing_enabled: bool,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(100),
            queue_interval: Duration::from_secs(1),
            deadlock_check_interval: Duration::from_secs(5),
            deadlock_threshold: Duration::from_secs(60),
            heal_interval: Duration::from_secs(10),
            janitor_interval: Duration::from_secs(60),
            error_backoff: Duration::from_secs(5),
            history_capacity: 1000,
            default_wait_timeout: Duration::from_secs(30),
            deadlock_detection_enabled: true,
            healing_enabled: true,
        }
    }
}

impl LockConfig {
    /// Set the waiter poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the queue processor period
    pub fn with_queue_interval(mut self, interval: Duration) -> Self {
        self.queue_interval = interval;
        self
    }

    /// Set the deadlock monitor period and threshold
    pub fn with_deadlock_detection(mut self, interval: Duration, threshold: Duration) -> Self {
        self.deadlock_check_interval = interval;
        self.deadlock_threshold = threshold;
        self
    }

    /// Set the healer period
    pub fn with_heal_interval(mut self, interval: Duration) -> Self {
        self.heal_interval = interval;
        self
    }

    /// Set the janitor period
    pub fn with_janitor_interval(mut self, interval: Duration) -> Self {
        self.janitor_interval = interval;
        self
    }

    /// Set the backoff after a failed background iteration
    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    /// Set the history capacity
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    /// Set the default wait timeout
    pub fn with_default_wait_timeout(mut self, timeout: Duration) -> Self {
        self.default_wait_timeout = timeout;
        self
    }

    /// Enable or disable the deadlock monitor
    pub fn deadlock_detection(mut self, enabled: bool) -> Self {
        self.deadlock_detection_enabled = enabled;
        self
    }

    /// Enable or disable the healer
    pub fn healing(mut self, enabled: bool) -> Self {
        self.healing_enabled = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compatibility_matrix() {
        assert!(compatible(LockType::Read, LockType::Read));
        assert!(compatible(LockType::Read, LockType::Shared));
        assert!(compatible(LockType::Shared, LockType::Read));
        assert!(compatible(LockType::Shared, LockType::Shared));

        for other in LockType::ALL {
            assert!(!compatible(LockType::Write, other));
            assert!(!compatible(other, LockType::Write));
            assert!(!compatible(LockType::Exclusive, other));
            assert!(!compatible(other, LockType::Exclusive));
        }
    }

    #[test]
    fn test_compatibility_is_symmetric() {
        for a in LockType::ALL {
            for b in LockType::ALL {
                assert_eq!(compatible(a, b), compatible(b, a), "{} vs {}", a, b);
            }
        }
    }

    #[test]
    fn test_priority_ordering() {
        assert!(LockPriority::Low < LockPriority::Normal);
        assert!(LockPriority::Normal < LockPriority::High);
        assert!(LockPriority::High < LockPriority::Critical);
        assert_eq!(LockPriority::default(), LockPriority::Normal);
    }

    #[test]
    fn test_parse_lock_type_and_priority() {
        assert_eq!("WRITE".parse::<LockType>().unwrap(), LockType::Write);
        assert_eq!("shared".parse::<LockType>().unwrap(), LockType::Shared);
        assert_eq!("critical".parse::<LockPriority>().unwrap(), LockPriority::Critical);

        let err = "mutex".parse::<LockType>().unwrap_err();
        assert_eq!(err.code(), "E301");
    }

    #[test]
    fn test_request_lease_defaults_to_wait_timeout() {
        let options = AcquireOptions::new().with_wait_timeout(Duration::from_secs(7));
        let request = LockRequest::new(
            "ledger:42",
            LockType::Write,
            "alice",
            options,
            Duration::from_secs(30),
        )
        .unwrap();

        assert_eq!(request.wait_timeout, Duration::from_secs(7));
        assert_eq!(request.lease, Duration::from_secs(7));
        assert_eq!(request.priority, LockPriority::Normal);
    }

    #[test]
    fn test_request_explicit_lease() {
        let options = AcquireOptions::new()
            .with_wait_timeout(Duration::from_secs(2))
            .with_lease(Duration::from_secs(120))
            .with_metadata("txn", serde_json::json!("t-1"));
        let request =
            LockRequest::new("ledger:42", LockType::Read, "bob", options, Duration::from_secs(30))
                .unwrap();

        assert_eq!(request.wait_timeout, Duration::from_secs(2));
        assert_eq!(request.lease, Duration::from_secs(120));
        assert_eq!(request.metadata["txn"], "t-1");
    }

    #[test]
    fn test_request_validation() {
        let empty_resource = LockRequest::new(
            " ",
            LockType::Read,
            "alice",
            AcquireOptions::new(),
            Duration::from_secs(30),
        );
        assert!(matches!(empty_resource, Err(LockError::InvalidRequest(_))));

        let empty_requester = LockRequest::new(
            "r",
            LockType::Read,
            "",
            AcquireOptions::new(),
            Duration::from_secs(30),
        );
        assert!(matches!(empty_requester, Err(LockError::InvalidRequest(_))));

        let zero_lease = LockRequest::new(
            "r",
            LockType::Read,
            "alice",
            AcquireOptions::new().with_wait_timeout(Duration::ZERO),
            Duration::from_secs(30),
        );
        assert!(matches!(zero_lease, Err(LockError::InvalidRequest(_))));

        let endless_lease = LockRequest::new(
            "r",
            LockType::Read,
            "alice",
            AcquireOptions::new().with_lease(Duration::MAX),
            Duration::from_secs(30),
        );
        assert!(matches!(endless_lease, Err(LockError::InvalidRequest(_))));

        // Representable as a chrono duration, but past the end of the calendar
        let overflowing_lease = LockRequest::new(
            "r",
            LockType::Read,
            "alice",
            AcquireOptions::new().with_lease(Duration::from_secs(9_000_000_000_000)),
            Duration::from_secs(30),
        );
        assert!(chrono::Duration::from_std(Duration::from_secs(9_000_000_000_000)).is_ok());
        assert!(matches!(
            overflowing_lease,
            Err(LockError::InvalidRequest(ref msg)) if msg.contains("too long")
        ));
    }

    #[test]
    fn test_lock_from_request() {
        let request = LockRequest::new(
            "ledger:7",
            LockType::Exclusive,
            "carol",
            AcquireOptions::new().with_lease(Duration::from_secs(60)),
            Duration::from_secs(30),
        )
        .unwrap();
        let now = Utc::now();
        let lock = Lock::from_request(&request, now).unwrap();

        assert_eq!(lock.id, request.id);
        assert_eq!(lock.owner, "carol");
        assert!(lock.expires_at > lock.acquired_at);
        assert!(!lock.is_expired_at(now));
        assert!(lock.is_expired_at(now + chrono::Duration::seconds(61)));
        assert!(lock.is_owned_by("carol"));
        assert!(!lock.is_owned_by("dave"));
    }

    #[test]
    fn test_lock_error_codes() {
        let timeout_err = LockError::Timeout {
            resource: "R1".to_string(),
            requester: "bob".to_string(),
            waited_ms: 100,
        };
        assert_eq!(timeout_err.code(), "E300");
        assert!(timeout_err.is_retryable());
        assert!(timeout_err.to_string().contains("R1"));

        let state_err = LockError::InvalidState("x".to_string());
        assert_eq!(state_err.code(), "E302");
        assert!(!state_err.is_retryable());
    }

    #[test]
    fn test_lock_config_builder() {
        let config = LockConfig::default()
            .with_poll_interval(Duration::from_millis(10))
            .with_heal_interval(Duration::from_millis(50))
            .with_history_capacity(5)
            .healing(false);

        assert_eq!(config.poll_interval, Duration::from_millis(10));
        assert_eq!(config.heal_interval, Duration::from_millis(50));
        assert_eq!(config.history_capacity, 5);
        assert!(!config.healing_enabled);
        assert!(config.deadlock_detection_enabled);
        assert_eq!(config.default_wait_timeout, Duration::from_secs(30));
    }
}
