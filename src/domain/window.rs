//! Sliding-window admission policy.
//!
//! A window policy allows up to `limit` requests per caller within any
//! trailing `window` of time. The state itself lives in a shared window
//! store; this module only holds the pure pieces: policy validation, the
//! entries written to the store, and the decisions derived from counts.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use uuid::Uuid;

/// Error returned when a window policy is constructed with invalid bounds.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// The request limit must allow at least one request.
    #[error("request limit must be greater than 0")]
    ZeroLimit,
    /// The window must have a non-zero duration.
    #[error("window duration must be greater than 0")]
    ZeroWindow,
}

/// Sliding-window quota: at most `limit` admissions per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    limit: u64,
    window: Duration,
}

impl WindowPolicy {
    /// Create a policy allowing `limit` requests per `window`.
    ///
    /// # Errors
    /// Returns `PolicyError::ZeroLimit` or `PolicyError::ZeroWindow` when either
    /// bound is zero.
    pub fn new(limit: u64, window: Duration) -> Result<Self, PolicyError> {
        if limit == 0 {
            return Err(PolicyError::ZeroLimit);
        }
        if window.is_zero() {
            return Err(PolicyError::ZeroWindow);
        }
        Ok(Self { limit, window })
    }

    /// Convenience constructor taking the window in whole seconds.
    pub fn per_seconds(limit: u64, window_secs: u64) -> Result<Self, PolicyError> {
        Self::new(limit, Duration::from_secs(window_secs))
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Oldest timestamp (exclusive) still inside the window ending at `now`.
    ///
    /// Entries with a timestamp less than or equal to the cutoff are expired.
    pub fn cutoff(&self, now: WindowTimestamp) -> WindowTimestamp {
        let window_micros = i64::try_from(self.window.as_micros()).unwrap_or(i64::MAX);
        WindowTimestamp(now.0.saturating_sub(window_micros))
    }

    /// Decide admission from the number of entries already in the window.
    ///
    /// The request that brings the count to exactly `limit` is the last one
    /// admitted.
    pub fn decide(&self, count_before: u64) -> bool {
        count_before < self.limit
    }

    /// Build the read-only status view for a given in-window count.
    pub fn status(&self, count: u64) -> RateStatus {
        RateStatus {
            count,
            limit: self.limit,
            remaining: self.limit.saturating_sub(count),
            window: self.window,
        }
    }
}

impl Default for WindowPolicy {
    /// 100 requests per minute.
    fn default() -> Self {
        Self {
            limit: 100,
            window: Duration::from_secs(60),
        }
    }
}

/// Microseconds since the Unix epoch.
///
/// Window stores are shared between processes, so entries are stamped with
/// wall-clock time rather than a process-local `Instant`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WindowTimestamp(i64);

impl WindowTimestamp {
    pub fn from_micros(micros: i64) -> Self {
        Self(micros)
    }

    pub fn from_system_time(time: SystemTime) -> Self {
        let micros = match time.duration_since(UNIX_EPOCH) {
            Ok(since) => i64::try_from(since.as_micros()).unwrap_or(i64::MAX),
            Err(before) => -i64::try_from(before.duration().as_micros()).unwrap_or(i64::MAX),
        };
        Self(micros)
    }

    pub fn as_micros(&self) -> i64 {
        self.0
    }

    pub fn offset(&self, by: Duration) -> Self {
        let micros = i64::try_from(by.as_micros()).unwrap_or(i64::MAX);
        Self(self.0.saturating_add(micros))
    }
}

/// One admitted request recorded in a caller's window.
///
/// The member id keeps entries distinct when several requests land in the
/// same microsecond, and lets a denied request retract exactly its own entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowEntry {
    pub timestamp: WindowTimestamp,
    pub member: String,
}

impl WindowEntry {
    pub fn new(timestamp: WindowTimestamp) -> Self {
        Self {
            timestamp,
            member: format!("{}-{}", timestamp.as_micros(), Uuid::new_v4().simple()),
        }
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    /// The request fits in the caller's window.
    Admitted,
    /// The caller already used its quota for the window.
    Denied,
    /// The window store could not be consulted; the request is let through.
    FailedOpen,
}

impl AdmissionDecision {
    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        !matches!(self, AdmissionDecision::Denied)
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, AdmissionDecision::Denied)
    }
}

/// Read-only view of a caller's quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateStatus {
    /// Requests currently counted in the window
    pub count: u64,
    /// Maximum requests per window
    pub limit: u64,
    /// Requests still available in the window
    pub remaining: u64,
    /// Window length
    pub window: Duration,
}

impl fmt::Display for RateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} requests in {}s ({} remaining)",
            self.count,
            self.limit,
            self.window.as_secs(),
            self.remaining
        )
    }
}
