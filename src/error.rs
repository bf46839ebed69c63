//! Error types and error handling strategy for turnstile.
//!
//! Every fallible operation in the crate returns [`Result`], whose error is
//! a single [`Error`] value carrying an [`ErrorKind`]. Callers branch on the
//! kind, not on the message.
//!
//! # Error Categories
//!
//! - **Programmer errors**: a broken invariant in caller code. Releasing a
//!   lock that is not held, constructing a primitive with a zero capacity,
//!   referring to an unknown agent. These are surfaced immediately and are
//!   never retried.
//! - **Environmental conditions**: timeouts, cancellation, shutdown, a
//!   non-blocking attempt that would block. These are ordinary outcomes the
//!   caller is expected to handle.
//!
//! Liveness diagnostics (a worker waiting longer than a fairness bound) are
//! not errors at all; see [`crate::coordinator::FairnessEvent`].

use core::fmt;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Programmer errors ===
    /// Release attempted by a worker that does not hold the lock or permit.
    NotOwned,
    /// A capacity or count parameter was zero or otherwise out of range.
    InvalidCapacity,
    /// The caller already holds the lock it is trying to acquire.
    WouldDeadlock,
    /// The agent id was never registered with the coordinator.
    UnknownAgent,
    /// The resource index is outside the coordinator's resource range.
    UnknownResource,
    /// Configuration failed to parse or validate.
    InvalidConfig,

    // === Environmental conditions ===
    /// A blocking operation gave up at its timeout or deadline.
    TimedOut,
    /// A blocking operation was cancelled through its [`Cx`](crate::Cx).
    Cancelled,
    /// The primitive was shut down.
    Closed,
    /// A non-blocking attempt found the resource unavailable.
    WouldBlock,
    /// A previous holder panicked while holding the lock.
    Poisoned,
}

impl ErrorKind {
    /// Returns the error category for this kind.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::NotOwned
            | Self::InvalidCapacity
            | Self::WouldDeadlock
            | Self::UnknownAgent
            | Self::UnknownResource
            | Self::InvalidConfig => ErrorCategory::Programmer,
            Self::TimedOut | Self::Cancelled | Self::Closed | Self::WouldBlock | Self::Poisoned => {
                ErrorCategory::Environmental
            }
        }
    }

    /// Returns the recoverability classification for this error kind.
    #[must_use]
    pub const fn recoverability(&self) -> Recoverability {
        match self {
            Self::TimedOut | Self::WouldBlock => Recoverability::Transient,
            Self::NotOwned
            | Self::InvalidCapacity
            | Self::WouldDeadlock
            | Self::UnknownAgent
            | Self::UnknownResource
            | Self::InvalidConfig
            | Self::Cancelled
            | Self::Closed
            | Self::Poisoned => Recoverability::Permanent,
        }
    }

    /// Returns true if retrying the same call may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self.recoverability(), Recoverability::Transient)
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::NotOwned => "not owned by caller",
            Self::InvalidCapacity => "invalid capacity",
            Self::WouldDeadlock => "would deadlock",
            Self::UnknownAgent => "unknown agent",
            Self::UnknownResource => "unknown resource",
            Self::InvalidConfig => "invalid configuration",
            Self::TimedOut => "timed out",
            Self::Cancelled => "cancelled",
            Self::Closed => "closed",
            Self::WouldBlock => "would block",
            Self::Poisoned => "poisoned",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// High-level classification of an [`ErrorKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Caller code broke an invariant. Fix the caller.
    Programmer,
    /// The environment refused the operation. Branch on it.
    Environmental,
}

/// Classification of error recoverability for retry logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Recoverability {
    /// Temporary failure that may succeed on retry.
    Transient,
    /// Retrying the same call will fail the same way.
    Permanent,
}

/// The main error type for turnstile operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}{}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
pub struct Error {
    kind: ErrorKind,
    message: Option<String>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            message: None,
        }
    }

    /// Adds a message description to the error.
    #[must_use]
    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = Some(msg.into());
        self
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns the error message, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns the error category.
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        self.kind.category()
    }

    /// Returns the recoverability classification.
    #[must_use]
    pub const fn recoverability(&self) -> Recoverability {
        self.kind.recoverability()
    }

    /// Returns true if this error was caused by a caller bug.
    #[must_use]
    pub const fn is_programmer_error(&self) -> bool {
        matches!(self.kind.category(), ErrorCategory::Programmer)
    }

    /// Returns true if this error is a timeout/deadline condition.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self.kind, ErrorKind::TimedOut)
    }

    /// Returns true if this error represents cancellation.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self.kind, ErrorKind::Cancelled)
    }

    /// Returns true if the primitive was shut down.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self.kind, ErrorKind::Closed)
    }

    /// Release without ownership.
    #[must_use]
    pub fn not_owned(what: &str) -> Self {
        Self::new(ErrorKind::NotOwned).with_message(format!("{what} is not held by the caller"))
    }

    /// Zero or out-of-range capacity at construction.
    #[must_use]
    pub fn invalid_capacity(what: &str, value: usize) -> Self {
        Self::new(ErrorKind::InvalidCapacity)
            .with_message(format!("{what} must be positive, got {value}"))
    }

    /// A blocking operation ran past its deadline.
    #[must_use]
    pub const fn timed_out() -> Self {
        Self::new(ErrorKind::TimedOut)
    }

    /// A blocking operation observed cancellation.
    #[must_use]
    pub const fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled)
    }

    /// The primitive was shut down.
    #[must_use]
    pub const fn closed() -> Self {
        Self::new(ErrorKind::Closed)
    }

    /// A non-blocking attempt could not proceed.
    #[must_use]
    pub const fn would_block() -> Self {
        Self::new(ErrorKind::WouldBlock)
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self::new(kind)
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_split_programmer_and_environment() {
        assert_eq!(ErrorKind::NotOwned.category(), ErrorCategory::Programmer);
        assert_eq!(
            ErrorKind::InvalidCapacity.category(),
            ErrorCategory::Programmer
        );
        assert_eq!(ErrorKind::TimedOut.category(), ErrorCategory::Environmental);
        assert_eq!(ErrorKind::Closed.category(), ErrorCategory::Environmental);
    }

    #[test]
    fn only_transient_kinds_are_retryable() {
        assert!(ErrorKind::TimedOut.is_retryable());
        assert!(ErrorKind::WouldBlock.is_retryable());
        assert!(!ErrorKind::Closed.is_retryable());
        assert!(!ErrorKind::NotOwned.is_retryable());
    }

    #[test]
    fn display_includes_message() {
        let err = Error::invalid_capacity("queue capacity", 0);
        assert_eq!(
            err.to_string(),
            "invalid capacity: queue capacity must be positive, got 0"
        );
        assert_eq!(Error::closed().to_string(), "closed");
    }

    #[test]
    fn predicates_match_kind() {
        assert!(Error::timed_out().is_timeout());
        assert!(Error::cancelled().is_cancelled());
        assert!(Error::closed().is_closed());
        assert!(Error::not_owned("mutex").is_programmer_error());
        assert!(!Error::would_block().is_programmer_error());
    }
}
