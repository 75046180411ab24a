//! Shared error taxonomy and retry policy.
//!
//! Every public operation in this crate returns `Result<T, KernelError>`.
//! Leaf error types (`StoreError`, `SyncError`, `TemporalError`,
//! `PolicyError`, `GovernanceError`) convert into `KernelError` via `From`,
//! classifying themselves into one of the `Kind` variants so callers can
//! branch on retryability without matching on module-specific types.

use std::fmt;
use std::time::Duration;

/// Classification of a failure, independent of which component raised it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// The caller supplied a malformed or out-of-range argument.
    InvalidInput,
    /// The referenced entity does not exist.
    NotFound,
    /// The operation conflicts with concurrent state; retried once by the caller.
    Conflict,
    /// A transient failure in a dependency; eligible for bounded backoff retry.
    Transient,
    /// A failure that will not resolve on retry.
    Permanent,
    /// The operation was cancelled; never surfaced as an error to end users.
    Cancelled,
    /// A policy backend denied the operation.
    PolicyDeny,
}

impl Kind {
    /// Whether an operation that failed with this kind should be retried.
    pub fn is_retryable(self) -> bool {
        matches!(self, Kind::Conflict | Kind::Transient)
    }
}

/// The crate-wide error type returned by every public operation.
#[derive(Debug)]
pub struct KernelError {
    kind: Kind,
    message: String,
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl KernelError {
    /// Construct a new error of the given kind.
    pub fn new(kind: Kind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Attach an underlying cause.
    pub fn with_source(
        kind: Kind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// The classification of this error.
    pub fn kind(&self) -> Kind {
        self.kind
    }

    /// Shorthand for a cancellation signal. Callers should check
    /// `kind() == Kind::Cancelled` rather than logging this as a failure.
    pub fn cancelled() -> Self {
        Self::new(Kind::Cancelled, "operation cancelled")
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for KernelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// Bounded exponential backoff retry, shared by the sync writer and the
/// remote policy backend. Base 500ms, factor 2, cap 8s, max 3 attempts.
pub mod retry {
    use super::*;

    /// Retry policy parameters.
    #[derive(Debug, Clone, Copy)]
    pub struct BackoffPolicy {
        pub base: Duration,
        pub factor: u32,
        pub cap: Duration,
        pub max_attempts: u32,
    }

    impl Default for BackoffPolicy {
        fn default() -> Self {
            Self {
                base: Duration::from_millis(500),
                factor: 2,
                cap: Duration::from_secs(8),
                max_attempts: 3,
            }
        }
    }

    impl BackoffPolicy {
        /// Delay before the given attempt number (0-indexed), capped.
        pub fn delay_for(&self, attempt: u32) -> Duration {
            let scaled = self.base.as_millis() as u64 * self.factor.pow(attempt) as u64;
            Duration::from_millis(scaled).min(self.cap)
        }
    }

    /// Run `op` under the backoff policy, retrying only when the returned
    /// error's `Kind` is retryable. `Cancelled` short-circuits immediately.
    pub async fn with_backoff<T, F, Fut>(policy: BackoffPolicy, mut op: F) -> Result<T, KernelError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, KernelError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.kind() == Kind::Cancelled => return Err(e),
                Err(e) if e.kind().is_retryable() && attempt + 1 < policy.max_attempts => {
                    tokio::time::sleep(policy.delay_for(attempt)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
