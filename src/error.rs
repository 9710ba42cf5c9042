//! Failure classification and the bounded retry policy.
//!
//! Every upstream fault surfaces as a [`FetchError`] at the client
//! boundary and is mapped to one of four classes. The classes drive both
//! the in-run retry decision and the run-level bookkeeping:
//!
//! | Class | Retry in-run? | Run-level effect |
//! |-------|---------------|------------------|
//! | `missing_404` | no | counted, not fatal |
//! | `transient_5xx` | bounded backoff | PARTIAL if retries exhausted |
//! | `rate_limit` | bounded, honors retry-after | PARTIAL if retries exhausted |
//! | `other_err` | no | target marked `ERR:<class>`, sweep continues |

use std::time::Duration;

use thiserror::Error;

/// Normalized error produced by an upstream client.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The item vanished between discovery and fetch.
    #[error("not found: {0}")]
    Missing(String),

    /// Upstream fault (HTTP 5xx or equivalent), retryable.
    #[error("upstream error: status {status}")]
    Upstream { status: u16 },

    /// Quota exhaustion; `retry_after` is the provider-supplied wait hint.
    #[error("rate limited")]
    RateLimit { retry_after: Option<Duration> },

    /// Unclassified — treated conservatively as fatal to the target.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FetchError {
    pub fn class(&self) -> ErrorClass {
        match self {
            FetchError::Missing(_) => ErrorClass::Missing404,
            FetchError::Upstream { .. } => ErrorClass::Transient5xx,
            FetchError::RateLimit { .. } => ErrorClass::RateLimit,
            FetchError::Other(_) => ErrorClass::OtherErr,
        }
    }
}

/// The closed failure taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    Missing404,
    Transient5xx,
    RateLimit,
    OtherErr,
}

impl ErrorClass {
    /// Wire name, used verbatim in log lines and the run-status feed.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Missing404 => "missing_404",
            ErrorClass::Transient5xx => "transient_5xx",
            ErrorClass::RateLimit => "rate_limit",
            ErrorClass::OtherErr => "other_err",
        }
    }

    pub fn retryable(&self) -> bool {
        matches!(self, ErrorClass::Transient5xx | ErrorClass::RateLimit)
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bounded exponential backoff. No operation retries without bound.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(cfg: &crate::config::SweepConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            backoff: Duration::from_millis(cfg.backoff_ms),
            max_backoff: Duration::from_millis(cfg.max_backoff_ms),
        }
    }

    /// How long to wait before retry number `attempt` (zero-based), or
    /// `None` when the error is non-retryable or the bound is exhausted.
    /// Rate-limit waits honor the provider hint, capped at `max_backoff`.
    pub fn delay_for(&self, err: &FetchError, attempt: u32) -> Option<Duration> {
        if !err.class().retryable() || attempt >= self.max_retries {
            return None;
        }
        let exp = self
            .backoff
            .checked_mul(1u32 << attempt.min(16))
            .unwrap_or(self.max_backoff);
        let delay = match err {
            FetchError::RateLimit {
                retry_after: Some(hint),
            } => exp.max(*hint),
            _ => exp,
        };
        Some(delay.min(self.max_backoff))
    }
}
