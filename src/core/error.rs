//! Errors surfaced to callers of the valuation services.
//!
//! Provider failures never appear here: they are converted into "no data" at the
//! provider boundary and drive backoff and stale-serving instead.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValuationError {
    /// Malformed fund code, timestamp or settings payload. Never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// No usable cache and the fresh fetch failed (or is suppressed by backoff).
    #[error("Not found: {0}")]
    NotFound(String),
}
