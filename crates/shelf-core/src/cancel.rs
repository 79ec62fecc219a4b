//! Cooperative cancellation shared by the command host and running sagas.
//!
//! Sagas poll the token at step boundaries and between streamed chunks, so
//! a cancelled run stops before its next remote write and never commits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared stop flag. Clones observe the same state.
///
/// ```
/// use shelf_core::cancel::CancellationToken;
///
/// let host = CancellationToken::new();
/// let saga = host.clone();
///
/// assert!(host.cancel());
/// assert!(!host.cancel());
/// assert!(saga.check().is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop. Returns `true` only for the call that flipped the flag,
    /// which lets a host escalate on a repeated interrupt.
    pub fn cancel(&self) -> bool {
        !self.flag.swap(true, Ordering::AcqRel)
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// `Err(CancelledError)` once a stop was requested; use with `?`.
    pub fn check(&self) -> Result<(), CancelledError> {
        match self.is_cancelled() {
            true => Err(CancelledError),
            false => Ok(()),
        }
    }
}

/// Marker error for a stop request observed by [`CancellationToken::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelledError;

impl std::fmt::Display for CancelledError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("stop requested")
    }
}

impl std::error::Error for CancelledError {}

impl From<CancelledError> for crate::error::ShelfError {
    fn from(_: CancelledError) -> Self {
        crate::error::ShelfError::Cancelled
    }
}
