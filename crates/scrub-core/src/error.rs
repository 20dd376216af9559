use std::fmt;

use crate::timestamp::Timestamp;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TimestampError {
    Malformed(String),
    OutOfRange(String),
}

impl fmt::Display for TimestampError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimestampError::Malformed(s) => write!(f, "malformed timestamp '{s}': expected YYYYMMDDHHMM00"),
            TimestampError::OutOfRange(s) => write!(f, "timestamp '{s}' has an out-of-range field"),
        }
    }
}

impl std::error::Error for TimestampError {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CategoryError(pub u8);

impl fmt::Display for CategoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown category code {} (expected 1-4)", self.0)
    }
}

impl std::error::Error for CategoryError {}

/// Failures surfaced by `OverlayController`. `E` is the batch source's error.
#[derive(Debug)]
pub enum OverlayError<E> {
    /// The batch source failed; controller state is untouched and the step can be retried.
    Fetch(E),
    /// A timestamp in the window has no resolved batch.
    CacheMiss(Timestamp),
    /// Another step is still loading.
    StepInProgress,
}

impl<E: fmt::Display> fmt::Display for OverlayError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverlayError::Fetch(e) => write!(f, "fetch failed: {e}"),
            OverlayError::CacheMiss(ts) => write!(f, "no cached batch for {ts}"),
            OverlayError::StepInProgress => write!(f, "a step is already loading"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for OverlayError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OverlayError::Fetch(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T, E> = std::result::Result<T, OverlayError<E>>;
