use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::event::Batch;
use crate::timestamp::Timestamp;

/// Memoizing provider of per-timestamp event batches.
///
/// Implementations resolve each timestamp at most once and share a single
/// in-flight fetch between concurrent `load` callers. A failed load must
/// leave the key unresolved so a later call can retry.
pub trait BatchSource {
    type Error: fmt::Display + fmt::Debug + Send;

    /// True iff a batch for `timestamp` is already resolved.
    fn has(&self, timestamp: &Timestamp) -> bool;

    /// The resolved batch, or `None` when `has(timestamp)` is false.
    fn loaded_events(&self, timestamp: &Timestamp) -> Option<Batch>;

    /// Resolve the batch for `timestamp`, fetching it if needed.
    fn load(&self, timestamp: &Timestamp) -> impl Future<Output = Result<Batch, Self::Error>> + Send;
}

impl<S: BatchSource + Send + Sync> BatchSource for Arc<S> {
    type Error = S::Error;

    fn has(&self, timestamp: &Timestamp) -> bool {
        (**self).has(timestamp)
    }

    fn loaded_events(&self, timestamp: &Timestamp) -> Option<Batch> {
        (**self).loaded_events(timestamp)
    }

    fn load(&self, timestamp: &Timestamp) -> impl Future<Output = Result<Batch, Self::Error>> + Send {
        (**self).load(timestamp)
    }
}
