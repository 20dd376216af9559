//! Memoizing events broker.
//!
//! Each published file is fetched at most once: concurrent requests for the
//! same key join one shared in-flight fetch, a successful result is written
//! once and never evicted, and a failure leaves the key unresolved so a later
//! request retries it.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt, Shared, try_join_all};
use parking_lot::Mutex;
use tracing::Instrument;

use scrub_core::{Batch, BatchSource, CategoryCode, EventRecord, Timestamp};

use crate::backend::StorageBackend;
use crate::error::{Result, StoreError};
use crate::outline::MapOutline;
use crate::paths::{event_batch_path, map_outline_path};

type SharedFetch<T> = Shared<BoxFuture<'static, Result<T>>>;

struct InFlight<T> {
    id: u64,
    fetch: SharedFetch<T>,
}

/// Write-once results plus the fetches still pending, per key.
struct Memo<K, T> {
    resolved: HashMap<K, T>,
    in_flight: HashMap<K, InFlight<T>>,
    next_id: u64,
}

impl<K, T> Default for Memo<K, T> {
    fn default() -> Self {
        Self {
            resolved: HashMap::new(),
            in_flight: HashMap::new(),
            next_id: 0,
        }
    }
}

/// Resolve `key` through `memo`, starting a fetch with `start` only when no
/// result and no in-flight fetch exist.
async fn memoized<K, T>(
    memo: &Mutex<Memo<K, T>>,
    key: K,
    start: impl FnOnce() -> BoxFuture<'static, Result<T>>,
) -> Result<T>
where
    K: Eq + Hash + Clone + fmt::Debug,
    T: Clone + Send + Sync + 'static,
{
    let (id, fetch) = {
        let mut memo = memo.lock();
        if let Some(value) = memo.resolved.get(&key) {
            tracing::debug!(?key, "cache hit");
            return Ok(value.clone());
        }
        match memo.in_flight.get(&key) {
            Some(pending) => {
                tracing::debug!(?key, "joining in-flight fetch");
                (pending.id, pending.fetch.clone())
            }
            None => {
                let id = memo.next_id;
                memo.next_id += 1;
                let fetch = start().shared();
                memo.in_flight.insert(
                    key.clone(),
                    InFlight {
                        id,
                        fetch: fetch.clone(),
                    },
                );
                (id, fetch)
            }
        }
    };

    let result = fetch.await;

    let mut memo = memo.lock();
    // Only the fetch we joined may be cleared; a retry may already own the slot.
    if memo.in_flight.get(&key).is_some_and(|p| p.id == id) {
        memo.in_flight.remove(&key);
    }
    match &result {
        Ok(value) => {
            memo.resolved.entry(key).or_insert_with(|| value.clone());
        }
        Err(e) => tracing::warn!(?key, error = %e, "fetch failed; key left unresolved"),
    }
    result
}

/// Fetches and memoizes event batches keyed by timestamp and category.
pub struct EventsBroker<B> {
    backend: Arc<B>,
    categories: Vec<CategoryCode>,
    batches: Mutex<Memo<(Timestamp, CategoryCode), Batch>>,
    merged: Mutex<HashMap<Timestamp, Batch>>,
    outline: Mutex<Memo<(), Arc<MapOutline>>>,
    span: tracing::Span,
}

impl<B: StorageBackend> EventsBroker<B> {
    /// Broker reading every category.
    pub fn new(backend: B) -> Self {
        Self::with_categories(backend, &CategoryCode::ALL)
    }

    /// Broker whose timestamp-level batches union only `categories`.
    pub fn with_categories(backend: B, categories: &[CategoryCode]) -> Self {
        let mut categories = categories.to_vec();
        categories.sort();
        categories.dedup();
        Self {
            backend: Arc::new(backend),
            categories,
            batches: Mutex::new(Memo::default()),
            merged: Mutex::new(HashMap::new()),
            outline: Mutex::new(Memo::default()),
            span: tracing::info_span!("broker"),
        }
    }

    /// Attach the span fetches are logged under.
    pub fn with_span(mut self, span: tracing::Span) -> Self {
        self.span = span;
        self
    }

    pub fn categories(&self) -> &[CategoryCode] {
        &self.categories
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// True iff the timestamp-level batch is resolved.
    pub fn has(&self, timestamp: &Timestamp) -> bool {
        self.merged.lock().contains_key(timestamp)
    }

    /// True iff one category's file for `timestamp` is resolved.
    pub fn has_category(&self, timestamp: &Timestamp, category: CategoryCode) -> bool {
        self.batches
            .lock()
            .resolved
            .contains_key(&(timestamp.clone(), category))
    }

    /// The resolved timestamp-level batch. `None` until `has(timestamp)`.
    pub fn loaded_events(&self, timestamp: &Timestamp) -> Option<Batch> {
        self.merged.lock().get(timestamp).cloned()
    }

    /// Resolve the union of every configured category's file for `timestamp`.
    pub async fn load(&self, timestamp: &Timestamp) -> Result<Batch> {
        let cached = self.loaded_events(timestamp);
        if let Some(batch) = cached {
            return Ok(batch);
        }

        let parts = try_join_all(
            self.categories
                .iter()
                .map(|&category| self.load_category(timestamp, category)),
        )
        .await?;
        let union: Batch = parts.iter().flat_map(|part| part.iter().cloned()).collect();

        let mut merged = self.merged.lock();
        let batch = merged.entry(timestamp.clone()).or_insert(union);
        tracing::info!(%timestamp, events = batch.len(), "batch resolved");
        Ok(batch.clone())
    }

    /// Resolve one category's file for `timestamp`.
    pub async fn load_category(&self, timestamp: &Timestamp, category: CategoryCode) -> Result<Batch> {
        let key = (timestamp.clone(), category);
        memoized(&self.batches, key, || {
            let path = event_batch_path(timestamp, category);
            let backend = Arc::clone(&self.backend);
            async move {
                tracing::info!(%path, "fetching event batch");
                let value = backend.fetch(&path).await?;
                let records: Vec<EventRecord> =
                    serde_json::from_value(value).map_err(|e| StoreError::Decode {
                        path,
                        source: e.into(),
                    })?;
                Ok::<_, StoreError>(Batch::from(records))
            }
            .instrument(self.span.clone())
            .boxed()
        })
        .await
    }

    /// Fetch the world outline once; every later call shares the result.
    pub async fn load_map_outline(&self) -> Result<Arc<MapOutline>> {
        memoized(&self.outline, (), || {
            let backend = Arc::clone(&self.backend);
            async move {
                let path = map_outline_path();
                tracing::info!(%path, "fetching map outline");
                let value = backend.fetch(path).await?;
                Ok::<_, StoreError>(Arc::new(MapOutline::from_geojson(value)))
            }
            .instrument(self.span.clone())
            .boxed()
        })
        .await
    }
}

impl<B: StorageBackend> BatchSource for EventsBroker<B> {
    type Error = StoreError;

    fn has(&self, timestamp: &Timestamp) -> bool {
        EventsBroker::has(self, timestamp)
    }

    fn loaded_events(&self, timestamp: &Timestamp) -> Option<Batch> {
        EventsBroker::loaded_events(self, timestamp)
    }

    fn load(&self, timestamp: &Timestamp) -> impl Future<Output = Result<Batch>> + Send {
        EventsBroker::load(self, timestamp)
    }
}
