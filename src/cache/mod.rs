//! Keyed cache of query results.
//!
//! One [`QueryCache`] is created at startup and handed to whatever needs it;
//! clones share the same entries. For every key the cache guarantees a single
//! in-flight fetch: concurrent callers join the running fetch and resolve with
//! the same outcome. Successful results are served until they go stale
//! (explicit invalidation or the staleness window) and failed fetches keep the
//! last good data next to the error.
//!
//! Fetches run as spawned tasks, so a caller that stops waiting never cancels
//! the remote call; the result still lands in the cache.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::errors::ServiceError;
use crate::filters::QueryKey;

const DEFAULT_STALE_AFTER_SECS: u64 = 300;
const DEFAULT_RETRY_ATTEMPTS: u32 = 1;
const DEFAULT_EVENT_CAPACITY: usize = 256;
const DEFAULT_GC_AFTER_SECS: u64 = 300;

/// Cache configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryCacheConfig {
    /// Seconds a successful result is served without refetching
    pub stale_after_secs: u64,
    /// Automatic retries per explicit fetch before the error is surfaced
    pub retry_attempts: u32,
    /// Buffered change notifications per subscriber
    pub event_capacity: usize,
    /// Seconds an unused, stale entry is kept before it is dropped
    pub gc_after_secs: u64,
}

impl Default for QueryCacheConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: DEFAULT_STALE_AFTER_SECS,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            gc_after_secs: DEFAULT_GC_AFTER_SECS,
        }
    }
}

impl QueryCacheConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn gc_after(&self) -> Duration {
        Duration::from_secs(self.gc_after_secs)
    }
}

/// Data from one successful fetch.
#[derive(Debug)]
pub struct Snapshot<V> {
    pub data: Arc<V>,
    pub fetched_at: DateTime<Utc>,
}

impl<V> Clone for Snapshot<V> {
    fn clone(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            fetched_at: self.fetched_at,
        }
    }
}

/// Observable state of one key.
#[derive(Debug)]
pub enum QueryState<V> {
    Pending { previous: Option<Snapshot<V>> },
    Success(Snapshot<V>),
    Error {
        error: ServiceError,
        previous: Option<Snapshot<V>>,
    },
}

impl<V> Clone for QueryState<V> {
    fn clone(&self) -> Self {
        match self {
            QueryState::Pending { previous } => QueryState::Pending {
                previous: previous.clone(),
            },
            QueryState::Success(snapshot) => QueryState::Success(snapshot.clone()),
            QueryState::Error { error, previous } => QueryState::Error {
                error: error.clone(),
                previous: previous.clone(),
            },
        }
    }
}

impl<V> QueryState<V> {
    /// Most recent successful data, if any.
    pub fn last_success(&self) -> Option<&Snapshot<V>> {
        match self {
            QueryState::Success(snapshot) => Some(snapshot),
            QueryState::Pending { previous } | QueryState::Error { previous, .. } => {
                previous.as_ref()
            }
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, QueryState::Pending { .. })
    }

    pub fn error(&self) -> Option<&ServiceError> {
        match self {
            QueryState::Error { error, .. } => Some(error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEventKind {
    Pending,
    Updated,
    Failed,
    Invalidated,
}

/// Change notification for one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEvent {
    pub key: QueryKey,
    pub kind: CacheEventKind,
}

struct Entry<V> {
    state: QueryState<V>,
    fetched: Option<Instant>,
    last_used: Instant,
    stale: bool,
    /// Bumped by every invalidation
    generation: u64,
    /// Generation of the most recently started fetch; only that fetch may
    /// write the entry
    started: u64,
}

impl<V> Entry<V> {
    fn new() -> Self {
        Self {
            state: QueryState::Pending { previous: None },
            fetched: None,
            last_used: Instant::now(),
            stale: true,
            generation: 0,
            started: 0,
        }
    }
}

struct InFlight<V> {
    generation: u64,
    fetch: SharedFetch<V>,
}

type FetchOutcome<V> = Result<Snapshot<V>, ServiceError>;
type SharedFetch<V> = Shared<BoxFuture<'static, FetchOutcome<V>>>;

struct Inner<V> {
    stale_after: Duration,
    retry_attempts: u32,
    entries: RwLock<HashMap<QueryKey, Entry<V>>>,
    gc_after: Duration,
    in_flight: Mutex<HashMap<QueryKey, InFlight<V>>>,
    events: broadcast::Sender<CacheEvent>,
}

pub struct QueryCache<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for QueryCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    /// Entries whose next read goes to the store
    pub stale: usize,
    pub in_flight: usize,
}

impl<V> fmt::Debug for QueryCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryCache")
            .field("stale_after", &self.inner.stale_after)
            .field("retry_attempts", &self.inner.retry_attempts)
            .finish_non_exhaustive()
    }
}

impl<V> Default for QueryCache<V>
where
    V: Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(&QueryCacheConfig::default())
    }
}

impl<V> QueryCache<V>
where
    V: Send + Sync + 'static,
{
    pub fn new(config: &QueryCacheConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            inner: Arc::new(Inner {
                stale_after: config.stale_after(),
                retry_attempts: config.retry_attempts,
                gc_after: config.gc_after(),
                entries: RwLock::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
                events,
            }),
        }
    }

    /// Returns fresh cached data for `key`, or runs `fetcher` (joining a fetch
    /// already in flight for the same key).
    pub async fn fetch<F, Fut>(&self, key: QueryKey, fetcher: F) -> FetchOutcome<V>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, ServiceError>> + Send + 'static,
    {
        self.collect_garbage();
        self.touch(&key);
        if let Some(snapshot) = self.fresh(&key) {
            debug!(%key, "query cache hit");
            return Ok(snapshot);
        }
        debug!(%key, "query cache miss");
        self.join_or_start(key, fetcher).await
    }

    /// Fetches regardless of staleness. On failure the previous data stays in
    /// place and the entry is marked as errored.
    pub async fn refetch<F, Fut>(&self, key: QueryKey, fetcher: F) -> FetchOutcome<V>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, ServiceError>> + Send + 'static,
    {
        debug!(%key, "manual refetch");
        self.touch(&key);
        self.join_or_start(key, fetcher).await
    }

    /// Current state of `key`, if it was ever requested.
    pub fn state(&self, key: &QueryKey) -> Option<QueryState<V>> {
        self.inner
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(|entry| entry.state.clone())
    }

    /// Whether the next `fetch` of `key` goes to the store.
    pub fn is_stale(&self, key: &QueryKey) -> bool {
        self.fresh(key).is_none()
    }

    pub fn is_fetching(&self, key: &QueryKey) -> bool {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Entry counts, for health reporting.
    pub fn stats(&self) -> CacheStats {
        self.collect_garbage();
        let (entries, stale) = {
            let entries = self
                .inner
                .entries
                .read()
                .unwrap_or_else(PoisonError::into_inner);
            let stale = entries.values().filter(|e| !self.is_fresh_entry(e)).count();
            (entries.len(), stale)
        };
        let in_flight = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        CacheStats {
            entries,
            stale,
            in_flight,
        }
    }

    pub fn invalidate_key(&self, key: &QueryKey) {
        self.invalidate_where(|candidate| candidate == key);
    }

    /// Marks every matching entry stale. Data stays readable through
    /// [`QueryCache::state`], but the next fetch goes to the store. Fetches
    /// already in flight are detached: later reads never join them.
    pub fn invalidate_where<P>(&self, predicate: P) -> usize
    where
        P: Fn(&QueryKey) -> bool,
    {
        let invalidated: Vec<QueryKey> = {
            let mut entries = self
                .inner
                .entries
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            entries
                .iter_mut()
                .filter(|(key, _)| predicate(key))
                .map(|(key, entry)| {
                    entry.stale = true;
                    entry.generation += 1;
                    key.clone()
                })
                .collect()
        };

        {
            // fetches already running belong to the old generation; the next
            // read starts its own
            let mut in_flight = self
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            for key in &invalidated {
                in_flight.remove(key);
            }
        }

        for key in &invalidated {
            debug!(%key, "query invalidated");
            self.emit(key, CacheEventKind::Invalidated);
        }
        invalidated.len()
    }

    /// Drops entries that are stale, not being fetched and unused for longer
    /// than the gc window. Returns how many were dropped.
    pub fn collect_garbage(&self) -> usize {
        // held throughout so no fetch can start on an entry being dropped
        let in_flight = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut entries = self
            .inner
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|key, entry| {
            in_flight.contains_key(key)
                || self.is_fresh_entry(entry)
                || entry.last_used.elapsed() < self.inner.gc_after
        });
        let dropped = before - entries.len();
        if dropped > 0 {
            debug!(dropped, "unused queries collected");
        }
        dropped
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
        self.inner.events.subscribe()
    }

    /// Change notifications for a single key.
    pub fn watch(&self, key: QueryKey) -> KeyWatch {
        KeyWatch {
            key,
            receiver: self.subscribe(),
        }
    }

    fn touch(&self, key: &QueryKey) {
        if let Some(entry) = self
            .inner
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(key)
        {
            entry.last_used = Instant::now();
        }
    }

    fn fresh(&self, key: &QueryKey) -> Option<Snapshot<V>> {
        let entries = self
            .inner
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let entry = entries.get(key)?;
        match &entry.state {
            QueryState::Success(snapshot) if self.is_fresh_entry(entry) => Some(snapshot.clone()),
            _ => None,
        }
    }

    fn is_fresh_entry(&self, entry: &Entry<V>) -> bool {
        matches!(entry.state, QueryState::Success(_))
            && !entry.stale
            && entry
                .fetched
                .is_some_and(|fetched| fetched.elapsed() < self.inner.stale_after)
    }

    async fn join_or_start<F, Fut>(&self, key: QueryKey, fetcher: F) -> FetchOutcome<V>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, ServiceError>> + Send + 'static,
    {
        let shared = {
            let mut in_flight = self
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            match in_flight.get(&key) {
                Some(running) => {
                    debug!(%key, "joining in-flight query");
                    running.fetch.clone()
                }
                None => {
                    let generation = self.inner.begin(&key);
                    let fetch = Inner::spawn_fetch(
                        Arc::clone(&self.inner),
                        key.clone(),
                        generation,
                        fetcher,
                    );
                    in_flight.insert(
                        key,
                        InFlight {
                            generation,
                            fetch: fetch.clone(),
                        },
                    );
                    fetch
                }
            }
        };
        shared.await
    }

    fn emit(&self, key: &QueryKey, kind: CacheEventKind) {
        self.inner.emit(key, kind);
    }
}

impl<V> Inner<V>
where
    V: Send + Sync + 'static,
{
    /// Moves the entry to pending and returns the generation the fetch
    /// belongs to.
    fn begin(&self, key: &QueryKey) -> u64 {
        let generation = {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            let entry = entries.entry(key.clone()).or_insert_with(Entry::new);
            let previous = entry.state.last_success().cloned();
            entry.state = QueryState::Pending { previous };
            entry.started = entry.generation;
            entry.last_used = Instant::now();
            entry.generation
        };
        self.emit(key, CacheEventKind::Pending);
        generation
    }

    fn spawn_fetch<F, Fut>(
        inner: Arc<Self>,
        key: QueryKey,
        generation: u64,
        fetcher: F,
    ) -> SharedFetch<V>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, ServiceError>> + Send + 'static,
    {
        let task_inner = Arc::clone(&inner);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let outcome = fetch_with_retry(&task_key, &fetcher, task_inner.retry_attempts).await;
            let result = task_inner.complete(&task_key, generation, outcome);
            task_inner.finish(&task_key, generation);
            result
        });

        async move {
            match handle.await {
                Ok(result) => result,
                Err(join_err) => {
                    let error = ServiceError::InternalError(format!(
                        "query task for {} failed: {}",
                        key, join_err
                    ));
                    let result = inner.complete(&key, generation, Err(error));
                    inner.finish(&key, generation);
                    result
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Records the outcome of a fetch. A success from an older generation is
    /// stored but stays stale, unless a newer fetch has started since or the
    /// entry was collected; then the outcome only goes back to the callers
    /// that awaited it.
    fn complete(
        &self,
        key: &QueryKey,
        generation: u64,
        outcome: Result<V, ServiceError>,
    ) -> FetchOutcome<V> {
        let (result, kind) = {
            let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
            let entry = match entries.get_mut(key) {
                Some(entry) if entry.started == generation => entry,
                _ => {
                    debug!(%key, generation, "superseded query result dropped");
                    return outcome.map(|value| Snapshot {
                        data: Arc::new(value),
                        fetched_at: Utc::now(),
                    });
                }
            };
            match outcome {
                Ok(value) => {
                    let snapshot = Snapshot {
                        data: Arc::new(value),
                        fetched_at: Utc::now(),
                    };
                    entry.state = QueryState::Success(snapshot.clone());
                    entry.fetched = Some(Instant::now());
                    entry.stale = entry.generation != generation;
                    (Ok(snapshot), CacheEventKind::Updated)
                }
                Err(error) => {
                    let previous = entry.state.last_success().cloned();
                    entry.state = QueryState::Error {
                        error: error.clone(),
                        previous,
                    };
                    (Err(error), CacheEventKind::Failed)
                }
            }
        };
        self.emit(key, kind);
        result
    }

    /// Forgets the in-flight fetch for `key` if it is still this one.
    fn finish(&self, key: &QueryKey, generation: u64) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if in_flight
            .get(key)
            .is_some_and(|running| running.generation == generation)
        {
            in_flight.remove(key);
        }
    }

    fn emit(&self, key: &QueryKey, kind: CacheEventKind) {
        // no subscribers is fine
        let _ = self.events.send(CacheEvent {
            key: key.clone(),
            kind,
        });
    }
}

async fn fetch_with_retry<V, F, Fut>(
    key: &QueryKey,
    fetcher: &F,
    retry_attempts: u32,
) -> Result<V, ServiceError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<V, ServiceError>>,
{
    let mut attempt = 0;
    loop {
        match fetcher().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < retry_attempts => {
                attempt += 1;
                warn!(%key, attempt, error = %err, "query failed, retrying");
            }
            Err(err) => {
                warn!(%key, error = %err, "query failed");
                return Err(err);
            }
        }
    }
}

/// Subscription filtered to one key.
#[derive(Debug)]
pub struct KeyWatch {
    key: QueryKey,
    receiver: broadcast::Receiver<CacheEvent>,
}

impl KeyWatch {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    /// Waits for the next change to the watched key. A lagging receiver may
    /// have missed events and reports an invalidation so the caller reloads.
    /// Returns `None` once the cache is gone.
    pub async fn changed(&mut self) -> Option<CacheEventKind> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.key == self.key => return Some(event.kind),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(key = %self.key, skipped, "cache watcher lagged");
                    return Some(CacheEventKind::Invalidated);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
