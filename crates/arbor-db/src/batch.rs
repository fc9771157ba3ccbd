//! Generic keyed batch cache.
//!
//! Turns N near-simultaneous point lookups into one batched fetch,
//! memoizes per key for a short TTL, and returns results in the same
//! order as requested, defaulting missing keys to a caller-supplied
//! empty value. Every specific loader (stage, categories-by-article) is
//! a thin configuration of this primitive.
//!
//! The cache is explicitly not transactional: writers going through the
//! repositories must assume stale entries may linger up to the TTL and
//! must not rely on read-your-write consistency through the loader.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::hash::Hash;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error};
use uuid::Uuid;

use arbor_core::{Error, Result};

/// Default time-to-live for cached entries.
pub const DEFAULT_TTL: Duration = Duration::from_secs(30);

/// Default maximum number of cached entries.
pub const DEFAULT_MAX_ENTRIES: usize = 1024;

/// Default time the dispatcher waits to collect one batch of keys.
pub const DEFAULT_BATCH_WINDOW: Duration = Duration::from_millis(1);

/// Batch function: receives the distinct pending keys, returns the values
/// found in the backing store. Keys absent from the returned map resolve
/// to the cache's configured default.
pub type BatchFn<K, V> =
    Arc<dyn Fn(Vec<K>) -> BoxFuture<'static, Result<HashMap<K, V>>> + Send + Sync>;

/// Cache sizing and timing policy.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    /// Fixed TTL from insertion; reads do not push expiry back.
    pub ttl: Duration,
    /// Entry cap; least-recently-used entries are evicted beyond it.
    pub max_entries: usize,
    /// How long a dispatch waits to coalesce concurrently requested keys.
    pub batch_window: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            max_entries: DEFAULT_MAX_ENTRIES,
            batch_window: DEFAULT_BATCH_WINDOW,
        }
    }
}

enum BatchOutcome<K, V> {
    Pending,
    Ready(Arc<HashMap<K, V>>),
    /// A failed fetch fails every pending key in the window uniformly.
    Failed(Arc<str>),
}

impl<K, V> Clone for BatchOutcome<K, V> {
    fn clone(&self) -> Self {
        match self {
            BatchOutcome::Pending => BatchOutcome::Pending,
            BatchOutcome::Ready(map) => BatchOutcome::Ready(Arc::clone(map)),
            BatchOutcome::Failed(msg) => BatchOutcome::Failed(Arc::clone(msg)),
        }
    }
}

struct PendingBatch<K, V> {
    keys: Vec<K>,
    keyset: HashSet<K>,
    rx: watch::Receiver<BatchOutcome<K, V>>,
}

struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    last_access: u64,
}

struct State<K, V> {
    pending: Option<PendingBatch<K, V>>,
    cache: HashMap<K, CacheEntry<V>>,
    access_counter: u64,
}

struct Inner<K, V> {
    batch_fn: BatchFn<K, V>,
    default: V,
    policy: CachePolicy,
    state: Mutex<State<K, V>>,
}

/// Request-scoped batching + memoization primitive.
///
/// `load`/`load_many` calls landing within one batch window share a
/// single underlying fetch; all waiters observe the same outcome.
pub struct KeyedBatchCache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for KeyedBatchCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> KeyedBatchCache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Create a cache over `batch_fn` with the given policy. `default` is
    /// the value substituted for keys the batch function did not return.
    pub fn new(policy: CachePolicy, default: V, batch_fn: BatchFn<K, V>) -> Self {
        Self {
            inner: Arc::new(Inner {
                batch_fn,
                default,
                policy,
                state: Mutex::new(State {
                    pending: None,
                    cache: HashMap::new(),
                    access_counter: 0,
                }),
            }),
        }
    }

    /// Load one key.
    pub async fn load(&self, key: K) -> Result<V> {
        let mut values = self.load_many(vec![key]).await?;
        // load_many returns exactly one value per input key
        Ok(values.pop().expect("load_many returned empty for one key"))
    }

    /// Load many keys, preserving input order exactly — duplicates and
    /// defaulted misses included.
    pub async fn load_many(&self, keys: Vec<K>) -> Result<Vec<V>> {
        let (hits, rx) = {
            let mut state = self.inner.state.lock().expect("batch cache lock poisoned");
            let now = Instant::now();
            let mut hits: HashMap<K, V> = HashMap::new();
            let mut misses: Vec<K> = Vec::new();

            for key in &keys {
                if hits.contains_key(key) || misses.contains(key) {
                    continue;
                }
                let live = match state.cache.get(key) {
                    Some(entry) => {
                        if now.duration_since(entry.inserted_at) < self.inner.policy.ttl {
                            Some(entry.value.clone())
                        } else {
                            None
                        }
                    }
                    None => {
                        misses.push(key.clone());
                        continue;
                    }
                };
                match live {
                    Some(value) => {
                        state.access_counter += 1;
                        let counter = state.access_counter;
                        if let Some(entry) = state.cache.get_mut(key) {
                            entry.last_access = counter;
                        }
                        hits.insert(key.clone(), value);
                    }
                    None => {
                        // Expired; drop and refetch.
                        state.cache.remove(key);
                        misses.push(key.clone());
                    }
                }
            }

            let rx = if misses.is_empty() {
                None
            } else {
                Some(self.join_batch(&mut state, misses))
            };
            (hits, rx)
        };

        let fetched = match rx {
            Some(rx) => Some(self.await_outcome(rx).await?),
            None => None,
        };

        let mut values = Vec::with_capacity(keys.len());
        for key in &keys {
            if let Some(value) = hits.get(key) {
                values.push(value.clone());
            } else {
                let value = fetched
                    .as_ref()
                    .and_then(|map| map.get(key))
                    .cloned()
                    .unwrap_or_else(|| self.inner.default.clone());
                values.push(value);
            }
        }
        Ok(values)
    }

    /// Register misses with the current batch, creating (and scheduling)
    /// one if none is pending. Called under the state lock.
    fn join_batch(
        &self,
        state: &mut State<K, V>,
        misses: Vec<K>,
    ) -> watch::Receiver<BatchOutcome<K, V>> {
        if state.pending.is_none() {
            let (tx, rx) = watch::channel(BatchOutcome::Pending);
            state.pending = Some(PendingBatch {
                keys: Vec::new(),
                keyset: HashSet::new(),
                rx,
            });

            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                tokio::time::sleep(inner.policy.batch_window).await;
                dispatch_batch(inner, tx).await;
            });
        }

        let batch = state.pending.as_mut().expect("pending batch just ensured");
        for key in misses {
            if batch.keyset.insert(key.clone()) {
                batch.keys.push(key);
            }
        }
        batch.rx.clone()
    }

    async fn await_outcome(
        &self,
        mut rx: watch::Receiver<BatchOutcome<K, V>>,
    ) -> Result<Arc<HashMap<K, V>>> {
        loop {
            let snapshot = rx.borrow_and_update().clone();
            match snapshot {
                BatchOutcome::Ready(map) => return Ok(map),
                BatchOutcome::Failed(msg) => return Err(Error::Batch(msg.to_string())),
                BatchOutcome::Pending => {
                    if rx.changed().await.is_err()
                        && matches!(&*rx.borrow(), BatchOutcome::Pending)
                    {
                        return Err(Error::Batch("batch dispatcher terminated".to_string()));
                    }
                }
            }
        }
    }
}

/// Take the pending batch, run the batch function over its distinct keys,
/// fill misses with the default, cache everything, and fan the outcome
/// out to every waiter.
async fn dispatch_batch<K, V>(inner: Arc<Inner<K, V>>, tx: watch::Sender<BatchOutcome<K, V>>)
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    let keys = {
        let mut state = inner.state.lock().expect("batch cache lock poisoned");
        match state.pending.take() {
            Some(batch) => batch.keys,
            None => return,
        }
    };
    if keys.is_empty() {
        return;
    }

    debug!(
        component = "batch_cache",
        op = "dispatch_batch",
        batch_size = keys.len(),
        "dispatching batch fetch"
    );

    match (inner.batch_fn)(keys.clone()).await {
        Ok(mut found) => {
            let mut results = HashMap::with_capacity(keys.len());
            for key in keys {
                let value = found
                    .remove(&key)
                    .unwrap_or_else(|| inner.default.clone());
                results.insert(key, value);
            }

            {
                let mut state = inner.state.lock().expect("batch cache lock poisoned");
                let now = Instant::now();
                for (key, value) in &results {
                    state.access_counter += 1;
                    let counter = state.access_counter;
                    state.cache.insert(
                        key.clone(),
                        CacheEntry {
                            value: value.clone(),
                            inserted_at: now,
                            last_access: counter,
                        },
                    );
                }
                evict_lru(&mut state, inner.policy.max_entries);
            }

            let _ = tx.send(BatchOutcome::Ready(Arc::new(results)));
        }
        Err(e) => {
            error!(
                component = "batch_cache",
                op = "dispatch_batch",
                error = %e,
                "batch fetch failed; failing all pending keys"
            );
            let _ = tx.send(BatchOutcome::Failed(Arc::from(e.to_string())));
        }
    }
}

fn evict_lru<K, V>(state: &mut State<K, V>, max_entries: usize)
where
    K: Clone + Eq + Hash,
{
    while state.cache.len() > max_entries {
        let Some(lru_key) = state
            .cache
            .iter()
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(key, _)| key.clone())
        else {
            break;
        };
        state.cache.remove(&lru_key);
    }
}

// =============================================================================
// COMPOSITE KEY CODEC
// =============================================================================

/// Composite `(article_id, version)` key with a validated string form
/// (`"<uuid>|<version>"`) for boundaries that key by string.
///
/// Decoding fails fast on a malformed raw key instead of silently
/// mis-parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VersionKey {
    pub article_id: Uuid,
    pub version: i32,
}

impl VersionKey {
    pub fn new(article_id: Uuid, version: i32) -> Self {
        Self {
            article_id,
            version,
        }
    }
}

impl fmt::Display for VersionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.article_id, self.version)
    }
}

impl FromStr for VersionKey {
    type Err = Error;

    fn from_str(raw: &str) -> Result<Self> {
        let Some((id_part, version_part)) = raw.split_once('|') else {
            return Err(Error::MalformedKey(raw.to_string()));
        };
        let article_id =
            Uuid::parse_str(id_part).map_err(|_| Error::MalformedKey(raw.to_string()))?;
        let version: i32 = version_part
            .parse()
            .map_err(|_| Error::MalformedKey(raw.to_string()))?;
        if version < 0 {
            return Err(Error::MalformedKey(raw.to_string()));
        }
        Ok(Self {
            article_id,
            version,
        })
    }
}
