//! Query cache shared by tables and the containers that invalidate them.
//!
//! Entries are keyed by source key. All writes go through `load` and
//! `invalidate`. Concurrent loads of one key share a single loader call, and
//! an invalidation that lands while a load is in flight schedules exactly one
//! more load once it settles.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use procure_fields::{Loader, RemoteError, Value};
use tokio::sync::watch;
use tracing::{debug, warn};

/// Rows as loaded; shared, never mutated in place
pub type Rows = Arc<Vec<Value>>;

#[derive(Default)]
struct EntryState {
    rows: Option<Rows>,
    stale: bool,
    fetching: bool,
    invalidated_during_fetch: bool,
    error: Option<RemoteError>,
    fetch_count: u64,
}

struct Entry {
    state: Mutex<EntryState>,
    /// Bumped every time a fetch settles
    settled: watch::Sender<u64>,
}

impl Entry {
    fn new() -> Self {
        let (settled, _) = watch::channel(0);
        Self {
            state: Mutex::new(EntryState::default()),
            settled,
        }
    }

    fn state(&self) -> MutexGuard<'_, EntryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Cache of list results keyed by source key. Clones share the cache.
#[derive(Clone, Default)]
pub struct QueryCache {
    entries: Arc<Mutex<HashMap<String, Arc<Entry>>>>,
}

impl std::fmt::Debug for QueryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCache")
            .field("keys", &self.entries().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Arc<Entry>>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn entry(&self, key: &str) -> Arc<Entry> {
        Arc::clone(
            self.entries()
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(Entry::new())),
        )
    }

    fn existing(&self, key: &str) -> Option<Arc<Entry>> {
        self.entries().get(key).cloned()
    }

    /// Cached rows for `key`, fetching them first when missing or stale.
    ///
    /// When the fetch fails the error is returned; rows from an earlier
    /// successful fetch stay available through [`QueryCache::rows`].
    pub async fn load(&self, key: &str, loader: Arc<dyn Loader>) -> Result<Rows, RemoteError> {
        let entry = self.entry(key);
        {
            let mut state = entry.state();
            if !state.fetching {
                if let (Some(rows), false) = (&state.rows, state.stale) {
                    return Ok(Arc::clone(rows));
                }
                state.fetching = true;
                debug!(source_key = %key, "fetching");
                tokio::spawn(fetch(Arc::clone(&entry), loader, key.to_string()));
            }
        }

        let mut settled = entry.settled.subscribe();
        loop {
            {
                let state = entry.state();
                if !state.fetching {
                    return match (&state.error, &state.rows) {
                        (Some(error), _) => Err(error.clone()),
                        (None, Some(rows)) => Ok(Arc::clone(rows)),
                        (None, None) => Ok(Arc::new(Vec::new())),
                    };
                }
            }
            if settled.changed().await.is_err() {
                return Err(RemoteError::cancelled());
            }
        }
    }

    /// Force the next `load` of `key` to call the loader. An invalidation
    /// during a fetch triggers one more fetch after it settles.
    pub fn invalidate(&self, key: &str) {
        let Some(entry) = self.existing(key) else {
            debug!(source_key = %key, "invalidate: nothing cached");
            return;
        };
        let mut state = entry.state();
        if state.fetching {
            state.invalidated_during_fetch = true;
        } else {
            state.stale = true;
        }
        debug!(source_key = %key, in_flight = state.fetching, "invalidated");
    }

    /// Invalidate then load
    pub async fn refetch(&self, key: &str, loader: Arc<dyn Loader>) -> Result<Rows, RemoteError> {
        self.invalidate(key);
        self.load(key, loader).await
    }

    /// Whatever rows are cached, fresh or not
    pub fn rows(&self, key: &str) -> Option<Rows> {
        self.existing(key)?.state().rows.clone()
    }

    pub fn is_stale(&self, key: &str) -> bool {
        self.existing(key).is_none_or(|entry| {
            let state = entry.state();
            state.stale || state.rows.is_none()
        })
    }

    pub fn is_fetching(&self, key: &str) -> bool {
        self.existing(key).is_some_and(|entry| entry.state().fetching)
    }

    /// Error of the last settled fetch, cleared by the next success
    pub fn error(&self, key: &str) -> Option<RemoteError> {
        self.existing(key)?.state().error.clone()
    }

    /// Number of loader calls that have completed for `key`
    pub fn fetch_count(&self, key: &str) -> u64 {
        self.existing(key).map_or(0, |entry| entry.state().fetch_count)
    }
}

async fn fetch(entry: Arc<Entry>, loader: Arc<dyn Loader>, key: String) {
    loop {
        let result = loader.load().await;

        let mut state = entry.state();
        state.fetch_count += 1;
        match result {
            Ok(rows) => {
                debug!(source_key = %key, rows = rows.len(), "fetched");
                state.rows = Some(Arc::new(rows));
                state.stale = false;
                state.error = None;
            }
            Err(error) => {
                warn!(source_key = %key, %error, "fetch failed");
                state.stale = true;
                state.error = Some(error);
            }
        }
        if state.invalidated_during_fetch {
            // the rows may predate the mutation that invalidated them
            state.invalidated_during_fetch = false;
            state.stale = true;
            debug!(source_key = %key, "invalidated while fetching; fetching again");
            continue;
        }
        state.fetching = false;
        drop(state);

        entry.settled.send_modify(|version| *version += 1);
        return;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procure_fields::loader_fn;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Returns `[{n: call number}]`, taking 100ms per call
    fn numbered(calls: Arc<AtomicUsize>) -> Arc<dyn Loader> {
        loader_fn(move || {
            let calls = Arc::clone(&calls);
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(Duration::from_millis(100)).await;
                Ok(vec![json!({ "n": n })])
            }
        })
    }

    #[tokio::test(start_paused = true)]
    async fn second_load_hits_cache() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = QueryCache::new();
        let loader = numbered(Arc::clone(&calls));

        let first = cache.load("orders", Arc::clone(&loader)).await.unwrap();
        let second = cache.load("orders", loader).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!cache.is_stale("orders"));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_loads_share_one_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = QueryCache::new();
        let loader = numbered(Arc::clone(&calls));

        let (a, b) = tokio::join!(
            cache.load("orders", Arc::clone(&loader)),
            cache.load("orders", Arc::clone(&loader))
        );
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn invalidate_forces_refetch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = QueryCache::new();
        let loader = numbered(Arc::clone(&calls));

        cache.load("orders", Arc::clone(&loader)).await.unwrap();
        cache.invalidate("orders");
        assert!(cache.is_stale("orders"));
        let rows = cache.load("orders", loader).await.unwrap();
        assert_eq!(*rows, vec![json!({"n": 2})]);
    }

    #[test_log::test(tokio::test(start_paused = true))]
    async fn invalidations_during_fetch_collapse_into_one_more_fetch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cache = QueryCache::new();
        let loader = numbered(Arc::clone(&calls));

        let pending = tokio::spawn({
            let cache = cache.clone();
            let loader = Arc::clone(&loader);
            async move { cache.load("orders", loader).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(cache.is_fetching("orders"));
        cache.invalidate("orders");
        cache.invalidate("orders");
        cache.invalidate("orders");

        let rows = pending.await.unwrap().unwrap();
        assert_eq!(*rows, vec![json!({"n": 2})]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.fetch_count("orders"), 2);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_fetch_keeps_old_rows() {
        let fail = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let flag = Arc::clone(&fail);
        let loader = loader_fn(move || {
            let fail = flag.load(Ordering::SeqCst);
            async move {
                if fail {
                    Err(RemoteError::message("backend down"))
                } else {
                    Ok(vec![json!({"id": 1})])
                }
            }
        });
        let cache = QueryCache::new();
        cache.load("orders", Arc::clone(&loader)).await.unwrap();

        fail.store(true, Ordering::SeqCst);
        let err = cache.refetch("orders", Arc::clone(&loader)).await.unwrap_err();
        assert_eq!(err.user_message(""), "backend down");
        assert_eq!(cache.rows("orders").unwrap().len(), 1);
        assert!(cache.error("orders").is_some());

        fail.store(false, Ordering::SeqCst);
        cache.load("orders", loader).await.unwrap();
        assert!(cache.error("orders").is_none());
    }

    #[test]
    fn invalidating_unknown_key_is_harmless() {
        let cache = QueryCache::new();
        cache.invalidate("nothing");
        assert!(cache.is_stale("nothing"));
        assert_eq!(cache.fetch_count("nothing"), 0);
    }
}
