use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cached::{Cached, SizedCache};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::key::{Family, QueryKey, Scope};
use crate::api::ApiError;
use crate::config::CacheConfig;
use crate::session::SessionStore;
use crate::utils::log_throttle::LogThrottle;

const CACHE_HIT_LOG_WINDOW: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
struct CacheEntry {
    data: Value,
    fetched_at: Instant,
    stale: bool,
}

struct CacheState {
    entries: SizedCache<QueryKey, CacheEntry>,
    /// Bumped by every invalidation or eviction.
    epoch: u64,
    /// Fetches that have started but not stored their result yet.
    in_flight: usize,
    /// Latest epoch at which a whole scope was invalidated.
    scope_invalidated: HashMap<(Family, Scope), u64>,
    /// Latest epoch at which a single key was invalidated or evicted.
    key_invalidated: HashMap<QueryKey, u64>,
    /// Latest epoch at which the whole cache was cleared.
    cleared: u64,
    /// Uid of the user whose data the entries belong to.
    owner: Option<String>,
}

impl CacheState {
    fn invalidated_since(&self, key: &QueryKey, epoch: u64) -> bool {
        let scope = self
            .scope_invalidated
            .get(&(key.family, key.scope))
            .copied()
            .unwrap_or(0);
        let single = self.key_invalidated.get(key).copied().unwrap_or(0);
        scope.max(single).max(self.cleared) > epoch
    }

    fn clear(&mut self) {
        self.entries.cache_clear();
        self.epoch += 1;
        self.cleared = self.epoch;
    }
}

/// Client-side cache of query results shared by all resource families.
///
/// Reads go through [`CachePartition::fetch`]; a result is served from cache
/// while it is younger than the stale time and has not been invalidated.
/// Invalidation marks entries stale, eviction removes them. A fetch that was
/// already in flight when its key got invalidated still stores its result,
/// but stores it stale so the next read goes back to the network.
///
/// A cache bound to a [`SessionStore`] only ever holds one user's data: it
/// empties itself as soon as the signed-in uid differs from the one its
/// entries were fetched for, and drops results of fetches started by a
/// previous user.
#[derive(Clone)]
pub struct QueryCache {
    state: Arc<Mutex<CacheState>>,
    stale_time: Duration,
    hit_log: Arc<LogThrottle>,
    session: Option<SessionStore>,
}

impl QueryCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState {
                entries: SizedCache::with_size(config.capacity.max(1)),
                epoch: 0,
                in_flight: 0,
                scope_invalidated: HashMap::new(),
                key_invalidated: HashMap::new(),
                cleared: 0,
                owner: None,
            })),
            stale_time: Duration::from_millis(config.stale_time_in_ms),
            hit_log: Arc::new(LogThrottle::new(CACHE_HIT_LOG_WINDOW)),
            session: None,
        }
    }

    /// Tie the cached data to whoever is signed in on `session`.
    pub fn bound_to(mut self, session: SessionStore) -> Self {
        self.state.lock().expect("query cache mutex poisoned").owner =
            session.user().map(|u| u.uid);
        self.session = Some(session);
        self
    }

    /// Handle through which one family reads and writes its own entries.
    pub fn partition(&self, family: Family) -> CachePartition {
        CachePartition {
            cache: self.clone(),
            family,
        }
    }

    /// Drop every entry, e.g. when the user signs out.
    pub fn clear(&self) {
        self.lock().clear();
        debug!("Query cache cleared");
    }

    pub fn len(&self) -> usize {
        self.lock().entries.cache_size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().expect("query cache mutex poisoned")
    }

    /// Lock the state, first clearing it if the signed-in user changed.
    fn lock_for_current_user(&self) -> std::sync::MutexGuard<'_, CacheState> {
        let mut state = self.lock();
        if let Some(session) = &self.session {
            let uid = session.user().map(|u| u.uid);
            if state.owner != uid {
                debug!(
                    "Signed-in user changed from {:?} to {:?}; clearing query cache",
                    state.owner, uid
                );
                state.clear();
                state.owner = uid;
            }
        }
        state
    }

    fn lookup(&self, key: &QueryKey) -> Option<Value> {
        let mut state = self.lock_for_current_user();
        let stale_time = self.stale_time;
        let fresh = state
            .entries
            .cache_get(key)
            .filter(|entry| !entry.stale && entry.fetched_at.elapsed() < stale_time)
            .map(|entry| entry.data.clone());
        fresh
    }

    fn begin_fetch(&self) -> FetchGuard {
        let mut state = self.lock_for_current_user();
        state.in_flight += 1;
        FetchGuard {
            cache: self.clone(),
            started_at_epoch: state.epoch,
            owner: state.owner.clone(),
        }
    }
}

/// Tracks one in-flight fetch; once none are left the invalidation history
/// is no longer needed and is dropped.
struct FetchGuard {
    cache: QueryCache,
    started_at_epoch: u64,
    owner: Option<String>,
}

impl FetchGuard {
    fn store(&self, key: QueryKey, data: Value) {
        let mut state = self.cache.lock_for_current_user();
        if state.owner != self.owner {
            debug!("Dropping result for '{}' fetched for a previous user", key);
            return;
        }
        let stale = state.invalidated_since(&key, self.started_at_epoch);
        if stale {
            debug!("Result for '{}' was invalidated while in flight", key);
        }
        state.entries.cache_set(
            key,
            CacheEntry {
                data,
                fetched_at: Instant::now(),
                stale,
            },
        );
    }
}

impl Drop for FetchGuard {
    fn drop(&mut self) {
        let mut state = self.cache.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
        if state.in_flight == 0 {
            state.scope_invalidated.clear();
            state.key_invalidated.clear();
            state.cleared = 0;
        }
    }
}

/// One family's view of the [`QueryCache`]. It can only build keys of its
/// own family, so families never write each other's entries.
#[derive(Clone)]
pub struct CachePartition {
    cache: QueryCache,
    family: Family,
}

impl CachePartition {
    pub fn family(&self) -> Family {
        self.family
    }

    pub fn key(&self, scope: Scope, params: &str) -> QueryKey {
        QueryKey::new(self.family, scope, params)
    }

    /// Serve `(scope, params)` from cache when fresh, otherwise run `fetcher`
    /// and store its result. Fetch errors leave the cache untouched.
    pub async fn fetch<T, F, Fut>(&self, scope: Scope, params: &str, fetcher: F) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, ApiError>>,
    {
        let key = self.key(scope, params);
        if let Some(data) = self.cache.lookup(&key) {
            if let Some(suppressed_count) = self.cache.hit_log.should_emit(self.family.as_str()) {
                debug!(
                    event_name = "cache.hit",
                    event_domain = "cache",
                    key = %key,
                    suppressed_count,
                    "query served from cache"
                );
            }
            return serde_json::from_value(data).map_err(|e| ApiError::Decode(e.to_string()));
        }

        debug!("Cache miss for '{}'", key);
        let guard = self.cache.begin_fetch();
        let data = fetcher().await?;
        guard.store(key, data.clone());
        drop(guard);
        serde_json::from_value(data).map_err(|e| ApiError::Decode(e.to_string()))
    }

    /// Mark every entry of `scope` stale (all pagination variants for lists).
    pub fn invalidate_scope(&self, scope: Scope) {
        let mut state = self.cache.lock();
        state.epoch += 1;
        let epoch = state.epoch;
        state.scope_invalidated.insert((self.family, scope), epoch);

        let keys: Vec<QueryKey> = state
            .entries
            .key_order()
            .filter(|k| k.matches(self.family, scope))
            .cloned()
            .collect();
        for key in &keys {
            if let Some(entry) = state.entries.cache_get_mut(key) {
                entry.stale = true;
            }
        }
        debug!(
            "Invalidated {} '{}/{}' entries",
            keys.len(),
            self.family.as_str(),
            scope.as_str()
        );
    }

    /// Mark a single entry stale.
    pub fn invalidate(&self, scope: Scope, params: &str) {
        let key = self.key(scope, params);
        let mut state = self.cache.lock();
        state.epoch += 1;
        let epoch = state.epoch;
        if let Some(entry) = state.entries.cache_get_mut(&key) {
            entry.stale = true;
        }
        debug!("Invalidated '{}'", key);
        state.key_invalidated.insert(key, epoch);
    }

    /// Remove a single entry outright.
    pub fn evict(&self, scope: Scope, params: &str) {
        let key = self.key(scope, params);
        let mut state = self.cache.lock();
        state.epoch += 1;
        let epoch = state.epoch;
        state.entries.cache_remove(&key);
        debug!("Evicted '{}'", key);
        state.key_invalidated.insert(key, epoch);
    }

    /// Whether an entry exists at all, fresh or stale.
    pub fn contains(&self, scope: Scope, params: &str) -> bool {
        let key = self.key(scope, params);
        self.cache.lock().entries.key_order().any(|k| *k == key)
    }

    /// Whether a read of this entry would be served from cache.
    pub fn is_fresh(&self, scope: Scope, params: &str) -> bool {
        self.cache.lookup(&self.key(scope, params)).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{IdentityProvider, StaticProvider, StaticProviderConfig};
    use crate::models::User;
    use crate::session::AuthSynchronizer;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cache(capacity: usize, stale_time_in_ms: u64) -> QueryCache {
        QueryCache::new(&CacheConfig {
            capacity,
            stale_time_in_ms,
        })
    }

    async fn read(
        partition: &CachePartition,
        scope: Scope,
        params: &str,
        calls: &AtomicUsize,
        value: Value,
    ) -> Value {
        partition
            .fetch(scope, params, move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(value)
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_fresh_entry_is_served_from_cache() {
        let partition = cache(16, 60_000).partition(Family::Exercises);
        let calls = AtomicUsize::new(0);
        read(&partition, Scope::Detail, "e1", &calls, json!({"id": "e1"})).await;
        let second = read(&partition, Scope::Detail, "e1", &calls, json!({"id": "other"})).await;
        assert_eq!(second, json!({"id": "e1"}));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_stale_time_always_refetches() {
        let partition = cache(16, 0).partition(Family::Exercises);
        let calls = AtomicUsize::new(0);
        read(&partition, Scope::List, "", &calls, json!([])).await;
        read(&partition, Scope::List, "", &calls, json!([])).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_scope_hits_every_list_variant_only() {
        let partition = cache(16, 60_000).partition(Family::TrainingSessions);
        let calls = AtomicUsize::new(0);
        read(&partition, Scope::List, "offset=0", &calls, json!(0)).await;
        read(&partition, Scope::List, "offset=20", &calls, json!(20)).await;
        read(&partition, Scope::Detail, "s1", &calls, json!("s1")).await;

        partition.invalidate_scope(Scope::List);
        assert!(!partition.is_fresh(Scope::List, "offset=0"));
        assert!(!partition.is_fresh(Scope::List, "offset=20"));
        assert!(partition.contains(Scope::List, "offset=0"));
        assert!(partition.is_fresh(Scope::Detail, "s1"));
    }

    #[tokio::test]
    async fn test_evict_removes_entry() {
        let partition = cache(16, 60_000).partition(Family::TrainingSessions);
        let calls = AtomicUsize::new(0);
        read(&partition, Scope::Detail, "s2", &calls, json!("s2")).await;
        partition.evict(Scope::Detail, "s2");
        assert!(!partition.contains(Scope::Detail, "s2"));
        read(&partition, Scope::Detail, "s2", &calls, json!("s2")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_partitions_do_not_touch_each_other() {
        let cache = cache(16, 60_000);
        let exercises = cache.partition(Family::Exercises);
        let sessions = cache.partition(Family::TrainingSessions);
        let calls = AtomicUsize::new(0);
        read(&exercises, Scope::List, "", &calls, json!([])).await;
        read(&sessions, Scope::List, "", &calls, json!([])).await;

        sessions.invalidate_scope(Scope::List);
        assert!(exercises.is_fresh(Scope::List, ""));
        assert!(!sessions.is_fresh(Scope::List, ""));
    }

    #[tokio::test]
    async fn test_fetch_error_leaves_cache_untouched() {
        let partition = cache(16, 60_000).partition(Family::Exercises);
        let calls = AtomicUsize::new(0);
        read(&partition, Scope::Detail, "e1", &calls, json!({"v": 1})).await;
        partition.invalidate(Scope::Detail, "e1");

        let result: Result<Value, ApiError> = partition
            .fetch(Scope::Detail, "e1", || async {
                Err(ApiError::Transport("down".into()))
            })
            .await;
        assert!(result.is_err());
        assert!(partition.contains(Scope::Detail, "e1"));
        assert!(!partition.is_fresh(Scope::Detail, "e1"));
    }

    #[tokio::test]
    async fn test_in_flight_fetch_invalidated_midway_is_stored_stale() {
        let partition = cache(16, 60_000).partition(Family::TrainingSessions);
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();

        let reader = {
            let partition = partition.clone();
            tokio::spawn(async move {
                partition
                    .fetch::<Value, _, _>(Scope::List, "offset=0", || async move {
                        let _ = started_tx.send(());
                        let _ = release_rx.await;
                        Ok(json!("pre-mutation page"))
                    })
                    .await
            })
        };

        started_rx.await.unwrap();
        partition.invalidate_scope(Scope::List);
        release_tx.send(()).unwrap();

        assert_eq!(reader.await.unwrap().unwrap(), json!("pre-mutation page"));
        // stored, but not trusted by the next read
        assert!(partition.contains(Scope::List, "offset=0"));
        assert!(!partition.is_fresh(Scope::List, "offset=0"));
    }

    #[tokio::test]
    async fn test_capacity_bounds_entries() {
        let cache = cache(2, 60_000);
        let partition = cache.partition(Family::Exercises);
        let calls = AtomicUsize::new(0);
        for id in ["a", "b", "c"] {
            read(&partition, Scope::Detail, id, &calls, json!(id)).await;
        }
        assert_eq!(cache.len(), 2);
        assert!(!partition.contains(Scope::Detail, "a"));
    }

    #[tokio::test]
    async fn test_bound_cache_forgets_previous_user() {
        let provider = Arc::new(StaticProvider::new(&StaticProviderConfig {
            name: "test".to_string(),
            token: None,
            user: None,
        }));
        let (session, handle) = AuthSynchronizer::spawn(provider.clone());
        session.ready().await.unwrap();
        let wait = Duration::from_secs(1);

        let cache = cache(16, 60_000).bound_to(session.clone());
        let partition = cache.partition(Family::Exercises);
        let calls = AtomicUsize::new(0);

        provider.sign_in(User::new("u1", None, None, None), "t1");
        session.wait_until_timeout(|s| s.is_authenticated(), wait).await.unwrap();
        read(&partition, Scope::List, "", &calls, json!(["u1 data"])).await;
        assert!(partition.is_fresh(Scope::List, ""));

        provider.sign_in(User::new("u2", None, None, None), "t2");
        session
            .wait_until_timeout(|s| s.user().map(|u| u.uid.as_str()) == Some("u2"), wait)
            .await
            .unwrap();
        assert!(!partition.is_fresh(Scope::List, ""));
        assert!(cache.is_empty());
        let page = read(&partition, Scope::List, "", &calls, json!(["u2 data"])).await;
        assert_eq!(page, json!(["u2 data"]));
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_result_fetched_for_previous_user_is_dropped() {
        let provider = Arc::new(StaticProvider::new(&StaticProviderConfig {
            name: "test".to_string(),
            token: Some("t1".to_string()),
            user: None,
        }));
        let (session, handle) = AuthSynchronizer::spawn(provider.clone());
        session.ready().await.unwrap();
        let cache = cache(16, 60_000).bound_to(session.clone());
        let partition = cache.partition(Family::Exercises);

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let (started_tx, started_rx) = tokio::sync::oneshot::channel::<()>();
        let reader = {
            let partition = partition.clone();
            tokio::spawn(async move {
                partition
                    .fetch::<Value, _, _>(Scope::Detail, "e1", || async move {
                        let _ = started_tx.send(());
                        let _ = release_rx.await;
                        Ok(json!("first user's exercise"))
                    })
                    .await
            })
        };

        started_rx.await.unwrap();
        provider.sign_out().await.unwrap();
        session
            .wait_until_timeout(|s| !s.is_authenticated(), Duration::from_secs(1))
            .await
            .unwrap();
        release_tx.send(()).unwrap();

        reader.await.unwrap().unwrap();
        assert!(!partition.contains(Scope::Detail, "e1"));

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_clear_empties_cache() {
        let cache = cache(16, 60_000);
        let partition = cache.partition(Family::Exercises);
        let calls = AtomicUsize::new(0);
        read(&partition, Scope::List, "", &calls, json!([])).await;
        cache.clear();
        assert!(cache.is_empty());
    }
}
