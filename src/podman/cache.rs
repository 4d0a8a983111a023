//! The two caches of the Podman watcher.
//!
//! [`VersionCache`] remembers the engine version, including `"unknown"` after
//! a failed fetch. [`TtlCache`] keeps pod names for a short while and never
//! remembers failed lookups. Keep these policies apart.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// Cached version after a failed fetch.
pub const UNKNOWN_VERSION: &str = "unknown";

/// Longest time-to-live a [`TtlCache`] honors; longer ones get clamped.
pub const MAX_TTL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Engine version, fetched at most once unless explicitly refreshed.
#[derive(Debug, Default)]
pub struct VersionCache {
    version: tokio::sync::Mutex<Option<String>>,
}

impl VersionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached version, fetching it first if there is none yet.
    /// The lock is held while fetching, so concurrent callers never trigger
    /// more than one fetch.
    pub async fn get_or_fetch<F, Fut>(&self, fetch: F) -> String
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let mut version = self.version.lock().await;
        if let Some(version) = version.as_ref() {
            return version.clone();
        }
        if let Err(e) = Self::store(&mut version, fetch().await) {
            log::warn!("Unable to fetch Podman version: {e}");
        }
        version.clone().unwrap_or_else(|| UNKNOWN_VERSION.to_string())
    }

    /// Unconditionally fetches the version and caches the outcome.
    pub async fn refresh<F, Fut>(&self, fetch: F) -> Result<()>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String>>,
    {
        let mut version = self.version.lock().await;
        Self::store(&mut version, fetch().await)
    }

    fn store(slot: &mut Option<String>, fetched: Result<String>) -> Result<()> {
        match fetched {
            Ok(version) => {
                *slot = Some(version);
                Ok(())
            }
            Err(e) => {
                *slot = Some(UNKNOWN_VERSION.to_string());
                Err(e)
            }
        }
    }
}

#[derive(Debug)]
struct Entry<V> {
    value: V,
    expires: Instant,
}

type Store<K, V> = Mutex<HashMap<K, Entry<V>>>;

/// Key/value cache whose entries expire a fixed time after being set.
///
/// Expired entries are never returned; a sweeper task started with
/// [`TtlCache::start`] additionally evicts them until [`TtlCache::stop`].
#[derive(Debug)]
pub struct TtlCache<K, V> {
    store: Arc<Store<K, V>>,
    ttl: Duration,
    sweeper: CancellationToken,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    pub fn new(ttl: Duration) -> Self {
        if ttl > MAX_TTL {
            log::warn!("Clamping cache TTL of {ttl:?} to {MAX_TTL:?}");
        }
        Self {
            store: Arc::new(Mutex::new(HashMap::new())),
            ttl: ttl.min(MAX_TTL),
            sweeper: CancellationToken::new(),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let store = lock(&self.store);
        store
            .get(key)
            .filter(|entry| entry.expires > Instant::now())
            .map(|entry| entry.value.clone())
    }

    pub fn set(&self, key: K, value: V) {
        let now = Instant::now();
        let expires = now
            .checked_add(self.ttl)
            .or_else(|| now.checked_add(MAX_TTL))
            .unwrap_or(now);
        lock(&self.store).insert(key, Entry { value, expires });
    }

    /// Number of stored entries, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        lock(&self.store).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawns the sweeper task; it runs until [`TtlCache::stop`] is called
    /// or the cache is dropped.
    pub fn start(&self) {
        if self.sweeper.is_cancelled() {
            return;
        }
        let store = Arc::downgrade(&self.store);
        let stopped = self.sweeper.clone();
        let period = self.ttl.max(Duration::from_millis(100));
        tokio::spawn(async move {
            let mut ticks = tokio::time::interval(period);
            ticks.tick().await;
            loop {
                tokio::select! {
                    _ = stopped.cancelled() => break,
                    _ = ticks.tick() => {
                        if !sweep(&store) {
                            break;
                        }
                    }
                }
            }
            log::debug!("Cache sweeper stopped");
        });
    }

    pub fn stop(&self) {
        self.sweeper.cancel();
    }
}

impl<K, V> Drop for TtlCache<K, V> {
    fn drop(&mut self) {
        self.sweeper.cancel();
    }
}

fn lock<K, V>(store: &Store<K, V>) -> MutexGuard<'_, HashMap<K, Entry<V>>> {
    store.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Evicts expired entries; false once the cache is gone.
fn sweep<K, V>(store: &Weak<Store<K, V>>) -> bool {
    let Some(store) = store.upgrade() else {
        return false;
    };
    let now = Instant::now();
    lock(&store).retain(|_, entry| entry.expires > now);
    true
}
