//! Single-flight tile cache with logical-clock LRU eviction.
//!
//! `get_or_compute` guarantees that for a given key the factory runs at most
//! once concurrently: callers racing on the same key block on the in-flight
//! computation and share its result. A failed factory releases the slot for
//! retry; it never leaves the entry busy and never populates the cache.
//!
//! Eviction is explicit. `evict_fraction` drops the oldest-access fraction
//! of entries, skipping busy and locked ones; `CacheJanitor` is a background
//! task that does so whenever the tracked entry weight crosses a high-water
//! mark (finalizer-style cleanup is deliberately not used).

use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};
use slideforge_common::Result;

type Weigher<V> = Box<dyn Fn(&V) -> usize + Send + Sync>;

enum Slot<V> {
    Empty,
    Ready(V),
}

struct Entry<V> {
    slot: Mutex<Slot<V>>,
    available: Condvar,
    busy: AtomicBool,
    last_access: AtomicU64,
    weight: AtomicUsize,
}

impl<V> Entry<V> {
    fn new(timestamp: u64) -> Self {
        Self {
            slot: Mutex::new(Slot::Empty),
            available: Condvar::new(),
            busy: AtomicBool::new(false),
            last_access: AtomicU64::new(timestamp),
            weight: AtomicUsize::new(0),
        }
    }
}

/// Clears the busy flag and wakes waiters even if the factory panics or
/// errors out; a failed computation must not wedge the entry.
struct BusyGuard<'a, V> {
    entry: &'a Entry<V>,
}

impl<V> Drop for BusyGuard<'_, V> {
    fn drop(&mut self) {
        self.entry.busy.store(false, Ordering::Release);
        self.entry.available.notify_all();
    }
}

pub struct TileCache<K, V> {
    entries: Mutex<HashMap<K, Arc<Entry<V>>>>,
    locked_keys: Mutex<HashSet<K>>,
    clock: AtomicU64,
    weigher: Option<Weigher<V>>,
}

impl<K, V> TileCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            locked_keys: Mutex::new(HashSet::new()),
            clock: AtomicU64::new(0),
            weigher: None,
        }
    }

    /// Track entry weight with `weigh`; enables `total_weight` and the
    /// janitor's high-water check.
    pub fn with_weigher(weigh: impl Fn(&V) -> usize + Send + Sync + 'static) -> Self {
        Self { weigher: Some(Box::new(weigh)), ..Self::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Sum of tracked entry weights (0 without a weigher).
    pub fn total_weight(&self) -> usize {
        self.entries.lock().values().map(|e| e.weight.load(Ordering::Relaxed)).sum()
    }

    /// Pin a key against eviction.
    pub fn lock_key(&self, key: &K) {
        self.locked_keys.lock().insert(key.clone());
    }

    pub fn unlock_key(&self, key: &K) {
        self.locked_keys.lock().remove(key);
    }

    pub fn get_or_compute<F>(&self, key: K, factory: F) -> Result<V>
    where
        F: FnOnce() -> Result<V>,
    {
        self.compute(key, factory, false)
    }

    /// Force recomputation even when a value exists, still single-flight.
    /// On failure the previous value (if any) is kept.
    pub fn refresh<F>(&self, key: K, factory: F) -> Result<V>
    where
        F: FnOnce() -> Result<V>,
    {
        self.compute(key, factory, true)
    }

    fn compute<F>(&self, key: K, factory: F, refresh: bool) -> Result<V>
    where
        F: FnOnce() -> Result<V>,
    {
        let entry = {
            let mut entries = self.entries.lock();
            entries.entry(key).or_insert_with(|| Arc::new(Entry::new(self.tick()))).clone()
        };
        entry.last_access.store(self.tick(), Ordering::Relaxed);

        let mut factory = Some(factory);
        let mut first_look = true;
        let mut slot = entry.slot.lock();
        loop {
            if entry.busy.load(Ordering::Acquire) {
                entry.available.wait(&mut slot);
                // An in-flight refresh satisfies this caller's refresh too.
                first_look = false;
                continue;
            }
            if let Slot::Ready(value) = &*slot {
                if !(refresh && first_look) {
                    return Ok(value.clone());
                }
            }

            entry.busy.store(true, Ordering::Release);
            let _busy = BusyGuard { entry: &entry };
            let run = factory.take().expect("cache factory consumed twice");
            let result = MutexGuard::unlocked(&mut slot, run);
            match result {
                Ok(value) => {
                    let weight = self.weigher.as_ref().map_or(0, |w| w(&value));
                    entry.weight.store(weight, Ordering::Relaxed);
                    *slot = Slot::Ready(value.clone());
                    return Ok(value);
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Remove the `floor(ratio * total)` entries with the oldest last-access
    /// timestamps, skipping busy and locked entries. Returns the number of
    /// entries actually removed.
    pub fn evict_fraction(&self, ratio: f64) -> usize {
        let mut entries = self.entries.lock();
        let locked_keys = self.locked_keys.lock();

        let mut by_age: Vec<(K, u64)> = entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.last_access.load(Ordering::Relaxed)))
            .collect();
        by_age.sort_by_key(|&(_, access)| access);

        let candidates = (ratio * by_age.len() as f64) as usize;
        let mut removed = 0;
        for (key, _) in by_age.into_iter().take(candidates) {
            let busy = entries.get(&key).map_or(false, |e| e.busy.load(Ordering::Acquire));
            if busy || locked_keys.contains(&key) {
                continue;
            }
            entries.remove(&key);
            removed += 1;
        }
        removed
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }
}

impl<K, V> Default for TileCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Background eviction task: once per period, compare the cache's tracked
/// weight against the high-water mark and evict an eighth of the entries
/// when it is exceeded. Stops when dropped.
pub struct CacheJanitor {
    stop: Arc<(Mutex<bool>, Condvar)>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl CacheJanitor {
    pub const EVICTION_RATIO: f64 = 1.0 / 8.0;

    pub fn spawn<K, V>(cache: Arc<TileCache<K, V>>, high_water_bytes: usize, period: Duration) -> Self
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let stop = Arc::new((Mutex::new(false), Condvar::new()));
        let stop_inner = stop.clone();
        let handle = std::thread::spawn(move || {
            let (flag, signal) = &*stop_inner;
            let mut stopped = flag.lock();
            while !*stopped {
                let _ = signal.wait_for(&mut stopped, period);
                if *stopped {
                    break;
                }
                let weight = cache.total_weight();
                if weight > high_water_bytes {
                    let removed = cache.evict_fraction(Self::EVICTION_RATIO);
                    tracing::debug!(weight, high_water_bytes, removed, "cache high-water eviction");
                }
            }
        });
        Self { stop, handle: Some(handle) }
    }
}

impl Drop for CacheJanitor {
    fn drop(&mut self) {
        let (flag, signal) = &*self.stop;
        *flag.lock() = true;
        signal.notify_all();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use slideforge_common::Error;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Barrier;

    #[test]
    fn test_single_flight() {
        let cache: Arc<TileCache<u32, u32>> = Arc::new(TileCache::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let calls = calls.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    cache
                        .get_or_compute(7, || {
                            calls.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(Duration::from_millis(20));
                            Ok(42)
                        })
                        .unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 42);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_factory_releases_entry() {
        let cache: TileCache<u32, u32> = TileCache::new();
        let err = cache.get_or_compute(1, || Err(Error::format("boom")));
        assert!(err.is_err());
        // The entry is retryable, not poisoned or busy.
        let value = cache.get_or_compute(1, || Ok(5)).unwrap();
        assert_eq!(value, 5);
    }

    #[test]
    fn test_refresh_recomputes() {
        let cache: TileCache<u32, u32> = TileCache::new();
        assert_eq!(cache.get_or_compute(1, || Ok(10)).unwrap(), 10);
        assert_eq!(cache.get_or_compute(1, || Ok(11)).unwrap(), 10);
        assert_eq!(cache.refresh(1, || Ok(12)).unwrap(), 12);
        assert_eq!(cache.get_or_compute(1, || Ok(13)).unwrap(), 12);
    }

    #[test]
    fn test_refresh_failure_keeps_previous_value() {
        let cache: TileCache<u32, u32> = TileCache::new();
        assert_eq!(cache.get_or_compute(1, || Ok(10)).unwrap(), 10);
        assert!(cache.refresh(1, || Err(Error::format("boom"))).is_err());
        assert_eq!(cache.get_or_compute(1, || Ok(11)).unwrap(), 10);
    }

    #[test]
    fn test_evict_fraction_skips_locked() {
        let cache: TileCache<u32, u32> = TileCache::new();
        for key in 0..8 {
            cache.get_or_compute(key, || Ok(key)).unwrap();
        }
        cache.lock_key(&0);
        cache.lock_key(&1);

        // Oldest half is keys 0..4; two of them are locked.
        let removed = cache.evict_fraction(0.5);
        assert_eq!(removed, 2);
        assert_eq!(cache.len(), 6);
        assert_eq!(cache.get_or_compute(0, || Ok(99)).unwrap(), 0);

        cache.unlock_key(&0);
        cache.unlock_key(&1);
    }

    #[test]
    fn test_evict_fraction_count_is_floor() {
        let cache: TileCache<u32, u32> = TileCache::new();
        for key in 0..7 {
            cache.get_or_compute(key, || Ok(key)).unwrap();
        }
        // floor(0.5 * 7) = 3
        assert_eq!(cache.evict_fraction(0.5), 3);
        assert_eq!(cache.len(), 4);
    }

    #[test]
    fn test_eviction_follows_access_order() {
        let cache: TileCache<u32, u32> = TileCache::new();
        for key in 0..4 {
            cache.get_or_compute(key, || Ok(key)).unwrap();
        }
        // Touch key 0 so key 1 becomes the oldest.
        cache.get_or_compute(0, || Ok(0)).unwrap();
        assert_eq!(cache.evict_fraction(0.25), 1);
        assert_eq!(cache.get_or_compute(1, || Ok(77)).unwrap(), 77);
        assert_eq!(cache.get_or_compute(0, || Ok(88)).unwrap(), 0);
    }

    #[test]
    fn test_weigher_and_janitor_eviction() {
        let cache: Arc<TileCache<u32, Vec<u8>>> =
            Arc::new(TileCache::with_weigher(|v: &Vec<u8>| v.len()));
        for key in 0..16 {
            cache.get_or_compute(key, || Ok(vec![0u8; 1024])).unwrap();
        }
        assert_eq!(cache.total_weight(), 16 * 1024);

        let janitor = CacheJanitor::spawn(cache.clone(), 4 * 1024, Duration::from_millis(5));
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while cache.len() == 16 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        drop(janitor);
        assert!(cache.len() < 16);
    }
}
