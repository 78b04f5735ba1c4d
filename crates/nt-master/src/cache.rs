//! Decoded sample cache.
//!
//! Least-recently-used eviction under both an entry count and a byte
//! budget. Recency is a monotonically increasing tick; the oldest tick in
//! `recency` is the next eviction victim. Concurrent loads of one id share
//! a single in-flight future.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures::FutureExt;
use nt_ir::AudioBuffer;
use serde::{Deserialize, Serialize};

use crate::error::LoadError;
use crate::flight::SingleFlight;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_bytes: usize,
    pub max_entries: usize,
    /// Entries older than this are treated as absent.
    pub ttl_secs: Option<u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { max_bytes: 256 * 1024 * 1024, max_entries: 500, ttl_secs: None }
    }
}

/// A decoded sample held by the cache.
#[derive(Clone, Debug)]
pub struct CachedSample {
    pub id: String,
    pub buffer: Arc<AudioBuffer>,
    pub loaded_at: Instant,
    pub bytes: usize,
}

/// Snapshot of cache counters.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// `hits / (hits + misses)`, or 0 before any lookup.
    pub hit_rate: f64,
    pub used_bytes: usize,
    pub max_bytes: usize,
    pub entries: usize,
    pub in_flight: usize,
}

struct Entry {
    sample: CachedSample,
    tick: u64,
}

#[derive(Default)]
struct State {
    entries: HashMap<String, Entry>,
    recency: BTreeMap<u64, String>,
    tick: u64,
    used_bytes: usize,
    hits: u64,
    misses: u64,
}

impl State {
    fn touch(&mut self, id: &str) {
        self.tick += 1;
        let tick = self.tick;
        if let Some(entry) = self.entries.get_mut(id) {
            self.recency.remove(&entry.tick);
            entry.tick = tick;
            self.recency.insert(tick, id.to_string());
        }
    }

    fn remove(&mut self, id: &str) -> Option<CachedSample> {
        let entry = self.entries.remove(id)?;
        self.recency.remove(&entry.tick);
        self.used_bytes -= entry.sample.bytes;
        Some(entry.sample)
    }

    fn evict_oldest(&mut self) -> Option<CachedSample> {
        let (_, id) = self.recency.pop_first()?;
        let entry = self.entries.remove(&id)?;
        self.used_bytes -= entry.sample.bytes;
        Some(entry.sample)
    }
}

pub struct SampleCache {
    config: CacheConfig,
    state: Mutex<State>,
    flight: SingleFlight<String, Arc<AudioBuffer>>,
}

impl SampleCache {
    pub fn new(config: CacheConfig) -> Self {
        Self { config, state: Mutex::new(State::default()), flight: SingleFlight::new() }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, sample: &CachedSample) -> bool {
        self.config
            .ttl_secs
            .is_some_and(|ttl| sample.loaded_at.elapsed() > Duration::from_secs(ttl))
    }

    /// Look up `id`, marking it most recently used.
    pub fn get(&self, id: &str) -> Option<Arc<AudioBuffer>> {
        let mut state = self.state();
        let expired = match state.entries.get(id) {
            None => {
                state.misses += 1;
                return None;
            }
            Some(entry) => self.is_expired(&entry.sample),
        };
        if expired {
            state.remove(id);
            state.misses += 1;
            tracing::debug!(id, "cache entry expired");
            return None;
        }
        state.hits += 1;
        state.touch(id);
        state.entries.get(id).map(|e| Arc::clone(&e.sample.buffer))
    }

    /// Whether a live entry exists. Does not affect recency or stats.
    pub fn has(&self, id: &str) -> bool {
        self.state().entries.get(id).is_some_and(|e| !self.is_expired(&e.sample))
    }

    /// Insert `buffer`, evicting least-recently-used entries until it fits.
    ///
    /// A buffer larger than the whole budget is not cached.
    pub fn set(&self, id: &str, buffer: Arc<AudioBuffer>) {
        let bytes = buffer.byte_size();
        if bytes > self.config.max_bytes {
            tracing::warn!(id, bytes, max = self.config.max_bytes, "sample exceeds cache budget, not cached");
            return;
        }
        let mut state = self.state();
        state.remove(id);
        while state.used_bytes + bytes > self.config.max_bytes {
            match state.evict_oldest() {
                Some(evicted) => tracing::debug!(id = %evicted.id, bytes = evicted.bytes, "evicted for space"),
                None => break,
            }
        }
        while state.entries.len() >= self.config.max_entries.max(1) {
            match state.evict_oldest() {
                Some(evicted) => tracing::debug!(id = %evicted.id, "evicted for count"),
                None => break,
            }
        }
        state.tick += 1;
        let tick = state.tick;
        state.recency.insert(tick, id.to_string());
        state.used_bytes += bytes;
        let sample = CachedSample { id: id.to_string(), buffer, loaded_at: Instant::now(), bytes };
        state.entries.insert(id.to_string(), Entry { sample, tick });
    }

    pub fn delete(&self, id: &str) -> bool {
        self.state().remove(id).is_some()
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&self) {
        let mut state = self.state();
        state.entries.clear();
        state.recency.clear();
        state.used_bytes = 0;
    }

    /// Remove every entry past its TTL. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut state = self.state();
        let expired: Vec<String> = state
            .entries
            .values()
            .filter(|e| self.is_expired(&e.sample))
            .map(|e| e.sample.id.clone())
            .collect();
        for id in &expired {
            state.remove(id);
        }
        expired.len()
    }

    pub fn is_loading(&self, id: &str) -> bool {
        self.flight.contains(&id.to_string())
    }

    /// Return the cached buffer for `id`, join a running load of it, or run
    /// `loader` and cache what it produces.
    pub async fn load<F, Fut>(&self, id: &str, loader: F) -> Result<Arc<AudioBuffer>, LoadError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<AudioBuffer, LoadError>> + Send + 'static,
    {
        if let Some(buffer) = self.get(id) {
            return Ok(buffer);
        }
        let key = id.to_string();
        let flight = self.flight.join(&key, || loader().map(|r| r.map(Arc::new)).boxed());
        let result = flight.clone().await;
        self.flight.finish(&key, &flight);
        if let Ok(buffer) = &result {
            if !self.has(id) {
                self.set(id, Arc::clone(buffer));
            }
        }
        result
    }

    /// Start background loads for every id not cached or already loading.
    ///
    /// Failures are logged and otherwise ignored. Must be called from
    /// within a tokio runtime; outside one nothing is started.
    pub fn preload<I, F, Fut>(self: Arc<Self>, ids: I, factory: F) -> Vec<tokio::task::JoinHandle<()>>
    where
        I: IntoIterator<Item = String>,
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<AudioBuffer, LoadError>> + Send + 'static,
    {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("preload called outside a runtime");
            return Vec::new();
        };
        ids.into_iter()
            .filter(|id| !self.has(id) && !self.is_loading(id))
            .map(|id| {
                let cache = Arc::clone(&self);
                let fut = factory(id.clone());
                runtime.spawn(async move {
                    if let Err(e) = cache.load(&id, || fut).await {
                        tracing::warn!(id, error = %e, "preload failed");
                    }
                })
            })
            .collect()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state();
        let lookups = state.hits + state.misses;
        CacheStats {
            hits: state.hits,
            misses: state.misses,
            hit_rate: if lookups == 0 { 0.0 } else { state.hits as f64 / lookups as f64 },
            used_bytes: state.used_bytes,
            max_bytes: self.config.max_bytes,
            entries: state.entries.len(),
            in_flight: self.flight.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Mono buffer of exactly `bytes` bytes.
    fn buffer(bytes: usize) -> Arc<AudioBuffer> {
        Arc::new(AudioBuffer::new(1, bytes / 4, 44100))
    }

    fn cache(max_bytes: usize, max_entries: usize) -> SampleCache {
        SampleCache::new(CacheConfig { max_bytes, max_entries, ttl_secs: None })
    }

    // === Eviction tests ===

    #[test]
    fn one_megabyte_budget_evicts_first_sample() {
        let mb = 1024 * 1024;
        let cache = cache(mb, 100);
        cache.set("A", buffer(mb * 6 / 10));
        cache.set("B", buffer(mb * 6 / 10));
        assert!(!cache.has("A"));
        assert!(cache.has("B"));
        assert!(cache.stats().used_bytes <= mb);
    }

    #[test]
    fn eviction_follows_recency() {
        let cache = cache(400, 100);
        cache.set("a", buffer(100));
        cache.set("b", buffer(100));
        cache.set("c", buffer(100));
        cache.get("a");
        cache.set("d", buffer(300));
        assert!(cache.has("a"));
        assert!(!cache.has("b"));
        assert!(!cache.has("c"));
        assert!(cache.has("d"));
    }

    #[test]
    fn byte_total_never_exceeds_budget() {
        let cache = cache(1000, 100);
        for (i, size) in [300, 500, 120, 800, 40, 1000, 8, 600].iter().enumerate() {
            cache.set(&i.to_string(), buffer(*size));
            assert!(cache.stats().used_bytes <= 1000);
        }
    }

    #[test]
    fn entry_count_is_bounded() {
        let cache = cache(1 << 20, 2);
        cache.set("a", buffer(4));
        cache.set("b", buffer(4));
        cache.set("c", buffer(4));
        assert_eq!(cache.stats().entries, 2);
        assert!(!cache.has("a"));
    }

    #[test]
    fn oversized_sample_is_not_cached() {
        let cache = cache(100, 10);
        cache.set("a", buffer(40));
        cache.set("huge", buffer(400));
        assert!(!cache.has("huge"));
        assert!(cache.has("a"));
    }

    #[test]
    fn replacing_an_id_updates_bytes() {
        let cache = cache(1000, 10);
        cache.set("a", buffer(400));
        cache.set("a", buffer(100));
        assert_eq!(cache.stats().used_bytes, 100);
        assert_eq!(cache.stats().entries, 1);
    }

    #[test]
    fn delete_and_clear() {
        let cache = cache(1000, 10);
        cache.set("a", buffer(100));
        cache.set("b", buffer(100));
        assert!(cache.delete("a"));
        assert!(!cache.delete("a"));
        cache.clear();
        let stats = cache.stats();
        assert_eq!(stats.entries, 0);
        assert_eq!(stats.used_bytes, 0);
    }

    #[test]
    fn stats_track_hit_rate() {
        let cache = cache(1000, 10);
        cache.set("a", buffer(100));
        cache.get("a");
        cache.get("a");
        cache.get("a");
        cache.get("missing");
        let stats = cache.stats();
        assert_eq!(stats.hits, 3);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.75).abs() < 1e-9);
    }

    #[test]
    fn zero_ttl_expires_entries() {
        let cache = SampleCache::new(CacheConfig { max_bytes: 1000, max_entries: 10, ttl_secs: Some(0) });
        cache.set("a", buffer(100));
        std::thread::sleep(Duration::from_millis(5));
        assert!(!cache.has("a"));
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.stats().used_bytes, 0);
    }

    // === Load tests ===

    #[tokio::test]
    async fn concurrent_loads_run_loader_once() {
        let cache = Arc::new(cache(1 << 20, 10));
        let calls = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let calls = Arc::clone(&calls);
                tokio::spawn(async move {
                    cache
                        .load("piano", || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Ok(AudioBuffer::new(2, 64, 44100))
                        })
                        .await
                })
            })
            .collect();

        let mut results = Vec::new();
        for task in tasks {
            results.push(task.await.unwrap().unwrap());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|b| Arc::ptr_eq(b, &results[0])));
        assert!(cache.has("piano"));
        assert!(!cache.is_loading("piano"));
    }

    #[tokio::test]
    async fn failed_load_is_not_cached() {
        let cache = cache(1000, 10);
        let result = cache.load("bad", || async { Err(LoadError::Cancelled) }).await;
        assert_eq!(result, Err(LoadError::Cancelled));
        assert!(!cache.has("bad"));
    }

    #[tokio::test]
    async fn preload_skips_cached_and_swallows_failures() {
        let cache = Arc::new(cache(1 << 20, 10));
        cache.set("have", buffer(16));
        let handles = Arc::clone(&cache).preload(
            ["have", "good", "bad"].map(String::from),
            |id| async move {
                if id == "bad" {
                    Err(LoadError::Fetch { id, reason: "missing".into() })
                } else {
                    Ok(AudioBuffer::new(1, 4, 44100))
                }
            },
        );
        assert_eq!(handles.len(), 2);
        for handle in handles {
            handle.await.unwrap();
        }
        assert!(cache.has("good"));
        assert!(!cache.has("bad"));
    }
}
