//! Bounded-memory bitmap pool with a candidate pool for soft-evicted entries
//!
//! Entries live in the main map until memory pressure or replacement demotes
//! them. Demoted entries wait in the candidate pool for a grace period: a
//! request for the same key inside that window resurrects the bitmap instead
//! of decoding it again. Only unreferenced entries are ever recycled.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use lru::LruCache;

use super::backend::{BitmapBackend, Clock, SystemClock};
use super::bitmap::{BitmapRef, BitmapState, recycle_image};

/// How long a demoted entry stays resurrectable
pub const DEFAULT_CANDIDATE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Budgets and timing for one pool
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolConfig {
    /// Byte budget for the main map
    pub max_bytes: usize,
    /// Byte budget for the candidate pool
    pub max_candidate_bytes: usize,
    /// Age after which a candidate is recycled
    pub candidate_timeout: Duration,
}

impl PoolConfig {
    /// Budget with the candidate pool sized to a third of it
    #[must_use]
    pub fn with_max_bytes(max_bytes: usize) -> Self {
        Self {
            max_bytes,
            max_candidate_bytes: max_bytes / 3,
            candidate_timeout: DEFAULT_CANDIDATE_TIMEOUT,
        }
    }

    #[must_use]
    pub fn candidate_timeout(mut self, timeout: Duration) -> Self {
        self.candidate_timeout = timeout;
        self
    }
}

/// Snapshot of pool usage
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Entries in the main map
    pub entries: usize,
    pub main_bytes: usize,
    pub max_bytes: usize,
    /// Entries waiting in the candidate pool
    pub candidates: usize,
    pub candidate_bytes: usize,
    pub max_candidate_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    /// Candidates promoted back into the main map
    pub resurrections: u64,
    /// Main entries demoted because of memory pressure
    pub evictions: u64,
    /// Bitmaps handed back to the backend
    pub recycled: u64,
}

impl CacheStats {
    /// Share of acquisitions served from memory (0.0 to 1.0)
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

struct Candidate<I> {
    state: Arc<BitmapState<I>>,
    evicted_at: Instant,
}

struct CacheState<I> {
    name: Arc<str>,
    /// Most recently used at the front
    main: LruCache<String, Arc<BitmapState<I>>>,
    /// Oldest demotion at the front; keys may repeat, newest wins on lookup
    candidates: VecDeque<Candidate<I>>,
    main_bytes: usize,
    candidate_bytes: usize,
    config: PoolConfig,
    stats: CacheStats,
}

impl<I> CacheState<I> {
    fn new(name: Arc<str>, config: PoolConfig) -> Self {
        Self {
            name,
            main: LruCache::unbounded(),
            candidates: VecDeque::new(),
            main_bytes: 0,
            candidate_bytes: 0,
            config,
            stats: CacheStats::default(),
        }
    }

    /// Park an entry already removed from the main map
    fn demote(&mut self, state: Arc<BitmapState<I>>, now: Instant) {
        self.main_bytes = self.main_bytes.saturating_sub(state.byte_size());
        self.candidate_bytes += state.byte_size();
        self.candidates.push_back(Candidate {
            state,
            evicted_at: now,
        });
    }

    fn insert_main(&mut self, key: String, state: Arc<BitmapState<I>>, now: Instant) {
        self.main_bytes += state.byte_size();
        if let Some(previous) = self.main.put(key, state) {
            self.demote(previous, now);
        }
    }

    /// Demote the least recently used unreferenced entries until the main
    /// map fits its budget. Referenced entries are never demoted, so the
    /// map may stay over budget.
    fn trim_main(&mut self, now: Instant) {
        while self.main_bytes > self.config.max_bytes {
            let victim = self
                .main
                .iter()
                .rev()
                .find(|(_, state)| state.can_recycle())
                .map(|(key, _)| key.clone());

            let Some(key) = victim else {
                debug!(
                    "{}: {} bytes over budget, every entry is referenced",
                    self.name,
                    self.main_bytes - self.config.max_bytes
                );
                break;
            };

            if let Some(state) = self.main.pop(&key) {
                debug!("{}: evicting {key} ({} bytes)", self.name, state.byte_size());
                self.stats.evictions += 1;
                self.demote(state, now);
            }
        }
    }

    fn candidate_index(&self, key: &str) -> Option<usize> {
        self.candidates
            .iter()
            .rposition(|candidate| candidate.state.key() == key)
    }

    fn remove_candidate(&mut self, idx: usize) -> Option<Candidate<I>> {
        let candidate = self.candidates.remove(idx)?;
        self.candidate_bytes = self
            .candidate_bytes
            .saturating_sub(candidate.state.byte_size());
        Some(candidate)
    }

    fn is_expired(&self, candidate: &Candidate<I>, now: Instant) -> bool {
        now.saturating_duration_since(candidate.evicted_at) >= self.config.candidate_timeout
    }

    /// Recycle expired or over-budget candidates, oldest first. Referenced
    /// candidates are skipped and looked at again on the next sweep.
    fn sweep(&mut self, now: Instant, recycled: &mut Vec<Arc<BitmapState<I>>>) {
        let mut idx = 0;
        while idx < self.candidates.len() {
            let candidate = &self.candidates[idx];
            let expired = self.is_expired(candidate, now);
            let over_budget = self.candidate_bytes > self.config.max_candidate_bytes;

            if (expired || over_budget) && candidate.state.mark_recycled() {
                if let Some(candidate) = self.remove_candidate(idx) {
                    self.stats.recycled += 1;
                    recycled.push(candidate.state);
                }
            } else {
                idx += 1;
            }
        }
    }

    fn acquire(
        &mut self,
        key: &str,
        now: Instant,
        recycled: &mut Vec<Arc<BitmapState<I>>>,
    ) -> Option<Arc<BitmapState<I>>> {
        let hit = self
            .main
            .get(key)
            .filter(|state| state.acquire())
            .cloned();
        if let Some(state) = hit {
            self.stats.hits += 1;
            return Some(state);
        }

        if let Some(idx) = self.candidate_index(key) {
            let candidate = &self.candidates[idx];
            if self.is_expired(candidate, now) {
                if candidate.state.mark_recycled() {
                    if let Some(candidate) = self.remove_candidate(idx) {
                        self.stats.recycled += 1;
                        recycled.push(candidate.state);
                    }
                }
            } else if candidate.state.acquire() {
                if let Some(candidate) = self.remove_candidate(idx) {
                    debug!("{}: resurrecting {key}", self.name);
                    self.stats.hits += 1;
                    self.stats.resurrections += 1;
                    self.insert_main(key.to_string(), Arc::clone(&candidate.state), now);
                    self.trim_main(now);
                    return Some(candidate.state);
                }
            }
        }

        self.stats.misses += 1;
        None
    }

    fn snapshot(&self) -> CacheStats {
        CacheStats {
            entries: self.main.len(),
            main_bytes: self.main_bytes,
            max_bytes: self.config.max_bytes,
            candidates: self.candidates.len(),
            candidate_bytes: self.candidate_bytes,
            max_candidate_bytes: self.config.max_candidate_bytes,
            ..self.stats
        }
    }
}

/// A single bounded-memory bitmap pool.
///
/// Every operation runs its map and counter updates inside one critical
/// section. Backend recycling happens after the lock is released, on states
/// that have already been detached and marked recycled.
pub struct InnerImageCache<B: BitmapBackend> {
    name: Arc<str>,
    backend: Arc<B>,
    clock: Arc<dyn Clock>,
    state: Mutex<CacheState<B::Image>>,
}

impl<B: BitmapBackend> InnerImageCache<B> {
    /// Pool with the given byte budget, a third of it for candidates and the
    /// default candidate timeout
    #[must_use]
    pub fn new(name: &str, backend: Arc<B>, max_bytes: usize) -> Self {
        Self::with_config(
            name,
            backend,
            PoolConfig::with_max_bytes(max_bytes),
            Arc::new(SystemClock),
        )
    }

    #[must_use]
    pub fn with_config(
        name: &str,
        backend: Arc<B>,
        config: PoolConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let name: Arc<str> = Arc::from(name);
        Self {
            state: Mutex::new(CacheState::new(Arc::clone(&name), config)),
            name,
            backend,
            clock,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<B::Image>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn recycle_all(&self, recycled: Vec<Arc<BitmapState<B::Image>>>) {
        for state in recycled {
            recycle_image(self.backend.as_ref(), &state);
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Take a reference to the bitmap cached under `key`.
    ///
    /// Falls back to the candidate pool, promoting a live candidate back into
    /// the main map. `None` means the caller has to decode a fresh image.
    pub fn acquire(&self, key: &str) -> Option<BitmapRef<B>> {
        let now = self.clock.now();
        let mut recycled = Vec::new();
        let state = {
            let mut state = self.lock();
            state.sweep(now, &mut recycled);
            state.acquire(key, now, &mut recycled)
        };
        self.recycle_all(recycled);

        state.map(|state| BitmapRef::from_acquired(state, Arc::clone(&self.backend)))
    }

    /// Insert a freshly decoded image.
    ///
    /// An entry already cached under `key` is demoted to the candidate pool
    /// rather than freed, so readers still drawing it keep a valid bitmap.
    pub fn put(&self, key: impl Into<String>, image: B::Image) {
        let key = key.into();
        let byte_size = self.backend.calculate_size(&image);
        let entry = Arc::new(BitmapState::new(key.clone(), image, byte_size));

        let now = self.clock.now();
        let mut recycled = Vec::new();
        {
            let mut state = self.lock();
            state.sweep(now, &mut recycled);
            state.insert_main(key, entry, now);
            state.trim_main(now);
        }
        self.recycle_all(recycled);
    }

    /// Demote `key` to the candidate pool. Returns false if it was not cached.
    pub fn remove(&self, key: &str) -> bool {
        let now = self.clock.now();
        let mut recycled = Vec::new();
        let removed = {
            let mut state = self.lock();
            state.sweep(now, &mut recycled);
            match state.main.pop(key) {
                Some(entry) => {
                    state.demote(entry, now);
                    true
                }
                None => false,
            }
        };
        self.recycle_all(recycled);
        removed
    }

    /// Run candidate-pool maintenance without any other change
    pub fn sweep(&self) {
        let now = self.clock.now();
        let mut recycled = Vec::new();
        self.lock().sweep(now, &mut recycled);
        self.recycle_all(recycled);
    }

    /// Tear down both maps.
    ///
    /// Unreferenced bitmaps are recycled now. Referenced ones are detached
    /// and recycled when their last lease is dropped.
    pub fn clear(&self) {
        let mut detached = Vec::new();
        {
            let mut state = self.lock();
            while let Some((_, entry)) = state.main.pop_lru() {
                detached.push(entry);
            }
            detached.extend(state.candidates.drain(..).map(|candidate| candidate.state));
            state.main_bytes = 0;
            state.candidate_bytes = 0;
        }

        let mut pinned = 0usize;
        let mut recycled = Vec::new();
        for entry in detached {
            if entry.orphan() {
                recycled.push(entry);
            } else {
                pinned += 1;
            }
        }

        let count = recycled.len() as u64;
        self.recycle_all(recycled);
        self.lock().stats.recycled += count;

        if pinned > 0 {
            warn!(
                "{}: cleared with {pinned} bitmaps still referenced, recycling on release",
                self.name
            );
        } else {
            info!("{}: cleared {count} bitmaps", self.name);
        }
    }

    /// Change both budgets. Shrinking demotes and recycles immediately.
    pub fn set_max_memory(&self, max_bytes: usize, max_candidate_bytes: usize) {
        let now = self.clock.now();
        let mut recycled = Vec::new();
        {
            let mut state = self.lock();
            state.config.max_bytes = max_bytes;
            state.config.max_candidate_bytes = max_candidate_bytes;
            state.trim_main(now);
            state.sweep(now, &mut recycled);
        }
        self.recycle_all(recycled);
    }

    /// Whether `key` is in the main map. Does not touch recency.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.lock().main.contains(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().main.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().main.is_empty()
    }

    #[must_use]
    pub fn candidate_len(&self) -> usize {
        self.lock().candidates.len()
    }

    /// Bytes held by the main map
    #[must_use]
    pub fn memory_used(&self) -> usize {
        self.lock().main_bytes
    }

    /// Bytes held by the candidate pool
    #[must_use]
    pub fn candidate_memory_used(&self) -> usize {
        self.lock().candidate_bytes
    }

    #[must_use]
    pub fn config(&self) -> PoolConfig {
        self.lock().config
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.lock().snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{CountingBackend, ManualClock, TestImage};

    const MB: usize = 1024 * 1024;

    fn cache(max_bytes: usize) -> (InnerImageCache<CountingBackend>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let cache = InnerImageCache::with_config(
            "test",
            Arc::new(CountingBackend::default()),
            PoolConfig::with_max_bytes(max_bytes),
            clock.clone(),
        );
        (cache, clock)
    }

    #[test]
    fn put_then_acquire_returns_same_image() {
        let (cache, _) = cache(10 * MB);
        cache.put("a", TestImage::new(7, MB));

        let lease = cache.acquire("a").unwrap();
        assert_eq!(lease.id, 7);
        assert_eq!(lease.state().ref_count(), 1);
        assert_eq!(cache.stats().hits, 1);
    }

    #[test]
    fn lease_drop_releases_reference() {
        let (cache, _) = cache(10 * MB);
        cache.put("a", TestImage::new(1, MB));

        let lease = cache.acquire("a").unwrap();
        let state = Arc::clone(lease.state());
        drop(lease);
        assert_eq!(state.ref_count(), 0);
    }

    #[test]
    fn miss_counts() {
        let (cache, _) = cache(MB);
        assert!(cache.acquire("nope").is_none());
        assert_eq!(cache.stats().misses, 1);
    }

    #[test]
    fn third_insert_evicts_one_of_first_two() {
        let (cache, _) = cache(10 * MB);
        cache.put("a", TestImage::new(1, 4 * MB));
        cache.put("b", TestImage::new(2, 4 * MB));
        cache.put("c", TestImage::new(3, 4 * MB));

        assert!(cache.memory_used() <= 10 * MB);
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.candidate_len(), 1);
        assert!(cache.contains("c"));
        assert!(cache.contains("a") ^ cache.contains("b"));
    }

    #[test]
    fn eviction_follows_recency() {
        let (cache, _) = cache(10 * MB);
        cache.put("a", TestImage::new(1, 4 * MB));
        cache.put("b", TestImage::new(2, 4 * MB));
        drop(cache.acquire("a"));
        cache.put("c", TestImage::new(3, 4 * MB));

        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
    }

    #[test]
    fn referenced_entries_stay_over_budget() {
        let (cache, _) = cache(10 * MB);
        cache.put("a", TestImage::new(1, 4 * MB));
        cache.put("b", TestImage::new(2, 4 * MB));
        let a = cache.acquire("a").unwrap();
        let b = cache.acquire("b").unwrap();

        cache.put("c", TestImage::new(3, 4 * MB));
        let c = cache.acquire("c").unwrap();
        cache.put("d", TestImage::new(4, 4 * MB));

        // only "d" was unreferenced
        assert!(cache.contains("a"));
        assert!(cache.contains("b"));
        assert!(cache.contains("c"));
        assert!(!cache.contains("d"));
        assert_eq!(cache.memory_used(), 12 * MB);

        drop((a, b, c));
        cache.put("e", TestImage::new(5, MB));
        assert!(cache.memory_used() <= 10 * MB);
    }

    #[test]
    fn replacing_key_demotes_old_entry() {
        let (cache, _) = cache(10 * MB);
        cache.put("a", TestImage::new(1, MB));
        let old = cache.acquire("a").unwrap();
        cache.put("a", TestImage::new(2, MB));

        assert_eq!(old.id, 1);
        assert_eq!(cache.candidate_len(), 1);
        assert_eq!(cache.acquire("a").unwrap().id, 2);
        assert!(!old.state().is_recycled());
    }

    #[test]
    fn candidate_resurrected_before_timeout() {
        let (cache, clock) = cache(10 * MB);
        cache.put("a", TestImage::new(1, MB));
        assert!(cache.remove("a"));
        assert!(!cache.contains("a"));

        clock.advance(Duration::from_millis(4000));
        let lease = cache.acquire("a").unwrap();
        assert_eq!(lease.id, 1);
        assert!(cache.contains("a"));
        assert_eq!(cache.candidate_len(), 0);
        assert_eq!(cache.memory_used(), MB);
        assert_eq!(cache.candidate_memory_used(), 0);
        assert_eq!(cache.stats().resurrections, 1);
    }

    #[test]
    fn candidate_recycled_after_timeout() {
        let (cache, clock) = cache(10 * MB);
        cache.put("a", TestImage::new(1, MB));
        cache.remove("a");

        clock.advance(Duration::from_millis(6000));
        assert!(cache.acquire("a").is_none());
        assert_eq!(cache.candidate_len(), 0);
        assert_eq!(cache.backend().recycled_ids(), vec![1]);
    }

    #[test]
    fn referenced_candidate_survives_timeout() {
        let (cache, clock) = cache(10 * MB);
        cache.put("a", TestImage::new(1, MB));
        let lease = cache.acquire("a").unwrap();
        cache.remove("a");

        clock.advance(Duration::from_secs(10));
        cache.sweep();
        assert_eq!(cache.candidate_len(), 1);
        assert!(cache.backend().recycled_ids().is_empty());

        drop(lease);
        cache.sweep();
        assert_eq!(cache.candidate_len(), 0);
        assert_eq!(cache.backend().recycled_ids(), vec![1]);
    }

    #[test]
    fn candidate_budget_recycles_oldest() {
        let (cache, _) = cache(9 * MB);
        for id in 0..3 {
            cache.put(format!("k{id}"), TestImage::new(id, 2 * MB));
            cache.remove(&format!("k{id}"));
        }
        cache.sweep();

        // 3 MB candidate budget keeps only the newest 2 MB entry
        assert_eq!(cache.candidate_len(), 1);
        assert_eq!(cache.backend().recycled_ids(), vec![0, 1]);
    }

    #[test]
    fn clear_defers_referenced_bitmaps() {
        let (cache, _) = cache(10 * MB);
        cache.put("a", TestImage::new(1, MB));
        cache.put("b", TestImage::new(2, MB));
        let lease = cache.acquire("a").unwrap();

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.memory_used(), 0);
        assert_eq!(cache.backend().recycled_ids(), vec![2]);
        assert_eq!(lease.id, 1);
        assert!(!lease.state().acquire());

        drop(lease);
        assert_eq!(cache.backend().recycled_ids(), vec![2, 1]);
    }

    #[test]
    fn recycle_failure_is_swallowed() {
        let (cache, clock) = cache(10 * MB);
        cache.backend().fail_recycle(true);
        cache.put("a", TestImage::new(1, MB));
        cache.remove("a");

        clock.advance(Duration::from_secs(6));
        cache.sweep();
        assert_eq!(cache.candidate_len(), 0);
    }

    #[test]
    fn shrinking_budget_evicts() {
        let (cache, _) = cache(10 * MB);
        for id in 0..4 {
            cache.put(format!("k{id}"), TestImage::new(id, 2 * MB));
        }
        cache.set_max_memory(4 * MB, MB);

        assert_eq!(cache.len(), 2);
        assert!(cache.memory_used() <= 4 * MB);
        assert!(cache.contains("k3"));
    }
}
