//! The concurrent cache engine.
//!
//! Callers never wait for maintenance. A read looks the key up in the backing
//! store and appends an access record to its thread's read stripe; a write
//! inserts into the store, charges the load and queues a write record. Whoever
//! wins the maintenance `try_lock` replays the buffered records into the
//! eviction strategy and the admission policy, and evicts until the load is
//! back under capacity. The work is bounded per pass, so its cost is spread
//! over many callers.
//!
//! With [MaintenanceMode::Background] the replay moves to a dedicated thread
//! that is woken whenever a caller would otherwise have drained.

pub(crate) mod buffer;
pub(crate) mod ll;
mod stats;

pub use self::stats::CacheStats;

use std::fmt::Debug;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, TryLockError, Weak};
use std::thread::{self, JoinHandle, Thread};
use std::time::Duration;

use crossbeam_queue::SegQueue;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use smallvec::SmallVec;
use tracing::{debug, trace};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use self::buffer::ReadBuffer;
use self::stats::StatCounters;
use crate::admission::{AdmissionKind, AdmissionPolicy, DEFAULT_SKETCH_WIDTH};
use crate::entry::Entry;
use crate::eviction::{EvictionKind, EvictionStrategy, DEFAULT_PRECISION};
use crate::store::{BackingStore, ShardedStore};

// A stripe holding more records than this asks for a drain.
const DRAIN_THRESHOLD: usize = 40;
const READ_BUFFER_SIZE: usize = 128;
const READ_MAX_DRAIN: usize = 64;
const WRITE_MAX_DRAIN: usize = 256;

const DEFAULT_CONCURRENCY: usize = 16;

/// Where buffered events are replayed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum MaintenanceMode {
    /// Callers drain opportunistically as they trigger it.
    #[default]
    Inline,
    /// A dedicated thread drains when woken by a caller, and at least once
    /// per interval.
    Background(Duration),
}

/// A configurable builder for [Cache].
pub struct CacheBuilder<K, V> {
    capacity: Option<usize>,
    concurrency: usize,
    precision: u32,
    eviction: EvictionKind,
    admission: AdmissionKind,
    admission_policy: Option<Box<dyn AdmissionPolicy<K, V>>>,
    sketch_width: usize,
    sketch_reset: Option<usize>,
    seed: Option<u64>,
    maintenance: MaintenanceMode,
    store: Option<Arc<dyn BackingStore<K, V>>>,
}

impl<K, V> Default for CacheBuilder<K, V> {
    fn default() -> Self {
        CacheBuilder {
            capacity: None,
            concurrency: DEFAULT_CONCURRENCY,
            precision: DEFAULT_PRECISION,
            eviction: EvictionKind::default(),
            admission: AdmissionKind::default(),
            admission_policy: None,
            sketch_width: DEFAULT_SKETCH_WIDTH,
            sketch_reset: None,
            seed: None,
            maintenance: MaintenanceMode::default(),
            store: None,
        }
    }
}

impl<K, V> CacheBuilder<K, V>
where
    K: Hash + Eq + Clone + Debug + Sync + Send + 'static,
    V: Clone + Debug + Sync + Send + 'static,
{
    /// Start from the defaults. A capacity must be set before building.
    pub fn new() -> Self {
        Self::default()
    }

    /// The total load, as a sum of entry sizes, that the cache settles under.
    #[must_use]
    pub fn set_capacity(self, capacity: usize) -> Self {
        CacheBuilder {
            capacity: Some(capacity),
            ..self
        }
    }

    /// The expected number of threads using the cache. This sets the number
    /// of read stripes and of store shards, rounded up to a power of two.
    #[must_use]
    pub fn set_concurrency(self, concurrency: usize) -> Self {
        CacheBuilder {
            concurrency,
            ..self
        }
    }

    /// Significant bits kept of a CAMP priority, `1..=32`. Lower values mean
    /// fewer, coarser buckets.
    #[must_use]
    pub fn set_precision(self, precision: u32) -> Self {
        CacheBuilder { precision, ..self }
    }

    /// Choose the eviction strategy.
    #[must_use]
    pub fn set_eviction(self, eviction: EvictionKind) -> Self {
        CacheBuilder { eviction, ..self }
    }

    /// Choose one of the built in admission policies.
    #[must_use]
    pub fn set_admission(self, admission: AdmissionKind) -> Self {
        CacheBuilder { admission, ..self }
    }

    /// Supply your own admission policy. This takes precedence over
    /// [CacheBuilder::set_admission].
    #[must_use]
    pub fn set_admission_policy(self, policy: Box<dyn AdmissionPolicy<K, V>>) -> Self {
        CacheBuilder {
            admission_policy: Some(policy),
            ..self
        }
    }

    /// Width of the frequency sketch, rounded up to a power of two, and how
    /// many increments pass before all counters are halved. `None` never
    /// halves.
    #[must_use]
    pub fn set_sketch(self, width: usize, reset_interval: Option<usize>) -> Self {
        CacheBuilder {
            sketch_width: width,
            sketch_reset: reset_interval,
            ..self
        }
    }

    /// Seed the random sources, for reproducible admission decisions.
    #[must_use]
    pub fn set_seed(self, seed: u64) -> Self {
        CacheBuilder {
            seed: Some(seed),
            ..self
        }
    }

    /// Choose where maintenance runs.
    #[must_use]
    pub fn set_maintenance(self, maintenance: MaintenanceMode) -> Self {
        CacheBuilder {
            maintenance,
            ..self
        }
    }

    /// Use an existing store rather than a fresh [ShardedStore].
    #[must_use]
    pub fn set_store(self, store: Arc<dyn BackingStore<K, V>>) -> Self {
        CacheBuilder {
            store: Some(store),
            ..self
        }
    }

    /// Consume this builder, returning a cache if successful. If configured
    /// parameters are missing or incorrect, a None will be returned.
    pub fn build(self) -> Option<Cache<K, V>> {
        let CacheBuilder {
            capacity,
            concurrency,
            precision,
            eviction,
            admission,
            admission_policy,
            sketch_width,
            sketch_reset,
            seed,
            maintenance,
            store,
        } = self;

        let Some(capacity) = capacity.filter(|c| *c > 0) else {
            debug!(?capacity, "cache capacity must be set and non-zero");
            return None;
        };
        if concurrency == 0 {
            debug!("cache concurrency must be non-zero");
            return None;
        }
        if !(1..=u32::BITS).contains(&precision) {
            debug!(precision, "cache precision out of range");
            return None;
        }
        if admission_policy.is_none() && !admission.is_valid() {
            debug!(?admission, "invalid admission policy");
            return None;
        }
        if sketch_width == 0 {
            debug!("sketch width must be non-zero");
            return None;
        }
        if let MaintenanceMode::Background(interval) = maintenance {
            if interval.is_zero() {
                debug!("maintenance interval must be non-zero");
                return None;
            }
        }

        let store = store.unwrap_or_else(|| Arc::new(ShardedStore::new(concurrency)));
        let admission = admission_policy
            .unwrap_or_else(|| admission.into_policy(seed, sketch_width, sketch_reset));
        // Keep the stripe rotation independent of the admission stream.
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s.rotate_left(32)),
            None => StdRng::from_rng(&mut rand::rng()),
        };

        let core = Arc::new(CacheCore {
            store,
            capacity,
            load: AtomicUsize::new(0),
            reads: ReadBuffer::new(concurrency, READ_BUFFER_SIZE),
            writes: SegQueue::new(),
            eager: AtomicBool::new(false),
            inner: Mutex::new(CacheInner {
                strategy: eviction.into_strategy(precision),
                admission,
                rng,
            }),
            stats: StatCounters::default(),
            background: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            maintainer: OnceLock::new(),
        });

        let worker = match maintenance {
            MaintenanceMode::Inline => None,
            MaintenanceMode::Background(interval) => spawn_maintainer(&core, interval),
        };

        Some(Cache {
            core,
            worker: Mutex::new(worker),
        })
    }
}

/// A concurrent, bounded, in-memory cache.
///
/// Entries are immutable once inserted and are only removed by eviction or
/// by a refused admission. Every method takes `&self`; share the cache
/// between threads with an [Arc].
pub struct Cache<K, V>
where
    K: Hash + Eq + Clone + Debug + Sync + Send + 'static,
    V: Clone + Debug + Sync + Send + 'static,
{
    core: Arc<CacheCore<K, V>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct CacheCore<K, V>
where
    K: Hash + Eq + Clone + Debug + Sync + Send + 'static,
    V: Clone + Debug + Sync + Send + 'static,
{
    store: Arc<dyn BackingStore<K, V>>,
    capacity: usize,
    // Sum of sizes of admitted entries that are not yet evicted.
    load: AtomicUsize,
    reads: ReadBuffer<Arc<Entry<K, V>>>,
    writes: SegQueue<Arc<Entry<K, V>>>,
    // Set when a write is buffered, so the next caller drains.
    eager: AtomicBool,
    inner: Mutex<CacheInner<K, V>>,
    stats: StatCounters,
    background: AtomicBool,
    shutdown: AtomicBool,
    maintainer: OnceLock<Thread>,
}

// These are only touched while the maintenance lock is held.
struct CacheInner<K, V> {
    strategy: Box<dyn EvictionStrategy<K, V>>,
    admission: Box<dyn AdmissionPolicy<K, V>>,
    rng: StdRng,
}

impl<K, V> Cache<K, V>
where
    K: Hash + Eq + Clone + Debug + Sync + Send + 'static,
    V: Clone + Debug + Sync + Send + 'static,
{
    /// Look up `k`, recording the access for the eviction and admission
    /// bookkeeping.
    pub fn get(&self, k: &K) -> Option<V> {
        self.core.get(k)
    }

    /// Insert `v` under `k` unless the key is already present. `cost` is the
    /// price of recreating the value and `size` its share of the capacity.
    ///
    /// Returns false if the key was present, if `size` exceeds the whole
    /// capacity, or if the admission policy refused the entry. A true return
    /// means the entry was admitted, though a policy that could not be asked
    /// straight away may still refuse it during maintenance.
    pub fn put_if_absent(&self, k: K, v: V, cost: u64, size: NonZeroUsize) -> bool {
        self.core.put_if_absent(Entry::new(k, v, cost, size.get()))
    }

    /// True if a live entry exists for `k`. Unlike [Cache::get] this records
    /// no access.
    pub fn contains_key(&self, k: &K) -> bool {
        self.core.store.get(k).is_some_and(|e| !e.is_evicted())
    }

    /// The number of entries in the backing store.
    pub fn len(&self) -> usize {
        self.core.store.len()
    }

    /// True if the backing store is empty.
    pub fn is_empty(&self) -> bool {
        self.core.store.is_empty()
    }

    /// The sum of sizes of all admitted, unevicted entries. This may run over
    /// the capacity until the next drain.
    pub fn load(&self) -> usize {
        self.core.load.load(Ordering::Acquire)
    }

    /// The configured capacity.
    pub fn capacity(&self) -> usize {
        self.core.capacity
    }

    /// A snapshot of the cache counters.
    pub fn stats(&self) -> CacheStats {
        self.core.stats.snapshot()
    }

    /// If the maintenance lock is available, drain once. If the lock is
    /// currently held, no action is taken.
    pub fn try_quiesce(&self) {
        self.core.try_drain();
    }

    /// Block on the maintenance lock and drain until every buffer is empty.
    /// With writers running concurrently this may not return; it is intended
    /// for tests and controlled shutdown.
    pub fn quiesce(&self) {
        let mut inner = self.core.lock_inner();
        loop {
            self.core.drain(&mut inner);
            if self.core.reads.is_empty() && self.core.writes.is_empty() {
                break;
            }
        }
    }

    /// Stop the background maintenance thread, if any, and wait for it to
    /// exit. Later maintenance runs inline. Calling this more than once is a
    /// no-op.
    pub fn shut_down(&self) {
        self.core.background.store(false, Ordering::Release);
        self.core.shutdown.store(true, Ordering::Release);
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.thread().unpark();
            if handle.join().is_err() {
                debug!("maintenance thread panicked");
            }
            debug!("cache maintenance shut down");
        }
    }
}

impl<K, V> Drop for Cache<K, V>
where
    K: Hash + Eq + Clone + Debug + Sync + Send + 'static,
    V: Clone + Debug + Sync + Send + 'static,
{
    fn drop(&mut self) {
        self.shut_down();
    }
}

impl<K, V> CacheCore<K, V>
where
    K: Hash + Eq + Clone + Debug + Sync + Send + 'static,
    V: Clone + Debug + Sync + Send + 'static,
{
    fn get(&self, k: &K) -> Option<V> {
        match self.store.get(k) {
            Some(entry) if !entry.is_evicted() => {
                self.stats.hit();
                let v = entry.value().clone();
                self.record_read(entry);
                Some(v)
            }
            _ => {
                self.stats.miss();
                None
            }
        }
    }

    fn record_read(&self, entry: Arc<Entry<K, V>>) {
        match self.reads.record(entry) {
            Ok(pending) => {
                if pending > DRAIN_THRESHOLD || self.eager.load(Ordering::Acquire) {
                    self.schedule_drain();
                }
            }
            Err(_dropped) => {
                self.stats.drop_read();
                self.schedule_drain();
            }
        }
    }

    fn put_if_absent(&self, mut entry: Entry<K, V>) -> bool {
        let size = entry.size();
        if size > self.capacity {
            trace!(key = ?entry.key(), size, "entry larger than the cache");
            return false;
        }
        if self.store.get(entry.key()).is_some() {
            return false;
        }

        if self.load.load(Ordering::Acquire) + size > self.capacity {
            match self.try_lock_inner() {
                Some(mut inner) => {
                    self.drain(&mut inner);
                    let projected = self.load.load(Ordering::Acquire) + size;
                    let admitted = self.admit(&mut inner, &entry, projected);
                    entry.mark_write_registered();
                    if !admitted {
                        self.stats.reject(false);
                        trace!(key = ?entry.key(), "admission refused");
                        return false;
                    }
                }
                // Someone else is maintaining, decide on replay.
                None => entry.defer_admission(),
            }
        }

        let entry = Arc::new(entry);
        if !self.store.insert_if_absent(entry.clone()) {
            return false;
        }
        self.load.fetch_add(size, Ordering::AcqRel);
        self.stats.admit();
        self.writes.push(entry);
        self.eager.store(true, Ordering::Release);
        self.schedule_drain();
        true
    }

    fn schedule_drain(&self) {
        if self.background.load(Ordering::Acquire) {
            if let Some(t) = self.maintainer.get() {
                t.unpark();
                return;
            }
        }
        self.try_drain();
    }

    fn try_lock_inner(&self) -> Option<MutexGuard<'_, CacheInner<K, V>>> {
        match self.inner.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(p)) => Some(p.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    fn lock_inner(&self) -> MutexGuard<'_, CacheInner<K, V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn try_drain(&self) -> bool {
        match self.try_lock_inner() {
            Some(mut inner) => {
                self.drain(&mut inner);
                true
            }
            None => false,
        }
    }

    fn drain(&self, inner: &mut CacheInner<K, V>) {
        self.eager.store(false, Ordering::Release);

        let reads = self.drain_reads(inner);
        let writes = self.replay_writes(inner, true);
        let evicted = self.evict(inner);

        if !self.writes.is_empty() {
            self.eager.store(true, Ordering::Release);
        }
        self.stats.drain();
        trace!(
            reads,
            writes,
            evicted,
            load = self.load.load(Ordering::Relaxed),
            linked = inner.strategy.len(),
            "drain"
        );
    }

    fn drain_reads(&self, inner: &mut CacheInner<K, V>) -> usize {
        let stripes = self.reads.stripe_count();
        let start = inner.rng.random_range(0..stripes);
        let CacheInner {
            strategy,
            admission,
            ..
        } = inner;

        let mut n = 0;
        for i in 0..stripes {
            n += self
                .reads
                .drain_stripe(start + i, READ_MAX_DRAIN, |entry| {
                    // Dead, or its write has not been replayed yet.
                    if entry.is_evicted() || entry.slot().is_none() {
                        return;
                    }
                    admission.register_read(&entry);
                    strategy.on_read(&entry);
                });
        }
        n
    }

    // Link buffered writes. While draining, each write first makes room;
    // when surfacing candidates for an eviction pass it must not.
    fn replay_writes(&self, inner: &mut CacheInner<K, V>, evict_first: bool) -> usize {
        let mut n = 0;
        while n < WRITE_MAX_DRAIN {
            let Some(entry) = self.writes.pop() else {
                break;
            };
            n += 1;
            self.apply_write(inner, entry, evict_first);
        }
        n
    }

    fn apply_write(&self, inner: &mut CacheInner<K, V>, entry: Arc<Entry<K, V>>, evict_first: bool) {
        if entry.is_evicted() {
            return;
        }
        let mut registered = entry.write_registered();
        // Its size is already part of the load.
        if entry.deferred_admission() {
            let projected = self.load.load(Ordering::Acquire);
            registered = true;
            if !self.admit(inner, &entry, projected) {
                self.reject(&entry);
                return;
            }
        }
        if evict_first {
            self.evict(inner);
        }
        inner.strategy.on_write(entry.clone());
        if !registered {
            inner.admission.register_write(&entry);
        }
    }

    // `projected` is the load with the candidate counted in. The policy sees
    // the write before deciding, so a refused key still gains frequency and
    // weight; callers must not register it again.
    fn admit(&self, inner: &mut CacheInner<K, V>, candidate: &Entry<K, V>, projected: usize) -> bool {
        inner.admission.register_write(candidate);
        if projected <= self.capacity {
            return true;
        }
        let CacheInner {
            strategy,
            admission,
            ..
        } = inner;
        match strategy.peek_victim() {
            Some(victim) => admission.should_admit(candidate, victim),
            None => true,
        }
    }

    fn reject(&self, entry: &Arc<Entry<K, V>>) {
        entry.mark_evicted();
        self.store.remove_entry(entry);
        self.load.fetch_sub(entry.size(), Ordering::AcqRel);
        self.stats.reject(true);
        trace!(key = ?entry.key(), "deferred admission refused");
    }

    fn evict(&self, inner: &mut CacheInner<K, V>) -> usize {
        let mut victims: SmallVec<[Arc<Entry<K, V>>; 8]> = SmallVec::new();
        let mut surfaced = false;

        while self.load.load(Ordering::Acquire) > self.capacity {
            match inner.strategy.pop_victim() {
                Some(victim) => {
                    victim.mark_evicted();
                    self.load.fetch_sub(victim.size(), Ordering::AcqRel);
                    victims.push(victim);
                }
                None if !surfaced => {
                    surfaced = true;
                    if self.replay_writes(inner, false) == 0 {
                        break;
                    }
                }
                None => break,
            }
        }

        for victim in victims.iter() {
            let removed = self.store.remove_entry(victim);
            debug_assert!(removed);
            self.stats.evict();
            trace!(key = ?victim.key(), cost = victim.cost(), size = victim.size(), "evicted");
        }
        victims.len()
    }
}

fn spawn_maintainer<K, V>(core: &Arc<CacheCore<K, V>>, interval: Duration) -> Option<JoinHandle<()>>
where
    K: Hash + Eq + Clone + Debug + Sync + Send + 'static,
    V: Clone + Debug + Sync + Send + 'static,
{
    let weak = Arc::downgrade(core);
    let spawned = thread::Builder::new()
        .name("campcache-maintenance".to_string())
        .spawn(move || maintenance_loop(weak, interval));

    match spawned {
        Ok(handle) => {
            let _ = core.maintainer.set(handle.thread().clone());
            core.background.store(true, Ordering::Release);
            debug!(?interval, "maintenance thread started");
            Some(handle)
        }
        Err(err) => {
            debug!(?err, "unable to start maintenance thread, maintaining inline");
            None
        }
    }
}

fn maintenance_loop<K, V>(core: Weak<CacheCore<K, V>>, interval: Duration)
where
    K: Hash + Eq + Clone + Debug + Sync + Send + 'static,
    V: Clone + Debug + Sync + Send + 'static,
{
    loop {
        {
            let Some(core) = core.upgrade() else {
                break;
            };
            if core.shutdown.load(Ordering::Acquire) {
                break;
            }
            core.try_drain();
        }
        thread::park_timeout(interval);
    }
    debug!("maintenance thread stopped");
}

#[cfg(test)]
mod tests {
    use super::{CacheBuilder, MaintenanceMode};
    use crate::admission::{AdmissionKind, AdmissionPolicy};
    use crate::entry::Entry;
    use crate::eviction::EvictionKind;
    use crate::store::{BackingStore, ShardedStore};
    use crate::Cache;
    use std::num::NonZeroUsize;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    const ONE: NonZeroUsize = NonZeroUsize::MIN;

    fn lru_cache(capacity: usize) -> Cache<&'static str, u32> {
        CacheBuilder::new()
            .set_capacity(capacity)
            .build()
            .expect("Invalid cache parameters!")
    }

    #[test]
    fn test_cache_round_trip() {
        let _ = tracing_subscriber::fmt::try_init();
        let cache = lru_cache(8);
        assert!(cache.is_empty());
        assert_eq!(cache.get(&"a"), None);
        assert!(cache.put_if_absent("a", 1, 1, ONE));
        assert_eq!(cache.get(&"a"), Some(1));
        assert!(cache.contains_key(&"a"));

        // The first value wins.
        assert!(!cache.put_if_absent("a", 2, 1, ONE));
        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.load(), 1);

        let s = cache.stats();
        assert_eq!(s.hits, 2);
        assert_eq!(s.misses, 1);
        assert_eq!(s.admitted, 1);
    }

    #[test]
    fn test_cache_oversize_rejected() {
        let cache = lru_cache(4);
        let five = NonZeroUsize::new(5).unwrap();
        assert!(!cache.put_if_absent("big", 1, 1, five));
        assert!(!cache.contains_key(&"big"));
        assert_eq!(cache.load(), 0);

        // Exactly the capacity fits.
        let four = NonZeroUsize::new(4).unwrap();
        assert!(cache.put_if_absent("fits", 1, 1, four));
        assert_eq!(cache.load(), 4);
    }

    #[test]
    fn test_cache_lru_evicts_oldest() {
        let _ = tracing_subscriber::fmt::try_init();
        let cache = lru_cache(4);
        for (i, k) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            assert!(cache.put_if_absent(k, i as u32, 1, ONE));
        }
        cache.quiesce();

        assert!(!cache.contains_key(&"a"));
        for k in ["b", "c", "d", "e"] {
            assert!(cache.contains_key(&k));
        }
        assert_eq!(cache.load(), 4);
        assert_eq!(cache.len(), 4);
        assert_eq!(cache.stats().evicted, 1);
    }

    #[test]
    fn test_cache_lru_read_protects() {
        let cache = lru_cache(4);
        for (i, k) in ["a", "b", "c", "d"].iter().enumerate() {
            assert!(cache.put_if_absent(k, i as u32, 1, ONE));
        }
        cache.quiesce();
        assert_eq!(cache.get(&"a"), Some(0));

        assert!(cache.put_if_absent("e", 4, 1, ONE));
        cache.quiesce();
        assert!(cache.contains_key(&"a"));
        assert!(!cache.contains_key(&"b"));
        assert_eq!(cache.load(), 4);
    }

    #[test]
    fn test_cache_empty_drain() {
        let cache = lru_cache(4);
        cache.quiesce();
        cache.try_quiesce();
        cache.quiesce();
        assert_eq!(cache.load(), 0);
        assert!(cache.is_empty());
        let s = cache.stats();
        assert_eq!(s.evicted, 0);
        assert_eq!(s.drains, 3);
    }

    #[test]
    fn test_cache_camp_evicts_cheap_bucket() {
        let _ = tracing_subscriber::fmt::try_init();
        let cache: Cache<&'static str, u32> = CacheBuilder::new()
            .set_capacity(3)
            .set_eviction(EvictionKind::Camp)
            .build()
            .expect("Invalid cache parameters!");

        // A free entry anchors the base priority at zero.
        assert!(cache.put_if_absent("anchor", 0, 0, ONE));
        assert!(cache.put_if_absent("dear", 1, 100, ONE));
        assert!(cache.put_if_absent("cheap", 2, 1, ONE));
        cache.quiesce();

        assert!(cache.put_if_absent("x", 3, 100, ONE));
        cache.quiesce();
        assert!(!cache.contains_key(&"anchor"));

        assert!(cache.put_if_absent("y", 4, 100, ONE));
        cache.quiesce();
        assert!(!cache.contains_key(&"cheap"));
        for k in ["dear", "x", "y"] {
            assert!(cache.contains_key(&k));
        }
        assert_eq!(cache.load(), 3);
    }

    #[test]
    fn test_cache_frequency_admission() {
        let _ = tracing_subscriber::fmt::try_init();
        let cache: Cache<&'static str, u32> = CacheBuilder::new()
            .set_capacity(2)
            .set_admission(AdmissionKind::Frequency)
            .set_sketch(4096, None)
            .build()
            .expect("Invalid cache parameters!");

        assert!(cache.put_if_absent("a", 1, 1, ONE));
        assert!(cache.put_if_absent("b", 2, 1, ONE));
        cache.quiesce();
        for _ in 0..3 {
            assert_eq!(cache.get(&"a"), Some(1));
            assert_eq!(cache.get(&"b"), Some(2));
        }
        cache.quiesce();

        // Never seen before, so it can't displace either resident.
        assert!(!cache.put_if_absent("c", 3, 1, ONE));
        assert_eq!(cache.get(&"c"), None);
        assert!(cache.contains_key(&"a"));
        assert!(cache.contains_key(&"b"));
        assert_eq!(cache.stats().rejected, 1);
        assert_eq!(cache.load(), 2);
    }

    struct RefuseAll;

    impl AdmissionPolicy<u32, u32> for RefuseAll {
        fn should_admit(&mut self, _c: &Entry<u32, u32>, _v: &Entry<u32, u32>) -> bool {
            false
        }
    }

    #[test]
    fn test_cache_frequency_repeated_put_displaces_cold() {
        let _ = tracing_subscriber::fmt::try_init();
        let cache: Cache<u32, u32> = CacheBuilder::new()
            .set_capacity(2)
            .set_admission(AdmissionKind::Frequency)
            .set_sketch(4096, None)
            .build()
            .expect("Invalid cache parameters!");

        assert!(cache.put_if_absent(1, 1, 1, ONE));
        assert!(cache.put_if_absent(2, 2, 1, ONE));
        cache.quiesce();

        // Nothing is ever read. Each refused put still counts towards the
        // key's frequency, so it must get in eventually.
        let mut attempts = 0;
        while !cache.contains_key(&3) && attempts < 100 {
            assert_eq!(cache.get(&3), None);
            cache.put_if_absent(3, 3, 1, ONE);
            cache.quiesce();
            attempts += 1;
        }
        assert!(cache.contains_key(&3), "refused {} times", attempts);
        assert_eq!(cache.get(&3), Some(3));
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.load(), 2);
        assert!(cache.stats().evicted >= 1);
    }

    #[test]
    fn test_cache_frequency_hot_resident_survives() {
        let cache: Cache<u32, u32> = CacheBuilder::new()
            .set_capacity(2)
            .set_admission(AdmissionKind::Frequency)
            .set_sketch(4096, None)
            .build()
            .expect("Invalid cache parameters!");

        assert!(cache.put_if_absent(1, 1, 1, ONE));
        assert!(cache.put_if_absent(2, 2, 1, ONE));
        cache.quiesce();
        for _ in 0..4 {
            assert_eq!(cache.get(&1), Some(1));
        }
        cache.quiesce();

        // 2 is now the LRU victim and the cold one.
        let mut attempts = 0;
        while !cache.contains_key(&3) && attempts < 100 {
            cache.put_if_absent(3, 3, 1, ONE);
            cache.quiesce();
            attempts += 1;
        }
        assert!(cache.contains_key(&3));
        assert!(cache.contains_key(&1));
        assert!(!cache.contains_key(&2));
    }

    #[test]
    fn test_cache_weighted_learns_from_refused_writes() {
        let cache: Cache<u32, u32> = CacheBuilder::new()
            .set_capacity(1)
            .set_admission(AdmissionKind::Weighted)
            .set_seed(11)
            .build()
            .expect("Invalid cache parameters!");

        assert!(cache.put_if_absent(1, 1, 1, ONE));
        cache.quiesce();
        // A free entry is always refused, but it is still a write the policy
        // sees. A dear one raises the bar to its own ratio and gets in.
        assert!(!cache.put_if_absent(2, 2, 0, ONE));
        assert!(cache.put_if_absent(3, 3, 1000, ONE));
        cache.quiesce();
        assert!(cache.contains_key(&3));
        assert!(!cache.contains_key(&1));
        // Against a best ratio of 1000, a ratio of 1 almost never wins.
        let admitted = (10..60u32)
            .filter(|k| {
                let ok = cache.put_if_absent(*k, *k, 1, ONE);
                cache.quiesce();
                ok
            })
            .count();
        assert!(admitted < 10, "{}", admitted);
    }

    #[test]
    fn test_cache_deferred_refusal() {
        let _ = tracing_subscriber::fmt::try_init();
        let cache: Cache<u32, u32> = CacheBuilder::new()
            .set_capacity(2)
            .set_admission_policy(Box::new(RefuseAll))
            .build()
            .expect("Invalid cache parameters!");

        assert!(cache.put_if_absent(1, 1, 1, ONE));
        assert!(cache.put_if_absent(2, 2, 1, ONE));
        cache.quiesce();
        let before = cache.stats();
        assert_eq!(before.admitted, 2);
        assert_eq!(cache.load(), 2);

        {
            // Maintenance is busy, so the decision has to wait for replay.
            let _guard = cache.core.lock_inner();
            assert!(cache.put_if_absent(3, 3, 1, ONE));
            assert!(cache.contains_key(&3));
            assert_eq!(cache.load(), 3);
            assert_eq!(cache.stats().admitted, 3);
        }

        cache.quiesce();
        assert!(!cache.contains_key(&3));
        assert_eq!(cache.get(&3), None);
        assert_eq!(cache.load(), 2);
        assert!(cache.contains_key(&1));
        assert!(cache.contains_key(&2));
        let after = cache.stats();
        assert_eq!(after.rejected, 1);
        assert_eq!(after.admitted, before.admitted);
        assert_eq!(after.evicted, 0);
    }

    #[test]
    fn test_cache_custom_policy_and_store() {
        let store: Arc<ShardedStore<u32, u32>> = Arc::new(ShardedStore::new(4));
        let cache: Cache<u32, u32> = CacheBuilder::new()
            .set_capacity(2)
            .set_admission_policy(Box::new(RefuseAll))
            .set_store(store.clone())
            .build()
            .expect("Invalid cache parameters!");

        // Room to spare, the policy is not asked.
        assert!(cache.put_if_absent(1, 1, 1, ONE));
        assert!(cache.put_if_absent(2, 2, 1, ONE));
        assert!(!cache.put_if_absent(3, 3, 1, ONE));
        cache.quiesce();
        assert_eq!(store.len(), 2);
        assert!(store.get(&3).is_none());
    }

    #[test]
    fn test_cache_builder_rejects() {
        assert!(CacheBuilder::<u32, u32>::new().build().is_none());
        assert!(CacheBuilder::<u32, u32>::new().set_capacity(0).build().is_none());
        let ok = || CacheBuilder::<u32, u32>::new().set_capacity(8);
        assert!(ok().set_concurrency(0).build().is_none());
        assert!(ok().set_precision(0).build().is_none());
        assert!(ok().set_precision(33).build().is_none());
        assert!(ok()
            .set_admission(AdmissionKind::Random(1.5))
            .build()
            .is_none());
        assert!(ok().set_sketch(0, None).build().is_none());
        assert!(ok()
            .set_maintenance(MaintenanceMode::Background(Duration::ZERO))
            .build()
            .is_none());
        assert!(ok()
            .set_admission(AdmissionKind::Random(0.5))
            .set_seed(3)
            .build()
            .is_some());
    }

    #[test]
    fn test_cache_parallel_disjoint_puts() {
        let _ = tracing_subscriber::fmt::try_init();
        let threads = 4;
        let per_thread = 256;
        let cache: Arc<Cache<u32, u32>> = Arc::new(
            CacheBuilder::new()
                .set_capacity(threads * per_thread)
                .set_concurrency(threads)
                .build()
                .expect("Invalid cache parameters!"),
        );

        let handles: Vec<_> = (0..threads as u32)
            .map(|t| {
                let cache = cache.clone();
                thread::spawn(move || {
                    let base = t * per_thread as u32;
                    for k in base..base + per_thread as u32 {
                        assert!(cache.put_if_absent(k, k * 2, 1, ONE));
                        assert_eq!(cache.get(&k), Some(k * 2));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        cache.quiesce();
        assert_eq!(cache.len(), threads * per_thread);
        assert_eq!(cache.load(), threads * per_thread);
        for k in 0..(threads * per_thread) as u32 {
            assert_eq!(cache.get(&k), Some(k * 2));
        }
        assert_eq!(cache.stats().evicted, 0);
    }

    #[test]
    fn test_cache_parallel_settles_under_capacity() {
        let cache: Arc<Cache<u32, u32>> = Arc::new(
            CacheBuilder::new()
                .set_capacity(64)
                .set_concurrency(4)
                .set_eviction(EvictionKind::Camp)
                .set_admission(AdmissionKind::Weighted)
                .build()
                .expect("Invalid cache parameters!"),
        );

        let handles: Vec<_> = (0..4u32)
            .map(|t| {
                let cache = cache.clone();
                thread::spawn(move || {
                    for i in 0..1000u32 {
                        let k = t * 1000 + i;
                        let size = NonZeroUsize::new((k % 3 + 1) as usize).unwrap();
                        cache.put_if_absent(k, k, (k % 17) as u64, size);
                        cache.get(&(k / 2));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        cache.quiesce();
        let settled: usize = (0..4000u32)
            .filter(|k| cache.contains_key(k))
            .map(|k| (k % 3 + 1) as usize)
            .sum();
        assert_eq!(cache.load(), settled);
        assert!(cache.load() <= cache.capacity());
    }

    #[test]
    fn test_cache_background_maintenance() {
        let _ = tracing_subscriber::fmt::try_init();
        let cache: Cache<u32, u32> = CacheBuilder::new()
            .set_capacity(16)
            .set_maintenance(MaintenanceMode::Background(Duration::from_millis(5)))
            .build()
            .expect("Invalid cache parameters!");

        for k in 0..64 {
            assert!(cache.put_if_absent(k, k, 1, ONE));
        }
        let mut settled = false;
        for _ in 0..400 {
            if cache.load() <= cache.capacity() {
                settled = true;
                break;
            }
            thread::sleep(Duration::from_millis(5));
        }
        assert!(settled);

        cache.shut_down();
        cache.shut_down();

        // Inline from here on.
        for k in 64..128 {
            cache.put_if_absent(k, k, 1, ONE);
        }
        cache.quiesce();
        assert!(cache.load() <= cache.capacity());
        assert!(cache.contains_key(&127));
    }

    #[test]
    fn test_cache_drop_stops_maintenance() {
        let cache: Cache<u32, u32> = CacheBuilder::new()
            .set_capacity(4)
            .set_maintenance(MaintenanceMode::Background(Duration::from_millis(1)))
            .build()
            .expect("Invalid cache parameters!");
        assert!(cache.put_if_absent(1, 1, 1, ONE));
        drop(cache);
    }

    #[allow(dead_code)]
    pub static RUNNING: AtomicBool = AtomicBool::new(false);

    #[cfg(test)]
    fn multi_thread_worker(cache: Arc<Cache<Box<u32>, Box<u32>>>) {
        while RUNNING.load(Ordering::Relaxed) {
            for _i in 0..128 {
                let x = rand::random::<u32>() % 4096;
                let k = Box::new(x);
                if cache.get(&k).is_none() {
                    cache.put_if_absent(k, Box::new(x), x as u64, ONE);
                }
            }
        }
    }

    #[allow(dead_code)]
    #[cfg_attr(miri, ignore)]
    #[cfg_attr(feature = "dhat-heap", test)]
    #[cfg(test)]
    fn test_cache_stress_1() {
        #[cfg(feature = "dhat-heap")]
        let _profiler = dhat::Profiler::builder().trim_backtraces(None).build();

        let cache: Arc<Cache<Box<u32>, Box<u32>>> = Arc::new(
            CacheBuilder::new()
                .set_capacity(64)
                .set_concurrency(4)
                .set_eviction(EvictionKind::Camp)
                .set_admission(AdmissionKind::Frequency)
                .build()
                .expect("Invalid cache parameters!"),
        );

        let thread_count = 4;

        RUNNING.store(true, Ordering::Relaxed);

        let handles: Vec<_> = (0..thread_count)
            .map(|_| {
                let cache = cache.clone();
                thread::spawn(move || multi_thread_worker(cache))
            })
            .collect();

        for x in 0..1024 {
            if cache.get(&Box::new(x)).is_none() {
                cache.put_if_absent(Box::new(x), Box::new(x), 1, ONE);
            }
        }

        RUNNING.store(false, Ordering::Relaxed);

        for handle in handles {
            handle.join().unwrap();
        }

        cache.quiesce();
        assert!(cache.load() <= cache.capacity());
        drop(cache);
    }
}
