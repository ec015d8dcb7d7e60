//! The store: segment fan-out, lifecycle, and the public operation surface.

use std::hash::BuildHasher;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Weak};

use crossbeam_epoch::{self as epoch, Guard};
use log::debug;
use parking_lot::RwLock;
use rand::Rng;

use crate::config::StoreConfig;
use crate::error::StoreUpdateError;
use crate::factory::{Element, StoreHandle, Substitute, SubstituteFactory};
use crate::iter::{ElementView, KeyView};
use crate::listener::StoreEventListener;
use crate::lock::KeyLock;
use crate::metrics::TierMetrics;
use crate::segment::{Sampled, Segment};
use crate::writer::{CacheEntry, WriterManager};

/// Lock-free size estimation attempts before falling back to locking every
/// segment.
const RETRIES_BEFORE_LOCK: usize = 2;

type Listeners<E, P> = Vec<Arc<dyn StoreEventListener<E, P>>>;

/// Store lifecycle state.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Construction has not completed.
    Uninitialised = 0,
    /// The store is serving operations.
    Alive = 1,
    /// The store has been disposed.
    Shutdown = 2,
}

impl Status {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Status::Uninitialised,
            1 => Status::Alive,
            2 => Status::Shutdown,
            _ => unreachable!("invalid status value: {}", value),
        }
    }
}

/// Mix a 32-bit hash so that both its high bits (stripe selection) and low
/// bits (bucket selection) are well distributed.
///
/// The exact bit recipe is load-bearing: stripe assignment, bucket
/// placement, and the sampling fan-out all derive from it.
pub fn spread_hash(hash: u32) -> u32 {
    let mut h = hash;
    h = h.wrapping_add((h << 15) ^ 0xffff_cd7d);
    h ^= h >> 10;
    h = h.wrapping_add(h << 3);
    h ^= h >> 6;
    h = h.wrapping_add((h << 2).wrapping_add(h << 14));
    h ^ (h >> 16)
}

/// A segmented, concurrent key/value store whose keys stay resident in
/// memory while each value may be an in-heap element or a factory-produced
/// proxy.
///
/// See the [crate docs](crate) for an overview. Stores are created inside an
/// [`Arc`] so the factory can hold a weak back-handle
/// ([`SubstituteFactory::bind`]).
pub struct ResidentStore<E, F, S = ahash::RandomState>
where
    E: Element,
    F: SubstituteFactory<E>,
{
    segments: Box<[Segment<E, F>]>,
    segment_shift: u32,
    factory: Arc<F>,
    build_hasher: S,
    status: AtomicU8,
    listeners: RwLock<Listeners<E, F::Proxy>>,
}

impl<E, F> ResidentStore<E, F>
where
    E: Element,
    F: SubstituteFactory<E>,
{
    /// Create a store with the default configuration and hasher.
    pub fn new(factory: F) -> Arc<Self> {
        Self::with_config(factory, StoreConfig::default())
    }

    /// Create a store with the given configuration and the default hasher.
    pub fn with_config(factory: F, config: StoreConfig) -> Arc<Self> {
        Self::with_config_and_hasher(factory, config, ahash::RandomState::new())
    }
}

impl<E, F, S> ResidentStore<E, F, S>
where
    E: Element,
    F: SubstituteFactory<E>,
    S: BuildHasher + Send + Sync + 'static,
{
    /// Create a store with explicit configuration and hasher.
    ///
    /// Construction binds the factory (handing it a weak [`StoreHandle`])
    /// and ends with the store [`Status::Alive`].
    pub fn with_config_and_hasher(factory: F, config: StoreConfig, build_hasher: S) -> Arc<Self> {
        let factory = Arc::new(factory);
        let segment_count = config.segment_count();
        let segments: Vec<Segment<E, F>> = (0..segment_count)
            .map(|_| {
                Segment::new(
                    config.initial_capacity(),
                    config.load_factor(),
                    Arc::clone(&factory),
                )
            })
            .collect();

        let store = Arc::new(Self {
            segments: segments.into_boxed_slice(),
            segment_shift: (segment_count as u32 - 1).leading_zeros(),
            factory,
            build_hasher,
            status: AtomicU8::new(Status::Uninitialised as u8),
            listeners: RwLock::new(Vec::new()),
        });

        let store_dyn: Arc<dyn StoreHandle<E, F::Proxy>> = Arc::clone(&store) as Arc<dyn StoreHandle<E, F::Proxy>>;
        let handle: Weak<dyn StoreHandle<E, F::Proxy>> = Arc::downgrade(&store_dyn);
        store.factory.bind(handle);
        store.status.store(Status::Alive as u8, Ordering::Release);
        debug!(
            "store alive: {} segments x {} buckets",
            segment_count,
            config.initial_capacity()
        );
        store
    }

    #[inline]
    fn spread_of(&self, key: &E::Key) -> u32 {
        spread_hash(self.build_hasher.hash_one(key) as u32)
    }

    #[inline]
    fn segment_index(&self, hash: u32) -> usize {
        // Widened so a single-segment store (shift 32) indexes 0 instead of
        // overflowing the shift.
        ((hash as u64) >> self.segment_shift) as usize
    }

    #[inline]
    fn segment_for(&self, hash: u32) -> &Segment<E, F> {
        &self.segments[self.segment_index(hash)]
    }

    fn listeners(&self) -> Listeners<E, F::Proxy> {
        let listeners = self.listeners.read();
        if listeners.is_empty() {
            Vec::new()
        } else {
            listeners.clone()
        }
    }

    /// Pin an epoch guard for use with the reference-returning operations
    /// ([`unretrieved_get`](Self::unretrieved_get),
    /// [`get_random_sample`](Self::get_random_sample), view iteration).
    pub fn guard(&self) -> Guard {
        epoch::pin()
    }

    /// Register a mutation listener. Listeners are notified synchronously,
    /// in registration order, after an operation commits.
    pub fn add_listener(&self, listener: Arc<dyn StoreEventListener<E, F::Proxy>>) {
        self.listeners.write().push(listener);
    }

    /// Install `element` under its own key. Returns `true` when the key was
    /// previously unmapped.
    ///
    /// Overwriting an existing mapping displaces (and frees) its previous
    /// representation and notifies listeners with `on_update`.
    pub fn put(&self, element: E) -> bool {
        self.put_with_feedback(element, false).is_none()
    }

    /// Install `element` only when its key is unmapped; otherwise return the
    /// incumbent element unchanged.
    pub fn put_if_absent(&self, element: E) -> Option<E> {
        self.put_with_feedback(element, true)
    }

    fn put_with_feedback(&self, element: E, only_if_absent: bool) -> Option<E> {
        let key = element.key().clone();
        let hash = self.spread_of(&key);
        let listeners = self.listeners();
        let update_copy = (!listeners.is_empty() && !only_if_absent).then(|| element.clone());
        let guard = epoch::pin();
        let feedback = self
            .segment_for(hash)
            .put(key, hash, element, only_if_absent, &guard);
        if let (Some(new_element), Some(displaced)) = (update_copy.as_ref(), feedback.displaced) {
            for listener in &listeners {
                listener.on_update(displaced, new_element);
            }
        }
        feedback.old_element
    }

    /// Decode and return the element mapped to `key`, recording tier
    /// hit/miss statistics.
    pub fn get(&self, key: &E::Key) -> Option<E> {
        let hash = self.spread_of(key);
        let guard = epoch::pin();
        self.segment_for(hash).get(key, hash, &guard)
    }

    /// As [`get`](Self::get). The store keeps no per-element access
    /// metadata of its own, so the quiet variant is behaviorally identical;
    /// it exists for facade layers that distinguish the two.
    pub fn get_quiet(&self, key: &E::Key) -> Option<E> {
        self.get(key)
    }

    /// Whether a mapping exists for `key`. No decode, no statistics.
    pub fn contains_key(&self, key: &E::Key) -> bool {
        let hash = self.spread_of(key);
        let guard = epoch::pin();
        self.segment_for(hash).contains(key, hash, &guard)
    }

    /// The raw, undecoded representation currently mapped to `key`.
    ///
    /// The reference is valid while `guard` is held and retains referential
    /// identity, so it can be passed to [`fault`](Self::fault) or
    /// [`evict`](Self::evict) as the expected value.
    pub fn unretrieved_get<'g>(
        &self,
        key: &E::Key,
        guard: &'g Guard,
    ) -> Option<&'g Substitute<E, F::Proxy>> {
        let hash = self.spread_of(key);
        self.segment_for(hash).unretrieved_get(key, hash, guard)
    }

    /// Whether `key` is currently mapped to an in-heap element.
    pub fn is_element_on_heap(&self, key: &E::Key) -> bool {
        let guard = epoch::pin();
        self.unretrieved_get(key, &guard)
            .is_some_and(|substitute| substitute.is_element())
    }

    /// Whether `key` is currently mapped to a proxy representation.
    pub fn is_element_on_disk(&self, key: &E::Key) -> bool {
        let guard = epoch::pin();
        self.unretrieved_get(key, &guard)
            .is_some_and(|substitute| !substitute.is_element())
    }

    /// Install a caller-supplied substitute for an unmapped key, bypassing
    /// the factory's `create`. Used to re-materialize mappings from an
    /// external store scan. Returns `false` (freeing the offer) when the key
    /// is already mapped.
    pub fn put_raw_if_absent(&self, key: E::Key, substitute: Substitute<E, F::Proxy>) -> bool {
        let hash = self.spread_of(&key);
        let guard = epoch::pin();
        self.segment_for(hash)
            .put_raw_if_absent(key, hash, substitute, &guard)
    }

    /// Replace the mapping for `element`'s key, only if one exists. Returns
    /// the displaced element.
    pub fn replace(&self, element: E) -> Option<E> {
        let key = element.key().clone();
        let hash = self.spread_of(&key);
        let listeners = self.listeners();
        let update_copy = (!listeners.is_empty()).then(|| element.clone());
        let guard = epoch::pin();
        let feedback = self
            .segment_for(hash)
            .replace(&key, hash, None, |_, _| true, element, &guard);
        if let (Some(new_element), Some(displaced)) = (update_copy.as_ref(), feedback.displaced) {
            for listener in &listeners {
                listener.on_update(displaced, new_element);
            }
        }
        feedback.old_element
    }

    /// Replace the mapping for `element`'s key, only if one exists and its
    /// decoded element satisfies `cmp` against `old`. Returns whether the
    /// replacement happened.
    pub fn replace_if<C>(&self, old: &E, element: E, cmp: C) -> bool
    where
        C: Fn(&E, &E) -> bool,
    {
        let key = element.key().clone();
        let hash = self.spread_of(&key);
        let listeners = self.listeners();
        let update_copy = (!listeners.is_empty()).then(|| element.clone());
        let guard = epoch::pin();
        let feedback = self
            .segment_for(hash)
            .replace(&key, hash, Some(old), cmp, element, &guard);
        if let (Some(new_element), Some(displaced)) = (update_copy.as_ref(), feedback.displaced) {
            for listener in &listeners {
                listener.on_update(displaced, new_element);
            }
        }
        feedback.old_element.is_some()
    }

    /// Remove the mapping for `key`, returning its decoded element.
    pub fn remove(&self, key: &E::Key) -> Option<E> {
        self.remove_matching(key, None, |_, _| true)
    }

    /// Remove the mapping for `element`'s key only when the decoded
    /// incumbent satisfies `cmp` against `element`.
    pub fn remove_element<C>(&self, element: &E, cmp: C) -> Option<E>
    where
        C: Fn(&E, &E) -> bool,
    {
        self.remove_matching(element.key(), Some(element), cmp)
    }

    fn remove_matching<C>(&self, key: &E::Key, matching: Option<&E>, cmp: C) -> Option<E>
    where
        C: Fn(&E, &E) -> bool,
    {
        let hash = self.spread_of(key);
        let listeners = self.listeners();
        let guard = epoch::pin();
        let feedback = self
            .segment_for(hash)
            .remove(key, hash, matching, cmp, &guard);
        if let (Some(removed), Some(displaced)) = (feedback.old_element.as_ref(), feedback.displaced)
        {
            for listener in &listeners {
                listener.on_remove(displaced, removed);
            }
        }
        feedback.old_element
    }

    /// Remove every mapping, freeing every representation. Listeners are
    /// not notified per entry.
    pub fn remove_all(&self) {
        let guard = epoch::pin();
        for segment in self.segments.iter() {
            segment.clear(&guard);
        }
        debug!("store cleared");
    }

    /// Atomically switch `key`'s representation from `expect` (matched by
    /// identity, not equality) to `fault`.
    ///
    /// On success the displaced `expect` is freed and listeners observe
    /// `on_fault`; on failure the not-installed `fault` is freed. Callers
    /// obtain `expect` from [`unretrieved_get`](Self::unretrieved_get) under
    /// a guard they still hold.
    pub fn fault(&self, key: &E::Key, expect: &Substitute<E, F::Proxy>, fault: Substitute<E, F::Proxy>) -> bool {
        let hash = self.spread_of(key);
        let listeners = self.listeners();
        let guard = epoch::pin();
        match self.segment_for(hash).fault(key, hash, expect, fault, &guard) {
            Some(installed) => {
                for listener in &listeners {
                    listener.on_fault(key, expect, installed);
                }
                true
            }
            None => false,
        }
    }

    /// As [`fault`](Self::fault), but returns `false` (freeing `fault`)
    /// instead of blocking when the segment lock is contended.
    pub fn try_fault(
        &self,
        key: &E::Key,
        expect: &Substitute<E, F::Proxy>,
        fault: Substitute<E, F::Proxy>,
    ) -> bool {
        let hash = self.spread_of(key);
        let listeners = self.listeners();
        let guard = epoch::pin();
        match self
            .segment_for(hash)
            .try_fault(key, hash, expect, fault, &guard)
        {
            Some(installed) => {
                for listener in &listeners {
                    listener.on_fault(key, expect, installed);
                }
                true
            }
            None => false,
        }
    }

    /// Remove `key`'s mapping when its current representation is
    /// `substitute` by identity (any representation when `None`). Returns
    /// whether a mapping was removed.
    pub fn evict(&self, key: &E::Key, substitute: Option<&Substitute<E, F::Proxy>>) -> bool {
        self.evict_element(key, substitute).is_some()
    }

    /// As [`evict`](Self::evict), returning the decoded evicted element.
    pub fn evict_element(
        &self,
        key: &E::Key,
        substitute: Option<&Substitute<E, F::Proxy>>,
    ) -> Option<E> {
        let hash = self.spread_of(key);
        let listeners = self.listeners();
        let guard = epoch::pin();
        let evicted = self.segment_for(hash).evict(key, hash, substitute, &guard);
        if let Some(element) = evicted.as_ref() {
            for listener in &listeners {
                listener.on_evict(key, element);
            }
        }
        evicted
    }

    /// Install `element` and propagate the put to `writer`.
    ///
    /// The in-core mutation is never rolled back; a writer failure is
    /// reported as a [`StoreUpdateError`].
    pub fn put_with_writer<W>(&self, element: E, writer: Option<&W>) -> Result<bool, StoreUpdateError>
    where
        W: WriterManager<E>,
    {
        let writer_copy = writer.map(|_| element.clone());
        let newly_put = self.put(element);
        if let (Some(writer), Some(element)) = (writer, writer_copy) {
            if let Err(source) = writer.put(&element) {
                return Err(StoreUpdateError {
                    update_succeeded: true,
                    source,
                });
            }
        }
        Ok(newly_put)
    }

    /// Remove `key`'s mapping and propagate the removal to `writer`.
    ///
    /// The writer is invoked whether or not a mapping existed; the in-core
    /// mutation is never rolled back.
    pub fn remove_with_writer<W>(
        &self,
        key: &E::Key,
        writer: Option<&W>,
    ) -> Result<Option<E>, StoreUpdateError>
    where
        W: WriterManager<E>,
    {
        let removed = self.remove(key);
        if let Some(writer) = writer {
            if let Err(source) = writer.remove(CacheEntry {
                key: key.clone(),
                element: removed.clone(),
            }) {
                return Err(StoreUpdateError {
                    update_succeeded: removed.is_some(),
                    source,
                });
            }
        }
        Ok(removed)
    }

    /// The number of live mappings, saturating at `i32::MAX`.
    ///
    /// Attempts a bounded number of lock-free passes validated by the
    /// segments' mod-counts; under continuous churn it falls back to
    /// acquiring every segment's read lock in ascending order. Not
    /// linearizable; exact only at quiescence.
    pub fn len(&self) -> usize {
        let mut size = None;
        for _ in 0..RETRIES_BEFORE_LOCK {
            if let Some(stable) = self.unlocked_size() {
                size = Some(stable);
                break;
            }
        }
        let size = size.unwrap_or_else(|| self.locked_size());
        size.min(i32::MAX as u64) as usize
    }

    /// Whether the store holds no mappings.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn unlocked_size(&self) -> Option<u64> {
        let mut mod_counts = Vec::with_capacity(self.segments.len());
        let mut sum: u64 = 0;
        let mut mod_count_sum: usize = 0;
        for segment in self.segments.iter() {
            sum += segment.count.load(Ordering::Acquire) as u64;
            let mod_count = segment.mod_count.load(Ordering::Acquire);
            mod_counts.push(mod_count);
            mod_count_sum = mod_count_sum.wrapping_add(mod_count);
        }
        if mod_count_sum != 0 {
            let mut check: u64 = 0;
            for (segment, &mod_count) in self.segments.iter().zip(&mod_counts) {
                check += segment.count.load(Ordering::Acquire) as u64;
                if segment.mod_count.load(Ordering::Acquire) != mod_count {
                    return None;
                }
            }
            if check != sum {
                return None;
            }
        }
        Some(sum)
    }

    fn locked_size(&self) -> u64 {
        let guards: Vec<_> = self.segments.iter().map(|segment| segment.lock.read()).collect();
        let sum = self
            .segments
            .iter()
            .map(|segment| segment.count.load(Ordering::Acquire) as u64)
            .sum();
        drop(guards);
        sum
    }

    /// Draw at least `sample_size` entries passing `filter` (when that many
    /// exist), visiting segments in ring order from a random start — or
    /// from `key_hint`'s segment when supplied, so a caller mid-operation
    /// samples its own neighborhood first.
    pub fn get_random_sample<'g, Filter>(
        &'g self,
        filter: Filter,
        sample_size: usize,
        key_hint: Option<&E::Key>,
        guard: &'g Guard,
    ) -> Vec<Sampled<'g, E, F::Proxy>>
    where
        Filter: Fn(&Substitute<E, F::Proxy>) -> bool,
    {
        let mut sampled = Vec::with_capacity(sample_size);
        if sample_size == 0 {
            return sampled;
        }
        let random_hash: u32 = rand::thread_rng().gen();
        let start = match key_hint {
            Some(key) => self.segment_index(self.spread_of(key)),
            None => self.segment_index(random_hash),
        };
        let mask = self.segments.len() - 1;
        let mut index = start;
        loop {
            self.segments[index].add_random_sample(
                &filter,
                sample_size,
                &mut sampled,
                random_hash,
                guard,
            );
            if sampled.len() >= sample_size {
                break;
            }
            index = (index + 1) & mask;
            if index == start {
                break;
            }
        }
        sampled
    }

    /// A live view over the store's keys.
    pub fn key_view(&self) -> KeyView<'_, E, F, S> {
        KeyView::new(self)
    }

    /// A live, iteration-only view over the store's decoded elements.
    pub fn element_view(&self) -> ElementView<'_, E, F, S> {
        ElementView::new(self)
    }

    /// A point-in-time copy of all keys.
    pub fn keys(&self) -> Vec<E::Key> {
        let guard = epoch::pin();
        self.key_view().iter(&guard).cloned().collect()
    }

    /// Aggregated tier hit/miss counters across all segments.
    pub fn tier_metrics(&self) -> TierMetrics {
        self.segments
            .iter()
            .fold(TierMetrics::default(), |acc, segment| {
                acc.merged(segment.stats.snapshot())
            })
    }

    /// A lock handle striping `key`. `None` locks the stripe of the zero
    /// hash, preserving the legacy null-key contract.
    pub fn sync_for(&self, key: Option<&E::Key>) -> KeyLock<'_> {
        let hash = key.map(|key| self.spread_of(key)).unwrap_or(0);
        KeyLock::new(&self.segment_for(hash).lock)
    }

    /// The store's lifecycle status.
    pub fn status(&self) -> Status {
        Status::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Shut the store down: flips [`Status::Alive`] to [`Status::Shutdown`]
    /// and unbinds the factory. Idempotent; only the first call unbinds.
    pub fn dispose(&self) {
        if self
            .status
            .compare_exchange(
                Status::Alive as u8,
                Status::Shutdown as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
        {
            self.factory.unbind();
            debug!("store disposed");
        }
    }

    pub(crate) fn segments(&self) -> &[Segment<E, F>] {
        &self.segments
    }
}

impl<E, F, S> StoreHandle<E, F::Proxy> for ResidentStore<E, F, S>
where
    E: Element,
    F: SubstituteFactory<E>,
    S: BuildHasher + Send + Sync + 'static,
{
    fn fault(&self, key: &E::Key, expect: &Substitute<E, F::Proxy>, fault: Substitute<E, F::Proxy>) -> bool {
        ResidentStore::fault(self, key, expect, fault)
    }

    fn try_fault(
        &self,
        key: &E::Key,
        expect: &Substitute<E, F::Proxy>,
        fault: Substitute<E, F::Proxy>,
    ) -> bool {
        ResidentStore::try_fault(self, key, expect, fault)
    }

    fn evict(&self, key: &E::Key, substitute: Option<&Substitute<E, F::Proxy>>) -> bool {
        ResidentStore::evict(self, key, substitute)
    }

    fn put_raw_if_absent(&self, key: E::Key, substitute: Substitute<E, F::Proxy>) -> bool {
        ResidentStore::put_raw_if_absent(self, key, substitute)
    }

    fn contains_key(&self, key: &E::Key) -> bool {
        ResidentStore::contains_key(self, key)
    }

    fn status(&self) -> Status {
        ResidentStore::status(self)
    }
}
