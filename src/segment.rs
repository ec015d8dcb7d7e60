//! One lock stripe of the store.
//!
//! A segment is an open-chained hash table owning a slice of the key space.
//! Reads are lock-free: they pin an epoch guard, acquire-load the bucket
//! head and walk an immutable chain. All mutations run under the segment's
//! write lock and publish with release stores, so readers always observe
//! fully initialized nodes. Displaced nodes, tables and substitutes are
//! handed to the epoch collector, which reclaims them once concurrent
//! readers have moved on; the factory's `free` hook runs eagerly, exactly
//! once, at the point of displacement.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_epoch::{Atomic, Guard, Owned, Shared};
use log::trace;

use crate::entry::HashEntry;
use crate::factory::{Element, Substitute, SubstituteFactory};
use crate::lock::SegmentLock;
use crate::metrics::TierCounters;

/// Largest bucket array a segment will grow to.
const MAXIMUM_CAPACITY: usize = 1 << 30;

/// The bucket array. Swapped wholesale on rehash; superseded tables stay
/// readable until in-flight readers drop their guards.
pub(crate) struct Table<E: Element, P> {
    pub(crate) buckets: Box<[Atomic<HashEntry<E, P>>]>,
}

impl<E: Element, P> Table<E, P> {
    fn with_capacity(capacity: usize) -> Self {
        let buckets: Vec<Atomic<HashEntry<E, P>>> =
            (0..capacity).map(|_| Atomic::null()).collect();
        Self {
            buckets: buckets.into_boxed_slice(),
        }
    }
}

#[inline]
fn bucket_index(hash: u32, buckets: usize) -> usize {
    hash as usize & (buckets - 1)
}

/// An entry captured by [`add_random_sample`](Segment::add_random_sample).
///
/// The references stay valid for as long as the caller holds the guard the
/// sample was taken under; `substitute` retains its referential identity, so
/// it can be fed back to eviction by identity.
pub struct Sampled<'g, E: Element, P> {
    /// The sampled entry's key.
    pub key: &'g E::Key,
    /// The sampled entry's current representation.
    pub substitute: &'g Substitute<E, P>,
}

/// Outcome of a mutating segment operation.
pub(crate) struct Feedback<'g, E: Element, P> {
    /// The decoded prior element, when a mapping was found (and matched).
    pub(crate) old_element: Option<E>,
    /// The displaced representation, when one was pushed out of its slot.
    pub(crate) displaced: Option<&'g Substitute<E, P>>,
}

impl<E: Element, P> Feedback<'_, E, P> {
    fn empty() -> Self {
        Self {
            old_element: None,
            displaced: None,
        }
    }
}

/// One stripe: an independently locked hash table.
///
/// All operations take an already-spread hash; the store is responsible for
/// bit-spreading and stripe selection.
pub(crate) struct Segment<E: Element, F: SubstituteFactory<E>> {
    table: Atomic<Table<E, F::Proxy>>,
    pub(crate) lock: SegmentLock,
    pub(crate) count: AtomicUsize,
    pub(crate) mod_count: AtomicUsize,
    threshold: AtomicUsize,
    load_factor: f32,
    factory: Arc<F>,
    pub(crate) stats: TierCounters,
}

impl<E, F> Segment<E, F>
where
    E: Element,
    F: SubstituteFactory<E>,
{
    pub(crate) fn new(initial_capacity: usize, load_factor: f32, factory: Arc<F>) -> Self {
        Self {
            table: Atomic::new(Table::with_capacity(initial_capacity)),
            lock: SegmentLock::new(),
            count: AtomicUsize::new(0),
            mod_count: AtomicUsize::new(0),
            threshold: AtomicUsize::new((initial_capacity as f32 * load_factor) as usize),
            load_factor,
            factory,
            stats: TierCounters::default(),
        }
    }

    /// The current bucket array.
    pub(crate) fn table_snapshot<'g>(&self, guard: &'g Guard) -> &'g Table<E, F::Proxy> {
        // Never null after construction; superseded tables are reclaimed one
        // epoch after replacement, which this guard holds up.
        unsafe { self.table.load(Ordering::Acquire, guard).deref() }
    }

    /// Lock-free chain walk.
    fn find<'g>(
        &self,
        key: &E::Key,
        hash: u32,
        guard: &'g Guard,
    ) -> Option<&'g HashEntry<E, F::Proxy>> {
        let table = self.table_snapshot(guard);
        let mut node =
            table.buckets[bucket_index(hash, table.buckets.len())].load(Ordering::Acquire, guard);
        // Nodes reachable from a bucket head are fully published and only
        // reclaimed after this guard is dropped.
        while let Some(entry) = unsafe { node.as_ref() } {
            if entry.hash == hash && entry.key == *key {
                return Some(entry);
            }
            node = entry.next_shared(guard);
        }
        None
    }

    /// Decode and return the element mapped to `key`, recording tier stats.
    pub(crate) fn get(&self, key: &E::Key, hash: u32, guard: &Guard) -> Option<E> {
        match self.find(key, hash, guard) {
            Some(entry) => {
                let substitute = entry.load_slot(guard);
                match substitute {
                    Substitute::Element(_) => self.stats.record_heap_hit(),
                    Substitute::Proxy(_) => {
                        self.stats.record_heap_miss();
                        self.stats.record_disk_hit();
                    }
                }
                Some(self.factory.retrieve(key, substitute))
            }
            None => {
                self.stats.record_heap_miss();
                self.stats.record_disk_miss();
                None
            }
        }
    }

    /// Whether a mapping exists. No decode, no stats.
    pub(crate) fn contains(&self, key: &E::Key, hash: u32, guard: &Guard) -> bool {
        self.find(key, hash, guard).is_some()
    }

    /// The raw slot contents for `key`, undecoded and unrecorded.
    pub(crate) fn unretrieved_get<'g>(
        &self,
        key: &E::Key,
        hash: u32,
        guard: &'g Guard,
    ) -> Option<&'g Substitute<E, F::Proxy>> {
        self.find(key, hash, guard).map(|entry| entry.load_slot(guard))
    }

    /// Install `element`, encoding it through the factory.
    ///
    /// With `only_if_absent`, an existing mapping is left untouched and
    /// returned. Otherwise the prior representation is displaced and freed.
    pub(crate) fn put<'g>(
        &self,
        key: E::Key,
        hash: u32,
        element: E,
        only_if_absent: bool,
        guard: &'g Guard,
    ) -> Feedback<'g, E, F::Proxy> {
        let _write = self.lock.write();

        if let Some(entry) = self.find(&key, hash, guard) {
            let slot = entry.load_slot_shared(guard);
            let current = unsafe { slot.deref() };
            let old_element = self.factory.decode(&key, current);
            if only_if_absent {
                return Feedback {
                    old_element: Some(old_element),
                    displaced: None,
                };
            }
            let substitute = self.factory.create(&key, element);
            let displaced = entry.store_slot(substitute, guard);
            self.factory.free(current);
            unsafe { guard.defer_destroy(displaced) };
            return Feedback {
                old_element: Some(old_element),
                displaced: Some(current),
            };
        }

        self.insert_new(key, hash, |factory, key| factory.create(key, element), guard);
        Feedback::empty()
    }

    /// Directly install a caller-supplied substitute when `key` is unmapped.
    ///
    /// When the key is already present the offer is rejected and the
    /// substitute freed here, keeping the one-`free`-per-path discipline.
    pub(crate) fn put_raw_if_absent(
        &self,
        key: E::Key,
        hash: u32,
        substitute: Substitute<E, F::Proxy>,
        guard: &Guard,
    ) -> bool {
        let _write = self.lock.write();
        if self.find(&key, hash, guard).is_some() {
            self.factory.free(&substitute);
            return false;
        }
        self.insert_new(key, hash, move |_, _| substitute, guard);
        true
    }

    /// Link a new node at its bucket head. Caller holds the write lock and
    /// has verified the key is absent.
    fn insert_new<'g, M>(&self, key: E::Key, hash: u32, make: M, guard: &'g Guard)
    where
        M: FnOnce(&F, &E::Key) -> Substitute<E, F::Proxy>,
    {
        if self.count.load(Ordering::Relaxed) + 1 > self.threshold.load(Ordering::Relaxed) {
            self.rehash(guard);
        }
        let substitute = make(&self.factory, &key);
        let table = self.table_snapshot(guard);
        let index = bucket_index(hash, table.buckets.len());
        let first = table.buckets[index].load(Ordering::Acquire, guard);
        let node = Owned::new(HashEntry::new(key, hash, first, substitute));
        table.buckets[index].store(node, Ordering::Release);
        self.mod_count.fetch_add(1, Ordering::Release);
        self.count.fetch_add(1, Ordering::Release);
    }

    /// Replace the mapping for `key`, if one exists (and, when `matching`
    /// is supplied, if the decoded incumbent satisfies `cmp` against it).
    pub(crate) fn replace<'g, C>(
        &self,
        key: &E::Key,
        hash: u32,
        matching: Option<&E>,
        cmp: C,
        element: E,
        guard: &'g Guard,
    ) -> Feedback<'g, E, F::Proxy>
    where
        C: Fn(&E, &E) -> bool,
    {
        let _write = self.lock.write();
        let Some(entry) = self.find(key, hash, guard) else {
            return Feedback::empty();
        };
        let slot = entry.load_slot_shared(guard);
        let current = unsafe { slot.deref() };
        let old_element = self.factory.decode(key, current);
        if let Some(expected) = matching {
            if !cmp(&old_element, expected) {
                return Feedback::empty();
            }
        }
        let substitute = self.factory.create(key, element);
        let displaced = entry.store_slot(substitute, guard);
        self.factory.free(current);
        unsafe { guard.defer_destroy(displaced) };
        Feedback {
            old_element: Some(old_element),
            displaced: Some(current),
        }
    }

    /// Remove the mapping for `key`, if one exists (and, when `matching` is
    /// supplied, if the decoded incumbent satisfies `cmp` against it).
    pub(crate) fn remove<'g, C>(
        &self,
        key: &E::Key,
        hash: u32,
        matching: Option<&E>,
        cmp: C,
        guard: &'g Guard,
    ) -> Feedback<'g, E, F::Proxy>
    where
        C: Fn(&E, &E) -> bool,
    {
        let _write = self.lock.write();
        let table = self.table_snapshot(guard);
        let index = bucket_index(hash, table.buckets.len());
        let first = table.buckets[index].load(Ordering::Acquire, guard);

        let mut node = first;
        while let Some(entry) = unsafe { node.as_ref() } {
            if entry.hash == hash && entry.key == *key {
                let slot = entry.load_slot_shared(guard);
                let substitute = unsafe { slot.deref() };
                let element = self.factory.decode(key, substitute);
                if let Some(expected) = matching {
                    if !cmp(&element, expected) {
                        return Feedback::empty();
                    }
                }
                self.unlink(table, index, first, node, guard);
                self.factory.free(substitute);
                unsafe { guard.defer_destroy(slot) };
                return Feedback {
                    old_element: Some(element),
                    displaced: Some(substitute),
                };
            }
            node = entry.next_shared(guard);
        }
        Feedback::empty()
    }

    /// Remove the mapping for `key` when its current representation is
    /// `reference` by identity (or unconditionally when `None`), returning
    /// the decoded element.
    pub(crate) fn evict(
        &self,
        key: &E::Key,
        hash: u32,
        reference: Option<&Substitute<E, F::Proxy>>,
        guard: &Guard,
    ) -> Option<E> {
        let _write = self.lock.write();
        let table = self.table_snapshot(guard);
        let index = bucket_index(hash, table.buckets.len());
        let first = table.buckets[index].load(Ordering::Acquire, guard);

        let mut node = first;
        while let Some(entry) = unsafe { node.as_ref() } {
            if entry.hash == hash && entry.key == *key {
                let slot = entry.load_slot_shared(guard);
                if let Some(expected) = reference {
                    if slot.as_raw() != expected as *const Substitute<E, F::Proxy> {
                        return None;
                    }
                }
                let substitute = unsafe { slot.deref() };
                let element = self.factory.decode(key, substitute);
                self.unlink(table, index, first, node, guard);
                self.factory.free(substitute);
                unsafe { guard.defer_destroy(slot) };
                return Some(element);
            }
            node = entry.next_shared(guard);
        }
        None
    }

    /// Switch `key`'s representation from `expect` (by identity) to `fault`.
    ///
    /// Success frees `expect`; any failure (absent key, identity mismatch)
    /// frees `fault`. Returns the installed representation on success.
    pub(crate) fn fault<'g>(
        &self,
        key: &E::Key,
        hash: u32,
        expect: &Substitute<E, F::Proxy>,
        fault: Substitute<E, F::Proxy>,
        guard: &'g Guard,
    ) -> Option<&'g Substitute<E, F::Proxy>> {
        let _write = self.lock.write();
        self.fault_locked(key, hash, expect, fault, guard)
    }

    /// As [`fault`](Segment::fault), but gives up (freeing `fault`) instead
    /// of blocking on a contended write lock.
    pub(crate) fn try_fault<'g>(
        &self,
        key: &E::Key,
        hash: u32,
        expect: &Substitute<E, F::Proxy>,
        fault: Substitute<E, F::Proxy>,
        guard: &'g Guard,
    ) -> Option<&'g Substitute<E, F::Proxy>> {
        match self.lock.try_write() {
            Some(_write) => self.fault_locked(key, hash, expect, fault, guard),
            None => {
                self.factory.free(&fault);
                None
            }
        }
    }

    fn fault_locked<'g>(
        &self,
        key: &E::Key,
        hash: u32,
        expect: &Substitute<E, F::Proxy>,
        fault: Substitute<E, F::Proxy>,
        guard: &'g Guard,
    ) -> Option<&'g Substitute<E, F::Proxy>> {
        let Some(entry) = self.find(key, hash, guard) else {
            self.factory.free(&fault);
            return None;
        };
        let current = entry.load_slot_shared(guard);
        if current.as_raw() != expect as *const Substitute<E, F::Proxy> {
            self.factory.free(&fault);
            return None;
        }
        match entry.cas_slot(current, fault, guard) {
            Ok(installed) => {
                self.factory.free(expect);
                unsafe { guard.defer_destroy(current) };
                // Installed under the write lock; nothing can have displaced
                // it yet.
                Some(unsafe { installed.deref() })
            }
            Err(rejected) => {
                self.factory.free(&rejected);
                None
            }
        }
    }

    /// Unlink `victim` from its bucket by cloning the chain prefix in front
    /// of it. Published nodes are never re-linked, so concurrent readers
    /// keep walking a consistent chain; the clones share the originals'
    /// slot contents.
    fn unlink<'g>(
        &self,
        table: &'g Table<E, F::Proxy>,
        index: usize,
        first: Shared<'g, HashEntry<E, F::Proxy>>,
        victim: Shared<'g, HashEntry<E, F::Proxy>>,
        guard: &'g Guard,
    ) {
        self.mod_count.fetch_add(1, Ordering::Release);
        let victim_entry = unsafe { victim.deref() };
        let mut new_first = victim_entry.next_shared(guard);
        let mut node = first;
        while node != victim {
            let entry = unsafe { node.deref() };
            let clone = Owned::new(HashEntry::relink(entry, new_first, guard));
            new_first = clone.into_shared(guard);
            unsafe { guard.defer_destroy(node) };
            node = entry.next_shared(guard);
        }
        table.buckets[index].store(new_first, Ordering::Release);
        unsafe { guard.defer_destroy(victim) };
        self.count.fetch_sub(1, Ordering::Release);
    }

    /// Double the bucket array, redistributing chains Doug Lea style: the
    /// longest chain suffix that lands in a single new bucket is reused in
    /// place, everything in front of it is cloned into its new bucket.
    /// Caller holds the write lock.
    fn rehash(&self, guard: &Guard) {
        let old_table = self.table_snapshot(guard);
        let old_len = old_table.buckets.len();
        if old_len >= MAXIMUM_CAPACITY {
            return;
        }
        let new_len = old_len << 1;
        let mask = new_len - 1;
        let new_table = Table::with_capacity(new_len);

        for bucket in old_table.buckets.iter() {
            let first = bucket.load(Ordering::Acquire, guard);
            let Some(first_entry) = (unsafe { first.as_ref() }) else {
                continue;
            };
            let next = first_entry.next_shared(guard);
            let index = first_entry.hash as usize & mask;
            if next.is_null() {
                // Singleton chain, reusable as-is.
                new_table.buckets[index].store(first, Ordering::Relaxed);
                continue;
            }

            // Find the last run: the suffix whose nodes all map to one new
            // bucket. Those nodes move without cloning.
            let mut last_run = first;
            let mut last_index = index;
            let mut node = next;
            while let Some(entry) = unsafe { node.as_ref() } {
                let candidate = entry.hash as usize & mask;
                if candidate != last_index {
                    last_index = candidate;
                    last_run = node;
                }
                node = entry.next_shared(guard);
            }
            new_table.buckets[last_index].store(last_run, Ordering::Relaxed);

            // Clone everything in front of the last run into its new bucket.
            let mut node = first;
            while node != last_run {
                let entry = unsafe { node.deref() };
                let index = entry.hash as usize & mask;
                let head = new_table.buckets[index].load(Ordering::Relaxed, guard);
                let clone = Owned::new(HashEntry::relink(entry, head, guard));
                new_table.buckets[index].store(clone, Ordering::Relaxed);
                unsafe { guard.defer_destroy(node) };
                node = entry.next_shared(guard);
            }
        }

        self.threshold
            .store((new_len as f32 * self.load_factor) as usize, Ordering::Relaxed);
        let superseded = self.table.swap(Owned::new(new_table), Ordering::AcqRel, guard);
        unsafe { guard.defer_destroy(superseded) };
        self.mod_count.fetch_add(1, Ordering::Release);
        trace!("segment rehashed: {} -> {} buckets", old_len, new_len);
    }

    /// Remove every mapping, freeing every substitute.
    pub(crate) fn clear(&self, guard: &Guard) {
        let _write = self.lock.write();
        if self.count.load(Ordering::Relaxed) == 0 {
            return;
        }
        let table = self.table_snapshot(guard);
        for bucket in table.buckets.iter() {
            let mut node = bucket.load(Ordering::Acquire, guard);
            if node.is_null() {
                continue;
            }
            bucket.store(Shared::null(), Ordering::Release);
            while let Some(entry) = unsafe { node.as_ref() } {
                let slot = entry.load_slot_shared(guard);
                self.factory.free(unsafe { slot.deref() });
                unsafe {
                    guard.defer_destroy(slot);
                    guard.defer_destroy(node);
                }
                node = entry.next_shared(guard);
            }
        }
        self.mod_count.fetch_add(1, Ordering::Release);
        self.count.store(0, Ordering::Release);
    }

    /// Append entries passing `filter` to `out`, scanning buckets cyclically
    /// from a seed-derived start, until `out` reaches `target` (checked per
    /// bucket) or the whole table has been visited.
    pub(crate) fn add_random_sample<'g, Filter>(
        &self,
        filter: &Filter,
        target: usize,
        out: &mut Vec<Sampled<'g, E, F::Proxy>>,
        seed: u32,
        guard: &'g Guard,
    ) where
        Filter: Fn(&Substitute<E, F::Proxy>) -> bool,
    {
        let _read = self.lock.read();
        if self.count.load(Ordering::Relaxed) == 0 {
            return;
        }
        let table = self.table_snapshot(guard);
        let len = table.buckets.len();
        // Start from the seed's top bits so distinct seeds fan out across
        // the table.
        let shift = 32 - len.trailing_zeros();
        let start = ((seed as u64) >> shift) as usize & (len - 1);
        let mut index = start;
        loop {
            let mut node = table.buckets[index].load(Ordering::Acquire, guard);
            while let Some(entry) = unsafe { node.as_ref() } {
                let substitute = entry.load_slot(guard);
                if filter(substitute) {
                    out.push(Sampled {
                        key: &entry.key,
                        substitute,
                    });
                }
                node = entry.next_shared(guard);
            }
            if out.len() >= target {
                return;
            }
            index = (index + 1) & (len - 1);
            if index == start {
                return;
            }
        }
    }

    /// Decode through this segment's factory.
    pub(crate) fn decode(&self, key: &E::Key, substitute: &Substitute<E, F::Proxy>) -> E {
        self.factory.decode(key, substitute)
    }
}

impl<E, F> Drop for Segment<E, F>
where
    E: Element,
    F: SubstituteFactory<E>,
{
    fn drop(&mut self) {
        // Exclusive access: the store is going away. Remaining substitutes
        // still get their exactly-once `free`.
        let guard = unsafe { crossbeam_epoch::unprotected() };
        let table = self.table.swap(Shared::null(), Ordering::AcqRel, guard);
        if table.is_null() {
            return;
        }
        let table = unsafe { table.into_owned() };
        for bucket in table.buckets.iter() {
            let mut node = bucket.swap(Shared::null(), Ordering::Relaxed, guard);
            while !node.is_null() {
                let entry = unsafe { node.into_owned() };
                let slot = entry.load_slot_shared(guard);
                if !slot.is_null() {
                    let substitute = unsafe { slot.into_owned() };
                    self.factory.free(&substitute);
                }
                node = entry.next_shared(guard);
            }
        }
    }
}
