//! Weakly consistent iteration and the key/element views.
//!
//! Iteration visits segments from the highest index down to zero (the
//! legacy order, which callers observe), and within each segment walks
//! buckets then chains. It never fails on concurrent modification: each
//! bucket head is a snapshot at the moment it was read, so entries inserted
//! or removed mid-traversal may be skipped or visited twice.

use std::hash::BuildHasher;
use std::sync::atomic::Ordering;

use crossbeam_epoch::{Guard, Shared};

use crate::entry::HashEntry;
use crate::factory::{Element, SubstituteFactory};
use crate::segment::{Segment, Table};
use crate::store::ResidentStore;

/// Internal traversal over every reachable entry.
pub(crate) struct EntryIter<'g, E: Element, F: SubstituteFactory<E>> {
    segments: &'g [Segment<E, F>],
    guard: &'g Guard,
    /// Count of segments not yet entered; segments are visited descending.
    remaining: usize,
    segment: Option<&'g Segment<E, F>>,
    table: Option<&'g Table<E, F::Proxy>>,
    bucket: usize,
    node: Shared<'g, HashEntry<E, F::Proxy>>,
}

impl<'g, E, F> EntryIter<'g, E, F>
where
    E: Element,
    F: SubstituteFactory<E>,
{
    pub(crate) fn new(segments: &'g [Segment<E, F>], guard: &'g Guard) -> Self {
        Self {
            segments,
            guard,
            remaining: segments.len(),
            segment: None,
            table: None,
            bucket: 0,
            node: Shared::null(),
        }
    }

    pub(crate) fn guard(&self) -> &'g Guard {
        self.guard
    }
}

impl<'g, E, F> Iterator for EntryIter<'g, E, F>
where
    E: Element,
    F: SubstituteFactory<E>,
{
    type Item = (&'g Segment<E, F>, &'g HashEntry<E, F::Proxy>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            // Reachable nodes stay valid until the guard is dropped.
            if let Some(entry) = unsafe { self.node.as_ref() } {
                self.node = entry.next_shared(self.guard);
                let segment = self.segment.expect("entry without a current segment");
                return Some((segment, entry));
            }

            if let Some(table) = self.table {
                if self.bucket < table.buckets.len() {
                    self.node = table.buckets[self.bucket].load(Ordering::Acquire, self.guard);
                    self.bucket += 1;
                    continue;
                }
            }

            if self.remaining == 0 {
                return None;
            }
            self.remaining -= 1;
            let segment = &self.segments[self.remaining];
            self.segment = Some(segment);
            self.table = Some(segment.table_snapshot(self.guard));
            self.bucket = 0;
            self.node = Shared::null();
        }
    }
}

/// Iterator over the store's keys.
pub struct KeyIter<'g, E: Element, F: SubstituteFactory<E>> {
    inner: EntryIter<'g, E, F>,
}

impl<'g, E, F> Iterator for KeyIter<'g, E, F>
where
    E: Element,
    F: SubstituteFactory<E>,
{
    type Item = &'g E::Key;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, entry)| &entry.key)
    }
}

/// Iterator over the store's elements, decoded through the factory.
pub struct ElementIter<'g, E: Element, F: SubstituteFactory<E>> {
    inner: EntryIter<'g, E, F>,
}

impl<'g, E, F> Iterator for ElementIter<'g, E, F>
where
    E: Element,
    F: SubstituteFactory<E>,
{
    type Item = E;

    fn next(&mut self) -> Option<Self::Item> {
        let guard = self.inner.guard();
        self.inner
            .next()
            .map(|(segment, entry)| segment.decode(&entry.key, entry.load_slot(guard)))
    }
}

/// Live view over the store's keys.
///
/// Reads and removals delegate to the store; the view itself is stateless.
pub struct KeyView<'s, E, F, S = ahash::RandomState>
where
    E: Element,
    F: SubstituteFactory<E>,
{
    store: &'s ResidentStore<E, F, S>,
}

impl<'s, E, F, S> KeyView<'s, E, F, S>
where
    E: Element,
    F: SubstituteFactory<E>,
    S: BuildHasher + Send + Sync + 'static,
{
    pub(crate) fn new(store: &'s ResidentStore<E, F, S>) -> Self {
        Self { store }
    }

    /// The number of keys, as [`ResidentStore::len`].
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Whether `key` is present.
    pub fn contains(&self, key: &E::Key) -> bool {
        self.store.contains_key(key)
    }

    /// Remove `key`'s mapping; returns whether one existed.
    pub fn remove(&self, key: &E::Key) -> bool {
        self.store.remove(key).is_some()
    }

    /// Remove every mapping.
    pub fn clear(&self) {
        self.store.remove_all();
    }

    /// Iterate over the keys under `guard`.
    pub fn iter<'g>(&self, guard: &'g Guard) -> KeyIter<'g, E, F>
    where
        's: 'g,
    {
        KeyIter {
            inner: EntryIter::new(self.store.segments(), guard),
        }
    }
}

/// Live, iteration-only view over the store's decoded elements.
pub struct ElementView<'s, E, F, S = ahash::RandomState>
where
    E: Element,
    F: SubstituteFactory<E>,
{
    store: &'s ResidentStore<E, F, S>,
}

impl<'s, E, F, S> ElementView<'s, E, F, S>
where
    E: Element,
    F: SubstituteFactory<E>,
    S: BuildHasher + Send + Sync + 'static,
{
    pub(crate) fn new(store: &'s ResidentStore<E, F, S>) -> Self {
        Self { store }
    }

    /// The number of elements, as [`ResidentStore::len`].
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether the store holds no elements.
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    /// Remove every mapping.
    pub fn clear(&self) {
        self.store.remove_all();
    }

    /// Iterate over decoded elements under `guard`.
    pub fn iter<'g>(&self, guard: &'g Guard) -> ElementIter<'g, E, F>
    where
        's: 'g,
    {
        ElementIter {
            inner: EntryIter::new(self.store.segments(), guard),
        }
    }
}
