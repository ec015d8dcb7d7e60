//! Hash chain nodes.

use crossbeam_epoch::{Atomic, Guard, Shared};
use std::sync::atomic::Ordering;

use crate::factory::{Element, Substitute};

/// One node of a bucket chain.
///
/// `key`, `hash` and `next` are immutable once the node is published by a
/// release store of its bucket head; concurrent readers therefore always see
/// a fully initialized node and a consistent chain. Only the value slot
/// mutates afterwards, and only under the owning segment's write lock.
pub(crate) struct HashEntry<E: Element, P> {
    pub(crate) key: E::Key,
    pub(crate) hash: u32,
    pub(crate) next: Atomic<HashEntry<E, P>>,
    slot: Atomic<Substitute<E, P>>,
}

impl<E: Element, P> HashEntry<E, P> {
    /// A fresh node owning a newly allocated substitute.
    pub(crate) fn new(
        key: E::Key,
        hash: u32,
        next: Shared<'_, HashEntry<E, P>>,
        substitute: Substitute<E, P>,
    ) -> Self {
        Self {
            key,
            hash,
            next: Atomic::from(next),
            slot: Atomic::new(substitute),
        }
    }

    /// A relinked copy of `source` sharing its current slot contents.
    ///
    /// Used when unlinking a chain prefix (removal) or redistributing a
    /// chain (rehash); the substitute is not duplicated, both nodes point at
    /// the same allocation and the displaced original node is reclaimed
    /// without touching it.
    pub(crate) fn relink(
        source: &HashEntry<E, P>,
        next: Shared<'_, HashEntry<E, P>>,
        guard: &Guard,
    ) -> Self {
        Self {
            key: source.key.clone(),
            hash: source.hash,
            next: Atomic::from(next),
            slot: Atomic::from(source.load_slot_shared(guard)),
        }
    }

    /// Acquire-load the raw slot pointer.
    #[inline]
    pub(crate) fn load_slot_shared<'g>(&self, guard: &'g Guard) -> Shared<'g, Substitute<E, P>> {
        self.slot.load(Ordering::Acquire, guard)
    }

    /// Acquire-load the slot contents. The slot is never empty while the
    /// node is reachable, so this always yields a value.
    #[inline]
    pub(crate) fn load_slot<'g>(&self, guard: &'g Guard) -> &'g Substitute<E, P> {
        // The slot is initialized before publication and only ever replaced,
        // never cleared; reclamation is deferred past this guard.
        unsafe { self.load_slot_shared(guard).deref() }
    }

    /// Release-store a new substitute into the slot. Caller must hold the
    /// segment write lock and reclaim the displaced pointer.
    #[inline]
    pub(crate) fn store_slot<'g>(
        &self,
        substitute: Substitute<E, P>,
        guard: &'g Guard,
    ) -> Shared<'g, Substitute<E, P>> {
        self.slot
            .swap(crossbeam_epoch::Owned::new(substitute), Ordering::AcqRel, guard)
    }

    /// Compare-and-swap the slot from `current` to `new`.
    ///
    /// On success returns the installed pointer; on failure hands the
    /// not-installed substitute back to the caller. Caller must hold the
    /// segment write lock and reclaim the displaced pointer on success.
    pub(crate) fn cas_slot<'g>(
        &self,
        current: Shared<'_, Substitute<E, P>>,
        new: Substitute<E, P>,
        guard: &'g Guard,
    ) -> Result<Shared<'g, Substitute<E, P>>, Substitute<E, P>> {
        match self.slot.compare_exchange(
            current,
            crossbeam_epoch::Owned::new(new),
            Ordering::AcqRel,
            Ordering::Acquire,
            guard,
        ) {
            Ok(_) => Ok(self.slot.load(Ordering::Acquire, guard)),
            Err(err) => Err(*err.new.into_box()),
        }
    }

    /// The next node in the chain.
    #[inline]
    pub(crate) fn next_shared<'g>(&self, guard: &'g Guard) -> Shared<'g, HashEntry<E, P>> {
        self.next.load(Ordering::Acquire, guard)
    }
}
