//! In-process mutation notifications.

use crate::factory::{Element, Substitute};

/// Observer of committed store mutations.
///
/// Listeners run synchronously on the mutating thread, after the segment
/// operation commits and outside the segment lock, in registration order.
/// They must not re-enter the store for the same key from within a
/// callback while an outer caller still holds that key's segment write
/// lock; the store does not detect such cycles.
///
/// Displaced substitutes handed to callbacks have already had their
/// external resources released via
/// [`SubstituteFactory::free`](crate::SubstituteFactory::free); the values
/// themselves stay readable for the duration of the callback.
pub trait StoreEventListener<E: Element, P>: Send + Sync {
    /// A successful representation switch installed `fault` in place of
    /// `expect` for `key`.
    fn on_fault(&self, key: &E::Key, expect: &Substitute<E, P>, fault: &Substitute<E, P>) {
        let _ = (key, expect, fault);
    }

    /// `key`'s mapping was evicted.
    fn on_evict(&self, key: &E::Key, evicted: &E) {
        let _ = (key, evicted);
    }

    /// An existing mapping was overwritten; `displaced` is the
    /// representation that was pushed out.
    fn on_update(&self, displaced: &Substitute<E, P>, new_element: &E) {
        let _ = (displaced, new_element);
    }

    /// A mapping was removed; `displaced` is the representation that was
    /// removed and `removed` its decoded element.
    fn on_remove(&self, displaced: &Substitute<E, P>, removed: &E) {
        let _ = (displaced, removed);
    }
}
