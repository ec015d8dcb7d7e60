//! The substitute-representation protocol.
//!
//! A value slot never stores "the value"; it stores a [`Substitute`] —
//! either the cached element itself or an opaque proxy standing in for it
//! (typically a pointer into an external disk store). A
//! [`SubstituteFactory`] owns the translation between the two and is handed
//! every displaced substitute exactly once for resource release.

use std::hash::Hash;
use std::sync::Weak;

use crate::store::Status;

/// A caller-visible cached value: key, payload and whatever metadata the
/// cache layer tracks (creation time, hit count, ...). Opaque to the store
/// apart from key derivation.
///
/// `Clone` is expected to be cheap; element types that are expensive to copy
/// should wrap their payload in `Arc`.
pub trait Element: Clone + Send + Sync + 'static {
    /// The identity of this element.
    type Key: Hash + Eq + Clone + Send + Sync + 'static;

    /// The key this element is cached under.
    fn key(&self) -> &Self::Key;
}

/// One representation of a value slot's contents.
///
/// Exactly one substitute occupies a slot at any time. The `Element` variant
/// is the identity representation (the element lives in the heap); `Proxy`
/// is whatever stand-in a [`SubstituteFactory`] produced.
#[derive(Debug)]
pub enum Substitute<E, P> {
    /// The element itself, stored in place.
    Element(E),
    /// A factory-produced stand-in, e.g. an on-disk location.
    Proxy(P),
}

impl<E, P> Substitute<E, P> {
    /// Whether this is the identity representation.
    pub fn is_element(&self) -> bool {
        matches!(self, Substitute::Element(_))
    }

    /// The element, when stored in identity form.
    pub fn as_element(&self) -> Option<&E> {
        match self {
            Substitute::Element(element) => Some(element),
            Substitute::Proxy(_) => None,
        }
    }

    /// The proxy, when stored in proxy form.
    pub fn as_proxy(&self) -> Option<&P> {
        match self {
            Substitute::Element(_) => None,
            Substitute::Proxy(proxy) => Some(proxy),
        }
    }
}

/// Encodes elements into substitutes and back.
///
/// All operations are called by the store. `create` and `decode`/`retrieve`
/// may be expensive (they are allowed to touch external storage) and are
/// treated as non-failing: a factory that cannot service a call should
/// panic, and the panic propagates to the caller of the triggering store
/// operation.
///
/// Resource discipline: every substitute ever installed in a slot is passed
/// to [`free`](SubstituteFactory::free) exactly once, by the segment that
/// displaces it. Memory reclamation of the substitute value itself is
/// deferred by the store until concurrent readers are done; `free` is only
/// the hook for external resources such as disk blocks.
pub trait SubstituteFactory<E: Element>: Send + Sync + 'static {
    /// The proxy representation this factory produces.
    type Proxy: Send + Sync + 'static;

    /// Encode a freshly installed element.
    fn create(&self, key: &E::Key, element: E) -> Substitute<E, Self::Proxy>;

    /// Materialize the logical element behind `substitute`.
    fn decode(&self, key: &E::Key, substitute: &Substitute<E, Self::Proxy>) -> E;

    /// Like [`decode`](SubstituteFactory::decode), but records a hit against
    /// the substitute's tier in whatever accounting the factory keeps.
    fn retrieve(&self, key: &E::Key, substitute: &Substitute<E, Self::Proxy>) -> E {
        self.decode(key, substitute)
    }

    /// Release external resources held by a displaced substitute.
    fn free(&self, substitute: &Substitute<E, Self::Proxy>) {
        let _ = substitute;
    }

    /// Whether this factory produced `substitute`.
    fn created(&self, substitute: &Substitute<E, Self::Proxy>) -> bool;

    /// Called once when the store comes alive, with a weak handle the
    /// factory may retain to re-enter the store (fault, evict, raw insert).
    fn bind(&self, store: Weak<dyn StoreHandle<E, Self::Proxy>>) {
        let _ = store;
    }

    /// Called at most once, when the store shuts down.
    fn unbind(&self) {}
}

/// The narrow, object-safe view of a store that a factory may hold.
///
/// This is the explicit handle that breaks the store/factory reference
/// cycle: factories receive it as a `Weak` in
/// [`SubstituteFactory::bind`] and never own the store.
pub trait StoreHandle<E: Element, P>: Send + Sync {
    /// Atomically switch `expect` for `fault` under the key's segment lock;
    /// see [`ResidentStore::fault`](crate::ResidentStore::fault).
    fn fault(&self, key: &E::Key, expect: &Substitute<E, P>, fault: Substitute<E, P>) -> bool;

    /// As [`fault`](StoreHandle::fault), but gives up instead of blocking on
    /// a contended segment lock.
    fn try_fault(&self, key: &E::Key, expect: &Substitute<E, P>, fault: Substitute<E, P>) -> bool;

    /// Remove the mapping if its current substitute is identical (by
    /// reference) to `substitute`, or unconditionally when `None`.
    fn evict(&self, key: &E::Key, substitute: Option<&Substitute<E, P>>) -> bool;

    /// Install a caller-supplied substitute for a key with no mapping.
    fn put_raw_if_absent(&self, key: E::Key, substitute: Substitute<E, P>) -> bool;

    /// Whether a mapping exists for `key`.
    fn contains_key(&self, key: &E::Key) -> bool;

    /// The store's lifecycle status.
    fn status(&self) -> Status;
}

/// The proxy type of factories that never produce proxies.
///
/// Uninhabited: a `Substitute<E, NoProxy>` is always the element itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoProxy {}

/// The identity factory: substitutes *are* the elements.
///
/// Used for heap-only configurations, where a slot always holds the element
/// in place and decode is a clone.
#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityFactory;

impl<E: Element> SubstituteFactory<E> for IdentityFactory {
    type Proxy = NoProxy;

    fn create(&self, _key: &E::Key, element: E) -> Substitute<E, NoProxy> {
        Substitute::Element(element)
    }

    fn decode(&self, _key: &E::Key, substitute: &Substitute<E, NoProxy>) -> E {
        match substitute {
            Substitute::Element(element) => element.clone(),
            Substitute::Proxy(proxy) => match *proxy {},
        }
    }

    fn created(&self, substitute: &Substitute<E, NoProxy>) -> bool {
        substitute.is_element()
    }
}
