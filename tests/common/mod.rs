//! Shared fixtures: a small element type, a deterministic pass-through
//! hasher, and a counting factory with a proxy representation.

#![allow(dead_code)]

use std::hash::{BuildHasher, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use resident_cache::{spread_hash, Element, StoreHandle, Substitute, SubstituteFactory};

/// Cached value used across the suites.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestElement {
    pub key: u32,
    pub value: i64,
}

impl TestElement {
    pub fn new(key: u32, value: i64) -> Self {
        Self { key, value }
    }
}

impl Element for TestElement {
    type Key = u32;

    fn key(&self) -> &u32 {
        &self.key
    }
}

/// Hasher that reports the written integer unchanged, so a `u32` key's hash
/// is the key itself and segment/bucket placement is computable in tests.
#[derive(Default)]
pub struct RawHasher(u64);

impl Hasher for RawHasher {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.0 = (self.0 << 8) | u64::from(byte);
        }
    }

    fn write_u32(&mut self, value: u32) {
        self.0 = u64::from(value);
    }

    fn write_u64(&mut self, value: u64) {
        self.0 = value;
    }
}

/// Build-hasher for [`RawHasher`].
#[derive(Clone, Default)]
pub struct RawState;

impl BuildHasher for RawState {
    type Hasher = RawHasher;

    fn build_hasher(&self) -> RawHasher {
        RawHasher::default()
    }
}

/// The segment a raw `u32` key lands in under the default 64-segment layout
/// with the [`RawState`] hasher.
pub fn segment_of(key: u32) -> usize {
    (spread_hash(key) >> 26) as usize
}

/// Two distinct keys that share both the segment and the initial bucket
/// under the default layout (64 segments, 16 buckets).
pub fn colliding_pair() -> (u32, u32) {
    let first = 1u32;
    let spread = spread_hash(first);
    for candidate in 2..1_000_000u32 {
        let other = spread_hash(candidate);
        if other >> 26 == spread >> 26 && other & 15 == spread & 15 {
            return (first, candidate);
        }
    }
    unreachable!("no colliding key found in the search range");
}

/// Observable factory state, held outside the store so suites can assert on
/// it after handing the factory over.
#[derive(Default)]
pub struct FactoryProbe {
    pub created: AtomicUsize,
    pub freed: AtomicUsize,
    pub bound: AtomicUsize,
    pub unbound: AtomicUsize,
    pub handle: Mutex<Option<Weak<dyn StoreHandle<TestElement, i64>>>>,
}

impl FactoryProbe {
    pub fn created_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn freed_count(&self) -> usize {
        self.freed.load(Ordering::SeqCst)
    }

    pub fn store_handle(&self) -> Option<Weak<dyn StoreHandle<TestElement, i64>>> {
        self.handle.lock().unwrap().clone()
    }
}

/// Factory with a proxy representation and full call accounting.
///
/// `create` keeps elements on the heap; proxies enter the store through
/// `put_raw_if_absent` or `fault` and decode back to an element carrying the
/// proxied value.
#[derive(Default)]
pub struct TestFactory {
    probe: Arc<FactoryProbe>,
}

impl TestFactory {
    /// A factory plus the probe observing it.
    pub fn with_probe() -> (Self, Arc<FactoryProbe>) {
        let probe = Arc::new(FactoryProbe::default());
        (
            Self {
                probe: Arc::clone(&probe),
            },
            probe,
        )
    }
}

impl SubstituteFactory<TestElement> for TestFactory {
    type Proxy = i64;

    fn create(&self, _key: &u32, element: TestElement) -> Substitute<TestElement, i64> {
        self.probe.created.fetch_add(1, Ordering::SeqCst);
        Substitute::Element(element)
    }

    fn decode(&self, key: &u32, substitute: &Substitute<TestElement, i64>) -> TestElement {
        match substitute {
            Substitute::Element(element) => element.clone(),
            Substitute::Proxy(value) => TestElement::new(*key, *value),
        }
    }

    fn free(&self, _substitute: &Substitute<TestElement, i64>) {
        self.probe.freed.fetch_add(1, Ordering::SeqCst);
    }

    fn created(&self, _substitute: &Substitute<TestElement, i64>) -> bool {
        true
    }

    fn bind(&self, store: Weak<dyn StoreHandle<TestElement, i64>>) {
        self.probe.bound.fetch_add(1, Ordering::SeqCst);
        *self.probe.handle.lock().unwrap() = Some(store);
    }

    fn unbind(&self) {
        self.probe.unbound.fetch_add(1, Ordering::SeqCst);
    }
}

/// Tiny deterministic generator for concurrency suites.
pub struct Lcg(pub u64);

impl Lcg {
    pub fn next_u32(&mut self) -> u32 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 32) as u32
    }
}
