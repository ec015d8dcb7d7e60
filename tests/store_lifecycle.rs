//! Lifecycle: bind/unbind, status transitions, and the factory's weak
//! store handle.

mod common;

use std::sync::atomic::Ordering;

use common::{RawState, TestElement, TestFactory};
use resident_cache::{ResidentStore, Status, StoreConfig, StoreHandle, Substitute};

#[test]
fn construction_binds_the_factory_and_comes_up_alive() {
    let (factory, probe) = TestFactory::with_probe();
    let store = ResidentStore::with_config_and_hasher(factory, StoreConfig::default(), RawState);

    assert_eq!(store.status(), Status::Alive);
    assert_eq!(probe.bound.load(Ordering::SeqCst), 1);
    assert_eq!(probe.unbound.load(Ordering::SeqCst), 0);
}

#[test]
fn dispose_is_idempotent_and_unbinds_at_most_once() {
    let (factory, probe) = TestFactory::with_probe();
    let store = ResidentStore::with_config_and_hasher(factory, StoreConfig::default(), RawState);

    store.dispose();
    assert_eq!(store.status(), Status::Shutdown);
    store.dispose();
    store.dispose();
    assert_eq!(store.status(), Status::Shutdown);
    assert_eq!(probe.unbound.load(Ordering::SeqCst), 1);
}

#[test]
fn factory_reenters_the_store_through_its_weak_handle() {
    let (factory, probe) = TestFactory::with_probe();
    let store = ResidentStore::with_config_and_hasher(factory, StoreConfig::default(), RawState);
    store.put(TestElement::new(1, 1));

    let weak = probe.store_handle().expect("bind delivered a handle");
    let handle = weak.upgrade().expect("store is alive");

    assert!(handle.contains_key(&1));
    assert_eq!(handle.status(), Status::Alive);

    // Raw insert and identity-checked eviction through the handle.
    assert!(handle.put_raw_if_absent(2, Substitute::Proxy(20)));
    assert_eq!(store.get(&2).unwrap().value, 20);
    assert!(handle.evict(&2, None));
    assert!(!store.contains_key(&2));

    // A representation switch through the handle.
    let guard = store.guard();
    let expect = store.unretrieved_get(&1, &guard).unwrap();
    assert!(handle.fault(&1, expect, Substitute::Proxy(10)));
    assert!(store.is_element_on_disk(&1));

    drop(handle);
    drop(guard);
    drop(store);
    // With every strong reference gone the handle no longer upgrades.
    assert!(weak.upgrade().is_none());
}

#[test]
fn dropping_the_store_frees_residual_substitutes() {
    let (factory, probe) = TestFactory::with_probe();
    {
        let store =
            ResidentStore::with_config_and_hasher(factory, StoreConfig::default(), RawState);
        for key in 0..100u32 {
            store.put(TestElement::new(key, 1));
        }
        assert_eq!(probe.created_count(), 100);
        assert_eq!(probe.freed_count(), 0);
    }
    assert_eq!(
        probe.freed_count(),
        100,
        "dropping the store frees every remaining substitute exactly once"
    );
}

#[test]
fn status_is_observable_while_operations_continue() {
    let (factory, _probe) = TestFactory::with_probe();
    let store = ResidentStore::with_config_and_hasher(factory, StoreConfig::default(), RawState);

    store.put(TestElement::new(1, 1));
    store.dispose();

    // Dispose does not tear down the map itself.
    assert_eq!(store.status(), Status::Shutdown);
    assert_eq!(store.get(&1).unwrap().value, 1);
}
