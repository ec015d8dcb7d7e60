//! Single-threaded semantics of the store surface.

mod common;

use common::{colliding_pair, RawState, TestElement, TestFactory};
use resident_cache::{ResidentStore, StoreConfig, Substitute};

fn store() -> std::sync::Arc<ResidentStore<TestElement, TestFactory, RawState>> {
    ResidentStore::with_config_and_hasher(TestFactory::default(), StoreConfig::default(), RawState)
}

#[test]
fn put_then_get_returns_the_payload() {
    let store = store();
    assert!(store.put(TestElement::new(1, 1)));
    assert_eq!(store.get(&1).unwrap().value, 1);
    assert_eq!(store.len(), 1);
}

#[test]
fn put_over_existing_returns_false_and_overwrites() {
    let store = store();
    assert!(store.put(TestElement::new(1, 1)));
    assert!(!store.put(TestElement::new(1, 2)));
    assert_eq!(store.get(&1).unwrap().value, 2);
    assert_eq!(store.len(), 1);
}

#[test]
fn remove_returns_the_element_and_empties_the_store() {
    let store = store();
    store.put(TestElement::new(1, 1));
    assert_eq!(store.remove(&1).unwrap().value, 1);
    assert!(store.get(&1).is_none());
    assert_eq!(store.len(), 0);
    assert!(store.is_empty());
    assert!(store.remove(&1).is_none());
}

#[test]
fn sharing_a_bucket_does_not_entangle_mappings() {
    let (a, b) = colliding_pair();
    let store = store();
    store.put(TestElement::new(a, 10));
    store.put(TestElement::new(b, 20));
    assert_eq!(store.len(), 2);

    assert_eq!(store.remove(&a).unwrap().value, 10);
    assert_eq!(store.get(&b).unwrap().value, 20);
    assert!(store.get(&a).is_none());
}

#[test]
fn put_if_absent_keeps_the_incumbent() {
    let store = store();
    assert!(store.put_if_absent(TestElement::new(1, 1)).is_none());
    let incumbent = store.put_if_absent(TestElement::new(1, 2)).unwrap();
    assert_eq!(incumbent.value, 1);
    assert_eq!(store.get(&1).unwrap().value, 1);
}

#[test]
fn replace_requires_a_mapping() {
    let store = store();
    assert!(store.replace(TestElement::new(1, 1)).is_none());
    assert!(!store.contains_key(&1));

    store.put(TestElement::new(1, 1));
    assert_eq!(store.replace(TestElement::new(1, 2)).unwrap().value, 1);
    assert_eq!(store.get(&1).unwrap().value, 2);
}

#[test]
fn conditional_replace_and_remove_use_the_comparator() {
    let store = store();
    let by_value = |a: &TestElement, b: &TestElement| a.value == b.value;

    store.put(TestElement::new(1, 1));
    assert!(!store.replace_if(&TestElement::new(1, 99), TestElement::new(1, 2), by_value));
    assert!(store.replace_if(&TestElement::new(1, 1), TestElement::new(1, 2), by_value));
    assert_eq!(store.get(&1).unwrap().value, 2);

    assert!(store.remove_element(&TestElement::new(1, 99), by_value).is_none());
    assert_eq!(
        store.remove_element(&TestElement::new(1, 2), by_value).unwrap().value,
        2
    );
    assert!(store.is_empty());
}

#[test]
fn contains_key_records_no_tier_statistics() {
    let store = store();
    store.put(TestElement::new(1, 1));
    let before = store.tier_metrics();
    assert!(store.contains_key(&1));
    assert!(!store.contains_key(&2));
    assert_eq!(store.tier_metrics(), before);
}

#[test]
fn get_records_tier_statistics() {
    let store = store();
    store.put(TestElement::new(1, 1));
    store.get(&1);
    store.get(&2);

    let metrics = store.tier_metrics();
    assert_eq!(metrics.heap_hits, 1);
    assert_eq!(metrics.heap_misses, 1);
    assert_eq!(metrics.disk_misses, 1);
    assert_eq!(metrics.disk_hits, 0);
    assert!(metrics.heap_hit_ratio() > 0.49 && metrics.heap_hit_ratio() < 0.51);
}

#[test]
fn raw_proxies_read_back_through_the_factory() {
    let store = store();
    assert!(store.put_raw_if_absent(5, Substitute::Proxy(42)));
    assert!(store.is_element_on_disk(&5));
    assert!(!store.is_element_on_heap(&5));

    // Decoded through the factory: the proxy carries the value.
    assert_eq!(store.get(&5).unwrap(), TestElement::new(5, 42));
    let metrics = store.tier_metrics();
    assert_eq!(metrics.disk_hits, 1);
    assert_eq!(metrics.heap_misses, 1);

    // A second raw offer for the same key is rejected.
    assert!(!store.put_raw_if_absent(5, Substitute::Proxy(43)));
    assert_eq!(store.get(&5).unwrap().value, 42);
}

#[test]
fn heap_mappings_report_their_tier() {
    let store = store();
    store.put(TestElement::new(1, 1));
    assert!(store.is_element_on_heap(&1));
    assert!(!store.is_element_on_disk(&1));
    assert!(!store.is_element_on_heap(&2));
    assert!(!store.is_element_on_disk(&2));
}

#[test]
fn unretrieved_get_exposes_the_raw_slot() {
    let store = store();
    store.put(TestElement::new(1, 7));

    let guard = store.guard();
    let substitute = store.unretrieved_get(&1, &guard).unwrap();
    assert_eq!(substitute.as_element().unwrap().value, 7);
    assert!(store.unretrieved_get(&2, &guard).is_none());
}

#[test]
fn get_quiet_behaves_like_get() {
    let store = store();
    store.put(TestElement::new(1, 1));
    assert_eq!(store.get_quiet(&1), store.get(&1));
    assert!(store.get_quiet(&2).is_none());
}

#[test]
fn keys_returns_a_point_in_time_copy() {
    let store = store();
    for key in 0..100u32 {
        store.put(TestElement::new(key, i64::from(key)));
    }
    let mut keys = store.keys();
    keys.sort_unstable();
    assert_eq!(keys, (0..100).collect::<Vec<_>>());

    // Mutations after the copy do not affect it.
    store.remove_all();
    assert_eq!(keys.len(), 100);
    assert_eq!(store.len(), 0);
}

#[test]
fn remove_all_clears_every_segment() {
    let store = store();
    for key in 0..1000u32 {
        store.put(TestElement::new(key, i64::from(key)));
    }
    assert_eq!(store.len(), 1000);
    store.remove_all();
    assert_eq!(store.len(), 0);
    for key in 0..1000u32 {
        assert!(!store.contains_key(&key));
    }
}

#[test]
fn growth_preserves_every_mapping() {
    // Small initial capacity to force repeated rehashes in every segment.
    let store = ResidentStore::with_config_and_hasher(
        TestFactory::default(),
        StoreConfig::new().with_segment_count(4).with_initial_capacity(2),
        RawState,
    );
    for key in 0..10_000u32 {
        store.put(TestElement::new(key, i64::from(key)));
    }
    assert_eq!(store.len(), 10_000);
    for key in 0..10_000u32 {
        assert_eq!(store.get(&key).unwrap().value, i64::from(key));
    }
}

#[test]
fn eviction_is_referential() {
    let store = store();
    store.put(TestElement::new(1, 1));

    // An equal-but-distinct representation does not match.
    let stranger = Substitute::Element(TestElement::new(1, 1));
    assert!(!store.evict(&1, Some(&stranger)));
    assert!(store.contains_key(&1));

    let guard = store.guard();
    let current = store.unretrieved_get(&1, &guard).unwrap();
    assert_eq!(store.evict_element(&1, Some(current)).unwrap().value, 1);
    assert!(!store.contains_key(&1));

    // None matches whatever is present.
    store.put(TestElement::new(2, 2));
    assert!(store.evict(&2, None));
    assert!(store.is_empty());
}

#[test]
fn fault_switches_heap_to_proxy_and_back() {
    let store = store();
    store.put(TestElement::new(1, 5));

    let guard = store.guard();
    let heap = store.unretrieved_get(&1, &guard).unwrap();
    assert!(store.fault(&1, heap, Substitute::Proxy(5)));
    assert!(store.is_element_on_disk(&1));
    assert_eq!(store.get(&1).unwrap().value, 5);

    let proxy = store.unretrieved_get(&1, &guard).unwrap();
    assert!(store.fault(&1, proxy, Substitute::Element(TestElement::new(1, 5))));
    assert!(store.is_element_on_heap(&1));

    // A stale expectation no longer matches.
    assert!(!store.fault(&1, heap, Substitute::Proxy(9)));
}

#[test]
fn try_fault_succeeds_without_contention() {
    let store = store();
    store.put(TestElement::new(1, 5));
    let guard = store.guard();
    let heap = store.unretrieved_get(&1, &guard).unwrap();
    assert!(store.try_fault(&1, heap, Substitute::Proxy(5)));
    assert!(store.is_element_on_disk(&1));
}
