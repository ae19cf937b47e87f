use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use format::{BytewiseComparator, Comparator, InternalKey, InternalKeyComparator, ValueType};

use super::helpers::TableStore;
use crate::{Error, Table, TableCache};

fn ikey(user_key: &[u8], seq: u64) -> Vec<u8> {
    InternalKey::new(user_key, seq, ValueType::Value)
        .encoded()
        .to_vec()
}

/// A store preloaded with `n` single-entry tables numbered `1..=n`.
fn store_with_tables(n: u64) -> TableStore {
    let store = TableStore::default();
    for number in 1..=n {
        let key = ikey(format!("table-{number}").as_bytes(), number);
        let value = format!("value-{number}").into_bytes();
        store.put_table(number, vec![(key, value)]);
    }
    store
}

fn new_cache(store: &TableStore, capacity: usize) -> TableCache<TableStore> {
    TableCache::new(PathBuf::from("unused"), store.clone(), capacity)
}

#[test]
fn hit_after_miss_opens_once() {
    let store = store_with_tables(1);
    let cache = new_cache(&store, 10);

    let target = ikey(b"table-1", u64::MAX >> 8);
    for _ in 0..5 {
        let result = cache.get(1, 100, &target).unwrap();
        assert_eq!(result.unwrap().1, b"value-1");
    }
    assert_eq!(store.open_count(), 1);
}

#[test]
fn evict_forces_reopen() {
    let store = store_with_tables(1);
    let cache = new_cache(&store, 10);

    drop(cache.find_table(1, 100).unwrap());
    assert_eq!(store.open_count(), 1);

    cache.evict(1);
    // a stale handle is never reused: the next access reopens the file
    drop(cache.find_table(1, 100).unwrap());
    assert_eq!(store.open_count(), 2);
}

#[test]
fn open_failures_are_never_cached() {
    let store = store_with_tables(1);
    let cache = new_cache(&store, 10);

    store.fail_opens.store(true, Ordering::SeqCst);
    assert!(matches!(cache.find_table(1, 100), Err(Error::Io(_))));
    assert!(matches!(cache.find_table(1, 100), Err(Error::Io(_))));

    // the fault clears; the very next access succeeds
    store.fail_opens.store(false, Ordering::SeqCst);
    assert!(cache.find_table(1, 100).is_ok());
    assert_eq!(store.open_count(), 1);
}

#[test]
fn capacity_bounds_open_tables() {
    let store = store_with_tables(3);
    let cache = new_cache(&store, 2);

    drop(cache.find_table(1, 100).unwrap());
    drop(cache.find_table(2, 100).unwrap());
    drop(cache.find_table(3, 100).unwrap()); // evicts table 1
    assert!(cache.open_tables() <= 2);
    assert_eq!(store.open_count(), 3);

    // table 1 was evicted: touching it again reopens
    drop(cache.find_table(1, 100).unwrap());
    assert_eq!(store.open_count(), 4);

    // table 3 stayed resident: no reopen
    drop(cache.find_table(3, 100).unwrap());
    assert_eq!(store.open_count(), 4);
}

#[test]
fn handle_outlives_eviction() {
    let store = store_with_tables(2);
    let cache = new_cache(&store, 10);

    let handle = cache.find_table(1, 100).unwrap();
    cache.evict(1);

    // the pinned table keeps serving reads after eviction
    let target = ikey(b"table-1", u64::MAX >> 8);
    let result = handle.get(&target).unwrap();
    assert_eq!(result.unwrap().1, b"value-1");
}

#[test]
fn get_seeks_at_or_after_target() {
    let store = TableStore::default();
    let icmp = InternalKeyComparator::new(Arc::new(BytewiseComparator));
    let mut entries = vec![
        (ikey(b"apple", 5), b"red".to_vec()),
        (ikey(b"banana", 3), b"yellow".to_vec()),
    ];
    entries.sort_by(|a, b| icmp.compare(&a.0, &b.0));
    store.put_table(7, entries);

    let cache = new_cache(&store, 10);

    // exact hit
    let hit = cache.get(7, 100, &ikey(b"apple", 5)).unwrap().unwrap();
    assert_eq!(hit.1, b"red");

    // a seek between keys lands on the next one; the caller is the one
    // who rejects the user-key mismatch
    let next = cache.get(7, 100, &ikey(b"avocado", 9)).unwrap().unwrap();
    assert_eq!(next.1, b"yellow");

    // past the end
    assert!(cache.get(7, 100, &ikey(b"zzz", 9)).unwrap().is_none());
}

#[test]
fn distinct_tables_do_not_collide() {
    let store = store_with_tables(4);
    let cache = new_cache(&store, 10);

    for number in 1..=4u64 {
        let target = ikey(format!("table-{number}").as_bytes(), u64::MAX >> 8);
        let result = cache.get(number, 100, &target).unwrap().unwrap();
        assert_eq!(result.1, format!("value-{number}").into_bytes());
    }
    assert_eq!(store.open_count(), 4);
}
