//! # Cache — capacity-bounded, charge-based eviction cache
//!
//! A generic concurrent cache mapping keys to values, where every entry
//! carries a caller-chosen **charge** against the cache's capacity. The
//! engine uses one instance to bound the number of open on-disk table
//! handles, but nothing here knows about tables.
//!
//! ## Handles and lifetime
//!
//! [`lookup`](Cache::lookup) and [`insert`](Cache::insert) return a
//! [`Handle`] that pins the entry: a pinned entry is never evicted, and
//! dropping the last handle of an entry that has already been evicted or
//! [`erase`](Cache::erase)d releases its storage and runs its deleter:
//! exactly once, exactly when both conditions hold (out of the index *and*
//! unpinned). Release is the handle's `Drop`, so a leaked lookup cannot
//! wedge the cache into keeping an entry forever without also leaking the
//! handle itself.
//!
//! ## Eviction
//!
//! The total charge of resident, unpinned entries is kept at or below
//! capacity by evicting in least-recently-*released* order. An entry whose
//! charge alone exceeds capacity is still usable through its handle; it is
//! evicted the moment that handle drops.
//!
//! One mutex guards the index and recency list, so `insert` / `lookup` /
//! `erase` and handle drops are safe from any thread. Expensive work (like
//! opening a file) belongs outside the cache, keyed by the miss.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use hashlink::LinkedHashMap;

/// Callback run exactly once when an entry leaves the cache for good.
pub type Deleter<K, V> = Box<dyn Fn(&K, &V) + Send + Sync>;

struct Entry<K, V> {
    key: K,
    value: V,
    charge: usize,
    deleter: Option<Deleter<K, V>>,
}

impl<K, V> Drop for Entry<K, V> {
    fn drop(&mut self) {
        // the last owner (index or final handle) is going away; this is
        // the single point where "erased and unpinned" becomes true
        if let Some(deleter) = self.deleter.take() {
            deleter(&self.key, &self.value);
        }
    }
}

struct Inner<K, V> {
    capacity: usize,
    /// Total charge of every in-cache entry, pinned or not.
    usage: usize,
    /// In-cache entries with zero outstanding handles, least recently
    /// released first. Only these are evictable.
    lru: LinkedHashMap<K, Arc<Entry<K, V>>>,
    /// In-cache entries with outstanding handles, with the handle count.
    pinned: HashMap<K, (Arc<Entry<K, V>>, usize)>,
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Evicts least-recently-released entries until the resident charge
    /// fits the capacity or nothing evictable remains. Returns the evicted
    /// entries so the caller can drop them (and run their deleters) after
    /// releasing the lock.
    fn evict_to_fit(&mut self) -> Vec<Arc<Entry<K, V>>> {
        let mut evicted = Vec::new();
        while self.usage > self.capacity {
            match self.lru.pop_front() {
                Some((_, entry)) => {
                    self.usage -= entry.charge;
                    evicted.push(entry);
                }
                None => break,
            }
        }
        evicted
    }
}

/// Thread-safe, charge-based LRU cache.
///
/// Cloning is cheap and shares the underlying cache, so readers, writers,
/// and background threads can each hold one.
pub struct Cache<K, V> {
    inner: Arc<Mutex<Inner<K, V>>>,
    next_id: Arc<AtomicU64>,
}

impl<K, V> Clone for Cache<K, V> {
    fn clone(&self) -> Self {
        Cache {
            inner: Arc::clone(&self.inner),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

impl<K, V> Cache<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Creates a cache bounding resident charge to `capacity`.
    pub fn new(capacity: usize) -> Cache<K, V> {
        Cache {
            inner: Arc::new(Mutex::new(Inner {
                capacity,
                usage: 0,
                lru: LinkedHashMap::new(),
                pinned: HashMap::new(),
            })),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Inserts a mapping and returns a handle pinning it.
    ///
    /// An existing entry under the same key is superseded: it leaves the
    /// index immediately, and its deleter runs once its last outstanding
    /// handle (if any) drops.
    pub fn insert(
        &self,
        key: K,
        value: V,
        charge: usize,
        deleter: Option<Deleter<K, V>>,
    ) -> Handle<K, V> {
        let entry = Arc::new(Entry {
            key: key.clone(),
            value,
            charge,
            deleter,
        });

        let mut garbage;
        {
            let mut inner = self.inner.lock().unwrap();

            // displace any previous entry under this key
            garbage = Vec::new();
            if let Some(old) = inner.lru.remove(&key) {
                inner.usage -= old.charge;
                garbage.push(old);
            } else if let Some((old, _handles)) = inner.pinned.remove(&key) {
                // outstanding handles keep the old entry alive; its
                // deleter is deferred to their last drop
                inner.usage -= old.charge;
                garbage.push(old);
            }

            inner.usage += charge;
            inner.pinned.insert(key, (Arc::clone(&entry), 1));
            garbage.extend(inner.evict_to_fit());
        }
        // deleters run outside the lock
        drop(garbage);

        Handle {
            cache: Arc::clone(&self.inner),
            entry,
        }
    }

    /// Looks up a key, pinning and returning the entry if present.
    pub fn lookup(&self, key: &K) -> Option<Handle<K, V>> {
        let mut inner = self.inner.lock().unwrap();

        if let Some((entry, handles)) = inner.pinned.get_mut(key) {
            *handles += 1;
            let entry = Arc::clone(entry);
            return Some(Handle {
                cache: Arc::clone(&self.inner),
                entry,
            });
        }

        if let Some(entry) = inner.lru.remove(key) {
            inner
                .pinned
                .insert(key.clone(), (Arc::clone(&entry), 1));
            return Some(Handle {
                cache: Arc::clone(&self.inner),
                entry,
            });
        }

        None
    }

    /// Removes a key from the index. Storage release and the deleter wait
    /// for the entry's last outstanding handle.
    pub fn erase(&self, key: &K) {
        let removed;
        {
            let mut inner = self.inner.lock().unwrap();
            removed = if let Some(entry) = inner.lru.remove(key) {
                inner.usage -= entry.charge;
                Some(entry)
            } else if let Some((entry, _handles)) = inner.pinned.remove(key) {
                inner.usage -= entry.charge;
                Some(entry)
            } else {
                None
            };
        }
        drop(removed);
    }

    /// A monotonically increasing id, so multiple logical caches sharing
    /// one instance can partition the key space.
    pub fn new_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Number of in-cache entries (pinned and unpinned).
    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.lru.len() + inner.pinned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total charge of in-cache entries.
    pub fn total_charge(&self) -> usize {
        self.inner.lock().unwrap().usage
    }
}

impl<K, V> fmt::Debug for Cache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache").finish_non_exhaustive()
    }
}

/// A pinned reference to a cache entry. Derefs to the value; dropping it
/// releases the pin.
pub struct Handle<K, V>
where
    K: Eq + Hash + Clone,
{
    cache: Arc<Mutex<Inner<K, V>>>,
    entry: Arc<Entry<K, V>>,
}

impl<K, V> Handle<K, V>
where
    K: Eq + Hash + Clone,
{
    /// The key this handle pins.
    pub fn key(&self) -> &K {
        &self.entry.key
    }
}

impl<K, V> Deref for Handle<K, V>
where
    K: Eq + Hash + Clone,
{
    type Target = V;

    fn deref(&self) -> &V {
        &self.entry.value
    }
}

impl<K, V> Drop for Handle<K, V>
where
    K: Eq + Hash + Clone,
{
    fn drop(&mut self) {
        let mut garbage = Vec::new();
        {
            let mut inner = self.cache.lock().unwrap();

            let now_unpinned = match inner.pinned.get_mut(&self.entry.key) {
                // the pinned entry may be a successor inserted under our
                // key; only decrement if it is ours
                Some((entry, handles)) if Arc::ptr_eq(entry, &self.entry) => {
                    *handles -= 1;
                    *handles == 0
                }
                _ => false,
            };

            if now_unpinned {
                // back into the recency list as most recently released
                if let Some((entry, _)) = inner.pinned.remove(&self.entry.key) {
                    inner.lru.insert(self.entry.key.clone(), entry);
                }
                garbage = inner.evict_to_fit();
            }
            // otherwise the entry was erased or superseded while we held
            // it: dropping our Arc below may be the final owner, which
            // runs the deleter
        }
        drop(garbage);
    }
}
