//! Concurrent keyed store shared by the orphan pool and the misbehavior tracker.
//!
//! Each operation locks only the shard holding its key, so bookkeeping for one
//! peer or header never waits on unrelated keys. Closures passed to `update`
//! and `upsert` run while the shard lock is held and must not touch the same
//! store again.

use std::hash::Hash;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

#[derive(Debug)]
pub struct KeyedStore<K: Eq + Hash, V> {
    map: DashMap<K, V>,
}

impl<K: Eq + Hash + Clone, V> Default for KeyedStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone, V> KeyedStore<K, V> {
    pub fn new() -> Self {
        Self {
            map: DashMap::new(),
        }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            map: DashMap::with_capacity(capacity),
        }
    }

    pub fn contains(&self, key: &K) -> bool {
        self.map.contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.map.get(key).map(|entry| entry.value().clone())
    }

    /// Read a projection of the value without cloning it.
    pub fn read<R>(&self, key: &K, f: impl FnOnce(&V) -> R) -> Option<R> {
        self.map.get(key).map(|entry| f(entry.value()))
    }

    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.map.insert(key, value)
    }

    /// Insert only when the key is vacant. Returns whether the value was stored.
    pub fn insert_if_absent(&self, key: K, value: V) -> bool {
        match self.map.entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(value);
                true
            }
        }
    }

    /// Mutate an existing value in place.
    pub fn update<R>(&self, key: &K, f: impl FnOnce(&mut V) -> R) -> Option<R> {
        self.map.get_mut(key).map(|mut entry| f(entry.value_mut()))
    }

    /// Mutate the value for `key`, creating it first if absent.
    pub fn upsert<R>(&self, key: K, default: impl FnOnce() -> V, f: impl FnOnce(&mut V) -> R) -> R {
        let mut entry = self.map.entry(key).or_insert_with(default);
        f(entry.value_mut())
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.map.remove(key).map(|(_, value)| value)
    }

    /// Remove the value only if `predicate` holds for it.
    pub fn remove_if(&self, key: &K, predicate: impl FnOnce(&V) -> bool) -> Option<V> {
        self.map.remove_if(key, |_, value| predicate(value)).map(|(_, value)| value)
    }

    /// Keep only the entries for which `keep` returns true.
    pub fn retain(&self, mut keep: impl FnMut(&K, &mut V) -> bool) {
        self.map.retain(|key, value| keep(key, value));
    }

    pub fn keys(&self) -> Vec<K> {
        self.map.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Point-in-time copy of every entry. Entries may change while iterating.
    pub fn snapshot(&self) -> Vec<(K, V)>
    where
        V: Clone,
    {
        self.map.iter().map(|entry| (entry.key().clone(), entry.value().clone())).collect()
    }

    /// Find the key whose value minimizes `score`.
    pub fn min_by_key<S: Ord>(&self, mut score: impl FnMut(&V) -> S) -> Option<K> {
        self.map
            .iter()
            .min_by_key(|entry| score(entry.value()))
            .map(|entry| entry.key().clone())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&self) {
        self.map.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_insert_if_absent_keeps_first_value() {
        let store = KeyedStore::new();
        assert!(store.insert_if_absent(1u32, "first"));
        assert!(!store.insert_if_absent(1u32, "second"));
        assert_eq!(store.get(&1), Some("first"));
    }

    #[test]
    fn test_update_missing_key_is_none() {
        let store: KeyedStore<u32, u32> = KeyedStore::new();
        assert_eq!(store.update(&7, |v| *v += 1), None);
        store.insert(7, 1);
        assert_eq!(store.update(&7, |v| { *v += 1; *v }), Some(2));
    }

    #[test]
    fn test_remove_if_respects_predicate() {
        let store = KeyedStore::new();
        store.insert("a", 5u32);
        assert_eq!(store.remove_if(&"a", |v| *v > 10), None);
        assert_eq!(store.remove_if(&"a", |v| *v == 5), Some(5));
        assert!(store.is_empty());
    }

    #[test]
    fn test_min_by_key() {
        let store = KeyedStore::new();
        store.insert("late", 30i64);
        store.insert("early", 10i64);
        store.insert("mid", 20i64);
        assert_eq!(store.min_by_key(|v| *v), Some("early"));
    }

    #[test]
    fn test_concurrent_upserts_are_atomic_per_key() {
        let store = Arc::new(KeyedStore::<u32, u64>::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        store.upsert(0, || 0, |v| *v += 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.get(&0), Some(8000));
    }
}
