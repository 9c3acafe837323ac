//! Registry: stores every registration of one container.
//!
//! Two levels of the same map: type → (name → registration). Both levels
//! are [`SnapshotMap`]s, so lookups never take a lock:
//!
//! ```text
//! ArcSwap<Table> ──► [bucket 0] ─► Node ─► Node
//!                    [bucket 1] ─► Node
//!                    ...
//! ```
//!
//! A map starts as a single chain (a short list). Past eight entries it
//! becomes a table with a prime number of buckets at least twice the
//! entry count, and grows again when it holds more entries than buckets
//! or any chain gets long. Growth copies every node into a new table and
//! swaps the table pointer; readers holding the old table keep reading a
//! consistent snapshot.
//!
//! Writers are serialized by the registry lock. Readers may run
//! concurrently with a writer and see either the state before or after
//! each individual write.

use std::collections::hash_map::RandomState;
use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use arc_swap::{ArcSwap, ArcSwapOption};
use parking_lot::Mutex;
use sanad_support::primes::next_prime;
use tracing::{debug, trace};

use crate::key::{DependencyKey, TypeKey};
use crate::registration::Registration;

/// Entry count above which a single list becomes a hash table.
const LIST_CUTOVER: usize = 8;

/// Chain length that triggers growth of a hash table.
const MAX_CHAIN: usize = 8;

struct Node<K, V> {
    key: K,
    hash: u64,
    value: V,
    next: Option<Arc<Node<K, V>>>,
}

struct Table<K, V> {
    buckets: Box<[ArcSwapOption<Node<K, V>>]>,
    len: AtomicUsize,
}

impl<K, V> Table<K, V> {
    fn with_buckets(count: usize) -> Self {
        Self {
            buckets: (0..count).map(|_| ArcSwapOption::empty()).collect(),
            len: AtomicUsize::new(0),
        }
    }

    fn bucket(&self, hash: u64) -> &ArcSwapOption<Node<K, V>> {
        &self.buckets[(hash % self.buckets.len() as u64) as usize]
    }
}

/// Copy-on-grow map with lock-free reads.
///
/// Callers serialize writers; readers need no coordination.
pub(crate) struct SnapshotMap<K, V> {
    table: ArcSwap<Table<K, V>>,
    hasher: RandomState,
}

impl<K, V> SnapshotMap<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            table: ArcSwap::from_pointee(Table::with_buckets(1)),
            hasher: RandomState::new(),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        let hash = self.hasher.hash_one(key);
        let table = self.table.load();
        let head = table.bucket(hash).load();
        let mut node = head.as_deref();
        while let Some(n) = node {
            if n.hash == hash && n.key == *key {
                return Some(n.value.clone());
            }
            node = n.next.as_deref();
        }
        None
    }

    pub fn len(&self) -> usize {
        self.table.load().len.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of buckets in the current table; 1 means list regime.
    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.table.load().buckets.len()
    }

    /// Inserts or replaces. Returns the replaced value.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        let hash = self.hasher.hash_one(&key);
        let table = self.table.load_full();
        let slot = table.bucket(hash);
        let head = slot.load_full();

        let mut previous = None;
        let mut survivors = Vec::new();
        let mut node = head.as_deref();
        while let Some(n) = node {
            if n.hash == hash && n.key == key {
                previous = Some(n.value.clone());
            } else {
                survivors.push((n.key.clone(), n.hash, n.value.clone()));
            }
            node = n.next.as_deref();
        }

        if previous.is_some() {
            // Rebuild the chain without the old node, then publish it.
            let mut chain = None;
            for (k, h, v) in survivors.into_iter().rev() {
                chain = Some(Arc::new(Node { key: k, hash: h, value: v, next: chain }));
            }
            slot.store(Some(Arc::new(Node { key, hash, value, next: chain })));
            return previous;
        }

        let chain_len = survivors.len() + 1;
        slot.store(Some(Arc::new(Node { key, hash, value, next: head })));
        let len = table.len.fetch_add(1, Ordering::AcqRel) + 1;

        let buckets = table.buckets.len();
        let grow = if buckets == 1 {
            len > LIST_CUTOVER
        } else {
            len > buckets || chain_len > MAX_CHAIN
        };
        if grow {
            self.grow(&table, len);
        }
        None
    }

    /// Returns the existing value or inserts the one made by `make`.
    pub fn get_or_insert_with(&self, key: K, make: impl FnOnce() -> V) -> V {
        if let Some(value) = self.get(&key) {
            return value;
        }
        let value = make();
        self.insert(key, value.clone());
        value
    }

    pub fn values(&self) -> Vec<V> {
        let table = self.table.load();
        let mut values = Vec::with_capacity(table.len.load(Ordering::Acquire));
        for bucket in table.buckets.iter() {
            let head = bucket.load();
            let mut node = head.as_deref();
            while let Some(n) = node {
                values.push(n.value.clone());
                node = n.next.as_deref();
            }
        }
        values
    }

    pub fn clear(&self) {
        self.table.store(Arc::new(Table::with_buckets(1)));
    }

    fn grow(&self, old: &Table<K, V>, len: usize) {
        let size = next_prime(2 * len.max(old.buckets.len()));
        let table = Table::with_buckets(size);

        for bucket in old.buckets.iter() {
            let head = bucket.load();
            let mut node = head.as_deref();
            while let Some(n) = node {
                let slot = table.bucket(n.hash);
                let next = slot.load_full();
                slot.store(Some(Arc::new(Node {
                    key: n.key.clone(),
                    hash: n.hash,
                    value: n.value.clone(),
                    next,
                })));
                node = n.next.as_deref();
            }
        }

        table.len.store(len, Ordering::Release);
        trace!(from = old.buckets.len(), to = size, entries = len, "Map grown");
        self.table.store(Arc::new(table));
    }
}

/// All registrations of one type, keyed by name.
pub struct TypeEntry {
    ty: TypeKey,
    names: SnapshotMap<Option<Arc<str>>, Arc<Registration>>,
}

impl TypeEntry {
    pub fn ty(&self) -> TypeKey {
        self.ty
    }

    pub fn get(&self, name: Option<&str>) -> Option<Arc<Registration>> {
        self.names.get(&crate::key::normalize_name(name))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn registrations(&self) -> Vec<Arc<Registration>> {
        self.names.values()
    }
}

/// The registry of one container.
pub struct Registry {
    types: SnapshotMap<TypeKey, Arc<TypeEntry>>,
    lock: Mutex<()>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            types: SnapshotMap::new(),
            lock: Mutex::new(()),
        }
    }

    /// Every registration of `ty`, keyed by name.
    pub fn get_type(&self, ty: &TypeKey) -> Option<Arc<TypeEntry>> {
        self.types.get(ty)
    }

    pub fn get(&self, key: &DependencyKey) -> Option<Arc<Registration>> {
        self.types.get(&key.ty())?.names.get(&key.name_arc().cloned())
    }

    pub fn contains(&self, key: &DependencyKey) -> bool {
        self.get(key).is_some()
    }

    /// Stores `registration`, returning the one it replaced.
    pub(crate) fn add_or_replace(&self, registration: Arc<Registration>) -> Option<Arc<Registration>> {
        let _guard = self.lock.lock();
        let key = registration.key().clone();
        let entry = self.entry(key.ty());
        let previous = entry.names.insert(key.name_arc().cloned(), registration);
        debug!(key = %key, replaced = previous.is_some(), "Registration stored");
        previous
    }

    /// Returns the registration for `key`, creating it with `make` if
    /// absent. `make` runs at most once per key.
    pub(crate) fn get_or_add(
        &self,
        key: &DependencyKey,
        make: impl FnOnce() -> Arc<Registration>,
    ) -> Arc<Registration> {
        if let Some(existing) = self.get(key) {
            return existing;
        }
        let _guard = self.lock.lock();
        let entry = self.entry(key.ty());
        entry.names.get_or_insert_with(key.name_arc().cloned(), make)
    }

    /// Snapshot of every registration.
    pub fn registrations(&self) -> Vec<Arc<Registration>> {
        self.types
            .values()
            .iter()
            .flat_map(|entry| entry.registrations())
            .collect()
    }

    /// Number of registered types.
    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    pub fn len(&self) -> usize {
        self.types.values().iter().map(|entry| entry.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn clear(&self) {
        let _guard = self.lock.lock();
        self.types.clear();
    }

    /// Callers hold the registry lock.
    fn entry(&self, ty: TypeKey) -> Arc<TypeEntry> {
        self.types.get_or_insert_with(ty, || {
            Arc::new(TypeEntry {
                ty,
                names: SnapshotMap::new(),
            })
        })
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("types", &self.type_count())
            .field("registrations", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifetime::Lifetime;
    use crate::pipeline::StagedChain;
    use crate::registration::PolicyMap;

    struct Database;

    fn registration(key: DependencyKey) -> Arc<Registration> {
        Registration::new(
            key,
            PolicyMap::new(),
            Lifetime::Transient.manager(),
            StagedChain::root(),
            false,
        )
    }

    #[test]
    fn list_regime_until_cutover() {
        let map = SnapshotMap::new();
        for i in 0..LIST_CUTOVER {
            map.insert(i, i * 10);
        }
        assert_eq!(map.capacity(), 1);

        map.insert(LIST_CUTOVER, 0);
        assert!(map.capacity() >= 2 * (LIST_CUTOVER + 1));
        assert!(next_prime(map.capacity()) == map.capacity());
        for i in 0..LIST_CUTOVER {
            assert_eq!(map.get(&i), Some(i * 10));
        }
    }

    #[test]
    fn growth_keeps_every_entry() {
        let map = SnapshotMap::new();
        for i in 0..1000u32 {
            assert!(map.insert(i, i).is_none());
            // Interleave lookups with growth.
            assert_eq!(map.get(&(i / 2)), Some(i / 2));
        }
        assert_eq!(map.len(), 1000);
        assert!(map.capacity() >= 1000);
        assert_eq!(map.values().len(), 1000);
    }

    #[test]
    fn replace_keeps_length() {
        let map = SnapshotMap::new();
        map.insert("a", 1);
        map.insert("b", 2);
        assert_eq!(map.insert("a", 3), Some(1));
        assert_eq!(map.len(), 2);
        assert_eq!(map.get(&"a"), Some(3));
        assert_eq!(map.get(&"b"), Some(2));
    }

    #[test]
    fn clear_empties_map() {
        let map = SnapshotMap::new();
        for i in 0..20 {
            map.insert(i, ());
        }
        map.clear();
        assert!(map.is_empty());
        assert_eq!(map.capacity(), 1);
        assert!(map.get(&3).is_none());
    }

    #[test]
    fn readers_see_consistent_snapshots_during_growth() {
        let map = SnapshotMap::new();
        for i in 0..8u64 {
            map.insert(i, i);
        }
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..200 {
                        for i in 0..8u64 {
                            // Seeded before the readers start; must always be visible.
                            assert_eq!(map.get(&i), Some(i));
                        }
                    }
                });
            }
            for i in 8..2000u64 {
                map.insert(i, i);
            }
        });
        assert_eq!(map.len(), 2000);
    }

    #[test]
    fn fifty_names_under_one_type() {
        let registry = Registry::new();
        let names: Vec<String> = (0..50).map(|i| format!("db-{i}")).collect();

        for (i, name) in names.iter().enumerate() {
            registry.add_or_replace(registration(DependencyKey::named::<Database>(name)));
            for earlier in &names[..=i] {
                assert!(registry.contains(&DependencyKey::named::<Database>(earlier)));
            }
        }

        let entry = registry.get_type(&TypeKey::of::<Database>()).unwrap();
        assert_eq!(entry.len(), 50);
        assert!(entry.names.capacity() > 1);
        assert!(entry.get(Some("db-49")).is_some());
        assert!(entry.get(None).is_none());
        assert_eq!(registry.type_count(), 1);
        assert_eq!(registry.len(), 50);
    }

    #[test]
    fn add_or_replace_returns_previous() {
        let registry = Registry::new();
        let first = registration(DependencyKey::of::<Database>());
        assert!(registry.add_or_replace(first.clone()).is_none());

        let previous = registry
            .add_or_replace(registration(DependencyKey::of::<Database>()))
            .unwrap();
        assert!(Arc::ptr_eq(&previous, &first));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn get_or_add_creates_once() {
        let registry = Registry::new();
        let key = DependencyKey::of::<Database>();
        let mut calls = 0;
        let a = registry.get_or_add(&key, || {
            calls += 1;
            registration(key.clone())
        });
        let b = registry.get_or_add(&key, || unreachable!());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(calls, 1);
    }

    #[test]
    fn empty_name_is_default_registration() {
        let registry = Registry::new();
        registry.add_or_replace(registration(DependencyKey::of::<Database>()));
        assert!(registry.contains(&DependencyKey::named::<Database>("")));
        assert!(registry.get_type(&TypeKey::of::<Database>()).unwrap().get(Some("")).is_some());
    }
}
