//! Scoped in-memory store with TTL expiry and age-based eviction

use crate::config::{CacheDefaults, CacheOptions, CachePolicy};
use crate::stats::{CacheStats, StatsCounters};
use dashmap::DashMap;
use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    hash::Hash,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tracing::{debug, trace};

/// Address of one cached value: the scope it belongs to and its owner
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey<S, O> {
    pub scope: S,
    pub owner: O,
}

impl<S, O> CacheKey<S, O> {
    pub fn new(scope: S, owner: O) -> Self {
        Self { scope, owner }
    }
}

/// The two clearing granularities of [`CacheStore::clear`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachePrefix<S, O> {
    /// Every owner's entry within one scope
    Scope(S),
    /// One owner's entries across every scope
    Owner(O),
}

/// Entry in the store
#[derive(Debug)]
struct CacheEntry<V> {
    value: V,
    inserted_at: Instant,
    ttl: Option<Duration>,
    sequence: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        self.ttl
            .map_or(false, |ttl| now.saturating_duration_since(self.inserted_at) >= ttl)
    }
}

/// Entries of one scope plus their insertion order
#[derive(Debug)]
struct Scope<O, V> {
    entries: HashMap<O, CacheEntry<V>>,
    /// insertion sequence -> owner, oldest first
    order: BTreeMap<u64, O>,
}

impl<O, V> Default for Scope<O, V> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            order: BTreeMap::new(),
        }
    }
}

impl<O, V> Scope<O, V>
where
    O: Eq + Hash + Clone,
{
    fn remove(&mut self, owner: &O) -> Option<CacheEntry<V>> {
        let entry = self.entries.remove(owner)?;
        self.order.remove(&entry.sequence);
        Some(entry)
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<O> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired(now))
            .map(|(owner, _)| owner.clone())
            .collect();

        for owner in &expired {
            self.remove(owner);
        }

        expired.len()
    }

    /// Drop expired entries from the oldest end, stopping at the first live one
    fn purge_expired_front(&mut self, now: Instant) -> usize {
        let mut purged = 0;
        while let Some((_, owner)) = self.order.first_key_value() {
            let expired = self
                .entries
                .get(owner)
                .map_or(true, |entry| entry.is_expired(now));
            if !expired {
                break;
            }
            if let Some((_, owner)) = self.order.pop_first() {
                self.entries.remove(&owner);
            }
            purged += 1;
        }
        purged
    }

    fn evict_oldest(&mut self) -> bool {
        let Some((_, owner)) = self.order.pop_first() else {
            return false;
        };
        self.entries.remove(&owner);
        true
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Thread-safe keyed store partitioned by scope.
///
/// `S` identifies a scope (one relation of one type), `O` an owner (one
/// entity instance) and `V` the cached value. Values are cloned out on every
/// hit, so `V` is expected to be a cheap handle such as an `Arc`.
///
/// Each scope is guarded by its shard lock for the whole
/// expire-evict-insert sequence of [`CacheStore::set`], so concurrent writers
/// to one scope can never push it past its size limit.
pub struct CacheStore<S, O, V> {
    scopes: DashMap<S, Scope<O, V>>,
    defaults: Arc<CacheDefaults>,
    sequence: AtomicU64,
    stats: StatsCounters,
}

impl<S, O, V> CacheStore<S, O, V>
where
    S: Eq + Hash + Clone + fmt::Debug,
    O: Eq + Hash + Clone + fmt::Debug,
    V: Clone,
{
    /// Create a store reading its fallback policy from `defaults`
    pub fn new(defaults: Arc<CacheDefaults>) -> Self {
        Self {
            scopes: DashMap::new(),
            defaults,
            sequence: AtomicU64::new(0),
            stats: StatsCounters::default(),
        }
    }

    /// The process-wide defaults this store was built with
    pub fn defaults(&self) -> &Arc<CacheDefaults> {
        &self.defaults
    }

    /// Resolve per-scope overrides against the current defaults
    pub fn policy_for(&self, options: &CacheOptions) -> CachePolicy {
        options.resolve(&self.defaults.get())
    }

    /// Get a live value. Expired entries are dropped and reported as a miss.
    pub fn get(&self, key: &CacheKey<S, O>, policy: &CachePolicy) -> Option<V> {
        if !*policy.get_enabled() {
            self.stats.record_miss();
            return None;
        }

        let Some(mut scope) = self.scopes.get_mut(&key.scope) else {
            self.stats.record_miss();
            return None;
        };

        let now = Instant::now();
        let expired = match scope.entries.get(&key.owner) {
            Some(entry) if !entry.is_expired(now) => {
                trace!(scope = ?key.scope, owner = ?key.owner, "cache hit");
                self.stats.record_hit();
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            scope.remove(&key.owner);
            self.stats.record_expired(1);
            debug!(scope = ?key.scope, owner = ?key.owner, "cache entry expired");
        }

        self.stats.record_miss();
        None
    }

    /// Store a value, evicting the oldest entries of the scope when it is full.
    ///
    /// A disabled policy makes this a no-op.
    pub fn set(&self, key: CacheKey<S, O>, value: V, policy: &CachePolicy) {
        if !*policy.get_enabled() {
            return;
        }

        let CacheKey { scope: scope_id, owner } = key;
        let mut scope = self.scopes.entry(scope_id.clone()).or_default();
        let now = Instant::now();

        // Overwriting counts as a fresh insertion
        scope.remove(&owner);

        let expired = scope.purge_expired_front(now);
        if expired > 0 {
            self.stats.record_expired(expired as u64);
        }

        if let Some(max_size) = policy.effective_max_size() {
            let mut evicted = 0;
            while scope.len() >= max_size && scope.evict_oldest() {
                evicted += 1;
            }
            if evicted > 0 {
                debug!(scope = ?scope_id, evicted, max_size, "evicted oldest cache entries");
                self.stats.record_evicted(evicted);
            }
        }

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        scope.order.insert(sequence, owner.clone());
        scope.entries.insert(
            owner,
            CacheEntry {
                value,
                inserted_at: now,
                ttl: policy.effective_ttl(),
                sequence,
            },
        );
        self.stats.record_insert();
    }

    /// Remove exactly one entry
    pub fn delete(&self, key: &CacheKey<S, O>) -> bool {
        self.scopes
            .get_mut(&key.scope)
            .map_or(false, |mut scope| scope.remove(&key.owner).is_some())
    }

    /// Remove every entry matching `prefix`, returning how many were dropped
    pub fn clear(&self, prefix: &CachePrefix<S, O>) -> usize {
        let removed = match prefix {
            CachePrefix::Scope(scope) => self
                .scopes
                .remove(scope)
                .map_or(0, |(_, entries)| entries.len()),
            CachePrefix::Owner(owner) => {
                let mut removed = 0;
                self.scopes.retain(|_, scope| {
                    if scope.remove(owner).is_some() {
                        removed += 1;
                    }
                    !scope.is_empty()
                });
                removed
            }
        };

        debug!(?prefix, removed, "cleared cache entries");
        removed
    }

    /// Drop everything
    pub fn clear_all(&self) {
        self.scopes.clear();
    }

    /// Eagerly drop expired entries from every scope
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut purged = 0;
        for mut scope in self.scopes.iter_mut() {
            purged += scope.purge_expired(now);
        }
        if purged > 0 {
            self.stats.record_expired(purged as u64);
        }
        purged
    }

    /// Number of stored entries, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.scopes.iter().map(|scope| scope.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of stored entries in one scope
    pub fn scope_len(&self, scope: &S) -> usize {
        self.scopes.get(scope).map_or(0, |scope| scope.len())
    }

    /// Whether a live entry exists, without touching hit/miss counters
    pub fn contains(&self, key: &CacheKey<S, O>) -> bool {
        let now = Instant::now();
        self.scopes.get(&key.scope).map_or(false, |scope| {
            scope
                .entries
                .get(&key.owner)
                .map_or(false, |entry| !entry.is_expired(now))
        })
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.len() as u64)
    }
}

impl<S: Eq + Hash, O, V> fmt::Debug for CacheStore<S, O, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("scopes", &self.scopes.len())
            .field("defaults", &self.defaults)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CachePolicyBuilder;
    use std::thread;

    type TestStore = CacheStore<&'static str, u64, Arc<String>>;

    fn store() -> TestStore {
        CacheStore::new(Arc::new(CacheDefaults::default()))
    }

    fn key(scope: &'static str, owner: u64) -> CacheKey<&'static str, u64> {
        CacheKey::new(scope, owner)
    }

    fn value(s: &str) -> Arc<String> {
        Arc::new(s.to_string())
    }

    fn build(builder: CachePolicyBuilder) -> CachePolicy {
        builder.build().expect("Failed to build policy")
    }

    #[test]
    fn test_set_and_get() {
        let store = store();
        let policy = CachePolicy::default();

        store.set(key("posts", 1), value("a"), &policy);
        assert_eq!(store.get(&key("posts", 1), &policy).as_deref().map(String::as_str), Some("a"));
        assert!(store.get(&key("posts", 2), &policy).is_none());
        assert!(store.get(&key("comments", 1), &policy).is_none());
    }

    #[test]
    fn test_hit_returns_same_value() {
        let store = store();
        let policy = CachePolicy::default();
        let original = value("shared");

        store.set(key("posts", 1), original.clone(), &policy);
        let hit = store.get(&key("posts", 1), &policy).unwrap();
        assert!(Arc::ptr_eq(&original, &hit));
    }

    #[test]
    fn test_ttl_expiry() {
        let store = store();
        let policy = build(CachePolicyBuilder::new().ttl(Some(Duration::from_millis(50))));

        store.set(key("posts", 1), value("a"), &policy);
        assert!(store.get(&key("posts", 1), &policy).is_some());

        thread::sleep(Duration::from_millis(80));

        assert!(store.get(&key("posts", 1), &policy).is_none());
        assert_eq!(store.len(), 0);
        assert_eq!(store.stats().expirations, 1);
    }

    #[test]
    fn test_zero_ttl_never_expires() {
        let store = store();
        let policy = build(CachePolicyBuilder::new().ttl(Some(Duration::ZERO)));

        store.set(key("posts", 1), value("a"), &policy);
        thread::sleep(Duration::from_millis(20));
        assert!(store.get(&key("posts", 1), &policy).is_some());
    }

    #[test]
    fn test_evicts_oldest_insertion_first() {
        let store = store();
        let policy = build(CachePolicyBuilder::new().max_size(Some(2)));

        store.set(key("posts", 1), value("one"), &policy);
        store.set(key("posts", 2), value("two"), &policy);

        // Reads do not refresh age
        store.get(&key("posts", 1), &policy);

        store.set(key("posts", 3), value("three"), &policy);

        assert!(store.get(&key("posts", 1), &policy).is_none());
        assert!(store.get(&key("posts", 2), &policy).is_some());
        assert!(store.get(&key("posts", 3), &policy).is_some());
        assert_eq!(store.scope_len(&"posts"), 2);
        assert_eq!(store.stats().evictions, 1);
    }

    #[test]
    fn test_overwrite_refreshes_age() {
        let store = store();
        let policy = build(CachePolicyBuilder::new().max_size(Some(2)));

        store.set(key("posts", 1), value("one"), &policy);
        store.set(key("posts", 2), value("two"), &policy);
        store.set(key("posts", 1), value("one again"), &policy);
        store.set(key("posts", 3), value("three"), &policy);

        assert!(store.get(&key("posts", 2), &policy).is_none());
        assert_eq!(
            store.get(&key("posts", 1), &policy).as_deref().map(String::as_str),
            Some("one again")
        );
    }

    #[test]
    fn test_size_bound_is_per_scope() {
        let store = store();
        let policy = build(CachePolicyBuilder::new().max_size(Some(1)));

        store.set(key("posts", 1), value("a"), &policy);
        store.set(key("comments", 1), value("b"), &policy);

        assert!(store.get(&key("posts", 1), &policy).is_some());
        assert!(store.get(&key("comments", 1), &policy).is_some());
    }

    #[test]
    fn test_size_never_exceeded() {
        let store = store();
        let policy = build(CachePolicyBuilder::new().max_size(Some(5)));

        for owner in 0..10 {
            store.set(key("posts", owner), value("v"), &policy);
            assert!(store.scope_len(&"posts") <= 5);
        }
        assert_eq!(store.scope_len(&"posts"), 5);
        for owner in 5..10 {
            assert!(store.contains(&key("posts", owner)));
        }
    }

    #[test]
    fn test_disabled_policy() {
        let store = store();
        let policy = CachePolicy::disabled();

        store.set(key("posts", 1), value("a"), &policy);
        assert!(store.get(&key("posts", 1), &policy).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_delete_and_clear() {
        let store = store();
        let policy = CachePolicy::default();

        store.set(key("posts", 1), value("a"), &policy);
        store.set(key("posts", 2), value("b"), &policy);
        store.set(key("comments", 1), value("c"), &policy);
        store.set(key("comments", 2), value("d"), &policy);

        assert!(store.delete(&key("posts", 1)));
        assert!(!store.delete(&key("posts", 1)));
        assert_eq!(store.len(), 3);

        assert_eq!(store.clear(&CachePrefix::Owner(2)), 2);
        assert!(store.contains(&key("comments", 1)));
        assert_eq!(store.len(), 1);

        assert_eq!(store.clear(&CachePrefix::Scope("comments")), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_purge_expired() {
        let store = store();
        let short = build(CachePolicyBuilder::new().ttl(Some(Duration::from_millis(20))));

        store.set(key("posts", 1), value("a"), &short);
        store.set(key("posts", 2), value("b"), &CachePolicy::default());
        thread::sleep(Duration::from_millis(40));

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_set_drops_expired_entries_oldest_first() {
        let store = store();
        let short = build(CachePolicyBuilder::new().ttl(Some(Duration::from_millis(20))));
        let long = CachePolicy::default();

        store.set(key("posts", 1), value("a"), &short);
        store.set(key("posts", 2), value("b"), &short);
        thread::sleep(Duration::from_millis(40));

        store.set(key("posts", 3), value("c"), &long);
        assert_eq!(store.scope_len(&"posts"), 1);
        assert_eq!(store.stats().expirations, 2);

        // the walk stops at the first live entry
        store.set(key("posts", 4), value("d"), &short);
        thread::sleep(Duration::from_millis(40));
        store.set(key("posts", 5), value("e"), &long);
        assert_eq!(store.scope_len(&"posts"), 3);
        assert!(store.get(&key("posts", 4), &long).is_none());
        assert_eq!(store.scope_len(&"posts"), 2);
    }

    #[test]
    fn test_stats() {
        let store = store();
        let policy = CachePolicy::default();

        store.set(key("posts", 1), value("a"), &policy);
        store.get(&key("posts", 1), &policy);
        store.get(&key("posts", 2), &policy);

        let stats = store.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.inserts, 1);
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hit_ratio(), 0.5);
    }

    #[test]
    fn test_debug_does_not_require_debug_values() {
        #[derive(Clone)]
        struct Opaque;

        let store: CacheStore<&'static str, u64, Opaque> = CacheStore::new(Arc::new(CacheDefaults::default()));
        let policy = CachePolicy::default();
        store.set(key("posts", 1), Opaque, &policy);
        store.set(key("comments", 1), Opaque, &policy);

        let rendered = format!("{store:?}");
        assert!(rendered.starts_with("CacheStore"));
        assert!(rendered.contains("scopes: 2"));
    }

    #[test]
    fn test_concurrent_access() {
        let store = Arc::new(store());
        let policy = build(CachePolicyBuilder::new().max_size(Some(100)));

        let handles: Vec<_> = (0..5u64)
            .map(|worker| {
                let store = store.clone();
                let policy = policy.clone();
                thread::spawn(move || {
                    for i in 0..100u64 {
                        let owner = worker * 1000 + i;
                        store.set(key("shared", owner), value(&format!("value_{owner}")), &policy);
                        assert!(store.scope_len(&"shared") <= 100);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(store.scope_len(&"shared"), 100);
        assert_eq!(store.stats().inserts, 500);
    }
}
