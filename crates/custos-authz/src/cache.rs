//! Per-subject assertion caching.
//!
//! Caches assertions returned by remote authorities so that repeated
//! requests within an assertion's validity window do not trigger another
//! network round-trip. State is partitioned by subject: each subject has its
//! own lock, so a busy subject never serializes traffic for other subjects.
//!
//! Within a partition, entries are keyed either by authority endpoint
//! (attribute caching) or by resource identifier (decision caching).
//!
//! Cache operations never fail the caller. Store faults are logged and
//! treated as a miss.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::assertion::Assertion;
use crate::clock::{Clock, SystemClock};
use crate::metrics;
use crate::store::{CacheStore, MemoryStore};

/// Configuration for an assertion cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Whether caching is enabled at all.
    pub enabled: bool,
    /// Lifetime of an individual cache entry, regardless of the validity of
    /// the assertions it holds. `None` means entries only expire with their
    /// assertions.
    pub entry_timeout: Option<Duration>,
    /// Tolerance applied either way when checking assertion validity.
    pub clock_skew: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            entry_timeout: None,
            clock_skew: Duration::from_secs(1),
        }
    }
}

impl CacheConfig {
    /// Create a production cache configuration.
    pub fn production() -> Self {
        Self {
            enabled: true,
            entry_timeout: Some(Duration::from_secs(8 * 60 * 60)),
            clock_skew: Duration::from_secs(1),
        }
    }

    /// Create a development cache configuration.
    pub fn development() -> Self {
        Self {
            enabled: true,
            entry_timeout: Some(Duration::from_secs(300)),
            clock_skew: Duration::from_secs(5),
        }
    }

    /// Disable caching.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            entry_timeout: None,
            clock_skew: Duration::ZERO,
        }
    }

    /// Set the entry timeout.
    pub fn with_entry_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.entry_timeout = timeout;
        self
    }

    /// Set the clock skew tolerance.
    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }
}

/// Assertions cached under one key, plus the entry's own expiry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    assertions: Vec<Assertion>,
    expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    fn new(expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            assertions: Vec::new(),
            expires_at,
        }
    }

    /// Cached assertions.
    pub fn assertions(&self) -> &[Assertion] {
        &self.assertions
    }

    /// When the entry itself expires.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// Add whatever statements of `assertions` are not already held.
    /// Returns how many assertions were added.
    fn merge(&mut self, assertions: &[Assertion]) -> usize {
        let mut added = 0;
        for assertion in assertions {
            if let Some(novel) = assertion.novel_against(&self.assertions) {
                self.assertions.push(novel);
                added += 1;
            }
        }
        added
    }

    /// Drop assertions outside their validity window. Returns how many were
    /// dropped.
    fn prune(&mut self, now: DateTime<Utc>, skew: chrono::Duration) -> usize {
        let before = self.assertions.len();
        self.assertions.retain(|a| a.is_valid_at(now, skew));
        before - self.assertions.len()
    }
}

/// All cached state for one subject.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    entries: HashMap<String, CacheEntry>,
}

impl Partition {
    /// Cached entries keyed by endpoint or resource.
    pub fn entries(&self) -> &HashMap<String, CacheEntry> {
        &self.entries
    }

    /// Whether the partition holds nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove expired entries and assertions. Returns the number of
    /// assertions removed.
    fn prune(&mut self, now: DateTime<Utc>, skew: chrono::Duration) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            if entry.is_expired(now) {
                removed += entry.assertions.len();
                return false;
            }
            removed += entry.prune(now, skew);
            !entry.assertions.is_empty()
        });
        removed
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of subjects with in-memory state.
    pub subjects: usize,
    /// Number of assertions evicted because they or their entry expired.
    pub evictions: u64,
    /// Number of store faults absorbed as misses.
    pub store_errors: u64,
}

/// Per-subject assertion cache.
#[derive(Debug)]
pub struct DecisionCache {
    /// Label used in logs and metrics.
    name: &'static str,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    store: Arc<dyn CacheStore>,
    partitions: DashMap<String, Arc<Mutex<Partition>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    store_errors: AtomicU64,
}

impl DecisionCache {
    /// Create an in-memory cache using the system clock.
    pub fn new(name: &'static str, config: CacheConfig) -> Self {
        Self::with_parts(name, config, Arc::new(MemoryStore), Arc::new(SystemClock))
    }

    /// Create a cache with an explicit store and clock.
    pub fn with_parts(
        name: &'static str,
        config: CacheConfig,
        store: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name,
            config,
            clock,
            store,
            partitions: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            store_errors: AtomicU64::new(0),
        }
    }

    /// Whether caching is enabled.
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// The cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Look up still-valid assertions for `subject` under `key`.
    ///
    /// Expired assertions are evicted; if none remain, or the entry itself
    /// has expired, the entry is removed and `None` is returned. A subject
    /// left with no entries is dropped from memory.
    pub fn lookup(&self, subject: &str, key: &str) -> Option<Vec<Assertion>> {
        if !self.config.enabled {
            return None;
        }

        let Some(partition) = self.resident(subject) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            metrics::record_cache_lookup(self.name, false);
            return None;
        };

        let now = self.clock.now();
        let skew = self.skew();
        let mut guard = partition.lock();

        let mut evicted = 0;
        let mut found = None;
        let mut remove_entry = false;

        if let Some(entry) = guard.entries.get_mut(key) {
            if entry.is_expired(now) {
                evicted += entry.assertions.len();
                remove_entry = true;
            } else {
                evicted += entry.prune(now, skew);
                if entry.assertions.is_empty() {
                    remove_entry = true;
                } else {
                    found = Some(entry.assertions.clone());
                }
            }
        }

        if remove_entry {
            guard.entries.remove(key);
        }
        let emptied = guard.is_empty();
        drop(guard);

        if emptied {
            self.partitions.remove_if(subject, |_, p| p.lock().is_empty());
        }

        if evicted > 0 {
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
            debug!(cache = self.name, key, evicted, "evicted expired assertions");
        }

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            metrics::record_cache_lookup(self.name, true);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            metrics::record_cache_lookup(self.name, false);
        }

        found
    }

    /// Merge assertions into the entry for `subject` under `key`.
    ///
    /// Statements already cached for at least as long are not added again.
    pub fn store(&self, subject: &str, key: &str, assertions: &[Assertion]) {
        if !self.config.enabled || assertions.is_empty() {
            return;
        }

        let now = self.clock.now();
        let expires_at = self
            .config
            .entry_timeout
            .and_then(|timeout| now.checked_add_signed(to_chrono(timeout)));

        let loaded = if self.partitions.contains_key(subject) {
            None
        } else {
            Some(self.load(subject))
        };
        // Merge under the map slot so an emptied partition is never removed
        // between insert and merge.
        let slot = self
            .partitions
            .entry(subject.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(loaded.unwrap_or_default())));
        let mut guard = slot.lock();
        let entry = guard
            .entries
            .entry(key.to_string())
            .or_insert_with(|| CacheEntry::new(expires_at));

        if entry.is_expired(now) {
            self.evictions
                .fetch_add(entry.assertions.len() as u64, Ordering::Relaxed);
            *entry = CacheEntry::new(expires_at);
        }

        let added = entry.merge(assertions);
        debug!(cache = self.name, key, added, "stored assertions");
    }

    /// Drop all cached state for a subject, including any persisted copy.
    pub fn invalidate(&self, subject: &str) {
        self.partitions.remove(subject);
        if let Err(e) = self.store.remove(subject) {
            self.store_errors.fetch_add(1, Ordering::Relaxed);
            warn!(cache = self.name, error = %e, "failed to remove persisted cache state");
        }
    }

    /// Persist the subject's partition through the configured store.
    ///
    /// This is the transaction boundary for a request: call it once the
    /// request has finished touching the cache.
    pub fn commit(&self, subject: &str) {
        if !self.config.enabled || !self.store.is_persistent() {
            return;
        }

        let Some(partition) = self.partitions.get(subject).map(|p| Arc::clone(p.value())) else {
            return;
        };

        let now = self.clock.now();
        let skew = self.skew();
        let mut guard = partition.lock();
        let evicted = guard.prune(now, skew);
        if evicted > 0 {
            self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
        }

        let result = if guard.is_empty() {
            self.store.remove(subject)
        } else {
            self.store.save(subject, &guard)
        };

        if let Err(e) = result {
            self.store_errors.fetch_add(1, Ordering::Relaxed);
            warn!(cache = self.name, error = %e, "failed to persist cache state");
        }
    }

    /// Prune and persist every in-memory partition.
    ///
    /// Intended for process shutdown.
    pub fn flush(&self) {
        let subjects: Vec<String> = self.partitions.iter().map(|p| p.key().clone()).collect();
        for subject in &subjects {
            self.commit(subject);
        }
        self.partitions.retain(|_, partition| !partition.lock().is_empty());
        debug!(cache = self.name, subjects = subjects.len(), "flushed cache");
    }

    /// Clear all in-memory state. Persisted state is left untouched.
    pub fn clear(&self) {
        self.partitions.clear();
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            subjects: self.partitions.len(),
            evictions: self.evictions.load(Ordering::Relaxed),
            store_errors: self.store_errors.load(Ordering::Relaxed),
        }
    }

    fn skew(&self) -> chrono::Duration {
        to_chrono(self.config.clock_skew)
    }

    /// The in-memory partition for a subject, loading it from the store on
    /// first access. Nothing is kept when the store has no live state.
    fn resident(&self, subject: &str) -> Option<Arc<Mutex<Partition>>> {
        if let Some(partition) = self.partitions.get(subject) {
            return Some(Arc::clone(partition.value()));
        }

        let loaded = self.load(subject);
        if loaded.is_empty() {
            return None;
        }
        Some(Arc::clone(
            self.partitions
                .entry(subject.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(loaded)))
                .value(),
        ))
    }

    fn load(&self, subject: &str) -> Partition {
        match self.store.load(subject) {
            Ok(Some(mut partition)) => {
                let evicted = partition.prune(self.clock.now(), self.skew());
                if evicted > 0 {
                    self.evictions.fetch_add(evicted as u64, Ordering::Relaxed);
                }
                partition
            }
            Ok(None) => Partition::default(),
            Err(e) => {
                self.store_errors.fetch_add(1, Ordering::Relaxed);
                warn!(cache = self.name, error = %e, "failed to load cache state, starting empty");
                Partition::default()
            }
        }
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::days(36_500))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assertion::Decision;
    use crate::fixtures::{attribute_assertion, permit_assertion, ManualClock, FIXTURE_ISSUER};

    fn cache_with_clock(config: CacheConfig) -> (DecisionCache, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        let cache = DecisionCache::with_parts(
            "test",
            config,
            Arc::new(MemoryStore),
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        (cache, clock)
    }

    #[test]
    fn test_cache_hit_miss() {
        let (cache, clock) = cache_with_clock(CacheConfig::default());
        let assertion = permit_assertion("u1", "/secure", clock.now(), 3600);

        assert!(cache.lookup("u1", "/secure").is_none());

        cache.store("u1", "/secure", &[assertion.clone()]);
        let cached = cache.lookup("u1", "/secure").unwrap();
        assert_eq!(cached, vec![assertion]);
    }

    #[test]
    fn test_cache_stats() {
        let (cache, clock) = cache_with_clock(CacheConfig::default());
        let assertion = permit_assertion("u1", "/secure", clock.now(), 3600);

        cache.lookup("u1", "/secure"); // miss
        cache.store("u1", "/secure", &[assertion]);
        cache.lookup("u1", "/secure"); // hit
        cache.lookup("u1", "/secure"); // hit

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.subjects, 1);
    }

    #[test]
    fn test_store_is_idempotent() {
        let (cache, clock) = cache_with_clock(CacheConfig::default());
        let a = permit_assertion("u1", "/secure", clock.now(), 3600);
        let b = permit_assertion("u1", "/other", clock.now(), 3600);

        cache.store("u1", "/secure", &[a.clone(), b.clone()]);
        cache.store("u1", "/secure", &[a, b]);

        assert_eq!(cache.lookup("u1", "/secure").unwrap().len(), 2);
    }

    #[test]
    fn test_expired_assertion_is_evicted() {
        let (cache, clock) = cache_with_clock(CacheConfig::default().with_clock_skew(Duration::from_secs(1)));
        let short = permit_assertion("u1", "/secure", clock.now(), 10);

        cache.store("u1", "/secure", &[short]);
        assert!(cache.lookup("u1", "/secure").is_some());

        // Within tolerance
        clock.advance(Duration::from_secs(10));
        assert!(cache.lookup("u1", "/secure").is_some());

        // Beyond tolerance
        clock.advance(Duration::from_secs(1));
        assert!(cache.lookup("u1", "/secure").is_none());
        assert_eq!(cache.stats().evictions, 1);

        // Evicted, not just hidden
        clock.set(clock.now() - chrono::Duration::seconds(60));
        assert!(cache.lookup("u1", "/secure").is_none());
    }

    #[test]
    fn test_partially_expired_entry_keeps_valid_assertions() {
        let (cache, clock) = cache_with_clock(CacheConfig::default().with_clock_skew(Duration::ZERO));
        let short = permit_assertion("u1", "/secure", clock.now(), 10);
        let long = permit_assertion("u1", "/secure", clock.now(), 1000);

        cache.store("u1", "/secure", &[short, long.clone()]);
        clock.advance(Duration::from_secs(20));

        assert_eq!(cache.lookup("u1", "/secure").unwrap(), vec![long]);
    }

    #[test]
    fn test_entry_timeout() {
        let config = CacheConfig::default().with_entry_timeout(Some(Duration::from_secs(60)));
        let (cache, clock) = cache_with_clock(config);
        let assertion = permit_assertion("u1", "/secure", clock.now(), 3600);

        cache.store("u1", "/secure", &[assertion]);
        clock.advance(Duration::from_secs(61));

        assert!(cache.lookup("u1", "/secure").is_none());
    }

    #[test]
    fn test_cache_disabled() {
        let (cache, clock) = cache_with_clock(CacheConfig::disabled());
        let assertion = permit_assertion("u1", "/secure", clock.now(), 3600);

        cache.store("u1", "/secure", &[assertion]);
        assert!(cache.lookup("u1", "/secure").is_none());
    }

    #[test]
    fn test_invalidate_subject() {
        let (cache, clock) = cache_with_clock(CacheConfig::default());
        cache.store("u1", "/a", &[permit_assertion("u1", "/a", clock.now(), 3600)]);
        cache.store("u2", "/a", &[permit_assertion("u2", "/a", clock.now(), 3600)]);

        cache.invalidate("u1");

        assert!(cache.lookup("u1", "/a").is_none());
        assert!(cache.lookup("u2", "/a").is_some());
    }

    #[test]
    fn test_keys_are_independent() {
        let (cache, clock) = cache_with_clock(CacheConfig::default());
        cache.store("u1", "/a", &[permit_assertion("u1", "/a", clock.now(), 3600)]);

        assert!(cache.lookup("u1", "/a").is_some());
        assert!(cache.lookup("u1", "/b").is_none());
        assert!(cache.lookup("u2", "/a").is_none());
    }

    #[test]
    fn test_store_empty_is_noop() {
        let (cache, _clock) = cache_with_clock(CacheConfig::default());
        cache.store("u1", "/a", &[]);
        assert!(cache.lookup("u1", "/a").is_none());
    }

    #[test]
    fn test_decision_survives_merge() {
        let (cache, clock) = cache_with_clock(CacheConfig::default());
        let permit = permit_assertion("u1", "/a", clock.now(), 3600);
        cache.store("u1", "/a", &[permit]);

        let cached = cache.lookup("u1", "/a").unwrap();
        assert_eq!(cached[0].decisions()[0].decision, Decision::Permit);
    }

    #[test]
    fn test_statements_are_not_duplicated_under_new_ids() {
        let (cache, clock) = cache_with_clock(CacheConfig::default());
        let now = clock.now();
        let first = attribute_assertion("u1", "urn:role", "string", &["admin"], now, 3600);
        let renamed = Assertion::builder("_renamed", FIXTURE_ISSUER, "u1", now)
            .valid_between(first.not_before(), first.not_on_or_after())
            .attribute("urn:role", "string", ["admin"])
            .attribute("urn:email", "string", ["u1@example.org"])
            .build();

        cache.store("u1", "https://aa.example/", &[first]);
        cache.store("u1", "https://aa.example/", &[renamed.clone()]);
        cache.store("u1", "https://aa.example/", &[renamed]);

        let cached = cache.lookup("u1", "https://aa.example/").unwrap();
        let roles: Vec<_> = cached
            .iter()
            .flat_map(|a| a.attribute_values("urn:role", "string"))
            .collect();
        assert_eq!(roles.len(), 1);
        assert_eq!(cached.len(), 2);
        assert!(!cached[1].has_attribute("urn:role", "string"));
    }

    #[test]
    fn test_misses_leave_no_partitions() {
        let (cache, clock) = cache_with_clock(CacheConfig::default().with_clock_skew(Duration::ZERO));

        for i in 0..1000 {
            assert!(cache.lookup(&format!("u{i}"), "/a").is_none());
        }
        assert_eq!(cache.stats().subjects, 0);
        assert_eq!(cache.stats().misses, 1000);

        cache.store("u1", "/a", &[permit_assertion("u1", "/a", clock.now(), 10)]);
        assert_eq!(cache.stats().subjects, 1);

        clock.advance(Duration::from_secs(11));
        assert!(cache.lookup("u1", "/a").is_none());
        assert_eq!(cache.stats().subjects, 0);
    }

    #[test]
    fn test_concurrent_subjects() {
        let (cache, clock) = cache_with_clock(CacheConfig::default());
        let cache = Arc::new(cache);
        let now = clock.now();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let cache = Arc::clone(&cache);
                std::thread::spawn(move || {
                    let subject = format!("u{i}");
                    for _ in 0..50 {
                        cache.store(&subject, "/a", &[permit_assertion(&subject, "/a", now, 3600)]);
                        assert!(cache.lookup(&subject, "/a").is_some());
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.stats().subjects, 8);
        assert_eq!(cache.lookup("u3", "/a").unwrap().len(), 1);
    }
}
