//! TwoTierCache: memory tier in front of an optional persistent tier

use super::merge::{apply_partial_update, canonicalize_publish_payload};
use super::tier::{CacheEntry, CacheResult, PersistentTier};
use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Counters for one cache instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub memory_hits: u64,
    pub persistent_hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub persistent_write_failures: u64,
    /// Entries currently held in memory
    pub entries: usize,
}

#[derive(Default)]
struct Counters {
    memory_hits: AtomicU64,
    persistent_hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    persistent_write_failures: AtomicU64,
}

/// Two-tier cache for JSON payloads
///
/// Reads check memory, then the persistent tier; a persistent hit is
/// copied into memory before it is returned. Writes go to both tiers. A
/// persistent write failure is logged and counted but the call still
/// succeeds: the memory tier is authoritative for the process lifetime.
///
/// Mutations of one key are serialized by a per-key lock, so traffic on
/// different keys never waits on each other.
pub struct TwoTierCache {
    name: String,
    memory: DashMap<String, CacheEntry>,
    persistent: Option<Arc<dyn PersistentTier>>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    counters: Counters,
}

impl TwoTierCache {
    /// Open a cache. `persistent` may be `None` for a memory-only cache.
    pub async fn open(
        name: impl Into<String>,
        persistent: Option<Arc<dyn PersistentTier>>,
    ) -> CacheResult<Self> {
        let cache = Self::with_tier(name, persistent);
        info!(
            cache = %cache.name,
            tier = %cache.persistent.as_ref().map(|t| t.describe()).unwrap_or_else(|| "none".to_string()),
            "cache opened"
        );
        Ok(cache)
    }

    /// Memory-only cache.
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self::with_tier(name, None)
    }

    fn with_tier(name: impl Into<String>, persistent: Option<Arc<dyn PersistentTier>>) -> Self {
        Self {
            name: name.into(),
            memory: DashMap::new(),
            persistent,
            locks: DashMap::new(),
            counters: Counters::default(),
        }
    }

    /// Flush the persistent tier and drop the memory tier.
    pub async fn close(self) -> CacheResult<CacheStats> {
        let stats = self.stats();
        if let Some(tier) = &self.persistent {
            tier.flush().await?;
        }
        info!(cache = %self.name, ?stats, "cache closed");
        Ok(stats)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether `key` is currently held in memory, without touching counters.
    pub fn contains_in_memory(&self, key: &str) -> bool {
        self.memory.contains_key(key)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            memory_hits: self.counters.memory_hits.load(Ordering::Relaxed),
            persistent_hits: self.counters.persistent_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            writes: self.counters.writes.load(Ordering::Relaxed),
            persistent_write_failures: self
                .counters
                .persistent_write_failures
                .load(Ordering::Relaxed),
            entries: self.memory.len(),
        }
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.entry(key.to_string()).or_default().value())
    }

    /// Drop `key`'s lock entry once no other caller holds or awaits it.
    ///
    /// A waiter always owns a clone, so an entry with a strong count of
    /// one is unreachable and a later caller may safely get a fresh lock.
    fn release_lock(&self, key: &str, lock: Arc<Mutex<()>>) {
        drop(lock);
        self.locks.remove_if(key, |_, l| Arc::strong_count(l) == 1);
    }

    /// Payload for `key`, reading through to the persistent tier.
    pub async fn get(&self, key: &str) -> Option<Value> {
        self.get_entry(key).await.map(|e| e.payload)
    }

    /// Full entry for `key`, reading through to the persistent tier.
    pub async fn get_entry(&self, key: &str) -> Option<CacheEntry> {
        if let Some(entry) = self.cached(key) {
            self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
            return Some(entry);
        }

        let lock = self.lock_for(key);
        let found = {
            let _guard = lock.lock().await;
            self.read_through(key).await
        };
        self.release_lock(key, lock);
        found
    }

    async fn read_through(&self, key: &str) -> Option<CacheEntry> {
        // filled by a concurrent reader while we waited
        if let Some(entry) = self.cached(key) {
            self.counters.memory_hits.fetch_add(1, Ordering::Relaxed);
            return Some(entry);
        }

        match self.load_persistent(key).await {
            Some(entry) => {
                self.counters.persistent_hits.fetch_add(1, Ordering::Relaxed);
                self.memory.insert(key.to_string(), entry.clone());
                debug!(cache = %self.name, key, "persistent hit promoted to memory");
                Some(entry)
            }
            None => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Write `payload` to both tiers.
    pub async fn set(&self, key: &str, payload: Value) {
        let lock = self.lock_for(key);
        {
            let _guard = lock.lock().await;
            self.write(key, payload).await;
        }
        self.release_lock(key, lock);
    }

    /// Merge a partial (dot-path) update into the cached payload.
    ///
    /// Returns the merged payload, or `None` when neither tier holds `key`.
    pub async fn update(&self, key: &str, partial: &Value) -> Option<Value> {
        let lock = self.lock_for(key);
        let merged = {
            let _guard = lock.lock().await;
            let current = match self.cached(key) {
                Some(entry) => Some(entry),
                None => self.load_persistent(key).await,
            };
            match current {
                Some(entry) => {
                    let mut payload = entry.payload;
                    apply_partial_update(&mut payload, partial);
                    Some(self.write(key, payload).await)
                }
                None => None,
            }
        };
        self.release_lock(key, lock);
        merged
    }

    /// Drop `key` from both tiers.
    pub async fn invalidate(&self, key: &str) {
        let lock = self.lock_for(key);
        {
            let _guard = lock.lock().await;
            self.memory.remove(key);
            if let Some(tier) = &self.persistent {
                if let Err(e) = tier.remove(key).await {
                    warn!(cache = %self.name, key, error = %e, "persistent invalidate failed");
                }
            }
        }
        self.release_lock(key, lock);
    }

    /// Drop every entry from both tiers.
    pub async fn clear(&self) {
        self.memory.clear();
        if let Some(tier) = &self.persistent {
            if let Err(e) = tier.clear().await {
                warn!(cache = %self.name, error = %e, "persistent clear failed");
            }
        }
        self.locks.retain(|_, l| Arc::strong_count(l) > 1);
        info!(cache = %self.name, "cache cleared");
    }

    fn cached(&self, key: &str) -> Option<CacheEntry> {
        self.memory.get(key).map(|e| e.value().clone())
    }

    async fn load_persistent(&self, key: &str) -> Option<CacheEntry> {
        let tier = self.persistent.as_ref()?;
        match tier.load(key).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(cache = %self.name, key, error = %e, "persistent read failed, treating as miss");
                None
            }
        }
    }

    /// Both-tier write. Caller holds the key lock.
    async fn write(&self, key: &str, mut payload: Value) -> Value {
        if canonicalize_publish_payload(&mut payload) {
            debug!(cache = %self.name, key, "publish payload moved to top level");
        }
        let entry = CacheEntry::new(key, payload.clone());
        self.memory.insert(key.to_string(), entry.clone());
        self.counters.writes.fetch_add(1, Ordering::Relaxed);

        if let Some(tier) = &self.persistent {
            if let Err(e) = tier.save(&entry).await {
                self.counters
                    .persistent_write_failures
                    .fetch_add(1, Ordering::Relaxed);
                warn!(cache = %self.name, key, error = %e, "persistent write failed, memory tier remains authoritative");
            }
        }
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tier::{CacheError, FileTier};
    use async_trait::async_trait;
    use serde_json::json;

    struct BrokenTier;

    #[async_trait]
    impl PersistentTier for BrokenTier {
        async fn load(&self, _key: &str) -> CacheResult<Option<CacheEntry>> {
            Ok(None)
        }
        async fn save(&self, _entry: &CacheEntry) -> CacheResult<()> {
            Err(CacheError::Io(std::io::Error::other("disk full")))
        }
        async fn remove(&self, _key: &str) -> CacheResult<()> {
            Ok(())
        }
        async fn clear(&self) -> CacheResult<()> {
            Ok(())
        }
        fn describe(&self) -> String {
            "broken".to_string()
        }
    }

    #[tokio::test]
    async fn persistent_hit_populates_memory() {
        let dir = tempfile::tempdir().unwrap();
        let tier: Arc<dyn PersistentTier> = Arc::new(FileTier::open(dir.path()).await.unwrap());
        tier.save(&CacheEntry::new("doc:1", json!({"title": "Persisted"})))
            .await
            .unwrap();

        let cache = TwoTierCache::open("documents", Some(tier)).await.unwrap();
        assert!(!cache.contains_in_memory("doc:1"));

        assert_eq!(cache.get("doc:1").await, Some(json!({"title": "Persisted"})));
        assert!(cache.contains_in_memory("doc:1"));
        cache.get("doc:1").await;

        let stats = cache.stats();
        assert_eq!(stats.persistent_hits, 1);
        assert_eq!(stats.memory_hits, 1);
        assert_eq!(stats.misses, 0);
    }

    #[tokio::test]
    async fn set_writes_both_tiers() {
        let dir = tempfile::tempdir().unwrap();
        let file = Arc::new(FileTier::open(dir.path()).await.unwrap());
        let cache = TwoTierCache::open("results", Some(file.clone() as Arc<dyn PersistentTier>))
            .await
            .unwrap();

        cache.set("r", json!({"n": 1})).await;
        assert_eq!(file.load("r").await.unwrap().unwrap().payload, json!({"n": 1}));
        assert_eq!(cache.get("r").await, Some(json!({"n": 1})));
    }

    #[tokio::test]
    async fn persistent_write_failure_does_not_fail_set() {
        let cache = TwoTierCache::open("results", Some(Arc::new(BrokenTier)))
            .await
            .unwrap();
        cache.set("k", json!(1)).await;
        assert_eq!(cache.get("k").await, Some(json!(1)));
        assert_eq!(cache.stats().persistent_write_failures, 1);
    }

    #[tokio::test]
    async fn update_merges_in_place() {
        let cache = TwoTierCache::in_memory("documents");
        cache
            .set("d", json!({"title": "T", "analysis": {"status": "new", "n": 2}}))
            .await;
        let merged = cache
            .update("d", &json!({"analysis.status": "done"}))
            .await
            .unwrap();
        assert_eq!(merged, json!({"title": "T", "analysis": {"status": "done", "n": 2}}));
        assert!(cache.update("missing", &json!({"a": 1})).await.is_none());
    }

    #[tokio::test]
    async fn writes_canonicalize_publish_payload() {
        let cache = TwoTierCache::in_memory("results");
        cache
            .set("r", json!({"results": {"publishPayload": {"x": 1}}}))
            .await;
        let stored = cache.get("r").await.unwrap();
        assert_eq!(stored["publishPayload"], json!({"x": 1}));
        assert!(stored["results"].get("publishPayload").is_none());
    }

    #[tokio::test]
    async fn invalidate_keeps_the_lock_a_writer_is_waiting_on() {
        let cache = TwoTierCache::in_memory("results");
        cache.set("k", json!(1)).await;

        // a writer that has already cloned the key's lock
        let waiting = cache.lock_for("k");
        cache.invalidate("k").await;
        assert!(Arc::ptr_eq(&waiting, &cache.lock_for("k")));

        drop(waiting);
        cache.set("k", json!(2)).await;
        assert!(cache.locks.is_empty());
    }

    #[tokio::test]
    async fn lock_entries_do_not_accumulate() {
        let cache = TwoTierCache::in_memory("results");
        for i in 0..10 {
            let key = format!("k{i}");
            cache.set(&key, json!(i)).await;
            cache.update(&key, &json!({"seen": true})).await;
            cache.get(&key).await;
            cache.get("absent").await;
        }
        cache.invalidate("k0").await;
        assert!(cache.locks.is_empty());
    }

    #[tokio::test]
    async fn invalidate_and_clear_reach_the_persistent_tier() {
        let dir = tempfile::tempdir().unwrap();
        let tier: Arc<dyn PersistentTier> = Arc::new(FileTier::open(dir.path()).await.unwrap());
        let cache = TwoTierCache::open("documents", Some(tier.clone())).await.unwrap();

        cache.set("a", json!(1)).await;
        cache.set("b", json!(2)).await;
        cache.invalidate("a").await;
        assert!(cache.get("a").await.is_none());
        assert!(tier.load("a").await.unwrap().is_none());

        cache.clear().await;
        assert!(tier.load("b").await.unwrap().is_none());
        assert_eq!(cache.stats().entries, 0);
        let stats = cache.close().await.unwrap();
        assert_eq!(stats.writes, 2);
    }
}
