//! Tiered store: the central coordinator of the cache.
//!
//! The store:
//! - Serves reads L1 → L2 → L3, copying lower-tier hits upward
//! - Places writes by hotness and size, compressing large values
//! - Evicts a single victim when a tier is full
//! - Executes invalidation plans across every tier
//! - Runs the maintenance passes (expiry sweep, optimize, prefetch, warmup)
//!
//! The cache is a performance optimization. Internal failures are logged
//! and degrade to a miss; they are never surfaced to callers.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::codec::{CodecError, JsonCodec, ValueCodec};
use crate::cache::compressor::{CompressionError, Compressor};
use crate::cache::entry::{now_millis, CacheEntry, Payload, Tier};
use crate::cache::evictor::Evictor;
use crate::cache::generation::KeyGenerations;
use crate::cache::hotness::{HotnessTracker, BASELINE, HOT};
use crate::cache::invalidation::{InvalidationEngine, InvalidationRule, InvalidationStrategy, KeyPattern};
use crate::cache::prefetcher::PrefetchQueue;
use crate::cache::remote::{RemoteRecord, RemoteTier, RemoteTierError};
use crate::cache::snapshot::{CacheSnapshot, SnapshotEntry};
use crate::cache::stats::{Stats, StatsCollector};
use crate::cache::tier::{LocalTier, Lookup};
use crate::config::{CacheConfig, Config, ConfigError, MaintenanceConfig};

#[derive(Error, Debug)]
pub enum CacheError {
    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Compression(#[from] CompressionError),

    #[error(transparent)]
    Remote(#[from] RemoteTierError),
}

/// Write priority. `High` places the value in L1 like a hot key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// Per-write options.
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Overrides the target tier's default TTL.
    pub ttl_ms: Option<u64>,
    pub dependencies: Vec<String>,
    /// Overrides automatic placement.
    pub force_tier: Option<Tier>,
    pub priority: Priority,
}

impl SetOptions {
    pub fn ttl(mut self, ttl_ms: u64) -> Self {
        self.ttl_ms = Some(ttl_ms);
        self
    }

    pub fn depends_on<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn tier(mut self, tier: Tier) -> Self {
        self.force_tier = Some(tier);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// One item of a batch write.
#[derive(Debug, Clone)]
pub struct BatchEntry<T> {
    pub key: String,
    pub value: T,
    pub options: SetOptions,
}

impl<T> BatchEntry<T> {
    pub fn new(key: impl Into<String>, value: T) -> Self {
        Self {
            key: key.into(),
            value,
            options: SetOptions::default(),
        }
    }

    pub fn with_options(mut self, options: SetOptions) -> Self {
        self.options = options;
        self
    }
}

/// Options for [`TieredCache::invalidate`].
#[derive(Debug, Clone, Copy, Default)]
pub struct InvalidateOptions {
    pub strategy: InvalidationStrategy,
    /// Deletion chunk size; defaults to the configured batch size.
    pub batch_size: Option<usize>,
}

impl InvalidateOptions {
    pub fn strategy(strategy: InvalidationStrategy) -> Self {
        Self {
            strategy,
            batch_size: None,
        }
    }
}

/// Outcome of an optimize pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OptimizeReport {
    /// Bytes released by expiry and compression.
    pub memory_freed: usize,
    /// Entries expired, compressed, promoted or demoted.
    pub entries_optimized: usize,
    /// Percentage of requests served straight from L1.
    pub performance_gain: f64,
}

/// The multi-level cache.
pub struct TieredCache<T, C = JsonCodec> {
    config: CacheConfig,
    maintenance: MaintenanceConfig,
    codec: C,
    compressor: Compressor,
    evictor: Evictor,
    l1: LocalTier<T>,
    l2: LocalTier<T>,
    remote: Option<Arc<dyn RemoteTier>>,
    remote_size: AtomicUsize,
    hotness: Mutex<HotnessTracker>,
    generations: KeyGenerations,
    rules: RwLock<InvalidationEngine>,
    prefetch: PrefetchQueue,
    stats: StatsCollector,
}

impl<T, C> TieredCache<T, C>
where
    T: Clone + Send + Sync + 'static,
    C: ValueCodec<T> + Default,
{
    /// Create a cache with the default codec.
    pub fn new(config: CacheConfig) -> Result<Self, ConfigError> {
        Self::with_codec(config, C::default())
    }

    /// Create a cache from the full application config.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Self::new(config.cache.clone())?.with_maintenance(config.maintenance.clone())
    }
}

impl<T, C> TieredCache<T, C>
where
    T: Clone + Send + Sync + 'static,
    C: ValueCodec<T>,
{
    /// Create a cache with an explicit codec.
    pub fn with_codec(config: CacheConfig, codec: C) -> Result<Self, ConfigError> {
        config.validate()?;
        if config.l3.enabled {
            warn!("L3 enabled in config but no remote tier attached; L3 stays off until one is");
        }
        warn_if_demotion_unreachable(&config, &MaintenanceConfig::default());

        info!(
            l1_max = config.l1.max_entries,
            l2_max = config.l2.max_entries,
            strategy = ?config.eviction.strategy,
            compression = config.compression.enabled,
            threshold = config.compression.threshold_bytes,
            "Initializing tiered cache"
        );

        Ok(Self {
            compressor: Compressor::new(config.compression.clone()),
            evictor: Evictor::new(config.eviction.clone()),
            l1: LocalTier::new(Tier::L1, config.l1.max_entries, config.l1.ttl_ms),
            l2: LocalTier::new(Tier::L2, config.l2.max_entries, config.l2.ttl_ms),
            remote: None,
            remote_size: AtomicUsize::new(0),
            hotness: Mutex::new(HotnessTracker::new(config.hot_set_capacity)),
            generations: KeyGenerations::new(),
            rules: RwLock::new(InvalidationEngine::new()),
            prefetch: PrefetchQueue::new(),
            stats: StatsCollector::new(),
            maintenance: MaintenanceConfig::default(),
            codec,
            config,
        })
    }

    /// Attach a remote L3 tier. Attaching one enables L3.
    pub fn with_remote(mut self, remote: Arc<dyn RemoteTier>) -> Self {
        self.config.l3.enabled = true;
        self.remote = Some(remote);
        self
    }

    pub fn with_maintenance(mut self, maintenance: MaintenanceConfig) -> Result<Self, ConfigError> {
        maintenance.validate()?;
        warn_if_demotion_unreachable(&self.config, &maintenance);
        self.maintenance = maintenance;
        Ok(self)
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn maintenance_config(&self) -> &MaintenanceConfig {
        &self.maintenance
    }

    fn remote(&self) -> Option<&Arc<dyn RemoteTier>> {
        self.remote.as_ref().filter(|_| self.config.l3.enabled)
    }

    fn local(&self, tier: Tier) -> Option<&LocalTier<T>> {
        match tier {
            Tier::L1 => Some(&self.l1),
            Tier::L2 => Some(&self.l2),
            Tier::L3 => None,
        }
    }

    // ─── Reads ─────────────────────────────────────────────────────────────

    /// Look up a key in L1, then L2, then L3.
    ///
    /// Returns None on a miss and on any internal failure.
    pub async fn get(&self, key: &str) -> Option<T> {
        let start = Instant::now();
        match self.lookup(key).await {
            Ok(Some((value, tier))) => {
                self.stats.record_hit(tier, start.elapsed());
                debug!(key, tier = %tier, "Cache hit");
                Some(value)
            }
            Ok(None) => {
                self.stats.record_miss(Tier::L1, start.elapsed());
                debug!(key, "Cache miss");
                None
            }
            Err(e) => {
                self.stats.record_miss(Tier::L1, start.elapsed());
                warn!(key, error = %e, "Cache lookup failed, treating as miss");
                None
            }
        }
    }

    async fn lookup(&self, key: &str) -> Result<Option<(T, Tier)>, CacheError> {
        let now = now_millis();

        if let Lookup::Hit(entry) = self.l1.lookup(key, now, HOT) {
            self.hotness.lock().record(key);
            let value = self.materialize(key, &entry)?;
            return Ok(Some((value, Tier::L1)));
        }

        // Anything below L1 is only copied upward if the key was not
        // rewritten or invalidated while it was being read.
        let seen = self.generations.current(key);

        let hotness = self.hotness.lock().hotness(key);
        if let Lookup::Hit(entry) = self.l2.lookup(key, now, hotness) {
            let value = self.materialize(key, &entry)?;
            if let Some(_slot) = self.generations.unchanged_since(key, seen) {
                self.promote_on_hit(key, &entry, Tier::L1);
            }
            return Ok(Some((value, Tier::L2)));
        }

        let Some(remote) = self.remote() else {
            return Ok(None);
        };
        let Some(record) = remote.get(key).await? else {
            return Ok(None);
        };
        if record.is_expired(now) {
            remote.remove(key).await?;
            return Ok(None);
        }

        let mut entry = self.entry_from_record(record, Tier::L3)?;
        entry.touch();
        entry.hotness = hotness;
        let value = self.materialize(key, &entry)?;
        if !remote.touch(key, entry.last_accessed_at).await? {
            debug!(key, "Remote record removed during read, not promoting");
            return Ok(Some((value, Tier::L3)));
        }

        if self.promote_remote_hit(key, &entry, seen) && !self.config.retain_on_promote {
            remote.remove(key).await?;
        }
        Ok(Some((value, Tier::L3)))
    }

    /// Copy an L3 hit into the local tiers unless the key changed since
    /// generation `seen`. Without retention only L1 receives a copy.
    fn promote_remote_hit(&self, key: &str, entry: &CacheEntry<T>, seen: u64) -> bool {
        let Some(_slot) = self.generations.unchanged_since(key, seen) else {
            debug!(key, "Key changed during remote read, not promoting");
            return false;
        };
        if self.config.retain_on_promote {
            self.promote_on_hit(key, entry, Tier::L2);
        }
        self.promote_on_hit(key, entry, Tier::L1);
        true
    }

    /// Decode an entry's value, dropping the entry if it is corrupt.
    fn materialize(&self, key: &str, entry: &CacheEntry<T>) -> Result<T, CacheError> {
        let result = match &entry.payload {
            Payload::Value(value) => Ok(value.clone()),
            Payload::Compressed(bytes) => self.decompress_value(bytes),
        };
        if result.is_err() {
            if let Some(tier) = self.local(entry.tier) {
                tier.remove(key);
            }
        }
        result
    }

    fn decompress_value(&self, bytes: &[u8]) -> Result<T, CacheError> {
        let raw = self.compressor.decompress(bytes)?;
        Ok(self.codec.decode(&raw)?)
    }

    /// Copy a lower-tier hit into `target` under the target's own TTL.
    fn promote_on_hit(&self, key: &str, entry: &CacheEntry<T>, target: Tier) {
        let Some(tier) = self.local(target) else {
            return;
        };
        let copy = entry.copy_to(target, tier.ttl_ms());
        self.insert_local(tier, key, copy);
        self.stats.record_promotion();

        if !self.config.retain_on_promote {
            if let Some(source) = self.local(entry.tier) {
                source.remove(key);
            }
        }
        debug!(key, from = %entry.tier, to = %target, "Promoted entry");
    }

    /// Look up many keys, `batch_size` at a time.
    pub async fn get_batch(&self, keys: &[String]) -> HashMap<String, Option<T>> {
        let mut results = HashMap::with_capacity(keys.len());
        for chunk in keys.chunks(self.config.batch_size) {
            let lookups = chunk
                .iter()
                .map(|key| async move { (key.clone(), self.get(key).await) });
            results.extend(join_all(lookups).await);
        }
        results
    }

    // ─── Writes ────────────────────────────────────────────────────────────

    /// Store a value. Failures are logged, never returned.
    pub async fn set(&self, key: &str, value: T, options: SetOptions) {
        if let Err(e) = self.try_set(key, value, options).await {
            warn!(key, error = %e, "Cache set failed");
        }
    }

    async fn try_set(&self, key: &str, value: T, options: SetOptions) -> Result<(), CacheError> {
        let size_bytes = self.codec.size_of(&value)?;
        let is_hot = self.hotness.lock().is_hot(key);

        let mut tier = options
            .force_tier
            .unwrap_or_else(|| self.determine_optimal_tier(key, size_bytes, options.priority));
        if tier == Tier::L3 && self.remote().is_none() {
            tier = Tier::L2;
        }

        let ttl_ms = options.ttl_ms.unwrap_or(self.config.ttl_ms(tier));
        let mut entry = CacheEntry::new(value, size_bytes, ttl_ms, tier);
        entry.dependency_keys = options.dependencies.into_iter().collect();
        if is_hot {
            entry.hotness = HOT;
        }
        if let Some(stored) = self.compress_if_large(&mut entry)? {
            self.stats.record_compression(entry.size_bytes, stored);
        }

        // The remote tier changes first: a read that still sees the old
        // remote record started before the generation advances below.
        if let Some(remote) = self.remote() {
            if tier == Tier::L3 {
                remote.put(key, self.record_from_entry(&entry)?).await?;
            } else if let Err(e) = remote.remove(key).await {
                warn!(key, error = %e, "Could not drop remote copy, local write shadows it");
            }
        }

        let dual_write = (is_hot || options.priority == Priority::High) && tier != Tier::L1;
        {
            let _slot = self.generations.advance(key);
            if dual_write {
                let l1_ttl = options.ttl_ms.unwrap_or(self.l1.ttl_ms());
                self.insert_local(&self.l1, key, entry.copy_to(Tier::L1, l1_ttl));
            }

            // Drop stale copies so an older value cannot shadow this write.
            for other in [&self.l1, &self.l2] {
                if other.tier() != tier && !(dual_write && other.tier() == Tier::L1) {
                    other.remove(key);
                }
            }

            if let Some(local) = self.local(tier) {
                self.insert_local(local, key, entry);
            }
        }

        debug!(key, tier = %tier, size_bytes, ttl_ms, dual_write, "Cache set");
        Ok(())
    }

    /// Pick the tier a new value should live in.
    pub fn determine_optimal_tier(&self, key: &str, size_bytes: usize, priority: Priority) -> Tier {
        let hotness = self.hotness.lock().hotness(key);
        if priority == Priority::High || hotness > self.maintenance.promote_threshold {
            Tier::L1
        } else if size_bytes > self.compressor.threshold() {
            if self.remote().is_some() {
                Tier::L3
            } else {
                Tier::L2
            }
        } else {
            Tier::L1
        }
    }

    /// Compress a raw entry above the threshold in place. Returns the stored
    /// size when it compressed; the caller records the stats once the entry
    /// is actually kept.
    fn compress_if_large(&self, entry: &mut CacheEntry<T>) -> Result<Option<usize>, CacheError> {
        if entry.is_compressed() || !self.compressor.should_compress(entry.size_bytes) {
            return Ok(None);
        }
        let Payload::Value(value) = &entry.payload else {
            return Ok(None);
        };
        let encoded = self.codec.encode(value)?;
        let compressed = self.compressor.compress(&encoded)?;
        let stored = compressed.len();
        entry.set_compressed(compressed);
        Ok(Some(stored))
    }

    fn insert_local(&self, tier: &LocalTier<T>, key: &str, entry: CacheEntry<T>) {
        if let Some(victim) = tier.insert(key, entry, &self.evictor) {
            self.stats.record_eviction();
            debug!(victim = victim.as_str(), tier = %tier.tier(), "Evicted entry");
        }
    }

    async fn remote_put(&self, key: &str, record: RemoteRecord) -> Result<(), CacheError> {
        if let Some(remote) = self.remote() {
            remote.put(key, record).await?;
        }
        Ok(())
    }

    /// Store many values, `batch_size` at a time.
    pub async fn set_batch(&self, entries: Vec<BatchEntry<T>>) {
        let mut entries = entries.into_iter();
        loop {
            let chunk: Vec<BatchEntry<T>> = entries.by_ref().take(self.config.batch_size).collect();
            if chunk.is_empty() {
                break;
            }
            let writes = chunk
                .into_iter()
                .map(|item| async move { self.set(&item.key, item.value, item.options).await });
            join_all(writes).await;
        }
    }

    fn record_from_entry(&self, entry: &CacheEntry<T>) -> Result<RemoteRecord, CacheError> {
        let (bytes, compressed) = match &entry.payload {
            Payload::Value(value) => (self.codec.encode(value)?, false),
            Payload::Compressed(bytes) => (bytes.clone(), true),
        };
        Ok(RemoteRecord {
            bytes,
            compressed,
            created_at: entry.created_at,
            ttl_ms: entry.ttl_ms,
            access_count: entry.access_count,
            last_accessed_at: entry.last_accessed_at,
            size_bytes: entry.size_bytes,
            dependency_keys: entry.dependency_keys.iter().cloned().collect(),
        })
    }

    fn entry_from_record(&self, record: RemoteRecord, tier: Tier) -> Result<CacheEntry<T>, CacheError> {
        let mut entry = if record.compressed {
            CacheEntry::new_compressed(record.bytes, record.size_bytes, record.ttl_ms, tier)
        } else {
            let value = self.codec.decode(&record.bytes)?;
            CacheEntry::new(value, record.size_bytes, record.ttl_ms, tier)
        };
        entry.created_at = record.created_at;
        entry.access_count = record.access_count;
        entry.last_accessed_at = record.last_accessed_at;
        entry.dependency_keys = record.dependency_keys.into_iter().collect();
        Ok(entry)
    }

    // ─── Invalidation ──────────────────────────────────────────────────────

    pub fn add_invalidation_rule(&self, rule: InvalidationRule) {
        self.rules.write().add_rule(rule);
    }

    /// Invalidate every key matching `pattern`, plus the dependents declared
    /// by matching rules. Returns the number of keys removed or marked.
    ///
    /// String patterns are regular expressions matched anywhere in the key,
    /// so `"user:1"` also hits `user:10` and `user:123`. Anchor the pattern
    /// (`"^user:1$"`) to invalidate exactly one key.
    pub async fn invalidate(&self, pattern: impl Into<KeyPattern>, options: InvalidateOptions) -> usize {
        let pattern = pattern.into();
        let all_keys = self.all_keys().await;
        let candidates: BTreeSet<String> = all_keys
            .iter()
            .filter(|key| pattern.matches(key))
            .cloned()
            .collect();
        if candidates.is_empty() {
            debug!(pattern = pattern.as_str(), "Nothing to invalidate");
            return 0;
        }

        let plan = self.rules.read().plan(&candidates, &all_keys, options.strategy);
        let batch_size = options.batch_size.unwrap_or(self.config.batch_size).max(1);
        let delete: Vec<&String> = plan.delete.iter().collect();

        let mut affected = 0;
        for chunk in delete.chunks(batch_size) {
            for key in chunk {
                if self.delete_everywhere(key).await {
                    affected += 1;
                }
            }
            tokio::task::yield_now().await;
        }
        for key in &plan.expire {
            if self.expire_everywhere(key).await {
                affected += 1;
            }
        }

        self.stats.record_invalidations(affected as u64);
        info!(
            pattern = pattern.as_str(),
            strategy = ?options.strategy,
            deleted = plan.delete.len(),
            expired = plan.expire.len(),
            affected,
            "Invalidation complete"
        );
        affected
    }

    /// Every key in any tier. A failing remote tier contributes nothing.
    async fn all_keys(&self) -> BTreeSet<String> {
        let mut keys: BTreeSet<String> = self.l1.keys().into_iter().collect();
        keys.extend(self.l2.keys());
        if let Some(remote) = self.remote() {
            match remote.keys().await {
                Ok(remote_keys) => keys.extend(remote_keys),
                Err(e) => warn!(error = %e, "Could not list remote keys"),
            }
        }
        keys
    }

    /// Remove a key from every tier. True if it was present anywhere.
    ///
    /// The remote copy goes first, then the local copies under a new
    /// generation, so an in-flight remote read cannot copy it back.
    async fn delete_everywhere(&self, key: &str) -> bool {
        let mut removed = false;
        if let Some(remote) = self.remote() {
            match remote.remove(key).await {
                Ok(found) => removed |= found,
                Err(e) => warn!(key, error = %e, "Remote delete failed"),
            }
        }
        {
            let _slot = self.generations.advance(key);
            removed |= self.l1.remove(key).is_some();
            removed |= self.l2.remove(key).is_some();
        }
        self.hotness.lock().forget(key);
        removed
    }

    /// Mark a key expired in every tier. True if it was present anywhere.
    async fn expire_everywhere(&self, key: &str) -> bool {
        let mut found = false;
        if let Some(remote) = self.remote() {
            match Self::expire_remote(remote, key).await {
                Ok(hit) => found |= hit,
                Err(e) => warn!(key, error = %e, "Remote expire failed"),
            }
        }
        let _slot = self.generations.advance(key);
        found |= self.l1.expire(key);
        found |= self.l2.expire(key);
        found
    }

    async fn expire_remote(remote: &Arc<dyn RemoteTier>, key: &str) -> Result<bool, RemoteTierError> {
        let Some(mut record) = remote.get(key).await? else {
            return Ok(false);
        };
        record.ttl_ms = 0;
        remote.put(key, record).await?;
        Ok(true)
    }

    // ─── Maintenance ───────────────────────────────────────────────────────

    /// Remove expired entries from every tier and enforce the memory ceiling.
    /// Returns the number of entries removed.
    pub async fn sweep_expired(&self) -> usize {
        let (expired, _) = self.remove_expired_local();
        let mut removed = expired;
        match self.sweep_remote().await {
            Ok(n) => removed += n,
            Err(e) => warn!(error = %e, "Remote sweep failed"),
        }
        removed += self.enforce_memory_ceiling();
        if removed > 0 {
            debug!(removed, "Sweep complete");
        }
        removed
    }

    /// Returns (entries removed, bytes freed).
    fn remove_expired_local(&self) -> (usize, usize) {
        let now = now_millis();
        let mut count = 0;
        let mut bytes = 0;
        for tier in [&self.l1, &self.l2] {
            for (_, size) in tier.remove_expired(now) {
                count += 1;
                bytes += size;
            }
        }
        (count, bytes)
    }

    async fn sweep_remote(&self) -> Result<usize, CacheError> {
        let Some(remote) = self.remote() else {
            return Ok(0);
        };
        let now = now_millis();
        let keys = remote.keys().await?;
        let mut removed = 0;
        for key in &keys {
            if let Some(record) = remote.get(key).await? {
                if record.is_expired(now) && remote.remove(key).await? {
                    removed += 1;
                }
            }
        }
        self.remote_size
            .store(keys.len().saturating_sub(removed), Ordering::Relaxed);
        Ok(removed)
    }

    /// Evict from L2, then L1, until local memory is under the ceiling.
    fn enforce_memory_ceiling(&self) -> usize {
        let ceiling = self.config.max_memory_bytes;
        if ceiling == 0 {
            return 0;
        }
        let mut total = self.l1.memory_bytes() + self.l2.memory_bytes();
        let mut evicted = 0;
        for tier in [&self.l2, &self.l1] {
            while total > ceiling {
                let Some(victim) = tier.victims(&self.evictor, 1).pop() else {
                    break;
                };
                if let Some(entry) = tier.remove(&victim) {
                    total = total.saturating_sub(entry.size_bytes);
                    evicted += 1;
                    self.stats.record_eviction();
                }
            }
        }
        if evicted > 0 {
            info!(evicted, ceiling, "Memory ceiling enforced");
        }
        evicted
    }

    /// Run every optimization step. Each step is independent: a failure is
    /// logged and the remaining steps still run.
    pub async fn optimize(&self) -> OptimizeReport {
        let mut report = OptimizeReport::default();

        let (expired, freed) = self.remove_expired_local();
        report.entries_optimized += expired;
        report.memory_freed += freed;
        match self.sweep_remote().await {
            Ok(n) => report.entries_optimized += n,
            Err(e) => warn!(step = "expire", error = %e, "Optimize step failed"),
        }

        match self.compress_oversized() {
            Ok((count, saved)) => {
                report.entries_optimized += count;
                report.memory_freed += saved;
            }
            Err(e) => warn!(step = "compress", error = %e, "Optimize step failed"),
        }

        let (promoted, demoted) = self.rebalance();
        report.entries_optimized += promoted + demoted;

        let stats = self.get_stats();
        let l1_hits = stats.tier(Tier::L1).map(|t| t.hits).unwrap_or(0);
        report.performance_gain = if stats.overall.total_requests == 0 {
            0.0
        } else {
            l1_hits as f64 / stats.overall.total_requests as f64 * 100.0
        };

        info!(
            memory_freed = report.memory_freed,
            entries_optimized = report.entries_optimized,
            promoted,
            demoted,
            performance_gain = report.performance_gain,
            "Optimize pass complete"
        );
        report
    }

    /// Compress entries above the threshold that are still stored raw.
    /// Returns (entries compressed, bytes saved).
    fn compress_oversized(&self) -> Result<(usize, usize), CacheError> {
        let mut count = 0;
        let mut saved = 0;
        for tier in [&self.l1, &self.l2] {
            let candidates = tier.collect_where(|_, entry| {
                !entry.is_compressed() && self.compressor.should_compress(entry.size_bytes)
            });
            for (key, mut entry) in candidates {
                let seq = entry.access_seq;
                let stored = match self.compress_if_large(&mut entry) {
                    Ok(Some(stored)) => stored,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(key = key.as_str(), error = %e, "Compression failed");
                        continue;
                    }
                };
                let size_bytes = entry.size_bytes;
                // A read or write in between wins; its entry is kept as is.
                if tier.replace_if_unchanged(&key, seq, entry) {
                    self.stats.record_compression(size_bytes, stored);
                    count += 1;
                    saved += size_bytes.saturating_sub(stored);
                }
            }
        }
        Ok((count, saved))
    }

    /// Refresh hotness, then move hot L2 entries up and cold L1 entries down,
    /// space permitting. Returns (promoted, demoted).
    fn rebalance(&self) -> (usize, usize) {
        let now = now_millis();
        let cold_after = self.maintenance.cold_after_ms;
        {
            let tracker = self.hotness.lock();
            for tier in [&self.l1, &self.l2] {
                tier.for_each_mut(|key, entry| {
                    entry.refresh_hotness(tracker.is_hot(key), BASELINE, now, cold_after)
                });
            }
        }

        let promote_threshold = self.maintenance.promote_threshold;
        let mut promoted = 0;
        for (key, _) in self.l2.collect_where(|_, e| e.hotness > promote_threshold) {
            if self.promote(&key, Tier::L2, Tier::L1) {
                promoted += 1;
            }
        }

        let demote_threshold = self.maintenance.demote_threshold;
        let mut demoted = 0;
        for (key, _) in self.l1.collect_where(|_, e| e.hotness < demote_threshold) {
            if self.demote(&key, Tier::L1, Tier::L2) {
                demoted += 1;
            }
        }

        (promoted, demoted)
    }

    /// Copy an entry from `from` into the faster tier `to`, space permitting.
    pub fn promote(&self, key: &str, from: Tier, to: Tier) -> bool {
        if to >= from {
            return false;
        }
        let (Some(source), Some(target)) = (self.local(from), self.local(to)) else {
            return false;
        };
        let _slot = self.generations.advance(key);
        let Some(entry) = source.peek(key).filter(|e| !e.is_expired(now_millis())) else {
            return false;
        };
        if !target.insert_if_space(key, entry.copy_to(to, target.ttl_ms())) {
            return false;
        }
        if !self.config.retain_on_promote {
            source.remove(key);
        }
        self.stats.record_promotion();
        debug!(key, from = %from, to = %to, "Promoted entry");
        true
    }

    /// Move an entry from `from` into the slower tier `to`, space permitting.
    pub fn demote(&self, key: &str, from: Tier, to: Tier) -> bool {
        if to <= from {
            return false;
        }
        let (Some(source), Some(target)) = (self.local(from), self.local(to)) else {
            return false;
        };
        let _slot = self.generations.advance(key);
        let Some(entry) = source.peek(key) else {
            return false;
        };
        if !target.insert_if_space(key, entry.copy_to(to, target.ttl_ms())) {
            return false;
        }
        source.remove(key);
        self.stats.record_demotion();
        debug!(key, from = %from, to = %to, "Demoted entry");
        true
    }

    // ─── Prefetch & warmup ─────────────────────────────────────────────────

    /// Queue keys for background promotion into L1. Fire and forget.
    pub fn prefetch<I, S>(&self, keys: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if !self.config.prefetch_enabled {
            return;
        }
        let added = self.prefetch.push(keys);
        debug!(added, "Prefetch queued");
    }

    pub(crate) fn prefetch_queue(&self) -> &PrefetchQueue {
        &self.prefetch
    }

    /// Promote up to `max` queued keys into L1. Failures are dropped.
    pub async fn process_prefetch(&self, max: usize) -> usize {
        let mut promoted = 0;
        for key in self.prefetch.drain(max) {
            match self.prefetch_one(&key).await {
                Ok(true) => promoted += 1,
                Ok(false) => {}
                Err(e) => debug!(key = key.as_str(), error = %e, "Prefetch dropped"),
            }
        }
        promoted
    }

    async fn prefetch_one(&self, key: &str) -> Result<bool, CacheError> {
        let now = now_millis();
        if self.l1.contains(key) {
            return Ok(false);
        }
        let seen = self.generations.current(key);
        if let Some(entry) = self.l2.peek(key).filter(|e| !e.is_expired(now)) {
            let Some(_slot) = self.generations.unchanged_since(key, seen) else {
                return Ok(false);
            };
            self.promote_on_hit(key, &entry, Tier::L1);
            return Ok(true);
        }
        let Some(remote) = self.remote() else {
            return Ok(false);
        };
        match remote.get(key).await? {
            Some(record) if !record.is_expired(now) => {
                let entry = self.entry_from_record(record, Tier::L3)?;
                let promoted = self.promote_remote_hit(key, &entry, seen);
                if promoted && !self.config.retain_on_promote {
                    remote.remove(key).await?;
                }
                Ok(promoted)
            }
            _ => Ok(false),
        }
    }

    /// Fill free L1 slots with the most used L2 entries.
    pub fn warmup(&self) -> usize {
        let free = self.l1.free_slots();
        if free == 0 {
            return 0;
        }
        let now = now_millis();
        let mut candidates = self.l2.collect_where(|_, e| !e.is_expired(now));
        candidates.sort_by(|a, b| b.1.access_count.cmp(&a.1.access_count));

        let mut warmed = 0;
        for (key, _) in candidates.into_iter().take(free) {
            if self.promote(&key, Tier::L2, Tier::L1) {
                warmed += 1;
            }
        }
        info!(warmed, "Warmup complete");
        warmed
    }

    // ─── Stats, backup, reset ──────────────────────────────────────────────

    pub fn get_stats(&self) -> Stats {
        self.stats.snapshot(|tier| match tier {
            Tier::L1 => (self.l1.len(), self.l1.memory_bytes()),
            Tier::L2 => (self.l2.len(), self.l2.memory_bytes()),
            Tier::L3 => (self.remote_size.load(Ordering::Relaxed), 0),
        })
    }

    /// Export every live entry with its decoded value. A key present in
    /// several tiers is exported once, from the fastest tier.
    pub async fn export(&self) -> CacheSnapshot<T> {
        let now = now_millis();
        let mut seen = HashSet::new();
        let mut entries = Vec::new();

        for tier in [&self.l1, &self.l2] {
            for (key, entry) in tier.collect_where(|_, e| !e.is_expired(now)) {
                if !seen.insert(key.clone()) {
                    continue;
                }
                match self.snapshot_entry(key, &entry) {
                    Ok(item) => entries.push(item),
                    Err(e) => warn!(tier = %tier.tier(), error = %e, "Skipping entry on export"),
                }
            }
        }

        if let Some(remote) = self.remote() {
            if let Err(e) = self.export_remote(remote, now, &mut seen, &mut entries).await {
                warn!(error = %e, "Remote export incomplete");
            }
        }

        info!(entries = entries.len(), "Cache exported");
        CacheSnapshot::new(now, entries)
    }

    async fn export_remote(
        &self,
        remote: &Arc<dyn RemoteTier>,
        now: u64,
        seen: &mut HashSet<String>,
        entries: &mut Vec<SnapshotEntry<T>>,
    ) -> Result<(), CacheError> {
        for key in remote.keys().await? {
            if seen.contains(&key) {
                continue;
            }
            let Some(record) = remote.get(&key).await? else {
                continue;
            };
            if record.is_expired(now) {
                continue;
            }
            let entry = self.entry_from_record(record, Tier::L3)?;
            seen.insert(key.clone());
            entries.push(self.snapshot_entry(key, &entry)?);
        }
        Ok(())
    }

    fn snapshot_entry(&self, key: String, entry: &CacheEntry<T>) -> Result<SnapshotEntry<T>, CacheError> {
        let value = match &entry.payload {
            Payload::Value(value) => value.clone(),
            Payload::Compressed(bytes) => self.decompress_value(bytes)?,
        };
        Ok(SnapshotEntry {
            key,
            value,
            tier: entry.tier,
            created_at: entry.created_at,
            ttl_ms: entry.ttl_ms,
            access_count: entry.access_count,
            last_accessed_at: entry.last_accessed_at,
            size_bytes: entry.size_bytes,
            dependency_keys: entry.dependency_keys.iter().cloned().collect(),
        })
    }

    /// Load a snapshot. Invalid or expired entries are skipped.
    /// Returns the number of entries loaded.
    pub async fn import(&self, snapshot: CacheSnapshot<T>) -> usize {
        let now = now_millis();
        let total = snapshot.entries.len();
        let mut loaded = 0;

        for item in snapshot.entries {
            if let Err(reason) = item.validate(now) {
                debug!(error = %reason, "Skipping snapshot entry");
                continue;
            }
            let key = item.key.clone();
            match self.import_entry(item).await {
                Ok(()) => loaded += 1,
                Err(e) => warn!(key = key.as_str(), error = %e, "Failed to import entry"),
            }
        }

        info!(loaded, skipped = total - loaded, "Snapshot imported");
        loaded
    }

    async fn import_entry(&self, item: SnapshotEntry<T>) -> Result<(), CacheError> {
        let tier = match item.tier {
            Tier::L3 if self.remote().is_none() => Tier::L2,
            tier => tier,
        };
        let mut entry = CacheEntry::new(item.value, item.size_bytes, item.ttl_ms, tier);
        entry.created_at = item.created_at;
        entry.access_count = item.access_count;
        entry.last_accessed_at = item.last_accessed_at;
        entry.dependency_keys = item.dependency_keys.into_iter().collect();
        if let Some(stored) = self.compress_if_large(&mut entry)? {
            self.stats.record_compression(entry.size_bytes, stored);
        }

        match self.local(tier) {
            Some(local) => {
                let _slot = self.generations.advance(&item.key);
                self.insert_local(local, &item.key, entry);
            }
            None => {
                let record = self.record_from_entry(&entry)?;
                self.remote_put(&item.key, record).await?;
            }
        }
        Ok(())
    }

    /// Drop every entry from every tier.
    pub async fn clear(&self) {
        let cleared = self.l1.clear() + self.l2.clear();
        if let Some(remote) = self.remote() {
            if let Err(e) = remote.clear().await {
                warn!(error = %e, "Remote clear failed");
            }
            self.remote_size.store(0, Ordering::Relaxed);
        }
        self.hotness.lock().clear();
        self.prefetch.clear();
        info!(cleared, "Cache cleared");
    }

    /// Whether `key` currently sits in the given local tier.
    pub fn contains_in(&self, tier: Tier, key: &str) -> bool {
        self.local(tier).map(|t| t.contains(key)).unwrap_or(false)
    }

    /// Raw entry in a local tier, without counting an access.
    pub fn peek(&self, tier: Tier, key: &str) -> Option<CacheEntry<T>> {
        self.local(tier).and_then(|t| t.peek(key))
    }

    pub fn is_hot(&self, key: &str) -> bool {
        self.hotness.lock().is_hot(key)
    }
}

fn warn_if_demotion_unreachable(config: &CacheConfig, maintenance: &MaintenanceConfig) {
    let idle_ms = maintenance.demotion_idle_ms();
    if idle_ms >= config.l1.ttl_ms {
        warn!(
            demotion_idle_ms = idle_ms,
            l1_ttl_ms = config.l1.ttl_ms,
            "L1 entries expire before they can turn cold; demotion will never run"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache() -> TieredCache<String> {
        TieredCache::new(CacheConfig::default()).unwrap()
    }

    #[test]
    fn test_placement() {
        let cache = cache();
        assert_eq!(cache.determine_optimal_tier("k", 10, Priority::Normal), Tier::L1);
        assert_eq!(cache.determine_optimal_tier("k", 10_000, Priority::Normal), Tier::L2);
        assert_eq!(cache.determine_optimal_tier("k", 10_000, Priority::High), Tier::L1);

        cache.hotness.lock().record("k");
        assert_eq!(cache.determine_optimal_tier("k", 10_000, Priority::Low), Tier::L1);
    }

    #[test]
    fn test_placement_with_remote() {
        let cache = cache().with_remote(Arc::new(crate::cache::remote::MemoryRemoteTier::new()));
        assert_eq!(cache.determine_optimal_tier("k", 10_000, Priority::Normal), Tier::L3);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = CacheConfig::default();
        config.batch_size = 0;
        assert!(matches!(
            TieredCache::<String>::new(config),
            Err(ConfigError::ZeroBatchSize)
        ));
    }

    /// Encodes fine but can never decode.
    #[derive(Default)]
    struct BrokenCodec;

    impl ValueCodec<String> for BrokenCodec {
        fn encode(&self, value: &String) -> Result<Vec<u8>, CodecError> {
            Ok(value.as_bytes().to_vec())
        }

        fn decode(&self, _bytes: &[u8]) -> Result<String, CodecError> {
            Err(CodecError::Decode("corrupt".to_string()))
        }
    }

    #[tokio::test]
    async fn test_corrupt_entry_reads_as_miss() {
        let cache = TieredCache::<String, BrokenCodec>::new(CacheConfig::default()).unwrap();
        cache.set("big", "q".repeat(4_096), SetOptions::default()).await;
        assert!(cache.contains_in(Tier::L2, "big"));

        assert_eq!(cache.get("big").await, None);
        // The unreadable entry is dropped.
        assert!(!cache.contains_in(Tier::L2, "big"));
        assert_eq!(cache.get_stats().overall.misses, 1);
    }

    #[test]
    fn test_compressing_alone_records_no_stats() {
        let cache = cache();
        let mut entry = CacheEntry::new("q".repeat(4_096), 4_098, 60_000, Tier::L2);
        assert!(cache.compress_if_large(&mut entry).unwrap().is_some());
        assert!(entry.is_compressed());
        // Nothing was kept, so nothing is counted.
        assert_eq!(cache.get_stats().overall.compression_ratio, 1.0);
    }

    #[tokio::test]
    async fn test_optimize_counts_kept_compression() {
        let cache = cache();
        let raw = CacheEntry::new("q".repeat(4_096), 4_098, 60_000, Tier::L2);
        cache.l2.insert("raw", raw, &cache.evictor);

        let report = cache.optimize().await;
        assert!(cache.peek(Tier::L2, "raw").unwrap().is_compressed());
        assert!(report.memory_freed > 0);
        assert!(cache.get_stats().overall.compression_ratio > 1.0);
    }

    #[tokio::test]
    async fn test_clear_resets_hot_set() {
        let cache = cache();
        cache.set("k", "v".to_string(), SetOptions::default()).await;
        cache.get("k").await;
        assert!(cache.is_hot("k"));

        cache.clear().await;
        assert!(!cache.is_hot("k"));
        assert!(!cache.contains_in(Tier::L1, "k"));
    }
}
