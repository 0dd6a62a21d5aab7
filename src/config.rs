//! Runtime configuration for tier-cache.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! All tier-related knobs (capacities, TTLs, thresholds, eviction weights) live here.

use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

use crate::cache::entry::Tier;
use crate::cache::hotness::BASELINE;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "tier-cache", about = "Adaptive multi-level cache server")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// HTTP listen address (overrides the config file).
    #[arg(long)]
    pub listen: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Configuration errors detected at construction time.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Tier {0} has zero capacity but eviction requires at least one slot")]
    ZeroCapacity(Tier),

    #[error("Batch size must be greater than zero")]
    ZeroBatchSize,

    #[error("Hot set capacity must be greater than zero")]
    ZeroHotSetCapacity,

    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),

    #[error("Invalid {name}: {value} (expected {expected})")]
    OutOfRange {
        name: &'static str,
        value: f64,
        expected: &'static str,
    },
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration.
    pub server: ServerConfig,

    /// Cache engine configuration.
    pub cache: CacheConfig,

    /// Background maintenance settings.
    pub maintenance: MaintenanceConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "0.0.0.0:8080").
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Cache engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Fast in-process tier.
    #[serde(deserialize_with = "deserialize_l1")]
    pub l1: TierConfig,

    /// Larger in-process tier.
    #[serde(deserialize_with = "deserialize_l2")]
    pub l2: TierConfig,

    /// Optional remote tier.
    pub l3: RemoteTierConfig,

    /// Compression settings.
    pub compression: CompressionConfig,

    /// Eviction policy tuning.
    pub eviction: EvictionConfig,

    /// Overall ceiling on logical bytes held locally (0 = unlimited).
    pub max_memory_bytes: usize,

    /// Chunk size for batch get/set and bulk invalidation.
    pub batch_size: usize,

    /// Soft cap on the number of keys in the hot set.
    pub hot_set_capacity: usize,

    /// Accept prefetch requests.
    pub prefetch_enabled: bool,

    /// Promote frequently used L2 entries into L1 when the scheduler starts.
    pub warmup_on_start: bool,

    /// Keep the source copy when an entry is promoted on a lower-tier hit.
    pub retain_on_promote: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1: TierConfig::l1(),
            l2: TierConfig::l2(),
            l3: RemoteTierConfig::default(),
            compression: CompressionConfig::default(),
            eviction: EvictionConfig::default(),
            max_memory_bytes: 256 * 1024 * 1024, // 256 MB
            batch_size: 50,
            hot_set_capacity: 1_000,
            prefetch_enabled: true,
            warmup_on_start: false,
            retain_on_promote: true,
        }
    }
}

/// Capacity and lifetime of one local tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierConfig {
    /// Maximum number of entries before eviction kicks in.
    pub max_entries: usize,

    /// Default time-to-live for entries written to this tier.
    pub ttl_ms: u64,
}

impl TierConfig {
    pub fn l1() -> Self {
        Self {
            max_entries: 1_000,
            ttl_ms: 5 * 60 * 1000,
        }
    }

    pub fn l2() -> Self {
        Self {
            max_entries: 10_000,
            ttl_ms: 30 * 60 * 1000,
        }
    }
}

/// A tier section where every field is optional. Missing fields keep the
/// defaults of the tier being configured.
#[derive(Deserialize)]
struct TierOverrides {
    max_entries: Option<usize>,
    ttl_ms: Option<u64>,
}

impl TierOverrides {
    fn apply(self, base: TierConfig) -> TierConfig {
        TierConfig {
            max_entries: self.max_entries.unwrap_or(base.max_entries),
            ttl_ms: self.ttl_ms.unwrap_or(base.ttl_ms),
        }
    }
}

fn deserialize_l1<'de, D: Deserializer<'de>>(deserializer: D) -> Result<TierConfig, D::Error> {
    Ok(TierOverrides::deserialize(deserializer)?.apply(TierConfig::l1()))
}

fn deserialize_l2<'de, D: Deserializer<'de>>(deserializer: D) -> Result<TierConfig, D::Error> {
    Ok(TierOverrides::deserialize(deserializer)?.apply(TierConfig::l2()))
}

/// Remote tier settings. The transport itself is supplied by the integrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteTierConfig {
    /// Route large values to L3 and consult it on L1/L2 misses.
    pub enabled: bool,

    /// Default time-to-live for entries written to the remote tier.
    pub ttl_ms: u64,
}

impl Default for RemoteTierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_ms: 2 * 60 * 60 * 1000,
        }
    }
}

/// Compression settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Compress values larger than `threshold_bytes`.
    pub enabled: bool,

    /// Size above which a value is compressed and routed to a lower tier.
    pub threshold_bytes: usize,

    /// zstd compression level (1-22).
    pub zstd_level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_bytes: 1024,
            zstd_level: 3,
        }
    }
}

/// How a victim is chosen when a tier is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionStrategy {
    /// Least recently accessed.
    Lru,
    /// Oldest creation time.
    Ttl,
    /// Weighted score of age, idle time, size and access count.
    #[default]
    Adaptive,
}

/// Eviction policy weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvictionConfig {
    /// Victim selection strategy.
    pub strategy: EvictionStrategy,

    /// Weight for entry age (ms since creation).
    pub age_weight: f64,

    /// Weight for idle time (ms since last access).
    pub idle_weight: f64,

    /// Weight for logical size in bytes.
    pub size_weight: f64,

    /// Weight for access count (subtracted).
    pub access_weight: f64,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            strategy: EvictionStrategy::Adaptive,
            age_weight: 0.3,
            idle_weight: 0.4,
            size_weight: 0.2,
            access_weight: 0.1,
        }
    }
}

/// Background maintenance settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Interval of the expiry sweep.
    pub sweep_interval_ms: u64,

    /// Interval of the optimize pass.
    pub optimize_interval_ms: u64,

    /// L2 entries hotter than this are promoted to L1.
    pub promote_threshold: f64,

    /// L1 entries colder than this are demoted to L2.
    pub demote_threshold: f64,

    /// Idle time after which an entry outside the hot set has zero hotness.
    pub cold_after_ms: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: 30_000,
            optimize_interval_ms: 5 * 60 * 1000,
            promote_threshold: 0.8,
            demote_threshold: 0.2,
            cold_after_ms: 2 * 60 * 1000,
        }
    }
}

impl CacheConfig {
    /// Reject configurations that cannot work at request time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.l1.max_entries == 0 {
            return Err(ConfigError::ZeroCapacity(Tier::L1));
        }
        if self.l2.max_entries == 0 {
            return Err(ConfigError::ZeroCapacity(Tier::L2));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.hot_set_capacity == 0 {
            return Err(ConfigError::ZeroHotSetCapacity);
        }
        if !(1..=22).contains(&self.compression.zstd_level) {
            return Err(ConfigError::OutOfRange {
                name: "compression.zstd_level",
                value: self.compression.zstd_level as f64,
                expected: "1..=22",
            });
        }
        Ok(())
    }

    /// Default TTL of a tier.
    pub fn ttl_ms(&self, tier: Tier) -> u64 {
        match tier {
            Tier::L1 => self.l1.ttl_ms,
            Tier::L2 => self.l2.ttl_ms,
            Tier::L3 => self.l3.ttl_ms,
        }
    }
}

impl MaintenanceConfig {
    /// Idle time after which an entry outside the hot set drops below the
    /// demotion threshold.
    pub fn demotion_idle_ms(&self) -> u64 {
        let fraction = (1.0 - self.demote_threshold / BASELINE).clamp(0.0, 1.0);
        (self.cold_after_ms as f64 * fraction) as u64
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sweep_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval("maintenance.sweep_interval_ms"));
        }
        if self.optimize_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval("maintenance.optimize_interval_ms"));
        }
        for (name, value) in [
            ("maintenance.promote_threshold", self.promote_threshold),
            ("maintenance.demote_threshold", self.demote_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::OutOfRange {
                    name,
                    value,
                    expected: "0.0..=1.0",
                });
            }
        }
        if self.demote_threshold >= self.promote_threshold {
            return Err(ConfigError::OutOfRange {
                name: "maintenance.demote_threshold",
                value: self.demote_threshold,
                expected: "below maintenance.promote_threshold",
            });
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let config = if path.exists() {
            let data = std::fs::read_to_string(path)?;
            serde_json::from_str::<Config>(&data)?
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Config::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.cache.validate()?;
        self.maintenance.validate()
    }
}
