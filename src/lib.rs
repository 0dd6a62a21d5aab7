//! tier-cache: adaptive multi-level cache.
//!
//! Values flow through a hierarchy of tiers:
//!   L1 in-process (hot) → L2 in-process (warm) → L3 remote (cold, optional)
//!
//! Placement follows key hotness and value size; background maintenance
//! expires, compresses, promotes and demotes entries. Rule-based
//! invalidation removes dependent keys together.

pub mod cache;
pub mod config;
pub mod maintenance;
pub mod server;

pub use cache::codec::{BytesCodec, JsonCodec, ValueCodec};
pub use cache::entry::Tier;
pub use cache::invalidation::{InvalidationRule, InvalidationStrategy, KeyPattern};
pub use cache::remote::{MemoryRemoteTier, RemoteRecord, RemoteTier, RemoteTierError};
pub use cache::snapshot::CacheSnapshot;
pub use cache::stats::Stats;
pub use cache::store::{
    BatchEntry, InvalidateOptions, OptimizeReport, Priority, SetOptions, TieredCache,
};
pub use cache::wrapper::cached;
pub use config::{CacheConfig, Config, ConfigError, MaintenanceConfig};
pub use maintenance::MaintenanceScheduler;
