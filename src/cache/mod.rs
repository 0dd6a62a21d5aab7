//! Adaptive multi-level cache.
//!
//! This module contains the cache data structures and algorithms:
//! - [`entry`]: CacheEntry, Payload, Tier definitions
//! - [`tier`]: In-process tier storage (L1, L2)
//! - [`remote`]: Pluggable remote tier (L3)
//! - [`store`]: TieredCache, the coordinator of reads, writes and maintenance
//! - [`evictor`]: Victim selection (LRU, TTL, adaptive score)
//! - [`invalidation`]: Pattern rules and invalidation planning
//! - [`hotness`]: Hot-key tracking
//! - [`generation`]: Per-key write generations guarding promotions
//! - [`prefetcher`]: Deduplicated prefetch queue
//! - [`compressor`]: zstd compression/decompression
//! - [`codec`]: Value encoding for compression, sizing and L3
//! - [`stats`]: Hit/miss and latency counters
//! - [`snapshot`]: Export/import format
//! - [`wrapper`]: Read-through wrapper for async functions

pub mod codec;
pub mod compressor;
pub mod entry;
pub mod evictor;
pub mod generation;
pub mod hotness;
pub mod invalidation;
pub mod prefetcher;
pub mod remote;
pub mod snapshot;
pub mod stats;
pub mod store;
pub mod tier;
pub mod wrapper;
