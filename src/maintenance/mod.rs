//! Background upkeep of a [`TieredCache`](crate::cache::store::TieredCache).
//!
//! - [`scheduler`]: periodic sweep/optimize tasks and the prefetch worker

pub mod scheduler;

pub use scheduler::MaintenanceScheduler;
