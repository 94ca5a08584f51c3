//! The tiered write-back aggregation cache.
//!
//! Increments land in a process-local [`BatchQueue`] (no I/O), a periodic
//! flush cycle merges queue branches into the shared [`CacheTier`], and an
//! independent invalidation cycle reconciles tier documents into the
//! durable store via bulk increment-or-upsert writes.

pub mod ingest;
pub mod lookup;
pub mod manager;
pub mod queue;
pub mod redis_tier;
pub mod tier;

pub use ingest::EventIngest;
pub use lookup::{Lookup, LookupCache, QueryService};
pub use manager::{CacheManager, CacheSettings, CycleOutcome};
pub use queue::BatchQueue;
pub use redis_tier::RedisCacheTier;
pub use tier::{CacheTier, InMemoryCacheTier, TierCommand};
