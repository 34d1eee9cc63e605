//! Propcache Storage - Read-Through Cache for Property Listings
//!
//! Caches the full property collection in front of a backing store,
//! invalidates it on every committed mutation and reports the cache
//! backend's hit/miss counters.

pub mod cache;
pub mod store;
pub mod telemetry;

pub use cache::{
    BackingStore, CacheBackend, CacheRead, InMemoryCacheBackend, InvalidationHook,
    InvalidationState, LmdbCacheBackend, LmdbCacheError, MetricsReader, MutationListener,
    ReadSource, ReadThroughCache, ServerStats,
};
#[cfg(feature = "redis-backend")]
pub use cache::RedisCacheBackend;
pub use store::InMemoryPropertyStore;
pub use telemetry::{init_tracing, TelemetryConfig};
