//! Read-through cache layer for the property collection.
//!
//! The facade ([`ReadThroughCache`]) serves the full property collection
//! from a pluggable [`CacheBackend`], falling back to the [`BackingStore`]
//! on a miss. The store notifies an [`InvalidationHook`] after every commit
//! so the next read goes to the store. [`MetricsReader`] samples the
//! backend's server-wide hit/miss counters.
//!
//! # Failure Model
//!
//! Cache trouble is absorbed: a failed or slow backend reads as a miss and
//! a failed write is logged. Store trouble is surfaced as
//! `BackingStoreUnavailable` and nothing is cached.
//!
//! # Example
//!
//! ```ignore
//! let cache = ReadThroughCache::new(backend, store.clone(), CacheConfig::from_env());
//! cache.subscribe_invalidation();
//!
//! let read = cache.fetch_read(DEFAULT_CACHE_KEY).await?;
//! if read.was_cache_hit() {
//!     tracing::debug!("served from cache");
//! }
//!
//! let sample = cache.metrics_reader().sample_metrics().await?;
//! ```

pub mod cache_read;
pub mod invalidation;
pub mod lmdb_backend;
pub mod memory_backend;
pub mod metrics;
pub mod read_through;
#[cfg(feature = "redis-backend")]
pub mod redis_backend;
pub mod traits;

pub use cache_read::{CacheRead, ReadSource};
pub use invalidation::{InvalidationHook, InvalidationState};
pub use lmdb_backend::{LmdbCacheBackend, LmdbCacheError};
pub use memory_backend::InMemoryCacheBackend;
pub use metrics::MetricsReader;
pub use read_through::ReadThroughCache;
#[cfg(feature = "redis-backend")]
pub use redis_backend::{parse_info_stats, RedisCacheBackend};
pub use traits::{BackingStore, CacheBackend, MutationListener, ServerStats};
