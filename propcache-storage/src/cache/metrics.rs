//! Hit/miss metrics reader.
//!
//! Samples the backend's server-wide counters. Nothing is tracked in-process:
//! two samples taken with no traffic in between report the same numbers.

use std::sync::Arc;
use std::time::Duration;

use propcache_core::{CacheError, CacheMetricsSample, PropcacheResult};

use super::traits::CacheBackend;

/// Reads cumulative hit/miss counters from a cache backend.
pub struct MetricsReader<C>
where
    C: CacheBackend + ?Sized,
{
    cache: Arc<C>,
    timeout: Duration,
}

impl<C> MetricsReader<C>
where
    C: CacheBackend + ?Sized,
{
    pub fn new(cache: Arc<C>, timeout: Duration) -> Self {
        Self { cache, timeout }
    }

    /// Take one sample.
    ///
    /// Any failure to obtain both counters is `MetricsUnavailable`; a
    /// partial sample is never returned.
    pub async fn sample_metrics(&self) -> PropcacheResult<CacheMetricsSample> {
        let stats = match tokio::time::timeout(self.timeout, self.cache.server_stats()).await {
            Ok(Ok(stats)) => stats,
            Ok(Err(CacheError::MetricsUnavailable { reason })) => {
                tracing::warn!(reason = %reason, "cache metrics unavailable");
                return Err(CacheError::MetricsUnavailable { reason });
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "cache metrics unavailable");
                return Err(CacheError::metrics(e.to_string()));
            }
            Err(_) => {
                tracing::warn!(timeout = ?self.timeout, "cache metrics request timed out");
                return Err(CacheError::metrics(format!(
                    "stats request timed out after {:?}",
                    self.timeout
                )));
            }
        };

        let sample = CacheMetricsSample::from_counters(stats.hits, stats.misses);
        tracing::info!(
            keyspace_hits = sample.hits,
            keyspace_misses = sample.misses,
            hit_ratio = sample.hit_ratio,
            "cache metrics sampled"
        );
        Ok(sample)
    }
}

impl<C> Clone for MetricsReader<C>
where
    C: CacheBackend + ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            timeout: self.timeout,
        }
    }
}
