//! Cache Metrics Sampler Binary
//!
//! Connects the configured cache backend, samples its hit/miss counters once
//! and prints the sample as JSON to stdout.
//!
//! Usage:
//!   PROPCACHE_BACKEND=redis cargo run -p propcache-storage --bin cache-metrics --features redis-backend

use std::sync::Arc;

use propcache_core::{BackendConfig, CacheConfig, CacheError, PropcacheResult};
use propcache_storage::{
    init_tracing, CacheBackend, InMemoryCacheBackend, LmdbCacheBackend, MetricsReader,
    TelemetryConfig,
};

fn connect(config: &BackendConfig) -> PropcacheResult<Arc<dyn CacheBackend>> {
    match config {
        BackendConfig::Memory => Ok(Arc::new(InMemoryCacheBackend::new())),
        BackendConfig::Lmdb { path, max_size_mb } => {
            Ok(Arc::new(LmdbCacheBackend::new(path, *max_size_mb)?))
        }
        #[cfg(feature = "redis-backend")]
        BackendConfig::Redis { url, key_prefix } => Ok(Arc::new(
            propcache_storage::RedisCacheBackend::new(url.as_str())?
                .with_key_prefix(key_prefix.as_str()),
        )),
        #[cfg(not(feature = "redis-backend"))]
        BackendConfig::Redis { .. } => Err(CacheError::backend(
            "redis backend requested but the redis-backend feature is not enabled",
        )),
    }
}

async fn run() -> PropcacheResult<String> {
    let backend_config = BackendConfig::try_from_env()?;
    let cache_config = CacheConfig::try_from_env()?;

    tracing::info!(backend = ?backend_config, "sampling cache metrics");
    let backend = connect(&backend_config)?;
    let reader = MetricsReader::new(backend, cache_config.backend_timeout);
    let sample = reader.sample_metrics().await?;

    serde_json::to_string_pretty(&sample).map_err(|e| CacheError::Serialization {
        reason: e.to_string(),
    })
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let telemetry = TelemetryConfig::from_env();
    if let Err(e) = init_tracing(&telemetry) {
        eprintln!("Failed to initialize tracing: {}", e);
    }

    match run().await {
        Ok(json) => println!("{}", json),
        Err(e) => {
            tracing::error!(error = %e, "cache metrics unavailable");
            eprintln!("Failed to sample cache metrics: {}", e);
            std::process::exit(1);
        }
    }
}
