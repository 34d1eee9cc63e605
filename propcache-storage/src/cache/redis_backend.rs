//! Redis cache backend
//!
//! Stores payloads in Redis with `PSETEX` and reads server-wide hit/miss
//! counters from `INFO stats`. Uses deadpool-redis for connection pooling.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Connection, Pool, Runtime};
use propcache_core::{CacheError, PropcacheResult};
use redis::AsyncCommands;

use super::traits::{CacheBackend, ServerStats};

/// Redis cache backend with connection pooling.
#[derive(Clone)]
pub struct RedisCacheBackend {
    pool: Pool,
    key_prefix: String,
}

impl RedisCacheBackend {
    /// Create a new Redis backend for the given connection URL.
    ///
    /// No connection is made until the first command.
    pub fn new(connection_url: impl Into<String>) -> PropcacheResult<Self> {
        let cfg = PoolConfig::from_url(connection_url.into());
        Self::with_pool_config(cfg)
    }

    /// Create a new Redis backend with custom pool configuration.
    pub fn with_pool_config(config: PoolConfig) -> PropcacheResult<Self> {
        let pool = config
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| CacheError::backend(format!("Failed to create Redis pool: {}", e)))?;

        Ok(Self {
            pool,
            key_prefix: String::new(),
        })
    }

    /// Set key prefix for namespacing cache entries.
    ///
    /// All keys will be stored as `"{prefix}:{key}"`.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    fn build_key(&self, key: &str) -> String {
        if self.key_prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.key_prefix, key)
        }
    }

    async fn conn(&self) -> PropcacheResult<Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| CacheError::backend(format!("Failed to get connection from pool: {}", e)))
    }
}

/// Extract `keyspace_hits` and `keyspace_misses` from an `INFO stats` reply.
///
/// Both counters must be present; a reply carrying only one is rejected
/// rather than reported with a zero in its place.
pub fn parse_info_stats(info: &str) -> PropcacheResult<ServerStats> {
    let mut hits = None;
    let mut misses = None;

    for line in info.lines() {
        let Some((name, value)) = line.trim().split_once(':') else {
            continue;
        };
        let slot = match name {
            "keyspace_hits" => &mut hits,
            "keyspace_misses" => &mut misses,
            _ => continue,
        };
        let parsed = value.trim().parse::<u64>().map_err(|e| {
            CacheError::metrics(format!("invalid {} value {:?}: {}", name, value, e))
        })?;
        *slot = Some(parsed);
    }

    match (hits, misses) {
        (Some(hits), Some(misses)) => Ok(ServerStats { hits, misses }),
        (None, _) => Err(CacheError::metrics("INFO stats reply lacks keyspace_hits")),
        (_, None) => Err(CacheError::metrics("INFO stats reply lacks keyspace_misses")),
    }
}

#[async_trait]
impl CacheBackend for RedisCacheBackend {
    async fn get(&self, key: &str) -> PropcacheResult<Option<Vec<u8>>> {
        let full_key = self.build_key(key);
        let mut conn = self.conn().await?;
        conn.get::<_, Option<Vec<u8>>>(&full_key)
            .await
            .map_err(|e| CacheError::backend(format!("Failed to get value from Redis: {}", e)))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> PropcacheResult<()> {
        let full_key = self.build_key(key);
        let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
        let mut conn = self.conn().await?;
        conn.pset_ex::<_, _, ()>(&full_key, value, millis)
            .await
            .map_err(|e| CacheError::backend(format!("Failed to set value in Redis: {}", e)))
    }

    async fn delete(&self, key: &str) -> PropcacheResult<()> {
        let full_key = self.build_key(key);
        let mut conn = self.conn().await?;
        let _removed: u64 = conn
            .del(&full_key)
            .await
            .map_err(|e| CacheError::backend(format!("Failed to delete key from Redis: {}", e)))?;
        Ok(())
    }

    async fn server_stats(&self) -> PropcacheResult<ServerStats> {
        let mut conn = self.conn().await?;
        let info: String = redis::cmd("INFO")
            .arg("stats")
            .query_async(&mut conn)
            .await
            .map_err(|e| CacheError::backend(format!("Failed to read INFO stats: {}", e)))?;
        parse_info_stats(&info)
    }
}
