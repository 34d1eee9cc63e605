//! Configuration types
//!
//! Values are loaded from `PROPCACHE_*` environment variables with defaults
//! suitable for development. `try_from_*` variants reject malformed values;
//! the infallible `from_env` falls back to defaults.

use crate::ConfigError;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Key under which the full-scan result is cached.
pub const DEFAULT_CACHE_KEY: &str = "all_properties";

/// Default lifetime of a cached full-scan result.
pub const DEFAULT_ENTRY_TTL: Duration = Duration::from_secs(3600);

// ============================================================================
// ENV HELPERS
// ============================================================================

fn parse_var<T, F>(lookup: &F, field: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(field) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::InvalidValue {
                field: field.to_string(),
                value: raw.clone(),
                reason: e.to_string(),
            }),
    }
}

fn parse_bool<F>(lookup: &F, field: &str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(field) {
        None => Ok(None),
        Some(raw) => match raw.trim().to_lowercase().as_str() {
            "" => Ok(None),
            "true" | "1" | "yes" => Ok(Some(true)),
            "false" | "0" | "no" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidValue {
                field: field.to_string(),
                value: raw,
                reason: "expected true or false".to_string(),
            }),
        },
    }
}

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

// ============================================================================
// RETRY CONFIGURATION
// ============================================================================

/// Bounded retry with exponential backoff for cache-backend reads.
///
/// `max_retries == 0` disables retrying; the read path then falls open on
/// the first failure.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(200),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Backoff to sleep before retry number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        let factor = f64::from(self.backoff_multiplier.max(1.0)).powi(exponent);
        let backoff = self.initial_backoff.as_secs_f64() * factor;
        Duration::from_secs_f64(backoff.min(self.max_backoff.as_secs_f64()))
    }
}

// ============================================================================
// CACHE CONFIGURATION
// ============================================================================

/// Configuration for the read-through cache facade.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Key used for the full-scan query.
    pub cache_key: String,
    /// TTL written with every populated entry.
    pub entry_ttl: Duration,
    /// Deadline for a single cache-backend call. Exceeding it is a miss.
    pub backend_timeout: Duration,
    /// Deadline for a backing-store query. Exceeding it is a hard failure.
    pub store_timeout: Duration,
    /// Collapse concurrent misses for one key into a single store query.
    pub single_flight: bool,
    /// Retry policy for cache-backend reads.
    pub retry: RetryConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_key: DEFAULT_CACHE_KEY.to_string(),
            entry_ttl: DEFAULT_ENTRY_TTL,
            backend_timeout: Duration::from_millis(250),
            store_timeout: Duration::from_secs(5),
            single_flight: false,
            retry: RetryConfig::default(),
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = key.into();
        self
    }

    /// Set the entry TTL.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.entry_ttl = ttl;
        self
    }

    pub fn with_backend_timeout(mut self, timeout: Duration) -> Self {
        self.backend_timeout = timeout;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Enable or disable single-flight miss handling.
    pub fn with_single_flight(mut self, enabled: bool) -> Self {
        self.single_flight = enabled;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Create CacheConfig from environment variables, ignoring malformed values.
    ///
    /// Environment variables:
    /// - `PROPCACHE_CACHE_KEY`: key for the full-scan result (default: all_properties)
    /// - `PROPCACHE_ENTRY_TTL_SECS`: entry TTL in seconds (default: 3600)
    /// - `PROPCACHE_BACKEND_TIMEOUT_MS`: cache call deadline (default: 250)
    /// - `PROPCACHE_STORE_TIMEOUT_MS`: store query deadline (default: 5000)
    /// - `PROPCACHE_SINGLE_FLIGHT`: "true" or "false" (default: false)
    /// - `PROPCACHE_CACHE_RETRIES`: cache read retries (default: 0)
    /// - `PROPCACHE_CACHE_RETRY_BACKOFF_MS`: initial retry backoff (default: 10)
    pub fn from_env() -> Self {
        Self::try_from_env().unwrap_or_default()
    }

    /// Like [`CacheConfig::from_env`] but reports malformed values.
    pub fn try_from_env() -> Result<Self, ConfigError> {
        Self::try_from_lookup(env_lookup)
    }

    /// Build from an arbitrary variable source.
    pub fn try_from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let cache_key = lookup("PROPCACHE_CACHE_KEY")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.cache_key);

        let entry_ttl = parse_var::<u64, _>(&lookup, "PROPCACHE_ENTRY_TTL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.entry_ttl);
        if entry_ttl.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "PROPCACHE_ENTRY_TTL_SECS".to_string(),
                value: "0".to_string(),
                reason: "TTL must be positive".to_string(),
            });
        }

        let backend_timeout = parse_var::<u64, _>(&lookup, "PROPCACHE_BACKEND_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.backend_timeout);

        let store_timeout = parse_var::<u64, _>(&lookup, "PROPCACHE_STORE_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.store_timeout);

        let single_flight =
            parse_bool(&lookup, "PROPCACHE_SINGLE_FLIGHT")?.unwrap_or(defaults.single_flight);

        let mut retry = defaults.retry;
        if let Some(retries) = parse_var::<u32, _>(&lookup, "PROPCACHE_CACHE_RETRIES")? {
            retry.max_retries = retries;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "PROPCACHE_CACHE_RETRY_BACKOFF_MS")? {
            retry.initial_backoff = Duration::from_millis(ms);
        }

        Ok(Self {
            cache_key,
            entry_ttl,
            backend_timeout,
            store_timeout,
            single_flight,
            retry,
        })
    }
}

// ============================================================================
// BACKEND SELECTION
// ============================================================================

/// Which cache backend to connect, and how.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BackendConfig {
    /// Process-local map. Counters reset with the process.
    #[default]
    Memory,
    /// Memory-mapped LMDB environment at `path`.
    Lmdb { path: PathBuf, max_size_mb: usize },
    /// Redis server; `key_prefix` namespaces every key when non-empty.
    Redis { url: String, key_prefix: String },
}

impl BackendConfig {
    /// Environment variables:
    /// - `PROPCACHE_BACKEND`: memory | lmdb | redis (default: memory)
    /// - `PROPCACHE_LMDB_PATH`: LMDB directory (required for lmdb)
    /// - `PROPCACHE_LMDB_MAX_SIZE_MB`: map size (default: 64)
    /// - `PROPCACHE_REDIS_URL`: connection URL (default: redis://127.0.0.1:6379)
    /// - `PROPCACHE_REDIS_KEY_PREFIX`: key namespace (default: empty)
    pub fn try_from_env() -> Result<Self, ConfigError> {
        Self::try_from_lookup(env_lookup)
    }

    pub fn try_from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let kind = lookup("PROPCACHE_BACKEND")
            .map(|s| s.trim().to_lowercase())
            .unwrap_or_default();

        match kind.as_str() {
            "" | "memory" => Ok(Self::Memory),
            "lmdb" => {
                let path = lookup("PROPCACHE_LMDB_PATH")
                    .filter(|s| !s.trim().is_empty())
                    .ok_or_else(|| ConfigError::MissingRequired {
                        field: "PROPCACHE_LMDB_PATH".to_string(),
                    })?;
                let max_size_mb =
                    parse_var::<usize, _>(&lookup, "PROPCACHE_LMDB_MAX_SIZE_MB")?.unwrap_or(64);
                // The environment map size is this many MiB in bytes.
                if max_size_mb == 0 || max_size_mb.checked_mul(1024 * 1024).is_none() {
                    return Err(ConfigError::InvalidValue {
                        field: "PROPCACHE_LMDB_MAX_SIZE_MB".to_string(),
                        value: max_size_mb.to_string(),
                        reason: "must be non-zero and fit in an addressable byte size".to_string(),
                    });
                }
                Ok(Self::Lmdb {
                    path: PathBuf::from(path),
                    max_size_mb,
                })
            }
            "redis" => Ok(Self::Redis {
                url: lookup("PROPCACHE_REDIS_URL")
                    .filter(|s| !s.trim().is_empty())
                    .unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()),
                key_prefix: lookup("PROPCACHE_REDIS_KEY_PREFIX").unwrap_or_default(),
            }),
            other => Err(ConfigError::InvalidValue {
                field: "PROPCACHE_BACKEND".to_string(),
                value: other.to_string(),
                reason: "expected memory, lmdb or redis".to_string(),
            }),
        }
    }
}
