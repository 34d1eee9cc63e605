//! LMDB-backed cache implementation.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a memory-mapped
//! key/value store that survives process restarts.
//!
//! # Value Layout
//!
//! Each value is `[expires_at_ms: i64 LE][payload]`. An entry whose expiry
//! is in the past reads as a miss and is removed by that read.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The backend uses:
//! - Read transactions for `get` operations
//! - Write transactions for `set`, `delete`, and expiry cleanup
//! - Hit/miss counters are process-local atomics

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use propcache_core::{CacheError, PropcacheResult};

use super::traits::{CacheBackend, ServerStats};

const HEADER_LEN: usize = 8;

/// Error type for LMDB cache operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Stored value is shorter than its header.
    #[error("Corrupt entry for key {0}")]
    CorruptEntry(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convert LmdbCacheError to CacheError.
impl From<LmdbCacheError> for CacheError {
    fn from(e: LmdbCacheError) -> Self {
        CacheError::CacheBackendUnavailable {
            reason: e.to_string(),
        }
    }
}

fn txn_err(e: heed::Error) -> LmdbCacheError {
    LmdbCacheError::Transaction(e.to_string())
}

/// LMDB-backed cache with TTL expiry.
///
/// # Example
///
/// ```ignore
/// use propcache_storage::cache::{CacheBackend, LmdbCacheBackend};
///
/// let backend = LmdbCacheBackend::new("/tmp/propcache", 64)?;
/// backend.set("all_properties", &bytes, Duration::from_secs(3600)).await?;
/// let cached = backend.get("all_properties").await?;
/// ```
pub struct LmdbCacheBackend {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl LmdbCacheBackend {
    /// Create a new LMDB cache backend.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `max_size_mb` is zero or too large to express in bytes
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        let map_size = max_size_mb
            .checked_mul(1024 * 1024)
            .filter(|&bytes| bytes > 0)
            .ok_or_else(|| {
                LmdbCacheError::EnvOpen(format!("invalid map size of {} MiB", max_size_mb))
            })?;
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment is opened once per backend and the
        // directory is not shared with another process using different flags.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn().map_err(txn_err)?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;
        wtxn.commit().map_err(txn_err)?;

        Ok(Self {
            env,
            db,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    fn encode(value: &[u8], ttl: Duration) -> Vec<u8> {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = Utc::now().timestamp_millis().saturating_add(ttl_ms);

        let mut full = Vec::with_capacity(HEADER_LEN + value.len());
        full.extend_from_slice(&expires_at.to_le_bytes());
        full.extend_from_slice(value);
        full
    }

    /// Split a stored value into expiry and payload.
    fn decode<'a>(key: &str, bytes: &'a [u8]) -> Result<(i64, &'a [u8]), LmdbCacheError> {
        if bytes.len() < HEADER_LEN {
            return Err(LmdbCacheError::CorruptEntry(key.to_string()));
        }
        let (header, payload) = bytes.split_at(HEADER_LEN);
        let header: [u8; HEADER_LEN] = header
            .try_into()
            .map_err(|_| LmdbCacheError::CorruptEntry(key.to_string()))?;
        Ok((i64::from_le_bytes(header), payload))
    }

    /// Remove `key` only if it is still expired at `now_ms`.
    fn remove_if_expired(&self, key: &str, now_ms: i64) -> Result<(), LmdbCacheError> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        let still_expired = match self.db.get(&wtxn, key.as_bytes()).map_err(txn_err)? {
            Some(bytes) => Self::decode(key, bytes).map_or(true, |(exp, _)| exp <= now_ms),
            None => false,
        };
        if still_expired {
            self.db.delete(&mut wtxn, key.as_bytes()).map_err(txn_err)?;
        }
        wtxn.commit().map_err(txn_err)
    }

    /// Number of stored entries, expired ones included.
    pub fn entry_count(&self) -> Result<u64, LmdbCacheError> {
        let rtxn = self.env.read_txn().map_err(txn_err)?;
        self.db.len(&rtxn).map_err(txn_err)
    }
}

#[async_trait]
impl CacheBackend for LmdbCacheBackend {
    async fn get(&self, key: &str) -> PropcacheResult<Option<Vec<u8>>> {
        let now_ms = Utc::now().timestamp_millis();

        let live = {
            let rtxn = self.env.read_txn().map_err(txn_err)?;
            match self.db.get(&rtxn, key.as_bytes()).map_err(txn_err)? {
                None => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    return Ok(None);
                }
                Some(bytes) => match Self::decode(key, bytes) {
                    Ok((expires_at, payload)) if expires_at > now_ms => Some(payload.to_vec()),
                    Ok(_) => None,
                    Err(e) => {
                        tracing::warn!(key, error = %e, "dropping corrupt lmdb cache entry");
                        None
                    }
                },
            }
        };

        match live {
            Some(payload) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(payload))
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                self.remove_if_expired(key, now_ms)?;
                Ok(None)
            }
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> PropcacheResult<()> {
        let full_bytes = Self::encode(value, ttl);

        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.db
            .put(&mut wtxn, key.as_bytes(), &full_bytes)
            .map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> PropcacheResult<()> {
        let mut wtxn = self.env.write_txn().map_err(txn_err)?;
        self.db.delete(&mut wtxn, key.as_bytes()).map_err(txn_err)?;
        wtxn.commit().map_err(txn_err)?;
        Ok(())
    }

    async fn server_stats(&self) -> PropcacheResult<ServerStats> {
        Ok(ServerStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_backend() -> (LmdbCacheBackend, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let backend =
            LmdbCacheBackend::new(temp_dir.path(), 10).expect("backend creation should succeed");
        (backend, temp_dir)
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let (backend, _temp_dir) = create_test_backend();

        backend
            .set("all_properties", b"[1,2,3]", Duration::from_secs(60))
            .await
            .expect("set should succeed");

        let cached = backend
            .get("all_properties")
            .await
            .expect("get should succeed");
        assert_eq!(cached.as_deref(), Some(&b"[1,2,3]"[..]));
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let (backend, _temp_dir) = create_test_backend();
        let cached = backend.get("missing").await.expect("get should succeed");
        assert!(cached.is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let (backend, _temp_dir) = create_test_backend();

        backend
            .set("k", b"v", Duration::from_secs(60))
            .await
            .expect("set should succeed");
        backend.delete("k").await.expect("delete should succeed");
        assert!(backend.get("k").await.expect("get").is_none());

        // Absent key is a no-op
        backend.delete("k").await.expect("second delete should succeed");
    }

    #[tokio::test]
    async fn test_expired_entry_is_miss_and_removed() {
        let (backend, _temp_dir) = create_test_backend();

        backend
            .set("k", b"v", Duration::ZERO)
            .await
            .expect("set should succeed");
        assert_eq!(backend.entry_count().expect("count"), 1);

        assert!(backend.get("k").await.expect("get").is_none());
        assert_eq!(backend.entry_count().expect("count"), 0);

        let stats = backend.server_stats().await.expect("stats");
        assert_eq!(stats, ServerStats { hits: 0, misses: 1 });
    }

    #[tokio::test]
    async fn test_stats() {
        let (backend, _temp_dir) = create_test_backend();

        let _ = backend.get("k").await;
        backend
            .set("k", b"v", Duration::from_secs(60))
            .await
            .expect("set should succeed");
        let _ = backend.get("k").await;
        let _ = backend.get("k").await;

        let stats = backend.server_stats().await.expect("stats should succeed");
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);
    }

    #[tokio::test]
    async fn test_overwrite() {
        let (backend, _temp_dir) = create_test_backend();

        backend
            .set("k", b"old", Duration::from_secs(60))
            .await
            .expect("set should succeed");
        backend
            .set("k", b"new", Duration::from_secs(60))
            .await
            .expect("set should succeed");

        let cached = backend.get("k").await.expect("get should succeed");
        assert_eq!(cached.as_deref(), Some(&b"new"[..]));
        assert_eq!(backend.entry_count().expect("count"), 1);
    }

    #[tokio::test]
    async fn test_entries_survive_reopen() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        {
            let backend = LmdbCacheBackend::new(temp_dir.path(), 10).expect("open");
            backend
                .set("k", b"persisted", Duration::from_secs(60))
                .await
                .expect("set should succeed");
        }

        let reopened = LmdbCacheBackend::new(temp_dir.path(), 10).expect("reopen");
        let cached = reopened.get("k").await.expect("get should succeed");
        assert_eq!(cached.as_deref(), Some(&b"persisted"[..]));
    }

    #[test]
    fn test_decode_rejects_short_value() {
        let err = LmdbCacheBackend::decode("k", &[1, 2, 3]).expect_err("too short");
        assert!(matches!(err, LmdbCacheError::CorruptEntry(_)));
    }

    #[test]
    fn test_unaddressable_map_size_rejected() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        for size in [0, usize::MAX] {
            match LmdbCacheBackend::new(temp_dir.path(), size) {
                Err(LmdbCacheError::EnvOpen(_)) => {}
                Err(other) => panic!("Expected EnvOpen for {} MiB, got: {}", size, other),
                Ok(_) => panic!("Expected EnvOpen for {} MiB", size),
            }
        }
    }
}
