//! Error types for propcache operations

use crate::PropertyId;
use thiserror::Error;

/// Backing store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Property not found: {id}")]
    NotFound { id: PropertyId },

    #[error("Backing store unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for the cache layer.
///
/// `CacheBackendUnavailable` is normally recovered inside the read path
/// (fail-open); it only reaches callers from invalidation and direct
/// backend use.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache backend unavailable: {reason}")]
    CacheBackendUnavailable { reason: String },

    #[error("Backing store unavailable: {reason}")]
    BackingStoreUnavailable { reason: String },

    #[error("Metrics unavailable: {reason}")]
    MetricsUnavailable { reason: String },

    #[error("Serialization error: {reason}")]
    Serialization { reason: String },

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl CacheError {
    pub fn backend(reason: impl Into<String>) -> Self {
        Self::CacheBackendUnavailable {
            reason: reason.into(),
        }
    }

    pub fn metrics(reason: impl Into<String>) -> Self {
        Self::MetricsUnavailable {
            reason: reason.into(),
        }
    }

    /// True for failures the read path absorbs by bypassing the cache.
    pub fn is_fail_open(&self) -> bool {
        matches!(
            self,
            Self::CacheBackendUnavailable { .. } | Self::Serialization { .. }
        )
    }
}

impl From<StoreError> for CacheError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Unavailable { reason } => Self::BackingStoreUnavailable { reason },
            other => Self::Store(other),
        }
    }
}

/// Result type alias for propcache operations.
pub type PropcacheResult<T> = Result<T, CacheError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_unavailable_maps_to_backing_store_unavailable() {
        let err = CacheError::from(StoreError::Unavailable {
            reason: "connection refused".to_string(),
        });
        assert_eq!(
            err,
            CacheError::BackingStoreUnavailable {
                reason: "connection refused".to_string()
            }
        );
    }

    #[test]
    fn test_store_not_found_is_wrapped() {
        let err = CacheError::from(StoreError::NotFound { id: 4 });
        assert!(matches!(err, CacheError::Store(StoreError::NotFound { id: 4 })));
        assert!(err.to_string().contains("Property not found: 4"));
    }

    #[test]
    fn test_fail_open_classification() {
        assert!(CacheError::backend("down").is_fail_open());
        assert!(CacheError::Serialization {
            reason: "eof".to_string()
        }
        .is_fail_open());
        assert!(!CacheError::metrics("down").is_fail_open());
        assert!(!CacheError::BackingStoreUnavailable {
            reason: "down".to_string()
        }
        .is_fail_open());
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "PROPCACHE_ENTRY_TTL_SECS".to_string(),
            value: "soon".to_string(),
            reason: "expected an integer".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("PROPCACHE_ENTRY_TTL_SECS"));
        assert!(msg.contains("soon"));
        assert!(msg.contains("expected an integer"));

        let wrapped = CacheError::from(err);
        assert!(matches!(wrapped, CacheError::Config(_)));
    }
}
