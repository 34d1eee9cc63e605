//! Propcache Core - Entity Types
//!
//! Pure data structures shared by the cache layer and its collaborators.
//! This crate contains ONLY data types and configuration - no I/O.

use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod config;
pub mod error;

pub use config::{BackendConfig, CacheConfig, RetryConfig, DEFAULT_CACHE_KEY, DEFAULT_ENTRY_TTL};
pub use error::{CacheError, ConfigError, PropcacheResult, StoreError};

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Identifier assigned to a property row by the backing store.
pub type PropertyId = i64;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

// ============================================================================
// RECORDS
// ============================================================================

/// One row of the backing store as it looked at read time.
///
/// Snapshots are produced fresh on every backing-store fetch and are never
/// mutated afterwards. A cached entry is a JSON array of these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertySnapshot {
    pub id: PropertyId,
    pub title: String,
    pub description: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    pub location: String,
    pub created_at: Timestamp,
}

/// Caller-supplied fields for creating or replacing a property.
///
/// The store owns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDraft {
    pub title: String,
    pub description: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    pub location: String,
}

impl PropertyDraft {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        price: Decimal,
        location: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            price,
            location: location.into(),
        }
    }

    /// Materialize this draft as a snapshot with store-assigned fields.
    pub fn into_snapshot(self, id: PropertyId, created_at: Timestamp) -> PropertySnapshot {
        PropertySnapshot {
            id,
            title: self.title,
            description: self.description,
            price: self.price,
            location: self.location,
            created_at,
        }
    }
}

// ============================================================================
// MUTATIONS
// ============================================================================

/// Kind of committed mutation reported by the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MutationKind {
    Created,
    Updated,
    Deleted,
}

impl MutationKind {
    pub const ALL: [MutationKind; 3] = [Self::Created, Self::Updated, Self::Deleted];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// METRICS
// ============================================================================

/// Point-in-time sample of the cache backend's cumulative counters.
///
/// `hit_ratio` is a percentage rounded to two decimals. When both counters
/// are zero the ratio is defined as `0.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheMetricsSample {
    #[serde(rename = "keyspace_hits")]
    pub hits: u64,
    #[serde(rename = "keyspace_misses")]
    pub misses: u64,
    pub hit_ratio: f64,
}

impl CacheMetricsSample {
    /// Build a sample from raw counters, deriving the ratio.
    pub fn from_counters(hits: u64, misses: u64) -> Self {
        let total = hits.saturating_add(misses);
        let hit_ratio = if total == 0 {
            0.0
        } else {
            let percent = hits as f64 / total as f64 * 100.0;
            (percent * 100.0).round() / 100.0
        };
        Self {
            hits,
            misses,
            hit_ratio,
        }
    }

    /// Total lookups observed by the backend.
    pub fn total(&self) -> u64 {
        self.hits.saturating_add(self.misses)
    }
}

// ============================================================================
// WIRE FORM
// ============================================================================

/// One property as the list endpoint renders it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyView {
    pub id: PropertyId,
    pub title: String,
    pub description: String,
    /// Decimal rendered as a string, preserving scale (`"1250.00"`).
    pub price: String,
    pub location: String,
    /// ISO-8601 with an explicit offset (`+00:00`).
    pub created_at: String,
}

impl From<&PropertySnapshot> for PropertyView {
    fn from(snapshot: &PropertySnapshot) -> Self {
        Self {
            id: snapshot.id,
            title: snapshot.title.clone(),
            description: snapshot.description.clone(),
            price: snapshot.price.to_string(),
            location: snapshot.location.clone(),
            created_at: snapshot
                .created_at
                .to_rfc3339_opts(SecondsFormat::AutoSi, false),
        }
    }
}

/// Body of the list endpoint: `{"properties": [...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PropertyListResponse {
    pub properties: Vec<PropertyView>,
}

impl PropertyListResponse {
    pub fn from_snapshots(snapshots: &[PropertySnapshot]) -> Self {
        Self {
            properties: snapshots.iter().map(PropertyView::from).collect(),
        }
    }

    pub fn to_json(&self) -> PropcacheResult<String> {
        serde_json::to_string(self).map_err(|e| CacheError::Serialization {
            reason: e.to_string(),
        })
    }
}

// =============================================================================
// TESTS
// =============================================================================
