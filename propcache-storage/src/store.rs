//! In-memory backing store.
//!
//! Holds property records ordered by id and notifies subscribed listeners
//! after every committed mutation. Used by tests and the demo wiring; a
//! database-backed store implements the same [`BackingStore`] trait.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, RwLock as StdRwLock};

use async_trait::async_trait;
use chrono::Utc;
use propcache_core::{MutationKind, PropertyDraft, PropertyId, PropertySnapshot, StoreError};
use tokio::sync::RwLock;

use crate::cache::{BackingStore, MutationListener};

/// Backing store over a `BTreeMap`, so full scans come back in id order.
pub struct InMemoryPropertyStore {
    records: RwLock<BTreeMap<PropertyId, PropertySnapshot>>,
    next_id: AtomicI64,
    listeners: StdRwLock<Vec<Arc<dyn MutationListener>>>,
    available: AtomicBool,
    queries: AtomicU64,
}

impl Default for InMemoryPropertyStore {
    fn default() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
            listeners: StdRwLock::new(Vec::new()),
            available: AtomicBool::new(true),
            queries: AtomicU64::new(0),
        }
    }
}

impl InMemoryPropertyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store preloaded with `records`. New ids continue after the
    /// highest preloaded id.
    pub fn with_records(records: impl IntoIterator<Item = PropertySnapshot>) -> Self {
        let records: BTreeMap<_, _> = records.into_iter().map(|r| (r.id, r)).collect();
        let next_id = records.keys().next_back().map_or(1, |id| id + 1);
        Self {
            records: RwLock::new(records),
            next_id: AtomicI64::new(next_id),
            ..Self::default()
        }
    }

    /// Simulate an outage. While unavailable, queries and mutations fail
    /// with `StoreError::Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of `query_all` calls served so far.
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::SeqCst)
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn get(&self, id: PropertyId) -> Result<PropertySnapshot, StoreError> {
        self.ensure_available()?;
        self.records
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound { id })
    }

    /// Insert a new property with the next id.
    pub async fn create(&self, draft: PropertyDraft) -> Result<PropertySnapshot, StoreError> {
        self.ensure_available()?;
        let snapshot = {
            let mut records = self.records.write().await;
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            let snapshot = draft.into_snapshot(id, Utc::now());
            records.insert(id, snapshot.clone());
            snapshot
        };

        self.notify(MutationKind::Created).await;
        Ok(snapshot)
    }

    /// Replace the caller-editable fields of property `id`.
    ///
    /// `id` and `created_at` are kept.
    pub async fn update(
        &self,
        id: PropertyId,
        draft: PropertyDraft,
    ) -> Result<PropertySnapshot, StoreError> {
        self.ensure_available()?;
        let snapshot = {
            let mut records = self.records.write().await;
            let existing = records.get_mut(&id).ok_or(StoreError::NotFound { id })?;
            *existing = draft.into_snapshot(id, existing.created_at);
            existing.clone()
        };

        self.notify(MutationKind::Updated).await;
        Ok(snapshot)
    }

    /// Remove property `id`, returning the removed record.
    pub async fn delete(&self, id: PropertyId) -> Result<PropertySnapshot, StoreError> {
        self.ensure_available()?;
        let removed = self
            .records
            .write()
            .await
            .remove(&id)
            .ok_or(StoreError::NotFound { id })?;

        self.notify(MutationKind::Deleted).await;
        Ok(removed)
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable {
                reason: "in-memory store marked unavailable".to_string(),
            })
        }
    }

    /// Run every listener. The record lock is already released.
    async fn notify(&self, kind: MutationKind) {
        let listeners: Vec<_> = self
            .listeners
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        for listener in listeners {
            if let Err(e) = listener.on_mutation(kind).await {
                // The commit stands; the listener has already recorded what it needs.
                tracing::warn!(mutation = %kind, error = %e, "mutation listener failed");
            }
        }
    }
}

#[async_trait]
impl BackingStore for InMemoryPropertyStore {
    async fn query_all(&self) -> Result<Vec<PropertySnapshot>, StoreError> {
        self.ensure_available()?;
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.records.read().await.values().cloned().collect())
    }

    fn subscribe(&self, listener: Arc<dyn MutationListener>) {
        self.listeners
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(listener);
    }
}
