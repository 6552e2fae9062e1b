use crate::error::{AnalyticsError, Result};
use crate::store::SnapshotStore;
use crate::types::Snapshot;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory snapshot store. The default backend for tests and ephemeral
/// runs; shares the write-once contract with the disk backend.
#[derive(Default)]
pub struct MemorySnapshotStore {
    inner: RwLock<HashMap<String, BTreeMap<DateTime<Utc>, Arc<Snapshot>>>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn put(&self, snapshot: &Snapshot) -> Result<()> {
        let mut inner = self.inner.write().await;
        let per_protocol = inner.entry(snapshot.protocol.id.clone()).or_default();
        if per_protocol.contains_key(&snapshot.timestamp) {
            return Err(AnalyticsError::StorageIO(format!(
                "snapshot ({}, {}) already exists",
                snapshot.protocol.id, snapshot.timestamp
            )));
        }
        per_protocol.insert(snapshot.timestamp, Arc::new(snapshot.clone()));
        Ok(())
    }

    async fn get(&self, protocol: &str, timestamp: DateTime<Utc>) -> Result<Option<Snapshot>> {
        let inner = self.inner.read().await;
        Ok(inner
            .get(protocol)
            .and_then(|snapshots| snapshots.get(&timestamp))
            .map(|snapshot| (**snapshot).clone()))
    }

    async fn nearest(
        &self,
        protocol: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<Snapshot>> {
        let inner = self.inner.read().await;
        Ok(inner.get(protocol).and_then(|snapshots| {
            snapshots
                .range((Bound::Unbounded, Bound::Included(timestamp)))
                .next_back()
                .map(|(_, snapshot)| (**snapshot).clone())
        }))
    }

    async fn range(
        &self,
        protocol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Snapshot>> {
        let inner = self.inner.read().await;
        Ok(inner
            .get(protocol)
            .map(|snapshots| {
                snapshots
                    .range(from..=to)
                    .map(|(_, snapshot)| (**snapshot).clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn timestamps(&self, protocol: &str) -> Result<Vec<DateTime<Utc>>> {
        let inner = self.inner.read().await;
        Ok(inner
            .get(protocol)
            .map(|snapshots| snapshots.keys().copied().collect())
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::{snapshot_at, ts};
    use crate::types::MetricSelector;

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let store = MemorySnapshotStore::new();
        let snapshot = snapshot_at("compound", ts(2024, 1, 10));
        store.put(&snapshot).await.unwrap();

        let loaded = store.get("compound", ts(2024, 1, 10)).await.unwrap().unwrap();
        assert_eq!(loaded, snapshot);

        assert!(store.get("compound", ts(2024, 1, 11)).await.unwrap().is_none());
        assert!(store.get("uniswap", ts(2024, 1, 10)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_is_write_once() {
        let store = MemorySnapshotStore::new();
        let snapshot = snapshot_at("compound", ts(2024, 1, 10));
        store.put(&snapshot).await.unwrap();
        let err = store.put(&snapshot).await.unwrap_err();
        assert!(matches!(err, AnalyticsError::StorageIO(_)));
    }

    #[tokio::test]
    async fn test_nearest_picks_at_or_before() {
        let store = MemorySnapshotStore::new();
        for day in [10, 20, 30] {
            store.put(&snapshot_at("compound", ts(2024, 1, day))).await.unwrap();
        }

        let exact = store.nearest("compound", ts(2024, 1, 20)).await.unwrap().unwrap();
        assert_eq!(exact.timestamp, ts(2024, 1, 20));

        let earlier = store.nearest("compound", ts(2024, 1, 25)).await.unwrap().unwrap();
        assert_eq!(earlier.timestamp, ts(2024, 1, 20));

        assert!(store.nearest("compound", ts(2024, 1, 5)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_series_window_semantics() {
        let store = MemorySnapshotStore::new();
        let (t0, t1, t2) = (ts(2024, 1, 10), ts(2024, 1, 20), ts(2024, 1, 30));
        for t in [t0, t1, t2] {
            store.put(&snapshot_at("compound", t)).await.unwrap();
        }

        // Inclusive window returns all three, ascending.
        let points = store.series("compound", MetricSelector::Gini, t0, t2).await.unwrap();
        assert_eq!(points.len(), 3);
        assert!(points.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert!(points.iter().all(|p| p.value.is_some()));

        // Shrinking the window by a second on both ends leaves only t1.
        let inner = store
            .series(
                "compound",
                MetricSelector::Gini,
                t0 + chrono::Duration::seconds(1),
                t2 - chrono::Duration::seconds(1),
            )
            .await
            .unwrap();
        assert_eq!(inner.len(), 1);
        assert_eq!(inner[0].timestamp, t1);
    }

    #[tokio::test]
    async fn test_series_reports_gaps() {
        let store = MemorySnapshotStore::new();
        store.put(&snapshot_at("compound", ts(2024, 1, 10))).await.unwrap();

        // Palma is undefined for the small fixture holder set: the point is
        // present with no value.
        let points = store
            .series("compound", MetricSelector::Palma, ts(2024, 1, 1), ts(2024, 2, 1))
            .await
            .unwrap();
        assert_eq!(points.len(), 1);
        assert!(points[0].value.is_none());
    }
}
