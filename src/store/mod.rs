use crate::error::Result;
use crate::types::{MetricSelector, Provenance, Snapshot};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod disk;
pub mod memory;

pub use disk::DiskSnapshotStore;
pub use memory::MemorySnapshotStore;

/// One point of a metric time series. `value` is `None` when the snapshot
/// exists but does not define the metric; the store never interpolates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub value: Option<f64>,
    pub provenance: Provenance,
}

/// Write-once, append-only store keyed by (protocol, timestamp).
///
/// Concurrent readers are allowed; writes are serialized per protocol.
/// Snapshots are immutable once visible: a second `put` of the same key is
/// an error, and superseded snapshots stay queryable forever.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn put(&self, snapshot: &Snapshot) -> Result<()>;

    async fn get(&self, protocol: &str, timestamp: DateTime<Utc>) -> Result<Option<Snapshot>>;

    /// The snapshot at or nearest before `timestamp`.
    async fn nearest(&self, protocol: &str, timestamp: DateTime<Utc>)
        -> Result<Option<Snapshot>>;

    /// All snapshots with `from <= timestamp <= to`, ascending.
    async fn range(
        &self,
        protocol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Snapshot>>;

    /// Timestamps present for a protocol, ascending.
    async fn timestamps(&self, protocol: &str) -> Result<Vec<DateTime<Utc>>>;

    /// Project one named metric across the range. One point per snapshot,
    /// strictly increasing timestamps, gaps reported rather than filled.
    async fn series(
        &self,
        protocol: &str,
        selector: MetricSelector,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SeriesPoint>> {
        let snapshots = self.range(protocol, from, to).await?;
        Ok(snapshots
            .iter()
            .map(|snapshot| SeriesPoint {
                timestamp: snapshot.timestamp,
                value: selector.project(&snapshot.metrics),
                provenance: snapshot.provenance,
            })
            .collect())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::analysis::concentration::ConcentrationMetrics;
    use crate::config::ProtocolRegistry;
    use crate::types::{HolderBalance, Provenance, Snapshot, SnapshotMetrics};
    use alloy_primitives::Address;
    use chrono::{DateTime, TimeZone, Utc};

    pub fn ts(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).unwrap()
    }

    /// Minimal snapshot with real concentration metrics over a fixed
    /// four-holder distribution.
    pub fn snapshot_at(protocol_id: &str, timestamp: DateTime<Utc>) -> Snapshot {
        let protocol = ProtocolRegistry::builtin().get(protocol_id).unwrap().clone();
        let balances = [100u128, 50, 30, 20];
        let holders: Vec<HolderBalance> = balances
            .iter()
            .enumerate()
            .map(|(i, &balance)| HolderBalance {
                address: Address::repeat_byte((i + 1) as u8),
                balance,
                rank: (i + 1) as u32,
            })
            .collect();

        let metrics = SnapshotMetrics {
            concentration: ConcentrationMetrics::compute(&balances),
            ..SnapshotMetrics::default()
        };

        Snapshot {
            protocol,
            timestamp,
            provenance: Provenance::Live,
            holders,
            proposals: Vec::new(),
            votes: Vec::new(),
            delegations: Vec::new(),
            metrics,
        }
    }
}
