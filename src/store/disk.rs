use crate::error::{AnalyticsError, Result};
use crate::store::SnapshotStore;
use crate::types::{Provenance, Snapshot};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};

/// Bumped when the snapshot file layout changes shape.
const SCHEMA_VERSION: u32 = 1;
const INDEX_FILE: &str = "index.json";
const SNAPSHOT_EXT: &str = "snap";

/// Self-describing on-disk snapshot record.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotFile {
    schema_version: u32,
    protocol_id: String,
    timestamp: DateTime<Utc>,
    provenance: Provenance,
    snapshot: Snapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    timestamp: DateTime<Utc>,
    file: String,
    provenance: Provenance,
    /// SHA-256 of the snapshot file contents, hex.
    checksum: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ProtocolIndex {
    snapshots: Vec<IndexEntry>,
}

/// Disk-backed snapshot store: one directory per protocol, one file per
/// snapshot named `YYYYMMDDTHHMMSSZ.snap`, and an `index.json` per protocol
/// that is recoverable from a directory scan.
///
/// Writes go through a temp file and an atomic rename, serialized per
/// protocol; readers work off an in-memory index snapshot and never take
/// the write lock.
pub struct DiskSnapshotStore {
    root: PathBuf,
    index: RwLock<HashMap<String, BTreeMap<DateTime<Utc>, IndexEntry>>>,
    write_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl DiskSnapshotStore {
    /// Open a store rooted at `root`, creating it if absent. Per-protocol
    /// indexes are loaded, or rebuilt from a scan when missing or corrupt.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;

        let mut index = HashMap::new();
        let mut dir = tokio::fs::read_dir(&root).await?;
        while let Some(entry) = dir.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let protocol = entry.file_name().to_string_lossy().to_string();
            let entries = load_or_rebuild_index(&entry.path()).await?;
            index.insert(protocol, entries);
        }

        Ok(Self {
            root,
            index: RwLock::new(index),
            write_locks: Mutex::new(HashMap::new()),
        })
    }

    fn protocol_dir(&self, protocol: &str) -> PathBuf {
        self.root.join(protocol)
    }

    async fn write_lock(&self, protocol: &str) -> Arc<Mutex<()>> {
        let mut locks = self.write_locks.lock().await;
        locks
            .entry(protocol.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn read_snapshot(&self, protocol: &str, entry: &IndexEntry) -> Result<Snapshot> {
        let path = self.protocol_dir(protocol).join(&entry.file);
        let bytes = tokio::fs::read(&path).await?;
        let checksum = hex_digest(&bytes);
        if checksum != entry.checksum {
            return Err(AnalyticsError::StorageIO(format!(
                "checksum mismatch for {}: index {} vs file {}",
                path.display(),
                entry.checksum,
                checksum
            )));
        }
        let file: SnapshotFile = serde_json::from_slice(&bytes)
            .map_err(|e| AnalyticsError::StorageIO(format!("corrupt snapshot {}: {e}", path.display())))?;
        Ok(file.snapshot)
    }

    async fn persist_index(&self, protocol: &str) -> Result<()> {
        let entries: Vec<IndexEntry> = {
            let index = self.index.read().await;
            index
                .get(protocol)
                .map(|m| m.values().cloned().collect())
                .unwrap_or_default()
        };
        let body = serde_json::to_vec_pretty(&ProtocolIndex { snapshots: entries })
            .map_err(|e| AnalyticsError::Internal(format!("index serialization: {e}")))?;
        let dir = self.protocol_dir(protocol);
        let tmp = dir.join(format!("{INDEX_FILE}.tmp"));
        tokio::fs::write(&tmp, &body).await?;
        tokio::fs::rename(&tmp, dir.join(INDEX_FILE)).await?;
        Ok(())
    }
}

#[async_trait]
impl SnapshotStore for DiskSnapshotStore {
    async fn put(&self, snapshot: &Snapshot) -> Result<()> {
        let protocol = snapshot.protocol.id.clone();
        let lock = self.write_lock(&protocol).await;
        let _guard = lock.lock().await;

        {
            let index = self.index.read().await;
            if index
                .get(&protocol)
                .map(|m| m.contains_key(&snapshot.timestamp))
                .unwrap_or(false)
            {
                return Err(AnalyticsError::StorageIO(format!(
                    "snapshot ({protocol}, {}) already exists",
                    snapshot.timestamp
                )));
            }
        }

        let dir = self.protocol_dir(&protocol);
        tokio::fs::create_dir_all(&dir).await?;

        let file_name = format!("{}.{SNAPSHOT_EXT}", snapshot.file_stem());
        let record = SnapshotFile {
            schema_version: SCHEMA_VERSION,
            protocol_id: protocol.clone(),
            timestamp: snapshot.timestamp,
            provenance: snapshot.provenance,
            snapshot: snapshot.clone(),
        };
        let body = serde_json::to_vec(&record)
            .map_err(|e| AnalyticsError::Internal(format!("snapshot serialization: {e}")))?;
        let checksum = hex_digest(&body);

        // Atomic visibility: write to a temp name, then rename into place.
        let tmp = dir.join(format!("{file_name}.tmp"));
        tokio::fs::write(&tmp, &body).await?;
        tokio::fs::rename(&tmp, dir.join(&file_name)).await?;

        {
            let mut index = self.index.write().await;
            index.entry(protocol.clone()).or_default().insert(
                snapshot.timestamp,
                IndexEntry {
                    timestamp: snapshot.timestamp,
                    file: file_name,
                    provenance: snapshot.provenance,
                    checksum,
                },
            );
        }
        self.persist_index(&protocol).await?;
        info!(protocol = %protocol, timestamp = %snapshot.timestamp, provenance = %snapshot.provenance, "snapshot persisted");
        Ok(())
    }

    async fn get(&self, protocol: &str, timestamp: DateTime<Utc>) -> Result<Option<Snapshot>> {
        let entry = {
            let index = self.index.read().await;
            index.get(protocol).and_then(|m| m.get(&timestamp)).cloned()
        };
        match entry {
            Some(entry) => Ok(Some(self.read_snapshot(protocol, &entry).await?)),
            None => Ok(None),
        }
    }

    async fn nearest(
        &self,
        protocol: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<Snapshot>> {
        let entry = {
            let index = self.index.read().await;
            index.get(protocol).and_then(|m| {
                m.range((Bound::Unbounded, Bound::Included(timestamp)))
                    .next_back()
                    .map(|(_, entry)| entry.clone())
            })
        };
        match entry {
            Some(entry) => Ok(Some(self.read_snapshot(protocol, &entry).await?)),
            None => Ok(None),
        }
    }

    async fn range(
        &self,
        protocol: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Snapshot>> {
        let entries: Vec<IndexEntry> = {
            let index = self.index.read().await;
            index
                .get(protocol)
                .map(|m| m.range(from..=to).map(|(_, e)| e.clone()).collect())
                .unwrap_or_default()
        };
        let mut snapshots = Vec::with_capacity(entries.len());
        for entry in &entries {
            snapshots.push(self.read_snapshot(protocol, entry).await?);
        }
        Ok(snapshots)
    }

    async fn timestamps(&self, protocol: &str) -> Result<Vec<DateTime<Utc>>> {
        let index = self.index.read().await;
        Ok(index
            .get(protocol)
            .map(|m| m.keys().copied().collect())
            .unwrap_or_default())
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Load a protocol's index.json, falling back to a directory scan whenever
/// the file is missing, unreadable, or disagrees with reality.
async fn load_or_rebuild_index(
    dir: &Path,
) -> Result<BTreeMap<DateTime<Utc>, IndexEntry>> {
    let index_path = dir.join(INDEX_FILE);
    if let Ok(bytes) = tokio::fs::read(&index_path).await {
        match serde_json::from_slice::<ProtocolIndex>(&bytes) {
            Ok(index) => {
                return Ok(index
                    .snapshots
                    .into_iter()
                    .map(|entry| (entry.timestamp, entry))
                    .collect());
            }
            Err(e) => {
                warn!(path = %index_path.display(), error = %e, "corrupt index, rebuilding from scan");
            }
        }
    }
    rebuild_index(dir).await
}

async fn rebuild_index(dir: &Path) -> Result<BTreeMap<DateTime<Utc>, IndexEntry>> {
    let mut entries = BTreeMap::new();
    let mut read_dir = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = read_dir.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(SNAPSHOT_EXT) {
            continue;
        }
        let bytes = tokio::fs::read(&path).await?;
        let file: SnapshotFile = match serde_json::from_slice(&bytes) {
            Ok(file) => file,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping unreadable snapshot during rebuild");
                continue;
            }
        };
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        entries.insert(
            file.timestamp,
            IndexEntry {
                timestamp: file.timestamp,
                file: file_name,
                provenance: file.provenance,
                checksum: hex_digest(&bytes),
            },
        );
    }
    info!(dir = %dir.display(), snapshots = entries.len(), "index rebuilt from directory scan");
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::{snapshot_at, ts};
    use crate::types::MetricSelector;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_put_get_round_trip_on_disk() {
        let dir = TempDir::new().unwrap();
        let store = DiskSnapshotStore::open(dir.path()).await.unwrap();
        let snapshot = snapshot_at("compound", ts(2024, 1, 15));
        store.put(&snapshot).await.unwrap();

        let loaded = store.get("compound", ts(2024, 1, 15)).await.unwrap().unwrap();
        assert_eq!(loaded, snapshot);

        // File layout: <root>/compound/20240115T120000Z.snap plus the index.
        let snap_path = dir.path().join("compound").join("20240115T120000Z.snap");
        assert!(snap_path.exists());
        assert!(dir.path().join("compound").join(INDEX_FILE).exists());
    }

    #[tokio::test]
    async fn test_write_once_enforced() {
        let dir = TempDir::new().unwrap();
        let store = DiskSnapshotStore::open(dir.path()).await.unwrap();
        let snapshot = snapshot_at("compound", ts(2024, 1, 15));
        store.put(&snapshot).await.unwrap();
        assert!(matches!(
            store.put(&snapshot).await.unwrap_err(),
            AnalyticsError::StorageIO(_)
        ));
    }

    #[tokio::test]
    async fn test_reopen_reads_existing_index() {
        let dir = TempDir::new().unwrap();
        {
            let store = DiskSnapshotStore::open(dir.path()).await.unwrap();
            store.put(&snapshot_at("compound", ts(2024, 1, 10))).await.unwrap();
            store.put(&snapshot_at("compound", ts(2024, 1, 20))).await.unwrap();
        }

        let reopened = DiskSnapshotStore::open(dir.path()).await.unwrap();
        let timestamps = reopened.timestamps("compound").await.unwrap();
        assert_eq!(timestamps, vec![ts(2024, 1, 10), ts(2024, 1, 20)]);
    }

    #[tokio::test]
    async fn test_index_rebuilt_after_deletion() {
        let dir = TempDir::new().unwrap();
        {
            let store = DiskSnapshotStore::open(dir.path()).await.unwrap();
            store.put(&snapshot_at("compound", ts(2024, 1, 10))).await.unwrap();
        }
        std::fs::remove_file(dir.path().join("compound").join(INDEX_FILE)).unwrap();

        let reopened = DiskSnapshotStore::open(dir.path()).await.unwrap();
        let loaded = reopened.get("compound", ts(2024, 1, 10)).await.unwrap();
        assert!(loaded.is_some());
    }

    #[tokio::test]
    async fn test_tampered_file_fails_checksum() {
        let dir = TempDir::new().unwrap();
        let store = DiskSnapshotStore::open(dir.path()).await.unwrap();
        store.put(&snapshot_at("compound", ts(2024, 1, 10))).await.unwrap();

        let path = dir.path().join("compound").join("20240110T120000Z.snap");
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.extend_from_slice(b" ");
        std::fs::write(&path, &bytes).unwrap();

        let err = store.get("compound", ts(2024, 1, 10)).await.unwrap_err();
        assert!(matches!(err, AnalyticsError::StorageIO(_)));
    }

    #[tokio::test]
    async fn test_series_on_disk_backend() {
        let dir = TempDir::new().unwrap();
        let store = DiskSnapshotStore::open(dir.path()).await.unwrap();
        for day in [10, 20, 30] {
            store.put(&snapshot_at("compound", ts(2024, 1, day))).await.unwrap();
        }

        let points = store
            .series("compound", MetricSelector::Gini, ts(2024, 1, 10), ts(2024, 1, 30))
            .await
            .unwrap();
        assert_eq!(points.len(), 3);
        assert!(points.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        assert!((points[0].value.unwrap() - 0.325).abs() < 1e-9);
    }
}
