use crate::error::{AnalyticsError, Result};
use crate::store::{SeriesPoint, SnapshotStore};
use crate::types::{MetricSelector, Provenance};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One aligned cell: the metric value and where its data came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonCell {
    pub value: Option<f64>,
    pub provenance: Provenance,
}

/// Rectangular cross-protocol join: rows are aligned timestamps, columns are
/// protocols. A `None` cell means the protocol had no snapshot within the
/// allowed skew of that row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonTable {
    pub metric: MetricSelector,
    pub protocols: Vec<String>,
    pub timestamps: Vec<DateTime<Utc>>,
    pub rows: Vec<Vec<Option<ComparisonCell>>>,
}

/// Composite ranking entry. `components` holds the normalized per-metric
/// contributions that produced the score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolScore {
    pub protocol: String,
    pub score: f64,
    pub components: BTreeMap<String, f64>,
}

/// Joins per-protocol snapshot series into aligned tables and rankings.
pub struct ComparisonEngine {
    store: Arc<dyn SnapshotStore>,
    max_skew: Duration,
}

impl ComparisonEngine {
    pub fn new(store: Arc<dyn SnapshotStore>, max_skew: Duration) -> Self {
        Self { store, max_skew }
    }

    /// Align the selected metric across protocols. The protocol with the
    /// coarsest series inside the window provides the row timeline; other
    /// protocols join by nearest-earlier snapshot within `max_skew`.
    pub async fn compare(
        &self,
        protocols: &[String],
        metric: MetricSelector,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<ComparisonTable> {
        if protocols.is_empty() {
            return Err(AnalyticsError::Validation(
                "comparison requires at least one protocol".to_string(),
            ));
        }
        if to < from {
            return Err(AnalyticsError::Validation(
                "comparison window ends before it starts".to_string(),
            ));
        }

        let mut series: Vec<Vec<SeriesPoint>> = Vec::with_capacity(protocols.len());
        for protocol in protocols {
            series.push(self.store.series(protocol, metric, from, to).await?);
        }

        // Coarsest non-empty series drives the timeline.
        let base = series
            .iter()
            .enumerate()
            .filter(|(_, points)| !points.is_empty())
            .min_by_key(|(_, points)| points.len())
            .map(|(i, _)| i);
        let Some(base) = base else {
            return Ok(ComparisonTable {
                metric,
                protocols: protocols.to_vec(),
                timestamps: Vec::new(),
                rows: Vec::new(),
            });
        };

        let timestamps: Vec<DateTime<Utc>> =
            series[base].iter().map(|p| p.timestamp).collect();
        let rows = timestamps
            .iter()
            .map(|&row_ts| {
                series
                    .iter()
                    .map(|points| {
                        points
                            .iter()
                            .rev()
                            .find(|p| p.timestamp <= row_ts && row_ts - p.timestamp <= self.max_skew)
                            .map(|p| ComparisonCell {
                                value: p.value,
                                provenance: p.provenance,
                            })
                    })
                    .collect()
            })
            .collect();

        Ok(ComparisonTable {
            metric,
            protocols: protocols.to_vec(),
            timestamps,
            rows,
        })
    }

    /// Rank protocols by a weighted linear combination of metrics, each
    /// normalized min-max across the compared set. Metrics are read from
    /// each protocol's latest snapshot at or before `at`.
    pub async fn rank(
        &self,
        protocols: &[String],
        weights: &[(MetricSelector, f64)],
        at: DateTime<Utc>,
    ) -> Result<Vec<ProtocolScore>> {
        if protocols.is_empty() || weights.is_empty() {
            return Err(AnalyticsError::Validation(
                "ranking requires protocols and a non-empty weight set".to_string(),
            ));
        }

        let mut raw: Vec<Vec<Option<f64>>> = Vec::with_capacity(protocols.len());
        for protocol in protocols {
            let snapshot = self.store.nearest(protocol, at).await?;
            raw.push(
                weights
                    .iter()
                    .map(|(metric, _)| {
                        snapshot.as_ref().and_then(|s| metric.project(&s.metrics))
                    })
                    .collect(),
            );
        }

        let mut scores: Vec<ProtocolScore> = protocols
            .iter()
            .map(|protocol| ProtocolScore {
                protocol: protocol.clone(),
                score: 0.0,
                components: BTreeMap::new(),
            })
            .collect();

        for (metric_idx, (metric, weight)) in weights.iter().enumerate() {
            let values: Vec<Option<f64>> = raw.iter().map(|row| row[metric_idx]).collect();
            let present: Vec<f64> = values.iter().flatten().copied().collect();
            let (min, max) = (
                present.iter().copied().fold(f64::INFINITY, f64::min),
                present.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            );

            for (protocol_idx, value) in values.iter().enumerate() {
                let normalized = match value {
                    None => 0.0,
                    Some(v) => {
                        if present.len() <= 1 || (max - min).abs() < f64::EPSILON {
                            // A lone or constant column carries no ordering
                            // information.
                            0.5
                        } else {
                            (v - min) / (max - min)
                        }
                    }
                };
                let contribution = normalized * weight;
                scores[protocol_idx].score += contribution;
                scores[protocol_idx]
                    .components
                    .insert(metric.to_string(), contribution);
            }
        }

        scores.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.protocol.cmp(&b.protocol)));
        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::{snapshot_at, ts};
    use crate::store::MemorySnapshotStore;

    async fn seeded_store() -> Arc<MemorySnapshotStore> {
        let store = Arc::new(MemorySnapshotStore::new());
        // Compound is the coarse series; Uniswap snapshots land two days
        // earlier than each compound row.
        for day in [10, 20] {
            store.put(&snapshot_at("compound", ts(2024, 1, day))).await.unwrap();
        }
        for day in [8, 18, 28] {
            store.put(&snapshot_at("uniswap", ts(2024, 1, day))).await.unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_compare_aligns_nearest_earlier() {
        let store = seeded_store().await;
        let engine = ComparisonEngine::new(store, Duration::days(5));
        let table = engine
            .compare(
                &["compound".to_string(), "uniswap".to_string()],
                MetricSelector::Gini,
                ts(2024, 1, 1),
                ts(2024, 2, 1),
            )
            .await
            .unwrap();

        // Compound has fewer points, so it provides the timeline.
        assert_eq!(table.timestamps, vec![ts(2024, 1, 10), ts(2024, 1, 20)]);
        assert_eq!(table.rows.len(), 2);
        for row in &table.rows {
            assert_eq!(row.len(), 2);
            // Both protocols resolve within the 5-day skew.
            assert!(row[0].is_some() && row[1].is_some());
        }
    }

    #[tokio::test]
    async fn test_compare_skew_limit_leaves_gap() {
        let store = seeded_store().await;
        let engine = ComparisonEngine::new(store, Duration::days(1));
        let table = engine
            .compare(
                &["compound".to_string(), "uniswap".to_string()],
                MetricSelector::Gini,
                ts(2024, 1, 1),
                ts(2024, 2, 1),
            )
            .await
            .unwrap();

        // Uniswap's nearest snapshots are two days earlier than each row:
        // outside a one-day skew, so its column is empty.
        for row in &table.rows {
            assert!(row[0].is_some());
            assert!(row[1].is_none());
        }
    }

    #[tokio::test]
    async fn test_compare_empty_window() {
        let store = seeded_store().await;
        let engine = ComparisonEngine::new(store, Duration::days(5));
        let table = engine
            .compare(
                &["compound".to_string()],
                MetricSelector::Gini,
                ts(2025, 1, 1),
                ts(2025, 2, 1),
            )
            .await
            .unwrap();
        assert!(table.timestamps.is_empty());
        assert!(table.rows.is_empty());
    }

    #[tokio::test]
    async fn test_rank_orders_by_weighted_score() {
        let store = seeded_store().await;
        let engine = ComparisonEngine::new(store, Duration::days(5));
        let scores = engine
            .rank(
                &["compound".to_string(), "uniswap".to_string()],
                &[(MetricSelector::Gini, 1.0), (MetricSelector::Nakamoto, 0.5)],
                ts(2024, 2, 1),
            )
            .await
            .unwrap();

        assert_eq!(scores.len(), 2);
        // Identical fixture metrics: constant columns normalize to 0.5, so
        // the tie breaks alphabetically.
        assert_eq!(scores[0].protocol, "compound");
        assert!((scores[0].score - scores[1].score).abs() < 1e-12);
        assert_eq!(scores[0].components.len(), 2);
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let store = seeded_store().await;
        let engine = ComparisonEngine::new(store, Duration::days(5));
        assert!(matches!(
            engine
                .compare(&[], MetricSelector::Gini, ts(2024, 1, 1), ts(2024, 2, 1))
                .await,
            Err(AnalyticsError::Validation(_))
        ));
        assert!(matches!(
            engine
                .rank(&["compound".to_string()], &[], ts(2024, 2, 1))
                .await,
            Err(AnalyticsError::Validation(_))
        ));
    }
}
