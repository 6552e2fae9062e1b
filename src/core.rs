use crate::analysis::concentration::ConcentrationMetrics;
use crate::analysis::participation::ParticipationMetrics;
use crate::analysis::voting_blocks::VotingBlockAnalyzer;
use crate::compare::{ComparisonEngine, ComparisonTable, ProtocolScore};
use crate::config::{AnalyzerConfig, ProtocolRegistry, StoreBackend, VotingBlockConfig};
use crate::error::{AnalyticsError, Result};
use crate::fetch::coordinator::FetchCoordinator;
use crate::metrics::{CoreMetrics, MetricsSummary};
use crate::simulator::{DistributionProfile, Simulator};
use crate::store::{DiskSnapshotStore, MemorySnapshotStore, SeriesPoint, SnapshotStore};
use crate::types::{
    Delegation, HolderBalance, MetricSelector, Proposal, Protocol, Provenance, Snapshot,
    SnapshotMetrics, Vote,
};
use chrono::{DateTime, Duration, DurationRound, Utc};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{info, warn};

/// How far back proposals and delegations are pulled by default.
const DEFAULT_LOOKBACK_DAYS: i64 = 180;
/// Maximum timestamp skew when joining protocols in comparisons.
const DEFAULT_COMPARE_SKEW_DAYS: i64 = 7;

/// Options for one snapshot build.
#[derive(Debug, Clone)]
pub struct BuildOptions {
    /// Holder count ceiling.
    pub limit: usize,
    /// Snapshot reference time; defaults to now at second precision.
    pub at: Option<DateTime<Utc>>,
    /// Governance lookback window.
    pub lookback: Duration,
    /// Global build deadline; defaults to the configured build timeout.
    pub deadline: Option<std::time::Duration>,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            limit: 100,
            at: None,
            lookback: Duration::days(DEFAULT_LOOKBACK_DAYS),
            deadline: None,
        }
    }
}

/// The engine handle. Owns the fetch coordinator (with its cache and rate
/// limiters), the snapshot store, the simulator, and the observability
/// counters; constructed once at startup and passed to all operations.
pub struct Core {
    config: AnalyzerConfig,
    registry: ProtocolRegistry,
    coordinator: FetchCoordinator,
    store: Arc<dyn SnapshotStore>,
    simulator: Simulator,
    metrics: Arc<CoreMetrics>,
}

impl Core {
    pub async fn new(config: AnalyzerConfig) -> Result<Self> {
        let metrics = Arc::new(CoreMetrics::default());
        let coordinator = FetchCoordinator::new(&config, Arc::clone(&metrics));
        let store: Arc<dyn SnapshotStore> = match config.snapshot_store.backend {
            StoreBackend::Mem => Arc::new(MemorySnapshotStore::new()),
            StoreBackend::Disk => {
                Arc::new(DiskSnapshotStore::open(config.snapshot_store.path.clone()).await?)
            }
        };
        Ok(Self::with_parts(config, coordinator, store, metrics))
    }

    /// Assemble a core from preconstructed parts. Used by embedders and
    /// tests that script the fetch layer.
    pub fn with_parts(
        config: AnalyzerConfig,
        coordinator: FetchCoordinator,
        store: Arc<dyn SnapshotStore>,
        metrics: Arc<CoreMetrics>,
    ) -> Self {
        let simulator = Simulator::new(config.simulator);
        Self {
            registry: ProtocolRegistry::builtin(),
            config,
            coordinator,
            store,
            simulator,
            metrics,
        }
    }

    pub fn store(&self) -> Arc<dyn SnapshotStore> {
        Arc::clone(&self.store)
    }

    pub fn registry(&self) -> &ProtocolRegistry {
        &self.registry
    }

    pub fn metrics_summary(&self) -> MetricsSummary {
        self.metrics.summary()
    }

    /// Build, analyze, and persist a snapshot for one protocol.
    ///
    /// The whole build runs under a global deadline: exceeding it abandons
    /// in-flight fetches and surfaces `Cancelled` without persisting
    /// anything.
    pub async fn analyze(&self, protocol_id: &str, options: BuildOptions) -> Result<Snapshot> {
        let protocol = self.registry.get(protocol_id)?.clone();
        let at = match options.at {
            Some(at) => at
                .duration_trunc(Duration::seconds(1))
                .map_err(|e| AnalyticsError::Validation(format!("invalid timestamp: {e}")))?,
            None => Utc::now()
                .duration_trunc(Duration::seconds(1))
                .map_err(|e| AnalyticsError::Internal(format!("clock truncation: {e}")))?,
        };
        let budget = options.deadline.unwrap_or_else(|| self.config.timeouts.build());
        let deadline = Instant::now() + budget;

        let snapshot = tokio::time::timeout_at(
            deadline,
            self.build_snapshot(&protocol, at, options.limit, options.lookback, deadline),
        )
        .await
        .map_err(|_| {
            AnalyticsError::Cancelled(format!(
                "snapshot build for {} exceeded {budget:?}",
                protocol.id
            ))
        })??;

        self.persist(snapshot).await
    }

    async fn build_snapshot(
        &self,
        protocol: &Protocol,
        at: DateTime<Utc>,
        limit: usize,
        lookback: Duration,
        deadline: Instant,
    ) -> Result<Snapshot> {
        if limit == 0 {
            return Err(AnalyticsError::Validation("holder limit must be positive".to_string()));
        }
        let since = at - lookback;

        // Holder and proposal fetches are independent; votes and
        // delegations follow once proposal ids are known.
        let (holders, proposals) = tokio::try_join!(
            self.coordinator.holders(protocol, limit, at, deadline),
            self.coordinator.proposals(protocol, since, at, deadline),
        )?;
        let (votes, delegations) = tokio::try_join!(
            self.coordinator.votes(protocol, &proposals.data, at, deadline),
            self.coordinator.delegations(protocol, since, at, deadline),
        )?;

        let provenance = holders
            .provenance
            .weakest(proposals.provenance)
            .weakest(votes.provenance)
            .weakest(delegations.provenance);

        let snapshot = assemble_snapshot(
            protocol.clone(),
            at,
            provenance,
            holders.data,
            proposals.data,
            votes.data,
            delegations.data,
            self.config.voting_blocks.clone(),
        )
        .await?;

        info!(
            protocol = %snapshot.protocol.id,
            timestamp = %snapshot.timestamp,
            provenance = %snapshot.provenance,
            holders = snapshot.holders.len(),
            proposals = snapshot.proposals.len(),
            votes = snapshot.votes.len(),
            "snapshot built"
        );
        Ok(snapshot)
    }

    /// Persist with a single retry on storage errors.
    async fn persist(&self, snapshot: Snapshot) -> Result<Snapshot> {
        match self.store.put(&snapshot).await {
            Ok(()) => Ok(snapshot),
            Err(AnalyticsError::StorageIO(first)) => {
                warn!(error = %first, "snapshot store write failed, retrying once");
                self.store.put(&snapshot).await?;
                Ok(snapshot)
            }
            Err(e) => Err(e),
        }
    }

    /// Produce a purely synthetic snapshot. Not persisted; callers that
    /// want it stored can `put` it through the store handle.
    pub async fn simulate(
        &self,
        protocol_id: &str,
        profile: DistributionProfile,
        num_holders: usize,
        seed: Option<u64>,
        at: Option<DateTime<Utc>>,
    ) -> Result<Snapshot> {
        if num_holders == 0 {
            return Err(AnalyticsError::Validation("holder count must be positive".to_string()));
        }
        let protocol = self.registry.get(protocol_id)?.clone();
        let seed = seed.unwrap_or_else(|| self.simulator.default_seed());
        let at = match at {
            Some(at) => at,
            None => Utc::now()
                .duration_trunc(Duration::seconds(1))
                .map_err(|e| AnalyticsError::Internal(format!("clock truncation: {e}")))?,
        };

        let bundle = self.simulator.generate_bundle(&protocol, profile, num_holders, at, seed);
        assemble_snapshot(
            protocol,
            at,
            Provenance::Simulated,
            bundle.holders,
            bundle.proposals,
            bundle.votes,
            bundle.delegations,
            self.config.voting_blocks.clone(),
        )
        .await
    }

    pub async fn series(
        &self,
        protocol_id: &str,
        selector: MetricSelector,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<SeriesPoint>> {
        let protocol = self.registry.get(protocol_id)?;
        if to < from {
            return Err(AnalyticsError::Validation(
                "series window ends before it starts".to_string(),
            ));
        }
        self.store.series(&protocol.id, selector, from, to).await
    }

    pub async fn compare(
        &self,
        protocol_ids: &[String],
        metric: MetricSelector,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<ComparisonTable> {
        let mut resolved = Vec::with_capacity(protocol_ids.len());
        for id in protocol_ids {
            resolved.push(self.registry.get(id)?.id.clone());
        }
        let engine = ComparisonEngine::new(
            Arc::clone(&self.store),
            Duration::days(DEFAULT_COMPARE_SKEW_DAYS),
        );
        engine.compare(&resolved, metric, from, to).await
    }

    pub async fn rank(
        &self,
        protocol_ids: &[String],
        weights: &[(MetricSelector, f64)],
        at: DateTime<Utc>,
    ) -> Result<Vec<ProtocolScore>> {
        let mut resolved = Vec::with_capacity(protocol_ids.len());
        for id in protocol_ids {
            resolved.push(self.registry.get(id)?.id.clone());
        }
        let engine = ComparisonEngine::new(
            Arc::clone(&self.store),
            Duration::days(DEFAULT_COMPARE_SKEW_DAYS),
        );
        engine.rank(&resolved, weights, at).await
    }
}

/// Run the three analyzers over normalized data on the CPU pool and wrap
/// the result. Concentration, participation, and voting-block work fan out
/// in parallel; none of them suspends.
#[allow(clippy::too_many_arguments)]
async fn assemble_snapshot(
    protocol: Protocol,
    at: DateTime<Utc>,
    provenance: Provenance,
    holders: Vec<HolderBalance>,
    proposals: Vec<Proposal>,
    votes: Vec<Vote>,
    delegations: Vec<Delegation>,
    voting_blocks: VotingBlockConfig,
) -> Result<Snapshot> {
    let handle = tokio::task::spawn_blocking(move || {
        let balances: Vec<u128> = holders.iter().map(|h| h.balance).collect();
        let (concentration, (participation, voting_blocks)) = rayon::join(
            || ConcentrationMetrics::compute(&balances),
            || {
                rayon::join(
                    || ParticipationMetrics::compute(
                        &protocol,
                        &holders,
                        &proposals,
                        &votes,
                        &delegations,
                    ),
                    || VotingBlockAnalyzer::new(voting_blocks).analyze(&holders, &proposals, &votes),
                )
            },
        );

        Snapshot {
            protocol,
            timestamp: at,
            provenance,
            holders,
            proposals,
            votes,
            delegations,
            metrics: SnapshotMetrics {
                concentration,
                participation,
                voting_blocks,
            },
        }
    });
    handle
        .await
        .map_err(|e| AnalyticsError::Internal(format!("metric computation panicked: {e}")))
}
