pub mod analysis;
pub mod compare;
pub mod config;
pub mod core;
pub mod error;
pub mod fetch;
pub mod metrics;
pub mod normalize;
pub mod simulator;
pub mod store;
pub mod types;

pub use crate::core::{BuildOptions, Core};
pub use analysis::{
    Anomaly, AnomalyKind, ConcentrationMetrics, DelegateInfluence, DelegationMetrics,
    ParticipationMetrics, VotingBlock, VotingBlockAnalyzer, VotingBlockReport,
};
pub use compare::{ComparisonEngine, ComparisonTable, ProtocolScore};
pub use config::{AnalyzerConfig, ProtocolRegistry, SourceId, StoreBackend};
pub use error::{AnalyticsError, Result};
pub use fetch::{FetchCoordinator, Fetched, ProviderAdapter};
pub use metrics::{CoreMetrics, MetricsSummary};
pub use normalize::Normalizer;
pub use simulator::{DistributionProfile, Simulator, TrendDirection};
pub use store::{DiskSnapshotStore, MemorySnapshotStore, SeriesPoint, SnapshotStore};
pub use types::{
    Delegation, HolderBalance, MetricSelector, Proposal, ProposalStatus, Protocol, Provenance,
    Snapshot, SnapshotMetrics, Tally, Vote, VoteChoice,
};
