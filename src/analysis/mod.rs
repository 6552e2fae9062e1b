/// Analytical layer.
///
/// Everything in here is pure CPU work over a normalized snapshot: no I/O,
/// no suspension points. The three analyzers are independent and may run in
/// parallel on the same input.
pub mod concentration;
pub mod participation;
pub mod voting_blocks;

pub use concentration::{ConcentrationMetrics, LorenzPoint};
pub use participation::{DelegateInfluence, DelegationMetrics, ParticipationMetrics};
pub use voting_blocks::{Anomaly, AnomalyKind, VotingBlock, VotingBlockAnalyzer, VotingBlockReport};
