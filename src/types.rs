use crate::analysis::concentration::ConcentrationMetrics;
use crate::analysis::participation::ParticipationMetrics;
use crate::analysis::voting_blocks::VotingBlockReport;
use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Where the data underlying an analytical result came from.
///
/// Ordered from strongest to weakest tier; a snapshot assembled from mixed
/// tiers carries the weakest one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    Live,
    Cached,
    FallbackFreeTier,
    Simulated,
}

impl Provenance {
    /// The weaker of two tiers. Used when holder and governance data for the
    /// same snapshot come from different tiers.
    pub fn weakest(self, other: Provenance) -> Provenance {
        self.max(other)
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Provenance::Live => "live",
            Provenance::Cached => "cached",
            Provenance::FallbackFreeTier => "fallback-free-tier",
            Provenance::Simulated => "simulated",
        };
        write!(f, "{s}")
    }
}

/// A protocol whose governance token is under analysis. Immutable within a
/// snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Protocol {
    /// Lowercase identifier, e.g. "compound".
    pub id: String,
    pub name: String,
    pub decimals: u8,
    /// Total supply in base units as of the snapshot.
    pub total_supply: u128,
    /// Governance token contract.
    pub token_address: Address,
    /// Governor contract emitting proposals and votes.
    pub governor_address: Address,
}

/// A single holder's balance at the snapshot reference, ranked by descending
/// balance with ties broken by address bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HolderBalance {
    pub address: Address,
    /// Base units, never negative.
    pub balance: u128,
    /// 1-based rank by descending balance.
    pub rank: u32,
}

/// Voting choice on a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteChoice {
    For,
    Against,
    Abstain,
}

/// Proposal lifecycle status. Terminal statuses never revert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Pending,
    Active,
    Succeeded,
    Defeated,
    Executed,
    Cancelled,
    Expired,
}

impl ProposalStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ProposalStatus::Pending | ProposalStatus::Active)
    }

    /// The winning choice implied by a decided status, if any.
    pub fn winning_choice(self) -> Option<VoteChoice> {
        match self {
            ProposalStatus::Succeeded | ProposalStatus::Executed => Some(VoteChoice::For),
            ProposalStatus::Defeated | ProposalStatus::Expired => Some(VoteChoice::Against),
            _ => None,
        }
    }
}

/// Monotonically growing vote tallies in base units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub for_power: u128,
    pub against_power: u128,
    pub abstain_power: u128,
}

impl Tally {
    pub fn total(&self) -> u128 {
        self.for_power + self.against_power + self.abstain_power
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub protocol_id: String,
    /// Protocol-unique proposal id.
    pub id: u64,
    pub proposer: Address,
    pub created_at: DateTime<Utc>,
    pub voting_start: DateTime<Utc>,
    pub voting_end: DateTime<Utc>,
    pub status: ProposalStatus,
    /// Minimum cast power for the result to be valid, base units.
    pub quorum: u128,
    pub tally: Tally,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// One address's vote on one proposal. At most one per (proposal, voter).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub proposal_id: u64,
    pub voter: Address,
    pub choice: VoteChoice,
    /// Holdings plus delegated-in power at the proposal's reference block.
    pub power: u128,
    pub cast_at: DateTime<Utc>,
}

/// Amount delegated: the full balance or a fixed quantity of base units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DelegationAmount {
    Full,
    Partial(u128),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    pub delegator: Address,
    pub delegatee: Address,
    pub effective_from: DateTime<Utc>,
    pub amount: DelegationAmount,
}

/// The analytical bundle for a single (protocol, timestamp). Created by the
/// fetch pipeline, persisted once, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub protocol: Protocol,
    pub timestamp: DateTime<Utc>,
    pub provenance: Provenance,
    pub holders: Vec<HolderBalance>,
    pub proposals: Vec<Proposal>,
    pub votes: Vec<Vote>,
    pub delegations: Vec<Delegation>,
    pub metrics: SnapshotMetrics,
}

impl Snapshot {
    /// Sum of all holder balances in base units.
    pub fn held_supply(&self) -> u128 {
        self.holders.iter().map(|h| h.balance).sum()
    }

    /// Filename stem for the on-disk store, e.g. `20240115T083000Z`.
    pub fn file_stem(&self) -> String {
        self.timestamp.format("%Y%m%dT%H%M%SZ").to_string()
    }
}

/// Computed metric set embedded in a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetrics {
    pub concentration: ConcentrationMetrics,
    pub participation: ParticipationMetrics,
    pub voting_blocks: VotingBlockReport,
}

/// Names a single scalar metric inside a snapshot for series and comparison
/// queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MetricSelector {
    Gini,
    Hhi,
    Nakamoto,
    Palma,
    Hoover,
    Theil,
    Turnout,
    VoterCount,
    /// Share of supply held by the top N holders.
    TopShare(u32),
}

impl MetricSelector {
    /// Project the selected metric out of a snapshot's computed set.
    /// `None` means the metric is undefined for this snapshot (a gap).
    pub fn project(&self, metrics: &SnapshotMetrics) -> Option<f64> {
        match self {
            MetricSelector::Gini => Some(metrics.concentration.gini),
            MetricSelector::Hhi => Some(metrics.concentration.hhi),
            MetricSelector::Nakamoto => Some(metrics.concentration.nakamoto as f64),
            MetricSelector::Palma => metrics.concentration.palma,
            MetricSelector::Hoover => Some(metrics.concentration.hoover),
            MetricSelector::Theil => Some(metrics.concentration.theil),
            MetricSelector::Turnout => Some(metrics.participation.overall_turnout),
            MetricSelector::VoterCount => Some(metrics.participation.voter_count as f64),
            MetricSelector::TopShare(n) => metrics.concentration.top_shares.get(n).copied(),
        }
    }
}

impl fmt::Display for MetricSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricSelector::Gini => write!(f, "gini"),
            MetricSelector::Hhi => write!(f, "hhi"),
            MetricSelector::Nakamoto => write!(f, "nakamoto"),
            MetricSelector::Palma => write!(f, "palma"),
            MetricSelector::Hoover => write!(f, "hoover"),
            MetricSelector::Theil => write!(f, "theil"),
            MetricSelector::Turnout => write!(f, "turnout"),
            MetricSelector::VoterCount => write!(f, "voter-count"),
            MetricSelector::TopShare(n) => write!(f, "top-{n}-share"),
        }
    }
}

impl FromStr for MetricSelector {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "gini" => Ok(MetricSelector::Gini),
            "hhi" => Ok(MetricSelector::Hhi),
            "nakamoto" => Ok(MetricSelector::Nakamoto),
            "palma" => Ok(MetricSelector::Palma),
            "hoover" => Ok(MetricSelector::Hoover),
            "theil" => Ok(MetricSelector::Theil),
            "turnout" => Ok(MetricSelector::Turnout),
            "voter-count" => Ok(MetricSelector::VoterCount),
            other => {
                let inner = other
                    .strip_prefix("top-")
                    .and_then(|rest| rest.strip_suffix("-share"))
                    .and_then(|n| n.parse::<u32>().ok());
                match inner {
                    Some(n) if n > 0 => Ok(MetricSelector::TopShare(n)),
                    _ => Err(format!(
                        "unknown metric '{other}' (expected gini, hhi, nakamoto, palma, hoover, \
                         theil, turnout, voter-count, or top-N-share)"
                    )),
                }
            }
        }
    }
}
