use crate::config::SourceId;
use crate::error::{AnalyticsError, Result};
use crate::types::{Protocol, Provenance};
use ahash::{HashMap, HashMapExt};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::time::Instant;

/// Holder record as returned by a source, pre-normalization. Balance is a
/// decimal string of base units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawHolder {
    pub address: String,
    pub balance: String,
}

/// One page of holder records. `expected_total` is the source's own count
/// when it reports one; the normalizer uses it for the survivor gate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HolderPage {
    pub holders: Vec<RawHolder>,
    pub next_cursor: Option<String>,
    pub expected_total: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawProposal {
    pub id: String,
    pub proposer: String,
    pub created_at: i64,
    pub voting_start: i64,
    pub voting_end: i64,
    pub status: String,
    pub quorum: String,
    pub for_votes: String,
    pub against_votes: String,
    pub abstain_votes: String,
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawVote {
    pub proposal_id: String,
    pub voter: String,
    /// "for" / "against" / "abstain" or the Governor numeric support codes.
    pub support: String,
    pub power: String,
    pub cast_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawDelegation {
    pub delegator: String,
    pub delegatee: String,
    pub effective_from: i64,
    /// Base-unit amount; `None` means the full balance.
    pub amount: Option<String>,
}

/// A single ERC-20 transfer event, used to reconstruct balances on sources
/// without a holder index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTransfer {
    pub from: String,
    pub to: String,
    pub value: u128,
}

/// Capability interface implemented once per external data source.
///
/// Every call takes a caller-supplied deadline; adapters must return rather
/// than block past it. Operations a source cannot answer fail with
/// `NotSupported` so the fallback chain can move on silently.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn id(&self) -> SourceId;

    /// Data tier this adapter serves from. Free-tier endpoints report
    /// `FallbackFreeTier`.
    fn tier(&self) -> Provenance {
        Provenance::Live
    }

    async fn fetch_holders(
        &self,
        protocol: &Protocol,
        limit: usize,
        cursor: Option<&str>,
        deadline: Instant,
    ) -> Result<HolderPage>;

    async fn fetch_proposals(
        &self,
        protocol: &Protocol,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        deadline: Instant,
    ) -> Result<Vec<RawProposal>>;

    async fn fetch_votes(
        &self,
        protocol: &Protocol,
        proposal_id: u64,
        deadline: Instant,
    ) -> Result<Vec<RawVote>>;

    async fn fetch_delegations(
        &self,
        protocol: &Protocol,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        deadline: Instant,
    ) -> Result<Vec<RawDelegation>>;
}

/// Time left before `deadline`, or `Cancelled` when it already passed.
pub fn remaining(deadline: Instant) -> Result<Duration> {
    let now = Instant::now();
    if now >= deadline {
        Err(AnalyticsError::Cancelled("adapter deadline exceeded".to_string()))
    } else {
        Ok(deadline - now)
    }
}

/// Replay transfer events into net balances, dropping the zero address and
/// emptied accounts. Output is ordered by descending balance with the
/// lexicographic address tie-break, ready for ranking.
pub fn reduce_transfers(transfers: &[RawTransfer]) -> Vec<RawHolder> {
    let mut balances: HashMap<String, i128> = HashMap::new();
    for transfer in transfers {
        if transfer.value == 0 {
            continue;
        }
        let value = transfer.value as i128;
        *balances.entry(transfer.from.to_lowercase()).or_default() -= value;
        *balances.entry(transfer.to.to_lowercase()).or_default() += value;
    }

    let mut holders: Vec<(String, i128)> = balances
        .into_iter()
        .filter(|(address, balance)| {
            *balance > 0 && address != "0x0000000000000000000000000000000000000000"
        })
        .collect();
    holders.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    holders
        .into_iter()
        .map(|(address, balance)| RawHolder {
            address,
            balance: balance.to_string(),
        })
        .collect()
}
