use crate::config::NormalizerConfig;
use crate::error::{AnalyticsError, Result};
use crate::fetch::adapter::{HolderPage, RawDelegation, RawProposal, RawVote};
use crate::types::{
    Delegation, DelegationAmount, HolderBalance, Proposal, ProposalStatus, Protocol, Tally, Vote,
    VoteChoice,
};
use ahash::{HashMap, HashMapExt, HashSet, HashSetExt};
use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use tracing::warn;

/// Maps adapter records into the canonical model.
///
/// Individual records that violate the schema are dropped with a structured
/// warning carrying enough context to reproduce. If too few records survive
/// for a kind, the whole fetch is rejected so the coordinator can advance to
/// the next source instead of building a silently thinned snapshot.
pub struct Normalizer {
    config: NormalizerConfig,
}

impl Normalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    /// Reject the batch when fewer than the configured share of expected
    /// records survived validation.
    fn survivor_gate(&self, kind: &str, survivors: usize, expected: usize) -> Result<()> {
        if expected == 0 {
            return Ok(());
        }
        let share = survivors as f64 / expected as f64;
        if share < self.config.min_survivor_share {
            return Err(AnalyticsError::PermanentSchema(format!(
                "{kind}: only {survivors} of {expected} records survived normalization \
                 ({share:.2} < {:.2})",
                self.config.min_survivor_share
            )));
        }
        Ok(())
    }

    /// Holder page into ranked balances. Duplicates collapse to their first
    /// occurrence; the ranked set must fit within the protocol supply.
    pub fn holders(&self, page: &HolderPage, protocol: &Protocol) -> Result<Vec<HolderBalance>> {
        let expected = page.expected_total.unwrap_or(page.holders.len());
        let mut seen: HashSet<Address> = HashSet::new();
        let mut holders: Vec<HolderBalance> = Vec::with_capacity(page.holders.len());

        for raw in &page.holders {
            let address: Address = match raw.address.parse() {
                Ok(address) => address,
                Err(_) => {
                    warn!(address = %raw.address, protocol = %protocol.id, "dropping holder with invalid address");
                    continue;
                }
            };
            let balance: u128 = match raw.balance.parse() {
                Ok(balance) => balance,
                Err(_) => {
                    warn!(address = %raw.address, balance = %raw.balance, "dropping holder with invalid balance");
                    continue;
                }
            };
            if !seen.insert(address) {
                warn!(address = %address, "dropping duplicate holder record");
                continue;
            }
            holders.push(HolderBalance { address, balance, rank: 0 });
        }

        self.survivor_gate("holders", holders.len(), expected)?;

        let held: u128 = holders.iter().map(|h| h.balance).sum();
        if held > protocol.total_supply {
            return Err(AnalyticsError::PermanentSchema(format!(
                "holders: held {held} exceeds supply {} for {}",
                protocol.total_supply, protocol.id
            )));
        }

        crate::simulator::rank_holders(&mut holders);
        Ok(holders)
    }

    pub fn proposals(&self, raws: &[RawProposal], protocol: &Protocol) -> Result<Vec<Proposal>> {
        let mut proposals = Vec::with_capacity(raws.len());
        let mut seen: HashSet<u64> = HashSet::new();

        for raw in raws {
            match self.proposal(raw, protocol) {
                Ok(proposal) => {
                    if !seen.insert(proposal.id) {
                        warn!(proposal = proposal.id, "dropping duplicate proposal");
                        continue;
                    }
                    proposals.push(proposal);
                }
                Err(reason) => {
                    warn!(proposal = %raw.id, protocol = %protocol.id, %reason, "dropping proposal record");
                }
            }
        }

        self.survivor_gate("proposals", proposals.len(), raws.len())?;
        proposals.sort_by_key(|p| p.id);
        Ok(proposals)
    }

    fn proposal(&self, raw: &RawProposal, protocol: &Protocol) -> std::result::Result<Proposal, String> {
        let id: u64 = raw.id.parse().map_err(|_| format!("invalid id '{}'", raw.id))?;
        let proposer: Address = raw
            .proposer
            .parse()
            .map_err(|_| format!("invalid proposer '{}'", raw.proposer))?;
        let status = parse_status(&raw.status).ok_or_else(|| format!("unknown status '{}'", raw.status))?;
        let voting_start = timestamp(raw.voting_start).ok_or("invalid voting_start")?;
        let voting_end = timestamp(raw.voting_end).ok_or("invalid voting_end")?;
        if voting_end < voting_start {
            return Err("voting window ends before it starts".to_string());
        }
        let created_at = timestamp(raw.created_at).unwrap_or(voting_start);

        let tally = Tally {
            for_power: parse_amount(&raw.for_votes)?,
            against_power: parse_amount(&raw.against_votes)?,
            abstain_power: parse_amount(&raw.abstain_votes)?,
        };
        let quorum = parse_amount(&raw.quorum)?;

        let mut metadata = std::collections::BTreeMap::new();
        if let Some(title) = &raw.title {
            if !title.is_empty() {
                metadata.insert("title".to_string(), title.clone());
            }
        }

        Ok(Proposal {
            protocol_id: protocol.id.clone(),
            id,
            proposer,
            created_at,
            voting_start,
            voting_end,
            status,
            quorum,
            tally,
            metadata,
        })
    }

    /// Votes for known proposals, at most one per (proposal, voter); the
    /// earliest cast wins a conflict.
    pub fn votes(&self, raws: &[RawVote], proposal_ids: &HashSet<u64>) -> Result<Vec<Vote>> {
        let mut best: HashMap<(u64, Address), Vote> = HashMap::new();
        let mut dropped = 0usize;

        for raw in raws {
            match self.vote(raw, proposal_ids) {
                Ok(vote) => {
                    let key = (vote.proposal_id, vote.voter);
                    let keep_existing =
                        best.get(&key).map(|e| e.cast_at <= vote.cast_at).unwrap_or(false);
                    if keep_existing {
                        warn!(proposal = vote.proposal_id, voter = %vote.voter, "dropping duplicate vote");
                    } else {
                        best.insert(key, vote);
                    }
                }
                Err(reason) => {
                    dropped += 1;
                    warn!(proposal = %raw.proposal_id, voter = %raw.voter, %reason, "dropping vote record");
                }
            }
        }

        self.survivor_gate("votes", raws.len() - dropped, raws.len())?;
        let mut votes: Vec<Vote> = best.into_values().collect();
        votes.sort_by(|a, b| {
            a.proposal_id
                .cmp(&b.proposal_id)
                .then_with(|| a.voter.cmp(&b.voter))
        });
        Ok(votes)
    }

    fn vote(&self, raw: &RawVote, proposal_ids: &HashSet<u64>) -> std::result::Result<Vote, String> {
        let proposal_id: u64 = raw
            .proposal_id
            .parse()
            .map_err(|_| format!("invalid proposal id '{}'", raw.proposal_id))?;
        if !proposal_ids.contains(&proposal_id) {
            return Err("vote references unknown proposal".to_string());
        }
        let voter: Address = raw
            .voter
            .parse()
            .map_err(|_| format!("invalid voter '{}'", raw.voter))?;
        let choice = parse_choice(&raw.support)
            .ok_or_else(|| format!("unknown support value '{}'", raw.support))?;
        let power = parse_amount(&raw.power)?;
        let cast_at = timestamp(raw.cast_at).ok_or("invalid cast time")?;

        Ok(Vote { proposal_id, voter, choice, power, cast_at })
    }

    /// Delegations without self-loops; a delegator keeps only its most
    /// recent delegatee.
    pub fn delegations(&self, raws: &[RawDelegation]) -> Result<Vec<Delegation>> {
        let mut latest: HashMap<Address, Delegation> = HashMap::new();
        let mut dropped = 0usize;

        for raw in raws {
            match self.delegation(raw) {
                Ok(delegation) => {
                    let superseded = latest
                        .get(&delegation.delegator)
                        .map(|e| e.effective_from >= delegation.effective_from)
                        .unwrap_or(false);
                    if !superseded {
                        latest.insert(delegation.delegator, delegation);
                    }
                }
                Err(reason) => {
                    dropped += 1;
                    warn!(delegator = %raw.delegator, %reason, "dropping delegation record");
                }
            }
        }

        self.survivor_gate("delegations", raws.len() - dropped, raws.len())?;
        let mut delegations: Vec<Delegation> = latest.into_values().collect();
        delegations.sort_by(|a, b| a.delegator.cmp(&b.delegator));
        Ok(delegations)
    }

    fn delegation(&self, raw: &RawDelegation) -> std::result::Result<Delegation, String> {
        let delegator: Address = raw
            .delegator
            .parse()
            .map_err(|_| format!("invalid delegator '{}'", raw.delegator))?;
        let delegatee: Address = raw
            .delegatee
            .parse()
            .map_err(|_| format!("invalid delegatee '{}'", raw.delegatee))?;
        if delegator == delegatee {
            return Err("self-delegation".to_string());
        }
        let effective_from = timestamp(raw.effective_from).ok_or("invalid effective time")?;
        let amount = match &raw.amount {
            None => DelegationAmount::Full,
            Some(value) => DelegationAmount::Partial(parse_amount(value)?),
        };

        Ok(Delegation { delegator, delegatee, effective_from, amount })
    }
}

fn parse_status(value: &str) -> Option<ProposalStatus> {
    match value.to_lowercase().as_str() {
        "pending" => Some(ProposalStatus::Pending),
        "active" => Some(ProposalStatus::Active),
        // Queued proposals have passed their vote and await execution.
        "succeeded" | "queued" => Some(ProposalStatus::Succeeded),
        "defeated" => Some(ProposalStatus::Defeated),
        "executed" => Some(ProposalStatus::Executed),
        "cancelled" | "canceled" => Some(ProposalStatus::Cancelled),
        "expired" => Some(ProposalStatus::Expired),
        _ => None,
    }
}

fn parse_choice(value: &str) -> Option<VoteChoice> {
    match value.to_lowercase().as_str() {
        "for" | "1" | "true" => Some(VoteChoice::For),
        "against" | "0" | "false" => Some(VoteChoice::Against),
        "abstain" | "2" => Some(VoteChoice::Abstain),
        _ => None,
    }
}

fn parse_amount(value: &str) -> std::result::Result<u128, String> {
    // Subgraphs occasionally serve whole-number amounts with a trailing
    // ".0"; anything fractional or negative is rejected.
    let trimmed = value.strip_suffix(".0").unwrap_or(value);
    trimmed
        .parse::<u128>()
        .map_err(|_| format!("invalid amount '{value}'"))
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(secs, 0)
}
