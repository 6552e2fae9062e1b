use crate::types::{
    Delegation, DelegationAmount, HolderBalance, Proposal, Protocol, Vote, VoteChoice,
};
use ahash::{HashMap, HashMapExt, HashSet, HashSetExt};
use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

/// Number of top holders treated as whales.
pub const DEFAULT_WHALE_COUNT: usize = 10;

/// Minimum share of eligible power delegated into one address for it to be
/// reported as a key delegate.
pub const MIN_DELEGATE_SHARE: f64 = 0.01;

/// Vote counts and cast power split by choice for one proposal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteDistribution {
    pub for_count: u32,
    pub against_count: u32,
    pub abstain_count: u32,
    pub for_power: u128,
    pub against_power: u128,
    pub abstain_power: u128,
}

impl VoteDistribution {
    fn add(&mut self, vote: &Vote) {
        match vote.choice {
            VoteChoice::For => {
                self.for_count += 1;
                self.for_power += vote.power;
            }
            VoteChoice::Against => {
                self.against_count += 1;
                self.against_power += vote.power;
            }
            VoteChoice::Abstain => {
                self.abstain_count += 1;
                self.abstain_power += vote.power;
            }
        }
    }

    pub fn cast_power(&self) -> u128 {
        self.for_power + self.against_power + self.abstain_power
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalParticipation {
    pub proposal_id: u64,
    /// Power-weighted turnout: cast power over eligible power.
    pub turnout: f64,
    pub cast_power: u128,
    pub eligible_power: u128,
    pub vote_count: u32,
    pub distribution: VoteDistribution,
}

/// Participation within one holding-size bucket. Bounds are base units;
/// `upper` is exclusive and open-ended for the last bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizeBucket {
    pub label: String,
    pub lower: u128,
    pub upper: Option<u128>,
    pub holder_count: u32,
    pub voter_count: u32,
    /// Voters over holders within the bucket.
    pub participation_rate: f64,
    /// Bucket voters' cast power over all cast power.
    pub cast_power_share: f64,
}

/// Smallest top-voter prefix whose winning-side power already outweighs the
/// entire losing side of a decided proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PivotalPrefix {
    pub proposal_id: u64,
    pub addresses_needed: u32,
    pub power_needed: u128,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WhaleMetrics {
    /// How many top holders were considered.
    pub top_k: u32,
    /// Share of whale votes on decided proposals that matched the outcome.
    pub agreement_rate: f64,
    /// Whale share of all winning-side power across decided proposals.
    pub winning_power_share: f64,
    pub pivotal: Vec<PivotalPrefix>,
}

/// One address that concentrates delegated voting power.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegateInfluence {
    pub address: Address,
    pub own_balance: u128,
    pub delegated_in: u128,
    /// Own balance plus delegated-in power.
    pub voting_power: u128,
    /// Delegated-in power over eligible power.
    pub supply_share: f64,
    pub delegator_count: u32,
    /// Voting power over own balance; `None` for delegates holding nothing
    /// themselves.
    pub power_multiplier: Option<f64>,
}

/// Delegation network metrics for one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DelegationMetrics {
    /// Delegated power over eligible power.
    pub delegation_rate: f64,
    pub delegator_count: u32,
    pub delegatee_count: u32,
    /// Delegating holders over all holders.
    pub delegator_share: f64,
    /// Gini over per-delegatee delegated-in power.
    pub concentration: f64,
    /// Delegates above `MIN_DELEGATE_SHARE`, by descending voting power.
    pub key_delegates: Vec<DelegateInfluence>,
}

/// Governance participation metrics for one snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParticipationMetrics {
    pub proposal_count: u32,
    /// Power-weighted mean turnout across proposals. Authoritative metric;
    /// `voter_count` is the secondary head-count view.
    pub overall_turnout: f64,
    pub voter_count: u32,
    pub votes_per_voter: f64,
    pub per_proposal: Vec<ProposalParticipation>,
    pub segmentation: Vec<SizeBucket>,
    pub whales: WhaleMetrics,
    pub delegation: DelegationMetrics,
}

impl ParticipationMetrics {
    pub fn compute(
        protocol: &Protocol,
        holders: &[HolderBalance],
        proposals: &[Proposal],
        votes: &[Vote],
        delegations: &[Delegation],
    ) -> Self {
        let eligible_power: u128 = holders.iter().map(|h| h.balance).sum();

        let mut by_proposal: HashMap<u64, Vec<&Vote>> = HashMap::new();
        for vote in votes {
            by_proposal.entry(vote.proposal_id).or_default().push(vote);
        }

        let mut per_proposal = Vec::with_capacity(proposals.len());
        let mut total_cast: u128 = 0;
        for proposal in proposals {
            let mut distribution = VoteDistribution::default();
            let proposal_votes = by_proposal.get(&proposal.id).map(Vec::as_slice).unwrap_or(&[]);
            for vote in proposal_votes.iter().copied() {
                distribution.add(vote);
            }
            let cast_power = distribution.cast_power();
            total_cast += cast_power;
            per_proposal.push(ProposalParticipation {
                proposal_id: proposal.id,
                turnout: ratio(cast_power, eligible_power),
                cast_power,
                eligible_power,
                vote_count: proposal_votes.len() as u32,
                distribution,
            });
        }

        let mut voters: HashSet<Address> = HashSet::new();
        for vote in votes {
            voters.insert(vote.voter);
        }
        let voter_count = voters.len() as u32;
        let votes_per_voter = if voter_count == 0 {
            0.0
        } else {
            votes.len() as f64 / voter_count as f64
        };

        // Power-weighted mean over proposals with identical eligible power
        // reduces to total cast over total eligible.
        let overall_turnout = if proposals.is_empty() {
            0.0
        } else {
            ratio(total_cast, eligible_power * proposals.len() as u128)
        };

        Self {
            proposal_count: proposals.len() as u32,
            overall_turnout,
            voter_count,
            votes_per_voter,
            segmentation: segment_by_holding(protocol, holders, votes, &voters),
            whales: whale_metrics(holders, proposals, &by_proposal, DEFAULT_WHALE_COUNT),
            delegation: delegation_metrics(holders, delegations),
            per_proposal,
        }
    }
}

fn ratio(numerator: u128, denominator: u128) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Decade buckets in whole tokens, scaled by the protocol's decimals.
fn bucket_bounds(protocol: &Protocol) -> Vec<(String, u128, Option<u128>)> {
    let unit = 10u128.pow(protocol.decimals as u32);
    vec![
        ("<=1".to_string(), 0, Some(unit)),
        ("1-10".to_string(), unit, Some(unit * 10)),
        ("10-100".to_string(), unit * 10, Some(unit * 100)),
        ("100-1k".to_string(), unit * 100, Some(unit * 1_000)),
        ("1k-10k".to_string(), unit * 1_000, Some(unit * 10_000)),
        (">10k".to_string(), unit * 10_000, None),
    ]
}

fn segment_by_holding(
    protocol: &Protocol,
    holders: &[HolderBalance],
    votes: &[Vote],
    voters: &HashSet<Address>,
) -> Vec<SizeBucket> {
    let total_cast: u128 = votes.iter().map(|v| v.power).sum();
    let mut cast_by_voter: HashMap<Address, u128> = HashMap::new();
    for vote in votes {
        *cast_by_voter.entry(vote.voter).or_default() += vote.power;
    }

    bucket_bounds(protocol)
        .into_iter()
        .map(|(label, lower, upper)| {
            let in_bucket = |balance: u128| {
                balance >= lower && upper.map(|u| balance < u).unwrap_or(true)
            };
            let mut holder_count = 0u32;
            let mut bucket_voters = 0u32;
            let mut bucket_cast: u128 = 0;
            for holder in holders.iter().filter(|h| in_bucket(h.balance)) {
                holder_count += 1;
                if voters.contains(&holder.address) {
                    bucket_voters += 1;
                    bucket_cast += cast_by_voter.get(&holder.address).copied().unwrap_or(0);
                }
            }
            SizeBucket {
                label,
                lower,
                upper,
                holder_count,
                voter_count: bucket_voters,
                participation_rate: if holder_count == 0 {
                    0.0
                } else {
                    bucket_voters as f64 / holder_count as f64
                },
                cast_power_share: ratio(bucket_cast, total_cast),
            }
        })
        .collect()
}

fn whale_metrics(
    holders: &[HolderBalance],
    proposals: &[Proposal],
    by_proposal: &HashMap<u64, Vec<&Vote>>,
    top_k: usize,
) -> WhaleMetrics {
    let whale_set: HashSet<Address> = holders
        .iter()
        .filter(|h| (h.rank as usize) <= top_k)
        .map(|h| h.address)
        .collect();

    let mut whale_votes = 0u64;
    let mut whale_agreements = 0u64;
    let mut winning_total: u128 = 0;
    let mut winning_whale: u128 = 0;
    let mut pivotal = Vec::new();

    for proposal in proposals {
        let Some(winner) = proposal.status.winning_choice() else {
            continue;
        };
        let votes = by_proposal.get(&proposal.id).map(Vec::as_slice).unwrap_or(&[]);
        if votes.is_empty() {
            continue;
        }

        let mut losing_total: u128 = 0;
        for vote in votes {
            if vote.choice == winner {
                winning_total += vote.power;
                if whale_set.contains(&vote.voter) {
                    winning_whale += vote.power;
                }
            } else if vote.choice != VoteChoice::Abstain {
                losing_total += vote.power;
            }
            if whale_set.contains(&vote.voter) {
                whale_votes += 1;
                if vote.choice == winner {
                    whale_agreements += 1;
                }
            }
        }

        if let Some(prefix) = pivotal_prefix(proposal.id, votes, winner, losing_total) {
            pivotal.push(prefix);
        }
    }

    WhaleMetrics {
        top_k: whale_set.len() as u32,
        agreement_rate: if whale_votes == 0 {
            0.0
        } else {
            whale_agreements as f64 / whale_votes as f64
        },
        winning_power_share: ratio(winning_whale, winning_total),
        pivotal,
    }
}

/// Delegate influence over the snapshot's delegation set. Full delegations
/// resolve against the delegator's balance, so records from addresses
/// outside the holder set carry no measurable power and are skipped.
fn delegation_metrics(
    holders: &[HolderBalance],
    delegations: &[Delegation],
) -> DelegationMetrics {
    let balances: HashMap<Address, u128> =
        holders.iter().map(|h| (h.address, h.balance)).collect();
    let eligible: u128 = holders.iter().map(|h| h.balance).sum();

    let mut delegated_in: HashMap<Address, (u128, u32)> = HashMap::new();
    let mut delegators: HashSet<Address> = HashSet::new();
    let mut delegated_total: u128 = 0;
    for delegation in delegations {
        let Some(&own) = balances.get(&delegation.delegator) else {
            continue;
        };
        let moved = match delegation.amount {
            DelegationAmount::Full => own,
            // A partial delegation can never move more than the delegator
            // holds at the reference time.
            DelegationAmount::Partial(amount) => amount.min(own),
        };
        if moved == 0 {
            continue;
        }
        delegators.insert(delegation.delegator);
        let entry = delegated_in.entry(delegation.delegatee).or_default();
        entry.0 += moved;
        entry.1 += 1;
        delegated_total += moved;
    }

    let mut amounts: Vec<u128> = delegated_in.values().map(|&(power, _)| power).collect();
    amounts.sort_unstable();
    let concentration = crate::analysis::concentration::gini(&amounts, delegated_total);

    let mut key_delegates: Vec<DelegateInfluence> = delegated_in
        .iter()
        .filter_map(|(address, &(power, count))| {
            let supply_share = ratio(power, eligible);
            if supply_share < MIN_DELEGATE_SHARE {
                return None;
            }
            let own_balance = balances.get(address).copied().unwrap_or(0);
            let voting_power = own_balance + power;
            Some(DelegateInfluence {
                address: *address,
                own_balance,
                delegated_in: power,
                voting_power,
                supply_share,
                delegator_count: count,
                power_multiplier: (own_balance > 0)
                    .then(|| voting_power as f64 / own_balance as f64),
            })
        })
        .collect();
    key_delegates.sort_by(|a, b| {
        b.voting_power
            .cmp(&a.voting_power)
            .then_with(|| a.address.cmp(&b.address))
    });

    DelegationMetrics {
        delegation_rate: ratio(delegated_total, eligible),
        delegator_count: delegators.len() as u32,
        delegatee_count: delegated_in.len() as u32,
        delegator_share: if holders.is_empty() {
            0.0
        } else {
            delegators.len() as f64 / holders.len() as f64
        },
        concentration,
        key_delegates,
    }
}

/// Walk voters by descending power and find the shortest prefix whose
/// winning-side power alone beats everything cast against it.
fn pivotal_prefix(
    proposal_id: u64,
    votes: &[&Vote],
    winner: VoteChoice,
    losing_total: u128,
) -> Option<PivotalPrefix> {
    let mut ordered: Vec<&&Vote> = votes.iter().collect();
    ordered.sort_by(|a, b| b.power.cmp(&a.power).then(a.voter.cmp(&b.voter)));

    let mut accumulated: u128 = 0;
    for (i, vote) in ordered.iter().enumerate() {
        if vote.choice == winner {
            accumulated += vote.power;
            if accumulated > losing_total {
                return Some(PivotalPrefix {
                    proposal_id,
                    addresses_needed: (i + 1) as u32,
                    power_needed: accumulated,
                });
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ProposalStatus, Tally};
    use chrono::{TimeZone, Utc};

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn test_protocol() -> Protocol {
        Protocol {
            id: "testnet".to_string(),
            name: "Testnet".to_string(),
            decimals: 0,
            total_supply: 1_000_000,
            token_address: addr(0xaa),
            governor_address: addr(0xbb),
        }
    }

    fn holder(byte: u8, balance: u128, rank: u32) -> HolderBalance {
        HolderBalance { address: addr(byte), balance, rank }
    }

    fn proposal(id: u64, status: ProposalStatus) -> Proposal {
        let t0 = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        Proposal {
            protocol_id: "testnet".to_string(),
            id,
            proposer: addr(0x01),
            created_at: t0,
            voting_start: t0,
            voting_end: t0 + chrono::Duration::days(3),
            status,
            quorum: 100,
            tally: Tally::default(),
            metadata: Default::default(),
        }
    }

    fn vote(proposal_id: u64, byte: u8, choice: VoteChoice, power: u128) -> Vote {
        Vote {
            proposal_id,
            voter: addr(byte),
            choice,
            power,
            cast_at: Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn test_turnout_is_power_weighted() {
        let protocol = test_protocol();
        let holders = vec![holder(0x01, 600, 1), holder(0x02, 300, 2), holder(0x03, 100, 3)];
        let proposals = vec![proposal(1, ProposalStatus::Succeeded)];
        let votes = vec![
            vote(1, 0x01, VoteChoice::For, 600),
            vote(1, 0x03, VoteChoice::Against, 100),
        ];

        let metrics = ParticipationMetrics::compute(&protocol, &holders, &proposals, &votes, &[]);
        // 700 of 1000 eligible power cast, even though 2 of 3 voters showed up.
        assert!((metrics.overall_turnout - 0.7).abs() < 1e-12);
        assert_eq!(metrics.voter_count, 2);
        assert_eq!(metrics.per_proposal[0].vote_count, 2);
        assert_eq!(metrics.per_proposal[0].distribution.for_power, 600);
        assert_eq!(metrics.per_proposal[0].distribution.against_count, 1);
    }

    #[test]
    fn test_proposal_with_zero_votes() {
        let protocol = test_protocol();
        let holders = vec![holder(0x01, 500, 1)];
        let proposals = vec![proposal(1, ProposalStatus::Defeated)];

        let metrics = ParticipationMetrics::compute(&protocol, &holders, &proposals, &[], &[]);
        assert_eq!(metrics.overall_turnout, 0.0);
        assert_eq!(metrics.per_proposal[0].turnout, 0.0);
        assert_eq!(metrics.voter_count, 0);
        assert!(metrics.whales.pivotal.is_empty());
    }

    #[test]
    fn test_overall_turnout_averages_across_proposals() {
        let protocol = test_protocol();
        let holders = vec![holder(0x01, 1000, 1)];
        let proposals = vec![
            proposal(1, ProposalStatus::Succeeded),
            proposal(2, ProposalStatus::Succeeded),
        ];
        // Full turnout on one proposal, none on the other.
        let votes = vec![vote(1, 0x01, VoteChoice::For, 1000)];

        let metrics = ParticipationMetrics::compute(&protocol, &holders, &proposals, &votes, &[]);
        assert!((metrics.overall_turnout - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_segmentation_buckets() {
        let protocol = test_protocol();
        let holders = vec![
            holder(0x01, 50_000, 1), // >10k bucket
            holder(0x02, 500, 2),    // 100-1k bucket
            holder(0x03, 5, 3),      // 1-10 bucket
        ];
        let proposals = vec![proposal(1, ProposalStatus::Succeeded)];
        let votes = vec![vote(1, 0x01, VoteChoice::For, 50_000)];

        let metrics = ParticipationMetrics::compute(&protocol, &holders, &proposals, &votes, &[]);
        let whale_bucket = metrics.segmentation.iter().find(|b| b.label == ">10k").unwrap();
        assert_eq!(whale_bucket.holder_count, 1);
        assert_eq!(whale_bucket.voter_count, 1);
        assert!((whale_bucket.cast_power_share - 1.0).abs() < 1e-12);

        let mid_bucket = metrics.segmentation.iter().find(|b| b.label == "100-1k").unwrap();
        assert_eq!(mid_bucket.holder_count, 1);
        assert_eq!(mid_bucket.voter_count, 0);
        assert_eq!(mid_bucket.participation_rate, 0.0);
    }

    #[test]
    fn test_single_whale_is_pivotal() {
        let protocol = test_protocol();
        let holders = vec![holder(0x01, 900, 1), holder(0x02, 50, 2), holder(0x03, 50, 3)];
        let proposals = vec![proposal(1, ProposalStatus::Succeeded)];
        let votes = vec![
            vote(1, 0x01, VoteChoice::For, 900),
            vote(1, 0x02, VoteChoice::Against, 50),
            vote(1, 0x03, VoteChoice::Against, 50),
        ];

        let metrics = ParticipationMetrics::compute(&protocol, &holders, &proposals, &votes, &[]);
        assert_eq!(metrics.whales.pivotal.len(), 1);
        let prefix = metrics.whales.pivotal[0];
        assert_eq!(prefix.addresses_needed, 1);
        assert_eq!(prefix.power_needed, 900);
        assert!((metrics.whales.agreement_rate - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_whale_winning_power_share() {
        let protocol = test_protocol();
        let holders = vec![holder(0x01, 400, 1), holder(0x02, 350, 2), holder(0x03, 250, 3)];
        let proposals = vec![proposal(1, ProposalStatus::Succeeded)];
        // Whales are the full top-10, so every winning vote is a whale vote here.
        let votes = vec![
            vote(1, 0x01, VoteChoice::For, 400),
            vote(1, 0x02, VoteChoice::For, 350),
            vote(1, 0x03, VoteChoice::Against, 250),
        ];

        let metrics = ParticipationMetrics::compute(&protocol, &holders, &proposals, &votes, &[]);
        assert!((metrics.whales.winning_power_share - 1.0).abs() < 1e-12);
        // No delegations: the network metrics stay at their zero values.
        assert_eq!(metrics.delegation, DelegationMetrics::default());
    }

    fn delegation(
        delegator: u8,
        delegatee: u8,
        amount: DelegationAmount,
    ) -> Delegation {
        Delegation {
            delegator: addr(delegator),
            delegatee: addr(delegatee),
            effective_from: Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
            amount,
        }
    }

    #[test]
    fn test_delegation_rate_and_key_delegates() {
        let protocol = test_protocol();
        let holders = vec![holder(0x01, 600, 1), holder(0x02, 300, 2), holder(0x03, 100, 3)];
        let delegations = vec![delegation(0x03, 0x01, DelegationAmount::Full)];

        let metrics = ParticipationMetrics::compute(&protocol, &holders, &[], &[], &delegations);
        let network = &metrics.delegation;

        // 100 of 1000 eligible power moved to the top holder.
        assert!((network.delegation_rate - 0.1).abs() < 1e-12);
        assert_eq!(network.delegator_count, 1);
        assert_eq!(network.delegatee_count, 1);
        assert!((network.delegator_share - 1.0 / 3.0).abs() < 1e-12);

        assert_eq!(network.key_delegates.len(), 1);
        let delegate = &network.key_delegates[0];
        assert_eq!(delegate.address, addr(0x01));
        assert_eq!(delegate.own_balance, 600);
        assert_eq!(delegate.delegated_in, 100);
        assert_eq!(delegate.voting_power, 700);
        assert!((delegate.supply_share - 0.1).abs() < 1e-12);
        assert_eq!(delegate.delegator_count, 1);
        assert!((delegate.power_multiplier.unwrap() - 700.0 / 600.0).abs() < 1e-12);
    }

    #[test]
    fn test_small_delegation_below_key_threshold() {
        let protocol = test_protocol();
        let holders = vec![holder(0x01, 100_000, 1), holder(0x02, 50, 2)];
        let delegations = vec![delegation(0x02, 0x01, DelegationAmount::Full)];

        let metrics = ParticipationMetrics::compute(&protocol, &holders, &[], &[], &delegations);
        let network = &metrics.delegation;

        // Counted in the rate, but 0.05% of supply is below the key bar.
        assert!(network.delegation_rate > 0.0);
        assert_eq!(network.delegatee_count, 1);
        assert!(network.key_delegates.is_empty());
    }

    #[test]
    fn test_partial_delegation_capped_at_balance() {
        let protocol = test_protocol();
        let holders = vec![holder(0x01, 900, 1), holder(0x02, 100, 2)];
        // Claims 250, only holds 100.
        let delegations = vec![delegation(0x02, 0x01, DelegationAmount::Partial(250))];

        let metrics = ParticipationMetrics::compute(&protocol, &holders, &[], &[], &delegations);
        assert!((metrics.delegation.delegation_rate - 0.1).abs() < 1e-12);
        assert_eq!(metrics.delegation.key_delegates[0].delegated_in, 100);
    }

    #[test]
    fn test_unknown_delegator_carries_no_power() {
        let protocol = test_protocol();
        let holders = vec![holder(0x01, 1000, 1)];
        // 0x09 is not a holder, so its full delegation resolves to nothing.
        let delegations = vec![delegation(0x09, 0x01, DelegationAmount::Full)];

        let metrics = ParticipationMetrics::compute(&protocol, &holders, &[], &[], &delegations);
        assert_eq!(metrics.delegation, DelegationMetrics::default());
    }

    #[test]
    fn test_delegation_concentration() {
        let protocol = test_protocol();
        let holders = vec![
            holder(0x01, 400, 1),
            holder(0x02, 300, 2),
            holder(0x03, 200, 3),
            holder(0x04, 100, 4),
        ];

        // Two delegatees drawing equal power: perfectly even network.
        let even = vec![
            delegation(0x03, 0x01, DelegationAmount::Partial(100)),
            delegation(0x04, 0x02, DelegationAmount::Partial(100)),
        ];
        let metrics = ParticipationMetrics::compute(&protocol, &holders, &[], &[], &even);
        assert!((metrics.delegation.concentration - 0.0).abs() < 1e-12);
        // Sorted by descending voting power: 0x01 (500) before 0x02 (400).
        let delegates = &metrics.delegation.key_delegates;
        assert_eq!(delegates[0].address, addr(0x01));
        assert_eq!(delegates[1].address, addr(0x02));

        // All delegated power into one address: maximally skewed.
        let skewed = vec![
            delegation(0x03, 0x01, DelegationAmount::Partial(150)),
            delegation(0x04, 0x01, DelegationAmount::Partial(50)),
        ];
        let metrics = ParticipationMetrics::compute(&protocol, &holders, &[], &[], &skewed);
        assert_eq!(metrics.delegation.delegatee_count, 1);
        assert_eq!(metrics.delegation.key_delegates[0].delegator_count, 2);
        assert_eq!(metrics.delegation.key_delegates[0].delegated_in, 200);
    }

    #[test]
    fn test_delegate_without_own_balance_has_no_multiplier() {
        let protocol = test_protocol();
        let holders = vec![holder(0x01, 1000, 1)];
        // Delegating to a contract address that holds nothing itself.
        let delegations = vec![delegation(0x01, 0x0a, DelegationAmount::Partial(500))];

        let metrics = ParticipationMetrics::compute(&protocol, &holders, &[], &[], &delegations);
        let delegate = &metrics.delegation.key_delegates[0];
        assert_eq!(delegate.own_balance, 0);
        assert_eq!(delegate.voting_power, 500);
        assert_eq!(delegate.power_multiplier, None);
    }
}
