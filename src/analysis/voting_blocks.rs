use crate::config::VotingBlockConfig;
use crate::types::{HolderBalance, Proposal, Vote, VoteChoice};
use ahash::{HashMap, HashMapExt, HashSet};
use alloy_primitives::Address;
use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::unionfind::UnionFind;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// A set of voters whose pairwise agreement on co-voted proposals clears the
/// similarity threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VotingBlock {
    /// Member addresses, ascending.
    pub members: Vec<Address>,
    /// Aggregate voting power of members at the snapshot reference.
    pub power: u128,
    /// Mean pairwise agreement ratio within the block, in [0, 1].
    pub cohesion: f64,
    /// Block power as a share of all graph voters' power.
    pub influence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AnomalyKind {
    CoordinatedVoting,
    WhaleVsOutcome,
    PowerOutcomeDivergence,
    ParticipationSpike,
}

/// A single detected irregularity. Interpretation is left to callers; the
/// severity score exists only for sorting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub proposal_id: Option<u64>,
    /// Index into `VotingBlockReport::blocks` for block-scoped anomalies.
    pub block_index: Option<usize>,
    pub addresses: Vec<Address>,
    pub severity: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VotingBlockReport {
    /// Blocks sorted by descending power, ties by smallest member address.
    pub blocks: Vec<VotingBlock>,
    /// Anomalies sorted by descending severity.
    pub anomalies: Vec<Anomaly>,
    /// Voters that met the minimum-overlap bar and entered the graph.
    pub voter_count: u32,
    pub edge_count: u32,
}

/// Pairwise agreement edge retained by the similarity filter.
#[derive(Debug, Clone, Copy)]
struct AgreementEdge {
    a: usize,
    b: usize,
    similarity: f64,
}

/// Trailing proposals considered by the participation-spike detector.
const SPIKE_WINDOW: usize = 10;
/// Minimum prior proposals before a spike can be called.
const SPIKE_MIN_HISTORY: usize = 3;
/// Identical-vote share for a block to count as coordinated.
const COORDINATION_SHARE: f64 = 0.9;
/// Losing-side share for a whale to count as voting against outcomes.
const WHALE_LOSS_SHARE: f64 = 0.8;
/// Minimum decided votes before whale-vs-outcome is considered.
const WHALE_MIN_VOTES: usize = 3;

pub struct VotingBlockAnalyzer {
    config: VotingBlockConfig,
}

impl VotingBlockAnalyzer {
    pub fn new(config: VotingBlockConfig) -> Self {
        Self { config }
    }

    /// Build the co-voting graph and derive blocks and anomalies for one
    /// snapshot. Pure CPU work; never suspends.
    pub fn analyze(
        &self,
        holders: &[HolderBalance],
        proposals: &[Proposal],
        votes: &[Vote],
    ) -> VotingBlockReport {
        let mut choices: HashMap<Address, HashMap<u64, VoteChoice>> = HashMap::new();
        let mut power_by_voter: HashMap<Address, u128> = HashMap::new();
        for vote in votes {
            choices.entry(vote.voter).or_default().insert(vote.proposal_id, vote.choice);
            let power = power_by_voter.entry(vote.voter).or_default();
            *power = (*power).max(vote.power);
        }
        for holder in holders {
            // Holder balances take precedence over observed vote power.
            power_by_voter.insert(holder.address, holder.balance);
        }

        // Stable node ordering keeps component output independent of map
        // iteration order.
        let mut voters: Vec<Address> = choices
            .iter()
            .filter(|(_, votes)| votes.len() >= self.config.min_overlap)
            .map(|(addr, _)| *addr)
            .collect();
        voters.sort_unstable();

        let edges = self.agreement_edges(&voters, &choices);

        let mut graph: UnGraph<Address, f64, usize> = UnGraph::default();
        let node_indices: Vec<NodeIndex<usize>> =
            voters.iter().map(|addr| graph.add_node(*addr)).collect();
        for edge in &edges {
            graph.add_edge(node_indices[edge.a], node_indices[edge.b], edge.similarity);
        }

        let similarity: HashMap<(usize, usize), f64> = edges
            .iter()
            .map(|e| ((e.a.min(e.b), e.a.max(e.b)), e.similarity))
            .collect();

        let components = self.components(&graph);
        let mut blocks: Vec<VotingBlock> = components
            .into_iter()
            .filter(|members| members.len() >= 2)
            .map(|members| self.build_block(&voters, members, &similarity, &power_by_voter))
            .collect();
        blocks.sort_by(|a, b| {
            b.power
                .cmp(&a.power)
                .then_with(|| a.members.first().cmp(&b.members.first()))
        });

        let anomalies = self.detect_anomalies(&blocks, holders, proposals, votes, &choices);

        VotingBlockReport {
            voter_count: voters.len() as u32,
            edge_count: edges.len() as u32,
            blocks,
            anomalies,
        }
    }

    /// All voter pairs with enough co-voted proposals and agreement at or
    /// above the threshold. Pair scan is the hot loop; it fans out on the
    /// CPU pool.
    fn agreement_edges(
        &self,
        voters: &[Address],
        choices: &HashMap<Address, HashMap<u64, VoteChoice>>,
    ) -> Vec<AgreementEdge> {
        let min_overlap = self.config.min_overlap;
        let threshold = self.config.similarity_threshold;

        (0..voters.len())
            .into_par_iter()
            .flat_map_iter(|a| {
                let votes_a = &choices[&voters[a]];
                (a + 1..voters.len()).filter_map(move |b| {
                    let votes_b = &choices[&voters[b]];
                    // Iterate the smaller ballot of the pair.
                    let (small, large) = if votes_a.len() <= votes_b.len() {
                        (votes_a, votes_b)
                    } else {
                        (votes_b, votes_a)
                    };
                    let mut overlap = 0u32;
                    let mut agreements = 0u32;
                    for (proposal_id, choice) in small {
                        if let Some(other) = large.get(proposal_id) {
                            overlap += 1;
                            if choice == other {
                                agreements += 1;
                            }
                        }
                    }
                    if (overlap as usize) < min_overlap {
                        return None;
                    }
                    let similarity = agreements as f64 / overlap as f64;
                    (similarity >= threshold).then_some(AgreementEdge { a, b, similarity })
                })
            })
            .collect()
    }

    /// Connected components of the filtered graph, with a second pass that
    /// subdivides oversized components by pruning their weakest edges.
    fn components(&self, graph: &UnGraph<Address, f64, usize>) -> Vec<Vec<usize>> {
        let edges: Vec<AgreementEdge> = graph
            .edge_indices()
            .filter_map(|e| {
                let (a, b) = graph.edge_endpoints(e)?;
                Some(AgreementEdge {
                    a: a.index(),
                    b: b.index(),
                    similarity: *graph.edge_weight(e)?,
                })
            })
            .collect();

        let mut result = Vec::new();
        for component in connected_components(graph.node_count(), &edges) {
            if component.len() <= self.config.large_component_split {
                result.push(component);
                continue;
            }
            result.extend(split_weak_edges(&component, &edges));
        }
        result
    }

    fn build_block(
        &self,
        voters: &[Address],
        mut members: Vec<usize>,
        similarity: &HashMap<(usize, usize), f64>,
        power_by_voter: &HashMap<Address, u128>,
    ) -> VotingBlock {
        members.sort_unstable();
        let power: u128 = members
            .iter()
            .map(|&i| power_by_voter.get(&voters[i]).copied().unwrap_or(0))
            .sum();
        let total_power: u128 = voters
            .iter()
            .map(|addr| power_by_voter.get(addr).copied().unwrap_or(0))
            .sum();

        let mut pair_count = 0u32;
        let mut pair_sum = 0.0;
        for (i, &a) in members.iter().enumerate() {
            for &b in &members[i + 1..] {
                pair_count += 1;
                pair_sum += similarity.get(&(a.min(b), a.max(b))).copied().unwrap_or(0.0);
            }
        }

        VotingBlock {
            members: members.iter().map(|&i| voters[i]).collect(),
            power,
            cohesion: if pair_count == 0 { 0.0 } else { pair_sum / pair_count as f64 },
            influence: if total_power == 0 {
                0.0
            } else {
                power as f64 / total_power as f64
            },
        }
    }

    fn detect_anomalies(
        &self,
        blocks: &[VotingBlock],
        holders: &[HolderBalance],
        proposals: &[Proposal],
        votes: &[Vote],
        choices: &HashMap<Address, HashMap<u64, VoteChoice>>,
    ) -> Vec<Anomaly> {
        let mut anomalies = Vec::new();
        anomalies.extend(self.coordinated_voting(blocks, proposals, choices));
        anomalies.extend(self.whale_vs_outcome(holders, proposals, choices));
        anomalies.extend(self.power_outcome_divergence(proposals, votes));
        anomalies.extend(self.participation_spikes(holders, proposals, votes));
        anomalies.sort_by(|a, b| b.severity.total_cmp(&a.severity));
        anomalies
    }

    /// Blocks of three or more voting identically on at least 90% of the
    /// proposals every member voted on.
    fn coordinated_voting(
        &self,
        blocks: &[VotingBlock],
        proposals: &[Proposal],
        choices: &HashMap<Address, HashMap<u64, VoteChoice>>,
    ) -> Vec<Anomaly> {
        let mut anomalies = Vec::new();
        for (block_index, block) in blocks.iter().enumerate() {
            if block.members.len() < 3 {
                continue;
            }
            let mut shared = 0u32;
            let mut identical = 0u32;
            for proposal in proposals {
                let mut first: Option<VoteChoice> = None;
                let mut all_voted = true;
                let mut all_same = true;
                for member in &block.members {
                    match choices.get(member).and_then(|v| v.get(&proposal.id)) {
                        Some(choice) => match first {
                            None => first = Some(*choice),
                            Some(f) if f != *choice => all_same = false,
                            _ => {}
                        },
                        None => {
                            all_voted = false;
                            break;
                        }
                    }
                }
                if all_voted {
                    shared += 1;
                    if all_same {
                        identical += 1;
                    }
                }
            }
            if shared as usize >= self.config.min_overlap {
                let share = identical as f64 / shared as f64;
                if share >= COORDINATION_SHARE {
                    anomalies.push(Anomaly {
                        kind: AnomalyKind::CoordinatedVoting,
                        proposal_id: None,
                        block_index: Some(block_index),
                        addresses: block.members.clone(),
                        severity: share * block.influence.max(f64::MIN_POSITIVE),
                    });
                }
            }
        }
        anomalies
    }

    /// A top holder consistently ending up on the losing side of decided
    /// proposals.
    fn whale_vs_outcome(
        &self,
        holders: &[HolderBalance],
        proposals: &[Proposal],
        choices: &HashMap<Address, HashMap<u64, VoteChoice>>,
    ) -> Vec<Anomaly> {
        let mut anomalies = Vec::new();
        for holder in holders.iter().filter(|h| h.rank as usize <= crate::analysis::participation::DEFAULT_WHALE_COUNT) {
            let Some(ballots) = choices.get(&holder.address) else {
                continue;
            };
            let mut decided = 0usize;
            let mut losses = 0usize;
            for proposal in proposals {
                let Some(winner) = proposal.status.winning_choice() else {
                    continue;
                };
                if let Some(choice) = ballots.get(&proposal.id) {
                    if *choice == VoteChoice::Abstain {
                        continue;
                    }
                    decided += 1;
                    if *choice != winner {
                        losses += 1;
                    }
                }
            }
            if decided >= WHALE_MIN_VOTES {
                let loss_rate = losses as f64 / decided as f64;
                if loss_rate >= WHALE_LOSS_SHARE {
                    anomalies.push(Anomaly {
                        kind: AnomalyKind::WhaleVsOutcome,
                        proposal_id: None,
                        block_index: None,
                        addresses: vec![holder.address],
                        severity: loss_rate,
                    });
                }
            }
        }
        anomalies
    }

    /// Proposals whose recorded outcome contradicts the majority of cast
    /// power (quorum-driven flips).
    fn power_outcome_divergence(&self, proposals: &[Proposal], votes: &[Vote]) -> Vec<Anomaly> {
        let mut power: HashMap<u64, (u128, u128)> = HashMap::new();
        for vote in votes {
            let entry = power.entry(vote.proposal_id).or_default();
            match vote.choice {
                VoteChoice::For => entry.0 += vote.power,
                VoteChoice::Against => entry.1 += vote.power,
                VoteChoice::Abstain => {}
            }
        }

        let mut anomalies = Vec::new();
        for proposal in proposals {
            let Some(winner) = proposal.status.winning_choice() else {
                continue;
            };
            let (for_power, against_power) =
                power.get(&proposal.id).copied().unwrap_or((0, 0));
            let contradicted = match winner {
                VoteChoice::For => against_power > for_power,
                VoteChoice::Against => for_power > against_power,
                VoteChoice::Abstain => false,
            };
            if contradicted {
                let total = for_power + against_power;
                let margin = for_power.abs_diff(against_power);
                anomalies.push(Anomaly {
                    kind: AnomalyKind::PowerOutcomeDivergence,
                    proposal_id: Some(proposal.id),
                    block_index: None,
                    addresses: Vec::new(),
                    severity: if total == 0 { 0.0 } else { margin as f64 / total as f64 },
                });
            }
        }
        anomalies
    }

    /// Turnout exceeding mean + 3 sigma of a trailing window of proposals.
    fn participation_spikes(
        &self,
        holders: &[HolderBalance],
        proposals: &[Proposal],
        votes: &[Vote],
    ) -> Vec<Anomaly> {
        let eligible: u128 = holders.iter().map(|h| h.balance).sum();
        if eligible == 0 {
            return Vec::new();
        }
        let mut cast: HashMap<u64, u128> = HashMap::new();
        for vote in votes {
            *cast.entry(vote.proposal_id).or_default() += vote.power;
        }

        let mut ordered: Vec<&Proposal> = proposals.iter().collect();
        ordered.sort_by_key(|p| (p.voting_start, p.id));
        let turnouts: Vec<f64> = ordered
            .iter()
            .map(|p| cast.get(&p.id).copied().unwrap_or(0) as f64 / eligible as f64)
            .collect();

        let mut anomalies = Vec::new();
        for (i, proposal) in ordered.iter().enumerate() {
            if i < SPIKE_MIN_HISTORY {
                continue;
            }
            let window_start = i.saturating_sub(SPIKE_WINDOW);
            let window = &turnouts[window_start..i];
            let mean = window.iter().sum::<f64>() / window.len() as f64;
            let variance =
                window.iter().map(|t| (t - mean) * (t - mean)).sum::<f64>() / window.len() as f64;
            let sigma = variance.sqrt();
            if sigma > 0.0 && turnouts[i] > mean + 3.0 * sigma {
                anomalies.push(Anomaly {
                    kind: AnomalyKind::ParticipationSpike,
                    proposal_id: Some(proposal.id),
                    block_index: None,
                    addresses: Vec::new(),
                    severity: (turnouts[i] - mean) / sigma,
                });
            }
        }
        anomalies
    }
}

/// Weak-tie pruning: inside an oversized component, drop edges with
/// below-average similarity and re-extract components. Communities joined by
/// marginal agreement separate; uniform components stay whole.
fn split_weak_edges(component: &[usize], edges: &[AgreementEdge]) -> Vec<Vec<usize>> {
    let member_set: HashSet<usize> = component.iter().copied().collect();
    let local: Vec<&AgreementEdge> = edges
        .iter()
        .filter(|e| member_set.contains(&e.a) && member_set.contains(&e.b))
        .collect();
    if local.is_empty() {
        return vec![component.to_vec()];
    }
    let mean: f64 = local.iter().map(|e| e.similarity).sum::<f64>() / local.len() as f64;
    let strong: Vec<&&AgreementEdge> =
        local.iter().filter(|e| e.similarity >= mean).collect();
    if strong.len() == local.len() {
        // All edges equally strong; nothing to prune.
        return vec![component.to_vec()];
    }

    let index_of: HashMap<usize, usize> = component
        .iter()
        .enumerate()
        .map(|(local_idx, &node)| (node, local_idx))
        .collect();
    let remapped: Vec<AgreementEdge> = strong
        .iter()
        .map(|e| AgreementEdge {
            a: index_of[&e.a],
            b: index_of[&e.b],
            similarity: e.similarity,
        })
        .collect();
    connected_components(component.len(), &remapped)
        .into_iter()
        .map(|local_members| local_members.iter().map(|&i| component[i]).collect())
        .collect()
}

/// Connected components over node indices, each sorted ascending. Singleton
/// components are included; callers filter.
fn connected_components(node_count: usize, edges: &[AgreementEdge]) -> Vec<Vec<usize>> {
    let mut uf: UnionFind<usize> = UnionFind::new(node_count);
    for edge in edges {
        uf.union(edge.a, edge.b);
    }
    let mut groups: HashMap<usize, Vec<usize>> = HashMap::new();
    for node in 0..node_count {
        groups.entry(uf.find(node)).or_default().push(node);
    }
    let mut components: Vec<Vec<usize>> = groups.into_values().collect();
    for component in &mut components {
        component.sort_unstable();
    }
    components.sort_by_key(|c| c.first().copied());
    components
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ProposalStatus, Tally};
    use chrono::{TimeZone, Utc};

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
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
            voting_start: t0 + chrono::Duration::days(id as i64),
            voting_end: t0 + chrono::Duration::days(id as i64 + 3),
            status,
            quorum: 0,
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

    fn analyzer() -> VotingBlockAnalyzer {
        VotingBlockAnalyzer::new(VotingBlockConfig::default())
    }

    /// Six voters over ten proposals: {A, B, C} agree on nine of ten,
    /// {D, E} on eight of ten, F is uncorrelated. Expect exactly those two
    /// blocks, larger aggregate power first.
    #[test]
    fn test_two_blocks_discovered() {
        let (a, b, c, d, e, f) = (0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F);
        let mut votes = Vec::new();
        let mut proposals = Vec::new();
        for id in 1..=10u64 {
            proposals.push(proposal(id, ProposalStatus::Succeeded));
        }

        for id in 1..=10u64 {
            // A, B, C: identical For on 1..=9; B and C break on 10.
            votes.push(vote(id, a, VoteChoice::For, 100));
            let bc_choice = if id == 10 { VoteChoice::Against } else { VoteChoice::For };
            votes.push(vote(id, b, bc_choice, 100));
            votes.push(vote(id, c, bc_choice, 100));

            // D, E: identical Against on 1..=8, split on 9 and 10.
            let d_choice = if id >= 9 { VoteChoice::For } else { VoteChoice::Against };
            let e_choice = if id == 9 {
                VoteChoice::Abstain
            } else {
                VoteChoice::Against
            };
            votes.push(vote(id, d, d_choice, 100));
            votes.push(vote(id, e, e_choice, 100));

            // F: mixed ballot that never clears the threshold with anyone.
            let f_choice = match id {
                1..=3 => VoteChoice::For,
                4..=6 => VoteChoice::Against,
                _ => VoteChoice::Abstain,
            };
            votes.push(vote(id, f, f_choice, 100));
        }

        let holders: Vec<HolderBalance> = [(a, 1), (b, 2), (c, 3), (d, 4), (e, 5), (f, 6)]
            .iter()
            .map(|&(byte, rank)| holder(byte, 100, rank))
            .collect();

        let report = analyzer().analyze(&holders, &proposals, &votes);
        assert_eq!(report.blocks.len(), 2);
        assert_eq!(
            report.blocks[0].members,
            vec![addr(a), addr(b), addr(c)]
        );
        assert_eq!(report.blocks[1].members, vec![addr(d), addr(e)]);
        assert_eq!(report.blocks[0].power, 300);
        assert_eq!(report.blocks[1].power, 200);
        assert!(report.blocks[0].cohesion > 0.9);
    }

    #[test]
    fn test_min_overlap_excludes_sparse_voters() {
        // Two voters agreeing perfectly but only on two proposals: below the
        // default overlap of three, so no edge and no block.
        let proposals: Vec<Proposal> =
            (1..=2).map(|id| proposal(id, ProposalStatus::Succeeded)).collect();
        let votes = vec![
            vote(1, 0x01, VoteChoice::For, 10),
            vote(1, 0x02, VoteChoice::For, 10),
            vote(2, 0x01, VoteChoice::For, 10),
            vote(2, 0x02, VoteChoice::For, 10),
        ];
        let holders = vec![holder(0x01, 10, 1), holder(0x02, 10, 2)];

        let report = analyzer().analyze(&holders, &proposals, &votes);
        assert_eq!(report.voter_count, 0);
        assert!(report.blocks.is_empty());
    }

    #[test]
    fn test_coordinated_voting_anomaly() {
        // Three voters in perfect lockstep across five proposals.
        let proposals: Vec<Proposal> =
            (1..=5).map(|id| proposal(id, ProposalStatus::Succeeded)).collect();
        let mut votes = Vec::new();
        for id in 1..=5u64 {
            for byte in [0x01, 0x02, 0x03] {
                votes.push(vote(id, byte, VoteChoice::For, 50));
            }
        }
        let holders = vec![holder(0x01, 50, 1), holder(0x02, 50, 2), holder(0x03, 50, 3)];

        let report = analyzer().analyze(&holders, &proposals, &votes);
        assert_eq!(report.blocks.len(), 1);
        assert!(report
            .anomalies
            .iter()
            .any(|a| a.kind == AnomalyKind::CoordinatedVoting && a.block_index == Some(0)));
    }

    #[test]
    fn test_whale_vs_outcome_anomaly() {
        // Rank-1 whale loses every decided proposal.
        let proposals: Vec<Proposal> =
            (1..=4).map(|id| proposal(id, ProposalStatus::Succeeded)).collect();
        let mut votes = Vec::new();
        for id in 1..=4u64 {
            votes.push(vote(id, 0x01, VoteChoice::Against, 500));
            votes.push(vote(id, 0x02, VoteChoice::For, 100));
        }
        let holders = vec![holder(0x01, 500, 1), holder(0x02, 100, 2)];

        let report = analyzer().analyze(&holders, &proposals, &votes);
        let whale = report
            .anomalies
            .iter()
            .find(|a| a.kind == AnomalyKind::WhaleVsOutcome)
            .unwrap();
        assert_eq!(whale.addresses, vec![addr(0x01)]);
        assert!((whale.severity - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_power_outcome_divergence() {
        // Succeeded despite the majority of cast power voting against.
        let proposals = vec![proposal(1, ProposalStatus::Succeeded)];
        let votes = vec![
            vote(1, 0x01, VoteChoice::For, 100),
            vote(1, 0x02, VoteChoice::Against, 300),
        ];
        let holders = vec![holder(0x01, 100, 1), holder(0x02, 300, 2)];

        let report = analyzer().analyze(&holders, &proposals, &votes);
        let divergence = report
            .anomalies
            .iter()
            .find(|a| a.kind == AnomalyKind::PowerOutcomeDivergence)
            .unwrap();
        assert_eq!(divergence.proposal_id, Some(1));
        assert!((divergence.severity - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_participation_spike() {
        // Quiet baseline with slight noise, then a landslide.
        let mut proposals = Vec::new();
        let mut votes = Vec::new();
        let holders = vec![holder(0x01, 10_000, 1), holder(0x02, 100, 2), holder(0x03, 90, 3)];
        for id in 1..=6u64 {
            proposals.push(proposal(id, ProposalStatus::Succeeded));
            let power = if id % 2 == 0 { 100 } else { 90 };
            let voter = if id % 2 == 0 { 0x02 } else { 0x03 };
            votes.push(vote(id, voter, VoteChoice::For, power));
        }
        proposals.push(proposal(7, ProposalStatus::Succeeded));
        votes.push(vote(7, 0x01, VoteChoice::For, 10_000));

        let report = analyzer().analyze(&holders, &proposals, &votes);
        let spike = report
            .anomalies
            .iter()
            .find(|a| a.kind == AnomalyKind::ParticipationSpike)
            .unwrap();
        assert_eq!(spike.proposal_id, Some(7));
        assert!(spike.severity > 3.0);
    }

    #[test]
    fn test_oversized_component_splits_on_weak_bridge() {
        // Two four-voter cliques on disjoint proposal sets, bridged by a
        // weaker agreement between one member of each.
        let mut config = VotingBlockConfig::default();
        config.large_component_split = 6;
        let analyzer = VotingBlockAnalyzer::new(config);

        let mut proposals = Vec::new();
        let mut votes = Vec::new();
        for id in 1..=16u64 {
            proposals.push(proposal(id, ProposalStatus::Succeeded));
        }
        // Clique one: voters 0x01..0x04 vote For on proposals 1..=4.
        for id in 1..=4u64 {
            for byte in 0x01..=0x04u8 {
                votes.push(vote(id, byte, VoteChoice::For, 10));
            }
        }
        // Clique two: voters 0x05..0x08 vote Against on proposals 5..=8.
        for id in 5..=8u64 {
            for byte in 0x05..=0x08u8 {
                votes.push(vote(id, byte, VoteChoice::Against, 10));
            }
        }
        // Bridge: 0x04 and 0x05 share proposals 9..=13, agreeing on four of
        // five (similarity 0.8, weaker than the in-clique 1.0).
        for id in 9..=13u64 {
            votes.push(vote(id, 0x04, VoteChoice::For, 10));
            let choice = if id == 13 { VoteChoice::Against } else { VoteChoice::For };
            votes.push(vote(id, 0x05, choice, 10));
        }

        let holders: Vec<HolderBalance> =
            (0x01..=0x08u8).map(|b| holder(b, 10, b as u32)).collect();

        let report = analyzer.analyze(&holders, &proposals, &votes);
        assert_eq!(report.blocks.len(), 2);
        assert_eq!(report.blocks[0].members.len(), 4);
        assert_eq!(report.blocks[1].members.len(), 4);
        // Deterministic tie-break: equal power, smaller lead address first.
        assert_eq!(report.blocks[0].members[0], addr(0x01));
        assert_eq!(report.blocks[1].members[0], addr(0x05));
    }
}
