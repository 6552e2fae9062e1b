use crate::config::SourceId;
use crate::error::{AnalyticsError, Result};
use crate::fetch::adapter::{
    remaining, HolderPage, ProviderAdapter, RawDelegation, RawProposal, RawVote,
};
use crate::types::Protocol;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use tokio::time::Instant;
use tracing::debug;

const GATEWAY_URL: &str = "https://gateway-arbitrum.network.thegraph.com/api";

/// Governance subgraph ids on The Graph's decentralized network, keyed by
/// protocol id.
fn subgraph_id(protocol: &Protocol) -> Result<&'static str> {
    match protocol.id.as_str() {
        "compound" => Ok("3HrWdYr48tFPTjkqxYN6KJprj29EzU9L9pjJZu6qk3Xr"),
        "uniswap" => Ok("EUTy9RtugEz9Uy5BPUgc3Qvgh4VE3dP5B7URNQDB5mf4"),
        "aave" => Ok("8NzKywjhXbUFnEVPn5v8QyZYWj7KAhJGE7jHW8TvK2m"),
        other => Err(AnalyticsError::NotSupported(format!(
            "no governance subgraph for protocol '{other}'"
        ))),
    }
}

const PROPOSALS_QUERY: &str = r#"
    query Proposals($since: BigInt!, $until: BigInt!, $first: Int!, $skip: Int!) {
        proposals(
            first: $first
            skip: $skip
            orderBy: creationTime
            orderDirection: asc
            where: { creationTime_gte: $since, creationTime_lte: $until }
        ) {
            id
            proposer
            creationTime
            startTime
            endTime
            state
            quorumVotes
            forVotes
            againstVotes
            abstainVotes
            title
        }
    }
"#;

const VOTES_QUERY: &str = r#"
    query Votes($proposal: String!, $first: Int!, $skip: Int!) {
        votes(
            first: $first
            skip: $skip
            orderBy: votingPower
            orderDirection: desc
            where: { proposal: $proposal }
        ) {
            voter
            support
            votingPower
            blockTimestamp
        }
    }
"#;

const DELEGATIONS_QUERY: &str = r#"
    query Delegations($since: BigInt!, $until: BigInt!, $first: Int!, $skip: Int!) {
        delegateChangeds(
            first: $first
            skip: $skip
            orderBy: blockTimestamp
            orderDirection: asc
            where: { blockTimestamp_gte: $since, blockTimestamp_lte: $until }
        ) {
            delegator
            toDelegate
            blockTimestamp
        }
    }
"#;

const PAGE_SIZE: usize = 1000;

/// GraphQL adapter over The Graph's governance subgraphs. Serves proposals,
/// votes, and delegations; holder sets are not indexed here.
pub struct GraphAdapter {
    client: reqwest::Client,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GraphEnvelope<T> {
    data: Option<T>,
    errors: Option<Vec<GraphError>>,
}

#[derive(Debug, Deserialize)]
struct GraphError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ProposalsData {
    proposals: Vec<ProposalRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProposalRow {
    id: String,
    proposer: String,
    creation_time: String,
    start_time: String,
    end_time: String,
    state: String,
    quorum_votes: String,
    for_votes: String,
    against_votes: String,
    abstain_votes: String,
    title: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VotesData {
    votes: Vec<VoteRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VoteRow {
    voter: String,
    support: serde_json::Value,
    voting_power: String,
    block_timestamp: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DelegationsData {
    delegate_changeds: Vec<DelegationRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DelegationRow {
    delegator: String,
    to_delegate: String,
    block_timestamp: String,
}

impl GraphAdapter {
    pub fn new(client: reqwest::Client, api_key: Option<String>) -> Self {
        Self { client, api_key }
    }

    fn endpoint(&self, protocol: &Protocol) -> Result<String> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AnalyticsError::AuthMissing(SourceId::Graph.to_string()))?;
        Ok(format!(
            "{GATEWAY_URL}/{key}/subgraphs/id/{}",
            subgraph_id(protocol)?
        ))
    }

    async fn query<T: serde::de::DeserializeOwned>(
        &self,
        protocol: &Protocol,
        query: &str,
        variables: serde_json::Value,
        deadline: Instant,
    ) -> Result<T> {
        let timeout = remaining(deadline)?;
        let response = self
            .client
            .post(self.endpoint(protocol)?)
            .json(&json!({ "query": query, "variables": variables }))
            .timeout(timeout)
            .send()
            .await?;

        if response.status().as_u16() == 429 {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(std::time::Duration::from_secs);
            return Err(AnalyticsError::RateLimited {
                message: "graph gateway throttled".to_string(),
                retry_after,
            });
        }
        if response.status().is_server_error() {
            return Err(AnalyticsError::TransientUnavailable(format!(
                "graph gateway {}",
                response.status()
            )));
        }

        let envelope: GraphEnvelope<T> = response.json().await.map_err(|e| {
            AnalyticsError::PermanentSchema(format!("graph response not json: {e}"))
        })?;
        if let Some(errors) = envelope.errors {
            let message = errors
                .into_iter()
                .map(|e| e.message)
                .collect::<Vec<_>>()
                .join("; ");
            if message.to_lowercase().contains("auth") {
                return Err(AnalyticsError::AuthMissing(SourceId::Graph.to_string()));
            }
            return Err(AnalyticsError::PermanentSchema(format!("graph: {message}")));
        }
        envelope
            .data
            .ok_or_else(|| AnalyticsError::PermanentSchema("graph: empty data".to_string()))
    }
}

fn parse_ts(value: &str) -> i64 {
    value.parse().unwrap_or(0)
}

#[async_trait]
impl ProviderAdapter for GraphAdapter {
    fn id(&self) -> SourceId {
        SourceId::Graph
    }

    async fn fetch_holders(
        &self,
        _protocol: &Protocol,
        _limit: usize,
        _cursor: Option<&str>,
        _deadline: Instant,
    ) -> Result<HolderPage> {
        Err(AnalyticsError::NotSupported(SourceId::Graph.to_string()))
    }

    async fn fetch_proposals(
        &self,
        protocol: &Protocol,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        deadline: Instant,
    ) -> Result<Vec<RawProposal>> {
        let mut proposals = Vec::new();
        let mut skip = 0usize;
        loop {
            let data: ProposalsData = self
                .query(
                    protocol,
                    PROPOSALS_QUERY,
                    json!({
                        "since": since.timestamp().to_string(),
                        "until": until.timestamp().to_string(),
                        "first": PAGE_SIZE,
                        "skip": skip,
                    }),
                    deadline,
                )
                .await?;
            let page_len = data.proposals.len();
            for row in data.proposals {
                proposals.push(RawProposal {
                    id: row.id,
                    proposer: row.proposer,
                    created_at: parse_ts(&row.creation_time),
                    voting_start: parse_ts(&row.start_time),
                    voting_end: parse_ts(&row.end_time),
                    status: row.state,
                    quorum: row.quorum_votes,
                    for_votes: row.for_votes,
                    against_votes: row.against_votes,
                    abstain_votes: row.abstain_votes,
                    title: row.title,
                });
            }
            if page_len < PAGE_SIZE {
                break;
            }
            skip += PAGE_SIZE;
        }
        debug!(protocol = %protocol.id, count = proposals.len(), "fetched proposals");
        Ok(proposals)
    }

    async fn fetch_votes(
        &self,
        protocol: &Protocol,
        proposal_id: u64,
        deadline: Instant,
    ) -> Result<Vec<RawVote>> {
        let mut votes = Vec::new();
        let mut skip = 0usize;
        loop {
            let data: VotesData = self
                .query(
                    protocol,
                    VOTES_QUERY,
                    json!({
                        "proposal": proposal_id.to_string(),
                        "first": PAGE_SIZE,
                        "skip": skip,
                    }),
                    deadline,
                )
                .await?;
            let page_len = data.votes.len();
            for row in data.votes {
                // Subgraphs emit support as either a string label or the
                // numeric Governor code.
                let support = match &row.support {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Number(n) => n.to_string(),
                    serde_json::Value::Bool(b) => {
                        if *b { "1".to_string() } else { "0".to_string() }
                    }
                    other => other.to_string(),
                };
                votes.push(RawVote {
                    proposal_id: proposal_id.to_string(),
                    voter: row.voter,
                    support,
                    power: row.voting_power,
                    cast_at: parse_ts(&row.block_timestamp),
                });
            }
            if page_len < PAGE_SIZE {
                break;
            }
            skip += PAGE_SIZE;
        }
        Ok(votes)
    }

    async fn fetch_delegations(
        &self,
        protocol: &Protocol,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        deadline: Instant,
    ) -> Result<Vec<RawDelegation>> {
        let mut delegations = Vec::new();
        let mut skip = 0usize;
        loop {
            let data: DelegationsData = self
                .query(
                    protocol,
                    DELEGATIONS_QUERY,
                    json!({
                        "since": since.timestamp().to_string(),
                        "until": until.timestamp().to_string(),
                        "first": PAGE_SIZE,
                        "skip": skip,
                    }),
                    deadline,
                )
                .await?;
            let page_len = data.delegate_changeds.len();
            for row in data.delegate_changeds {
                delegations.push(RawDelegation {
                    delegator: row.delegator,
                    delegatee: row.to_delegate,
                    effective_from: parse_ts(&row.block_timestamp),
                    amount: None,
                });
            }
            if page_len < PAGE_SIZE {
                break;
            }
            skip += PAGE_SIZE;
        }
        Ok(delegations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn protocol(id: &str) -> Protocol {
        crate::config::ProtocolRegistry::builtin().get(id).unwrap().clone()
    }

    #[test]
    fn test_subgraph_ids_cover_launch_protocols() {
        for id in ["compound", "uniswap", "aave"] {
            assert!(subgraph_id(&protocol(id)).is_ok());
        }
        let mut unknown = protocol("compound");
        unknown.id = "makerdao".to_string();
        assert!(matches!(
            subgraph_id(&unknown),
            Err(AnalyticsError::NotSupported(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_key_is_auth_missing() {
        let adapter = GraphAdapter::new(reqwest::Client::new(), None);
        let deadline = Instant::now() + Duration::from_secs(5);
        let err = adapter
            .fetch_proposals(&protocol("compound"), Utc::now(), Utc::now(), deadline)
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::AuthMissing(_)));
    }

    #[tokio::test]
    async fn test_holders_not_supported() {
        let adapter = GraphAdapter::new(reqwest::Client::new(), Some("key".to_string()));
        let deadline = Instant::now() + Duration::from_secs(5);
        let err = adapter
            .fetch_holders(&protocol("compound"), 10, None, deadline)
            .await
            .unwrap_err();
        assert!(matches!(err, AnalyticsError::NotSupported(_)));
    }

    #[test]
    fn test_envelope_error_parsing() {
        let raw = r#"{"errors":[{"message":"auth error: invalid token"}]}"#;
        let envelope: GraphEnvelope<ProposalsData> = serde_json::from_str(raw).unwrap();
        assert!(envelope.data.is_none());
        assert_eq!(envelope.errors.unwrap()[0].message, "auth error: invalid token");
    }
}
