use crate::config::SourceId;
use crate::error::{AnalyticsError, Result};
use crate::fetch::adapter::{
    remaining, HolderPage, ProviderAdapter, RawDelegation, RawHolder, RawProposal, RawVote,
};
use crate::types::{Protocol, Provenance};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::time::Instant;

const BASE_URL: &str = "https://api.ethplorer.io";
const FREE_KEY: &str = "freekey";
/// Ethplorer caps top-holder listings at 1000 entries.
const MAX_LIMIT: usize = 1000;

/// Ethplorer holder adapter. Works without a paid credential on the shared
/// free key, in which case results are tagged as the free data tier.
pub struct EthplorerAdapter {
    client: reqwest::Client,
    api_key: String,
    free_tier: bool,
}

#[derive(Debug, Deserialize)]
struct TopHoldersResponse {
    holders: Option<Vec<HolderRow>>,
    error: Option<EthplorerError>,
}

#[derive(Debug, Deserialize)]
struct HolderRow {
    address: String,
    /// Raw base-unit balance; ethplorer serves it as a JSON number.
    balance: f64,
}

#[derive(Debug, Deserialize)]
struct EthplorerError {
    code: i64,
    message: String,
}

impl EthplorerAdapter {
    pub fn new(client: reqwest::Client, api_key: Option<String>) -> Self {
        let free_tier = api_key.is_none();
        Self {
            client,
            api_key: api_key.unwrap_or_else(|| FREE_KEY.to_string()),
            free_tier,
        }
    }
}

#[async_trait]
impl ProviderAdapter for EthplorerAdapter {
    fn id(&self) -> SourceId {
        SourceId::Ethplorer
    }

    fn tier(&self) -> Provenance {
        if self.free_tier {
            Provenance::FallbackFreeTier
        } else {
            Provenance::Live
        }
    }

    async fn fetch_holders(
        &self,
        protocol: &Protocol,
        limit: usize,
        _cursor: Option<&str>,
        deadline: Instant,
    ) -> Result<HolderPage> {
        let timeout = remaining(deadline)?;
        let url = format!(
            "{BASE_URL}/getTopTokenHolders/{:#x}",
            protocol.token_address
        );
        let limit_s = limit.min(MAX_LIMIT).to_string();
        let response = self
            .client
            .get(&url)
            .query(&[("apiKey", self.api_key.as_str()), ("limit", &limit_s)])
            .timeout(timeout)
            .send()
            .await?;

        if response.status().as_u16() == 429 {
            return Err(AnalyticsError::RateLimited {
                message: "ethplorer throttled".to_string(),
                retry_after: None,
            });
        }

        let body: TopHoldersResponse = response.json().await.map_err(|e| {
            AnalyticsError::PermanentSchema(format!("ethplorer response not json: {e}"))
        })?;
        if let Some(error) = body.error {
            return Err(match error.code {
                // 1: invalid key, 133: key disabled.
                1 | 133 => AnalyticsError::AuthMissing(SourceId::Ethplorer.to_string()),
                _ => AnalyticsError::TransientUnavailable(format!(
                    "ethplorer {}: {}",
                    error.code, error.message
                )),
            });
        }

        let rows = body.holders.unwrap_or_default();
        let holders = rows
            .into_iter()
            .map(|row| RawHolder {
                // Balances arrive as f64 raw units; rendered without a
                // fractional part for the base-unit parser.
                balance: format!("{:.0}", row.balance),
                address: row.address,
            })
            .collect::<Vec<_>>();
        Ok(HolderPage {
            expected_total: Some(holders.len()),
            holders,
            next_cursor: None,
        })
    }

    async fn fetch_proposals(
        &self,
        _protocol: &Protocol,
        _since: DateTime<Utc>,
        _until: DateTime<Utc>,
        _deadline: Instant,
    ) -> Result<Vec<RawProposal>> {
        Err(AnalyticsError::NotSupported(SourceId::Ethplorer.to_string()))
    }

    async fn fetch_votes(
        &self,
        _protocol: &Protocol,
        _proposal_id: u64,
        _deadline: Instant,
    ) -> Result<Vec<RawVote>> {
        Err(AnalyticsError::NotSupported(SourceId::Ethplorer.to_string()))
    }

    async fn fetch_delegations(
        &self,
        _protocol: &Protocol,
        _since: DateTime<Utc>,
        _until: DateTime<Utc>,
        _deadline: Instant,
    ) -> Result<Vec<RawDelegation>> {
        Err(AnalyticsError::NotSupported(SourceId::Ethplorer.to_string()))
    }
}
