use crate::config::SourceId;
use crate::error::{AnalyticsError, Result};
use crate::fetch::adapter::{
    remaining, reduce_transfers, HolderPage, ProviderAdapter, RawDelegation, RawHolder,
    RawProposal, RawTransfer, RawVote,
};
use crate::types::Protocol;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, warn};

const DEFAULT_BASE_URL: &str = "https://api.etherscan.io/api";

/// Etherscan REST adapter. Serves holder data, either from the paid holder
/// index or by replaying transfer events when the index is unavailable on
/// the account's tier. Governance kinds are not offered here.
pub struct EtherscanAdapter {
    client: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct EtherscanEnvelope {
    status: String,
    message: String,
    result: Value,
}

#[derive(Debug, Deserialize)]
struct HolderRow {
    #[serde(rename = "TokenHolderAddress")]
    address: String,
    #[serde(rename = "TokenHolderQuantity")]
    quantity: String,
}

#[derive(Debug, Deserialize)]
struct TransferRow {
    from: String,
    to: String,
    value: String,
}

impl EtherscanAdapter {
    pub fn new(client: reqwest::Client, api_key: Option<String>) -> Self {
        Self {
            client,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    fn key(&self) -> Result<&str> {
        self.api_key
            .as_deref()
            .ok_or_else(|| AnalyticsError::AuthMissing(SourceId::Etherscan.to_string()))
    }

    async fn request(&self, params: &[(&str, &str)], deadline: Instant) -> Result<EtherscanEnvelope> {
        let timeout = remaining(deadline)?;
        let response = self
            .client
            .get(&self.base_url)
            .query(params)
            .timeout(timeout)
            .send()
            .await?;
        let envelope: EtherscanEnvelope = response.json().await.map_err(|e| {
            AnalyticsError::PermanentSchema(format!("etherscan response not json: {e}"))
        })?;

        if envelope.status != "1" {
            let message = envelope.message.to_lowercase();
            let detail = envelope.result.as_str().unwrap_or("").to_lowercase();
            if message.contains("rate limit") || detail.contains("rate limit") {
                return Err(AnalyticsError::RateLimited {
                    message: envelope.message,
                    retry_after: None,
                });
            }
            if detail.contains("invalid api key") || detail.contains("missing") && detail.contains("key") {
                return Err(AnalyticsError::AuthMissing(SourceId::Etherscan.to_string()));
            }
            // Pro-only endpoints and empty result sets both land here; the
            // caller decides whether a fallback path applies.
            return Err(AnalyticsError::NotSupported(format!(
                "etherscan: {}",
                envelope.message
            )));
        }
        Ok(envelope)
    }

    /// Paid-tier holder index.
    async fn holder_index(
        &self,
        protocol: &Protocol,
        limit: usize,
        page: usize,
        deadline: Instant,
    ) -> Result<HolderPage> {
        let token = protocol.token_address.to_string();
        let limit_s = limit.to_string();
        let page_s = page.to_string();
        let key = self.key()?.to_string();
        let envelope = self
            .request(
                &[
                    ("module", "token"),
                    ("action", "tokenholderlist"),
                    ("contractaddress", &token),
                    ("page", &page_s),
                    ("offset", &limit_s),
                    ("apikey", &key),
                ],
                deadline,
            )
            .await?;

        let rows: Vec<HolderRow> = serde_json::from_value(envelope.result).map_err(|e| {
            AnalyticsError::PermanentSchema(format!("etherscan holder list shape: {e}"))
        })?;
        let holders: Vec<RawHolder> = rows
            .into_iter()
            .map(|row| RawHolder {
                address: row.address,
                balance: row.quantity,
            })
            .collect();
        let next_cursor = (holders.len() == limit).then(|| (page + 1).to_string());
        Ok(HolderPage {
            expected_total: Some(holders.len()),
            holders,
            next_cursor,
        })
    }

    /// Free-tier path: replay `tokentx` transfer events into balances.
    async fn holders_from_transfers(
        &self,
        protocol: &Protocol,
        limit: usize,
        deadline: Instant,
    ) -> Result<HolderPage> {
        let token = protocol.token_address.to_string();
        let key = self.key()?.to_string();
        let envelope = self
            .request(
                &[
                    ("module", "account"),
                    ("action", "tokentx"),
                    ("contractaddress", &token),
                    ("startblock", "0"),
                    ("endblock", "latest"),
                    ("sort", "asc"),
                    ("apikey", &key),
                ],
                deadline,
            )
            .await?;

        let rows: Vec<TransferRow> = serde_json::from_value(envelope.result).map_err(|e| {
            AnalyticsError::PermanentSchema(format!("etherscan tokentx shape: {e}"))
        })?;
        let mut transfers = Vec::with_capacity(rows.len());
        for row in rows {
            match row.value.parse::<u128>() {
                Ok(value) => transfers.push(RawTransfer {
                    from: row.from,
                    to: row.to,
                    value,
                }),
                Err(_) => {
                    warn!(value = %row.value, "dropping transfer with unparseable value");
                }
            }
        }

        let mut holders = reduce_transfers(&transfers);
        let expected_total = Some(holders.len());
        holders.truncate(limit);
        debug!(
            protocol = %protocol.id,
            transfers = transfers.len(),
            holders = holders.len(),
            "reconstructed holder set from transfer replay"
        );
        Ok(HolderPage {
            holders,
            next_cursor: None,
            expected_total,
        })
    }
}

#[async_trait]
impl ProviderAdapter for EtherscanAdapter {
    fn id(&self) -> SourceId {
        SourceId::Etherscan
    }

    async fn fetch_holders(
        &self,
        protocol: &Protocol,
        limit: usize,
        cursor: Option<&str>,
        deadline: Instant,
    ) -> Result<HolderPage> {
        let page = cursor.map(|c| c.parse().unwrap_or(1)).unwrap_or(1);
        match self.holder_index(protocol, limit, page, deadline).await {
            Ok(page) => Ok(page),
            // The holder index is a pro endpoint; the replay path covers
            // free keys.
            Err(AnalyticsError::NotSupported(_)) if cursor.is_none() => {
                self.holders_from_transfers(protocol, limit, deadline).await
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch_proposals(
        &self,
        _protocol: &Protocol,
        _since: DateTime<Utc>,
        _until: DateTime<Utc>,
        _deadline: Instant,
    ) -> Result<Vec<RawProposal>> {
        Err(AnalyticsError::NotSupported(SourceId::Etherscan.to_string()))
    }

    async fn fetch_votes(
        &self,
        _protocol: &Protocol,
        _proposal_id: u64,
        _deadline: Instant,
    ) -> Result<Vec<RawVote>> {
        Err(AnalyticsError::NotSupported(SourceId::Etherscan.to_string()))
    }

    async fn fetch_delegations(
        &self,
        _protocol: &Protocol,
        _since: DateTime<Utc>,
        _until: DateTime<Utc>,
        _deadline: Instant,
    ) -> Result<Vec<RawDelegation>> {
        Err(AnalyticsError::NotSupported(SourceId::Etherscan.to_string()))
    }
}
