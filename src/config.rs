use crate::error::{AnalyticsError, Result};
use crate::types::Protocol;
use alloy_primitives::address;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use strum_macros::{Display, EnumString};

/// External data sources the engine can talk to. `Simulator` is the implicit
/// terminal member of every fallback chain and never appears in config.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SourceId {
    Etherscan,
    Graph,
    Ethplorer,
    Simulator,
}

/// API credentials, each optional. An absent key makes the corresponding
/// adapter fail with `AuthMissing`, which skips it in the fallback chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiKeys {
    pub etherscan: Option<String>,
    pub graph: Option<String>,
    pub alchemy: Option<String>,
    pub infura: Option<String>,
    pub ethplorer: Option<String>,
}

/// Priority-ordered source chains, one per data kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackChains {
    pub holders: Vec<SourceId>,
    pub proposals: Vec<SourceId>,
    pub votes: Vec<SourceId>,
    pub delegations: Vec<SourceId>,
}

impl Default for FallbackChains {
    fn default() -> Self {
        Self {
            holders: vec![SourceId::Etherscan, SourceId::Ethplorer],
            proposals: vec![SourceId::Graph],
            votes: vec![SourceId::Graph],
            delegations: vec![SourceId::Graph],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    pub base_ms: u64,
    pub ceiling_ms: u64,
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_ms: 250,
            ceiling_ms: 10_000,
            max_attempts: 3,
        }
    }
}

impl RetryConfig {
    pub fn base(&self) -> Duration {
        Duration::from_millis(self.base_ms)
    }

    pub fn ceiling(&self) -> Duration {
        Duration::from_millis(self.ceiling_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Concurrent in-flight calls allowed per source.
    pub per_source: usize,
    /// Concurrent in-flight calls across all sources.
    pub global: usize,
    /// Callers allowed to wait for a per-source slot before being shed with
    /// `RateLimited`.
    pub queue_bound: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            per_source: 4,
            global: 16,
            queue_bound: 32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Sustained requests per second per source.
    pub per_source_rps: f64,
    /// Burst capacity of the token bucket.
    pub burst: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_source_rps: 5.0,
            burst: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub holders_ttl_s: u64,
    pub proposals_ttl_s: u64,
    pub votes_ttl_s: u64,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            holders_ttl_s: 300,
            proposals_ttl_s: 600,
            votes_ttl_s: 600,
            max_entries: 1024,
        }
    }
}

impl CacheConfig {
    pub fn holders_ttl(&self) -> Duration {
        Duration::from_secs(self.holders_ttl_s)
    }

    pub fn proposals_ttl(&self) -> Duration {
        Duration::from_secs(self.proposals_ttl_s)
    }

    pub fn votes_ttl(&self) -> Duration {
        Duration::from_secs(self.votes_ttl_s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Mem,
    Disk,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotStoreConfig {
    pub backend: StoreBackend,
    pub path: String,
}

impl Default for SnapshotStoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Mem,
            path: "data/snapshots".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VotingBlockConfig {
    /// Minimum co-voted proposals for a voter pair to get an edge.
    pub min_overlap: usize,
    /// Minimum agreement ratio to keep an edge.
    pub similarity_threshold: f64,
    /// Components larger than this get a second, subdividing pass.
    pub large_component_split: usize,
}

impl Default for VotingBlockConfig {
    fn default() -> Self {
        Self {
            min_overlap: 3,
            similarity_threshold: 0.8,
            large_component_split: 12,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SimulatorConfig {
    pub seed: u64,
    /// Power-law exponent for the power-law profile.
    pub alpha: f64,
    /// Majority share held by dominant wallets in the protocol-dominated
    /// profile.
    pub dominant_share: f64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            alpha: 1.16,
            dominant_share: 0.6,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizerConfig {
    /// Minimum share of expected records that must survive validation for a
    /// fetched kind to be accepted.
    pub min_survivor_share: f64,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            min_survivor_share: 0.8,
        }
    }
}

/// Top-level configuration for the analytics engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    pub api_keys: ApiKeys,
    pub fallback_chain: FallbackChains,
    pub retry: RetryConfig,
    pub concurrency: ConcurrencyConfig,
    pub rate_limit: RateLimitConfig,
    pub cache: CacheConfig,
    pub snapshot_store: SnapshotStoreConfig,
    pub voting_blocks: VotingBlockConfig,
    pub simulator: SimulatorConfig,
    pub normalizer: NormalizerConfig,
    pub timeouts: TimeoutConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Per external call.
    pub http_s: u64,
    /// Whole snapshot build; exceeding it cancels in-flight calls.
    pub build_s: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self { http_s: 10, build_s: 60 }
    }
}

impl TimeoutConfig {
    pub fn http(&self) -> Duration {
        Duration::from_secs(self.http_s)
    }

    pub fn build(&self) -> Duration {
        Duration::from_secs(self.build_s)
    }
}

impl AnalyzerConfig {
    /// Load configuration from environment variables on top of defaults.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        let mut config = Self::default();

        config.api_keys.etherscan = env::var("ETHERSCAN_API_KEY").ok().filter(|k| !k.is_empty());
        config.api_keys.graph = env::var("GRAPH_API_KEY").ok().filter(|k| !k.is_empty());
        config.api_keys.alchemy = env::var("ALCHEMY_API_KEY").ok().filter(|k| !k.is_empty());
        config.api_keys.infura = env::var("INFURA_API_KEY").ok().filter(|k| !k.is_empty());
        config.api_keys.ethplorer = env::var("ETHPLORER_API_KEY").ok().filter(|k| !k.is_empty());

        if let Ok(path) = env::var("GOVSCOPE_SNAPSHOT_DIR") {
            config.snapshot_store.backend = StoreBackend::Disk;
            config.snapshot_store.path = path;
        }

        if let Ok(attempts) = env::var("GOVSCOPE_MAX_ATTEMPTS") {
            config.retry.max_attempts = attempts
                .parse()
                .map_err(|e| AnalyticsError::Validation(format!("invalid GOVSCOPE_MAX_ATTEMPTS: {e}")))?;
        }

        if let Ok(seed) = env::var("GOVSCOPE_SIM_SEED") {
            config.simulator.seed = seed
                .parse()
                .map_err(|e| AnalyticsError::Validation(format!("invalid GOVSCOPE_SIM_SEED: {e}")))?;
        }

        Ok(config)
    }

    /// Load configuration from a TOML file, expanding `${VAR}` references
    /// from the environment.
    pub async fn from_file(path: &str) -> Result<Self> {
        dotenvy::dotenv().ok();
        let contents = tokio::fs::read_to_string(path).await?;
        let contents = expand_vars(&contents);
        toml::from_str(&contents)
            .map_err(|e| AnalyticsError::Validation(format!("invalid config {path}: {e}")))
    }
}

fn expand_vars(raw: &str) -> String {
    let re = Regex::new(r"\$\{([a-zA-Z_][0-9a-zA-Z_]*)\}").expect("static regex");
    re.replace_all(raw, |caps: &Captures| match env::var(&caps[1]) {
        Ok(val) => val,
        Err(_) => caps[0].to_string(),
    })
    .to_string()
}

/// Built-in registry of the launch protocols. Additional protocols can be
/// merged in from config.
#[derive(Debug, Clone)]
pub struct ProtocolRegistry {
    protocols: HashMap<String, Protocol>,
}

impl Default for ProtocolRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ProtocolRegistry {
    pub fn builtin() -> Self {
        let mut protocols = HashMap::new();
        for protocol in [
            Protocol {
                id: "compound".to_string(),
                name: "Compound".to_string(),
                decimals: 18,
                total_supply: 10_000_000u128 * 10u128.pow(18),
                token_address: address!("0xc00e94Cb662C3520282E6f5717214004A7f26888"),
                governor_address: address!("0xc0Da02939E1441F497fd74F78cE7Decb17B66529"),
            },
            Protocol {
                id: "uniswap".to_string(),
                name: "Uniswap".to_string(),
                decimals: 18,
                total_supply: 1_000_000_000u128 * 10u128.pow(18),
                token_address: address!("0x1f9840a85d5aF5bf1D1762F925BDADdC4201F984"),
                governor_address: address!("0x408ED6354d4973f66138C91495F2f2FCbd8724C3"),
            },
            Protocol {
                id: "aave".to_string(),
                name: "Aave".to_string(),
                decimals: 18,
                total_supply: 16_000_000u128 * 10u128.pow(18),
                token_address: address!("0x7Fc66500c84A76Ad7e9c93437bFc5Ac33E2DDaE9"),
                governor_address: address!("0xEC568fffba86c094cf06b22134B23074DFE2252c"),
            },
        ] {
            protocols.insert(protocol.id.clone(), protocol);
        }
        Self { protocols }
    }

    pub fn get(&self, id: &str) -> Result<&Protocol> {
        self.protocols.get(&id.to_lowercase()).ok_or_else(|| {
            let mut supported: Vec<&str> = self.protocols.keys().map(String::as_str).collect();
            supported.sort_unstable();
            AnalyticsError::Validation(format!(
                "unsupported protocol '{id}' (supported: {})",
                supported.join(", ")
            ))
        })
    }

    pub fn insert(&mut self, protocol: Protocol) {
        self.protocols.insert(protocol.id.clone(), protocol);
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.protocols.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AnalyzerConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.cache.max_entries, 1024);
        assert_eq!(config.voting_blocks.min_overlap, 3);
        assert!((config.voting_blocks.similarity_threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(config.snapshot_store.backend, StoreBackend::Mem);
        assert_eq!(
            config.fallback_chain.holders,
            vec![SourceId::Etherscan, SourceId::Ethplorer]
        );
    }

    #[test]
    fn test_duration_helpers() {
        let config = AnalyzerConfig::default();
        assert_eq!(config.retry.base(), Duration::from_millis(250));
        assert_eq!(config.cache.holders_ttl(), Duration::from_secs(300));
        assert_eq!(config.timeouts.http(), Duration::from_secs(10));
    }

    #[test]
    fn test_source_id_round_trip() {
        assert_eq!(SourceId::Etherscan.to_string(), "etherscan");
        assert_eq!("graph".parse::<SourceId>().unwrap(), SourceId::Graph);
        assert!("snowtrace".parse::<SourceId>().is_err());
    }

    #[test]
    fn test_registry_lookup() {
        let registry = ProtocolRegistry::builtin();
        let compound = registry.get("compound").unwrap();
        assert_eq!(compound.decimals, 18);
        assert_eq!(compound.total_supply, 10_000_000u128 * 10u128.pow(18));

        // Case-insensitive lookup, typed error for unknown ids.
        assert!(registry.get("Uniswap").is_ok());
        let err = registry.get("makerdao").unwrap_err();
        assert!(matches!(err, AnalyticsError::Validation(_)));
    }

    #[test]
    fn test_toml_parse_with_expansion() {
        env::set_var("GOVSCOPE_TEST_KEY", "k-123");
        let raw = r#"
            [api_keys]
            etherscan = "${GOVSCOPE_TEST_KEY}"

            [retry]
            base_ms = 100
            ceiling_ms = 2000
            max_attempts = 5
        "#;
        let expanded = expand_vars(raw);
        let config: AnalyzerConfig = toml::from_str(&expanded).unwrap();
        assert_eq!(config.api_keys.etherscan.as_deref(), Some("k-123"));
        assert_eq!(config.retry.max_attempts, 5);
        // Unset sections fall back to defaults.
        assert_eq!(config.cache.max_entries, 1024);
    }
}
