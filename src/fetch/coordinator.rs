use crate::config::{AnalyzerConfig, FallbackChains, RetryConfig, SourceId};
use crate::error::{AnalyticsError, Result};
use crate::fetch::adapter::ProviderAdapter;
use crate::fetch::cache::{CacheKey, CachedPayload, CallKind, ResponseCache};
use crate::fetch::etherscan::EtherscanAdapter;
use crate::fetch::ethplorer::EthplorerAdapter;
use crate::fetch::graph::GraphAdapter;
use crate::fetch::rate_limit::SourceLimiter;
use crate::metrics::CoreMetrics;
use crate::normalize::Normalizer;
use crate::simulator::{DistributionProfile, SimulatedBundle, Simulator};
use crate::types::{Delegation, HolderBalance, Proposal, Protocol, Provenance, Vote};
use ahash::HashSet;
use chrono::{DateTime, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, warn};

/// Holder count used when a kind degrades to synthetic data.
const SIMULATED_HOLDER_COUNT: usize = 100;

/// Data for one kind together with the tier it was served from.
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub data: T,
    pub provenance: Provenance,
}

/// Arguments of a single adapter call; also the cache fingerprint input.
#[derive(Debug, Clone, Copy)]
enum CallArgs {
    Holders { limit: usize },
    Window { since: i64, until: i64 },
    Votes { proposal_id: u64 },
}

impl CallArgs {
    fn fingerprint(&self, protocol: &Protocol) -> String {
        match self {
            CallArgs::Holders { limit } => format!("{}:limit={limit}", protocol.id),
            CallArgs::Window { since, until } => {
                format!("{}:since={since}:until={until}", protocol.id)
            }
            CallArgs::Votes { proposal_id } => format!("{}:proposal={proposal_id}", protocol.id),
        }
    }
}

/// Normalized result of one source call.
enum NormalizedPayload {
    Holders(Vec<HolderBalance>),
    Proposals(Vec<Proposal>),
    Votes(Vec<Vote>),
    Delegations(Vec<Delegation>),
}

/// Orchestrates adapter calls: per-source retry with exponential backoff and
/// jitter, priority-ordered fallback chains, admission control, response
/// memoization, and the degrade-to-simulated terminal fallback.
pub struct FetchCoordinator {
    adapters: HashMap<SourceId, Arc<dyn ProviderAdapter>>,
    chains: FallbackChains,
    retry: RetryConfig,
    limiters: HashMap<SourceId, SourceLimiter>,
    global: Arc<Semaphore>,
    cache: ResponseCache,
    normalizer: Normalizer,
    simulator: Simulator,
    metrics: Arc<CoreMetrics>,
    jitter: Mutex<ChaCha8Rng>,
    sim_bundles: Mutex<HashMap<(String, i64), Arc<SimulatedBundle>>>,
}

impl FetchCoordinator {
    /// Build the coordinator with the standard adapter set.
    pub fn new(config: &AnalyzerConfig, metrics: Arc<CoreMetrics>) -> Self {
        let client = reqwest::Client::new();
        let adapters: Vec<Arc<dyn ProviderAdapter>> = vec![
            Arc::new(EtherscanAdapter::new(client.clone(), config.api_keys.etherscan.clone())),
            Arc::new(GraphAdapter::new(client.clone(), config.api_keys.graph.clone())),
            Arc::new(EthplorerAdapter::new(client, config.api_keys.ethplorer.clone())),
        ];
        Self::with_adapters(config, metrics, adapters, ChaCha8Rng::from_entropy())
    }

    /// Build with a caller-supplied adapter set and jitter source. Lets
    /// tests script source behavior and make retry schedules reproducible.
    pub fn with_adapters(
        config: &AnalyzerConfig,
        metrics: Arc<CoreMetrics>,
        adapters: Vec<Arc<dyn ProviderAdapter>>,
        jitter: ChaCha8Rng,
    ) -> Self {
        let mut adapter_map: HashMap<SourceId, Arc<dyn ProviderAdapter>> = HashMap::new();
        let mut limiters = HashMap::new();
        for adapter in adapters {
            limiters.insert(
                adapter.id(),
                SourceLimiter::new(&config.concurrency, &config.rate_limit),
            );
            adapter_map.insert(adapter.id(), adapter);
        }

        Self {
            adapters: adapter_map,
            chains: config.fallback_chain.clone(),
            retry: config.retry.clone(),
            limiters,
            global: Arc::new(Semaphore::new(config.concurrency.global.max(1))),
            cache: ResponseCache::new(config.cache.clone()),
            normalizer: Normalizer::new(config.normalizer.clone()),
            simulator: Simulator::new(config.simulator),
            metrics,
            jitter: Mutex::new(jitter),
            sim_bundles: Mutex::new(HashMap::new()),
        }
    }

    pub fn metrics(&self) -> &Arc<CoreMetrics> {
        &self.metrics
    }

    /// Ranked holder balances for a protocol.
    pub async fn holders(
        &self,
        protocol: &Protocol,
        limit: usize,
        at: DateTime<Utc>,
        deadline: Instant,
    ) -> Result<Fetched<Vec<HolderBalance>>> {
        let chain = self.chains.holders.clone();
        match self
            .fetch_kind(CallKind::Holders, &chain, protocol, CallArgs::Holders { limit }, deadline)
            .await
        {
            Ok((NormalizedPayload::Holders(holders), provenance)) => {
                Ok(Fetched { data: holders, provenance })
            }
            Ok(_) => Err(AnalyticsError::Internal("holder payload kind mismatch".to_string())),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                self.warn_degraded(CallKind::Holders, protocol, &e);
                let bundle = self.simulated_bundle(protocol, at);
                let mut holders = bundle.holders.clone();
                holders.truncate(limit.max(1));
                Ok(Fetched { data: holders, provenance: Provenance::Simulated })
            }
        }
    }

    /// Proposals created inside [since, until].
    pub async fn proposals(
        &self,
        protocol: &Protocol,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        deadline: Instant,
    ) -> Result<Fetched<Vec<Proposal>>> {
        let chain = self.chains.proposals.clone();
        let args = CallArgs::Window { since: since.timestamp(), until: until.timestamp() };
        match self.fetch_kind(CallKind::Proposals, &chain, protocol, args, deadline).await {
            Ok((NormalizedPayload::Proposals(proposals), provenance)) => {
                Ok(Fetched { data: proposals, provenance })
            }
            Ok(_) => Err(AnalyticsError::Internal("proposal payload kind mismatch".to_string())),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                self.warn_degraded(CallKind::Proposals, protocol, &e);
                let bundle = self.simulated_bundle(protocol, until);
                Ok(Fetched {
                    data: bundle.proposals.clone(),
                    provenance: Provenance::Simulated,
                })
            }
        }
    }

    /// All votes across the given proposals. Each proposal is fetched (and
    /// cached) independently; the weakest tier across them tags the result.
    /// `at` keys the synthetic bundle so a degraded votes kind stays
    /// consistent with the other kinds of the same snapshot build.
    pub async fn votes(
        &self,
        protocol: &Protocol,
        proposals: &[Proposal],
        at: DateTime<Utc>,
        deadline: Instant,
    ) -> Result<Fetched<Vec<Vote>>> {
        let chain = self.chains.votes.clone();
        let mut votes = Vec::new();
        let mut provenance = Provenance::Live;

        for proposal in proposals {
            let args = CallArgs::Votes { proposal_id: proposal.id };
            match self.fetch_kind(CallKind::Votes, &chain, protocol, args, deadline).await {
                Ok((NormalizedPayload::Votes(proposal_votes), tier)) => {
                    provenance = provenance.weakest(tier);
                    votes.extend(proposal_votes);
                }
                Ok(_) => {
                    return Err(AnalyticsError::Internal("vote payload kind mismatch".to_string()))
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    self.warn_degraded(CallKind::Votes, protocol, &e);
                    let bundle = self.simulated_bundle(protocol, at);
                    let mut existing: Vec<Vote> = bundle
                        .votes
                        .iter()
                        .filter(|v| v.proposal_id == proposal.id)
                        .cloned()
                        .collect();
                    if existing.is_empty() {
                        existing = self.simulator.simulate_votes(
                            proposal,
                            &bundle.holders,
                            self.simulator.default_seed(),
                        );
                    }
                    votes.extend(existing);
                    provenance = Provenance::Simulated;
                }
            }
        }

        Ok(Fetched { data: votes, provenance })
    }

    /// Delegation changes inside [since, until].
    pub async fn delegations(
        &self,
        protocol: &Protocol,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        deadline: Instant,
    ) -> Result<Fetched<Vec<Delegation>>> {
        let chain = self.chains.delegations.clone();
        let args = CallArgs::Window { since: since.timestamp(), until: until.timestamp() };
        match self.fetch_kind(CallKind::Delegations, &chain, protocol, args, deadline).await {
            Ok((NormalizedPayload::Delegations(delegations), provenance)) => {
                Ok(Fetched { data: delegations, provenance })
            }
            Ok(_) => {
                Err(AnalyticsError::Internal("delegation payload kind mismatch".to_string()))
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                self.warn_degraded(CallKind::Delegations, protocol, &e);
                let bundle = self.simulated_bundle(protocol, until);
                Ok(Fetched {
                    data: bundle.delegations.clone(),
                    provenance: Provenance::Simulated,
                })
            }
        }
    }

    /// Walk the fallback chain for one call. Cache hits bypass the chain
    /// entirely; live responses are normalized before they are memoized, so
    /// schema violations advance the chain instead of poisoning the cache.
    async fn fetch_kind(
        &self,
        kind: CallKind,
        chain: &[SourceId],
        protocol: &Protocol,
        args: CallArgs,
        deadline: Instant,
    ) -> Result<(NormalizedPayload, Provenance)> {
        let fingerprint = args.fingerprint(protocol);
        let mut last_err: Option<AnalyticsError> = None;
        let mut tried_any = false;

        for &source in chain {
            let Some(adapter) = self.adapters.get(&source) else {
                debug!(%source, %kind, "source in chain has no adapter, skipping");
                continue;
            };

            let key = CacheKey { source, kind, fingerprint: fingerprint.clone() };
            if let Some(payload) = self.cache.get(&key) {
                self.metrics.record_cache_hit();
                match self.normalize(kind, &payload, protocol, &args) {
                    Ok(normalized) => return Ok((normalized, Provenance::Cached)),
                    Err(e) => {
                        warn!(%source, %kind, error = %e, "cached payload failed normalization");
                        last_err = Some(e);
                        continue;
                    }
                }
            }
            self.metrics.record_cache_miss();

            if tried_any {
                self.metrics.record_fallback();
            }
            tried_any = true;

            match self.call_with_retry(source, adapter.as_ref(), kind, protocol, args, deadline).await {
                Ok(payload) => match self.normalize(kind, &payload, protocol, &args) {
                    Ok(normalized) => {
                        self.cache.insert(key, payload);
                        return Ok((normalized, adapter.tier()));
                    }
                    Err(e) => {
                        warn!(%source, %kind, error = %e, "response failed normalization, advancing chain");
                        self.metrics.record_failure(source);
                        last_err = Some(e);
                    }
                },
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    debug!(%source, %kind, error = %e, "source exhausted, advancing chain");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| {
            AnalyticsError::NotSupported(format!("no source configured for {kind}"))
        }))
    }

    /// Bounded retry state machine for one (source, call, arguments). No two
    /// concurrent retries of the same call: the caller runs this
    /// sequentially per call.
    async fn call_with_retry(
        &self,
        source: SourceId,
        adapter: &dyn ProviderAdapter,
        kind: CallKind,
        protocol: &Protocol,
        args: CallArgs,
        deadline: Instant,
    ) -> Result<CachedPayload> {
        let mut attempt: u32 = 0;
        loop {
            self.metrics.record_call();
            self.metrics.record_attempt(source, attempt);

            let started = Instant::now();
            let outcome = self.admitted_call(source, adapter, kind, protocol, args, deadline).await;
            debug!(
                %source,
                %kind,
                fingerprint = %args.fingerprint(protocol),
                attempt,
                duration_ms = started.elapsed().as_millis() as u64,
                outcome = if outcome.is_ok() { "ok" } else { "err" },
                "source call finished"
            );

            let err = match outcome {
                Ok(payload) => return Ok(payload),
                Err(e) => e,
            };
            if !err.is_retryable() {
                self.metrics.record_failure(source);
                return Err(err);
            }

            attempt += 1;
            if attempt >= self.retry.max_attempts {
                self.metrics.record_failure(source);
                return Err(err);
            }

            let delay = match &err {
                AnalyticsError::RateLimited { retry_after: Some(delay), .. } => *delay,
                _ => self.backoff_delay(attempt),
            };
            if Instant::now() + delay >= deadline {
                self.metrics.record_failure(source);
                return Err(AnalyticsError::Cancelled(format!(
                    "deadline reached while backing off from {source}"
                )));
            }
            debug!(%source, %kind, attempt, delay_ms = delay.as_millis() as u64, "backing off");
            sleep(delay).await;
        }
    }

    /// One admitted attempt: global slot, per-source slot and rate token,
    /// then the adapter call under the deadline.
    async fn admitted_call(
        &self,
        source: SourceId,
        adapter: &dyn ProviderAdapter,
        kind: CallKind,
        protocol: &Protocol,
        args: CallArgs,
        deadline: Instant,
    ) -> Result<CachedPayload> {
        let _global = self
            .global
            .acquire()
            .await
            .map_err(|_| AnalyticsError::Internal("global semaphore closed".to_string()))?;
        let _permit = match self.limiters.get(&source) {
            Some(limiter) => Some(limiter.acquire().await?),
            None => None,
        };

        match timeout_at(deadline, self.dispatch(adapter, kind, protocol, args, deadline)).await {
            Ok(result) => result,
            Err(_) => Err(AnalyticsError::Cancelled(format!("deadline exceeded calling {source}"))),
        }
    }

    async fn dispatch(
        &self,
        adapter: &dyn ProviderAdapter,
        kind: CallKind,
        protocol: &Protocol,
        args: CallArgs,
        deadline: Instant,
    ) -> Result<CachedPayload> {
        match (kind, args) {
            (CallKind::Holders, CallArgs::Holders { limit }) => {
                let page = adapter.fetch_holders(protocol, limit, None, deadline).await?;
                Ok(CachedPayload::Holders(page))
            }
            (CallKind::Proposals, CallArgs::Window { since, until }) => {
                let since = to_datetime(since)?;
                let until = to_datetime(until)?;
                let raws = adapter.fetch_proposals(protocol, since, until, deadline).await?;
                Ok(CachedPayload::Proposals(raws))
            }
            (CallKind::Votes, CallArgs::Votes { proposal_id }) => {
                let raws = adapter.fetch_votes(protocol, proposal_id, deadline).await?;
                Ok(CachedPayload::Votes(raws))
            }
            (CallKind::Delegations, CallArgs::Window { since, until }) => {
                let since = to_datetime(since)?;
                let until = to_datetime(until)?;
                let raws = adapter.fetch_delegations(protocol, since, until, deadline).await?;
                Ok(CachedPayload::Delegations(raws))
            }
            _ => Err(AnalyticsError::Internal(format!("mismatched call args for {kind}"))),
        }
    }

    fn normalize(
        &self,
        kind: CallKind,
        payload: &CachedPayload,
        protocol: &Protocol,
        args: &CallArgs,
    ) -> Result<NormalizedPayload> {
        match (kind, payload) {
            (CallKind::Holders, CachedPayload::Holders(page)) => Ok(NormalizedPayload::Holders(
                self.normalizer.holders(page, protocol)?,
            )),
            (CallKind::Proposals, CachedPayload::Proposals(raws)) => Ok(
                NormalizedPayload::Proposals(self.normalizer.proposals(raws, protocol)?),
            ),
            (CallKind::Votes, CachedPayload::Votes(raws)) => {
                let mut ids: HashSet<u64> = HashSet::default();
                if let CallArgs::Votes { proposal_id } = args {
                    ids.insert(*proposal_id);
                }
                Ok(NormalizedPayload::Votes(self.normalizer.votes(raws, &ids)?))
            }
            (CallKind::Delegations, CachedPayload::Delegations(raws)) => Ok(
                NormalizedPayload::Delegations(self.normalizer.delegations(raws)?),
            ),
            _ => Err(AnalyticsError::Internal(format!("cached payload kind mismatch for {kind}"))),
        }
    }

    /// delay = base * 2^(attempt-1), capped, times a uniform factor in
    /// [0.5, 1.5].
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.retry.base().as_millis() as u64;
        let ceiling = self.retry.ceiling().as_millis() as u64;
        let exp = base.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        let capped = exp.min(ceiling);
        let factor = {
            let mut rng = self.jitter.lock().unwrap_or_else(|p| p.into_inner());
            0.5 + rng.gen::<f64>()
        };
        Duration::from_millis((capped as f64 * factor) as u64)
    }

    fn warn_degraded(&self, kind: CallKind, protocol: &Protocol, error: &AnalyticsError) {
        self.metrics.record_simulated_fallback();
        warn!(
            %kind,
            protocol = %protocol.id,
            error = %error,
            degraded = true,
            "all sources exhausted, serving simulated data"
        );
    }

    /// Memoized synthetic bundle per (protocol, timestamp), so every kind
    /// that degrades within one snapshot build sees consistent data.
    fn simulated_bundle(&self, protocol: &Protocol, at: DateTime<Utc>) -> Arc<SimulatedBundle> {
        let key = (protocol.id.clone(), at.timestamp());
        let mut bundles = self.sim_bundles.lock().unwrap_or_else(|p| p.into_inner());
        bundles
            .entry(key)
            .or_insert_with(|| {
                Arc::new(self.simulator.generate_bundle(
                    protocol,
                    DistributionProfile::PowerLaw,
                    SIMULATED_HOLDER_COUNT,
                    at,
                    self.simulator.default_seed(),
                ))
            })
            .clone()
    }
}

fn to_datetime(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(secs, 0)
        .ok_or_else(|| AnalyticsError::Validation(format!("timestamp {secs} out of range")))
}
