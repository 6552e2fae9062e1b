use crate::config::SourceId;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Per-source call accounting.
#[derive(Debug, Default)]
pub struct SourceCounters {
    /// Every adapter invocation, including the first attempt.
    pub attempts: AtomicU64,
    /// Attempts after the first for the same call.
    pub retries: AtomicU64,
    pub failures: AtomicU64,
}

/// Engine-wide observability counters. Cheap to clone behind an `Arc`; all
/// fields are monotonic.
#[derive(Debug, Default)]
pub struct CoreMetrics {
    pub calls: AtomicU64,
    pub fallbacks: AtomicU64,
    pub simulated_fallbacks: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    per_source: DashMap<SourceId, SourceCounters>,
}

impl CoreMetrics {
    pub fn record_call(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_attempt(&self, source: SourceId, attempt: u32) {
        let counters = self.per_source.entry(source).or_default();
        counters.attempts.fetch_add(1, Ordering::Relaxed);
        if attempt > 0 {
            counters.retries.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_failure(&self, source: SourceId) {
        self.per_source
            .entry(source)
            .or_default()
            .failures
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_fallback(&self) {
        self.fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_simulated_fallback(&self) {
        self.simulated_fallbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn attempts(&self, source: SourceId) -> u64 {
        self.per_source
            .get(&source)
            .map(|c| c.attempts.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn retries(&self, source: SourceId) -> u64 {
        self.per_source
            .get(&source)
            .map(|c| c.retries.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn failures(&self, source: SourceId) -> u64 {
        self.per_source
            .get(&source)
            .map(|c| c.failures.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn cache_hit_rate(&self) -> f64 {
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Point-in-time view suitable for logging or JSON output.
    pub fn summary(&self) -> MetricsSummary {
        let mut sources: Vec<SourceSummary> = self
            .per_source
            .iter()
            .map(|entry| SourceSummary {
                source: *entry.key(),
                attempts: entry.attempts.load(Ordering::Relaxed),
                retries: entry.retries.load(Ordering::Relaxed),
                failures: entry.failures.load(Ordering::Relaxed),
            })
            .collect();
        sources.sort_by_key(|s| s.source.to_string());

        MetricsSummary {
            calls: self.calls.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
            simulated_fallbacks: self.simulated_fallbacks.load(Ordering::Relaxed),
            cache_hit_rate: self.cache_hit_rate(),
            sources,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceSummary {
    pub source: SourceId,
    pub attempts: u64,
    pub retries: u64,
    pub failures: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub calls: u64,
    pub fallbacks: u64,
    pub simulated_fallbacks: u64,
    pub cache_hit_rate: f64,
    pub sources: Vec<SourceSummary>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_and_retry_counting() {
        let metrics = CoreMetrics::default();
        metrics.record_attempt(SourceId::Etherscan, 0);
        metrics.record_attempt(SourceId::Etherscan, 1);
        metrics.record_attempt(SourceId::Graph, 0);

        assert_eq!(metrics.attempts(SourceId::Etherscan), 2);
        assert_eq!(metrics.retries(SourceId::Etherscan), 1);
        assert_eq!(metrics.attempts(SourceId::Graph), 1);
        assert_eq!(metrics.retries(SourceId::Graph), 0);
        assert_eq!(metrics.attempts(SourceId::Ethplorer), 0);
    }

    #[test]
    fn test_cache_hit_rate() {
        let metrics = CoreMetrics::default();
        assert_eq!(metrics.cache_hit_rate(), 0.0);
        metrics.record_cache_hit();
        metrics.record_cache_hit();
        metrics.record_cache_miss();
        assert!((metrics.cache_hit_rate() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_summary_is_sorted_by_source() {
        let metrics = CoreMetrics::default();
        metrics.record_attempt(SourceId::Graph, 0);
        metrics.record_attempt(SourceId::Etherscan, 0);
        let summary = metrics.summary();
        assert_eq!(summary.sources.len(), 2);
        assert_eq!(summary.sources[0].source, SourceId::Etherscan);
        assert_eq!(summary.sources[1].source, SourceId::Graph);
    }
}
