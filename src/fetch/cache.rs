use crate::config::{CacheConfig, SourceId};
use crate::fetch::adapter::{HolderPage, RawDelegation, RawProposal, RawVote};
use dashmap::DashMap;
use std::time::{Duration, Instant};
use strum_macros::Display;

/// The four fetchable data kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum CallKind {
    Holders,
    Proposals,
    Votes,
    Delegations,
}

/// Memoization key: one entry per (source, call, arguments).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub source: SourceId,
    pub kind: CallKind,
    /// Stable fingerprint of the call arguments.
    pub fingerprint: String,
}

/// Raw payload memoized before normalization, so a cache hit replays the
/// same pipeline as a live response.
#[derive(Debug, Clone)]
pub enum CachedPayload {
    Holders(HolderPage),
    Proposals(Vec<RawProposal>),
    Votes(Vec<RawVote>),
    Delegations(Vec<RawDelegation>),
}

#[derive(Debug)]
struct CacheEntry {
    payload: CachedPayload,
    inserted: Instant,
    ttl: Duration,
    last_used: Instant,
}

impl CacheEntry {
    fn is_expired(&self) -> bool {
        self.inserted.elapsed() > self.ttl
    }
}

/// TTL response cache with an LRU entry bound. Reads never block reads;
/// expired entries are dropped on access.
pub struct ResponseCache {
    entries: DashMap<CacheKey, CacheEntry>,
    config: CacheConfig,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
        }
    }

    fn ttl_for(&self, kind: CallKind) -> Duration {
        match kind {
            CallKind::Holders => self.config.holders_ttl(),
            CallKind::Proposals => self.config.proposals_ttl(),
            // Delegations change on the same cadence as votes.
            CallKind::Votes | CallKind::Delegations => self.config.votes_ttl(),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<CachedPayload> {
        if let Some(mut entry) = self.entries.get_mut(key) {
            if !entry.is_expired() {
                entry.last_used = Instant::now();
                return Some(entry.payload.clone());
            }
        }
        // Remove outside the get_mut guard to avoid holding a shard lock.
        self.entries.remove_if(key, |_, entry| entry.is_expired());
        None
    }

    pub fn insert(&self, key: CacheKey, payload: CachedPayload) {
        let ttl = self.ttl_for(key.kind);
        if self.entries.len() >= self.config.max_entries {
            self.evict_one();
        }
        let now = Instant::now();
        self.entries.insert(
            key,
            CacheEntry {
                payload,
                inserted: now,
                ttl,
                last_used: now,
            },
        );
    }

    /// Drop the least recently used entry, preferring anything expired.
    fn evict_one(&self) {
        let mut victim: Option<(CacheKey, Instant, bool)> = None;
        for entry in self.entries.iter() {
            let expired = entry.is_expired();
            let replace = match &victim {
                None => true,
                Some((_, oldest, victim_expired)) => {
                    (expired && !victim_expired) || (expired == *victim_expired && entry.last_used < *oldest)
                }
            };
            if replace {
                victim = Some((entry.key().clone(), entry.last_used, expired));
            }
        }
        if let Some((key, _, _)) = victim {
            self.entries.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
