/// Data acquisition layer.
///
/// One adapter per external source behind the `ProviderAdapter` capability
/// trait, a TTL/LRU response cache, per-source admission control, and the
/// coordinator that walks fallback chains with bounded retries and degrades
/// to the simulator when every real source is exhausted.
pub mod adapter;
pub mod cache;
pub mod coordinator;
pub mod etherscan;
pub mod ethplorer;
pub mod graph;
pub mod rate_limit;

pub use adapter::{HolderPage, ProviderAdapter, RawDelegation, RawHolder, RawProposal, RawVote};
pub use cache::{CacheKey, CallKind, ResponseCache};
pub use coordinator::{FetchCoordinator, Fetched};
pub use etherscan::EtherscanAdapter;
pub use ethplorer::EthplorerAdapter;
pub use graph::GraphAdapter;
pub use rate_limit::{SourceLimiter, TokenBucket};
