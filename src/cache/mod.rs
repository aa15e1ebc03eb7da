//! Client-side query cache.
//!
//! - **keys**: canonical identities for cached views of server state
//! - **store**: `QueryCache`, the keyed store with single-flight reads
//! - **invalidation**: which views a committed mutation makes stale
//!
//! ## Configuration
//!
//! ```toml
//! [cache]
//! page_size = 10
//! trust_server_like_count = true
//! ```

mod config;
mod entry;
mod fetch;
mod invalidation;
mod keys;
mod lock;
mod store;

pub use config::{CacheConfig, MAX_PAGE_SIZE};
pub use entry::{CacheEntry, CachedValue, EntryStatus};
pub use invalidation::{InvalidationGraph, MutationKind};
pub use keys::{CacheKey, KeyPattern, ResourceKind, Scope};
pub(crate) use lock::mutex_lock;
pub use store::{
    Listener, METRIC_CACHE_COALESCED, METRIC_CACHE_DISCARDED, METRIC_CACHE_FETCH,
    METRIC_CACHE_FETCH_SECONDS, METRIC_CACHE_HIT, METRIC_CACHE_INVALIDATED, METRIC_CACHE_MISS,
    Modified, QueryCache, Subscription,
};
