//! Content-addressable compiled-data cache.
//!
//! Keyed by a content hash over the canonical source graph and every
//! output-affecting compile option, so unchanged inputs skip compilation
//! entirely. The [`CacheClient`] implements the two-phase fetch/store
//! protocol over an injected transport [`CacheBackend`]:
//!
//! - **Phase 1** retrieves only the small descriptor values and validates
//!   them; interactive requests stop here and stream payloads lazily.
//! - **Phase 2** (deployment cook only) pulls the full payload set and
//!   demultiplexes it through the file table.
//!
//! Misses and malformed entries fall through to a full compile; store
//! failures are logged and dropped.

mod backend;
mod client;
mod key;
mod memory;
mod types;

pub use backend::{CacheBackend, NullCacheBackend};
pub use client::{CacheClient, CachedDescriptors, Phase1Outcome};
pub use key::{CacheKey, ContentHash};
pub use memory::MemoryCacheBackend;
pub use types::{
    CacheError, CacheStoreError, CacheValueId, FetchHandle, FetchPolicy, FetchResponse,
    StoreHandle,
};
