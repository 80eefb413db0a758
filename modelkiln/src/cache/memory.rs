//! In-memory cache backend.
//!
//! The default backend for tests and local CLI runs: a shared map of
//! key → value-set, with fetch and store completing on short-lived background
//! threads so handles behave like real async transport.

use super::backend::CacheBackend;
use super::key::CacheKey;
use super::types::{CacheValueId, FetchHandle, FetchPolicy, FetchResponse, StoreHandle};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

/// Map-backed cache backend.
#[derive(Default)]
pub struct MemoryCacheBackend {
    entries: Arc<DashMap<CacheKey, BTreeMap<CacheValueId, Vec<u8>>>>,
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl CacheBackend for MemoryCacheBackend {
    fn get(&self, key: &CacheKey, policy: FetchPolicy) -> FetchHandle {
        let (tx, cancel, handle) = FetchHandle::channel();
        let entries = Arc::clone(&self.entries);
        let key = *key;

        thread::spawn(move || {
            if cancel.is_cancelled() {
                let _ = tx.send(None);
                return;
            }

            let response = entries.get(&key).map(|entry| {
                let mut response = FetchResponse::default();
                for (id, bytes) in entry.iter() {
                    if policy == FetchPolicy::SkipPayloads && id.is_payload() {
                        continue;
                    }
                    response.values.insert(*id, bytes.clone());
                }
                response
            });

            let _ = tx.send(response);
        });

        handle
    }

    fn put(&self, key: &CacheKey, values: Vec<(CacheValueId, Vec<u8>)>) -> StoreHandle {
        let (tx, handle) = StoreHandle::channel();
        let entries = Arc::clone(&self.entries);
        let key = *key;

        thread::spawn(move || {
            let mut entry = entries.entry(key).or_default();
            for (id, bytes) in values {
                entry.insert(id, bytes);
            }
            drop(entry);
            let _ = tx.send(Ok(()));
        });

        handle
    }
}
