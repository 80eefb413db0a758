//! Per-asset compile locks.
//!
//! Compiling an asset must never race with another compile of the same asset.
//! The [`LockTable`] hands out exclusive per-asset tokens: the orchestrator
//! acquires the lock before preloading and releases it when the request
//! completes. The table is owned by the service that constructs orchestrators
//! and shared by reference, so independent orchestrators still exclude each
//! other.
//!
//! A failed `try_lock` fails the whole request immediately; there is no
//! automatic requeue.

use crate::catalog::AssetId;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque owner token returned by a successful lock acquisition.
///
/// Only the holder of the token can release the lock; `unlock` from anyone
/// else is ignored, which makes release idempotent for the logical owner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockToken(u64);

/// Table of assets currently locked for compilation.
#[derive(Debug, Default)]
pub struct LockTable {
    held: DashMap<AssetId, u64>,
    next_token: AtomicU64,
}

impl LockTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to acquire the exclusive lock for `asset`.
    ///
    /// Returns `None` if the asset is already locked by anyone.
    pub fn try_lock(&self, asset: &AssetId) -> Option<LockToken> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed) + 1;
        match self.held.entry(asset.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => None,
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(token);
                Some(LockToken(token))
            }
        }
    }

    /// Releases the lock for `asset` if `token` is the current owner.
    ///
    /// Calling with a stale token (already released, or never the owner) is a
    /// no-op, so the logical owner may release more than once safely.
    pub fn unlock(&self, asset: &AssetId, token: LockToken) {
        self.held.remove_if(asset, |_, owner| *owner == token.0);
    }

    /// Returns true if `asset` is currently locked.
    pub fn is_locked(&self, asset: &AssetId) -> bool {
        self.held.contains_key(asset)
    }

    /// Number of assets currently locked.
    pub fn len(&self) -> usize {
        self.held.len()
    }

    pub fn is_empty(&self) -> bool {
        self.held.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(name: &str) -> AssetId {
        AssetId::new(name)
    }

    #[test]
    fn test_lock_then_contend() {
        let table = LockTable::new();
        let id = asset("hero");

        let token = table.try_lock(&id);
        assert!(token.is_some());
        assert!(table.is_locked(&id));

        // Second acquisition fails while held.
        assert!(table.try_lock(&id).is_none());
    }

    #[test]
    fn test_unlock_releases() {
        let table = LockTable::new();
        let id = asset("hero");

        let token = table.try_lock(&id).unwrap();
        table.unlock(&id, token);
        assert!(!table.is_locked(&id));

        // Lock can be taken again after release.
        assert!(table.try_lock(&id).is_some());
    }

    #[test]
    fn test_unlock_is_idempotent_for_owner() {
        let table = LockTable::new();
        let id = asset("hero");

        let token = table.try_lock(&id).unwrap();
        table.unlock(&id, token);
        table.unlock(&id, token);
        assert!(!table.is_locked(&id));
    }

    #[test]
    fn test_stale_token_cannot_release_new_lock() {
        let table = LockTable::new();
        let id = asset("hero");

        let first = table.try_lock(&id).unwrap();
        table.unlock(&id, first);

        let _second = table.try_lock(&id).unwrap();
        // The first owner's token is stale now; unlock must not release the
        // second owner's lock.
        table.unlock(&id, first);
        assert!(table.is_locked(&id));
    }

    #[test]
    fn test_independent_assets_do_not_contend() {
        let table = LockTable::new();
        let a = asset("hero");
        let b = asset("villain");

        assert!(table.try_lock(&a).is_some());
        assert!(table.try_lock(&b).is_some());
        assert_eq!(table.len(), 2);
    }
}
