//! The save worker.
//!
//! Serializes a finished [`CompiledArtifact`] into its packaged byte layout
//! and, when a cache destination is configured, pushes the value set through
//! the cache client's store. Runs on a dedicated background thread started
//! only after the compile worker finished; the thread is joined once the
//! orchestrator observes completion. A failed cache store is logged and never
//! fails the request — the artifact is already usable locally.

use super::WorkerHandle;
use crate::artifact::{write_package, CompiledArtifact};
use crate::cache::{CacheClient, CacheKey};
use std::io;
use tracing::{debug, warn};

/// Default stack for save worker threads; serialization does not recurse.
pub const SAVE_WORKER_STACK_SIZE: usize = 2 * 1024 * 1024;

/// The save worker's result. The artifact is handed back for commit.
#[derive(Debug)]
pub struct SaveOutput {
    pub artifact: CompiledArtifact,
    /// Full packaged bytes, `None` when the artifact was incomplete.
    pub package: Option<Vec<u8>>,
    /// A cache store was issued and acknowledged.
    pub stored: bool,
    /// A cache store was issued and failed; logged only.
    pub store_failed: bool,
}

/// Spawns the save worker.
///
/// `cache` carries the store destination; `None` disables storing (the
/// request had `cache_store_enabled` off, or there is no backend).
pub fn spawn_save_worker(
    artifact: CompiledArtifact,
    cache: Option<(CacheClient, CacheKey)>,
) -> io::Result<WorkerHandle<SaveOutput>> {
    WorkerHandle::spawn("kiln-save", SAVE_WORKER_STACK_SIZE, move || {
        let package = write_package(&artifact);
        match &package {
            Some(bytes) => debug!(bytes = bytes.len(), "artifact serialized"),
            None => warn!("artifact incomplete; nothing serialized"),
        }

        let mut stored = false;
        let mut store_failed = false;
        if let Some((client, key)) = cache {
            match client.store(&key, &artifact) {
                Some(handle) => match handle.wait() {
                    Ok(()) => {
                        debug!(key = %key, "compiled data stored in cache");
                        stored = true;
                    }
                    Err(error) => {
                        warn!(key = %key, %error, "cache store failed; keeping local artifact");
                        store_failed = true;
                    }
                },
                None => {
                    store_failed = true;
                }
            }
        }

        SaveOutput {
            artifact,
            package,
            stored,
            store_failed,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact::{Model, ModelResources};
    use crate::cache::{CacheClient, MemoryCacheBackend, NullCacheBackend};
    use crate::catalog::SourceGraph;
    use crate::compiler::CompileOptions;
    use std::sync::Arc;

    fn complete_artifact() -> CompiledArtifact {
        let mut artifact = CompiledArtifact::new();
        artifact.model = Some(Model::new(vec![1, 2, 3]));
        artifact.resources = Some(ModelResources::new());
        artifact
    }

    fn key() -> CacheKey {
        CacheKey::build(&SourceGraph::new(1), &CompileOptions::default())
    }

    #[test]
    fn test_save_without_cache() {
        let handle = spawn_save_worker(complete_artifact(), None).unwrap();
        handle.wait();
        let output = handle.join().unwrap();

        assert!(output.package.is_some());
        assert!(!output.stored);
        assert!(!output.store_failed);
        assert!(output.artifact.is_complete());
    }

    #[test]
    fn test_save_stores_into_backend() {
        let backend = Arc::new(MemoryCacheBackend::new());
        let client = CacheClient::new(backend.clone());
        let key = key();

        let handle = spawn_save_worker(complete_artifact(), Some((client, key))).unwrap();
        handle.wait();
        let output = handle.join().unwrap();

        assert!(output.stored);
        assert!(backend.contains(&key));
    }

    #[test]
    fn test_save_with_null_backend_still_succeeds() {
        let client = CacheClient::new(Arc::new(NullCacheBackend));
        let handle = spawn_save_worker(complete_artifact(), Some((client, key()))).unwrap();
        handle.wait();
        let output = handle.join().unwrap();

        // The null backend acknowledges stores; the artifact is intact.
        assert!(output.stored);
        assert!(output.package.is_some());
    }

    #[test]
    fn test_incomplete_artifact_serializes_nothing() {
        let handle = spawn_save_worker(CompiledArtifact::new(), None).unwrap();
        handle.wait();
        let output = handle.join().unwrap();
        assert!(output.package.is_none());
    }
}
