//! High-level service facade.
//!
//! [`KilnService`] wires the long-lived pieces together: the asset catalog,
//! the lock table and the cache backend. Orchestrators are constructed
//! through the service and share its lock table by reference, so compiles of
//! the same asset exclude each other even across orchestrators. Most
//! embedders want this instead of assembling the parts by hand:
//!
//! ```ignore
//! use modelkiln::service::KilnService;
//! use modelkiln::compiler::{CompileOptions, CompileRequest};
//!
//! let service = KilnService::new(KilnConfig::default());
//! service.catalog().insert(asset_id.clone(), graph);
//!
//! let mut orchestrator = service.create_orchestrator();
//! orchestrator.enqueue_compile_request(
//!     CompileRequest::new(asset_id, CompileOptions::default()),
//!     false,
//! );
//! while !orchestrator.tick(false) {}
//! ```

use crate::cache::{CacheBackend, MemoryCacheBackend};
use crate::catalog::AssetCatalog;
use crate::compiler::{CompileOrchestrator, OrchestratorConfig};
use crate::config::KilnConfig;
use crate::lock::LockTable;
use std::sync::Arc;

/// Owns the shared state every orchestrator needs.
pub struct KilnService {
    config: KilnConfig,
    catalog: Arc<AssetCatalog>,
    locks: Arc<LockTable>,
    backend: Arc<dyn CacheBackend>,
}

impl KilnService {
    /// Creates a service with the in-memory cache backend.
    pub fn new(config: KilnConfig) -> Self {
        Self::with_backend(config, Arc::new(MemoryCacheBackend::new()))
    }

    /// Creates a service over a custom cache backend.
    pub fn with_backend(config: KilnConfig, backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            config,
            catalog: Arc::new(AssetCatalog::new()),
            locks: Arc::new(LockTable::new()),
            backend,
        }
    }

    pub fn catalog(&self) -> &Arc<AssetCatalog> {
        &self.catalog
    }

    pub fn locks(&self) -> &Arc<LockTable> {
        &self.locks
    }

    pub fn config(&self) -> &KilnConfig {
        &self.config
    }

    /// Builds an orchestrator sharing this service's catalog, lock table and
    /// cache backend.
    pub fn create_orchestrator(&self) -> CompileOrchestrator {
        CompileOrchestrator::new(
            Arc::clone(&self.catalog),
            Arc::clone(&self.locks),
            Arc::clone(&self.backend),
            OrchestratorConfig::from(&self.config),
        )
    }
}
