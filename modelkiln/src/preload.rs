//! Asset preloading — the collaborator that makes referenced packages
//! resident before IR construction.
//!
//! The orchestrator requests every package referenced by the source graph and
//! polls the returned [`PreloadHandle`] from its tick; `force_finish` cancels
//! the handle outright. Implementations are injected, so tests can gate or
//! observe preloading.

use crate::signal::Completion;
use dashmap::DashMap;
use std::sync::Arc;
use std::thread;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Handle to an in-flight asynchronous preload.
#[derive(Clone)]
pub struct PreloadHandle {
    done: Arc<Completion>,
    cancel: CancellationToken,
}

impl PreloadHandle {
    /// Creates a handle pair; the returned completion must be set by the
    /// implementation when loading finishes.
    pub fn new() -> (Self, Arc<Completion>, CancellationToken) {
        let done = Arc::new(Completion::new());
        let cancel = CancellationToken::new();
        (
            Self {
                done: Arc::clone(&done),
                cancel: cancel.clone(),
            },
            done,
            cancel,
        )
    }

    /// Creates an already-completed handle (nothing to load).
    pub fn completed() -> Self {
        let (handle, done, _cancel) = Self::new();
        done.set();
        handle
    }

    /// True while the load is still in flight.
    pub fn is_active(&self) -> bool {
        !self.done.is_set()
    }

    /// Blocks until the load completes.
    pub fn wait(&self) {
        self.done.wait();
    }

    /// Cancels the load. The handle reports completed afterwards; whatever
    /// was already resident stays resident.
    pub fn cancel(&self) {
        self.cancel.cancel();
        self.done.set();
    }
}

/// The preloading collaborator.
pub trait AssetPreloader: Send + Sync {
    /// Starts loading `paths` in the background.
    fn request_async_load(&self, paths: Vec<String>) -> PreloadHandle;

    /// Loads `paths` before returning.
    fn request_sync_load(&self, paths: Vec<String>);
}

/// Preloader that tracks residency in a shared set, loading on a background
/// thread. The default collaborator for service construction.
#[derive(Default)]
pub struct ResidencyPreloader {
    resident: Arc<DashMap<String, ()>>,
}

impl ResidencyPreloader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_resident(&self, path: &str) -> bool {
        self.resident.contains_key(path)
    }

    pub fn resident_count(&self) -> usize {
        self.resident.len()
    }
}

impl AssetPreloader for ResidencyPreloader {
    fn request_async_load(&self, paths: Vec<String>) -> PreloadHandle {
        if paths.is_empty() {
            return PreloadHandle::completed();
        }

        let (handle, done, cancel) = PreloadHandle::new();
        let resident = Arc::clone(&self.resident);

        thread::spawn(move || {
            for path in paths {
                if cancel.is_cancelled() {
                    debug!("preload cancelled");
                    break;
                }
                resident.insert(path, ());
            }
            done.set();
        });

        handle
    }

    fn request_sync_load(&self, paths: Vec<String>) {
        for path in paths {
            self.resident.insert(path, ());
        }
    }
}

/// Preloader that completes every request immediately without loading.
#[derive(Debug, Default, Clone)]
pub struct NullPreloader;

impl AssetPreloader for NullPreloader {
    fn request_async_load(&self, _paths: Vec<String>) -> PreloadHandle {
        PreloadHandle::completed()
    }

    fn request_sync_load(&self, _paths: Vec<String>) {}
}
