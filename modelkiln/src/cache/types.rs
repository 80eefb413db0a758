//! Cache value model and async request handles.
//!
//! A cache entry is one key mapping to several independently named values:
//! the four small descriptor values (model, resources, block index, file
//! table) plus one payload value per planned file. Fetches carry a policy so
//! phase 1 can skip the large payload values entirely.
//!
//! Handles complete on background threads and are polled from the
//! orchestrator tick; tokio's sync primitives are used standalone, no runtime
//! involved.

use crate::artifact::ArtifactCodecError;
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tokio_util::sync::CancellationToken;

/// Name of one value stored under a cache key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CacheValueId {
    /// The compiled model blob.
    Model,
    /// The resources side-table blob.
    Resources,
    /// The streamable block index.
    BlockIndex,
    /// The file plan descriptor.
    FileTable,
    /// Raw bytes of one planned file, by plan position.
    FilePayload(u32),
}

impl CacheValueId {
    /// True for the large streamable payload values skipped in phase 1.
    pub fn is_payload(&self) -> bool {
        matches!(self, Self::FilePayload(_))
    }
}

/// Fetch scoping policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FetchPolicy {
    /// Retrieve only the small descriptor values.
    SkipPayloads,
    /// Retrieve everything, payloads included.
    Full,
}

/// Values returned by a successful fetch.
#[derive(Debug, Default)]
pub struct FetchResponse {
    pub values: HashMap<CacheValueId, Vec<u8>>,
}

impl FetchResponse {
    pub fn take(&mut self, id: CacheValueId) -> Option<Vec<u8>> {
        self.values.remove(&id)
    }
}

/// Errors surfaced while interpreting cached data.
///
/// Every variant is handled as a cache miss by the client; none of them fail
/// a compile request.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cached value failed to decompress: {0}")]
    Decompress(#[from] std::io::Error),

    #[error(transparent)]
    Codec(#[from] ArtifactCodecError),

    #[error("cache entry is missing the {0} value")]
    MissingValue(&'static str),

    #[error("cached data failed structural validation: {0}")]
    Structural(&'static str),
}

/// Errors surfaced by a cache store.
///
/// Logged only; a failed store never fails the compile, the artifact is
/// already usable locally.
#[derive(Debug, Error)]
pub enum CacheStoreError {
    #[error("cache backend rejected the store: {0}")]
    Backend(String),

    #[error("cache backend dropped the store request")]
    Dropped,
}

/// Pollable, cancellable handle to an in-flight fetch.
///
/// `None` responses are cache misses; a dropped sender also reads as a miss.
pub struct FetchHandle {
    rx: Option<oneshot::Receiver<Option<FetchResponse>>>,
    slot: Option<Option<FetchResponse>>,
    cancel: CancellationToken,
}

impl FetchHandle {
    /// Creates the handle plus the completion side handed to the backend.
    pub fn channel() -> (
        oneshot::Sender<Option<FetchResponse>>,
        CancellationToken,
        Self,
    ) {
        let (tx, rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        (
            tx,
            cancel.clone(),
            Self {
                rx: Some(rx),
                slot: None,
                cancel,
            },
        )
    }

    /// Creates an immediately-missed handle.
    pub fn missed() -> Self {
        let (tx, _cancel, handle) = Self::channel();
        let _ = tx.send(None);
        handle
    }

    /// Non-blocking completion check.
    pub fn is_completed(&mut self) -> bool {
        if self.slot.is_some() {
            return true;
        }
        let Some(rx) = self.rx.as_mut() else {
            return true;
        };
        match rx.try_recv() {
            Ok(response) => {
                self.slot = Some(response);
                self.rx = None;
                true
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Closed) => {
                self.slot = Some(None);
                self.rx = None;
                true
            }
        }
    }

    /// Blocks until the fetch completes.
    pub fn wait(&mut self) {
        if self.slot.is_some() {
            return;
        }
        if let Some(rx) = self.rx.take() {
            self.slot = Some(rx.blocking_recv().unwrap_or(None));
        }
    }

    /// Takes the response; `None` is a miss. Must only be called after the
    /// handle reports completed.
    pub fn take_response(&mut self) -> Option<FetchResponse> {
        debug_assert!(self.slot.is_some() || self.rx.is_none());
        self.slot.take().flatten()
    }

    /// Requests cancellation; a cooperative backend stops early and the
    /// fetch resolves as a miss.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for FetchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchHandle")
            .field("resolved", &self.slot.is_some())
            .finish()
    }
}

/// Pollable handle to an in-flight store.
pub struct StoreHandle {
    rx: Option<oneshot::Receiver<Result<(), CacheStoreError>>>,
    slot: Option<Result<(), CacheStoreError>>,
}

impl StoreHandle {
    pub fn channel() -> (oneshot::Sender<Result<(), CacheStoreError>>, Self) {
        let (tx, rx) = oneshot::channel();
        (
            tx,
            Self {
                rx: Some(rx),
                slot: None,
            },
        )
    }

    /// Creates an already-succeeded handle.
    pub fn succeeded() -> Self {
        let (tx, handle) = Self::channel();
        let _ = tx.send(Ok(()));
        handle
    }

    pub fn is_completed(&mut self) -> bool {
        if self.slot.is_some() {
            return true;
        }
        let Some(rx) = self.rx.as_mut() else {
            return true;
        };
        match rx.try_recv() {
            Ok(result) => {
                self.slot = Some(result);
                self.rx = None;
                true
            }
            Err(TryRecvError::Empty) => false,
            Err(TryRecvError::Closed) => {
                self.slot = Some(Err(CacheStoreError::Dropped));
                self.rx = None;
                true
            }
        }
    }

    /// Blocks until the store resolves and returns its result.
    pub fn wait(mut self) -> Result<(), CacheStoreError> {
        if let Some(result) = self.slot.take() {
            return result;
        }
        match self.rx.take() {
            Some(rx) => rx.blocking_recv().unwrap_or(Err(CacheStoreError::Dropped)),
            None => Err(CacheStoreError::Dropped),
        }
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("resolved", &self.slot.is_some())
            .finish()
    }
}
