//! Hard request failures.
//!
//! These abort a request before the async pipeline starts and are terminal:
//! no retry, no requeue. They reach the caller through the completion
//! callback's `request_failed` flag; the enum exists for logging and tests.

use crate::catalog::AssetId;
use thiserror::Error;

/// Why a compile request was rejected outright.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("asset not found: {0}")]
    MissingAsset(AssetId),

    #[error("asset {0} is already being compiled or updated")]
    AlreadyLocked(AssetId),

    #[error("an equal request for asset {0} is already queued or in flight")]
    DuplicateRequest(AssetId),

    #[error("compilation is disabled in this run mode")]
    CompilationDisabled,
}
