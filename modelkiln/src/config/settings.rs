//! Settings structs for all configuration sections.
//!
//! Pure data types with no parsing logic; the CLI overlays values from a
//! JSON config file, library embedders construct them directly.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Complete application configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KilnConfig {
    pub compiler: CompilerSettings,
    pub cache: CacheSettings,
    pub packaging: PackagingSettings,
    pub logging: LoggingSettings,
}

/// Orchestrator behavior.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerSettings {
    /// Master switch; when false every enqueue fails immediately. Used by
    /// run modes that must never compile (e.g. running packaged data).
    pub allow_compilation: bool,
    /// Wall-clock budget per tick for same-thread follow-up tasks, in
    /// milliseconds.
    pub followup_budget_ms: u64,
    /// Stack size for compile worker threads, in MiB. Transform graphs can
    /// recurse deeply.
    pub worker_stack_mib: usize,
}

impl Default for CompilerSettings {
    fn default() -> Self {
        Self {
            allow_compilation: true,
            followup_budget_ms: super::DEFAULT_FOLLOWUP_BUDGET_MS,
            worker_stack_mib: 16,
        }
    }
}

/// Cache behavior defaults applied to new requests.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Query the cache before compiling.
    pub query_enabled: bool,
    /// Store freshly compiled artifacts.
    pub store_enabled: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            query_enabled: true,
            store_enabled: true,
        }
    }
}

/// Streaming file packaging.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PackagingSettings {
    /// Byte limit per packaged file under the size-limited policy.
    pub packaged_file_byte_limit: u64,
    /// File count per bucket under the count-limited policy.
    pub files_per_bucket: u32,
    /// Payloads below this size stay inline in the model binary.
    pub inline_byte_threshold: u32,
}

impl Default for PackagingSettings {
    fn default() -> Self {
        Self {
            packaged_file_byte_limit: super::DEFAULT_PACKAGED_FILE_BYTE_LIMIT,
            files_per_bucket: super::DEFAULT_FILES_PER_BUCKET,
            inline_byte_threshold: super::DEFAULT_INLINE_BYTE_THRESHOLD,
        }
    }
}

/// Logging output.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub directory: PathBuf,
    pub file_name: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("logs"),
            file_name: "modelkiln.log".to_string(),
        }
    }
}
