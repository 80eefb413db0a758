//! modelkiln - asynchronous compilation of declarative content graphs into
//! packaged runtime models.
//!
//! The pipeline turns a versioned, node-based source graph into a binary
//! runtime artifact: a tick-driven orchestrator drains a request queue,
//! checks a content-addressable cache before compiling, offloads compilation
//! and saving to dedicated background threads, and packages streamed
//! payloads into files with a deterministic planner.
//!
//! # High-Level API
//!
//! For most use cases the [`service`] module provides a simplified facade:
//!
//! ```ignore
//! use modelkiln::config::KilnConfig;
//! use modelkiln::compiler::{CompileOptions, CompileRequest};
//! use modelkiln::service::KilnService;
//!
//! let service = KilnService::new(KilnConfig::default());
//! service.catalog().insert(asset, graph);
//!
//! let mut orchestrator = service.create_orchestrator();
//! orchestrator.enqueue_compile_request(
//!     CompileRequest::new(asset, CompileOptions::default()),
//!     false,
//! );
//! while !orchestrator.tick(false) {
//!     // interleave other work; tick never blocks
//! }
//! ```

pub mod artifact;
pub mod cache;
pub mod catalog;
pub mod compiler;
pub mod config;
pub mod diagnostics;
pub mod ir;
pub mod lock;
pub mod logging;
pub mod packaging;
pub mod preload;
pub mod progress;
pub mod service;
pub mod signal;
pub mod worker;

/// Version of the modelkiln library and CLI.
///
/// Synchronized across all components in the workspace; injected at compile
/// time from the workspace manifest.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
