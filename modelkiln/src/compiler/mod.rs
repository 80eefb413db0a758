//! The asynchronous compile pipeline.
//!
//! Everything request-shaped lives here: compile options, the request type
//! with its exactly-once completion callback, and the tick-driven
//! [`CompileOrchestrator`] that owns the queue and drives requests through
//! preload, cache fetch, compile and save. The leaf subsystems it
//! coordinates — lock table, cache client, planner, workers — live in their
//! own modules.

mod error;
mod options;
mod orchestrator;
mod request;

pub use error::RequestError;
pub use options::{
    BulkRepresentation, CompileOptions, OptimizationLevel, TargetPlatform, TextureTier,
};
pub use orchestrator::{CompileOrchestrator, FollowupQueue, FollowupTask, OrchestratorConfig};
pub use request::{CompileCallback, CompileCallbackParams, CompileRequest, RequestState};
