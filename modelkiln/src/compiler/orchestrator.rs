//! The compile orchestrator.
//!
//! A tick-driven, non-blocking state machine that owns the request queue and
//! drives exactly one request at a time through the pipeline:
//!
//! ```text
//! enqueue ─▶ queue ─▶ lock ─▶ cache phase 1 ─▶ cache phase 2 ─▶ complete
//!                      │           │ miss            │ miss
//!                      │           ▼                 ▼
//!                      └──▶ asset preload ─▶ compile ─▶ save ─▶ complete
//! ```
//!
//! The controlling thread calls [`tick`](CompileOrchestrator::tick)
//! repeatedly; each tick polls whichever asynchronous stage is outstanding
//! and advances on completion. "Not idle" just means "call tick again" —
//! nothing blocks unless `blocking` is passed, in which case outstanding
//! stages are waited for and the catalog's prerequisite indexing is forced to
//! finish synchronously.
//!
//! The pipeline stage is one tagged enum with exactly one payload per state;
//! the lock table is shared in from the owning service; completion callbacks
//! fire exactly once for every request, rejected ones included.

use super::error::RequestError;
use super::options::{BulkRepresentation, CompileOptions};
use super::request::{CompileCallbackParams, CompileRequest, RequestState};
use crate::artifact::{
    CompiledArtifact, ModelResources, StreamableBlock, StreamableIndex,
};
use crate::cache::{CacheBackend, CacheClient, CacheKey, ContentHash, FetchHandle, Phase1Outcome};
use crate::catalog::{AssetCatalog, AssetState, SourceGraph};
use crate::config::KilnConfig;
use crate::diagnostics::{CompileResult, Diagnostic, DiagnosticLog, Severity};
use crate::ir::{GraphCompiler, LowerContext};
use crate::lock::{LockTable, LockToken};
use crate::packaging;
use crate::preload::{AssetPreloader, PreloadHandle, ResidencyPreloader};
use crate::progress::{NullProgressSink, ProgressSink};
use crate::worker::{
    spawn_compile_worker, spawn_save_worker, CompileInput, CompileOutput, ModelCompiler,
    SaveOutput, TransformCompiler, WorkerHandle,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Orchestrator behavior knobs, usually derived from [`KilnConfig`].
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// When false, every enqueue fails immediately through the callback.
    pub allow_compilation: bool,
    /// Wall-clock budget per tick for same-thread follow-up tasks.
    pub followup_budget: Duration,
    /// Stack size for compile worker threads.
    pub worker_stack_size: usize,
    /// File budget per bucket under the count-limited planner policy.
    pub files_per_bucket: u32,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            allow_compilation: true,
            followup_budget: Duration::from_millis(crate::config::DEFAULT_FOLLOWUP_BUDGET_MS),
            worker_stack_size: 16 * 1024 * 1024,
            files_per_bucket: crate::config::DEFAULT_FILES_PER_BUCKET,
        }
    }
}

impl From<&KilnConfig> for OrchestratorConfig {
    fn from(config: &KilnConfig) -> Self {
        Self {
            allow_compilation: config.compiler.allow_compilation,
            followup_budget: Duration::from_millis(config.compiler.followup_budget_ms),
            worker_stack_size: config.compiler.worker_stack_mib * 1024 * 1024,
            files_per_bucket: config.packaging.files_per_bucket,
        }
    }
}

/// A closure that must run on the controlling thread.
pub type FollowupTask = Box<dyn FnOnce() + Send>;

/// Cross-thread queue of same-thread follow-up work.
///
/// Workers push closures; the orchestrator drains them each tick under a
/// fixed wall-clock budget so the controlling thread is never starved.
#[derive(Clone, Default)]
pub struct FollowupQueue {
    tasks: Arc<Mutex<VecDeque<FollowupTask>>>,
}

impl FollowupQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, task: impl FnOnce() + Send + 'static) {
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(Box::new(task));
    }

    fn pop(&self) -> Option<FollowupTask> {
        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
    }

    pub fn len(&self) -> usize {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The one outstanding asynchronous stage, with its payload.
enum PipelineStage {
    Idle,
    Preloading(PreloadHandle),
    CacheFetchPhase1(FetchHandle),
    CacheFetchPhase2(FetchHandle),
    Compiling(WorkerHandle<CompileOutput>),
    Saving(WorkerHandle<SaveOutput>),
}

impl PipelineStage {
    fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Preloading(_) => "preloading-assets",
            Self::CacheFetchPhase1(_) => "cache-fetch-phase-1",
            Self::CacheFetchPhase2(_) => "cache-fetch-phase-2",
            Self::Compiling(_) => "compiling",
            Self::Saving(_) => "saving",
        }
    }
}

/// State of the request currently in flight.
struct ActiveCompile {
    request: CompileRequest,
    /// Snapshot of the source graph taken under the lock.
    graph: SourceGraph,
    artifact: CompiledArtifact,
    log: DiagnosticLog,
    lock: Option<LockToken>,
    key: Option<CacheKey>,
    from_cache: bool,
    started: Instant,
    forced_result: Option<CompileResult>,
}

/// Tick-driven compile pipeline driver. See the module docs for the flow.
pub struct CompileOrchestrator {
    catalog: Arc<AssetCatalog>,
    locks: Arc<LockTable>,
    cache: CacheClient,
    preloader: Arc<dyn AssetPreloader>,
    progress: Arc<dyn ProgressSink>,
    graph_compiler: Arc<dyn GraphCompiler>,
    model_compiler: Arc<dyn ModelCompiler>,
    config: OrchestratorConfig,

    queue: VecDeque<CompileRequest>,
    stage: PipelineStage,
    active: Option<ActiveCompile>,
    followups: FollowupQueue,

    batch_total: usize,
    batch_completed: usize,
    progress_active: bool,
}

impl CompileOrchestrator {
    /// Creates an orchestrator with default collaborators. The lock table is
    /// shared in by the owning service so independent orchestrators exclude
    /// each other per asset.
    pub fn new(
        catalog: Arc<AssetCatalog>,
        locks: Arc<LockTable>,
        backend: Arc<dyn CacheBackend>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            catalog,
            locks,
            cache: CacheClient::new(backend),
            preloader: Arc::new(ResidencyPreloader::new()),
            progress: Arc::new(NullProgressSink),
            graph_compiler: Arc::new(crate::ir::DefaultGraphCompiler),
            model_compiler: Arc::new(TransformCompiler),
            config,
            queue: VecDeque::new(),
            stage: PipelineStage::Idle,
            active: None,
            followups: FollowupQueue::new(),
            batch_total: 0,
            batch_completed: 0,
            progress_active: false,
        }
    }

    pub fn with_preloader(mut self, preloader: Arc<dyn AssetPreloader>) -> Self {
        self.preloader = preloader;
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_graph_compiler(mut self, graph_compiler: Arc<dyn GraphCompiler>) -> Self {
        self.graph_compiler = graph_compiler;
        self
    }

    pub fn with_model_compiler(mut self, model_compiler: Arc<dyn ModelCompiler>) -> Self {
        self.model_compiler = model_compiler;
        self
    }

    /// Queue handle for workers that need to run closures on the controlling
    /// thread.
    pub fn followup_queue(&self) -> FollowupQueue {
        self.followups.clone()
    }

    /// Outstanding work: the in-flight request plus everything queued.
    pub fn num_remaining_work(&self) -> usize {
        usize::from(self.active.is_some()) + self.queue.len()
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_none() && self.queue.is_empty()
    }

    // -- Enqueue -----------------------------------------------------------

    /// Submits a request.
    ///
    /// Rejections and skips resolve immediately through the callback, never
    /// through a return value: missing asset, disallowed mode, or (unless
    /// `force_requeue`) an equal request already queued or in flight.
    pub fn enqueue_compile_request(&mut self, mut request: CompileRequest, force_requeue: bool) {
        let asset = request.asset.clone();

        if !self.catalog.contains(&asset) {
            warn!(error = %RequestError::MissingAsset(asset), "compile request rejected");
            request.invoke_callback(CompileCallbackParams {
                request_failed: true,
                ..Default::default()
            });
            return;
        }

        let compiled = self.catalog.is_compiled(&asset);

        if !self.config.allow_compilation {
            warn!(asset = %asset, error = %RequestError::CompilationDisabled, "compile request rejected");
            request.invoke_callback(CompileCallbackParams {
                request_failed: true,
                compiled,
                ..Default::default()
            });
            return;
        }

        if request.skip_if_compiled && compiled {
            request.invoke_callback(CompileCallbackParams {
                skipped: true,
                compiled,
                ..Default::default()
            });
            return;
        }

        if request.skip_if_up_to_date && !self.catalog.is_out_of_date(&asset) {
            request.invoke_callback(CompileCallbackParams {
                skipped: true,
                compiled,
                ..Default::default()
            });
            return;
        }

        if !force_requeue && (self.locks.is_locked(&asset) || self.is_request_queued(&request)) {
            warn!(error = %RequestError::DuplicateRequest(asset), "compile request rejected");
            request.invoke_callback(CompileCallbackParams {
                request_failed: true,
                compiled,
                ..Default::default()
            });
            return;
        }

        self.batch_total += 1;
        if self.progress_active {
            self.progress.update(self.batch_completed, self.batch_total);
        } else {
            self.progress.start(self.batch_total);
            self.progress_active = true;
        }

        debug!(asset = %request.asset, cook = request.is_cook(), "compile request queued");
        self.queue.push_back(request);
    }

    /// True if an equal request (by value) is queued or in flight.
    pub fn is_request_queued(&self, request: &CompileRequest) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| active.request.is_equivalent(request))
            || self.queue.iter().any(|queued| queued.is_equivalent(request))
    }

    /// Empties the pending queue. Every dropped request still gets its
    /// callback, flagged as failed; the in-flight request is unaffected.
    pub fn clear_compile_requests(&mut self) {
        while let Some(mut request) = self.queue.pop_front() {
            request.invoke_callback(CompileCallbackParams {
                request_failed: true,
                compiled: self.catalog.is_compiled(&request.asset),
                ..Default::default()
            });
            self.batch_completed += 1;
        }
        self.update_progress();
    }

    // -- Tick --------------------------------------------------------------

    /// Advances the pipeline. Returns true when fully idle.
    ///
    /// Non-blocking ticks poll the outstanding stage and return immediately.
    /// A blocking tick forces catalog indexing to finish, then drives stages
    /// to completion until idle — it returns early only when every queued
    /// request is stuck behind a still-loading asset.
    pub fn tick(&mut self, blocking: bool) -> bool {
        if !blocking {
            return self.tick_once(false);
        }

        loop {
            if self.tick_once(true) {
                return true;
            }
            if self.active.is_none() && !self.queue.is_empty() {
                // Every queued asset is mid-load; blocking cannot help.
                return false;
            }
        }
    }

    fn tick_once(&mut self, blocking: bool) -> bool {
        if blocking && self.catalog.is_indexing() {
            self.catalog.finish_indexing();
        }

        self.process_followup_tasks();

        if self.active.is_none() {
            self.try_pop_compile_request();
        }

        self.advance_stage(blocking);

        if self.active.is_some() && matches!(self.stage, PipelineStage::Idle) {
            self.complete_active_request();
        }

        self.is_idle()
    }

    /// Drains queued follow-up closures under the configured wall-clock
    /// budget.
    pub fn process_followup_tasks(&mut self) {
        let deadline = Instant::now() + self.config.followup_budget;
        while let Some(task) = self.followups.pop() {
            task();
            if Instant::now() >= deadline {
                break;
            }
        }
    }

    // -- Request selection -------------------------------------------------

    /// Scans the queue for the next eligible request and begins it.
    ///
    /// Cook-tagged entries are selected immediately wherever they sit,
    /// preserving the relative order of the rest; entries whose asset is
    /// mid-load are skipped in place; entries whose asset vanished are
    /// removed with a failed callback.
    fn try_pop_compile_request(&mut self) -> bool {
        if self.active.is_some() || self.queue.is_empty() {
            return false;
        }

        // Requests cannot start until prerequisite indexing has finished.
        if self.catalog.is_indexing() {
            return false;
        }

        let mut position = 0;
        while position < self.queue.len() {
            if self.catalog.contains(&self.queue[position].asset) {
                position += 1;
                continue;
            }
            if let Some(mut dropped) = self.queue.remove(position) {
                warn!(asset = %dropped.asset, "dropping request for vanished asset");
                dropped.invoke_callback(CompileCallbackParams {
                    request_failed: true,
                    ..Default::default()
                });
                self.batch_completed += 1;
            }
        }

        let mut chosen: Option<usize> = None;
        for (position, request) in self.queue.iter().enumerate() {
            if request.is_cook() {
                chosen = Some(position);
                break;
            }
            if chosen.is_none()
                && self.catalog.state(&request.asset) != Some(AssetState::Loading)
            {
                chosen = Some(position);
            }
        }

        let Some(position) = chosen else {
            return false;
        };
        let Some(request) = self.queue.remove(position) else {
            return false;
        };

        self.begin_compile(request);
        true
    }

    // -- Pipeline ----------------------------------------------------------

    fn begin_compile(&mut self, mut request: CompileRequest) {
        let asset = request.asset.clone();

        info!(
            asset = %asset,
            platform = request.options.target_platform.name(),
            optimization = ?request.options.optimization_level,
            cook = request.is_cook(),
            "compiling asset"
        );

        // The lock must be held before anything asynchronous starts; a held
        // lock fails the whole request, no requeue.
        let Some(token) = self.locks.try_lock(&asset) else {
            warn!(error = %RequestError::AlreadyLocked(asset.clone()), "compile request failed");
            self.fail_before_pipeline(request);
            return;
        };

        let Some(graph) = self.catalog.graph(&asset) else {
            self.locks.unlock(&asset, token);
            warn!(error = %RequestError::MissingAsset(asset), "compile request failed");
            self.fail_before_pipeline(request);
            return;
        };

        request.state = RequestState::InProgress;

        let query_cache = request.options.cache_query_enabled;
        let key = query_cache.then(|| request.cache_key(&graph));
        if let Some(key) = key {
            debug!(asset = %asset, key = %key, "querying compiled-data cache");
        }

        self.active = Some(ActiveCompile {
            request,
            graph,
            artifact: CompiledArtifact::new(),
            log: DiagnosticLog::new(),
            lock: Some(token),
            key,
            from_cache: false,
            started: Instant::now(),
            forced_result: None,
        });

        self.stage = match key {
            Some(key) => PipelineStage::CacheFetchPhase1(self.cache.begin_phase1(&key)),
            None => self.start_preload(),
        };
    }

    fn start_preload(&mut self) -> PipelineStage {
        let Some(active) = self.active.as_ref() else {
            return PipelineStage::Idle;
        };
        let paths = active.graph.referenced_paths();
        debug!(asset = %active.request.asset, packages = paths.len(), "preloading referenced packages");
        PipelineStage::Preloading(self.preloader.request_async_load(paths))
    }

    fn advance_stage(&mut self, blocking: bool) {
        // A synchronous request runs each stage to completion within the
        // tick that drives it.
        let blocking = blocking
            || self
                .active
                .as_ref()
                .is_some_and(|active| !active.request.run_async);

        let stage = std::mem::replace(&mut self.stage, PipelineStage::Idle);
        self.stage = match stage {
            PipelineStage::Idle => PipelineStage::Idle,

            PipelineStage::Preloading(handle) => {
                if blocking {
                    handle.wait();
                }
                if handle.is_active() {
                    PipelineStage::Preloading(handle)
                } else {
                    self.finish_preload()
                }
            }

            PipelineStage::CacheFetchPhase1(mut handle) => {
                if blocking {
                    handle.wait();
                }
                if handle.is_completed() {
                    self.finish_cache_phase1(handle)
                } else {
                    PipelineStage::CacheFetchPhase1(handle)
                }
            }

            PipelineStage::CacheFetchPhase2(mut handle) => {
                if blocking {
                    handle.wait();
                }
                if handle.is_completed() {
                    self.finish_cache_phase2(handle)
                } else {
                    PipelineStage::CacheFetchPhase2(handle)
                }
            }

            PipelineStage::Compiling(handle) => {
                if blocking {
                    handle.wait();
                }
                if handle.is_completed() {
                    self.finish_compile(handle)
                } else {
                    PipelineStage::Compiling(handle)
                }
            }

            PipelineStage::Saving(handle) => {
                if blocking {
                    handle.wait();
                }
                if handle.is_completed() {
                    self.finish_save(handle)
                } else {
                    PipelineStage::Saving(handle)
                }
            }
        };
    }

    fn finish_cache_phase1(&mut self, mut handle: FetchHandle) -> PipelineStage {
        let Some(key) = self.active.as_ref().and_then(|active| active.key) else {
            return PipelineStage::Idle;
        };

        match self.cache.finish_phase1(&mut handle, &key) {
            Phase1Outcome::Hit(descriptors) => {
                let deployment_cook = {
                    let Some(active) = self.active.as_mut() else {
                        return PipelineStage::Idle;
                    };
                    active.artifact.model = Some(descriptors.model);
                    active.artifact.resources = Some(descriptors.resources);
                    active.artifact.index = descriptors.index;
                    active.artifact.files = descriptors.files;
                    active.request.options.deployment_cook
                };

                if deployment_cook {
                    // Cooks need every payload resident; pull them all.
                    PipelineStage::CacheFetchPhase2(self.cache.begin_phase2(&key))
                } else {
                    if let Some(active) = self.active.as_mut() {
                        active.from_cache = true;
                    }
                    info!(key = %key, "compiled data loaded from cache");
                    PipelineStage::Idle
                }
            }
            Phase1Outcome::Miss => self.start_preload(),
        }
    }

    fn finish_cache_phase2(&mut self, mut handle: FetchHandle) -> PipelineStage {
        let Some(key) = self.active.as_ref().and_then(|active| active.key) else {
            return PipelineStage::Idle;
        };

        // Split the artifact pieces out so the client can demux into the
        // payload store using the file table as the map.
        let (files, mut payloads) = match self.active.as_mut() {
            Some(active) => (
                std::mem::take(&mut active.artifact.files),
                std::mem::take(&mut active.artifact.payloads),
            ),
            None => return PipelineStage::Idle,
        };

        let ok = self
            .cache
            .finish_phase2(&mut handle, &key, &files, &mut payloads);

        {
            let Some(active) = self.active.as_mut() else {
                return PipelineStage::Idle;
            };
            active.artifact.files = files;
            active.artifact.payloads = payloads;

            if ok {
                // Regenerate the file plan from the now-complete index for
                // the requested representation.
                let options = active.request.options.clone();
                active.artifact.files = plan_files(
                    &mut active.artifact.index,
                    &options,
                    self.config.files_per_bucket,
                );
                active.from_cache = true;
                info!(key = %key, "compiled data and payloads loaded from cache");
                return PipelineStage::Idle;
            }

            // Payload fetch failed; discard the phase-1 data and compile
            // from source.
            active.artifact = CompiledArtifact::new();
        }
        self.start_preload()
    }

    fn finish_preload(&mut self) -> PipelineStage {
        let (ir, referenced_assets) = {
            let Some(active) = self.active.as_mut() else {
                return PipelineStage::Idle;
            };

            let mut ctx = LowerContext::new(active.request.options.gather_references_enabled);
            let ir = self.graph_compiler.lower(&active.graph, &mut ctx);
            active.log.extend(ctx.diagnostics.into_messages());
            (ir, ctx.referenced_assets)
        };

        let Some(active) = self.active.as_mut() else {
            return PipelineStage::Idle;
        };

        let Some(ir) = ir else {
            if active.log.error_count() == 0 {
                active
                    .log
                    .add(Diagnostic::error("failed to lower the source graph"));
            }
            return PipelineStage::Idle;
        };

        let input = CompileInput {
            ir,
            referenced_assets,
            options: active.request.options.clone(),
        };

        match spawn_compile_worker(
            Arc::clone(&self.model_compiler),
            input,
            self.config.worker_stack_size,
        ) {
            Ok(handle) => {
                debug!(asset = %active.request.asset, worker = handle.name(), "compile worker started");
                PipelineStage::Compiling(handle)
            }
            Err(error) => {
                active
                    .log
                    .add(Diagnostic::error(format!("failed to start compile worker: {error}")));
                PipelineStage::Idle
            }
        }
    }

    fn finish_compile(&mut self, handle: WorkerHandle<CompileOutput>) -> PipelineStage {
        let output = handle.join();

        let Some(active) = self.active.as_mut() else {
            return PipelineStage::Idle;
        };

        let Some(output) = output else {
            active
                .log
                .add(Diagnostic::error("compile worker terminated unexpectedly"));
            return PipelineStage::Idle;
        };

        active.log.extend(output.diagnostics);

        let Some(model) = output.model else {
            if active.log.error_count() == 0 {
                active
                    .log
                    .add(Diagnostic::error("compilation produced no model"));
            }
            return PipelineStage::Idle;
        };

        let options = active.request.options.clone();

        // Index the streamed payloads: ids per kind in emission order,
        // offsets cumulative into a single logical file until planning
        // redistributes them.
        let mut index = StreamableIndex::new();
        let mut next_id = std::collections::BTreeMap::new();
        let mut offset = 0u64;
        for block in output.payload_blocks {
            let id = next_id.entry(block.data_kind).or_insert(0u32);
            index.insert(StreamableBlock {
                id: *id,
                data_kind: block.data_kind,
                source_id: block.source_id,
                file_id: 0,
                offset,
                size: block.bytes.len() as u32,
                flags: block.flags,
            });
            offset += block.bytes.len() as u64;
            active.artifact.payloads.set(block.data_kind, *id, block.bytes);
            *id += 1;
        }
        active.artifact.index = index;

        let mut resources = ModelResources::new();
        resources.referenced_assets = output.referenced_assets;
        resources.surfaces = output.surfaces;
        for block in active.artifact.index.iter() {
            let component = match block.data_kind {
                crate::artifact::DataKind::Geometry => "geometry",
                crate::artifact::DataKind::Texture => "texture",
                crate::artifact::DataKind::Attachment => "attachment",
            };
            let count = resources
                .streamed_lod_counts
                .entry(component.to_string())
                .or_insert(0);
            *count = count.saturating_add(1);
        }
        resources.optimized =
            options.optimization_level == super::options::OptimizationLevel::Maximum;
        resources.hd_textures = options.texture_tier == super::options::TextureTier::HighQuality;
        active.artifact.resources = Some(resources);
        active.artifact.model = Some(model);

        active.artifact.files = plan_files(
            &mut active.artifact.index,
            &options,
            self.config.files_per_bucket,
        );

        // Hand the artifact to the save worker; it comes back on join.
        let cache_destination = if options.cache_store_enabled {
            let key = active
                .key
                .unwrap_or_else(|| active.request.cache_key(&active.graph));
            active.key = Some(key);
            Some((self.cache.clone(), key))
        } else {
            None
        };

        let artifact = std::mem::take(&mut active.artifact);
        match spawn_save_worker(artifact, cache_destination) {
            Ok(handle) => {
                debug!(asset = %active.request.asset, worker = handle.name(), "save worker started");
                PipelineStage::Saving(handle)
            }
            Err(error) => {
                active
                    .log
                    .add(Diagnostic::error(format!("failed to start save worker: {error}")));
                PipelineStage::Idle
            }
        }
    }

    fn finish_save(&mut self, handle: WorkerHandle<SaveOutput>) -> PipelineStage {
        let output = handle.join();

        let Some(active) = self.active.as_mut() else {
            return PipelineStage::Idle;
        };

        match output {
            Some(output) => {
                // A failed cache store was already logged by the worker and
                // never fails the request.
                active.artifact = output.artifact;
            }
            None => {
                active
                    .log
                    .add(Diagnostic::error("save worker terminated unexpectedly"));
            }
        }

        PipelineStage::Idle
    }

    // -- Completion --------------------------------------------------------

    fn fail_before_pipeline(&mut self, mut request: CompileRequest) {
        request.invoke_callback(CompileCallbackParams {
            request_failed: true,
            compiled: self.catalog.is_compiled(&request.asset),
            ..Default::default()
        });
        self.batch_completed += 1;
        self.update_progress();
    }

    fn complete_active_request(&mut self) {
        let Some(mut active) = self.active.take() else {
            return;
        };

        let result = active.forced_result.unwrap_or_else(|| active.log.result());
        let asset = active.request.asset.clone();
        let options = active.request.options.clone();

        if let Some(token) = active.lock.take() {
            self.locks.unlock(&asset, token);
        }

        // Commit on success, discard otherwise.
        if result.is_usable() && active.artifact.is_complete() {
            let graph_hash = ContentHash::from_bytes(&active.graph.canonical_bytes());
            if options.deployment_cook {
                self.catalog.stash_cooked(
                    &asset,
                    options.target_platform.name(),
                    std::mem::take(&mut active.artifact),
                );
            } else {
                let artifact = std::mem::take(&mut active.artifact);
                let model = artifact.model.unwrap_or_default();
                let resources = artifact.resources.unwrap_or_default();
                self.catalog
                    .install(&asset, Arc::new(model), Arc::new(resources), graph_hash);
            }
        } else if !options.deployment_cook && result == CompileResult::Errors {
            self.catalog.clear_installed(&asset);
        }

        for diagnostic in active.log.messages() {
            match diagnostic.severity {
                Severity::Error => error!(asset = %asset, "{diagnostic}"),
                Severity::Warning => warn!(asset = %asset, "{diagnostic}"),
                Severity::Info => info!(asset = %asset, "{diagnostic}"),
            }
        }

        info!(
            asset = %asset,
            result = %result,
            warnings = active.log.warning_count(),
            errors = active.log.error_count(),
            from_cache = active.from_cache,
            elapsed_ms = active.started.elapsed().as_millis(),
            "finished compiling asset"
        );

        active.request.result = result;
        active.request.invoke_callback(CompileCallbackParams {
            request_failed: false,
            skipped: false,
            compiled: self.catalog.is_compiled(&asset),
            had_errors: result == CompileResult::Errors,
            had_warnings: result == CompileResult::Warnings,
        });

        self.batch_completed += 1;
        self.update_progress();
    }

    fn update_progress(&mut self) {
        if !self.progress_active {
            return;
        }
        self.progress.update(self.batch_completed, self.batch_total);
        if self.batch_completed >= self.batch_total && self.is_idle() {
            self.progress.cancel();
            self.progress_active = false;
            self.batch_total = 0;
            self.batch_completed = 0;
        }
    }

    // -- Forced completion -------------------------------------------------

    /// Aborts the in-flight request as fast as the pipeline allows.
    ///
    /// An outstanding preload or cache fetch is cancelled outright. A
    /// running worker cannot be interrupted mid-transform: the follow-up
    /// pump spins until it reports completion, then the thread is joined.
    /// Either way the request completes as an error.
    pub fn force_finish_compilation(&mut self) {
        let stage = std::mem::replace(&mut self.stage, PipelineStage::Idle);
        let stage_name = stage.name();

        match stage {
            PipelineStage::Idle => {}
            PipelineStage::Preloading(handle) => handle.cancel(),
            PipelineStage::CacheFetchPhase1(handle) | PipelineStage::CacheFetchPhase2(handle) => {
                handle.cancel();
            }
            PipelineStage::Compiling(handle) => {
                // Compilation posts follow-up tasks; keep the pump alive
                // while waiting.
                while !handle.is_completed() {
                    self.process_followup_tasks();
                    std::thread::yield_now();
                }
                let _ = handle.join();
            }
            PipelineStage::Saving(handle) => {
                handle.wait();
                let _ = handle.join();
            }
        }

        if self.active.is_some() {
            info!(stage = stage_name, "compilation force-finished");
            if let Some(active) = self.active.as_mut() {
                active.forced_result = Some(CompileResult::Errors);
            }
            self.complete_active_request();
        }
    }
}

/// Runs the planner policy selected by the options.
fn plan_files(
    index: &mut StreamableIndex,
    options: &CompileOptions,
    files_per_bucket: u32,
) -> Vec<crate::artifact::StreamFile> {
    match options.bulk_representation {
        BulkRepresentation::SingleArchive => packaging::plan_count_limited(index, files_per_bucket),
        BulkRepresentation::ChunkedFiles => {
            packaging::plan_size_limited(index, options.packaged_file_byte_limit)
        }
    }
}
