//! Compile requests and completion callbacks.
//!
//! A request is created at enqueue time and carries everything needed to
//! compile one asset: options, behavior flags, a lazily derived cache key and
//! a one-shot completion callback. The callback is moved out on invocation,
//! so invoking twice is a detectable programming error rather than a silent
//! double-notify — the exactly-once contract is load-bearing for callers.
//!
//! Requests compare by value (asset, options, flags), never by identity;
//! duplicate detection in the queue relies on this.

use super::options::CompileOptions;
use crate::cache::CacheKey;
use crate::catalog::{AssetId, SourceGraph};
use crate::diagnostics::CompileResult;
use tracing::error;

/// Flags delivered to the completion callback, exactly once per request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CompileCallbackParams {
    /// The request was rejected before the pipeline started.
    pub request_failed: bool,
    /// The request was skipped (already compiled, or not stale).
    pub skipped: bool,
    /// The asset has a compiled model installed after this request.
    pub compiled: bool,
    pub had_errors: bool,
    pub had_warnings: bool,
}

/// One-shot completion callback.
pub type CompileCallback = Box<dyn FnOnce(CompileCallbackParams) + Send>;

/// Lifecycle state of a request.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RequestState {
    #[default]
    Pending,
    InProgress,
    Completed,
}

/// A queued or in-flight compile request.
pub struct CompileRequest {
    pub asset: AssetId,
    pub options: CompileOptions,
    /// Asynchronous requests advance one pipeline stage per tick; a
    /// synchronous request runs each stage to completion within the tick
    /// that drives it.
    pub run_async: bool,
    pub skip_if_compiled: bool,
    pub skip_if_up_to_date: bool,
    pub state: RequestState,
    pub result: CompileResult,
    callback: Option<CompileCallback>,
    callback_invoked: bool,
    cache_key: Option<CacheKey>,
}

impl CompileRequest {
    pub fn new(asset: AssetId, options: CompileOptions) -> Self {
        Self {
            asset,
            options,
            run_async: true,
            skip_if_compiled: false,
            skip_if_up_to_date: false,
            state: RequestState::Pending,
            result: CompileResult::Unknown,
            callback: None,
            callback_invoked: false,
            cache_key: None,
        }
    }

    /// Runs every stage to completion within the driving tick.
    pub fn synchronous(mut self) -> Self {
        self.run_async = false;
        self
    }

    /// Resolves to a skipped callback if the asset already has a model.
    pub fn skip_if_compiled(mut self) -> Self {
        self.skip_if_compiled = true;
        self
    }

    /// Resolves to a skipped callback if the installed model still matches
    /// the current graph content.
    pub fn skip_if_up_to_date(mut self) -> Self {
        self.skip_if_up_to_date = true;
        self
    }

    /// Attaches the completion callback.
    pub fn with_callback(
        mut self,
        callback: impl FnOnce(CompileCallbackParams) + Send + 'static,
    ) -> Self {
        self.callback = Some(Box::new(callback));
        self
    }

    /// True for deployment-cook requests, which jump the queue.
    pub fn is_cook(&self) -> bool {
        self.options.deployment_cook
    }

    /// Value equality: two requests are equal when they would do the same
    /// work, regardless of callbacks or per-instance state.
    pub fn is_equivalent(&self, other: &Self) -> bool {
        self.asset == other.asset
            && self.options == other.options
            && self.run_async == other.run_async
            && self.skip_if_compiled == other.skip_if_compiled
            && self.skip_if_up_to_date == other.skip_if_up_to_date
    }

    /// Derives the cache key on first use and memoizes it.
    pub fn cache_key(&mut self, graph: &SourceGraph) -> CacheKey {
        *self
            .cache_key
            .get_or_insert_with(|| CacheKey::build(graph, &self.options))
    }

    /// Delivers the completion flags, exactly once.
    ///
    /// A second invocation is a programming error: it is logged and dropped,
    /// never forwarded.
    pub fn invoke_callback(&mut self, params: CompileCallbackParams) {
        self.state = RequestState::Completed;
        if self.callback_invoked {
            error!(asset = %self.asset, "compile request callback invoked twice; dropping");
            debug_assert!(false, "compile request callback invoked twice");
            return;
        }
        self.callback_invoked = true;
        if let Some(callback) = self.callback.take() {
            callback(params);
        }
    }
}

impl std::fmt::Debug for CompileRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompileRequest")
            .field("asset", &self.asset)
            .field("state", &self.state)
            .field("cook", &self.is_cook())
            .field("run_async", &self.run_async)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::SourceGraph;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn request() -> CompileRequest {
        CompileRequest::new(AssetId::new("hero"), CompileOptions::default())
    }

    #[test]
    fn test_equivalence_ignores_callback() {
        let plain = request();
        let with_callback = request().with_callback(|_| {});
        assert!(plain.is_equivalent(&with_callback));
    }

    #[test]
    fn test_equivalence_tracks_options_and_flags() {
        let base = request();

        let other_asset = CompileRequest::new(AssetId::new("villain"), CompileOptions::default());
        assert!(!base.is_equivalent(&other_asset));

        let sync = request().synchronous();
        assert!(!base.is_equivalent(&sync));

        let skipping = request().skip_if_compiled();
        assert!(!base.is_equivalent(&skipping));
    }

    #[test]
    fn test_callback_fires_once() {
        let count = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&count);
        let mut request = request().with_callback(move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        });

        request.invoke_callback(CompileCallbackParams::default());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(request.state, RequestState::Completed);
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn test_second_invocation_is_dropped() {
        let count = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&count);
        let mut request = request().with_callback(move |_| {
            counted.fetch_add(1, Ordering::SeqCst);
        });

        request.invoke_callback(CompileCallbackParams::default());
        request.invoke_callback(CompileCallbackParams::default());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_cache_key_is_memoized() {
        let graph = SourceGraph::new(1);
        let mut request = request();
        let first = request.cache_key(&graph);

        // Even with a different graph, the memoized key is returned; the key
        // is derived once when the request enters the pipeline.
        let mut edited = graph.clone();
        edited.version = 2;
        assert_eq!(first, request.cache_key(&edited));
    }

    #[test]
    fn test_callback_params_flags() {
        let mut request = request().with_callback(|params| {
            assert!(params.skipped);
            assert!(!params.request_failed);
        });
        request.invoke_callback(CompileCallbackParams {
            skipped: true,
            ..Default::default()
        });
    }
}
