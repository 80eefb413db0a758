//! Progress reporting sink.
//!
//! Purely observational: the orchestrator pushes (completed, total) counts as
//! requests move through the pipeline and the sink renders them however it
//! likes. There is no back-pressure into the pipeline.

use tracing::info;

/// Receives progress updates for a batch of compile requests.
pub trait ProgressSink: Send + Sync {
    /// A batch began; `total` requests are outstanding.
    fn start(&self, total: usize);

    /// Progress changed.
    fn update(&self, completed: usize, total: usize);

    /// The batch ended (all requests completed or the batch was abandoned).
    fn cancel(&self);
}

/// Sink that drops all updates.
#[derive(Debug, Default, Clone)]
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn start(&self, _total: usize) {}
    fn update(&self, _completed: usize, _total: usize) {}
    fn cancel(&self) {}
}

/// Sink that logs updates through `tracing`.
#[derive(Debug, Default, Clone)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn start(&self, total: usize) {
        info!(total, "compilation batch started");
    }

    fn update(&self, completed: usize, total: usize) {
        info!(completed, total, "compilation progress");
    }

    fn cancel(&self) {
        info!("compilation batch finished");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Counting sink used to assert orchestrator behavior in module tests.
    #[derive(Default)]
    pub struct CountingSink {
        pub updates: AtomicUsize,
    }

    impl ProgressSink for CountingSink {
        fn start(&self, _total: usize) {}
        fn update(&self, _completed: usize, _total: usize) {
            self.updates.fetch_add(1, Ordering::Relaxed);
        }
        fn cancel(&self) {}
    }

    #[test]
    fn test_null_sink_accepts_calls() {
        let sink = NullProgressSink;
        sink.start(3);
        sink.update(1, 3);
        sink.cancel();
    }

    #[test]
    fn test_counting_sink_counts() {
        let sink = Arc::new(CountingSink::default());
        sink.update(0, 1);
        sink.update(1, 1);
        assert_eq!(sink.updates.load(Ordering::Relaxed), 2);
    }
}
