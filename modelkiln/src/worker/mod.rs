//! Background worker harnesses.
//!
//! Exactly two kinds of work leave the controlling thread: model compilation
//! and artifact saving. Each runs on its own dedicated OS thread, one per
//! in-flight request, never both alive for the same request. The
//! [`WorkerHandle`] is the reusable spawn harness: configurable stack size
//! (transform graphs recurse deeply), pollable completion, joined once the
//! orchestrator observes the worker finished.

mod compile;
mod save;

pub use compile::{
    spawn_compile_worker, CompileOutput, ModelCompiler, PayloadBlock, TransformCompiler,
};
pub use save::{spawn_save_worker, SaveOutput};

use crate::signal::Completion;
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use tracing::debug;

/// Counter giving each worker thread a unique name.
static WORKER_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Handle to one dedicated worker thread.
///
/// Poll with [`is_completed`](Self::is_completed) from the tick; once it
/// reports true, [`join`](Self::join) returns the result and releases the
/// thread. Dropping an unjoined handle detaches the thread.
pub struct WorkerHandle<T> {
    thread: Option<thread::JoinHandle<()>>,
    done: Arc<Completion>,
    slot: Arc<Mutex<Option<T>>>,
    name: String,
}

impl<T: Send + 'static> WorkerHandle<T> {
    /// Spawns `work` on a dedicated thread with the given stack size.
    pub fn spawn(
        name_prefix: &str,
        stack_size: usize,
        work: impl FnOnce() -> T + Send + 'static,
    ) -> io::Result<Self> {
        let id = WORKER_COUNTER.fetch_add(1, Ordering::Relaxed);
        let name = format!("{name_prefix}-{id:03}");

        let done = Arc::new(Completion::new());
        let slot = Arc::new(Mutex::new(None));

        // Completes the signal even if `work` panics, so the poll loop never
        // waits on a dead worker; the missing result surfaces from `join`.
        struct SetOnDrop(Arc<Completion>);
        impl Drop for SetOnDrop {
            fn drop(&mut self) {
                self.0.set();
            }
        }

        let thread_done = Arc::clone(&done);
        let thread_slot = Arc::clone(&slot);
        let thread = thread::Builder::new()
            .name(name.clone())
            .stack_size(stack_size)
            .spawn(move || {
                let _signal = SetOnDrop(thread_done);
                let result = work();
                *thread_slot.lock().unwrap_or_else(|e| e.into_inner()) = Some(result);
            })?;

        debug!(worker = %name, stack_size, "worker thread started");

        Ok(Self {
            thread: Some(thread),
            done,
            slot,
            name,
        })
    }

    /// Non-blocking completion check.
    pub fn is_completed(&self) -> bool {
        self.done.is_set()
    }

    /// Blocks until the worker finishes.
    pub fn wait(&self) {
        self.done.wait();
    }

    /// Joins the thread and returns the result.
    ///
    /// Returns `None` if the worker panicked before producing a result.
    pub fn join(mut self) -> Option<T> {
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        debug!(worker = %self.name, "worker thread joined");
        self.slot.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T> std::fmt::Debug for WorkerHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("name", &self.name)
            .field("completed", &self.done.is_set())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_worker_runs_and_returns() {
        let handle = WorkerHandle::spawn("test", 64 * 1024, || 40 + 2).unwrap();
        handle.wait();
        assert!(handle.is_completed());
        assert_eq!(handle.join(), Some(42));
    }

    #[test]
    fn test_worker_names_are_unique() {
        let a = WorkerHandle::spawn("test", 64 * 1024, || ()).unwrap();
        let b = WorkerHandle::spawn("test", 64 * 1024, || ()).unwrap();
        assert_ne!(a.name(), b.name());
        a.wait();
        b.wait();
    }

    #[test]
    fn test_poll_reports_in_flight() {
        let handle = WorkerHandle::spawn("test", 64 * 1024, || {
            thread::sleep(Duration::from_millis(20));
            7
        })
        .unwrap();
        // Freshly spawned with a sleep inside; almost certainly still running.
        let _ = handle.is_completed();
        handle.wait();
        assert!(handle.is_completed());
        assert_eq!(handle.join(), Some(7));
    }

    #[test]
    fn test_large_stack_supports_deep_recursion() {
        fn recurse(depth: u32) -> u32 {
            let _pad = [0u8; 512];
            if depth == 0 {
                0
            } else {
                1 + recurse(depth - 1)
            }
        }

        let handle = WorkerHandle::spawn("test", 16 * 1024 * 1024, || recurse(10_000)).unwrap();
        handle.wait();
        assert_eq!(handle.join(), Some(10_000));
    }
}
