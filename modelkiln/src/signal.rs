//! One-shot completion signal shared between a background worker and the
//! polling controller.
//!
//! The orchestrator polls stages from its tick and must never block unless
//! explicitly asked to, so every offloaded stage exposes the same tiny
//! contract: `is_set` for polling, `wait` for the blocking path.

use std::sync::{Condvar, Mutex};

/// A latch that can be set exactly once and observed many times.
#[derive(Debug, Default)]
pub struct Completion {
    state: Mutex<bool>,
    condvar: Condvar,
}

impl Completion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the signal complete and wakes all waiters. Idempotent.
    pub fn set(&self) {
        let mut done = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *done = true;
        self.condvar.notify_all();
    }

    /// Non-blocking check.
    pub fn is_set(&self) -> bool {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Blocks the calling thread until the signal is set.
    pub fn wait(&self) {
        let mut done = self.state.lock().unwrap_or_else(|e| e.into_inner());
        while !*done {
            done = self.condvar.wait(done).unwrap_or_else(|e| e.into_inner());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_set_and_poll() {
        let signal = Completion::new();
        assert!(!signal.is_set());
        signal.set();
        assert!(signal.is_set());
        // Setting again is harmless.
        signal.set();
        assert!(signal.is_set());
    }

    #[test]
    fn test_wait_across_threads() {
        let signal = Arc::new(Completion::new());
        let setter = Arc::clone(&signal);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            setter.set();
        });

        signal.wait();
        assert!(signal.is_set());
        handle.join().unwrap();
    }

    #[test]
    fn test_wait_after_set_returns_immediately() {
        let signal = Completion::new();
        signal.set();
        signal.wait();
    }
}
