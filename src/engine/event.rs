//! Completion events for cross-stream synchronization.

use std::sync::{Arc, Condvar, Mutex};

/// A one-shot completion marker recorded on one stream and waited on
/// from another stream or from the host.
///
/// Cloning shares the same underlying flag; the first `complete()` wakes
/// every waiter, and later waits return immediately.
#[derive(Debug, Clone)]
pub struct CompletionEvent {
    inner: Arc<EventInner>,
}

#[derive(Debug)]
struct EventInner {
    done: Mutex<bool>,
    cond: Condvar,
}

impl CompletionEvent {
    pub fn new() -> Self {
        CompletionEvent {
            inner: Arc::new(EventInner {
                done: Mutex::new(false),
                cond: Condvar::new(),
            }),
        }
    }

    /// Mark the event complete and wake all waiters. Idempotent.
    pub fn complete(&self) {
        let mut done = self.inner.done.lock().unwrap_or_else(|e| e.into_inner());
        *done = true;
        self.inner.cond.notify_all();
    }

    /// Block until the event has been completed.
    pub fn wait(&self) {
        let mut done = self.inner.done.lock().unwrap_or_else(|e| e.into_inner());
        while !*done {
            done = self
                .inner
                .cond
                .wait(done)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Non-blocking completion check.
    pub fn is_complete(&self) -> bool {
        *self.inner.done.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for CompletionEvent {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn starts_incomplete() {
        let ev = CompletionEvent::new();
        assert!(!ev.is_complete());
        ev.complete();
        assert!(ev.is_complete());
        // Waiting after completion returns immediately.
        ev.wait();
    }

    #[test]
    fn wakes_waiter_on_another_thread() {
        let ev = CompletionEvent::new();
        let ev2 = ev.clone();
        let waiter = thread::spawn(move || {
            ev2.wait();
            true
        });
        thread::sleep(Duration::from_millis(10));
        ev.complete();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn complete_is_idempotent() {
        let ev = CompletionEvent::new();
        ev.complete();
        ev.complete();
        assert!(ev.is_complete());
    }
}
