//! Auto-reset exit event shared by the worker, the engine callbacks and the reader.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Default)]
struct EventState {
    signaled: Mutex<bool>,
    cond: Condvar,
}

/// A one-waiter event: [`set`](Self::set) wakes the waiter, a successful
/// [`wait`](Self::wait) resets it.
#[derive(Clone, Default)]
pub struct ExitEvent {
    inner: Arc<EventState>,
}

impl ExitEvent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        *self.inner.signaled.lock() = true;
        self.inner.cond.notify_all();
    }

    pub fn is_set(&self) -> bool {
        *self.inner.signaled.lock()
    }

    /// Wait until signaled, or until `timeout` elapses (`None` waits forever).
    /// Returns `false` on timeout.
    pub fn wait(&self, timeout: Option<Duration>) -> bool {
        // A timeout too large to express as an instant waits forever.
        let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));
        let mut signaled = self.inner.signaled.lock();
        while !*signaled {
            match deadline {
                Some(deadline) => {
                    if self.inner.cond.wait_until(&mut signaled, deadline).timed_out() {
                        break;
                    }
                }
                None => self.inner.cond.wait(&mut signaled),
            }
        }
        std::mem::replace(&mut *signaled, false)
    }
}

impl std::fmt::Debug for ExitEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExitEvent")
            .field("signaled", &self.is_set())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn wait_times_out() {
        let event = ExitEvent::new();
        let start = Instant::now();
        assert!(!event.wait(Some(Duration::from_millis(20))));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn set_before_wait_is_kept() {
        let event = ExitEvent::new();
        event.set();
        assert!(event.wait(Some(Duration::ZERO)));
        // Auto reset.
        assert!(!event.is_set());
        assert!(!event.wait(Some(Duration::ZERO)));
    }

    #[test]
    fn set_wakes_other_thread() {
        let event = ExitEvent::new();
        let waiter = {
            let event = event.clone();
            thread::spawn(move || event.wait(None))
        };
        thread::sleep(Duration::from_millis(10));
        event.set();
        assert!(waiter.join().unwrap());
    }

    #[test]
    fn huge_timeout_waits_for_set() {
        let event = ExitEvent::new();
        let setter = {
            let event = event.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                event.set();
            })
        };
        assert!(event.wait(Some(Duration::MAX)));
        setter.join().unwrap();
    }
}
