//! Cancellation flag with wake hooks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

type Waker = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct StopInner {
    stopped: AtomicBool,
    wakers: Mutex<Vec<Waker>>,
}

/// Cancellation signal shared between the operator and a running session.
///
/// `stop()` sets a flag the delivery path polls, then runs every registered
/// waker once so a source blocked in I/O can return. Cloning is cheap and all
/// clones observe the same flag.
///
/// # Example
///
/// ```
/// use media_fanout::source::StopSignal;
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::sync::Arc;
///
/// let stop = StopSignal::new();
/// let woken = Arc::new(AtomicBool::new(false));
/// let flag = woken.clone();
/// stop.on_stop(move || flag.store(true, Ordering::SeqCst));
///
/// stop.stop();
/// assert!(stop.is_stopped());
/// assert!(woken.load(Ordering::SeqCst));
/// ```
#[derive(Clone, Default)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

impl StopSignal {
    /// Creates a signal in the running state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` once `stop()` has been called.
    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// Sets the flag and runs the registered wakers. Idempotent.
    pub fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let wakers = std::mem::take(&mut *self.inner.wakers.lock());
        for wake in wakers {
            wake();
        }
    }

    /// Registers a waker. Runs it immediately if already stopped.
    pub fn on_stop<F>(&self, wake: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut wakers = self.inner.wakers.lock();
        if self.is_stopped() {
            drop(wakers);
            wake();
            return;
        }
        wakers.push(Box::new(wake));
    }
}

impl std::fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopSignal")
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}
