//! Cooperative cancellation shared by every blocking wait in a stage.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// A clonable shutdown flag.
///
/// Handshake waits poll it between wait slices; pacing sleeps park on its
/// condition variable so [`Interrupt::trigger`] ends them immediately.
#[derive(Clone, Default)]
pub struct Interrupt {
    inner: Arc<InterruptInner>,
}

#[derive(Default)]
struct InterruptInner {
    triggered: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        self.inner.triggered.store(true, Ordering::Release);
        let _guard = self.inner.lock.lock();
        self.inner.cond.notify_all();
    }

    #[inline]
    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::Acquire)
    }

    /// Sleep for `duration` unless triggered first.
    ///
    /// Returns `true` if the full duration elapsed, `false` if interrupted.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let mut guard = self.inner.lock.lock();
        loop {
            if self.is_triggered() {
                return false;
            }
            if self.inner.cond.wait_until(&mut guard, deadline).timed_out() {
                return !self.is_triggered();
            }
        }
    }
}

impl fmt::Debug for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interrupt")
            .field("triggered", &self.is_triggered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_runs_to_completion_when_untriggered() {
        let interrupt = Interrupt::new();
        let start = Instant::now();
        assert!(interrupt.sleep(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn trigger_cuts_sleep_short() {
        let interrupt = Interrupt::new();
        let sleeper = {
            let interrupt = interrupt.clone();
            std::thread::spawn(move || {
                let start = Instant::now();
                let completed = interrupt.sleep(Duration::from_secs(10));
                (completed, start.elapsed())
            })
        };
        std::thread::sleep(Duration::from_millis(20));
        interrupt.trigger();
        let (completed, slept) = sleeper.join().unwrap();
        assert!(!completed);
        assert!(slept < Duration::from_secs(5));
        assert!(interrupt.is_triggered());
    }

    #[test]
    fn triggered_interrupt_never_sleeps() {
        let interrupt = Interrupt::new();
        interrupt.trigger();
        assert!(!interrupt.sleep(Duration::from_secs(10)));
    }
}
