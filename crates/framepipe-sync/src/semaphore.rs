use crate::sync::{AtomicU32, Ordering};

/// A counting semaphore that can live in shared memory.
///
/// The whole state is two `u32` words, so a semaphore can be embedded in a
/// `repr(C)` header and used by every process that maps it. `count` doubles
/// as the futex word: waiters sleep while it is zero and posters wake them.
///
/// `waiters` lets [`ShmSemaphore::post`] skip the wake syscall when nobody is
/// sleeping. Both sides use `SeqCst` on the pair of words so that either the
/// poster sees the waiter or the waiter sees the permit.
#[repr(C)]
pub struct ShmSemaphore {
    count: AtomicU32,
    waiters: AtomicU32,
}

#[cfg(not(feature = "loom"))]
const _: () = assert!(core::mem::size_of::<ShmSemaphore>() == 8);

impl ShmSemaphore {
    /// Create a semaphore holding `permits`.
    pub fn new(permits: u32) -> Self {
        Self {
            count: AtomicU32::new(permits),
            waiters: AtomicU32::new(0),
        }
    }

    /// Reset in place. Only valid before the segment is shared.
    pub fn init(&mut self, permits: u32) {
        self.count = AtomicU32::new(permits);
        self.waiters = AtomicU32::new(0);
    }

    /// Current number of permits (a snapshot).
    #[inline]
    pub fn permits(&self) -> u32 {
        self.count.load(Ordering::Acquire)
    }

    /// Add one permit and wake a sleeper if there is one.
    pub fn post(&self) {
        self.count.fetch_add(1, Ordering::SeqCst);
        if self.waiters.load(Ordering::SeqCst) > 0 {
            self.wake_all();
        }
    }

    /// Take a permit if one is available.
    pub fn try_wait(&self) -> bool {
        let mut current = self.count.load(Ordering::Acquire);
        while current > 0 {
            match self.count.compare_exchange_weak(
                current,
                current - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
        false
    }

    /// Take every available permit, returning how many were taken.
    pub fn drain(&self) -> u32 {
        self.count.swap(0, Ordering::AcqRel)
    }

    /// Wait up to `timeout` for a permit. Returns `true` if one was taken.
    #[cfg(all(feature = "std", not(feature = "loom")))]
    pub fn wait_timeout(&self, timeout: core::time::Duration) -> bool {
        use crate::futex::futex_wait;
        use std::time::Instant;

        if self.try_wait() {
            return true;
        }

        let deadline = Instant::now() + timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                return self.try_wait();
            }

            self.waiters.fetch_add(1, Ordering::SeqCst);
            if self.count.load(Ordering::SeqCst) == 0 {
                futex_wait(&self.count, 0, Some(deadline - now));
            }
            self.waiters.fetch_sub(1, Ordering::SeqCst);

            if self.try_wait() {
                return true;
            }
        }
    }

    #[cfg(all(feature = "std", not(feature = "loom")))]
    fn wake_all(&self) {
        crate::futex::futex_wake(&self.count, u32::MAX);
    }

    #[cfg(not(all(feature = "std", not(feature = "loom"))))]
    fn wake_all(&self) {}
}

impl core::fmt::Debug for ShmSemaphore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ShmSemaphore")
            .field("permits", &self.count.load(Ordering::Relaxed))
            .field("waiters", &self.waiters.load(Ordering::Relaxed))
            .finish()
    }
}
