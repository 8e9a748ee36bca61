//! Futex wrappers for words that live in shared memory.
//!
//! The operations deliberately omit `FUTEX_PRIVATE_FLAG`: the kernel keys
//! shared futexes on the backing object and offset, so a waiter in one
//! process is woken by a `futex_wake` issued from another process that maps
//! the same segment at a different address.
//!
//! On platforms without futexes the wait degrades to a short sleep and the
//! wake is a no-op. Callers always re-check their condition in a loop, so
//! this only costs latency.

use core::sync::atomic::AtomicU32;
use core::time::Duration;

/// Why a [`futex_wait`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Another thread or process issued a wake.
    Woken,
    /// The word did not hold the expected value when the wait started.
    ValueChanged,
    /// The timeout elapsed.
    TimedOut,
    /// A signal interrupted the wait.
    Interrupted,
}

/// Block while `*word == expected`, for at most `timeout`.
#[cfg(target_os = "linux")]
pub fn futex_wait(word: &AtomicU32, expected: u32, timeout: Option<Duration>) -> WaitOutcome {
    let ts = timeout.map(|t| libc::timespec {
        tv_sec: t.as_secs().min(libc::time_t::MAX as u64) as libc::time_t,
        tv_nsec: t.subsec_nanos() as libc::c_long,
    });
    let ts_ptr = ts
        .as_ref()
        .map_or(core::ptr::null(), |ts| ts as *const libc::timespec);

    // SAFETY: word is a valid, aligned u32 for the duration of the call.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            libc::FUTEX_WAIT,
            expected,
            ts_ptr,
            core::ptr::null::<u32>(),
            0u32,
        )
    };

    if rc == 0 {
        return WaitOutcome::Woken;
    }
    match std::io::Error::last_os_error().raw_os_error() {
        Some(libc::EAGAIN) => WaitOutcome::ValueChanged,
        Some(libc::ETIMEDOUT) => WaitOutcome::TimedOut,
        Some(libc::EINTR) => WaitOutcome::Interrupted,
        other => {
            tracing::trace!(errno = ?other, "futex wait failed");
            WaitOutcome::Interrupted
        }
    }
}

/// Wake up to `count` waiters blocked on `word`. Returns how many were woken.
#[cfg(target_os = "linux")]
pub fn futex_wake(word: &AtomicU32, count: u32) -> usize {
    let count = count.min(i32::MAX as u32);
    // SAFETY: word is a valid, aligned u32 for the duration of the call.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            libc::FUTEX_WAKE,
            count,
            core::ptr::null::<libc::timespec>(),
            core::ptr::null::<u32>(),
            0u32,
        )
    };
    if rc < 0 { 0 } else { rc as usize }
}

#[cfg(not(target_os = "linux"))]
pub fn futex_wait(word: &AtomicU32, expected: u32, timeout: Option<Duration>) -> WaitOutcome {
    use core::sync::atomic::Ordering;

    if word.load(Ordering::Acquire) != expected {
        return WaitOutcome::ValueChanged;
    }
    let nap = Duration::from_millis(1);
    std::thread::sleep(timeout.map_or(nap, |t| t.min(nap)));
    WaitOutcome::TimedOut
}

#[cfg(not(target_os = "linux"))]
pub fn futex_wake(_word: &AtomicU32, _count: u32) -> usize {
    0
}
