use std::time::Duration;

use crate::interrupt::Interrupt;
use crate::layout::DEFAULT_CAPACITY;

/// Longest single wait on a semaphore before re-checking liveness and the
/// interrupt.
pub(crate) const WAIT_SLICE: Duration = Duration::from_millis(10);

/// Tuning shared by sinks and sources.
#[derive(Debug, Clone)]
pub struct NodeOptions {
    /// Payload slots allocated by a sink. Ignored by sources.
    pub capacity: u32,
    /// How long `connect` keeps retrying before giving up.
    pub connect_timeout: Duration,
    /// How long the sink may wait on a reader before logging a stall.
    pub stall_warning: Duration,
    /// Cancels blocked handshake waits.
    pub interrupt: Interrupt,
}

impl Default for NodeOptions {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            connect_timeout: Duration::from_secs(5),
            stall_warning: Duration::from_secs(1),
            interrupt: Interrupt::new(),
        }
    }
}

impl NodeOptions {
    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }
}
