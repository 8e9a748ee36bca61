//! Drift-bounded iteration pacing.

use std::time::{Duration, Instant};

use framepipe_node::Interrupt;

/// Sleeps out the remainder of each iteration's period.
///
/// The reference point resets to "now" after every sleep rather than
/// advancing along an absolute schedule. Overruns are not paid back, so
/// under sustained load the long-run rate drifts below target; only the
/// length of each iteration is bounded.
#[derive(Debug)]
pub struct Pacer {
    period: Duration,
    tick: Instant,
    overruns: u64,
}

impl Pacer {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            tick: Instant::now(),
            overruns: 0,
        }
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Mark the start of the first iteration.
    pub fn reset(&mut self) {
        self.tick = Instant::now();
    }

    /// Sleep for `period - elapsed` and start the next iteration.
    ///
    /// Returns `false` if `interrupt` cut the sleep short.
    pub fn pace(&mut self, interrupt: &Interrupt) -> bool {
        let elapsed = self.tick.elapsed();
        let completed = match self.period.checked_sub(elapsed) {
            Some(remaining) if !remaining.is_zero() => interrupt.sleep(remaining),
            _ => {
                if !self.period.is_zero() {
                    self.overruns += 1;
                    tracing::trace!(
                        ?elapsed,
                        period = ?self.period,
                        "iteration overran its period"
                    );
                }
                !interrupt.is_triggered()
            }
        };
        self.tick = Instant::now();
        completed
    }

    /// Iterations that took longer than the period.
    pub fn overruns(&self) -> u64 {
        self.overruns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleeps_out_the_rest_of_the_period() {
        let interrupt = Interrupt::new();
        let mut pacer = Pacer::new(Duration::from_millis(50));
        pacer.reset();
        std::thread::sleep(Duration::from_millis(20));

        let start = Instant::now();
        assert!(pacer.pace(&interrupt));
        let slept = start.elapsed();
        assert!(slept >= Duration::from_millis(20), "slept {slept:?}");
        assert!(slept < Duration::from_millis(50) + Duration::from_millis(200));
        assert_eq!(pacer.overruns(), 0);
    }

    #[test]
    fn overrun_is_not_paid_back() {
        let interrupt = Interrupt::new();
        let mut pacer = Pacer::new(Duration::from_millis(10));
        pacer.reset();
        std::thread::sleep(Duration::from_millis(30));

        let start = Instant::now();
        assert!(pacer.pace(&interrupt));
        assert!(start.elapsed() < Duration::from_millis(10));
        assert_eq!(pacer.overruns(), 1);

        // The next iteration gets a full period again, not a shortened one.
        let start = Instant::now();
        assert!(pacer.pace(&interrupt));
        assert!(start.elapsed() >= Duration::from_millis(8));
    }

    #[test]
    fn unpaced_never_sleeps() {
        let interrupt = Interrupt::new();
        let mut pacer = Pacer::new(Duration::ZERO);
        let start = Instant::now();
        for _ in 0..100 {
            assert!(pacer.pace(&interrupt));
        }
        assert!(start.elapsed() < Duration::from_millis(100));
        assert_eq!(pacer.overruns(), 0);
    }

    #[test]
    fn interrupt_ends_the_sleep() {
        let interrupt = Interrupt::new();
        let mut pacer = Pacer::new(Duration::from_secs(10));
        let trigger = {
            let interrupt = interrupt.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20));
                interrupt.trigger();
            })
        };
        let start = Instant::now();
        assert!(!pacer.pace(&interrupt));
        assert!(start.elapsed() < Duration::from_secs(5));
        trigger.join().unwrap();
    }
}
