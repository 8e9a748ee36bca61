//! Sample envelopes: payload plus publish metadata.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Metadata written once by the sink for every publish.
///
/// Every reader of a given publish observes the same `SampleMeta`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleMeta {
    /// Monotonic sample index, starting at 0.
    pub index: u64,
    /// Nominal sampling period.
    pub period: Duration,
    /// Wall-clock publish time, as a duration since the UNIX epoch.
    pub timestamp: Duration,
}

impl SampleMeta {
    /// Nominal rate implied by the period, if the period is non-zero.
    pub fn rate_hz(&self) -> Option<f64> {
        (!self.period.is_zero()).then(|| 1.0 / self.period.as_secs_f64())
    }

    /// Time elapsed since the sample was published.
    pub fn age(&self) -> Duration {
        wall_clock().saturating_sub(self.timestamp)
    }
}

/// Read-only view of one published sample.
#[derive(Debug, Clone, Copy)]
pub struct Sample<'a> {
    meta: SampleMeta,
    payload: &'a [u8],
}

impl<'a> Sample<'a> {
    pub fn new(meta: SampleMeta, payload: &'a [u8]) -> Self {
        Self { meta, payload }
    }

    #[inline]
    pub fn meta(&self) -> &SampleMeta {
        &self.meta
    }

    #[inline]
    pub fn index(&self) -> u64 {
        self.meta.index
    }

    #[inline]
    pub fn payload(&self) -> &'a [u8] {
        self.payload
    }
}

pub(crate) fn wall_clock() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

pub(crate) fn duration_to_ns(d: Duration) -> u64 {
    d.as_nanos().min(u64::MAX as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_follows_period() {
        let meta = SampleMeta {
            index: 0,
            period: Duration::from_millis(100),
            timestamp: wall_clock(),
        };
        let rate = meta.rate_hz().unwrap();
        assert!((rate - 10.0).abs() < 1e-9);

        let unpaced = SampleMeta {
            period: Duration::ZERO,
            ..meta
        };
        assert_eq!(unpaced.rate_hz(), None);
    }

    #[test]
    fn future_timestamps_have_zero_age() {
        let meta = SampleMeta {
            index: 3,
            period: Duration::ZERO,
            timestamp: wall_clock() + Duration::from_secs(60),
        };
        assert_eq!(meta.age(), Duration::ZERO);
    }
}
