use std::time::Duration;

use framepipe_node::{Sample, SampleMeta};

/// Watches an input channel and keeps statistics about what arrives.
#[derive(Debug, Default)]
pub struct Monitor {
    received: u64,
    skipped: u64,
    last: Option<SampleMeta>,
    max_latency: Duration,
    history: Option<Vec<SampleMeta>>,
}

impl Monitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Also keep the metadata of every sample seen.
    pub fn with_history() -> Self {
        Self {
            history: Some(Vec::new()),
            ..Self::default()
        }
    }

    pub(crate) fn process(&mut self, inputs: &[Sample<'_>]) -> bool {
        for sample in inputs {
            let meta = *sample.meta();
            let latency = meta.age();
            if let Some(last) = self.last
                && meta.index > last.index + 1
            {
                self.skipped += meta.index - last.index - 1;
            }
            self.max_latency = self.max_latency.max(latency);
            self.received += 1;
            self.last = Some(meta);
            if let Some(history) = &mut self.history {
                history.push(meta);
            }
            tracing::debug!(
                index = meta.index,
                bytes = sample.payload().len(),
                latency_us = latency.as_micros() as u64,
                "sample received"
            );
        }
        false
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    /// Samples that were published between two received ones but never seen.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn last(&self) -> Option<&SampleMeta> {
        self.last.as_ref()
    }

    /// Longest publish-to-read delay observed.
    pub fn max_latency(&self) -> Duration {
        self.max_latency
    }

    /// Every sample seen, if created with [`Monitor::with_history`].
    pub fn history(&self) -> &[SampleMeta] {
        self.history.as_deref().unwrap_or(&[])
    }
}
