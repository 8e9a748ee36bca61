//! Parameters a stage needs before it can bind or connect channels.

use std::time::Duration;

use framepipe_node::{DEFAULT_CAPACITY, Interrupt, NodeOptions};

use crate::error::StageError;

/// Stage configuration.
///
/// A zero `period` runs the loop unpaced: sources then go as fast as their
/// inputs allow.
#[derive(Debug, Clone)]
pub struct StageConfig {
    /// Target time between iterations.
    pub period: Duration,
    /// Stop after this many iterations. `None` or `Some(0)` runs until
    /// shutdown or until an upstream channel closes.
    pub sample_limit: Option<u64>,
    /// Channels read every iteration.
    pub inputs: Vec<String>,
    /// Channel published every iteration, if the stage produces data.
    pub output: Option<String>,
    /// How long to wait for each input channel to appear.
    pub connect_timeout: Duration,
    /// Payload slots of the output channel.
    pub capacity: u32,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            period: Duration::ZERO,
            sample_limit: None,
            inputs: Vec::new(),
            output: None,
            connect_timeout: Duration::from_secs(5),
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl StageConfig {
    /// Configuration paced at `hz` iterations per second.
    pub fn from_rate(hz: f64) -> Result<Self, StageError> {
        Ok(Self {
            period: period_from_rate(hz)?,
            ..Self::default()
        })
    }

    pub fn with_input(mut self, name: impl Into<String>) -> Self {
        self.inputs.push(name.into());
        self
    }

    pub fn with_output(mut self, name: impl Into<String>) -> Self {
        self.output = Some(name.into());
        self
    }

    pub fn with_sample_limit(mut self, limit: u64) -> Self {
        self.sample_limit = Some(limit);
        self
    }

    /// The iteration ceiling, if there is one.
    pub fn effective_sample_limit(&self) -> Option<u64> {
        self.sample_limit.filter(|&limit| limit > 0)
    }

    /// Check the configuration before entering the connecting state.
    pub fn validate(&self) -> Result<(), StageError> {
        if self.inputs.is_empty() && self.output.is_none() {
            return Err(StageError::config("stage has neither inputs nor an output"));
        }
        if let Some(output) = &self.output
            && self.inputs.iter().any(|input| input == output)
        {
            return Err(StageError::config(format!(
                "channel `{output}` is both an input and the output"
            )));
        }
        Ok(())
    }

    /// Channel options carrying this stage's interrupt.
    pub fn node_options(&self, interrupt: &Interrupt) -> NodeOptions {
        NodeOptions::default()
            .with_capacity(self.capacity)
            .with_connect_timeout(self.connect_timeout)
            .with_interrupt(interrupt.clone())
    }
}

/// Period for a rate in Hz.
pub fn period_from_rate(hz: f64) -> Result<Duration, StageError> {
    if !hz.is_finite() || hz <= 0.0 {
        return Err(StageError::config(format!(
            "rate must be a positive number of samples per second, got {hz}"
        )));
    }
    Duration::try_from_secs_f64(1.0 / hz)
        .map_err(|e| StageError::config(format!("rate {hz} Hz: {e}")))
}
