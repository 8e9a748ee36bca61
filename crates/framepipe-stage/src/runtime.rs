//! The loop every stage runs around its channels.

use std::fmt;
use std::time::Duration;

use framepipe_node::{Geometry, Interrupt, NodeError, NodeSink, NodeSource, ReadGuard, Sample};

use crate::body::StageBody;
use crate::config::StageConfig;
use crate::error::StageError;
use crate::pacer::Pacer;

/// Lifecycle of a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Configuring,
    Connecting,
    Running,
    Draining,
    Terminated,
}

/// Why a stage stopped running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The configured sample limit was reached.
    SampleLimit,
    /// An input channel's sink went away.
    UpstreamClosed,
    /// The interrupt was triggered.
    Shutdown,
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EndReason::SampleLimit => "sample limit reached",
            EndReason::UpstreamClosed => "upstream closed",
            EndReason::Shutdown => "shutdown requested",
        })
    }
}

/// Outcome of one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Continue,
    Finished(EndReason),
}

/// What a finished run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub iterations: u64,
    pub published: u64,
    pub end: EndReason,
}

/// One pipeline stage: a body plus the channels it reads and writes.
pub struct Stage {
    config: StageConfig,
    body: StageBody,
    interrupt: Interrupt,
    state: StageState,
    sources: Vec<NodeSource>,
    sink: NodeSink,
    pacer: Pacer,
    iterations: u64,
    published: u64,
}

impl Stage {
    pub fn new(config: StageConfig, body: impl Into<StageBody>) -> Self {
        let interrupt = Interrupt::new();
        Self {
            sink: NodeSink::with_options(config.node_options(&interrupt)),
            pacer: Pacer::new(config.period),
            config,
            body: body.into(),
            interrupt,
            state: StageState::Configuring,
            sources: Vec::new(),
            iterations: 0,
            published: 0,
        }
    }

    /// Use `interrupt` for shutdown instead of the stage's own token.
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.sink = NodeSink::with_options(self.config.node_options(&interrupt));
        self.interrupt = interrupt;
        self
    }

    pub fn state(&self) -> StageState {
        self.state
    }

    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    pub fn body(&self) -> &StageBody {
        &self.body
    }

    pub fn config(&self) -> &StageConfig {
        &self.config
    }

    /// Connect every input channel, then bind the output channel.
    pub fn connect(&mut self) -> Result<(), StageError> {
        if self.state != StageState::Configuring {
            return Err(StageError::config(format!(
                "cannot connect a stage that is {:?}",
                self.state
            )));
        }
        self.config.validate()?;
        let wanted = self.body.input_count();
        if self.config.inputs.len() != wanted {
            return Err(StageError::config(format!(
                "{} stage reads {wanted} input channel(s), {} configured",
                self.body.name(),
                self.config.inputs.len()
            )));
        }
        match (&self.config.output, self.body.produces_output()) {
            (Some(output), false) => {
                return Err(StageError::config(format!(
                    "{} stage produces no output, but output `{output}` is configured",
                    self.body.name()
                )));
            }
            (None, true) => {
                return Err(StageError::config(format!(
                    "{} stage needs an output channel",
                    self.body.name()
                )));
            }
            _ => {}
        }
        self.state = StageState::Connecting;

        let options = self.config.node_options(&self.interrupt);
        for input in &self.config.inputs {
            let source = NodeSource::connect_with(input, None, &options)?;
            self.sources.push(source);
        }

        if let Some(output) = &self.config.output {
            let input_geometries: Vec<Geometry> =
                self.sources.iter().map(|s| s.geometry()).collect();
            let geometry = self
                .body
                .output_geometry(&input_geometries)
                .ok_or_else(|| StageError::config("output geometry is unknown"))?;
            let period = if self.config.period.is_zero() {
                self.sources.first().map_or(Duration::ZERO, |s| s.period())
            } else {
                self.config.period
            };
            self.sink.bind(output, geometry, period)?;
        }

        tracing::info!(
            body = self.body.name(),
            inputs = ?self.config.inputs,
            output = ?self.config.output,
            "stage connected"
        );
        self.state = StageState::Running;
        Ok(())
    }

    /// Run one iteration: read every input, let the body transform them
    /// into the output, release everything.
    pub fn step(&mut self) -> Result<Status, StageError> {
        if self.state != StageState::Running {
            return Err(StageError::config(format!(
                "cannot step a stage that is {:?}",
                self.state
            )));
        }
        if self.interrupt.is_triggered() {
            return Ok(Status::Finished(EndReason::Shutdown));
        }

        let mut guards: Vec<ReadGuard<'_>> = Vec::with_capacity(self.sources.len());
        for source in &mut self.sources {
            match source.acquire_for_read() {
                Ok(guard) => guards.push(guard),
                Err(e) => return finish_on(e),
            }
        }
        let samples: Vec<Sample<'_>> = guards.iter().map(|g| g.sample()).collect();

        let produced = if self.sink.is_bound() {
            let mut write = match self.sink.reserve_for_write() {
                Ok(write) => write,
                Err(e) => return finish_on(e),
            };
            let produced = self.body.process(&samples, Some(write.payload_mut()))?;
            if produced {
                let meta = write.publish();
                tracing::trace!(index = meta.index, "stage published");
            }
            produced
        } else {
            self.body.process(&samples, None)?
        };

        drop(samples);
        drop(guards);

        self.iterations += 1;
        if produced {
            self.published += 1;
        }
        if self
            .config
            .effective_sample_limit()
            .is_some_and(|limit| self.iterations >= limit)
        {
            return Ok(Status::Finished(EndReason::SampleLimit));
        }
        Ok(Status::Continue)
    }

    /// Connect if needed, iterate until finished, then drain.
    ///
    /// Channels are released on every exit path, errors included.
    pub fn run(&mut self) -> Result<RunSummary, StageError> {
        let result = self.run_loop();
        self.drain();
        let end = result?;
        let summary = RunSummary {
            iterations: self.iterations,
            published: self.published,
            end,
        };
        tracing::info!(
            iterations = summary.iterations,
            published = summary.published,
            overruns = self.pacer.overruns(),
            end = %summary.end,
            "stage finished"
        );
        Ok(summary)
    }

    fn run_loop(&mut self) -> Result<EndReason, StageError> {
        if self.state == StageState::Configuring {
            self.connect()?;
        }
        self.pacer.reset();
        loop {
            if let Status::Finished(reason) = self.step()? {
                return Ok(reason);
            }
            if !self.pacer.pace(&self.interrupt) {
                return Ok(EndReason::Shutdown);
            }
        }
    }

    /// Release every channel. Destroying the output channel tells its
    /// readers no more samples are coming.
    pub fn drain(&mut self) {
        if self.state == StageState::Terminated {
            return;
        }
        self.state = StageState::Draining;
        self.sources.clear();
        if let Err(e) = self.sink.destroy() {
            tracing::warn!(error = %e, "failed to destroy output channel");
        }
        self.state = StageState::Terminated;
    }
}

impl Drop for Stage {
    fn drop(&mut self) {
        self.drain();
    }
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("body", &self.body.name())
            .field("state", &self.state)
            .field("iterations", &self.iterations)
            .field("published", &self.published)
            .finish()
    }
}

/// Map a handshake error to the end of the run, or pass it on.
fn finish_on(error: NodeError) -> Result<Status, StageError> {
    if error.is_end_of_stream() {
        Ok(Status::Finished(EndReason::UpstreamClosed))
    } else if error.is_interrupted() {
        Ok(Status::Finished(EndReason::Shutdown))
    } else {
        Err(error.into())
    }
}
