//! The closed set of things a stage can do each iteration.

mod monitor;
mod relay;
mod test_frame;

pub use monitor::Monitor;
pub use relay::Relay;
pub use test_frame::TestFrame;

use framepipe_node::{Geometry, Sample};

use crate::error::StageError;

/// A stage's transform, chosen when the stage is configured.
#[derive(Debug)]
pub enum StageBody {
    /// Publishes a static frame.
    TestFrame(TestFrame),
    /// Observes one input channel.
    Monitor(Monitor),
    /// Republishes one input channel under another name.
    Relay(Relay),
}

impl StageBody {
    pub fn name(&self) -> &'static str {
        match self {
            StageBody::TestFrame(_) => "test-frame",
            StageBody::Monitor(_) => "monitor",
            StageBody::Relay(_) => "relay",
        }
    }

    /// Number of input channels the body reads every iteration.
    pub fn input_count(&self) -> usize {
        match self {
            StageBody::TestFrame(_) => 0,
            StageBody::Monitor(_) | StageBody::Relay(_) => 1,
        }
    }

    /// Whether the body publishes to an output channel.
    pub fn produces_output(&self) -> bool {
        match self {
            StageBody::TestFrame(_) | StageBody::Relay(_) => true,
            StageBody::Monitor(_) => false,
        }
    }

    /// Geometry of the output channel, given the geometries of the inputs.
    /// `None` if the body produces nothing.
    pub fn output_geometry(&self, inputs: &[Geometry]) -> Option<Geometry> {
        match self {
            StageBody::TestFrame(n) => Some(n.geometry()),
            StageBody::Monitor(_) => None,
            StageBody::Relay(_) => inputs.first().copied(),
        }
    }

    /// Run one iteration.
    ///
    /// `inputs` holds one sample per input channel. `output` is the reserved
    /// payload of the output channel, if there is one. Returns whether data
    /// was produced; `false` abandons the reserved write.
    pub fn process(
        &mut self,
        inputs: &[Sample<'_>],
        output: Option<&mut [u8]>,
    ) -> Result<bool, StageError> {
        match self {
            StageBody::TestFrame(n) => n.process(output),
            StageBody::Monitor(n) => Ok(n.process(inputs)),
            StageBody::Relay(n) => n.process(inputs, output),
        }
    }
}

impl From<TestFrame> for StageBody {
    fn from(body: TestFrame) -> Self {
        StageBody::TestFrame(body)
    }
}

impl From<Monitor> for StageBody {
    fn from(body: Monitor) -> Self {
        StageBody::Monitor(body)
    }
}

impl From<Relay> for StageBody {
    fn from(body: Relay) -> Self {
        StageBody::Relay(body)
    }
}
