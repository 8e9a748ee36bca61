use framepipe_node::Sample;

use crate::error::StageError;

/// Copies its input channel onto its output channel.
#[derive(Debug, Default)]
pub struct Relay {
    forwarded: u64,
}

impl Relay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    pub(crate) fn process(
        &mut self,
        inputs: &[Sample<'_>],
        output: Option<&mut [u8]>,
    ) -> Result<bool, StageError> {
        let (Some(input), Some(output)) = (inputs.first(), output) else {
            return Ok(false);
        };
        let payload = input.payload();
        if payload.len() != output.len() {
            return Err(StageError::config(format!(
                "relay input carries {} bytes per sample, output slot holds {}",
                payload.len(),
                output.len()
            )));
        }
        output.copy_from_slice(payload);
        self.forwarded += 1;
        Ok(true)
    }
}
