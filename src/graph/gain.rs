use super::node::{AudioNode, RenderCtx, StereoBuffer};
use crate::dsp::mix::multiply_in_place;
use crate::dsp::param::AudioParam;

/// Multiplies its input by an automatable gain.
///
/// Used for voice VCAs, send amounts, bus wet levels, channel faders and the
/// master output level.
pub struct GainNode {
    pub gain: AudioParam,
    scratch: Vec<f32>,
}

impl GainNode {
    pub fn new(gain: f32) -> Self {
        Self {
            gain: AudioParam::new(gain),
            scratch: Vec::with_capacity(crate::MAX_BLOCK_SIZE),
        }
    }
}

impl AudioNode for GainNode {
    fn process(&mut self, input: &StereoBuffer, output: &mut StereoBuffer, ctx: &RenderCtx) {
        output.copy_from(input);
        self.scratch.resize(input.frames(), 0.0);
        self.gain.fill(&mut self.scratch, ctx.time, ctx.sample_rate);
        multiply_in_place(&mut output.left, &self.scratch);
        multiply_in_place(&mut output.right, &self.scratch);
    }
}
