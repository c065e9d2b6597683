use super::node::{AudioNode, RenderCtx, StereoBuffer};
use crate::dsp::pan::pan_block;
use crate::dsp::param::AudioParam;

/// Equal-power stereo panner. `pan` runs from -1 (left) to 1 (right).
pub struct StereoPannerNode {
    pub pan: AudioParam,
    scratch: Vec<f32>,
}

impl StereoPannerNode {
    pub fn new(pan: f32) -> Self {
        Self {
            pan: AudioParam::with_range(pan, -1.0, 1.0),
            scratch: Vec::with_capacity(crate::MAX_BLOCK_SIZE),
        }
    }
}

impl AudioNode for StereoPannerNode {
    fn process(&mut self, input: &StereoBuffer, output: &mut StereoBuffer, ctx: &RenderCtx) {
        output.copy_from(input);
        self.scratch.resize(input.frames(), 0.0);
        self.pan.fill(&mut self.scratch, ctx.time, ctx.sample_rate);
        pan_block(&mut output.left, &mut output.right, &self.scratch);
    }
}
