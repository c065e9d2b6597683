use super::node::{AudioNode, RenderCtx, StereoBuffer};
use crate::dsp::shaper::WaveShaper;

pub struct WaveShaperNode {
    shaper: WaveShaper,
}

impl WaveShaperNode {
    pub fn new(curve: Vec<f32>) -> Self {
        Self {
            shaper: WaveShaper::with_curve(curve),
        }
    }

    /// Swap the transfer curve; takes effect on the next block.
    pub fn set_curve(&mut self, curve: Vec<f32>) {
        self.shaper.set_curve(curve);
    }

    pub fn curve(&self) -> Option<&[f32]> {
        self.shaper.curve()
    }
}

impl AudioNode for WaveShaperNode {
    fn process(&mut self, input: &StereoBuffer, output: &mut StereoBuffer, _ctx: &RenderCtx) {
        output.copy_from(input);
        self.shaper.render(&mut output.left);
        self.shaper.render(&mut output.right);
    }
}
