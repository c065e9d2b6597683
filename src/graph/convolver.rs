use std::sync::Arc;

use super::node::{AudioNode, RenderCtx, StereoBuffer};
use super::source::SampleBuffer;
use crate::dsp::convolution::{normalization_scale, PartitionedConvolver};

/// Convolution reverb. A mono impulse feeds both channels; a stereo impulse
/// convolves each channel with its own response.
pub struct ConvolverNode {
    left: Option<PartitionedConvolver>,
    right: Option<PartitionedConvolver>,
}

impl ConvolverNode {
    pub fn new() -> Self {
        Self {
            left: None,
            right: None,
        }
    }

    pub fn with_impulse(impulse: Arc<SampleBuffer>) -> Self {
        let mut node = Self::new();
        node.set_impulse(&impulse);
        node
    }

    /// Load an impulse response, normalised for a consistent wet level.
    pub fn set_impulse(&mut self, impulse: &SampleBuffer) {
        let scale = normalization_scale(impulse.channels(), impulse.sample_rate());
        let left = impulse.channel(0);
        let right = impulse.channel(1).unwrap_or_default();
        self.left = left.map(|ir| PartitionedConvolver::new(ir, scale));
        self.right = Some(PartitionedConvolver::new(
            if right.is_empty() { left.unwrap_or_default() } else { right },
            scale,
        ));
    }
}

impl Default for ConvolverNode {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioNode for ConvolverNode {
    fn process(&mut self, input: &StereoBuffer, output: &mut StereoBuffer, _ctx: &RenderCtx) {
        match (self.left.as_mut(), self.right.as_mut()) {
            (Some(left), Some(right)) => {
                for (o, &i) in output.left.iter_mut().zip(&input.left) {
                    *o = left.next_sample(i);
                }
                for (o, &i) in output.right.iter_mut().zip(&input.right) {
                    *o = right.next_sample(i);
                }
            }
            _ => {
                output.left.fill(0.0);
                output.right.fill(0.0);
            }
        }
    }
}
