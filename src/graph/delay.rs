use super::node::{AudioNode, RenderCtx, StereoBuffer};
use crate::dsp::delay::DelayLine;
use crate::dsp::param::AudioParam;

/*
Delay Node
==========

A stereo delay with automatable delay time and an internal feedback path.

    input ──► (+) ──► [ delay line ] ──┬──► output
               ▲                       │
               └────── × feedback ◄────┘

The graph rejects cycles, so the echo bus keeps its feedback loop inside
the node rather than wiring a gain node back to the delay's input.

With feedback at 0 this is a plain variable delay: the channel router uses
it that way to model requested input latency.
*/

pub struct DelayNode {
    /// Seconds, clamped to the node's maximum
    pub delay_time: AudioParam,
    /// Fraction of the output fed back into the line (control rate)
    pub feedback: AudioParam,
    left: DelayLine,
    right: DelayLine,
    scratch: Vec<f32>,
}

impl DelayNode {
    /// `max_delay` is in seconds.
    pub fn new(max_delay: f64, sample_rate: f32) -> Self {
        let capacity = (max_delay * sample_rate as f64).ceil() as usize;
        Self {
            delay_time: AudioParam::with_range(0.0, 0.0, max_delay as f32),
            feedback: AudioParam::with_range(0.0, 0.0, 0.99),
            left: DelayLine::new(capacity),
            right: DelayLine::new(capacity),
            scratch: Vec::with_capacity(crate::MAX_BLOCK_SIZE),
        }
    }

    pub fn with_delay(mut self, seconds: f32) -> Self {
        self.delay_time.set_value(seconds);
        self
    }

    pub fn with_feedback(mut self, feedback: f32) -> Self {
        self.feedback.set_value(feedback);
        self
    }
}

impl AudioNode for DelayNode {
    fn process(&mut self, input: &StereoBuffer, output: &mut StereoBuffer, ctx: &RenderCtx) {
        self.scratch.resize(input.frames(), 0.0);
        self.delay_time
            .fill(&mut self.scratch, ctx.time, ctx.sample_rate);
        let feedback = self.feedback.value_at(ctx.time);

        for (i, &seconds) in self.scratch.iter().enumerate() {
            let delay = seconds * ctx.sample_rate;
            output.left[i] = self
                .left
                .next_sample_with_feedback(input.left[i], delay, feedback);
            output.right[i] = self
                .right
                .next_sample_with_feedback(input.right[i], delay, feedback);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echoes_repeat_with_feedback() {
        let sr = 1_000.0;
        let mut node = DelayNode::new(1.0, sr).with_delay(0.01).with_feedback(0.5);
        let mut input = StereoBuffer::new(32);
        input.left[0] = 1.0;
        let mut output = StereoBuffer::new(32);
        node.process(&input, &mut output, &RenderCtx::new(sr, 0));
        assert!((output.left[10] - 1.0).abs() < 1e-5);
        assert!((output.left[20] - 0.5).abs() < 1e-5);
        assert!((output.left[30] - 0.25).abs() < 1e-5);
        assert!(output.right.iter().all(|s| *s == 0.0));
    }
}
