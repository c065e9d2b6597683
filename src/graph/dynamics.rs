use super::node::{AudioNode, RenderCtx, StereoBuffer};
use crate::dsp::dynamics::{DynamicsMode, DynamicsProcessor, DynamicsSettings};
use crate::dsp::param::AudioParam;

/*
Dynamics Node
=============

One node type covers all three dynamics stages in the studio:

  stage            mode         lookahead   typical settings
  ---------------  -----------  ---------   ---------------------------
  channel gate     Gate         none        -60 dB, knee 10, ratio 20
  bus compressor   Compressor   none        -18 dB, ratio 3.5, 5/180 ms
  limiter          Compressor   0-10 ms     ceiling -0.8 dB, ratio 20

Every control is an `AudioParam` read once per block, so the router and the
plugin rack move them with `set_target_at_time` like any other control and
a setting change never steps audibly. Setting ratio to 1 makes any stage
transparent without touching the graph.
*/

pub struct DynamicsNode {
    pub threshold: AudioParam,
    pub knee: AudioParam,
    pub ratio: AudioParam,
    /// Seconds
    pub attack: AudioParam,
    /// Seconds
    pub release: AudioParam,
    /// Seconds the audio path trails the detector
    pub lookahead: AudioParam,
    processor: DynamicsProcessor,
    scratch: StereoBuffer,
}

impl DynamicsNode {
    /// `max_lookahead` is in seconds.
    pub fn new(mode: DynamicsMode, sample_rate: f32, max_lookahead: f64) -> Self {
        let max_samples = (max_lookahead * sample_rate as f64).ceil() as usize;
        Self {
            threshold: AudioParam::with_range(-24.0, -100.0, 0.0),
            knee: AudioParam::with_range(30.0, 0.0, 40.0),
            ratio: AudioParam::with_range(12.0, 1.0, 20.0),
            attack: AudioParam::with_range(0.003, 0.0, 1.0),
            release: AudioParam::with_range(0.25, 0.0, 1.0),
            lookahead: AudioParam::with_range(0.0, 0.0, max_lookahead as f32),
            processor: DynamicsProcessor::new(mode, max_samples),
            scratch: StereoBuffer::new(0),
        }
    }

    pub fn compressor(sample_rate: f32) -> Self {
        Self::new(DynamicsMode::Compressor, sample_rate, 0.0)
    }

    pub fn gate(sample_rate: f32) -> Self {
        Self::new(DynamicsMode::Gate, sample_rate, 0.0)
    }

    pub fn limiter(sample_rate: f32, max_lookahead: f64) -> Self {
        Self::new(DynamicsMode::Compressor, sample_rate, max_lookahead)
    }

    /// Set every control immediately.
    pub fn with_settings(mut self, settings: DynamicsSettings) -> Self {
        self.threshold.set_value(settings.threshold_db);
        self.knee.set_value(settings.knee_db);
        self.ratio.set_value(settings.ratio);
        self.attack.set_value(settings.attack);
        self.release.set_value(settings.release);
        self
    }

    pub fn mode(&self) -> DynamicsMode {
        self.processor.mode()
    }

    /// Gain change applied to the most recent sample, in dB.
    pub fn reduction(&self) -> f32 {
        self.processor.gain_reduction_db()
    }

    /// Control values in effect for the last rendered block.
    pub fn settings(&self) -> DynamicsSettings {
        DynamicsSettings {
            threshold_db: self.threshold.value(),
            knee_db: self.knee.value(),
            ratio: self.ratio.value(),
            attack: self.attack.value(),
            release: self.release.value(),
        }
    }
}

impl AudioNode for DynamicsNode {
    fn process(&mut self, input: &StereoBuffer, output: &mut StereoBuffer, ctx: &RenderCtx) {
        let settings = DynamicsSettings {
            threshold_db: self.threshold.value_at(ctx.time),
            knee_db: self.knee.value_at(ctx.time),
            ratio: self.ratio.value_at(ctx.time),
            attack: self.attack.value_at(ctx.time),
            release: self.release.value_at(ctx.time),
        };
        let lookahead = self.lookahead.value_at(ctx.time) * ctx.sample_rate;

        self.scratch.prepare(input.frames());
        self.scratch.copy_from(input);
        self.processor.process(
            &mut self.scratch.left,
            &mut self.scratch.right,
            &settings,
            lookahead,
            ctx.sample_rate,
        );
        output.copy_from(&self.scratch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::dynamics::db_to_linear;

    fn steady(level: f32, frames: usize) -> StereoBuffer {
        let mut buffer = StereoBuffer::new(frames);
        buffer.left.fill(level);
        buffer.right.fill(level);
        buffer
    }

    #[test]
    fn ratio_one_passes_hot_signal() {
        let mut node = DynamicsNode::compressor(48_000.0).with_settings(DynamicsSettings {
            threshold_db: 0.0,
            knee_db: 0.0,
            ratio: 1.0,
            attack: 0.001,
            release: 0.1,
        });
        let input = steady(2.0, 256);
        let mut output = StereoBuffer::new(256);
        node.process(&input, &mut output, &RenderCtx::new(48_000.0, 0));
        assert!(output.left.iter().all(|s| (*s - 2.0).abs() < 1e-6));
    }

    #[test]
    fn gate_closes_on_quiet_input() {
        let mut node = DynamicsNode::gate(48_000.0).with_settings(DynamicsSettings {
            threshold_db: -40.0,
            knee_db: 0.0,
            ratio: 20.0,
            attack: 0.001,
            release: 0.01,
        });
        let quiet = db_to_linear(-60.0);
        let input = steady(quiet, 2048);
        let mut output = StereoBuffer::new(2048);
        node.process(&input, &mut output, &RenderCtx::new(48_000.0, 0));
        assert!(output.left[2047].abs() < quiet * 0.01);
    }
}
