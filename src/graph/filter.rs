use super::node::{AudioNode, RenderCtx, StereoBuffer};
use crate::dsp::filter::{FilterType, SVFilter};
use crate::dsp::param::AudioParam;

/*
Filter Node
===========

Stereo wrapper around the state-variable filter. Cutoff and Q are read once
per block (control rate): recomputing `tan()` per sample buys nothing for
the slow sweeps the voices and the pitch bus use.

  lowpass(8000, 0.707)    synth voice tone control
  bandpass(1200, 2.4)     pitch-correction bus colour
*/

pub struct FilterNode {
    pub frequency: AudioParam,
    pub q: AudioParam,
    left: SVFilter,
    right: SVFilter,
}

impl FilterNode {
    pub fn new(filter_type: FilterType, cutoff_hz: f32, q: f32) -> Self {
        Self {
            frequency: AudioParam::with_range(cutoff_hz, 10.0, 24_000.0),
            q: AudioParam::with_range(q, 0.05, 100.0),
            left: SVFilter::new(filter_type),
            right: SVFilter::new(filter_type),
        }
    }

    pub fn lowpass(cutoff_hz: f32, q: f32) -> Self {
        Self::new(FilterType::LowPass, cutoff_hz, q)
    }

    pub fn bandpass(centre_hz: f32, q: f32) -> Self {
        Self::new(FilterType::BandPass, centre_hz, q)
    }

    pub fn filter_type(&self) -> FilterType {
        self.left.filter_type()
    }
}

impl AudioNode for FilterNode {
    fn process(&mut self, input: &StereoBuffer, output: &mut StereoBuffer, ctx: &RenderCtx) {
        let g = SVFilter::coefficient(self.frequency.value_at(ctx.time), ctx.sample_rate);
        let k = SVFilter::damping(self.q.value_at(ctx.time));

        for (o, &i) in output.left.iter_mut().zip(&input.left) {
            *o = self.left.process(i, k, g);
        }
        for (o, &i) in output.right.iter_mut().zip(&input.right) {
            *o = self.right.process(i, k, g);
        }
    }
}
