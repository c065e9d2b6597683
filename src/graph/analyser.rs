use super::node::{AudioNode, RenderCtx, StereoBuffer};
use crate::dsp::analysis::{meter_level, Spectrum};

/// Passes audio through untouched while keeping the last `fft_size` samples
/// (downmixed to mono) for meters and spectrum displays.
pub struct AnalyserNode {
    history: Vec<f32>,
    /// Next write position in `history`
    head: usize,
    spectrum: Spectrum,
}

impl AnalyserNode {
    pub const DEFAULT_SMOOTHING: f32 = 0.8;

    pub fn new(fft_size: usize) -> Self {
        Self::with_smoothing(fft_size, Self::DEFAULT_SMOOTHING)
    }

    pub fn with_smoothing(fft_size: usize, smoothing: f32) -> Self {
        let fft_size = fft_size.max(32).next_power_of_two();
        Self {
            history: vec![0.0; fft_size],
            head: 0,
            spectrum: Spectrum::new(fft_size, smoothing),
        }
    }

    pub fn fft_size(&self) -> usize {
        self.history.len()
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.spectrum.bin_count()
    }

    /// Copy the most recent samples, oldest first.
    pub fn time_domain_data(&self, out: &mut [f32]) {
        let len = self.history.len();
        let count = out.len().min(len);
        let start = (self.head + len - count) % len;
        for (i, o) in out.iter_mut().take(count).enumerate() {
            *o = self.history[(start + i) % len];
        }
    }

    /// Current meter reading in [0, 1].
    pub fn level(&self) -> f32 {
        let mut window = vec![0.0; self.history.len()];
        self.time_domain_data(&mut window);
        meter_level(&window)
    }

    /// Smoothed magnitude spectrum in dB, one value per bin.
    pub fn frequency_data_db(&mut self, out: &mut [f32]) {
        let mut window = vec![0.0; self.history.len()];
        self.time_domain_data(&mut window);
        self.spectrum.analyse_db(&window, out);
    }
}

impl AudioNode for AnalyserNode {
    fn process(&mut self, input: &StereoBuffer, output: &mut StereoBuffer, _ctx: &RenderCtx) {
        output.copy_from(input);
        let len = self.history.len();
        for (&l, &r) in input.left.iter().zip(&input.right) {
            self.history[self.head] = 0.5 * (l + r);
            self.head = (self.head + 1) % len;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_most_recent_window_in_order() {
        let mut node = AnalyserNode::new(32);
        let mut input = StereoBuffer::new(40);
        for i in 0..40 {
            input.left[i] = i as f32;
            input.right[i] = i as f32;
        }
        let mut output = StereoBuffer::new(40);
        node.process(&input, &mut output, &RenderCtx::new(48_000.0, 0));

        let mut window = [0.0; 4];
        node.time_domain_data(&mut window);
        assert_eq!(window, [36.0, 37.0, 38.0, 39.0]);
        assert_eq!(output.left, input.left);
    }

    #[test]
    fn level_of_silence_is_zero() {
        let node = AnalyserNode::new(256);
        assert_eq!(node.level(), 0.0);
        assert_eq!(node.fft_size(), 256);
        assert_eq!(node.frequency_bin_count(), 128);
    }
}
