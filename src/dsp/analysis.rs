//! Level and spectrum measurement.

use std::f32::consts::TAU;
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

/// Root-mean-square of a block. Empty blocks read as silence.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

/// Meter reading in [0, 1]: RMS scaled by four so speech-level input moves
/// the meter visibly.
pub fn meter_level(samples: &[f32]) -> f32 {
    (rms(samples) * 4.0).min(1.0)
}

/// Windowed FFT magnitudes with exponential smoothing between reads.
pub struct Spectrum {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    scratch: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
    smoothing: f32,
}

impl Spectrum {
    pub fn new(fft_size: usize, smoothing: f32) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);

        // Blackman window
        let n = fft_size as f32;
        let window = (0..fft_size)
            .map(|i| {
                let x = i as f32 / n;
                0.42 - 0.5 * (TAU * x).cos() + 0.08 * (2.0 * TAU * x).cos()
            })
            .collect();

        Self {
            fft,
            window,
            scratch: vec![Complex::new(0.0, 0.0); fft_size],
            smoothed: vec![0.0; fft_size / 2],
            smoothing: smoothing.clamp(0.0, 1.0),
        }
    }

    pub fn fft_size(&self) -> usize {
        self.window.len()
    }

    pub fn bin_count(&self) -> usize {
        self.smoothed.len()
    }

    /// Analyse `samples` (oldest first, `fft_size` long) into `out` as dB.
    pub fn analyse_db(&mut self, samples: &[f32], out: &mut [f32]) {
        for (i, bin) in self.scratch.iter_mut().enumerate() {
            let s = samples.get(i).copied().unwrap_or(0.0);
            *bin = Complex::new(s * self.window[i], 0.0);
        }
        self.fft.process(&mut self.scratch);

        let scale = 1.0 / self.window.len() as f32;
        for (k, smoothed) in self.smoothed.iter_mut().enumerate() {
            let magnitude = self.scratch[k].norm() * scale;
            *smoothed = self.smoothing * *smoothed + (1.0 - self.smoothing) * magnitude;
        }

        for (o, &m) in out.iter_mut().zip(&self.smoothed) {
            *o = if m > 0.0 { 20.0 * m.log10() } else { f32::NEG_INFINITY };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_of_constant_is_magnitude() {
        assert!((rms(&[0.5, -0.5, 0.5, -0.5]) - 0.5).abs() < 1e-6);
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn meter_level_scales_and_clamps() {
        assert!((meter_level(&[0.1; 64]) - 0.4).abs() < 1e-6);
        assert_eq!(meter_level(&[0.9; 64]), 1.0);
    }

    #[test]
    fn spectrum_peaks_at_signal_bin() {
        let size = 256;
        let mut spectrum = Spectrum::new(size, 0.0);
        let bin = 16;
        let samples: Vec<f32> = (0..size)
            .map(|i| (TAU * bin as f32 * i as f32 / size as f32).sin())
            .collect();
        let mut out = vec![0.0; spectrum.bin_count()];
        spectrum.analyse_db(&samples, &mut out);

        let peak = out
            .iter()
            .enumerate()
            .fold((0, f32::NEG_INFINITY), |acc, (i, &v)| if v > acc.1 { (i, v) } else { acc });
        assert_eq!(peak.0, bin);
    }
}
