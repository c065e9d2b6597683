//! Wave-shaping transfer curves.
//!
//! A shaper maps each input sample through a lookup table spanning [-1, 1].
//! Inputs outside that range read the end points, so the curve also acts as
//! a hard ceiling.

use std::f32::consts::PI;

/// Points in a generated distortion curve.
pub const CURVE_SIZE: usize = 1024;

/// Build the distortion-guard curve for `amount` in [0, 1].
///
/// `k = amount * 100` bends the line into a soft saturator; `amount = 0`
/// yields a straight line through the origin.
pub fn distortion_curve(amount: f32) -> Vec<f32> {
    let k = amount.max(0.0) * 100.0;
    let deg = PI / 180.0;
    (0..CURVE_SIZE)
        .map(|i| {
            let x = (i as f32 * 2.0) / CURVE_SIZE as f32 - 1.0;
            ((3.0 + k) * x * 20.0 * deg) / (PI + k * x.abs())
        })
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct WaveShaper {
    curve: Option<Vec<f32>>,
}

impl WaveShaper {
    /// A shaper without a curve passes audio unchanged.
    pub fn new() -> Self {
        Self { curve: None }
    }

    pub fn with_curve(curve: Vec<f32>) -> Self {
        let mut shaper = Self::new();
        shaper.set_curve(curve);
        shaper
    }

    /// Curves with fewer than two points are treated as no curve.
    pub fn set_curve(&mut self, curve: Vec<f32>) {
        self.curve = (curve.len() >= 2).then_some(curve);
    }

    pub fn curve(&self) -> Option<&[f32]> {
        self.curve.as_deref()
    }

    #[inline]
    pub fn shape(&self, sample: f32) -> f32 {
        let Some(curve) = &self.curve else {
            return sample;
        };
        let last = (curve.len() - 1) as f32;
        let pos = ((sample + 1.0) * 0.5 * last).clamp(0.0, last);
        let index = pos.floor() as usize;
        let frac = pos - index as f32;
        match curve.get(index + 1) {
            Some(&next) => curve[index] + (next - curve[index]) * frac,
            None => curve[index],
        }
    }

    pub fn render(&self, buffer: &mut [f32]) {
        if self.curve.is_none() {
            return;
        }
        for sample in buffer.iter_mut() {
            *sample = self.shape(*sample);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_amount_is_linear() {
        let curve = distortion_curve(0.0);
        assert_eq!(curve.len(), CURVE_SIZE);
        let slope = curve[CURVE_SIZE - 1] / (1.0 - 2.0 / CURVE_SIZE as f32);
        for (i, y) in curve.iter().enumerate() {
            let x = (i as f32 * 2.0) / CURVE_SIZE as f32 - 1.0;
            assert!((y - slope * x).abs() < 1e-5);
        }
    }

    #[test]
    fn heavy_amount_saturates() {
        let curve = distortion_curve(1.0);
        // Near the top the curve flattens: the last quarter gains less than the first
        let quarter = CURVE_SIZE / 4;
        let low_rise = curve[CURVE_SIZE / 2 + quarter] - curve[CURVE_SIZE / 2];
        let high_rise = curve[CURVE_SIZE - 1] - curve[CURVE_SIZE / 2 + quarter];
        assert!(high_rise < low_rise);
    }

    #[test]
    fn curve_is_odd_symmetric() {
        let curve = distortion_curve(0.6);
        // x(i) = -x(CURVE_SIZE - i) for the sampled grid
        for i in 1..CURVE_SIZE / 2 {
            assert!((curve[i] + curve[CURVE_SIZE - i]).abs() < 1e-5);
        }
    }

    #[test]
    fn shaper_interpolates_and_clamps() {
        let shaper = WaveShaper::with_curve(vec![-1.0, 0.0, 1.0]);
        assert_eq!(shaper.shape(0.0), 0.0);
        assert!((shaper.shape(0.5) - 0.5).abs() < 1e-6);
        assert_eq!(shaper.shape(3.0), 1.0);
        assert_eq!(shaper.shape(-3.0), -1.0);
    }

    #[test]
    fn missing_curve_passes_through() {
        let shaper = WaveShaper::new();
        let mut buffer = [0.25, -2.0];
        shaper.render(&mut buffer);
        assert_eq!(buffer, [0.25, -2.0]);
    }
}
