//! Uniformly partitioned FFT convolution for long impulse responses.

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

/*
Partitioned Convolution
=======================

Convolving with a 1.2 s impulse directly costs ~57 600 multiplies per sample.
Instead the impulse is cut into partitions of P samples, each transformed
once up front. Incoming audio is gathered into blocks of P samples and:

  1. the last two blocks [previous | current] are transformed (size 2P)
  2. the spectrum is pushed into a frequency-domain delay line (FDL)
  3. FDL[k] · IR[k] is summed over every partition k
  4. the inverse transform's second half is the next P output samples

This is overlap-save: the first half of the inverse transform is circular
wrap-around garbage and is discarded. The cost is one forward and one
inverse FFT per block plus one complex multiply-add per bin per partition.

Output lags input by exactly P samples.
*/

/// Samples per partition; also the convolver's latency.
pub const PARTITION_SIZE: usize = 512;

const GAIN_CALIBRATION: f32 = 0.00125;
const GAIN_CALIBRATION_SAMPLE_RATE: f32 = 44_100.0;
const MIN_POWER: f32 = 0.000_125;

/// Loudness normalisation for an impulse response, so impulses of different
/// length and density produce a comparable wet level.
pub fn normalization_scale(channels: &[Vec<f32>], sample_rate: f32) -> f32 {
    let len: usize = channels.iter().map(Vec::len).sum();
    if len == 0 {
        return 1.0;
    }
    let power: f32 = channels.iter().flatten().map(|s| s * s).sum();
    let rms = (power / len as f32).sqrt().max(MIN_POWER);
    (1.0 / rms) * GAIN_CALIBRATION * GAIN_CALIBRATION_SAMPLE_RATE / sample_rate
}

pub struct PartitionedConvolver {
    forward: Arc<dyn Fft<f32>>,
    inverse: Arc<dyn Fft<f32>>,
    ir_spectra: Vec<Vec<Complex<f32>>>,
    /// Input spectra, newest at `fdl_head`
    fdl: Vec<Vec<Complex<f32>>>,
    fdl_head: usize,
    previous: Vec<f32>,
    input: Vec<f32>,
    output: Vec<f32>,
    position: usize,
    scratch: Vec<Complex<f32>>,
    accumulator: Vec<Complex<f32>>,
}

impl PartitionedConvolver {
    /// Prepare a convolver for `impulse`, pre-multiplied by `scale`.
    pub fn new(impulse: &[f32], scale: f32) -> Self {
        let fft_size = PARTITION_SIZE * 2;
        let mut planner = FftPlanner::new();
        let forward = planner.plan_fft_forward(fft_size);
        let inverse = planner.plan_fft_inverse(fft_size);

        let ir_spectra: Vec<Vec<Complex<f32>>> = impulse
            .chunks(PARTITION_SIZE)
            .map(|segment| {
                let mut spectrum = vec![Complex::new(0.0, 0.0); fft_size];
                for (bin, &s) in spectrum.iter_mut().zip(segment) {
                    bin.re = s * scale;
                }
                forward.process(&mut spectrum);
                spectrum
            })
            .collect();

        let partitions = ir_spectra.len();
        Self {
            forward,
            inverse,
            ir_spectra,
            fdl: vec![vec![Complex::new(0.0, 0.0); fft_size]; partitions],
            fdl_head: 0,
            previous: vec![0.0; PARTITION_SIZE],
            input: vec![0.0; PARTITION_SIZE],
            output: vec![0.0; PARTITION_SIZE],
            position: 0,
            scratch: vec![Complex::new(0.0, 0.0); fft_size],
            accumulator: vec![Complex::new(0.0, 0.0); fft_size],
        }
    }

    pub fn partitions(&self) -> usize {
        self.ir_spectra.len()
    }

    pub fn latency(&self) -> usize {
        PARTITION_SIZE
    }

    #[inline]
    pub fn next_sample(&mut self, sample: f32) -> f32 {
        if self.ir_spectra.is_empty() {
            return 0.0;
        }
        let out = self.output[self.position];
        self.input[self.position] = sample;
        self.position += 1;
        if self.position == PARTITION_SIZE {
            self.position = 0;
            self.process_partition();
        }
        out
    }

    pub fn render(&mut self, buffer: &mut [f32]) {
        for sample in buffer.iter_mut() {
            *sample = self.next_sample(*sample);
        }
    }

    fn process_partition(&mut self) {
        let partitions = self.ir_spectra.len();

        for (bin, &s) in self
            .scratch
            .iter_mut()
            .zip(self.previous.iter().chain(self.input.iter()))
        {
            *bin = Complex::new(s, 0.0);
        }
        self.forward.process(&mut self.scratch);
        self.previous.copy_from_slice(&self.input);

        self.fdl_head = (self.fdl_head + 1) % partitions;
        self.fdl[self.fdl_head].copy_from_slice(&self.scratch);

        self.accumulator.fill(Complex::new(0.0, 0.0));
        for (k, ir) in self.ir_spectra.iter().enumerate() {
            let slot = (self.fdl_head + partitions - k) % partitions;
            for ((acc, &x), &h) in self.accumulator.iter_mut().zip(&self.fdl[slot]).zip(ir) {
                *acc += x * h;
            }
        }

        self.inverse.process(&mut self.accumulator);
        let norm = 1.0 / (PARTITION_SIZE * 2) as f32;
        for (out, bin) in self
            .output
            .iter_mut()
            .zip(&self.accumulator[PARTITION_SIZE..])
        {
            *out = bin.re * norm;
        }
    }

    pub fn reset(&mut self) {
        for spectrum in &mut self.fdl {
            spectrum.fill(Complex::new(0.0, 0.0));
        }
        self.previous.fill(0.0);
        self.input.fill(0.0);
        self.output.fill(0.0);
        self.position = 0;
    }
}
