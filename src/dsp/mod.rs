//! Low-level DSP primitives used by the graph nodes.
//!
//! Nothing in here knows about node connections or the audio clock beyond a
//! sample rate and a block of samples. Everything except the FFT planners is
//! allocation-free once constructed.

/// Level and spectrum measurement.
pub mod analysis;
/// FFT partitioned convolution for reverb impulses.
pub mod convolution;
/// Interpolating circular delay line.
pub mod delay;
/// Compressor, gate and limiter math.
pub mod dynamics;
/// Scheduled four-stage envelope written onto a param.
pub mod envelope;
/// State-variable filter with multiple responses.
pub mod filter;
pub mod mix;
/// Phase-accumulator oscillator waveforms.
pub mod oscillator;
pub mod pan;
/// Sample-accurate parameter automation.
pub mod param;
/// Wave-shaping curves.
pub mod shaper;

pub use envelope::EnvelopeShape;
pub use oscillator::Waveform;
pub use param::AudioParam;
