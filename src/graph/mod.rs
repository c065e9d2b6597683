//! Audio graph primitives.
//!
//! A single [`AudioGraph`] holds every node the studio renders: transient
//! voice chains, the fixed master bus and the per-channel microphone
//! chains. Components share it through the cloneable [`AudioContext`]
//! handle and schedule everything against its sample clock.

/// Spectrum and level tap.
pub mod analyser;
/// Node arena, topology, render loop and the shared context handle.
pub mod context;
/// Partitioned convolution reverb.
pub mod convolver;
/// Variable delay with internal feedback.
pub mod delay;
/// Gate, compressor and limiter stages.
pub mod dynamics;
pub mod filter;
pub mod gain;
/// Core traits shared by all graph nodes.
pub mod node;
pub mod pan;
pub mod shaper;
/// Sample, oscillator and constant sources.
pub mod source;
/// Capture input and recording output rings.
pub mod stream;

pub use analyser::AnalyserNode;
pub use context::{AudioContext, AudioGraph, ContextBackend, ContextState, NodeId};
pub use convolver::ConvolverNode;
pub use delay::DelayNode;
pub use dynamics::DynamicsNode;
pub use filter::FilterNode;
pub use gain::GainNode;
pub use node::{AudioNode, RenderCtx, StereoBuffer};
pub use pan::StereoPannerNode;
pub use shaper::WaveShaperNode;
pub use source::{BufferSourceNode, ConstantSourceNode, OscillatorNode, SampleBuffer};
pub use stream::{Frame, RecordingTapNode, StreamSourceNode};
