//! Voice playback: sample and synth voices scheduled onto the shared graph.
//!
//! The sequencing layer decides what to play; this module only knows how to
//! play it at an exact audio-clock time.

/// Instrument, sample-map and track definitions.
pub mod instrument;
pub mod note;
/// Per-trigger voice chains and the track registry.
pub mod voice;

pub use instrument::{InstrumentDefinition, InstrumentKind, SampleMap, SynthParams, TrackPatch, TrackState};
pub use note::{midi_to_freq, NoteEvent};
pub use voice::{VoiceEngine, VoiceParams};
