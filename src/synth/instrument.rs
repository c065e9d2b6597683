//! Instrument and track definitions the voice engine reads at trigger time.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::dsp::{EnvelopeShape, Waveform};
use crate::graph::SampleBuffer;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Tone settings for a synthesized voice.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SynthParams {
    pub waveform: Waveform,
    pub envelope: EnvelopeShape,
    /// Low-pass cutoff in Hz
    pub cutoff: f32,
    /// Low-pass resonance
    pub q: f32,
}

impl Default for SynthParams {
    fn default() -> Self {
        Self {
            waveform: Waveform::Sawtooth,
            envelope: EnvelopeShape::default(),
            cutoff: 8000.0,
            q: 0.707,
        }
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub enum InstrumentKind {
    /// Plays buffers from the named sample map
    Sampled { sample_map: String },
    Synthesized(SynthParams),
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentDefinition {
    pub id: String,
    pub display_name: String,
    pub kind: InstrumentKind,
}

impl InstrumentDefinition {
    pub fn synth(id: impl Into<String>, display_name: impl Into<String>, params: SynthParams) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            kind: InstrumentKind::Synthesized(params),
        }
    }

    pub fn sampled(
        id: impl Into<String>,
        display_name: impl Into<String>,
        sample_map: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            kind: InstrumentKind::Sampled {
                sample_map: sample_map.into(),
            },
        }
    }
}

/// Buffers keyed by the MIDI note they were recorded at.
///
/// A pitch without its own buffer borrows the nearest one and is
/// repitched through the source's playback rate.
#[derive(Debug, Clone, Default)]
pub struct SampleMap {
    zones: BTreeMap<u8, Arc<SampleBuffer>>,
}

impl SampleMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// One buffer for every pitch, played back at its original rate on
    /// `root`.
    pub fn single(root: u8, buffer: Arc<SampleBuffer>) -> Self {
        let mut map = Self::new();
        map.insert(root, buffer);
        map
    }

    pub fn insert(&mut self, root: u8, buffer: Arc<SampleBuffer>) {
        self.zones.insert(root, buffer);
    }

    pub fn is_empty(&self) -> bool {
        self.zones.is_empty()
    }

    /// Buffer to play for `pitch` and the playback rate that repitches it.
    pub fn resolve(&self, pitch: u8) -> Option<(Arc<SampleBuffer>, f32)> {
        let (&root, buffer) = self
            .zones
            .iter()
            .min_by_key(|(root, _)| (**root as i16 - pitch as i16).abs())?;
        let rate = 2.0f32.powf((pitch as f32 - root as f32) / 12.0);
        Some((buffer.clone(), rate))
    }
}

/// Per-track mix settings, owned by the sequencing layer.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct TrackState {
    pub id: u32,
    pub instrument_id: String,
    pub gain: f32,
    /// -1.0 (left) to 1.0 (right)
    pub pan: f32,
    /// Reverb send, 0.0 - 1.0
    pub send_a: f32,
    /// Delay send, 0.0 - 1.0
    pub send_b: f32,
}

impl TrackState {
    pub fn new(id: u32, instrument_id: impl Into<String>) -> Self {
        Self {
            id,
            instrument_id: instrument_id.into(),
            gain: 1.0,
            pan: 0.0,
            send_a: 0.0,
            send_b: 0.0,
        }
    }
}

/// Partial update for [`TrackState`]; `None` fields are left alone.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackPatch {
    pub instrument_id: Option<String>,
    pub gain: Option<f32>,
    pub pan: Option<f32>,
    pub send_a: Option<f32>,
    pub send_b: Option<f32>,
}

impl TrackState {
    pub fn apply(&mut self, patch: TrackPatch) {
        if let Some(instrument_id) = patch.instrument_id {
            self.instrument_id = instrument_id;
        }
        if let Some(gain) = patch.gain {
            self.gain = gain.max(0.0);
        }
        if let Some(pan) = patch.pan {
            self.pan = pan.clamp(-1.0, 1.0);
        }
        if let Some(send_a) = patch.send_a {
            self.send_a = send_a.clamp(0.0, 1.0);
        }
        if let Some(send_b) = patch.send_b {
            self.send_b = send_b.clamp(0.0, 1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_map_picks_nearest_zone() {
        let low = Arc::new(SampleBuffer::mono(vec![0.1; 8], 48_000.0));
        let high = Arc::new(SampleBuffer::mono(vec![0.2; 8], 48_000.0));
        let mut map = SampleMap::new();
        map.insert(48, low.clone());
        map.insert(72, high.clone());

        let (buffer, rate) = map.resolve(48).unwrap();
        assert!(Arc::ptr_eq(&buffer, &low));
        assert_eq!(rate, 1.0);

        let (buffer, rate) = map.resolve(84).unwrap();
        assert!(Arc::ptr_eq(&buffer, &high));
        assert!((rate - 2.0).abs() < 1e-6);

        assert!(SampleMap::new().resolve(60).is_none());
    }

    #[test]
    fn patch_updates_only_given_fields() {
        let mut track = TrackState::new(1, "bass");
        track.apply(TrackPatch {
            pan: Some(-3.0),
            send_a: Some(0.4),
            ..Default::default()
        });
        assert_eq!(track.pan, -1.0);
        assert_eq!(track.send_a, 0.4);
        assert_eq!(track.gain, 1.0);
        assert_eq!(track.instrument_id, "bass");
    }
}
