#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Convert MIDI note number to frequency in Hz.
/// A4 = 440 Hz = MIDI note 69
#[inline]
pub fn midi_to_freq(note: u8) -> f64 {
    440.0 * 2.0_f64.powf((note as f64 - 69.0) / 12.0)
}

/// One note to be played, produced per scheduling tick by the sequencing
/// layer and consumed immediately.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteEvent {
    /// Audio-clock seconds
    pub time: f64,
    /// Seconds
    pub duration: f64,
    /// MIDI note number, 0 - 127
    pub pitch: u8,
    /// 0.0 - 1.0
    pub velocity: f32,
    /// Track the note belongs to
    pub channel: u32,
}

impl NoteEvent {
    pub fn new(time: f64, duration: f64, pitch: u8, velocity: f32, channel: u32) -> Self {
        Self {
            time,
            duration,
            pitch: pitch.min(127),
            velocity: velocity.clamp(0.0, 1.0),
            channel,
        }
    }

    pub fn frequency(&self) -> f64 {
        midi_to_freq(self.pitch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_pitches_are_exact() {
        assert_eq!(midi_to_freq(69), 440.0);
        assert_eq!(midi_to_freq(81), 880.0);
        assert_eq!(midi_to_freq(57), 220.0);
    }

    #[test]
    fn semitone_ratio() {
        let ratio = midi_to_freq(61) / midi_to_freq(60);
        assert!((ratio - 2f64.powf(1.0 / 12.0)).abs() < 1e-12);
    }

    #[test]
    fn note_event_clamps_inputs() {
        let note = NoteEvent::new(1.0, 0.25, 200, 1.5, 3);
        assert_eq!(note.pitch, 127);
        assert_eq!(note.velocity, 1.0);
    }
}
