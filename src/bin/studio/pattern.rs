//! Step patterns for the demo - one note (or rest) per sequencer step

use studio_dsp::engine::StepTick;
use studio_dsp::synth::NoteEvent;

/// A looping line of MIDI notes. `None` is a rest.
pub struct StepPattern {
    pub track: u32,
    pub steps: Vec<Option<u8>>,
    /// Note length as a fraction of one step
    pub gate: f64,
    pub velocity: f32,
}

impl StepPattern {
    pub fn new(track: u32, steps: &[Option<u8>]) -> Self {
        Self {
            track,
            steps: steps.to_vec(),
            gate: 0.8,
            velocity: 0.8,
        }
    }

    pub fn gate(mut self, gate: f64) -> Self {
        self.gate = gate;
        self
    }

    pub fn velocity(mut self, velocity: f32) -> Self {
        self.velocity = velocity;
        self
    }

    /// The note this pattern plays on `tick`, if any.
    pub fn note_at(&self, tick: &StepTick) -> Option<NoteEvent> {
        if self.steps.is_empty() {
            return None;
        }
        let pitch = self.steps[tick.step as usize % self.steps.len()]?;
        Some(NoteEvent::new(
            tick.time,
            tick.duration * self.gate,
            pitch,
            self.velocity,
            self.track,
        ))
    }
}

/// C minor arpeggio over two octaves
pub fn arpeggio() -> StepPattern {
    const C4: u8 = 60;
    let line = [0, 3, 7, 12, 15, 12, 7, 3];
    let steps: Vec<Option<u8>> = line.iter().map(|offset| Some(C4 + offset)).collect();
    StepPattern::new(0, &steps).gate(0.6)
}

/// Root notes on the beat
pub fn bass() -> StepPattern {
    const C2: u8 = 36;
    const G2: u8 = 43;
    let mut steps = vec![None; 16];
    steps[0] = Some(C2);
    steps[4] = Some(C2);
    steps[8] = Some(G2);
    steps[12] = Some(C2);
    StepPattern::new(1, &steps).gate(1.5).velocity(1.0)
}
