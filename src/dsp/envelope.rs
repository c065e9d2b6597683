use super::param::AudioParam;
use crate::MIN_TIME;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/*
Scheduled ADSR Envelope
=======================

A synth voice knows its whole life the moment it is triggered: onset time,
duration and shape are all fixed. So instead of running a note-on/note-off
state machine per sample, the envelope is written once as automation events
on the voice's gain param and the graph plays it back sample-accurately.

  Level
   peak ┐     ╱╲
        │    ╱  ╲___________
   peak │   ╱               ╲
   × S  │  ╱                 ╲__
    0.0 └─╱────────────────────╲___──→ Time
        onset  +A   +A+D      +duration
         │ ramp │ ramp │ hold  │ exponential release (time constant R)

Events written, in order:

    set_value_at_time(0, onset)
    linear_ramp_to_value_at_time(peak, onset + A)
    linear_ramp_to_value_at_time(peak × S, onset + A + D)
    set_target_at_time(0, onset + duration, R)

Release is a set-target curve, so after R seconds the level is ~37% of
where it started and after 5R it is below 1%. The oscillator is stopped
RELEASE_MARGIN seconds after the release begins so the tail is never cut.


Short Notes
-----------

If the note ends before attack + decay has elapsed, the ramps are truncated
at the note's end: the last ramp lands on the level the full ramp would
have reached at that moment, and release starts from there. Without this the
release would start from a level the envelope never actually reached.
*/

/// Seconds a synth voice keeps running after its release begins.
pub const RELEASE_MARGIN: f64 = 2.0;

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopeShape {
    /// Seconds from 0 to peak
    pub attack: f64,
    /// Seconds from peak to sustain
    pub decay: f64,
    /// Fraction of peak held until release (0.0 - 1.0)
    pub sustain: f32,
    /// Release time constant in seconds
    pub release: f64,
}

impl Default for EnvelopeShape {
    fn default() -> Self {
        Self {
            attack: 0.005,
            decay: 0.08,
            sustain: 0.7,
            release: 0.15,
        }
    }
}

impl EnvelopeShape {
    pub fn new(attack: f64, decay: f64, sustain: f32, release: f64) -> Self {
        Self {
            attack,
            decay,
            sustain,
            release,
        }
    }

    /// Write this envelope onto `param` for a note at `onset` lasting
    /// `duration` seconds. Returns the time the voice can safely stop.
    pub fn apply(&self, param: &mut AudioParam, onset: f64, duration: f64, peak: f32) -> f64 {
        let attack = self.attack.max(MIN_TIME);
        let decay = self.decay.max(MIN_TIME);
        let sustain_level = peak * self.sustain.clamp(0.0, 1.0);
        let duration = duration.max(0.0);

        param.set_value_at_time(0.0, onset);

        if duration >= attack + decay {
            param.linear_ramp_to_value_at_time(peak, onset + attack);
            param.linear_ramp_to_value_at_time(sustain_level, onset + attack + decay);
        } else if duration >= attack {
            let progress = ((duration - attack) / decay) as f32;
            param.linear_ramp_to_value_at_time(peak, onset + attack);
            param.linear_ramp_to_value_at_time(
                peak + (sustain_level - peak) * progress,
                onset + duration,
            );
        } else if duration > 0.0 {
            let progress = (duration / attack) as f32;
            param.linear_ramp_to_value_at_time(peak * progress, onset + duration);
        }

        param.set_target_at_time(0.0, onset + duration, self.release);
        self.stop_time(onset, duration)
    }

    pub fn stop_time(&self, onset: f64, duration: f64) -> f64 {
        onset + duration.max(0.0) + RELEASE_MARGIN
    }
}
