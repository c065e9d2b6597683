//! Dynamics primitives: envelope follower, gain computers and a stereo
//! processor used for the channel noise gate, the master compressor and the
//! lookahead limiter.

use super::delay::DelayLine;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/*
Dynamics Processing
===================

All three processors share the same skeleton:

    input ──┬──────────────────► [lookahead delay] ──► × gain ──► output
            │                                            ▲
            └─► |peak| ─► envelope ─► dB ─► gain computer ┘

  envelope       One-pole follower on the rectified signal. Rises with the
                 attack coefficient, falls with the release coefficient.

  gain computer  Maps the detected level (dB) to a gain change (dB):

    compressor   above threshold, output rises 1/ratio as fast as input
    gate         below threshold, output falls `ratio` times as fast as input
                 (a downward expander; ratio 20 is effectively a gate)

  knee           Width in dB of the region around the threshold where the
                 curve blends quadratically instead of kinking.

  lookahead      Delaying the audio but not the detector lets the gain drop
                 before a transient arrives. A limiter is simply a compressor
                 with a high ratio and a few milliseconds of lookahead.


  out dB                                      out dB
    │          ╱ 1:1                            │            ╱
    │        ╱                                  │          ╱
    │      ╱───── ratio:1                       │        ╱  1:1
    │    ╱                                      │      ╱
    │  ╱                                        │     │ ratio:1
    └──────┼──────── in dB                      └─────┼──────── in dB
       threshold                                   threshold
       compressor                                  gate
*/

const FLOOR_DB: f32 = -120.0;

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicsMode {
    Compressor,
    Gate,
}

/// Control values sampled once per render block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DynamicsSettings {
    pub threshold_db: f32,
    pub knee_db: f32,
    pub ratio: f32,
    /// Seconds
    pub attack: f32,
    /// Seconds
    pub release: f32,
}

#[inline]
pub fn db_to_linear(db: f32) -> f32 {
    10.0f32.powf(db / 20.0)
}

#[inline]
pub fn linear_to_db(linear: f32) -> f32 {
    if linear <= 0.0 {
        FLOOR_DB
    } else {
        (20.0 * linear.log10()).max(FLOOR_DB)
    }
}

/// Soft-knee downward compression. Returns a gain change in dB (≤ 0).
pub fn compression_gain_db(input_db: f32, threshold_db: f32, knee_db: f32, ratio: f32) -> f32 {
    let slope = 1.0 - 1.0 / ratio.max(1.0);
    let half_knee = knee_db * 0.5;

    if knee_db <= 0.0 || input_db > threshold_db + half_knee {
        -((input_db - threshold_db).max(0.0) * slope)
    } else if input_db < threshold_db - half_knee {
        0.0
    } else {
        let x = input_db - (threshold_db - half_knee);
        -(slope * x * x) / (2.0 * knee_db)
    }
}

/// Soft-knee downward expansion. Returns a gain change in dB (≤ 0).
pub fn expansion_gain_db(input_db: f32, threshold_db: f32, knee_db: f32, ratio: f32) -> f32 {
    let slope = ratio.max(1.0) - 1.0;
    let half_knee = knee_db * 0.5;

    let gain = if knee_db <= 0.0 || input_db < threshold_db - half_knee {
        (input_db - threshold_db).min(0.0) * slope
    } else if input_db > threshold_db + half_knee {
        0.0
    } else {
        let x = (threshold_db + half_knee) - input_db;
        -(slope * x * x) / (2.0 * knee_db)
    };
    gain.max(FLOOR_DB)
}

#[derive(Debug, Clone)]
pub struct EnvelopeFollower {
    attack_coeff: f32,
    release_coeff: f32,
    envelope: f32,
}

impl EnvelopeFollower {
    pub fn new() -> Self {
        Self {
            attack_coeff: 0.0,
            release_coeff: 0.0,
            envelope: 0.0,
        }
    }

    /// Set attack and release times in seconds.
    pub fn set_times(&mut self, attack: f32, release: f32, sample_rate: f32) {
        self.attack_coeff = time_coefficient(attack, sample_rate);
        self.release_coeff = time_coefficient(release, sample_rate);
    }

    #[inline]
    pub fn process(&mut self, input: f32) -> f32 {
        let level = input.abs();
        let coeff = if level > self.envelope {
            self.attack_coeff
        } else {
            self.release_coeff
        };
        self.envelope = level + coeff * (self.envelope - level);
        self.envelope
    }

    pub fn current(&self) -> f32 {
        self.envelope
    }

    pub fn reset(&mut self) {
        self.envelope = 0.0;
    }
}

impl Default for EnvelopeFollower {
    fn default() -> Self {
        Self::new()
    }
}

fn time_coefficient(seconds: f32, sample_rate: f32) -> f32 {
    let samples = seconds * sample_rate;
    if samples <= 0.0 {
        0.0
    } else {
        (-1.0 / samples).exp()
    }
}

/// Stereo-linked dynamics stage with optional lookahead.
#[derive(Debug, Clone)]
pub struct DynamicsProcessor {
    mode: DynamicsMode,
    follower: EnvelopeFollower,
    left: DelayLine,
    right: DelayLine,
    gain_reduction_db: f32,
}

impl DynamicsProcessor {
    /// `max_lookahead` is in samples.
    pub fn new(mode: DynamicsMode, max_lookahead: usize) -> Self {
        Self {
            mode,
            follower: EnvelopeFollower::new(),
            left: DelayLine::new(max_lookahead),
            right: DelayLine::new(max_lookahead),
            gain_reduction_db: 0.0,
        }
    }

    pub fn mode(&self) -> DynamicsMode {
        self.mode
    }

    /// Current gain change in dB (0 when idle, negative when reducing).
    pub fn gain_reduction_db(&self) -> f32 {
        self.gain_reduction_db
    }

    /// Process one stereo block in place.
    pub fn process(
        &mut self,
        left: &mut [f32],
        right: &mut [f32],
        settings: &DynamicsSettings,
        lookahead_samples: f32,
        sample_rate: f32,
    ) {
        self.follower
            .set_times(settings.attack, settings.release, sample_rate);

        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let peak = l.abs().max(r.abs());
            let level_db = linear_to_db(self.follower.process(peak));

            let gain_db = match self.mode {
                DynamicsMode::Compressor => compression_gain_db(
                    level_db,
                    settings.threshold_db,
                    settings.knee_db,
                    settings.ratio,
                ),
                DynamicsMode::Gate => expansion_gain_db(
                    level_db,
                    settings.threshold_db,
                    settings.knee_db,
                    settings.ratio,
                ),
            };
            self.gain_reduction_db = gain_db;
            let gain = db_to_linear(gain_db);

            *l = self.left.next_sample(*l, lookahead_samples) * gain;
            *r = self.right.next_sample(*r, lookahead_samples) * gain;
        }
    }

    pub fn reset(&mut self) {
        self.follower.reset();
        self.left.reset();
        self.right.reset();
        self.gain_reduction_db = 0.0;
    }
}
