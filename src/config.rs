//! Engine-wide configuration.
//!
//! Defaults match the studio's shipped behaviour; every knob has a builder
//! method so callers can write `EngineConfig::default().with_tempo(96.0)`.

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Audio clock rate in Hz
    pub sample_rate: f32,
    /// Frames rendered per graph pass (clamped to `MAX_BLOCK_SIZE`)
    pub block_size: usize,
    /// Spacing of the transport's periodic lookahead check
    pub lookahead_interval: Duration,
    /// How far ahead of the audio clock steps are committed, in seconds
    pub schedule_ahead: f64,
    /// Gap between `start()` and the first step, in seconds
    pub start_offset: f64,
    /// Spacing of the channel meter broadcast
    pub meter_interval: Duration,
    /// Master gain at construction
    pub master_level: f32,
    pub tempo: f64,
    pub loop_start: u32,
    pub loop_end: u32,
    pub steps_per_beat: u32,
    /// Time constant for channel level, pan and latency changes (seconds)
    pub channel_smoothing: f64,
    /// Time constant for gate and plugin parameter changes (seconds)
    pub effect_smoothing: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000.0,
            block_size: 128,
            lookahead_interval: Duration::from_millis(100),
            schedule_ahead: 0.2,
            start_offset: 0.05,
            meter_interval: Duration::from_millis(120),
            master_level: 0.9,
            tempo: 120.0,
            loop_start: 0,
            loop_end: 16,
            steps_per_beat: 4,
            channel_smoothing: 0.01,
            effect_smoothing: 0.05,
        }
    }
}

impl EngineConfig {
    pub fn with_sample_rate(mut self, sample_rate: f32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_block_size(mut self, block_size: usize) -> Self {
        self.block_size = block_size.clamp(1, crate::MAX_BLOCK_SIZE);
        self
    }

    pub fn with_tempo(mut self, bpm: f64) -> Self {
        self.tempo = bpm;
        self
    }

    pub fn with_loop(mut self, start: u32, end: u32) -> Self {
        self.loop_start = start;
        self.loop_end = end;
        self
    }

    pub fn with_steps_per_beat(mut self, steps: u32) -> Self {
        self.steps_per_beat = steps;
        self
    }

    pub fn with_lookahead(mut self, interval: Duration, schedule_ahead: f64) -> Self {
        self.lookahead_interval = interval;
        self.schedule_ahead = schedule_ahead;
        self
    }

    pub fn with_meter_interval(mut self, interval: Duration) -> Self {
        self.meter_interval = interval;
        self
    }

    pub fn with_master_level(mut self, level: f32) -> Self {
        self.master_level = level.clamp(0.0, 1.0);
        self
    }

    /// Render block size actually used by the graph.
    pub fn effective_block_size(&self) -> usize {
        self.block_size.clamp(1, crate::MAX_BLOCK_SIZE)
    }
}
