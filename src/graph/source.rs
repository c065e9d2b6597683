//! Source nodes: decoded sample playback, oscillators and constant offsets.

use std::sync::Arc;

use super::node::{AudioNode, RenderCtx, StereoBuffer};
use crate::dsp::oscillator::{Oscillator, Waveform};
use crate::dsp::param::AudioParam;

/// Decoded audio shared between every voice that plays it.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    channels: Vec<Vec<f32>>,
    sample_rate: f32,
}

impl SampleBuffer {
    /// Channels shorter than the longest are padded with silence.
    pub fn new(mut channels: Vec<Vec<f32>>, sample_rate: f32) -> Self {
        let len = channels.iter().map(Vec::len).max().unwrap_or(0);
        for channel in &mut channels {
            channel.resize(len, 0.0);
        }
        Self {
            channels,
            sample_rate,
        }
    }

    pub fn mono(samples: Vec<f32>, sample_rate: f32) -> Self {
        Self::new(vec![samples], sample_rate)
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    pub fn channel(&self, index: usize) -> Option<&[f32]> {
        self.channels.get(index).map(Vec::as_slice)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Frames per channel.
    pub fn len(&self) -> usize {
        self.channels.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Length in seconds at the buffer's own rate.
    pub fn duration(&self) -> f64 {
        self.len() as f64 / self.sample_rate as f64
    }

    /// Linearly interpolated read; out-of-range positions read silence.
    #[inline]
    fn read(&self, channel: usize, position: f64) -> f32 {
        let Some(data) = self.channels.get(channel) else {
            return 0.0;
        };
        if position < 0.0 {
            return 0.0;
        }
        let index = position.floor() as usize;
        let frac = (position - index as f64) as f32;
        match (data.get(index), data.get(index + 1)) {
            (Some(&a), Some(&b)) => a + (b - a) * frac,
            (Some(&a), None) => a * (1.0 - frac),
            _ => 0.0,
        }
    }
}

/// Start/stop window shared by every scheduled source.
#[derive(Debug, Clone, Copy, Default)]
struct Schedule {
    start: Option<f64>,
    stop: Option<f64>,
}

impl Schedule {
    fn is_active(&self, time: f64) -> bool {
        match self.start {
            Some(start) => time >= start && self.stop.map_or(true, |stop| time < stop),
            None => false,
        }
    }

    fn has_stopped(&self, time: f64) -> bool {
        self.stop.is_some_and(|stop| time >= stop)
    }
}

/// Plays a `SampleBuffer` once, starting at a scheduled time.
pub struct BufferSourceNode {
    buffer: Arc<SampleBuffer>,
    schedule: Schedule,
    pub playback_rate: AudioParam,
    /// Read position in buffer frames
    position: f64,
    ended: bool,
}

impl BufferSourceNode {
    pub fn new(buffer: Arc<SampleBuffer>) -> Self {
        Self {
            buffer,
            schedule: Schedule::default(),
            playback_rate: AudioParam::with_range(1.0, 0.0, 16.0),
            position: 0.0,
            ended: false,
        }
    }

    /// Begin playback at audio-clock time `when`. Later calls are ignored.
    pub fn start(&mut self, when: f64) {
        if self.schedule.start.is_none() {
            self.schedule.start = Some(when.max(0.0));
        }
    }

    pub fn stop(&mut self, when: f64) {
        self.schedule.stop = Some(when);
    }

    pub fn buffer(&self) -> &Arc<SampleBuffer> {
        &self.buffer
    }
}

impl AudioNode for BufferSourceNode {
    fn process(&mut self, _input: &StereoBuffer, output: &mut StereoBuffer, ctx: &RenderCtx) {
        let stereo = self.buffer.channel_count() > 1;
        let step = self.buffer.sample_rate() as f64 / ctx.sample_rate as f64;
        let len = self.buffer.len() as f64;

        for i in 0..output.frames() {
            let time = ctx.time_at(i);
            if self.ended || !self.schedule.is_active(time) {
                output.left[i] = 0.0;
                output.right[i] = 0.0;
                continue;
            }
            if self.position >= len {
                self.ended = true;
                output.left[i] = 0.0;
                output.right[i] = 0.0;
                continue;
            }

            let left = self.buffer.read(0, self.position);
            output.left[i] = left;
            output.right[i] = if stereo {
                self.buffer.read(1, self.position)
            } else {
                left
            };
            self.position += step * self.playback_rate.value_at(time) as f64;
        }
    }

    fn is_finished(&self, time: f64) -> bool {
        self.ended || self.schedule.has_stopped(time)
    }
}

/// Periodic waveform source with an automatable frequency.
pub struct OscillatorNode {
    osc: Oscillator,
    schedule: Schedule,
    pub frequency: AudioParam,
    scratch: Vec<f32>,
}

impl OscillatorNode {
    pub fn new(waveform: Waveform, frequency: f32) -> Self {
        Self {
            osc: Oscillator::new(waveform),
            schedule: Schedule::default(),
            frequency: AudioParam::with_range(frequency, 0.0, 24_000.0),
            scratch: Vec::with_capacity(crate::MAX_BLOCK_SIZE),
        }
    }

    pub fn start(&mut self, when: f64) {
        if self.schedule.start.is_none() {
            self.schedule.start = Some(when.max(0.0));
        }
    }

    pub fn stop(&mut self, when: f64) {
        self.schedule.stop = Some(when);
    }

    pub fn waveform(&self) -> Waveform {
        self.osc.waveform()
    }
}

impl AudioNode for OscillatorNode {
    fn process(&mut self, _input: &StereoBuffer, output: &mut StereoBuffer, ctx: &RenderCtx) {
        self.scratch.resize(output.frames(), 0.0);
        self.frequency
            .fill(&mut self.scratch, ctx.time, ctx.sample_rate);

        for (i, &freq) in self.scratch.iter().enumerate() {
            let sample = if self.schedule.is_active(ctx.time_at(i)) {
                self.osc.next_sample(freq, ctx.sample_rate)
            } else {
                0.0
            };
            output.left[i] = sample;
            output.right[i] = sample;
        }
    }

    fn is_finished(&self, time: f64) -> bool {
        self.schedule.has_stopped(time)
    }
}

/// Emits `offset` on both channels once started.
///
/// With an offset of 0 it keeps a virtual channel's chain rendering without
/// a capture device behind it.
pub struct ConstantSourceNode {
    pub offset: AudioParam,
    schedule: Schedule,
    scratch: Vec<f32>,
}

impl ConstantSourceNode {
    pub fn new(offset: f32) -> Self {
        Self {
            offset: AudioParam::new(offset),
            schedule: Schedule::default(),
            scratch: Vec::with_capacity(crate::MAX_BLOCK_SIZE),
        }
    }

    pub fn start(&mut self, when: f64) {
        if self.schedule.start.is_none() {
            self.schedule.start = Some(when.max(0.0));
        }
    }
}

impl AudioNode for ConstantSourceNode {
    fn process(&mut self, _input: &StereoBuffer, output: &mut StereoBuffer, ctx: &RenderCtx) {
        self.scratch.resize(output.frames(), 0.0);
        self.offset.fill(&mut self.scratch, ctx.time, ctx.sample_rate);
        for (i, &value) in self.scratch.iter().enumerate() {
            let sample = if self.schedule.is_active(ctx.time_at(i)) {
                value
            } else {
                0.0
            };
            output.left[i] = sample;
            output.right[i] = sample;
        }
    }
}
