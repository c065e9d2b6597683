//! The fixed master bus: send effects, compressor, limiter, pitch bus,
//! analyser and the lazily created recording tap.

use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use rtrb::Consumer;
use tracing::debug;

use crate::dsp::dynamics::DynamicsSettings;
use crate::dsp::AudioParam;
use crate::graph::stream::RECORDING_QUEUE_SIZE;
use crate::graph::{
    AnalyserNode, AudioContext, AudioGraph, ConvolverNode, DelayNode, DynamicsNode, FilterNode,
    Frame, GainNode, NodeId, RecordingTapNode, SampleBuffer,
};
use crate::{EngineConfig, Result};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/*
Master Bus
==========

Built once per context and never rewired:

  voices, channels ──► master gain ─────────────────┐
  sends A ──► reverb (convolver) ──► reverb wet ────┤
  sends B ──► delay (internal fb) ──► delay wet ────┤
                                                    ▼
                                               compressor ──┬───────────► limiter ──► analyser ──► out
                                                            │                ▲    │
                                                            └─► pitch delay  │    └──► recording tap
                                                                ─► bandpass  │         (lazy)
                                                                ─► pitch wet ┘

Every plugin stays in the graph when disabled. Disabling swaps in the
stage's bypass values (ratio 1 for the dynamics stages, wet 0 for the pitch
bus) through the same smoothed parameter moves used for any other edit.

The pitch bus is a colouring effect, not pitch tracking: a short delay
and a band-pass blended back under the dry signal.
*/

/// Seconds of impulse in the default reverb.
const REVERB_SECONDS: f64 = 1.2;
const REVERB_WET: f32 = 0.15;
const DELAY_SECONDS: f32 = 0.25;
const DELAY_FEEDBACK: f32 = 0.3;
const DELAY_WET: f32 = 0.2;
const DELAY_MAX_SECONDS: f64 = 5.0;
const LIMITER_MAX_LOOKAHEAD: f64 = 0.01;
const LIMITER_RATIO: f32 = 20.0;
const LIMITER_ATTACK: f32 = 0.001;
const COMPRESSOR_KNEE_DB: f32 = 30.0;
const PITCH_MAX_DELAY: f64 = 0.05;
const PITCH_CENTRE_HZ: f32 = 1200.0;
const MASTER_FFT_SIZE: usize = 2048;

/// Compressor values that make the stage transparent.
pub const COMPRESSOR_BYPASS: DynamicsSettings = DynamicsSettings {
    threshold_db: 0.0,
    knee_db: 0.0,
    ratio: 1.0,
    attack: 0.003,
    release: 0.25,
};

/// Limiter values that make the stage transparent.
pub const LIMITER_BYPASS: DynamicsSettings = DynamicsSettings {
    threshold_db: 0.0,
    knee_db: 0.0,
    ratio: 1.0,
    attack: LIMITER_ATTACK,
    release: 0.12,
};

/// Pitch bus wet level while disabled.
pub const AUTO_TUNE_BYPASS_WET: f32 = 0.0;

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressorSettings {
    pub threshold_db: f32,
    pub ratio: f32,
    /// Seconds
    pub attack: f32,
    /// Seconds
    pub release: f32,
    pub enabled: bool,
}

impl Default for CompressorSettings {
    fn default() -> Self {
        Self {
            threshold_db: -18.0,
            ratio: 3.5,
            attack: 0.005,
            release: 0.18,
            enabled: true,
        }
    }
}

impl CompressorSettings {
    /// Values the node should run with, bypass applied.
    pub fn effective(&self) -> DynamicsSettings {
        if !self.enabled {
            return COMPRESSOR_BYPASS;
        }
        DynamicsSettings {
            threshold_db: self.threshold_db,
            knee_db: COMPRESSOR_KNEE_DB,
            ratio: self.ratio,
            attack: self.attack,
            release: self.release,
        }
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimiterSettings {
    pub ceiling_db: f32,
    /// Seconds
    pub lookahead: f32,
    /// Seconds
    pub release: f32,
    pub enabled: bool,
}

impl Default for LimiterSettings {
    fn default() -> Self {
        Self {
            ceiling_db: -0.8,
            lookahead: 0.004,
            release: 0.12,
            enabled: true,
        }
    }
}

impl LimiterSettings {
    pub fn effective(&self) -> DynamicsSettings {
        if !self.enabled {
            return LIMITER_BYPASS;
        }
        DynamicsSettings {
            threshold_db: self.ceiling_db,
            knee_db: 0.0,
            ratio: LIMITER_RATIO,
            attack: LIMITER_ATTACK,
            release: self.release,
        }
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AutoTuneSettings {
    /// Wet level, 0.0 - 1.0
    pub mix: f32,
    /// Retune speed, 0 - 100 %
    pub retune: f32,
    /// Formant shift in semitones
    pub formant: f32,
    /// 0 - 100 %
    pub humanize: f32,
    pub enabled: bool,
}

impl Default for AutoTuneSettings {
    fn default() -> Self {
        Self {
            mix: 0.55,
            retune: 35.0,
            formant: 0.0,
            humanize: 55.0,
            enabled: false,
        }
    }
}

impl AutoTuneSettings {
    /// Bus delay in seconds: faster retune, shorter delay.
    pub fn delay_time(&self) -> f32 {
        let speed = (self.retune / 100.0).clamp(0.0, 1.0);
        0.005 + (1.0 - speed) * 0.025
    }

    /// Band-pass centre shifted by the formant setting.
    pub fn centre_hz(&self) -> f32 {
        PITCH_CENTRE_HZ * 2.0f32.powf(self.formant / 12.0)
    }

    pub fn q(&self) -> f32 {
        1.0 + (self.retune / 100.0).clamp(0.0, 1.0) * 4.0
    }

    pub fn wet(&self) -> f32 {
        if self.enabled {
            self.mix.clamp(0.0, 1.0)
        } else {
            AUTO_TUNE_BYPASS_WET
        }
    }
}

/// Stereo decaying-noise impulse used by the default reverb.
pub fn default_impulse(sample_rate: f32, rng: &mut impl Rng) -> SampleBuffer {
    let len = (sample_rate as f64 * REVERB_SECONDS) as usize;
    let channels = (0..2)
        .map(|_| {
            (0..len)
                .map(|i| {
                    let decay = 1.0 - i as f32 / len as f32;
                    (rng.gen::<f32>() * 2.0 - 1.0) * decay * decay
                })
                .collect()
        })
        .collect();
    SampleBuffer::new(channels, sample_rate)
}

/// Reader side of the recording tap.
///
/// Clones share the same ring; frames are consumed by whichever clone reads
/// first.
#[derive(Clone)]
pub struct MasterStream {
    rx: Arc<Mutex<Consumer<Frame>>>,
    sample_rate: f32,
}

impl MasterStream {
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Frames waiting to be read.
    pub fn available(&self) -> usize {
        self.rx.lock().slots()
    }

    /// Append every waiting frame to `out`. Returns how many were read.
    pub fn drain_into(&self, out: &mut Vec<Frame>) -> usize {
        let mut rx = self.rx.lock();
        let count = rx.slots();
        out.reserve(count);
        for _ in 0..count {
            match rx.pop() {
                Ok(frame) => out.push(frame),
                Err(_) => break,
            }
        }
        count
    }
}

struct Plugins {
    compressor: CompressorSettings,
    limiter: LimiterSettings,
    auto_tune: AutoTuneSettings,
}

pub struct MasterBus {
    context: AudioContext,
    input: NodeId,
    reverb: NodeId,
    reverb_wet: NodeId,
    delay: NodeId,
    delay_wet: NodeId,
    compressor: NodeId,
    limiter: NodeId,
    pitch_delay: NodeId,
    pitch_filter: NodeId,
    pitch_wet: NodeId,
    analyser: NodeId,
    smoothing: f64,
    plugins: Mutex<Plugins>,
    tap: Mutex<Option<MasterStream>>,
}

impl MasterBus {
    pub fn new(context: AudioContext, config: &EngineConfig) -> Result<Self> {
        let sample_rate = context.sample_rate();
        let mut rng = SmallRng::from_entropy();
        let impulse = Arc::new(default_impulse(sample_rate, &mut rng));

        let compressor_settings = CompressorSettings::default();
        let limiter_settings = LimiterSettings::default();
        let auto_tune = AutoTuneSettings::default();

        let mut graph = context.graph();
        let input = graph.add(GainNode::new(config.master_level));

        let reverb = graph.add(ConvolverNode::with_impulse(impulse));
        let reverb_wet = graph.add(GainNode::new(REVERB_WET));
        let delay = graph.add(
            DelayNode::new(DELAY_MAX_SECONDS, sample_rate)
                .with_delay(DELAY_SECONDS)
                .with_feedback(DELAY_FEEDBACK),
        );
        let delay_wet = graph.add(GainNode::new(DELAY_WET));

        let compressor =
            graph.add(DynamicsNode::compressor(sample_rate).with_settings(compressor_settings.effective()));
        let mut limiter_node = DynamicsNode::limiter(sample_rate, LIMITER_MAX_LOOKAHEAD)
            .with_settings(limiter_settings.effective());
        limiter_node.lookahead.set_value(limiter_settings.lookahead);
        let limiter = graph.add(limiter_node);

        let pitch_delay =
            graph.add(DelayNode::new(PITCH_MAX_DELAY, sample_rate).with_delay(auto_tune.delay_time()));
        let pitch_filter = graph.add(FilterNode::bandpass(auto_tune.centre_hz(), auto_tune.q()));
        let pitch_wet = graph.add(GainNode::new(auto_tune.wet()));

        let analyser = graph.add(AnalyserNode::new(MASTER_FFT_SIZE));
        let destination = graph.destination();

        graph.chain(&[reverb, reverb_wet, compressor])?;
        graph.chain(&[delay, delay_wet, compressor])?;
        graph.chain(&[input, compressor, limiter, analyser, destination])?;
        graph.chain(&[compressor, pitch_delay, pitch_filter, pitch_wet, limiter])?;
        drop(graph);

        debug!(level = config.master_level, "master bus built");
        Ok(Self {
            context,
            input,
            reverb,
            reverb_wet,
            delay,
            delay_wet,
            compressor,
            limiter,
            pitch_delay,
            pitch_filter,
            pitch_wet,
            analyser,
            smoothing: config.effect_smoothing,
            plugins: Mutex::new(Plugins {
                compressor: compressor_settings,
                limiter: limiter_settings,
                auto_tune,
            }),
            tap: Mutex::new(None),
        })
    }

    /// Where voices and channels connect.
    pub fn input(&self) -> NodeId {
        self.input
    }

    /// Send A target.
    pub fn reverb_input(&self) -> NodeId {
        self.reverb
    }

    /// Send B target.
    pub fn delay_input(&self) -> NodeId {
        self.delay
    }

    /// Post-limiter analyser. Read it through the graph, or use
    /// [`MasterBus::level`] and [`MasterBus::frequency_data_db`].
    pub fn analyser(&self) -> NodeId {
        self.analyser
    }

    pub fn output(&self) -> NodeId {
        self.limiter
    }

    /// Move the master gain toward `level` (clamped to 0..1).
    pub fn set_output_level(&self, level: f32) {
        let level = level.clamp(0.0, 1.0);
        let mut graph = self.context.graph();
        let now = graph.current_time();
        if let Some(gain) = graph.node_mut::<GainNode>(self.input) {
            gain.gain.cancel_scheduled_values(now);
            gain.gain.set_target_at_time(level, now, self.smoothing);
        }
    }

    /// Level the master gain is moving toward.
    pub fn output_level(&self) -> f32 {
        self.context
            .graph()
            .node::<GainNode>(self.input)
            .map(|g| g.gain.target())
            .unwrap_or(0.0)
    }

    pub fn connect_external_input(&self, node: NodeId) -> Result<()> {
        self.context.graph().connect(node, self.input)
    }

    /// Tolerates nodes that are not (or no longer) connected.
    pub fn disconnect_external_input(&self, node: NodeId) {
        self.context.graph().disconnect(node, self.input);
    }

    pub fn configure_compressor(&self, settings: CompressorSettings) {
        self.plugins.lock().compressor = settings;
        let mut graph = self.context.graph();
        let now = graph.current_time();
        if let Some(node) = graph.node_mut::<DynamicsNode>(self.compressor) {
            glide_dynamics(node, settings.effective(), now, self.smoothing);
        }
        debug!(enabled = settings.enabled, "compressor configured");
    }

    pub fn configure_limiter(&self, settings: LimiterSettings) {
        self.plugins.lock().limiter = settings;
        let mut graph = self.context.graph();
        let now = graph.current_time();
        if let Some(node) = graph.node_mut::<DynamicsNode>(self.limiter) {
            glide_dynamics(node, settings.effective(), now, self.smoothing);
            glide(&mut node.lookahead, settings.lookahead, now, self.smoothing);
        }
        debug!(enabled = settings.enabled, "limiter configured");
    }

    pub fn configure_auto_tune(&self, settings: AutoTuneSettings) {
        self.plugins.lock().auto_tune = settings;
        let mut graph = self.context.graph();
        let now = graph.current_time();
        if let Some(delay) = graph.node_mut::<DelayNode>(self.pitch_delay) {
            glide(&mut delay.delay_time, settings.delay_time(), now, self.smoothing);
        }
        if let Some(filter) = graph.node_mut::<FilterNode>(self.pitch_filter) {
            glide(&mut filter.frequency, settings.centre_hz(), now, self.smoothing);
            glide(&mut filter.q, settings.q(), now, self.smoothing);
        }
        if let Some(wet) = graph.node_mut::<GainNode>(self.pitch_wet) {
            glide(&mut wet.gain, settings.wet(), now, self.smoothing);
        }
        debug!(enabled = settings.enabled, "pitch bus configured");
    }

    pub fn compressor_settings(&self) -> CompressorSettings {
        self.plugins.lock().compressor
    }

    pub fn limiter_settings(&self) -> LimiterSettings {
        self.plugins.lock().limiter
    }

    pub fn auto_tune_settings(&self) -> AutoTuneSettings {
        self.plugins.lock().auto_tune
    }

    /// Current compressor gain change in dB (zero or negative).
    pub fn compressor_reduction(&self) -> f32 {
        self.context
            .graph()
            .node::<DynamicsNode>(self.compressor)
            .map(DynamicsNode::reduction)
            .unwrap_or(0.0)
    }

    /// Post-limiter meter reading in [0, 1].
    pub fn level(&self) -> f32 {
        self.context
            .graph()
            .node::<AnalyserNode>(self.analyser)
            .map(AnalyserNode::level)
            .unwrap_or(0.0)
    }

    pub fn frequency_data_db(&self, out: &mut [f32]) {
        if let Some(analyser) = self.context.graph().node_mut::<AnalyserNode>(self.analyser) {
            analyser.frequency_data_db(out);
        }
    }

    /// Recording stream of the post-limiter mix. The tap is added on first
    /// call; later calls share it.
    pub fn master_stream(&self) -> Result<MasterStream> {
        let mut tap = self.tap.lock();
        if let Some(stream) = tap.as_ref() {
            return Ok(stream.clone());
        }

        let mut graph = self.context.graph();
        let (node, rx) = RecordingTapNode::new(RECORDING_QUEUE_SIZE);
        let id = graph.add(node);
        graph.connect(self.limiter, id)?;
        debug!("recording tap attached");

        let stream = MasterStream {
            rx: Arc::new(Mutex::new(rx)),
            sample_rate: graph.sample_rate(),
        };
        *tap = Some(stream.clone());
        Ok(stream)
    }

    /// Send-bus wet gains, for inspection.
    pub fn send_levels(&self) -> (f32, f32) {
        let graph = self.context.graph();
        let wet = |graph: &AudioGraph, id| graph.node::<GainNode>(id).map(|g| g.gain.target()).unwrap_or(0.0);
        (wet(&graph, self.reverb_wet), wet(&graph, self.delay_wet))
    }
}

fn glide(param: &mut AudioParam, value: f32, now: f64, time_constant: f64) {
    param.cancel_scheduled_values(now);
    param.set_target_at_time(value, now, time_constant);
}

fn glide_dynamics(node: &mut DynamicsNode, settings: DynamicsSettings, now: f64, time_constant: f64) {
    glide(&mut node.threshold, settings.threshold_db, now, time_constant);
    glide(&mut node.knee, settings.knee_db, now, time_constant);
    glide(&mut node.ratio, settings.ratio, now, time_constant);
    glide(&mut node.attack, settings.attack, now, time_constant);
    glide(&mut node.release, settings.release, now, time_constant);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ConstantSourceNode;

    fn bus() -> (AudioContext, MasterBus) {
        let config = EngineConfig::default();
        let context = AudioContext::new(&config);
        let master = MasterBus::new(context.clone(), &config).unwrap();
        (context, master)
    }

    #[test]
    fn impulse_decays_to_silence() {
        let mut rng = SmallRng::seed_from_u64(7);
        let ir = default_impulse(1000.0, &mut rng);
        assert_eq!(ir.channel_count(), 2);
        assert_eq!(ir.len(), 1200);
        let head: f32 = ir.channel(0).unwrap()[..100].iter().map(|s| s.abs()).sum();
        let tail: f32 = ir.channel(0).unwrap()[1100..].iter().map(|s| s.abs()).sum();
        assert!(tail < head * 0.05);
    }

    #[test]
    fn disabled_plugins_map_to_bypass_values() {
        let compressor = CompressorSettings {
            enabled: false,
            ..Default::default()
        };
        assert_eq!(compressor.effective(), COMPRESSOR_BYPASS);
        let limiter = LimiterSettings {
            enabled: false,
            ..Default::default()
        };
        assert_eq!(limiter.effective().ratio, 1.0);
        assert_eq!(limiter.effective().threshold_db, 0.0);
        let pitch = AutoTuneSettings::default();
        assert_eq!(pitch.wet(), AUTO_TUNE_BYPASS_WET);
    }

    #[test]
    fn pitch_bus_mapping() {
        let pitch = AutoTuneSettings {
            retune: 100.0,
            formant: 12.0,
            enabled: true,
            mix: 0.4,
            ..Default::default()
        };
        assert!((pitch.delay_time() - 0.005).abs() < 1e-6);
        assert!((pitch.centre_hz() - 2400.0).abs() < 1e-2);
        assert!((pitch.q() - 5.0).abs() < 1e-6);
        assert!((pitch.wet() - 0.4).abs() < 1e-6);
    }

    #[test]
    fn silence_in_silence_out() {
        let (context, _master) = bus();
        let out = context.graph().render_offline(4096);
        assert!(out.is_silent());
    }

    #[test]
    fn output_level_glides_to_target() {
        let (context, master) = bus();
        let source = context.graph().add(ConstantSourceNode::new(0.1));
        context.graph().node_mut::<ConstantSourceNode>(source).unwrap().start(0.0);
        master.connect_external_input(source).unwrap();
        master.set_output_level(0.0);
        assert_eq!(master.output_level(), 0.0);

        let out = context.graph().render_offline(48_000);
        let tail = out.left[47_000..].iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(tail < 1e-4, "muted master should be silent, got {tail}");
    }

    #[test]
    fn master_stream_is_created_once_and_mirrors_output() {
        let (context, master) = bus();
        let a = master.master_stream().unwrap();
        let nodes = context.graph().node_count();
        let b = master.master_stream().unwrap();
        assert_eq!(context.graph().node_count(), nodes, "second call reuses the tap");

        context.graph().render_offline(256);
        assert_eq!(a.available(), 256);
        let mut frames = Vec::new();
        assert_eq!(b.drain_into(&mut frames), 256);
        assert_eq!(a.available(), 0);
    }

    #[test]
    fn disconnecting_unknown_input_is_tolerated() {
        let (context, master) = bus();
        let stray = context.graph().add(GainNode::new(1.0));
        master.disconnect_external_input(stray);
        master.disconnect_external_input(stray);
        assert!(master.connect_external_input(stray).is_ok());
    }

    #[test]
    fn send_defaults() {
        let (_context, master) = bus();
        let (reverb, delay) = master.send_levels();
        assert!((reverb - 0.15).abs() < 1e-6);
        assert!((delay - 0.2).abs() < 1e-6);
    }
}
