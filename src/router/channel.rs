use tracing::debug;

use super::capture::{CaptureHandle, CaptureStream};
use super::config::{
    gate_threshold_db, latency_seconds, level_to_gain, pan_from_ui, ConnectionType, MicChannelConfig,
};
use crate::dsp::dynamics::DynamicsSettings;
use crate::dsp::shaper::distortion_curve;
use crate::dsp::AudioParam;
use crate::graph::{
    AnalyserNode, AudioGraph, ConstantSourceNode, DelayNode, DynamicsNode, GainNode, NodeId,
    StereoPannerNode, StreamSourceNode, WaveShaperNode,
};
use crate::Result;

/*
Channel Graph
=============

One channel, one fixed chain:

  source ──► delay ──► gate ──► shaper ──► gain ──► analyser ──► pan ──► master
  (capture    (latency)  (expander) (guard)  (fader/mute) (meter tap)

The source is the only part that changes over the channel's life:

  Uninitialized ──► Configuring ──► Live          capture stream attached
        │                │
        │                └────────► Degraded      acquisition failed; silent
        │
        └────────────────────────► LiveVirtual   constant source, no device

  any state ──► Disposed  (terminal: capture handed back, every node removed)

Muting drives the fader to 0 and remembers the configured gain, so
unmuting returns exactly to it.
*/

const MAX_LATENCY_SECONDS: f64 = 1.0;
const METER_FFT_SIZE: usize = 256;
const METER_SMOOTHING: f32 = 0.4;
const INITIAL_LEVEL: f32 = 0.7;

const GATE: DynamicsSettings = DynamicsSettings {
    threshold_db: -60.0,
    knee_db: 10.0,
    ratio: 20.0,
    attack: 0.005,
    release: 0.1,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Uninitialized,
    /// Capture acquisition in flight
    Configuring,
    Live,
    LiveVirtual,
    /// Acquisition failed; the chain exists but carries no audio
    Degraded,
    Disposed,
}

#[derive(Debug, Clone, Copy)]
struct ChannelNodes {
    delay: NodeId,
    gate: NodeId,
    shaper: NodeId,
    gain: NodeId,
    analyser: NodeId,
    pan: NodeId,
}

impl ChannelNodes {
    fn all(&self) -> [NodeId; 6] {
        [self.delay, self.gate, self.shaper, self.gain, self.analyser, self.pan]
    }
}

/// Smoothing time constants for channel edits, in seconds.
#[derive(Debug, Clone, Copy)]
pub struct Smoothing {
    /// Level, pan and latency
    pub fast: f64,
    /// Gate
    pub slow: f64,
}

/// Owns one channel's nodes and its capture stream.
pub struct ChannelGraph {
    config: MicChannelConfig,
    state: ChannelState,
    nodes: ChannelNodes,
    source: Option<NodeId>,
    capture: Option<CaptureHandle>,
    /// Gain the fader returns to on unmute
    last_level: f32,
    muted: bool,
    phantom_active: bool,
    /// Token of the acquisition allowed to attach; 0 when none is
    attempt: u64,
}

impl ChannelGraph {
    /// Build the node chain and connect it to `master`. The channel starts
    /// muted with the fader closed.
    pub fn build(graph: &mut AudioGraph, master: NodeId, config: MicChannelConfig) -> Result<Self> {
        let sample_rate = graph.sample_rate();
        let nodes = ChannelNodes {
            delay: graph.add(DelayNode::new(MAX_LATENCY_SECONDS, sample_rate)),
            gate: graph.add(DynamicsNode::gate(sample_rate).with_settings(GATE)),
            shaper: graph.add(WaveShaperNode::new(distortion_curve(0.0))),
            gain: graph.add(GainNode::new(0.0)),
            analyser: graph.add(AnalyserNode::with_smoothing(METER_FFT_SIZE, METER_SMOOTHING)),
            pan: graph.add(StereoPannerNode::new(0.0)),
        };

        let wired = graph.chain(&[
            nodes.delay,
            nodes.gate,
            nodes.shaper,
            nodes.gain,
            nodes.analyser,
            nodes.pan,
            master,
        ]);
        if let Err(e) = wired {
            for id in nodes.all() {
                graph.remove(id);
            }
            return Err(e);
        }

        debug!(channel = %config.id, "channel graph built");
        Ok(Self {
            config,
            state: ChannelState::Uninitialized,
            nodes,
            source: None,
            capture: None,
            last_level: INITIAL_LEVEL,
            muted: true,
            phantom_active: false,
            attempt: 0,
        })
    }

    pub fn config(&self) -> &MicChannelConfig {
        &self.config
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_disposed(&self) -> bool {
        self.state == ChannelState::Disposed
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn phantom_active(&self) -> bool {
        self.phantom_active
    }

    /// Gain the fader sits at (or returns to, when muted).
    pub fn configured_gain(&self) -> f32 {
        self.last_level
    }

    pub fn has_capture(&self) -> bool {
        self.capture.is_some()
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    pub(crate) fn analyser(&self) -> NodeId {
        self.nodes.analyser
    }

    pub(crate) fn gain_node(&self) -> NodeId {
        self.nodes.gain
    }

    pub(crate) fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Start a new acquisition under `token`, invalidating any older one.
    pub(crate) fn begin_attempt(&mut self, token: u64) {
        self.attempt = token;
        self.state = ChannelState::Configuring;
    }

    /// Record a failed acquisition, unless a newer one superseded it.
    pub(crate) fn fail_attempt(&mut self, token: u64) -> bool {
        if self.attempt != token || self.is_disposed() {
            return false;
        }
        self.attempt = 0;
        self.state = ChannelState::Degraded;
        true
    }

    pub fn update_phantom(&mut self, bus: bool) {
        self.phantom_active = self.config.phantom_power || bus;
    }

    /// Store `config` and move every control to match it.
    pub fn apply_config(&mut self, graph: &mut AudioGraph, config: MicChannelConfig, bus_phantom: bool, smoothing: Smoothing) {
        self.config = config;
        self.update_phantom(bus_phantom);
        let level = self.config.level;
        let pan = self.config.pan;
        let latency = self.config.latency_ms;
        let gate = self.config.noise_gate;
        let guard = self.config.distortion_guard;
        let muted = self.config.muted;

        self.set_level(graph, level, smoothing);
        self.set_pan(graph, pan, smoothing);
        self.set_latency(graph, latency, smoothing);
        self.set_noise_gate(graph, gate, smoothing);
        self.set_distortion_guard(graph, guard);
        self.set_muted(graph, muted, smoothing);
    }

    pub fn set_level(&mut self, graph: &mut AudioGraph, percent: f32, smoothing: Smoothing) {
        self.config.level = percent;
        self.last_level = level_to_gain(percent);
        if !self.muted {
            let target = self.last_level;
            self.glide_gain(graph, target, smoothing.fast);
        }
    }

    pub fn set_pan(&mut self, graph: &mut AudioGraph, value: f32, smoothing: Smoothing) {
        self.config.pan = value;
        let now = graph.current_time();
        if let Some(node) = graph.node_mut::<StereoPannerNode>(self.nodes.pan) {
            glide(&mut node.pan, pan_from_ui(value), now, smoothing.fast);
        }
    }

    pub fn set_latency(&mut self, graph: &mut AudioGraph, latency_ms: f32, smoothing: Smoothing) {
        self.config.latency_ms = latency_ms;
        let now = graph.current_time();
        if let Some(node) = graph.node_mut::<DelayNode>(self.nodes.delay) {
            glide(&mut node.delay_time, latency_seconds(latency_ms), now, smoothing.fast);
        }
    }

    pub fn set_noise_gate(&mut self, graph: &mut AudioGraph, percent: f32, smoothing: Smoothing) {
        self.config.noise_gate = percent;
        let now = graph.current_time();
        if let Some(node) = graph.node_mut::<DynamicsNode>(self.nodes.gate) {
            glide(&mut node.threshold, gate_threshold_db(percent), now, smoothing.slow);
            glide(&mut node.ratio, GATE.ratio, now, smoothing.slow);
            glide(&mut node.attack, GATE.attack, now, smoothing.slow);
            glide(&mut node.release, GATE.release, now, smoothing.slow);
        }
    }

    pub fn set_distortion_guard(&mut self, graph: &mut AudioGraph, percent: f32) {
        self.config.distortion_guard = percent;
        if let Some(node) = graph.node_mut::<WaveShaperNode>(self.nodes.shaper) {
            node.set_curve(distortion_curve(percent / 100.0));
        }
    }

    /// Muted forces the fader to 0; unmuting returns to the configured gain.
    pub fn set_muted(&mut self, graph: &mut AudioGraph, muted: bool, smoothing: Smoothing) {
        self.config.muted = muted;
        self.muted = muted;
        let target = if muted { 0.0 } else { self.last_level };
        self.glide_gain(graph, target, smoothing.fast);
    }

    pub fn set_phantom_power(&mut self, enabled: bool, bus: bool) {
        self.config.phantom_power = enabled;
        self.update_phantom(bus);
    }

    pub fn set_connection_type(&mut self, connection_type: ConnectionType) {
        self.config.connection_type = connection_type;
    }

    fn glide_gain(&mut self, graph: &mut AudioGraph, target: f32, time_constant: f64) {
        let now = graph.current_time();
        if let Some(node) = graph.node_mut::<GainNode>(self.nodes.gain) {
            glide(&mut node.gain, target, now, time_constant);
        }
    }

    /// Keep a virtual channel's chain rendering with a silent source.
    pub fn attach_virtual_source(&mut self, graph: &mut AudioGraph) -> Result<()> {
        if self.source.is_none() {
            let mut constant = ConstantSourceNode::new(0.0);
            constant.start(graph.current_time());
            let id = graph.add(constant);
            if let Err(e) = graph.connect(id, self.nodes.delay) {
                graph.remove(id);
                return Err(e);
            }
            self.source = Some(id);
        }
        self.state = ChannelState::LiveVirtual;
        Ok(())
    }

    /// Feed an acquired capture stream into the chain. Returns the capture
    /// it replaced, if any.
    #[must_use = "dropping the returned capture stops its tracks"]
    pub fn attach_capture(&mut self, graph: &mut AudioGraph, stream: CaptureStream) -> Result<Option<CaptureHandle>> {
        let replaced = self.teardown_source(graph);
        let (frames, handle) = stream.split();
        let id = graph.add(StreamSourceNode::new(frames));
        if let Err(e) = graph.connect(id, self.nodes.delay) {
            graph.remove(id);
            return Err(e);
        }
        self.source = Some(id);
        self.capture = Some(handle);
        self.attempt = 0;
        self.state = ChannelState::Live;
        Ok(replaced)
    }

    /// Drop the source node. The chain stays built.
    ///
    /// The capture is handed back rather than stopped here: stopping a
    /// device track can block, so callers release their locks first.
    #[must_use = "dropping the returned capture stops its tracks"]
    pub fn teardown_source(&mut self, graph: &mut AudioGraph) -> Option<CaptureHandle> {
        self.attempt = 0;
        if let Some(source) = self.source.take() {
            graph.remove(source);
        }
        if self.state != ChannelState::Disposed {
            self.state = ChannelState::Uninitialized;
        }
        self.capture.take()
    }

    /// Remove every node. Terminal. Returns the capture to stop, as
    /// [`ChannelGraph::teardown_source`] does.
    #[must_use = "dropping the returned capture stops its tracks"]
    pub fn dispose(&mut self, graph: &mut AudioGraph) -> Option<CaptureHandle> {
        let capture = self.teardown_source(graph);
        for id in self.nodes.all() {
            graph.remove(id);
        }
        self.muted = true;
        self.state = ChannelState::Disposed;
        debug!(channel = %self.config.id, "channel disposed");
        capture
    }
}

fn glide(param: &mut AudioParam, value: f32, now: f64, time_constant: f64) {
    param.cancel_scheduled_values(now);
    param.set_target_at_time(value, now, time_constant);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ConstantSourceNode as Constant, GainNode};

    const SMOOTH: Smoothing = Smoothing { fast: 0.01, slow: 0.05 };

    fn setup() -> (AudioGraph, NodeId, ChannelGraph) {
        let mut graph = AudioGraph::new(48_000.0, 128);
        let master = graph.add(GainNode::new(1.0));
        let destination = graph.destination();
        graph.connect(master, destination).unwrap();
        let channel = ChannelGraph::build(&mut graph, master, MicChannelConfig::new("mic-1", "Vocal")).unwrap();
        (graph, master, channel)
    }

    fn fader(graph: &AudioGraph, channel: &ChannelGraph) -> f32 {
        graph.node::<GainNode>(channel.gain_node()).unwrap().gain.target()
    }

    #[test]
    fn starts_muted_with_closed_fader() {
        let (graph, _, channel) = setup();
        assert_eq!(channel.state(), ChannelState::Uninitialized);
        assert!(channel.is_muted());
        assert_eq!(fader(&graph, &channel), 0.0);
        assert_eq!(channel.configured_gain(), 0.7);
    }

    #[test]
    fn mute_round_trip_restores_exact_level() {
        let (mut graph, _, mut channel) = setup();
        channel.set_muted(&mut graph, false, SMOOTH);
        channel.set_level(&mut graph, 50.0, SMOOTH);
        let configured = fader(&graph, &channel);
        assert!((configured - 0.5f32.powf(1.4)).abs() < 1e-6);

        channel.set_muted(&mut graph, true, SMOOTH);
        assert_eq!(fader(&graph, &channel), 0.0);
        channel.set_level(&mut graph, 80.0, SMOOTH);
        assert_eq!(fader(&graph, &channel), 0.0, "level changes while muted stay silent");

        channel.set_muted(&mut graph, false, SMOOTH);
        assert_eq!(fader(&graph, &channel), level_to_gain(80.0));
    }

    #[test]
    fn virtual_source_keeps_chain_live_and_silent() {
        let (mut graph, _, mut channel) = setup();
        channel.attach_virtual_source(&mut graph).unwrap();
        channel.attach_virtual_source(&mut graph).unwrap();
        assert_eq!(channel.state(), ChannelState::LiveVirtual);
        assert!(channel.has_source());
        assert!(graph.render_offline(512).is_silent());
    }

    #[test]
    fn dispose_removes_every_node() {
        let (mut graph, _, mut channel) = setup();
        let before = graph.node_count();
        channel.attach_virtual_source(&mut graph).unwrap();
        assert!(channel.dispose(&mut graph).is_none(), "virtual sources hold no capture");
        assert_eq!(graph.node_count(), before - 6);
        assert_eq!(channel.state(), ChannelState::Disposed);

        // Setters after disposal find no nodes and change nothing
        channel.set_level(&mut graph, 100.0, SMOOTH);
        channel.set_muted(&mut graph, false, SMOOTH);
        assert_eq!(graph.node_count(), before - 6);
    }

    #[test]
    fn channel_passes_signal_to_master_when_unmuted() {
        let (mut graph, _, mut channel) = setup();
        let mut config = channel.config().clone();
        config.noise_gate = 0.0;
        config.distortion_guard = 0.0;
        config.level = 100.0;
        config.latency_ms = 0.0;
        channel.apply_config(&mut graph, config, false, SMOOTH);

        let mut tone = Constant::new(0.5);
        tone.start(0.0);
        let tone = graph.add(tone);
        graph.connect(tone, channel.nodes.delay).unwrap();
        let out = graph.render_offline(4800);
        assert!(out.peak() > 0.05, "expected signal, peak {}", out.peak());
    }

    #[test]
    fn phantom_is_union_of_channel_and_bus() {
        let (_, _, mut channel) = setup();
        channel.set_phantom_power(false, true);
        assert!(channel.phantom_active());
        channel.set_phantom_power(true, false);
        assert!(channel.phantom_active());
        channel.set_phantom_power(false, false);
        assert!(!channel.phantom_active());
    }
}
