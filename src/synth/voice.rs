use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::instrument::{InstrumentDefinition, InstrumentKind, SampleMap, SynthParams, TrackPatch, TrackState};
use super::note::NoteEvent;
use crate::engine::master::MasterBus;
use crate::graph::{
    AudioContext, AudioGraph, BufferSourceNode, FilterNode, GainNode, NodeId, OscillatorNode,
    SampleBuffer, StereoPannerNode,
};
use crate::{Result, StudioError};

/*
Voices
======

Every trigger builds a fresh chain and hands it to the graph. Nothing is
pooled or stolen: a voice lives until its source finishes, then the graph
removes the whole chain.

  sample voice

    buffer source ──► vca (velocity × gain) ──► pan ──► master
                          │
                          ├──► send A (amount) ──► reverb bus
                          └──► send B (amount) ──► delay bus

  synth voice

    oscillator ──► low-pass ──► vca (envelope) ──► pan ──► master
                                    │
                                    └──► sends, as above

Sends are only built when their amount is above zero. They tap the vca, so
a synth voice's sends follow its envelope.

Voice timing comes entirely from the scheduled start time. A start time
already in the past is pulled up to "now" so the voice still sounds,
starting immediately.
*/

/// Mix settings for one trigger.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VoiceParams {
    /// 0.0 - 1.0
    pub velocity: f32,
    /// -1.0 - 1.0
    pub pan: f32,
    /// Output gain before the master bus
    pub gain: f32,
    /// Reverb send, 0.0 - 1.0
    pub send_a: f32,
    /// Delay send, 0.0 - 1.0
    pub send_b: f32,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            velocity: 1.0,
            pan: 0.0,
            gain: 1.0,
            send_a: 0.0,
            send_b: 0.0,
        }
    }
}

impl VoiceParams {
    /// Defaults for synthesized notes.
    pub fn synth() -> Self {
        Self {
            gain: 0.6,
            send_a: 0.1,
            send_b: 0.05,
            ..Self::default()
        }
    }

    pub fn with_velocity(mut self, velocity: f32) -> Self {
        self.velocity = velocity;
        self
    }

    fn from_track(track: &TrackState, velocity: f32) -> Self {
        Self {
            velocity,
            pan: track.pan,
            gain: track.gain,
            send_a: track.send_a,
            send_b: track.send_b,
        }
    }

    fn peak(&self) -> f32 {
        self.velocity.clamp(0.0, 1.0) * self.gain.max(0.0)
    }
}

#[derive(Debug, Clone, Copy)]
struct Busses {
    master: NodeId,
    reverb: NodeId,
    delay: NodeId,
}

/// Triggers sample and synth voices onto the shared graph.
pub struct VoiceEngine {
    context: AudioContext,
    busses: Busses,
    tracks: Mutex<HashMap<u32, TrackState>>,
    sample_maps: Mutex<HashMap<String, SampleMap>>,
}

impl VoiceEngine {
    pub fn new(context: AudioContext, master: &MasterBus) -> Self {
        Self {
            context,
            busses: Busses {
                master: master.input(),
                reverb: master.reverb_input(),
                delay: master.delay_input(),
            },
            tracks: Mutex::new(HashMap::new()),
            sample_maps: Mutex::new(HashMap::new()),
        }
    }

    /// Insert or replace a track's mix settings.
    pub fn ensure_track(&self, track: TrackState) {
        self.tracks.lock().insert(track.id, track);
    }

    /// Patch an existing track. Unknown ids are ignored.
    pub fn update_track(&self, id: u32, patch: TrackPatch) {
        if let Some(track) = self.tracks.lock().get_mut(&id) {
            track.apply(patch);
        }
    }

    pub fn track(&self, id: u32) -> Option<TrackState> {
        self.tracks.lock().get(&id).cloned()
    }

    pub fn register_sample_map(&self, name: impl Into<String>, map: SampleMap) {
        self.sample_maps.lock().insert(name.into(), map);
    }

    /// Voices still sounding or waiting to start.
    pub fn active_voices(&self) -> usize {
        self.context.graph().voice_count()
    }

    /// Play `buffer` once starting at audio-clock time `when`. Returns the
    /// voice's source node.
    pub fn play_sample(&self, buffer: Arc<SampleBuffer>, when: f64, params: &VoiceParams) -> Result<NodeId> {
        self.spawn_sample(buffer, when, params, 1.0)
    }

    fn spawn_sample(
        &self,
        buffer: Arc<SampleBuffer>,
        when: f64,
        params: &VoiceParams,
        playback_rate: f32,
    ) -> Result<NodeId> {
        let mut graph = self.context.graph();
        let when = clamp_start(&graph, when);

        let mut source = BufferSourceNode::new(buffer);
        source.playback_rate.set_value(playback_rate);
        source.start(when);
        let source = graph.add(source);
        let vca = graph.add(GainNode::new(params.peak()));
        let pan = graph.add(StereoPannerNode::new(params.pan));

        let mut chain = vec![vca, pan];
        let wired = graph
            .chain(&[source, vca, pan, self.busses.master])
            .and_then(|_| self.connect_sends(&mut graph, vca, params, &mut chain));
        if let Err(e) = wired {
            remove_chain(&mut graph, source, &chain);
            return Err(e);
        }

        graph.register_voice(source, chain);
        trace!(time = when, rate = playback_rate, "sample voice scheduled");
        Ok(source)
    }

    /// Play a synthesized note of `frequency` Hz for `duration` seconds.
    /// Returns the voice's oscillator node.
    pub fn play_synth(
        &self,
        when: f64,
        frequency: f64,
        duration: f64,
        params: &VoiceParams,
        synth: &SynthParams,
    ) -> Result<NodeId> {
        if !(frequency.is_finite() && frequency > 0.0) {
            return Err(StudioError::InvalidParam(format!("frequency {frequency}")));
        }
        if !(duration.is_finite() && duration > 0.0) {
            return Err(StudioError::InvalidParam(format!("duration {duration}")));
        }

        let mut graph = self.context.graph();
        let when = clamp_start(&graph, when);

        let mut vca = GainNode::new(0.0);
        let stop_time = synth.envelope.apply(&mut vca.gain, when, duration, params.peak());

        let mut osc = OscillatorNode::new(synth.waveform, frequency as f32);
        osc.start(when);
        osc.stop(stop_time);

        let osc = graph.add(osc);
        let filter = graph.add(FilterNode::lowpass(synth.cutoff, synth.q));
        let vca = graph.add(vca);
        let pan = graph.add(StereoPannerNode::new(params.pan));

        let mut chain = vec![filter, vca, pan];
        let wired = graph
            .chain(&[osc, filter, vca, pan, self.busses.master])
            .and_then(|_| self.connect_sends(&mut graph, vca, params, &mut chain));
        if let Err(e) = wired {
            remove_chain(&mut graph, osc, &chain);
            return Err(e);
        }

        graph.register_voice(osc, chain);
        trace!(time = when, frequency, duration, stop = stop_time, "synth voice scheduled");
        Ok(osc)
    }

    fn connect_sends(
        &self,
        graph: &mut AudioGraph,
        vca: NodeId,
        params: &VoiceParams,
        chain: &mut Vec<NodeId>,
    ) -> Result<()> {
        let sends = [
            (params.send_a, self.busses.reverb),
            (params.send_b, self.busses.delay),
        ];
        for (amount, bus) in sends {
            if amount > 0.0 {
                let send = graph.add(GainNode::new(amount.min(1.0)));
                chain.push(send);
                graph.chain(&[vca, send, bus])?;
            }
        }
        Ok(())
    }

    /// Resolve a note against its track and instrument and play it.
    ///
    /// Returns `None` when a sampled instrument has nothing to play for the
    /// note.
    pub fn trigger_note(&self, note: &NoteEvent, instrument: &InstrumentDefinition) -> Result<Option<NodeId>> {
        let params = match self.track(note.channel) {
            Some(track) => VoiceParams::from_track(&track, note.velocity),
            None => {
                debug!(channel = note.channel, "note on unregistered track; using unity mix");
                VoiceParams::default().with_velocity(note.velocity)
            }
        };

        match &instrument.kind {
            InstrumentKind::Synthesized(synth) => self
                .play_synth(note.time, note.frequency(), note.duration, &params, synth)
                .map(Some),
            InstrumentKind::Sampled { sample_map } => {
                let resolved = self
                    .sample_maps
                    .lock()
                    .get(sample_map)
                    .and_then(|map| map.resolve(note.pitch));
                match resolved {
                    Some((buffer, rate)) => self.spawn_sample(buffer, note.time, &params, rate).map(Some),
                    None => {
                        warn!(instrument = %instrument.id, sample_map = %sample_map, pitch = note.pitch, "no sample for note");
                        Ok(None)
                    }
                }
            }
        }
    }
}

fn clamp_start(graph: &AudioGraph, when: f64) -> f64 {
    let now = graph.current_time();
    if when < now {
        debug!(when, now, "voice start in the past; starting now");
        now
    } else {
        when
    }
}

fn remove_chain(graph: &mut AudioGraph, source: NodeId, chain: &[NodeId]) {
    graph.remove(source);
    for &id in chain {
        graph.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EngineConfig;

    fn engine() -> (AudioContext, Arc<MasterBus>, VoiceEngine) {
        let config = EngineConfig::default();
        let context = AudioContext::new(&config);
        let master = Arc::new(MasterBus::new(context.clone(), &config).unwrap());
        let voices = VoiceEngine::new(context.clone(), &master);
        (context, master, voices)
    }

    #[test]
    fn sends_are_built_only_when_requested() {
        let (context, _master, voices) = engine();
        let buffer = Arc::new(SampleBuffer::mono(vec![0.5; 64], 48_000.0));
        let before = context.graph().node_count();

        voices.play_sample(buffer.clone(), 0.0, &VoiceParams::default()).unwrap();
        assert_eq!(context.graph().node_count(), before + 3);

        let params = VoiceParams {
            send_a: 0.3,
            send_b: 0.2,
            ..Default::default()
        };
        voices.play_sample(buffer, 0.0, &params).unwrap();
        assert_eq!(context.graph().node_count(), before + 3 + 5);
    }

    #[test]
    fn finished_voices_are_reclaimed() {
        let (context, _master, voices) = engine();
        let buffer = Arc::new(SampleBuffer::mono(vec![0.5; 64], 48_000.0));
        let before = context.graph().node_count();
        voices.play_sample(buffer, 0.001, &VoiceParams::default()).unwrap();
        assert_eq!(voices.active_voices(), 1);

        context.graph().render_offline(1024);
        assert_eq!(voices.active_voices(), 0);
        assert_eq!(context.graph().node_count(), before);
    }

    #[test]
    fn synth_voice_stops_after_release_margin() {
        let (context, _master, voices) = engine();
        voices
            .play_synth(0.0, 440.0, 0.1, &VoiceParams::synth(), &SynthParams::default())
            .unwrap();
        context.graph().render_offline(48_000);
        assert_eq!(voices.active_voices(), 1, "still inside the release margin");
        context.graph().render_offline(60_000);
        assert_eq!(voices.active_voices(), 0);
    }

    #[test]
    fn invalid_synth_inputs_are_rejected() {
        let (context, _master, voices) = engine();
        let before = context.graph().node_count();
        let synth = SynthParams::default();
        assert!(voices.play_synth(0.0, 0.0, 0.1, &VoiceParams::synth(), &synth).is_err());
        assert!(voices.play_synth(0.0, 440.0, -1.0, &VoiceParams::synth(), &synth).is_err());
        assert_eq!(context.graph().node_count(), before);
    }

    #[test]
    fn past_start_is_pulled_to_now() {
        let (context, _master, voices) = engine();
        context.graph().render_offline(4800);
        let buffer = Arc::new(SampleBuffer::mono(vec![1.0; 480], 48_000.0));
        voices.play_sample(buffer, 0.0, &VoiceParams::default()).unwrap();
        let out = context.graph().render_offline(2048);
        assert!(!out.is_silent());
    }

    #[test]
    fn trigger_uses_track_mix_and_sample_map() {
        let (context, _master, voices) = engine();
        let buffer = Arc::new(SampleBuffer::mono(vec![0.5; 256], 48_000.0));
        voices.register_sample_map("kit", SampleMap::single(36, buffer));
        voices.ensure_track(TrackState::new(1, "drums"));
        voices.update_track(1, TrackPatch { send_a: Some(0.5), ..Default::default() });
        assert_eq!(voices.track(1).unwrap().send_a, 0.5);

        let kit = InstrumentDefinition::sampled("drums", "Drums", "kit");
        let note = NoteEvent::new(0.0, 0.1, 36, 1.0, 1);
        let before = context.graph().node_count();
        assert!(voices.trigger_note(&note, &kit).unwrap().is_some());
        assert_eq!(context.graph().node_count(), before + 4);

        let missing = InstrumentDefinition::sampled("keys", "Keys", "nope");
        assert!(voices.trigger_note(&note, &missing).unwrap().is_none());

        let lead = InstrumentDefinition::synth("lead", "Lead", SynthParams::default());
        assert!(voices.trigger_note(&note, &lead).unwrap().is_some());
    }
}
