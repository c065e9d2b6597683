//! studio - plays a short sequenced pattern through the full master chain
//!
//! Run with: cargo run --bin studio
//! Log level: RUST_LOG=studio_dsp=debug

mod pattern;

use std::sync::Arc;
use std::time::Duration;

use color_eyre::eyre::{Result as EyreResult, WrapErr};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use studio_dsp::dsp::Waveform;
use studio_dsp::engine::plugin::PluginId;
use studio_dsp::io::{default_output_sample_rate, CpalInputProvider, OutputDriver};
use studio_dsp::router::{ConnectionType, MicChannelConfig};
use studio_dsp::synth::{InstrumentDefinition, SynthParams, TrackState};
use studio_dsp::{EngineConfig, Studio};

const RUN_SECONDS: u64 = 8;

#[tokio::main]
async fn main() -> EyreResult<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let sample_rate = default_output_sample_rate().wrap_err("failed to query the output device")?;
    let config = EngineConfig::default().with_sample_rate(sample_rate).with_tempo(112.0);
    let studio = Studio::new(config, Arc::new(CpalInputProvider)).wrap_err("failed to build the studio")?;
    let _output = OutputDriver::start(studio.context()).wrap_err("failed to open the output device")?;

    // Instruments and tracks
    let lead = InstrumentDefinition::synth("lead", "Saw Lead", SynthParams::default());
    let bass = InstrumentDefinition::synth(
        "bass",
        "Square Bass",
        SynthParams {
            waveform: Waveform::Square,
            cutoff: 900.0,
            ..SynthParams::default()
        },
    );
    let voices = studio.voices();
    voices.ensure_track(TrackState {
        send_a: 0.25,
        send_b: 0.15,
        pan: -0.2,
        ..TrackState::new(0, "lead")
    });
    voices.ensure_track(TrackState {
        gain: 0.8,
        ..TrackState::new(1, "bass")
    });

    let lines = [(pattern::arpeggio(), lead), (pattern::bass(), bass)];
    let step_voices = voices.clone();
    studio.transport().on_step(move |tick| {
        for (line, instrument) in &lines {
            if let Some(note) = line.note_at(&tick) {
                if let Err(e) = step_voices.trigger_note(&note, instrument) {
                    warn!(error = %e, step = tick.step, "note dropped");
                }
            }
        }
    });

    // A virtual input keeps one channel in the meter readout without a device
    let router = studio.router();
    router
        .ensure_channel(MicChannelConfig::new("keys", "Keys").with_connection(ConnectionType::VirtualInstrument))
        .await?;
    let meters = router.subscribe_to_meters(|id, level| {
        if level > 0.0 {
            info!(channel = id, level, "meter");
        }
    });

    studio.set_plugin_enabled(PluginId::AutoTune, true);
    studio.master().set_output_level(0.8);
    studio.transport().start()?;

    let mut state = studio.transport().subscribe();
    let watch = tokio::spawn(async move {
        while state.changed().await.is_ok() {
            let snapshot = *state.borrow();
            if snapshot.current_step % 16 == 0 {
                info!(step = snapshot.current_step, tempo = snapshot.tempo, "bar");
            }
        }
    });

    tokio::time::sleep(Duration::from_secs(RUN_SECONDS)).await;

    studio.transport().stop();
    studio.transport().clear_step_callback();
    meters.unsubscribe();
    watch.abort();
    info!(
        voices = studio.voices().active_voices(),
        reduction_db = studio.master().compressor_reduction(),
        "done"
    );
    Ok(())
}
