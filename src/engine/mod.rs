pub mod master;
pub mod plugin;
pub mod transport;

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use self::master::{MasterBus, MasterStream};
use self::plugin::{PluginId, PluginRack};
use self::transport::Transport;
use crate::graph::AudioContext;
use crate::router::{ChannelRouter, InputProvider};
use crate::synth::VoiceEngine;
use crate::{EngineConfig, Result, StudioError};

pub use master::{AutoTuneSettings, CompressorSettings, LimiterSettings};
pub use transport::{StepTick, TransportState};

/*
Studio
======

Every component renders into one shared `AudioContext`:

  Transport ── step callback ──► VoiceEngine ──┐
                                               ├──► MasterBus ──► destination
  ChannelRouter (one chain per input) ─────────┘

The plugin rack only holds control values; each edit is pushed to the
master bus right away, and the whole rack once at construction.

No device is opened here. Attach an `io::OutputDriver` (or render offline
through `context().graph()`) to hear anything.
*/

pub struct Studio {
    config: EngineConfig,
    context: AudioContext,
    master: Arc<MasterBus>,
    voices: Arc<VoiceEngine>,
    transport: Transport,
    router: ChannelRouter,
    rack: Mutex<PluginRack>,
}

impl Studio {
    pub fn new(config: EngineConfig, provider: Arc<dyn InputProvider>) -> Result<Self> {
        let context = AudioContext::new(&config);
        let master = Arc::new(MasterBus::new(context.clone(), &config)?);
        let voices = Arc::new(VoiceEngine::new(context.clone(), &master));
        let transport = Transport::new(context.clone(), &config)?;
        let router = ChannelRouter::new(context.clone(), master.input(), provider, &config);

        let rack = PluginRack::new();
        rack.sync(&master);

        info!(
            sample_rate = config.sample_rate,
            tempo = config.tempo,
            "studio ready"
        );
        Ok(Self {
            config,
            context,
            master,
            voices,
            transport,
            router,
            rack: Mutex::new(rack),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn context(&self) -> &AudioContext {
        &self.context
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Shared so step callbacks can hold their own handle.
    pub fn voices(&self) -> &Arc<VoiceEngine> {
        &self.voices
    }

    pub fn master(&self) -> &Arc<MasterBus> {
        &self.master
    }

    pub fn router(&self) -> &ChannelRouter {
        &self.router
    }

    /// Snapshot of the rack for display.
    pub fn plugin_rack(&self) -> PluginRack {
        self.rack.lock().clone()
    }

    pub fn set_plugin_enabled(&self, id: PluginId, enabled: bool) {
        let mut rack = self.rack.lock();
        rack.set_enabled(id, enabled);
        rack.sync_one(id, &self.master);
    }

    /// Set one control; returns the value actually stored after clamping
    /// and step snapping.
    pub fn set_plugin_value(&self, id: PluginId, control: &str, value: f32) -> Result<f32> {
        let mut rack = self.rack.lock();
        let stored = rack.set_value(id, control, value)?;
        rack.sync_one(id, &self.master);
        Ok(stored)
    }

    /// Begin a capture session.
    ///
    /// Refused with [`StudioError::NothingArmed`] unless at least one of
    /// `armed` is a configured, unmuted channel. Nothing is allocated on
    /// refusal.
    pub async fn start_recording(&self, armed: &[&str]) -> Result<MasterStream> {
        if !armed.iter().any(|id| self.router.is_unmuted(id)) {
            warn!("No channels armed");
            return Err(StudioError::NothingArmed);
        }
        self.router.set_recording_active(true).await;
        let stream = self.master.master_stream()?;
        info!(channels = armed.len(), "recording started");
        Ok(stream)
    }

    pub async fn stop_recording(&self) {
        self.router.set_recording_active(false).await;
        info!("recording stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::{MicChannelConfig, UnsupportedInput};

    fn studio() -> Studio {
        Studio::new(EngineConfig::default(), Arc::new(UnsupportedInput)).unwrap()
    }

    #[tokio::test]
    async fn recording_refused_without_armed_channels() {
        let studio = studio();
        assert!(matches!(
            studio.start_recording(&[]).await,
            Err(StudioError::NothingArmed)
        ));

        let muted = MicChannelConfig::new("mic-1", "Vocal").with_muted(true);
        studio.router().ensure_channel(muted).await.unwrap();
        assert!(matches!(
            studio.start_recording(&["mic-1"]).await,
            Err(StudioError::NothingArmed)
        ));
    }

    #[tokio::test]
    async fn recording_starts_with_an_unmuted_channel() {
        let studio = studio();
        let keys = MicChannelConfig::new("keys", "Keys")
            .with_connection(crate::router::ConnectionType::VirtualInstrument);
        studio.router().ensure_channel(keys).await.unwrap();
        let stream = studio.start_recording(&["keys", "missing"]).await.unwrap();
        assert_eq!(stream.sample_rate(), 48_000.0);
        studio.stop_recording().await;
    }

    #[test]
    fn plugin_edits_reach_the_master_bus() {
        let studio = studio();
        studio.set_plugin_value(PluginId::Compressor, "threshold", -30.0).unwrap();
        assert_eq!(studio.master().compressor_settings().threshold_db, -30.0);

        studio.set_plugin_enabled(PluginId::AutoTune, true);
        assert!(studio.master().auto_tune_settings().enabled);
        assert!(studio.plugin_rack().get(PluginId::AutoTune).unwrap().enabled);
    }
}
