//! Microphone/channel routing.
//!
//! Every input channel gets its own fixed processing chain feeding the
//! master bus input. The router owns those chains, acquires capture streams
//! through an [`InputProvider`], and broadcasts per-channel meter levels.

/// Capture constraints, the provider seam and track ownership.
pub mod capture;
/// Per-channel node chain and lifecycle.
pub mod channel;
pub mod config;
pub mod meter;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::graph::{AnalyserNode, AudioContext, AudioGraph, NodeId};
use crate::{EngineConfig, Result, StudioError};

pub use capture::{CaptureConstraints, CaptureHandle, CaptureStream, CaptureTrack, InputProvider, UnsupportedInput};
pub use channel::{ChannelGraph, ChannelState, Smoothing};
pub use config::{ConnectionType, MicChannelConfig};
pub use meter::{MeterListener, MeterSubscription};

use meter::MeterHub;

/*
Channel Router
==============

  ensure_channel(config)
        │
        ├─ build the chain if the id is new (or was disposed)
        │  (refreshes queued by unmute or recording never rebuild)
        ├─ apply config: fader, mute, pan, latency, gate, guard
        │
        ├─ virtual input ──► silent constant source     (LiveVirtual)
        ├─ Live or Configuring ──► done
        └─ otherwise ──► Configuring, then await the provider
                              │
                              ├─ Ok  ──► stream source ──► delay  (Live)
                              └─ Err ──► warn                     (Degraded)

No lock is held across the provider await, so a slow permission prompt
on one channel never blocks edits to it or to any other channel. Each
acquisition carries a router-wide token; a result whose token no longer
matches the channel's (torn down, disposed, rebuilt, or re-requested)
is dropped, which stops its tracks.

Lock order is always channels, then graph. Meter listeners are called
with no lock held.
*/

#[derive(Debug, Clone, Copy)]
struct RouterFlags {
    phantom_bus: bool,
    noise_suppression: bool,
}

pub(crate) struct RouterInner {
    context: AudioContext,
    master_input: NodeId,
    provider: Arc<dyn InputProvider>,
    channels: Mutex<BTreeMap<String, ChannelGraph>>,
    flags: Mutex<RouterFlags>,
    pub(crate) meters: Mutex<MeterHub>,
    next_attempt: AtomicU64,
    smoothing: Smoothing,
    meter_interval: Duration,
}

/// Cloneable handle to the channel router.
#[derive(Clone)]
pub struct ChannelRouter {
    inner: Arc<RouterInner>,
}

impl ChannelRouter {
    /// `master_input` is the node every channel chain ends in.
    pub fn new(
        context: AudioContext,
        master_input: NodeId,
        provider: Arc<dyn InputProvider>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                context,
                master_input,
                provider,
                channels: Mutex::new(BTreeMap::new()),
                flags: Mutex::new(RouterFlags {
                    phantom_bus: false,
                    noise_suppression: true,
                }),
                meters: Mutex::new(MeterHub::default()),
                next_attempt: AtomicU64::new(1),
                smoothing: Smoothing {
                    fast: config.channel_smoothing,
                    slow: config.effect_smoothing,
                },
                meter_interval: config.meter_interval.max(Duration::from_millis(1)),
            }),
        }
    }

    /// Build (or refresh) a channel and bring its input up.
    ///
    /// Idempotent: a live channel only takes the new config. Acquisition
    /// failure is logged and leaves the channel [`ChannelState::Degraded`];
    /// the returned state says which way it went. Only graph wiring errors
    /// are returned as `Err`. A disposed id gets a fresh chain.
    pub async fn ensure_channel(&self, config: MicChannelConfig) -> Result<ChannelState> {
        let id = config.id.clone();
        self.bring_up(&id, Some(config)).await
    }

    /// Re-run the input bring-up for an existing channel with its stored
    /// config. Unknown and disposed ids are left alone, so a refresh that
    /// was queued before a dispose cannot rebuild the channel.
    async fn refresh_channel(&self, id: &str) -> Result<ChannelState> {
        self.bring_up(id, None).await
    }

    async fn bring_up(&self, id: &str, config: Option<MicChannelConfig>) -> Result<ChannelState> {
        let token = self.inner.next_attempt.fetch_add(1, Ordering::Relaxed);
        let mut released = None;

        let (label, constraints) = {
            let flags = *self.inner.flags.lock();
            let mut channels = self.inner.channels.lock();
            let mut graph = self.inner.context.graph();

            if let Some(config) = &config {
                if channels.get(id).is_some_and(ChannelGraph::is_disposed) {
                    channels.remove(id);
                }
                if !channels.contains_key(id) {
                    let built = ChannelGraph::build(&mut graph, self.inner.master_input, config.clone())?;
                    channels.insert(id.to_string(), built);
                }
            }
            let Some(channel) = channels.get_mut(id) else {
                return Ok(ChannelState::Uninitialized);
            };
            if channel.is_disposed() {
                return Ok(ChannelState::Disposed);
            }
            if let Some(config) = config {
                channel.apply_config(&mut graph, config, flags.phantom_bus, self.inner.smoothing);
            }

            let wants_virtual = channel.config().connection_type.is_virtual();
            let is_virtual = channel.state() == ChannelState::LiveVirtual;
            let in_flight = channel.state() == ChannelState::Configuring;
            if wants_virtual != is_virtual && (channel.has_source() || in_flight) {
                released = channel.teardown_source(&mut graph);
            }

            if wants_virtual {
                channel.attach_virtual_source(&mut graph)?;
                return Ok(ChannelState::LiveVirtual);
            }
            if matches!(channel.state(), ChannelState::Live | ChannelState::Configuring) {
                return Ok(channel.state());
            }

            channel.begin_attempt(token);
            (
                channel.config().label.clone(),
                CaptureConstraints::for_channel(channel.config(), flags.noise_suppression),
            )
        };
        drop(released);

        debug!(channel = %id, "acquiring capture stream");
        let acquired = self.inner.provider.acquire(&label, constraints).await;

        let state = {
            let mut channels = self.inner.channels.lock();
            let Some(channel) = channels.get_mut(id) else {
                return Ok(ChannelState::Disposed);
            };

            match acquired {
                Ok(stream) => {
                    if channel.attempt() != token || channel.is_disposed() {
                        // Superseded; the stream is dropped once the locks are released
                        debug!(channel = %id, "discarding stale capture stream");
                        let state = channel.state();
                        drop(channels);
                        drop(stream);
                        return Ok(state);
                    }
                    let mut graph = self.inner.context.graph();
                    released = channel.attach_capture(&mut graph, stream)?;
                    ChannelState::Live
                }
                Err(e) => {
                    if channel.fail_attempt(token) {
                        warn!(channel = %id, label = %label, error = %e, "unable to access input for channel");
                    }
                    return Ok(channel.state());
                }
            }
        };
        drop(released);

        info!(channel = %id, "capture stream live");
        self.resume_context().await;
        Ok(state)
    }

    /// Run `edit` against a channel that exists and is not disposed.
    fn with_channel<F>(&self, id: &str, edit: F)
    where
        F: FnOnce(&mut ChannelGraph, &mut AudioGraph, RouterFlags),
    {
        let flags = *self.inner.flags.lock();
        let mut channels = self.inner.channels.lock();
        if let Some(channel) = channels.get_mut(id).filter(|c| !c.is_disposed()) {
            let mut graph = self.inner.context.graph();
            edit(channel, &mut graph, flags);
        }
    }

    pub fn set_channel_level(&self, id: &str, percent: f32) {
        let smoothing = self.inner.smoothing;
        self.with_channel(id, |channel, graph, _| channel.set_level(graph, percent, smoothing));
    }

    /// `value` is UI pan, -50 to 50.
    pub fn set_channel_pan(&self, id: &str, value: f32) {
        let smoothing = self.inner.smoothing;
        self.with_channel(id, |channel, graph, _| channel.set_pan(graph, value, smoothing));
    }

    pub fn set_channel_latency(&self, id: &str, latency_ms: f32) {
        let smoothing = self.inner.smoothing;
        self.with_channel(id, |channel, graph, _| channel.set_latency(graph, latency_ms, smoothing));
    }

    pub fn set_channel_noise_gate(&self, id: &str, percent: f32) {
        let smoothing = self.inner.smoothing;
        self.with_channel(id, |channel, graph, _| channel.set_noise_gate(graph, percent, smoothing));
    }

    pub fn set_channel_distortion_guard(&self, id: &str, percent: f32) {
        self.with_channel(id, |channel, graph, _| channel.set_distortion_guard(graph, percent));
    }

    pub fn set_channel_phantom_power(&self, id: &str, enabled: bool) {
        self.with_channel(id, |channel, _, flags| channel.set_phantom_power(enabled, flags.phantom_bus));
    }

    /// Mute forces the fader to 0. Unmuting restores the configured level
    /// and brings the input back up if it is not live.
    pub fn set_muted(&self, id: &str, muted: bool) {
        let smoothing = self.inner.smoothing;
        let mut found = false;
        self.with_channel(id, |channel, graph, _| {
            channel.set_muted(graph, muted, smoothing);
            found = true;
        });
        if found && !muted {
            self.spawn_refresh(id);
        }
    }

    /// Switch input type: any current source is torn down and the channel
    /// re-initialized under the new type.
    pub fn set_connection_type(&self, id: &str, connection_type: ConnectionType) {
        let mut released = None;
        let mut reinit = false;
        self.with_channel(id, |channel, graph, _| {
            channel.set_connection_type(connection_type);
            if channel.state() != ChannelState::Uninitialized {
                released = channel.teardown_source(graph);
                reinit = true;
            }
        });
        drop(released);
        if reinit {
            self.spawn_refresh(id);
        }
    }

    /// Phantom power is active on a channel when its own flag or the bus
    /// flag is set.
    pub fn set_phantom_power_bus(&self, enabled: bool) {
        let mut flags = self.inner.flags.lock();
        flags.phantom_bus = enabled;
        drop(flags);
        for channel in self.inner.channels.lock().values_mut() {
            channel.update_phantom(enabled);
        }
    }

    /// Applies to acquisitions made from now on; live streams keep the
    /// constraints they were opened with.
    pub fn set_noise_suppression(&self, enabled: bool) {
        self.inner.flags.lock().noise_suppression = enabled;
    }

    /// Stop capture and remove the channel's nodes. Unknown ids are ignored.
    pub fn dispose_channel(&self, id: &str) {
        let released = {
            let mut channels = self.inner.channels.lock();
            match channels.get_mut(id) {
                Some(channel) if !channel.is_disposed() => {
                    let mut graph = self.inner.context.graph();
                    channel.dispose(&mut graph)
                }
                _ => None,
            }
        };
        // Tracks stop with no router or graph lock held
        drop(released);
    }

    /// Resume processing and bring up every unmuted channel, or suspend
    /// when nothing is left to hear.
    pub async fn set_recording_active(&self, active: bool) {
        if active {
            self.resume_context().await;
            let pending: Vec<String> = self
                .inner
                .channels
                .lock()
                .iter()
                .filter(|(_, c)| !c.is_disposed() && !c.config().muted)
                .map(|(id, _)| id.clone())
                .collect();
            for id in pending {
                self.spawn_refresh(&id);
            }
            return;
        }

        if !self.has_live_channels() {
            let context = self.inner.context.clone();
            if let Err(e) = blocking(move || context.suspend()).await {
                warn!(error = %e, "unable to suspend audio context");
            }
        }
    }

    /// Device backends answer suspend/resume over a blocking round trip,
    /// so async callers go through the blocking pool.
    async fn resume_context(&self) {
        let context = self.inner.context.clone();
        if let Err(e) = blocking(move || context.resume()).await {
            warn!(error = %e, "unable to resume audio context");
        }
    }

    fn spawn_refresh(&self, id: &str) {
        let Ok(runtime) = Handle::try_current() else {
            warn!(channel = %id, "no async runtime; channel input not re-initialized");
            return;
        };
        let router = self.clone();
        let id = id.to_string();
        runtime.spawn(async move {
            if let Err(e) = router.refresh_channel(&id).await {
                warn!(channel = %id, error = %e, "channel initialization failed");
            }
        });
    }

    /// True when any channel is unmuted.
    pub fn has_live_channels(&self) -> bool {
        self.inner
            .channels
            .lock()
            .values()
            .any(|c| !c.is_disposed() && !c.is_muted())
    }

    pub fn channel_state(&self, id: &str) -> Option<ChannelState> {
        self.inner.channels.lock().get(id).map(ChannelGraph::state)
    }

    pub fn channel_config(&self, id: &str) -> Option<MicChannelConfig> {
        self.inner.channels.lock().get(id).map(|c| c.config().clone())
    }

    pub fn phantom_active(&self, id: &str) -> bool {
        self.inner
            .channels
            .lock()
            .get(id)
            .is_some_and(|c| !c.is_disposed() && c.phantom_active())
    }

    /// Whether `id` is configured, not disposed, and unmuted.
    pub fn is_unmuted(&self, id: &str) -> bool {
        self.inner
            .channels
            .lock()
            .get(id)
            .is_some_and(|c| !c.is_disposed() && !c.is_muted())
    }

    /// Register a meter listener. Polling starts with the first listener
    /// and stops when the last subscription goes away.
    pub fn subscribe_to_meters<F>(&self, listener: F) -> MeterSubscription
    where
        F: Fn(&str, f32) + Send + Sync + 'static,
    {
        let mut hub = self.inner.meters.lock();
        let id = hub.add(Arc::new(listener));
        if !hub.is_polling() {
            match Handle::try_current() {
                Ok(runtime) => {
                    let weak = Arc::downgrade(&self.inner);
                    let period = self.inner.meter_interval;
                    hub.set_task(runtime.spawn(async move {
                        let mut interval = tokio::time::interval(period);
                        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
                        // First tick completes immediately
                        interval.tick().await;
                        loop {
                            interval.tick().await;
                            let Some(inner) = weak.upgrade() else {
                                break;
                            };
                            ChannelRouter { inner }.emit_meter_levels();
                        }
                    }));
                    debug!("meter polling started");
                }
                Err(_) => warn!("no async runtime; meter listener registered without polling"),
            }
        }
        MeterSubscription::new(Arc::downgrade(&self.inner), id)
    }

    pub fn meter_listener_count(&self) -> usize {
        self.inner.meters.lock().len()
    }

    pub fn is_metering(&self) -> bool {
        self.inner.meters.lock().is_polling()
    }

    /// Read every channel's analyser once and send the levels to all
    /// listeners.
    pub fn emit_meter_levels(&self) {
        let listeners = self.inner.meters.lock().snapshot();
        if listeners.is_empty() {
            return;
        }
        let readings: Vec<(String, f32)> = {
            let channels = self.inner.channels.lock();
            let graph = self.inner.context.graph();
            channels
                .iter()
                .filter(|(_, c)| !c.is_disposed())
                .map(|(id, c)| {
                    let level = graph.node::<AnalyserNode>(c.analyser()).map_or(0.0, AnalyserNode::level);
                    (id.clone(), level)
                })
                .collect()
        };
        for (id, level) in &readings {
            for listener in &listeners {
                listener(id, *level);
            }
        }
    }
}

async fn blocking<F>(f: F) -> Result<()>
where
    F: FnOnce() -> Result<()> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StudioError::Runtime(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ContextBackend, GainNode};
    use crate::StudioError;
    use async_trait::async_trait;
    use rtrb::RingBuffer;
    use std::sync::atomic::AtomicUsize;
    use std::sync::{OnceLock, Weak};

    struct Silent;

    #[async_trait]
    impl InputProvider for Silent {
        async fn acquire(&self, _label: &str, _constraints: CaptureConstraints) -> Result<CaptureStream> {
            let (_tx, rx) = RingBuffer::new(64);
            Ok(CaptureStream::new(rx, Vec::new()))
        }
    }

    struct Denied(AtomicUsize);

    #[async_trait]
    impl InputProvider for Denied {
        async fn acquire(&self, label: &str, _constraints: CaptureConstraints) -> Result<CaptureStream> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(StudioError::CaptureDenied(label.to_string()))
        }
    }

    /// Hands out captures whose tracks record whether the router and graph
    /// locks were free when they were stopped.
    #[derive(Default)]
    struct WatchedStops {
        router: OnceLock<Weak<RouterInner>>,
        stops: Arc<AtomicUsize>,
        unlocked: Arc<AtomicUsize>,
    }

    struct WatchedTrack {
        router: Weak<RouterInner>,
        stops: Arc<AtomicUsize>,
        unlocked: Arc<AtomicUsize>,
    }

    impl CaptureTrack for WatchedTrack {
        fn stop(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
            if let Some(inner) = self.router.upgrade() {
                if !inner.channels.is_locked() && !inner.context.is_graph_locked() {
                    self.unlocked.fetch_add(1, Ordering::SeqCst);
                }
            }
        }
    }

    #[async_trait]
    impl InputProvider for WatchedStops {
        async fn acquire(&self, _label: &str, _constraints: CaptureConstraints) -> Result<CaptureStream> {
            let (_tx, rx) = RingBuffer::new(64);
            let track: Box<dyn CaptureTrack> = Box::new(WatchedTrack {
                router: self.router.get().cloned().unwrap_or_default(),
                stops: self.stops.clone(),
                unlocked: self.unlocked.clone(),
            });
            Ok(CaptureStream::new(rx, vec![track]))
        }
    }

    /// Records the thread each suspend/resume arrives on.
    struct ThreadLog(Arc<Mutex<Vec<std::thread::ThreadId>>>);

    impl ContextBackend for ThreadLog {
        fn resume(&mut self) -> Result<()> {
            self.0.lock().push(std::thread::current().id());
            Ok(())
        }

        fn suspend(&mut self) -> Result<()> {
            self.0.lock().push(std::thread::current().id());
            Ok(())
        }
    }

    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    fn router(provider: Arc<dyn InputProvider>) -> ChannelRouter {
        let config = EngineConfig::default();
        let context = AudioContext::new(&config);
        let master = {
            let mut graph = context.graph();
            let master = graph.add(GainNode::new(1.0));
            let destination = graph.destination();
            graph.connect(master, destination).unwrap();
            master
        };
        ChannelRouter::new(context, master, provider, &config)
    }

    #[tokio::test]
    async fn ensure_goes_live_and_is_idempotent() {
        let router = router(Arc::new(Silent));
        let config = MicChannelConfig::new("mic-1", "Vocal");
        assert_eq!(router.ensure_channel(config.clone()).await.unwrap(), ChannelState::Live);
        let nodes = router.inner.context.graph().node_count();
        assert_eq!(router.ensure_channel(config.with_level(20.0)).await.unwrap(), ChannelState::Live);
        assert_eq!(router.inner.context.graph().node_count(), nodes);
        assert_eq!(router.channel_config("mic-1").unwrap().level, 20.0);
    }

    #[tokio::test]
    async fn failed_acquisition_degrades_without_error() {
        let provider = Arc::new(Denied(AtomicUsize::new(0)));
        let router = router(provider.clone());
        let state = router.ensure_channel(MicChannelConfig::new("mic-1", "Vocal")).await.unwrap();
        assert_eq!(state, ChannelState::Degraded);

        // Degraded channels retry on the next ensure
        router.ensure_channel(MicChannelConfig::new("mic-1", "Vocal")).await.unwrap();
        assert_eq!(provider.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn virtual_channels_skip_the_provider() {
        let provider = Arc::new(Denied(AtomicUsize::new(0)));
        let router = router(provider.clone());
        let config = MicChannelConfig::new("keys", "Keys").with_connection(ConnectionType::VirtualInstrument);
        assert_eq!(router.ensure_channel(config).await.unwrap(), ChannelState::LiveVirtual);
        assert_eq!(provider.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn setters_after_dispose_are_noops() {
        let router = router(Arc::new(Silent));
        router.ensure_channel(MicChannelConfig::new("mic-1", "Vocal")).await.unwrap();
        let before = router.inner.context.graph().node_count();
        router.dispose_channel("mic-1");
        router.dispose_channel("mic-1");
        assert_eq!(router.channel_state("mic-1"), Some(ChannelState::Disposed));

        router.set_channel_level("mic-1", 90.0);
        router.set_muted("mic-1", false);
        router.set_connection_type("mic-1", ConnectionType::Usb);
        router.set_channel_phantom_power("mic-1", true);
        tokio::task::yield_now().await;
        assert_eq!(router.channel_state("mic-1"), Some(ChannelState::Disposed));
        assert_eq!(router.inner.context.graph().node_count(), before - 7);
        assert!(!router.phantom_active("mic-1"));
    }

    #[tokio::test]
    async fn unmute_queued_before_dispose_does_not_revive_the_channel() {
        let provider = Arc::new(Denied(AtomicUsize::new(0)));
        let router = router(provider.clone());
        router.ensure_channel(MicChannelConfig::new("mic-1", "Vocal")).await.unwrap();
        let nodes = router.inner.context.graph().node_count();

        router.set_muted("mic-1", false);
        router.dispose_channel("mic-1");
        settle().await;

        assert_eq!(router.channel_state("mic-1"), Some(ChannelState::Disposed));
        assert_eq!(provider.0.load(Ordering::SeqCst), 1, "no acquisition after dispose");
        assert_eq!(router.inner.context.graph().node_count(), nodes - 6);
    }

    #[tokio::test]
    async fn recording_refresh_queued_before_dispose_does_not_revive_the_channel() {
        let provider = Arc::new(Denied(AtomicUsize::new(0)));
        let router = router(provider.clone());
        router.ensure_channel(MicChannelConfig::new("mic-1", "Vocal")).await.unwrap();
        router.ensure_channel(MicChannelConfig::new("mic-2", "Guitar")).await.unwrap();

        router.set_recording_active(true).await;
        router.dispose_channel("mic-2");
        settle().await;

        assert_eq!(router.channel_state("mic-2"), Some(ChannelState::Disposed));
        assert_eq!(router.channel_state("mic-1"), Some(ChannelState::Degraded));
        // Two initial attempts plus the retry for mic-1 only
        assert_eq!(provider.0.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn explicit_ensure_rebuilds_a_disposed_channel() {
        let router = router(Arc::new(Silent));
        router.ensure_channel(MicChannelConfig::new("mic-1", "Vocal")).await.unwrap();
        router.dispose_channel("mic-1");
        let state = router.ensure_channel(MicChannelConfig::new("mic-1", "Vocal")).await.unwrap();
        assert_eq!(state, ChannelState::Live);
    }

    #[tokio::test]
    async fn capture_tracks_stop_outside_the_router_locks() {
        let provider = Arc::new(WatchedStops::default());
        let router = router(provider.clone());
        let _ = provider.router.set(Arc::downgrade(&router.inner));

        router.ensure_channel(MicChannelConfig::new("a", "A")).await.unwrap();
        router.ensure_channel(MicChannelConfig::new("b", "B")).await.unwrap();
        router.dispose_channel("a");
        router.set_connection_type("b", ConnectionType::VirtualInstrument);

        assert_eq!(provider.stops.load(Ordering::SeqCst), 2);
        assert_eq!(provider.unlocked.load(Ordering::SeqCst), 2, "tracks stopped under a lock");
    }

    #[tokio::test]
    async fn device_round_trips_leave_the_async_thread() {
        let router = router(Arc::new(Silent));
        let calls: Arc<Mutex<Vec<std::thread::ThreadId>>> = Arc::default();
        router.inner.context.attach_backend(Box::new(ThreadLog(calls.clone())));

        router.ensure_channel(MicChannelConfig::new("mic-1", "Vocal")).await.unwrap();
        router.set_muted("mic-1", true);
        router.set_recording_active(false).await;

        let here = std::thread::current().id();
        let calls = calls.lock();
        assert_eq!(calls.len(), 2, "one resume, one suspend");
        assert!(calls.iter().all(|id| *id != here));
    }

    #[tokio::test]
    async fn setters_update_stored_config() {
        let router = router(Arc::new(Silent));
        let config = MicChannelConfig::new("mic-1", "Vocal").with_pan(10.0).with_phantom_power(true);
        router.ensure_channel(config).await.unwrap();
        assert!(router.phantom_active("mic-1"));
        assert_eq!(router.channel_config("mic-1").unwrap().pan, 10.0);
        router.set_channel_pan("mic-1", -25.0);
        router.set_channel_latency("mic-1", 12.0);
        router.set_channel_noise_gate("mic-1", 80.0);
        router.set_channel_distortion_guard("mic-1", 10.0);
        router.set_channel_level("mic-1", 40.0);

        let config = router.channel_config("mic-1").unwrap();
        assert_eq!(config.pan, -25.0);
        assert_eq!(config.latency_ms, 12.0);
        assert_eq!(config.noise_gate, 80.0);
        assert_eq!(config.distortion_guard, 10.0);
        assert_eq!(config.level, 40.0);

        let channels = router.inner.channels.lock();
        assert!(channels["mic-1"].has_capture());
    }

    #[tokio::test]
    async fn unknown_ids_are_ignored() {
        let router = router(Arc::new(Silent));
        router.set_channel_level("ghost", 50.0);
        router.set_connection_type("ghost", ConnectionType::Usb);
        router.dispose_channel("ghost");
        assert_eq!(router.channel_state("ghost"), None);
    }

    #[tokio::test]
    async fn phantom_bus_is_a_union() {
        let router = router(Arc::new(Silent));
        router.ensure_channel(MicChannelConfig::new("a", "A")).await.unwrap();
        assert!(!router.phantom_active("a"));
        router.set_phantom_power_bus(true);
        assert!(router.phantom_active("a"));
        router.set_channel_phantom_power("a", true);
        router.set_phantom_power_bus(false);
        assert!(router.phantom_active("a"));
    }

    #[tokio::test]
    async fn recording_off_suspends_only_when_all_muted() {
        use crate::graph::ContextState;

        let router = router(Arc::new(Silent));
        router.ensure_channel(MicChannelConfig::new("a", "A")).await.unwrap();
        router.set_recording_active(false).await;
        assert_eq!(router.inner.context.state(), ContextState::Running);

        router.set_muted("a", true);
        router.set_recording_active(false).await;
        assert_eq!(router.inner.context.state(), ContextState::Suspended);

        router.set_recording_active(true).await;
        assert_eq!(router.inner.context.state(), ContextState::Running);
    }
}
