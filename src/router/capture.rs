//! Capture acquisition: constraints, the provider seam and stream ownership.

use async_trait::async_trait;
use rtrb::Consumer;
use tracing::debug;

use super::config::MicChannelConfig;
use crate::graph::Frame;
use crate::{Result, StudioError};

/// What a channel asks of its input device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureConstraints {
    pub echo_cancellation: bool,
    pub noise_suppression: bool,
    pub auto_gain_control: bool,
    /// Requested device latency in seconds
    pub latency: f64,
}

impl CaptureConstraints {
    pub fn for_channel(config: &MicChannelConfig, noise_suppression: bool) -> Self {
        Self {
            echo_cancellation: true,
            noise_suppression,
            auto_gain_control: false,
            latency: (config.latency_ms as f64 / 1000.0).max(0.001),
        }
    }
}

/// One hardware capture track. Must stop delivering audio once `stop`
/// returns.
pub trait CaptureTrack: Send {
    fn stop(&mut self);
}

/// A freshly acquired input: frames for the graph plus the tracks that
/// produce them. Dropping an unused stream stops its tracks.
pub struct CaptureStream {
    frames: Consumer<Frame>,
    handle: CaptureHandle,
}

impl CaptureStream {
    pub fn new(frames: Consumer<Frame>, tracks: Vec<Box<dyn CaptureTrack>>) -> Self {
        Self {
            frames,
            handle: CaptureHandle { tracks },
        }
    }

    /// Separate the frame ring (for a `StreamSourceNode`) from the tracks.
    pub fn split(self) -> (Consumer<Frame>, CaptureHandle) {
        (self.frames, self.handle)
    }
}

/// Owns a channel's capture tracks. Stopping is explicit, and also
/// happens on drop.
pub struct CaptureHandle {
    tracks: Vec<Box<dyn CaptureTrack>>,
}

impl CaptureHandle {
    pub fn stop(&mut self) {
        if self.tracks.is_empty() {
            return;
        }
        for track in &mut self.tracks {
            track.stop();
        }
        debug!(tracks = self.tracks.len(), "capture tracks stopped");
        self.tracks.clear();
    }

    pub fn is_stopped(&self) -> bool {
        self.tracks.is_empty()
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Source of live input streams. Acquisition may wait on a permission
/// grant, so it is async; it must not hold up other channels.
#[async_trait]
pub trait InputProvider: Send + Sync {
    async fn acquire(&self, label: &str, constraints: CaptureConstraints) -> Result<CaptureStream>;
}

/// Provider for runtimes with no capture support.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedInput;

#[async_trait]
impl InputProvider for UnsupportedInput {
    async fn acquire(&self, _label: &str, _constraints: CaptureConstraints) -> Result<CaptureStream> {
        Err(StudioError::CaptureUnsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtrb::RingBuffer;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingTrack(Arc<AtomicUsize>);

    impl CaptureTrack for CountingTrack {
        fn stop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn constraints_follow_channel_and_bus() {
        let mut config = MicChannelConfig::new("a", "A");
        config.latency_ms = 0.0;
        let c = CaptureConstraints::for_channel(&config, false);
        assert!(c.echo_cancellation);
        assert!(!c.noise_suppression);
        assert!(!c.auto_gain_control);
        assert_eq!(c.latency, 0.001);
        config.latency_ms = 12.0;
        assert!((CaptureConstraints::for_channel(&config, true).latency - 0.012).abs() < 1e-9);
    }

    #[test]
    fn handle_stops_tracks_once() {
        let stops = Arc::new(AtomicUsize::new(0));
        let (_tx, rx) = RingBuffer::<Frame>::new(4);
        let stream = CaptureStream::new(rx, vec![Box::new(CountingTrack(stops.clone())) as Box<dyn CaptureTrack>]);
        let (_frames, mut handle) = stream.split();
        handle.stop();
        assert!(handle.is_stopped());
        handle.stop();
        drop(handle);
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_handle_stops_tracks() {
        let stops = Arc::new(AtomicUsize::new(0));
        let (_tx, rx) = RingBuffer::<Frame>::new(4);
        let stream = CaptureStream::new(rx, vec![Box::new(CountingTrack(stops.clone())) as Box<dyn CaptureTrack>]);
        drop(stream.split());
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unused_stream_stops_on_drop() {
        let stops = Arc::new(AtomicUsize::new(0));
        let (_tx, rx) = RingBuffer::<Frame>::new(4);
        drop(CaptureStream::new(rx, vec![Box::new(CountingTrack(stops.clone())) as Box<dyn CaptureTrack>]));
        assert_eq!(stops.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsupported_provider_reports_unsupported() {
        let config = MicChannelConfig::new("a", "A");
        let result = UnsupportedInput
            .acquire("A", CaptureConstraints::for_channel(&config, true))
            .await;
        assert!(matches!(result, Err(StudioError::CaptureUnsupported)));
    }
}
