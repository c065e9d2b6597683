//! Channel configuration and the UI-to-audio mapping laws.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How a channel's signal arrives.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionType {
    /// Balanced microphone/line input (XLR)
    #[default]
    LineIn,
    /// Virtual instrument input; no capture device behind it
    VirtualInstrument,
    /// USB-class audio interface
    Usb,
}

impl ConnectionType {
    /// True for inputs that never open a capture stream.
    pub fn is_virtual(&self) -> bool {
        matches!(self, ConnectionType::VirtualInstrument)
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct MicChannelConfig {
    pub id: String,
    pub label: String,
    /// Fader, 0 - 100 %
    pub level: f32,
    /// UI pan, -50 (left) to 50 (right)
    pub pan: f32,
    pub connection_type: ConnectionType,
    pub phantom_power: bool,
    /// Requested input latency in milliseconds
    pub latency_ms: f32,
    /// 0 - 100 %
    pub noise_gate: f32,
    /// 0 - 100 %
    pub distortion_guard: f32,
    pub muted: bool,
}

impl MicChannelConfig {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            level: 60.0,
            pan: 0.0,
            connection_type: ConnectionType::LineIn,
            phantom_power: false,
            latency_ms: 4.0,
            noise_gate: 35.0,
            distortion_guard: 65.0,
            muted: false,
        }
    }

    pub fn with_connection(mut self, connection_type: ConnectionType) -> Self {
        self.connection_type = connection_type;
        self
    }

    pub fn with_level(mut self, level: f32) -> Self {
        self.level = level;
        self
    }

    pub fn with_pan(mut self, pan: f32) -> Self {
        self.pan = pan;
        self
    }

    pub fn with_muted(mut self, muted: bool) -> Self {
        self.muted = muted;
        self
    }

    pub fn with_phantom_power(mut self, enabled: bool) -> Self {
        self.phantom_power = enabled;
        self
    }
}

/// Fader percent to linear gain: `(percent / 100)^1.4`.
///
/// The curve spends more of the fader's travel near silence.
pub fn level_to_gain(percent: f32) -> f32 {
    (percent.clamp(0.0, 100.0) / 100.0).powf(1.4)
}

/// UI pan (-50..50) to stereo pan (-1..1).
pub fn pan_from_ui(value: f32) -> f32 {
    (value / 50.0).clamp(-1.0, 1.0)
}

/// Gate amount to threshold: 0 % opens at -80 dB, 100 % closes below -40 dB.
pub fn gate_threshold_db(percent: f32) -> f32 {
    -80.0 + (percent.clamp(0.0, 100.0) / 100.0) * 40.0
}

/// Simulated latency in seconds for the channel's delay stage.
pub fn latency_seconds(latency_ms: f32) -> f32 {
    (latency_ms / 1000.0).max(0.0)
}
