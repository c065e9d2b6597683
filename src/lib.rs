//! Realtime audio core for the studio hub: a lookahead step scheduler, a
//! voice playback engine, a fixed master effects bus and a live microphone
//! channel router, all rendered through one shared audio graph.
//!
//! Layering, bottom up:
//!
//! - [`dsp`] numeric primitives with no graph knowledge
//! - [`graph`] the node arena, connection topology and the shared context
//! - [`synth`] sample and synth voices built on graph nodes
//! - [`engine`] transport, master bus, plugin rack and the [`Studio`] facade
//! - [`router`] per-channel microphone chains and meter broadcast
//! - [`io`] cpal device plumbing

pub mod config;
pub mod dsp;
pub mod engine;
pub mod error;
pub mod graph; // Audio graph primitives and render loop
pub mod io;
pub mod router; // Microphone/channel routing and metering
pub mod synth; // Voice playback and pitch helpers

pub use config::EngineConfig;
pub use engine::Studio;
pub use error::{Result, StudioError};

/// Largest block the graph renders in one pass.
pub const MAX_BLOCK_SIZE: usize = 2048;
pub(crate) const MIN_TIME: f64 = 1.0 / 48_000.0;
