//! Error types for the studio audio core

use thiserror::Error;

use crate::graph::NodeId;

#[derive(Error, Debug)]
pub enum StudioError {
    #[error("invalid tempo: {0} (must be positive and finite)")]
    InvalidTempo(f64),

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("unknown node: {0:?}")]
    UnknownNode(NodeId),

    #[error("unknown channel: {0}")]
    UnknownChannel(String),

    #[error("connection would create a cycle in the audio graph")]
    GraphCycle,

    #[error("audio capture is not supported in this runtime")]
    CaptureUnsupported,

    #[error("audio capture denied: {0}")]
    CaptureDenied(String),

    #[error("no armed channel is live; recording refused")]
    NothingArmed,

    #[error("audio context state change failed: {0}")]
    ContextState(String),

    #[error("audio device error: {0}")]
    Device(String),

    #[error("no async runtime available: {0}")]
    Runtime(String),
}

pub type Result<T> = std::result::Result<T, StudioError>;
