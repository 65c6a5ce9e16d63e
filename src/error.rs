//! Engine error type
//!
//! Everything that can fail on the control path is collected here. The render
//! path itself never errors: kernels clamp bad values locally instead of
//! propagating them.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no audio output device found")]
    NoAudioDevice,

    #[error("audio backend error: {0}")]
    AudioBackend(String),

    #[error("unknown module type '{0}'")]
    UnknownModuleType(String),

    #[error("module '{0}' is not a {1}")]
    ModuleKindMismatch(String, &'static str),

    #[error("invalid engine config: {0}")]
    InvalidConfig(String),

    #[error("no such row: {0}")]
    NoSuchRow(u64),

    #[error("no such slot: {0}")]
    NoSuchSlot(u64),

    #[error("no such node: {0}")]
    NoSuchNode(usize),

    #[error("node {0} has no control port '{1}'")]
    NoSuchPort(usize, String),

    #[error("slot {0} has no param '{1}'")]
    NoSuchParam(u64, String),

    #[error("signal graph contains a cycle")]
    GraphCycle,

    #[error("invalid project: {0}")]
    InvalidProject(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
