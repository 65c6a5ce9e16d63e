//! # Modrack - Modular Software Synthesizer
//!
//! An interactive modular synthesizer engine: rows of source modules with
//! serial effect chains, a free-form patch bay for modulation, triggers and
//! clock sync, per-row step sequencers, and a stereo master bus with
//! mute/solo/pan.
//!
//! Everything hangs off a single [`Engine`](engine::Engine): the audio
//! graph, the rack rows, the patch cables and the master clock. Control
//! edits land between render blocks as smoothed parameter ramps, so the
//! synth stays click-free while it is being rewired.
//!
//! ## Quick Start
//!
//! ```rust
//! use modrack::engine::{Engine, EngineConfig};
//! use modrack::patch::{PatchSource, PatchTarget};
//!
//! let mut engine = Engine::new(EngineConfig::default()).unwrap();
//!
//! // A plucked string through a low-pass filter
//! let (row, pluck) = engine.add_source_row("pluck", "string").unwrap();
//! let lpf = engine.add_effect(row, "lpf").unwrap();
//! engine.set_param(lpf, "frequency", 1200.0).unwrap();
//!
//! // Sequence it: pitch to the string, gate to its trigger
//! let seq = engine.add_modulator(row, "seq8").unwrap();
//! engine.connect(
//!     PatchSource::Module { row, slot: seq, output: "pitch".into() },
//!     PatchTarget::Param { row, slot: pluck, param: "frequency".into() },
//! ).unwrap();
//! engine.connect(
//!     PatchSource::Module { row, slot: seq, output: "gate".into() },
//!     PatchTarget::Trigger { row, slot: pluck },
//! ).unwrap();
//!
//! // One second of stereo audio
//! let (left, right) = engine.render(44_100).unwrap();
//! assert_eq!(left.len(), right.len());
//! ```

pub mod audio;
pub mod audio_node;
pub mod clock;
pub mod engine;
pub mod error;
pub mod graph;
pub mod kernels;
pub mod library;
pub mod mixer;
pub mod module;
pub mod patch;
pub mod project;
pub mod rack;
pub mod sequencer;

pub use engine::{Engine, EngineConfig};
pub use error::EngineError;
