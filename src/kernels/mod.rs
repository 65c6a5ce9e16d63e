//! DSP kernels
//!
//! Each kernel is a self-contained [`AudioNode`](crate::audio_node::AudioNode)
//! with private per-instance sample memory, organized by role:
//!
//! **Sources**: `PwmOscillatorNode`, `PluckNode`, `NoiseNode`
//! **Effects**: `LowPassNode`, `HighPassNode`
//! **Modulators**: `LfoNode`, `AdEnvelopeNode`
//! **Plumbing**: `ValueNode` (smoothed constant), `ScaleNode` (fixed-gain
//! adapter inserted by the connection manager), `ChannelStripNode` (per-row
//! gain/pan stage)
//!
//! Control values arrive as per-sample buffers; every kernel clamps its own
//! inputs and never panics on the render path.

pub mod ad_envelope;
pub mod channel_strip;
pub mod gain;
pub mod hpf;
pub mod lfo;
pub mod lpf;
pub mod noise;
pub mod pluck;
pub mod pwm_osc;
pub mod scale;
pub mod value;

pub use ad_envelope::AdEnvelopeNode;
pub use channel_strip::ChannelStripNode;
pub use gain::GainNode;
pub use hpf::HighPassNode;
pub use lfo::{LfoNode, LfoShape};
pub use lpf::LowPassNode;
pub use noise::NoiseNode;
pub use pluck::PluckNode;
pub use pwm_osc::PwmOscillatorNode;
pub use scale::ScaleNode;
pub use value::ValueNode;
