//! Core trait for audio processing nodes
//!
//! Every DSP kernel implements [`AudioNode`]: block-based processing over
//! mono `f32` buffers. A node receives its summed audio input (when it has
//! one) followed by one buffer per declared control port; the graph fills the
//! control buffers from the port's smoothed base value plus any patched
//! modulation signals, so block-rate and sample-rate control look identical
//! to the kernel.

/// Unique identifier for a node within an [`AudioGraph`](crate::graph::AudioGraph).
pub type NodeId = usize;

/// Description of one named control port.
///
/// The port's base value starts at `default` and is smoothed toward new
/// targets by the graph (≈10 ms time constant), so parameter edits never
/// produce a hard jump.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PortSpec {
    pub name: &'static str,
    pub default: f32,
}

impl PortSpec {
    pub const fn new(name: &'static str, default: f32) -> Self {
        Self { name, default }
    }
}

/// Trait for all audio processing nodes
///
/// Nodes process audio in blocks. Input layout:
/// - `inputs[0]` is the summed audio input iff [`AudioNode::has_audio_input`]
///   returns true;
/// - the remaining buffers correspond one-to-one with [`AudioNode::ports`],
///   in declaration order.
///
/// All buffers share the same length as `output`. Implementations must never
/// panic while rendering; out-of-range or non-finite values are clamped.
pub trait AudioNode: Send {
    /// Process one block of audio
    fn process_block(&mut self, inputs: &[&[f32]], output: &mut [f32], sample_rate: f32);

    /// Control ports this node exposes, in input order
    fn ports(&self) -> &[PortSpec] {
        &[]
    }

    /// Whether this node consumes an upstream audio signal
    fn has_audio_input(&self) -> bool {
        false
    }

    /// Node type name for debugging and logs
    fn name(&self) -> &str;

    /// Clear internal sample memory (filter state, phase, buffers)
    fn reset(&mut self) {}
}

/// Treat non-finite samples as silence, then clamp to the audio range.
///
/// Shared by the recursive kernels so a NaN or Inf entering a feedback path
/// cannot poison the filter memory.
#[inline]
pub fn sanitize(x: f32) -> f32 {
    if x.is_finite() {
        x.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}
