//! Fixed-gain scale stage
//!
//! A unity-input amplifier with a gain fixed at construction time. The
//! connection manager inserts one of these between a modulation source and a
//! destination whose declared modulation scale differs from 1, adapting the
//! source's native [-1,1] / [0,1] range to the destination's expected range
//! (e.g. ×2000 onto a filter cutoff in Hz). Owned by the Connection that
//! created it and removed with it.

use crate::audio_node::AudioNode;

pub struct ScaleNode {
    factor: f32,
}

impl ScaleNode {
    pub fn new(factor: f32) -> Self {
        Self { factor }
    }

    pub fn factor(&self) -> f32 {
        self.factor
    }
}

impl AudioNode for ScaleNode {
    fn process_block(&mut self, inputs: &[&[f32]], output: &mut [f32], _sample_rate: f32) {
        debug_assert!(inputs.len() >= 1, "ScaleNode requires an audio input");
        let signal = inputs[0];
        debug_assert_eq!(signal.len(), output.len(), "Signal length mismatch");

        for (out, &x) in output.iter_mut().zip(signal.iter()) {
            *out = x * self.factor;
        }
    }

    fn has_audio_input(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "ScaleNode"
    }
}
