//! Smoothed constant source
//!
//! Emits its `value` control port unchanged. Because the graph smooths port
//! bases with a ≈10 ms time constant, scheduling a new value on this node
//! produces a click-free ramp; this is the output stage for sequencer pitch
//! and any other held control signal.

use crate::audio_node::{AudioNode, PortSpec};

pub struct ValueNode {
    specs: [PortSpec; 1],
}

impl ValueNode {
    pub fn new(default: f32) -> Self {
        Self {
            specs: [PortSpec::new("value", default)],
        }
    }
}

impl AudioNode for ValueNode {
    fn process_block(&mut self, inputs: &[&[f32]], output: &mut [f32], _sample_rate: f32) {
        debug_assert!(inputs.len() >= 1, "ValueNode requires its value port");
        let value = inputs[0];
        debug_assert_eq!(value.len(), output.len(), "Value buffer length mismatch");

        output.copy_from_slice(value);
    }

    fn ports(&self) -> &[PortSpec] {
        &self.specs
    }

    fn name(&self) -> &str {
        "ValueNode"
    }
}
