//! Output gain stage
//!
//! Multiplies its audio input by the smoothed, modulatable `gain` port.
//! Sources use one of these as their advertised output so the module's
//! level can be both dialed and patched.

use crate::audio_node::{AudioNode, PortSpec};

pub struct GainNode {
    specs: [PortSpec; 1],
}

impl GainNode {
    pub fn new(default: f32) -> Self {
        Self {
            specs: [PortSpec::new("gain", default)],
        }
    }
}

impl AudioNode for GainNode {
    fn process_block(&mut self, inputs: &[&[f32]], output: &mut [f32], _sample_rate: f32) {
        debug_assert!(
            inputs.len() >= 2,
            "GainNode requires audio and gain inputs"
        );
        let signal = inputs[0];
        let gain = inputs[1];
        debug_assert_eq!(signal.len(), output.len(), "Signal length mismatch");
        debug_assert_eq!(gain.len(), output.len(), "Gain length mismatch");

        for i in 0..output.len() {
            let g = if gain[i].is_finite() { gain[i].max(0.0) } else { 0.0 };
            output[i] = signal[i] * g;
        }
    }

    fn ports(&self) -> &[PortSpec] {
        &self.specs
    }

    fn has_audio_input(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "GainNode"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gain_multiplies() {
        let mut node = GainNode::new(1.0);
        let signal = vec![1.0, -0.5, 0.25, 0.0];
        let gain = vec![0.5; 4];
        let inputs = vec![signal.as_slice(), gain.as_slice()];
        let mut output = vec![0.0; 4];

        node.process_block(&inputs, &mut output, 44100.0);

        assert_eq!(output, vec![0.5, -0.25, 0.125, 0.0]);
    }

    #[test]
    fn test_variable_gain_follows_curve() {
        let mut node = GainNode::new(1.0);
        let signal = vec![1.0; 4];
        let gain = vec![0.0, 0.5, 1.0, 2.0];
        let inputs = vec![signal.as_slice(), gain.as_slice()];
        let mut output = vec![0.0; 4];

        node.process_block(&inputs, &mut output, 44100.0);

        assert_eq!(output, vec![0.0, 0.5, 1.0, 2.0]);
    }
}
