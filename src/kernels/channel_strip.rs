//! Per-row channel strip
//!
//! The final stage of a row's audio path: multiplies the summed row signal
//! by the smoothed `gain` port (where the mixer schedules mute/solo ramps)
//! and carries the row's `pan` port. The node itself stays mono; the master
//! fold-down reads the resolved pan buffer from the graph and applies the
//! equal-power law per sample, so pan modulation patched onto this port is
//! honored at audio rate.

use crate::audio_node::{AudioNode, PortSpec};

const PORTS: [PortSpec; 2] = [PortSpec::new("gain", 1.0), PortSpec::new("pan", 0.0)];

pub struct ChannelStripNode;

impl ChannelStripNode {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ChannelStripNode {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioNode for ChannelStripNode {
    fn process_block(&mut self, inputs: &[&[f32]], output: &mut [f32], _sample_rate: f32) {
        debug_assert!(
            inputs.len() >= 3,
            "ChannelStripNode requires audio, gain and pan inputs"
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
        &PORTS
    }

    fn has_audio_input(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "ChannelStripNode"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_applies_gain() {
        let mut node = ChannelStripNode::new();
        let signal = vec![0.5, -0.5, 1.0, -1.0];
        let gain = vec![0.5; 4];
        let pan = vec![0.0; 4];
        let inputs = vec![signal.as_slice(), gain.as_slice(), pan.as_slice()];
        let mut output = vec![0.0; 4];

        node.process_block(&inputs, &mut output, 44100.0);

        assert_eq!(output, vec![0.25, -0.25, 0.5, -0.5]);
    }

    #[test]
    fn test_negative_gain_clamped_to_silence() {
        let mut node = ChannelStripNode::new();
        let signal = vec![1.0; 4];
        let gain = vec![-0.5; 4];
        let pan = vec![0.0; 4];
        let inputs = vec![signal.as_slice(), gain.as_slice(), pan.as_slice()];
        let mut output = vec![0.0; 4];

        node.process_block(&inputs, &mut output, 44100.0);

        assert!(output.iter().all(|&x| x == 0.0));
    }
}
