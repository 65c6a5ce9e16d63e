//! Complementary high-pass filter (order 1/2/4)
//!
//! # Algorithm
//!
//! ```text
//! y_hp[n] = x[n] - y_lpN[n]
//! ```
//!
//! where `y_lpN` is the N-stage RC low-pass from [`lpf`](super::lpf) run on
//! the same input. By construction the low-pass and high-pass outputs sum
//! back to the dry signal sample-for-sample, which is the invariant the
//! tests lean on.

use crate::audio_node::{sanitize, AudioNode, PortSpec};
use crate::kernels::lpf::{one_pole_coeff, stage_count, OnePoleStage};

const PORTS: [PortSpec; 2] = [
    PortSpec::new("frequency", 500.0),
    PortSpec::new("order", 1.0),
];

/// Complementary high-pass filter node
///
/// # Ports
/// - `frequency`: low-pass branch cutoff in Hz, clamped to [20, 20000]
///   (default 500)
/// - `order`: stage count selector, nearest of {1, 2, 4} (default 1)
pub struct HighPassNode {
    stages: [OnePoleStage; 4],
}

impl HighPassNode {
    pub fn new() -> Self {
        Self {
            stages: [OnePoleStage::default(); 4],
        }
    }
}

impl Default for HighPassNode {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioNode for HighPassNode {
    fn process_block(&mut self, inputs: &[&[f32]], output: &mut [f32], sample_rate: f32) {
        debug_assert!(
            inputs.len() >= 3,
            "HighPassNode requires audio, frequency and order inputs"
        );
        let signal = inputs[0];
        let frequency = inputs[1];
        let order = inputs[2];
        debug_assert_eq!(signal.len(), output.len(), "Signal length mismatch");

        let n_stages = stage_count(order[0]);

        for i in 0..output.len() {
            let a = one_pole_coeff(frequency[i], sample_rate);
            let x = sanitize(signal[i]);
            let mut lp = x;
            for stage in self.stages.iter_mut().take(n_stages) {
                lp = stage.process(lp, a);
            }
            output[i] = (x - lp).clamp(-1.0, 1.0);
        }
    }

    fn ports(&self) -> &[PortSpec] {
        &PORTS
    }

    fn has_audio_input(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "HighPassNode"
    }

    fn reset(&mut self) {
        for stage in self.stages.iter_mut() {
            stage.reset();
        }
    }
}
