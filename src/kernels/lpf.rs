//! RC low-pass filter (order 1/2/4)
//!
//! # Algorithm
//!
//! A single RC stage is the classic one-pole recursion:
//!
//! ```text
//! a    = 1 - exp(-2π · fc / fs)
//! y[n] = a · x[n] + (1 - a) · y[n-1]
//! ```
//!
//! with `fc` clamped to [20, 20000] Hz. Higher orders cascade the identical
//! stage 2 or 4 times in series, each with its own memory and the shared
//! cutoff, giving -6, -12, or -24 dB/oct slopes.
//!
//! Non-finite input samples are treated as silence and the output is clamped
//! to [-1, 1], so a NaN can never lodge in the feedback memory.

use crate::audio_node::{sanitize, AudioNode, PortSpec};

pub const CUTOFF_MIN: f32 = 20.0;
pub const CUTOFF_MAX: f32 = 20000.0;

const PORTS: [PortSpec; 2] = [
    PortSpec::new("frequency", 2000.0),
    PortSpec::new("order", 1.0),
];

/// One-pole coefficient for a cutoff in Hz.
#[inline]
pub(crate) fn one_pole_coeff(cutoff: f32, sample_rate: f32) -> f32 {
    let fc = if cutoff.is_finite() { cutoff } else { CUTOFF_MIN };
    let fc = fc.clamp(CUTOFF_MIN, CUTOFF_MAX);
    1.0 - (-2.0 * std::f32::consts::PI * fc / sample_rate).exp()
}

/// Single RC stage with its own memory.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct OnePoleStage {
    y1: f32,
}

impl OnePoleStage {
    #[inline]
    pub(crate) fn process(&mut self, x: f32, a: f32) -> f32 {
        self.y1 = a * x + (1.0 - a) * self.y1;
        self.y1
    }

    pub(crate) fn reset(&mut self) {
        self.y1 = 0.0;
    }
}

/// Map the `order` port onto the supported stage counts {1, 2, 4}.
#[inline]
pub(crate) fn stage_count(order: f32) -> usize {
    let order = if order.is_finite() { order } else { 1.0 };
    match order.round() as i32 {
        i32::MIN..=1 => 1,
        2 | 3 => 2,
        _ => 4,
    }
}

/// Cascaded RC low-pass filter node
///
/// # Ports
/// - `frequency`: cutoff in Hz, clamped to [20, 20000] (default 2000)
/// - `order`: stage count selector, nearest of {1, 2, 4} (default 1)
pub struct LowPassNode {
    stages: [OnePoleStage; 4],
}

impl LowPassNode {
    pub fn new() -> Self {
        Self {
            stages: [OnePoleStage::default(); 4],
        }
    }
}

impl Default for LowPassNode {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioNode for LowPassNode {
    fn process_block(&mut self, inputs: &[&[f32]], output: &mut [f32], sample_rate: f32) {
        debug_assert!(
            inputs.len() >= 3,
            "LowPassNode requires audio, frequency and order inputs"
        );
        let signal = inputs[0];
        let frequency = inputs[1];
        let order = inputs[2];
        debug_assert_eq!(signal.len(), output.len(), "Signal length mismatch");
        debug_assert_eq!(frequency.len(), output.len(), "Frequency length mismatch");

        // Order is a discrete selector, read at block rate
        let n_stages = stage_count(order[0]);

        for i in 0..output.len() {
            let a = one_pole_coeff(frequency[i], sample_rate);
            let mut y = sanitize(signal[i]);
            for stage in self.stages.iter_mut().take(n_stages) {
                y = stage.process(y, a);
            }
            output[i] = y.clamp(-1.0, 1.0);
        }
    }

    fn ports(&self) -> &[PortSpec] {
        &PORTS
    }

    fn has_audio_input(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "LowPassNode"
    }

    fn reset(&mut self) {
        for stage in self.stages.iter_mut() {
            stage.reset();
        }
    }
}
