//! Pulse-width modulation oscillator
//!
//! Phase accumulator in [0, 1): each sample advances the phase by
//! `clamp(freq, 1, 20000) / fs` (wrapping modulo 1) and outputs +1 while the
//! phase is below the pulse width, -1 otherwise. Width is clamped to
//! [0.01, 0.99] so the output always toggles. Width of 0.5 is a square wave;
//! sweeping the width produces the classic PWM timbre.

use crate::audio_node::{AudioNode, PortSpec};

pub const FREQ_MIN: f32 = 1.0;
pub const FREQ_MAX: f32 = 20000.0;
pub const WIDTH_MIN: f32 = 0.01;
pub const WIDTH_MAX: f32 = 0.99;

const PORTS: [PortSpec; 2] = [
    PortSpec::new("frequency", 440.0),
    PortSpec::new("width", 0.5),
];

pub struct PwmOscillatorNode {
    phase: f32,
}

impl PwmOscillatorNode {
    pub fn new() -> Self {
        Self { phase: 0.0 }
    }

    pub fn phase(&self) -> f32 {
        self.phase
    }
}

impl Default for PwmOscillatorNode {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioNode for PwmOscillatorNode {
    fn process_block(&mut self, inputs: &[&[f32]], output: &mut [f32], sample_rate: f32) {
        debug_assert!(
            inputs.len() >= 2,
            "PwmOscillatorNode requires frequency and width inputs"
        );
        let frequency = inputs[0];
        let width = inputs[1];
        debug_assert_eq!(frequency.len(), output.len(), "Frequency length mismatch");
        debug_assert_eq!(width.len(), output.len(), "Width length mismatch");

        for i in 0..output.len() {
            let freq = if frequency[i].is_finite() {
                frequency[i].clamp(FREQ_MIN, FREQ_MAX)
            } else {
                FREQ_MIN
            };
            let w = if width[i].is_finite() {
                width[i].clamp(WIDTH_MIN, WIDTH_MAX)
            } else {
                0.5
            };

            self.phase += freq / sample_rate;
            while self.phase >= 1.0 {
                self.phase -= 1.0;
            }

            output[i] = if self.phase < w { 1.0 } else { -1.0 };
        }
    }

    fn ports(&self) -> &[PortSpec] {
        &PORTS
    }

    fn name(&self) -> &str {
        "PwmOscillatorNode"
    }

    fn reset(&mut self) {
        self.phase = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(node: &mut PwmOscillatorNode, n: usize, freq: f32, width: f32) -> Vec<f32> {
        let frequency = vec![freq; n];
        let width_buf = vec![width; n];
        let inputs = vec![frequency.as_slice(), width_buf.as_slice()];
        let mut output = vec![0.0; n];
        node.process_block(&inputs, &mut output, 44100.0);
        output
    }

    fn duty_cycle(output: &[f32]) -> f32 {
        let high = output.iter().filter(|&&x| x == 1.0).count();
        high as f32 / output.len() as f32
    }

    #[test]
    fn test_output_is_bipolar() {
        let mut node = PwmOscillatorNode::new();
        let output = run(&mut node, 4410, 440.0, 0.5);
        for &sample in &output {
            assert!(sample == 1.0 || sample == -1.0, "got {}", sample);
        }
    }

    #[test]
    fn test_square_wave_duty_cycle() {
        let mut node = PwmOscillatorNode::new();
        let output = run(&mut node, 44100, 440.0, 0.5);
        let ratio = duty_cycle(&output);
        assert!((ratio - 0.5).abs() < 0.02, "duty cycle {}", ratio);
    }

    #[test]
    fn test_narrow_and_wide_pulse() {
        let mut node = PwmOscillatorNode::new();
        let narrow = duty_cycle(&run(&mut node, 44100, 220.0, 0.1));
        assert!((narrow - 0.1).abs() < 0.02, "narrow duty {}", narrow);

        let mut node = PwmOscillatorNode::new();
        let wide = duty_cycle(&run(&mut node, 44100, 220.0, 0.9));
        assert!((wide - 0.9).abs() < 0.02, "wide duty {}", wide);
    }

    #[test]
    fn test_width_clamped_keeps_toggling() {
        // Width beyond [0.01, 0.99] still yields both levels
        let mut node = PwmOscillatorNode::new();
        let output = run(&mut node, 44100, 440.0, 2.0);
        assert!(output.iter().any(|&x| x == 1.0));
        assert!(output.iter().any(|&x| x == -1.0));
    }

    #[test]
    fn test_frequency_sets_period() {
        // At 441 Hz / 44100 Hz the period is exactly 100 samples
        let mut node = PwmOscillatorNode::new();
        let output = run(&mut node, 1000, 441.0, 0.5);
        let mut edges = Vec::new();
        for i in 1..output.len() {
            if output[i] == 1.0 && output[i - 1] == -1.0 {
                edges.push(i);
            }
        }
        assert!(edges.len() >= 2);
        let period = edges[1] - edges[0];
        assert_eq!(period, 100);
    }

    #[test]
    fn test_phase_wraps() {
        let mut node = PwmOscillatorNode::new();
        run(&mut node, 44100, 19999.0, 0.5);
        assert!(node.phase() >= 0.0 && node.phase() < 1.0);
    }

    #[test]
    fn test_non_finite_controls_defaulted() {
        let mut node = PwmOscillatorNode::new();
        let output = run(&mut node, 512, f32::NAN, f32::INFINITY);
        assert!(output.iter().all(|x| x.is_finite()));
    }
}
