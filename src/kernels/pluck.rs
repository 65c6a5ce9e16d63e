//! Karplus-Strong plucked string
//!
//! # Algorithm
//!
//! On trigger: size a ring buffer to one period of the target pitch,
//! `L = round(fs / clamp(freq, 20, 2000))` clamped to [2, 22050], fill it
//! with uniform noise in [-1, 1] and reset the read cursor. Per sample:
//!
//! ```text
//! out          = buffer[idx]
//! decay        = 0.5 · clamp(damping, 0.3, 0.99)
//! buffer[idx]  = (buffer[idx] + buffer[(idx+1) mod L]) · decay
//! idx          = (idx+1) mod L
//! ```
//!
//! The averaging acts as a low-pass inside the feedback loop; the noise
//! burst decays into a pitched, string-like tone.
//!
//! # Triggering
//!
//! The trigger is an atomic flag shared with the control context. A trigger
//! raised mid-block is applied at the start of the next rendered block, not
//! sample-accurately, an accepted simplification that keeps the render path
//! free of cross-thread ordering concerns.
//!
//! # References
//! - Karplus & Strong, "Digital Synthesis of Plucked-String and Drum
//!   Timbres" (1983)

use crate::audio_node::{AudioNode, PortSpec};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub const PLUCK_FREQ_MIN: f32 = 20.0;
pub const PLUCK_FREQ_MAX: f32 = 2000.0;
pub const DAMPING_MIN: f32 = 0.3;
pub const DAMPING_MAX: f32 = 0.99;
const MAX_BUFFER_LEN: usize = 22050;

const PORTS: [PortSpec; 2] = [
    PortSpec::new("frequency", 440.0),
    PortSpec::new("damping", 0.5),
];

pub struct PluckNode {
    buffer: Vec<f32>,
    len: usize,
    idx: usize,
    trigger: Arc<AtomicBool>,
    rng: StdRng,
}

impl PluckNode {
    pub fn new() -> Self {
        Self {
            buffer: vec![0.0; MAX_BUFFER_LEN],
            len: 0,
            idx: 0,
            trigger: Arc::new(AtomicBool::new(false)),
            rng: StdRng::from_entropy(),
        }
    }

    /// Deterministic excitation for tests.
    pub fn new_with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            ..Self::new()
        }
    }

    /// Shared trigger cell; setting it plucks the string at the start of the
    /// next block.
    pub fn trigger_cell(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.trigger)
    }

    /// Current ring-buffer length in samples (0 before the first pluck).
    pub fn buffer_len(&self) -> usize {
        self.len
    }

    fn pluck(&mut self, freq: f32, sample_rate: f32) {
        let freq = if freq.is_finite() {
            freq.clamp(PLUCK_FREQ_MIN, PLUCK_FREQ_MAX)
        } else {
            440.0
        };
        let len = (sample_rate / freq).round() as usize;
        self.len = len.clamp(2, MAX_BUFFER_LEN);
        self.idx = 0;
        for sample in self.buffer.iter_mut().take(self.len) {
            *sample = self.rng.gen_range(-1.0..=1.0);
        }
    }
}

impl Default for PluckNode {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioNode for PluckNode {
    fn process_block(&mut self, inputs: &[&[f32]], output: &mut [f32], sample_rate: f32) {
        debug_assert!(
            inputs.len() >= 2,
            "PluckNode requires frequency and damping inputs"
        );
        let frequency = inputs[0];
        let damping = inputs[1];
        debug_assert_eq!(frequency.len(), output.len(), "Frequency length mismatch");
        debug_assert_eq!(damping.len(), output.len(), "Damping length mismatch");

        if self.trigger.swap(false, Ordering::AcqRel) && !output.is_empty() {
            self.pluck(frequency[0], sample_rate);
        }

        if self.len < 2 {
            output.fill(0.0);
            return;
        }

        for i in 0..output.len() {
            let d = if damping[i].is_finite() {
                damping[i].clamp(DAMPING_MIN, DAMPING_MAX)
            } else {
                DAMPING_MIN
            };
            let decay = 0.5 * d;

            output[i] = self.buffer[self.idx];
            let next = (self.idx + 1) % self.len;
            self.buffer[self.idx] = (self.buffer[self.idx] + self.buffer[next]) * decay;
            self.idx = next;
        }
    }

    fn ports(&self) -> &[PortSpec] {
        &PORTS
    }

    fn name(&self) -> &str {
        "PluckNode"
    }

    fn reset(&mut self) {
        self.len = 0;
        self.idx = 0;
        self.trigger.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 44100.0;

    fn run(node: &mut PluckNode, n: usize, freq: f32, damping: f32) -> Vec<f32> {
        let frequency = vec![freq; n];
        let damping_buf = vec![damping; n];
        let inputs = vec![frequency.as_slice(), damping_buf.as_slice()];
        let mut output = vec![0.0; n];
        node.process_block(&inputs, &mut output, SR);
        output
    }

    fn rms(buf: &[f32]) -> f32 {
        (buf.iter().map(|x| x * x).sum::<f32>() / buf.len() as f32).sqrt()
    }

    #[test]
    fn test_silent_before_trigger() {
        let mut node = PluckNode::new_with_seed(42);
        let output = run(&mut node, 1024, 440.0, 0.5);
        assert!(output.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_trigger_produces_sound() {
        let mut node = PluckNode::new_with_seed(42);
        node.trigger_cell().store(true, Ordering::Release);
        let output = run(&mut node, 4410, 440.0, 0.9);
        assert!(rms(&output) > 0.01, "no sound after trigger");
    }

    #[test]
    fn test_buffer_length_matches_pitch() {
        for &freq in &[20.0, 82.4, 440.0, 1234.5, 2000.0] {
            let mut node = PluckNode::new_with_seed(1);
            node.trigger_cell().store(true, Ordering::Release);
            run(&mut node, 64, freq, 0.5);
            assert_eq!(node.buffer_len(), (SR / freq).round() as usize);
        }

        // Below the period-quantization limit the realized pitch is within
        // 1 Hz of the request
        for &freq in &[20.0, 55.0, 110.0, 220.0, 330.0] {
            let mut node = PluckNode::new_with_seed(1);
            node.trigger_cell().store(true, Ordering::Release);
            run(&mut node, 64, freq, 0.5);
            let realized = SR / node.buffer_len() as f32;
            assert!(
                (realized - freq).abs() < 1.0,
                "freq {} realized as {}",
                freq,
                realized
            );
        }
    }

    #[test]
    fn test_frequency_clamped() {
        let mut node = PluckNode::new_with_seed(1);
        node.trigger_cell().store(true, Ordering::Release);
        run(&mut node, 64, 5.0, 0.5);
        // 5 Hz clamps to 20 Hz
        assert_eq!(node.buffer_len(), (SR / 20.0).round() as usize);
    }

    #[test]
    fn test_higher_damping_sustains_longer() {
        let mut short = PluckNode::new_with_seed(7);
        short.trigger_cell().store(true, Ordering::Release);
        let out_short = run(&mut short, 44100, 220.0, 0.3);

        let mut long = PluckNode::new_with_seed(7);
        long.trigger_cell().store(true, Ordering::Release);
        let out_long = run(&mut long, 44100, 220.0, 0.99);

        let tail_short = rms(&out_short[22050..]);
        let tail_long = rms(&out_long[22050..]);
        assert!(
            tail_long > tail_short,
            "damping 0.99 tail {} not louder than 0.3 tail {}",
            tail_long,
            tail_short
        );
    }

    #[test]
    fn test_decay_keeps_output_bounded() {
        // decay = 0.5·clamp(damping) <= 0.495, so the loop always loses energy
        let mut node = PluckNode::new_with_seed(3);
        node.trigger_cell().store(true, Ordering::Release);
        let output = run(&mut node, 88200, 100.0, 5.0);
        assert!(output.iter().all(|&x| x.abs() <= 1.0));
        assert!(rms(&output[66150..]) < rms(&output[..4410]));
    }

    #[test]
    fn test_retrigger_restarts_burst() {
        let mut node = PluckNode::new_with_seed(9);
        node.trigger_cell().store(true, Ordering::Release);
        run(&mut node, 44100, 440.0, 0.5);

        node.trigger_cell().store(true, Ordering::Release);
        let output = run(&mut node, 4410, 440.0, 0.5);
        assert!(rms(&output) > 0.05, "retrigger did not re-excite");
    }

    #[test]
    fn test_trigger_consumed_once() {
        let mut node = PluckNode::new_with_seed(5);
        node.trigger_cell().store(true, Ordering::Release);
        run(&mut node, 64, 440.0, 0.5);
        assert!(!node.trigger_cell().load(Ordering::Acquire));
    }
}
