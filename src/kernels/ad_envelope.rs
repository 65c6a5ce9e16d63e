//! Attack-decay envelope generator
//!
//! One-shot, trigger-based modulation source: linear ramp from 0 to 1 over
//! the attack time, then back to 0 over the decay time. The trigger is the
//! same atomic-cell mechanism as [`PluckNode`](super::PluckNode): raised by
//! the control context (a button, or a sequencer gate edge through a
//! gate→trigger connection) and consumed at the start of the next block.

use crate::audio_node::{AudioNode, PortSpec};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const MIN_TIME: f32 = 0.0001;

const PORTS: [PortSpec; 2] = [
    PortSpec::new("attack", 0.01),
    PortSpec::new("decay", 0.2),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnvPhase {
    Idle,
    Attack,
    Decay,
}

pub struct AdEnvelopeNode {
    phase: EnvPhase,
    value: f32,
    trigger: Arc<AtomicBool>,
}

impl AdEnvelopeNode {
    pub fn new() -> Self {
        Self {
            phase: EnvPhase::Idle,
            value: 0.0,
            trigger: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn trigger_cell(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.trigger)
    }

    pub fn value(&self) -> f32 {
        self.value
    }
}

impl Default for AdEnvelopeNode {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioNode for AdEnvelopeNode {
    fn process_block(&mut self, inputs: &[&[f32]], output: &mut [f32], sample_rate: f32) {
        debug_assert!(
            inputs.len() >= 2,
            "AdEnvelopeNode requires attack and decay inputs"
        );
        let attack = inputs[0];
        let decay = inputs[1];
        debug_assert_eq!(attack.len(), output.len(), "Attack length mismatch");
        debug_assert_eq!(decay.len(), output.len(), "Decay length mismatch");

        if self.trigger.swap(false, Ordering::AcqRel) {
            self.phase = EnvPhase::Attack;
            self.value = 0.0;
        }

        for i in 0..output.len() {
            let attack_time = if attack[i].is_finite() {
                attack[i].max(MIN_TIME)
            } else {
                MIN_TIME
            };
            let decay_time = if decay[i].is_finite() {
                decay[i].max(MIN_TIME)
            } else {
                MIN_TIME
            };

            match self.phase {
                EnvPhase::Idle => {
                    self.value = 0.0;
                }
                EnvPhase::Attack => {
                    self.value += 1.0 / (attack_time * sample_rate);
                    if self.value >= 1.0 {
                        self.value = 1.0;
                        self.phase = EnvPhase::Decay;
                    }
                }
                EnvPhase::Decay => {
                    self.value -= 1.0 / (decay_time * sample_rate);
                    if self.value <= 0.0 {
                        self.value = 0.0;
                        self.phase = EnvPhase::Idle;
                    }
                }
            }
            output[i] = self.value;
        }
    }

    fn ports(&self) -> &[PortSpec] {
        &PORTS
    }

    fn name(&self) -> &str {
        "AdEnvelopeNode"
    }

    fn reset(&mut self) {
        self.phase = EnvPhase::Idle;
        self.value = 0.0;
        self.trigger.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(node: &mut AdEnvelopeNode, n: usize, attack: f32, decay: f32) -> Vec<f32> {
        let attack_buf = vec![attack; n];
        let decay_buf = vec![decay; n];
        let inputs = vec![attack_buf.as_slice(), decay_buf.as_slice()];
        let mut output = vec![0.0; n];
        node.process_block(&inputs, &mut output, 44100.0);
        output
    }

    #[test]
    fn test_idle_without_trigger() {
        let mut node = AdEnvelopeNode::new();
        let output = run(&mut node, 1024, 0.01, 0.1);
        assert!(output.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_attack_then_decay() {
        let mut node = AdEnvelopeNode::new();
        node.trigger_cell().store(true, Ordering::Release);
        // 10 ms attack = 441 samples, 50 ms decay = 2205 samples
        let output = run(&mut node, 4410, 0.01, 0.05);

        assert!(output[220] > 0.3 && output[220] < 0.7);
        let peak = output.iter().cloned().fold(0.0f32, f32::max);
        assert!((peak - 1.0).abs() < 0.01, "peak {}", peak);
        // Fully decayed well before the end of the buffer
        assert_eq!(output[4409], 0.0);
    }

    #[test]
    fn test_retrigger_restarts_from_zero() {
        let mut node = AdEnvelopeNode::new();
        node.trigger_cell().store(true, Ordering::Release);
        run(&mut node, 441, 0.01, 0.5);
        let mid = node.value();
        assert!(mid > 0.5);

        node.trigger_cell().store(true, Ordering::Release);
        let output = run(&mut node, 4, 0.01, 0.5);
        assert!(output[0] < 0.01, "retrigger started at {}", output[0]);
    }

    #[test]
    fn test_envelope_is_unipolar() {
        let mut node = AdEnvelopeNode::new();
        node.trigger_cell().store(true, Ordering::Release);
        let output = run(&mut node, 44100, 0.001, 0.02);
        assert!(output.iter().all(|&x| (0.0..=1.0).contains(&x)));
    }
}
