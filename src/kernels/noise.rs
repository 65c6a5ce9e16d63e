//! White noise source
//!
//! Uniform random values in [-1, 1] scaled by the `level` port. Seedable for
//! deterministic tests.

use crate::audio_node::{AudioNode, PortSpec};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const PORTS: [PortSpec; 1] = [PortSpec::new("level", 0.5)];

pub struct NoiseNode {
    rng: StdRng,
}

impl NoiseNode {
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_entropy(),
        }
    }

    pub fn new_with_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for NoiseNode {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioNode for NoiseNode {
    fn process_block(&mut self, inputs: &[&[f32]], output: &mut [f32], _sample_rate: f32) {
        debug_assert!(inputs.len() >= 1, "NoiseNode requires its level port");
        let level = inputs[0];
        debug_assert_eq!(level.len(), output.len(), "Level length mismatch");

        for i in 0..output.len() {
            let l = if level[i].is_finite() {
                level[i].clamp(0.0, 1.0)
            } else {
                0.0
            };
            output[i] = self.rng.gen_range(-1.0..=1.0) * l;
        }
    }

    fn ports(&self) -> &[PortSpec] {
        &PORTS
    }

    fn name(&self) -> &str {
        "NoiseNode"
    }
}
