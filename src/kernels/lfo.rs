//! Low-frequency oscillator
//!
//! Bipolar modulation source: sine, triangle, square or saw, scaled by the
//! `depth` port. Depth defaults to 0 so a freshly added LFO is inert until
//! dialed in, matching the hardware convention of a closed depth knob.

use crate::audio_node::{AudioNode, PortSpec};

pub const RATE_MIN: f32 = 0.01;
pub const RATE_MAX: f32 = 200.0;

const PORTS: [PortSpec; 2] = [PortSpec::new("rate", 2.0), PortSpec::new("depth", 0.0)];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LfoShape {
    Sine,
    Triangle,
    Square,
    Saw,
}

impl LfoShape {
    #[inline]
    fn value(self, phase: f32) -> f32 {
        match self {
            LfoShape::Sine => (2.0 * std::f32::consts::PI * phase).sin(),
            LfoShape::Triangle => {
                if phase < 0.5 {
                    4.0 * phase - 1.0
                } else {
                    3.0 - 4.0 * phase
                }
            }
            LfoShape::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            LfoShape::Saw => 2.0 * phase - 1.0,
        }
    }
}

pub struct LfoNode {
    shape: LfoShape,
    phase: f32,
}

impl LfoNode {
    pub fn new(shape: LfoShape) -> Self {
        Self { shape, phase: 0.0 }
    }

    pub fn shape(&self) -> LfoShape {
        self.shape
    }

    pub fn set_shape(&mut self, shape: LfoShape) {
        self.shape = shape;
    }
}

impl AudioNode for LfoNode {
    fn process_block(&mut self, inputs: &[&[f32]], output: &mut [f32], sample_rate: f32) {
        debug_assert!(inputs.len() >= 2, "LfoNode requires rate and depth inputs");
        let rate = inputs[0];
        let depth = inputs[1];
        debug_assert_eq!(rate.len(), output.len(), "Rate length mismatch");
        debug_assert_eq!(depth.len(), output.len(), "Depth length mismatch");

        for i in 0..output.len() {
            let r = if rate[i].is_finite() {
                rate[i].clamp(RATE_MIN, RATE_MAX)
            } else {
                RATE_MIN
            };
            let d = if depth[i].is_finite() {
                depth[i].clamp(0.0, 1.0)
            } else {
                0.0
            };

            output[i] = self.shape.value(self.phase) * d;

            self.phase += r / sample_rate;
            while self.phase >= 1.0 {
                self.phase -= 1.0;
            }
        }
    }

    fn ports(&self) -> &[PortSpec] {
        &PORTS
    }

    fn name(&self) -> &str {
        "LfoNode"
    }

    fn reset(&mut self) {
        self.phase = 0.0;
    }
}
