//! Master bus and mix-state resolution
//!
//! Rows fold down into a stereo master bus with an equal-power pan law.
//! Mute and solo resolve across all rows at once: soloing any row silences
//! every non-soloed row, and mute silences its own row even while it is
//! soloed. The resolved gain is pushed to each row's channel strip as a
//! ramped port target, so toggles never click.

use std::f32::consts::FRAC_PI_4;

/// Gain a row's strip should sit at given its own flags and whether any
/// row in the rack is soloed.
pub fn effective_gain(mute: bool, solo: bool, any_solo: bool) -> f32 {
    if any_solo && !solo {
        0.0
    } else if mute {
        0.0
    } else {
        1.0
    }
}

/// Equal-power pan law: pan in [-1, 1] maps to (left, right) gains along a
/// quarter circle, center sitting at -3 dB per side.
pub fn pan_gains(pan: f32) -> (f32, f32) {
    let pan = if pan.is_finite() { pan.clamp(-1.0, 1.0) } else { 0.0 };
    let angle = (pan + 1.0) * FRAC_PI_4;
    (angle.cos(), angle.sin())
}

/// Stereo accumulation buffers for one block.
pub struct MasterBus {
    left: Vec<f32>,
    right: Vec<f32>,
}

impl MasterBus {
    pub fn new(block_size: usize) -> Self {
        Self {
            left: vec![0.0; block_size],
            right: vec![0.0; block_size],
        }
    }

    pub fn clear(&mut self, block_size: usize) {
        self.left.clear();
        self.left.resize(block_size, 0.0);
        self.right.clear();
        self.right.resize(block_size, 0.0);
    }

    /// Fold one row into the bus. `pans` is the row's resolved per-sample
    /// pan buffer, so patched pan modulation moves the image at audio rate.
    pub fn mix_row(&mut self, signal: &[f32], pans: &[f32]) {
        debug_assert_eq!(signal.len(), self.left.len(), "Block length mismatch");
        debug_assert_eq!(pans.len(), self.left.len(), "Pan length mismatch");
        for i in 0..signal.len() {
            let (l, r) = pan_gains(pans[i]);
            self.left[i] += signal[i] * l;
            self.right[i] += signal[i] * r;
        }
    }

    pub fn left(&self) -> &[f32] {
        &self.left
    }

    pub fn right(&self) -> &[f32] {
        &self.right
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_gain_matrix() {
        // (mute, solo, any_solo) -> gain
        assert_eq!(effective_gain(false, false, false), 1.0);
        assert_eq!(effective_gain(true, false, false), 0.0);
        assert_eq!(effective_gain(false, false, true), 0.0);
        assert_eq!(effective_gain(false, true, true), 1.0);
        // Mute still silences its own row while soloed
        assert_eq!(effective_gain(true, true, true), 0.0);
        assert_eq!(effective_gain(true, false, true), 0.0);
    }

    #[test]
    fn test_pan_law_extremes_and_center() {
        let (l, r) = pan_gains(-1.0);
        assert!((l - 1.0).abs() < 1e-6);
        assert!(r.abs() < 1e-6);

        let (l, r) = pan_gains(1.0);
        assert!(l.abs() < 1e-6);
        assert!((r - 1.0).abs() < 1e-6);

        let (l, r) = pan_gains(0.0);
        let minus_3db = 0.5f32.sqrt();
        assert!((l - minus_3db).abs() < 1e-6);
        assert!((r - minus_3db).abs() < 1e-6);
    }

    #[test]
    fn test_pan_law_conserves_power() {
        for i in 0..=20 {
            let pan = -1.0 + i as f32 * 0.1;
            let (l, r) = pan_gains(pan);
            assert!((l * l + r * r - 1.0).abs() < 1e-5, "pan {}", pan);
        }
    }

    #[test]
    fn test_non_finite_pan_centers() {
        let center = pan_gains(0.0);
        assert_eq!(pan_gains(f32::NAN), center);
        assert_eq!(pan_gains(f32::INFINITY), center);
    }

    #[test]
    fn test_rows_sum_into_bus() {
        let mut bus = MasterBus::new(4);
        bus.clear(4);
        let center = vec![0.0; 4];
        bus.mix_row(&[1.0, 1.0, 1.0, 1.0], &center);
        bus.mix_row(&[0.5, 0.5, 0.5, 0.5], &center);

        let expected = 1.5 * 0.5f32.sqrt();
        for i in 0..4 {
            assert!((bus.left()[i] - expected).abs() < 1e-5);
            assert!((bus.right()[i] - expected).abs() < 1e-5);
        }
    }
}
