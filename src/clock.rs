//! Master clock
//!
//! Session-wide sixteenth-note counter. `master_tick` increments once per
//! sixteenth of the master tempo; every sync-connected sequencer observes
//! the same tick value within the same control pass, which is what gives
//! block-level synchronization across rows. Changing the tempo resets the
//! tick to 0.

use tracing::debug;

pub const DEFAULT_MASTER_BPM: f64 = 120.0;
pub const MIN_MASTER_BPM: f64 = 40.0;
pub const MAX_MASTER_BPM: f64 = 240.0;

pub struct MasterClock {
    bpm: f64,
    tick: u64,
    accum_ms: f64,
}

impl MasterClock {
    pub fn new(bpm: f64) -> Self {
        Self {
            bpm: bpm.clamp(MIN_MASTER_BPM, MAX_MASTER_BPM),
            tick: 0,
            accum_ms: 0.0,
        }
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Sixteenth-note interval at the current tempo, in ms.
    pub fn tick_interval_ms(&self) -> f64 {
        60_000.0 / self.bpm / 4.0
    }

    /// Change tempo. Resets the tick counter so every synced sequencer
    /// realigns from zero.
    pub fn set_bpm(&mut self, bpm: f64) {
        self.bpm = bpm.clamp(MIN_MASTER_BPM, MAX_MASTER_BPM);
        self.tick = 0;
        self.accum_ms = 0.0;
        debug!(bpm = self.bpm, "master clock: tempo changed, tick reset");
    }

    /// Advance by elapsed control time, returning each tick value crossed.
    pub fn advance(&mut self, dt_ms: f64) -> Vec<u64> {
        let mut ticks = Vec::new();
        self.accum_ms += dt_ms;
        let interval = self.tick_interval_ms();
        while self.accum_ms >= interval {
            self.accum_ms -= interval;
            self.tick += 1;
            ticks.push(self.tick);
        }
        ticks
    }
}

impl Default for MasterClock {
    fn default() -> Self {
        Self::new(DEFAULT_MASTER_BPM)
    }
}
