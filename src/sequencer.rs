//! Step sequencer state machine
//!
//! Per-row sequencer with `pitch[0..N)` (0–100) and `gate[0..N)` (bool) step
//! arrays; the arrays are the sole source of truth, outputs are derived.
//! Two modes:
//!
//! - **Free-running**: a local timer advances one step every
//!   `60000 / bpm / 4` ms (a sixteenth note at the local BPM).
//! - **Sync-connected**: the local timer is disabled and the step position is
//!   slaved to the master clock, `current_step = master_tick mod step_count`.
//!
//! On every step landing the sequencer reports the normalized pitch output
//! (`pitch[step] / 100`, ramped by the receiving port) and fires its gate
//! listeners, but only on a low-to-high gate transition; holding the gate high
//! across consecutive steps must not re-fire.
//!
//! Gate listeners form an explicit, deterministically ordered observer list:
//! each listener is a shared trigger cell registered under a stable id, so
//! add/remove are idempotent and disconnect removes exactly one entry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_BPM: f64 = 120.0;
pub const MIN_BPM: f64 = 40.0;
pub const MAX_BPM: f64 = 240.0;

/// Outcome of landing on a step, applied by the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepEvent {
    pub step: usize,
    /// Normalized pitch output in [0, 1]
    pub pitch: f32,
    /// Whether the gate listeners fired on this landing
    pub fired: bool,
}

pub struct StepSequencer {
    step_count: usize,
    pitch: Vec<f32>,
    gate: Vec<bool>,
    current_step: usize,
    last_gate_on: bool,
    sync_connected: bool,
    bpm: f64,
    accum_ms: f64,
    listeners: Vec<(u64, Arc<AtomicBool>)>,
    next_listener_id: u64,
}

impl StepSequencer {
    /// New sequencer with the original default pattern: pitch 50 on step 0,
    /// gate open on step 0 only.
    pub fn new(step_count: usize) -> Self {
        let step_count = step_count.max(1);
        let mut pitch = vec![0.0; step_count];
        pitch[0] = 50.0;
        let mut gate = vec![false; step_count];
        gate[0] = true;
        Self {
            step_count,
            pitch,
            gate,
            current_step: 0,
            last_gate_on: false,
            sync_connected: false,
            bpm: DEFAULT_BPM,
            accum_ms: 0.0,
            listeners: Vec::new(),
            next_listener_id: 0,
        }
    }

    pub fn step_count(&self) -> usize {
        self.step_count
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub fn is_sync_connected(&self) -> bool {
        self.sync_connected
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn pitches(&self) -> &[f32] {
        &self.pitch
    }

    pub fn gates(&self) -> &[bool] {
        &self.gate
    }

    fn step_ms(&self) -> f64 {
        60_000.0 / self.bpm / 4.0
    }

    fn fire_listeners(&self) {
        for (_, cell) in &self.listeners {
            cell.store(true, Ordering::Release);
        }
    }

    /// Land on `step`: update gate edge state, fire listeners on a rising
    /// edge, report the derived pitch output.
    fn land_on(&mut self, step: usize) -> StepEvent {
        self.current_step = step;
        let gate_on = self.gate[step];
        let fired = gate_on && !self.last_gate_on;
        if fired {
            self.fire_listeners();
        }
        self.last_gate_on = gate_on;
        StepEvent {
            step,
            pitch: self.pitch[step] / 100.0,
            fired,
        }
    }

    /// Restart the loop from step 0 (loop start counts as a gate edge when
    /// step 0's gate is open).
    pub fn restart(&mut self) -> StepEvent {
        self.accum_ms = 0.0;
        self.current_step = 0;
        self.last_gate_on = false;
        self.land_on(0)
    }

    /// Set the local tempo and restart the loop, as the original does on any
    /// BPM edit.
    pub fn set_bpm(&mut self, bpm: f64) -> StepEvent {
        self.bpm = bpm.clamp(MIN_BPM, MAX_BPM);
        self.restart()
    }

    /// Edit a step's pitch. Returns the new normalized output when the
    /// edited step is currently held, so the engine can re-ramp immediately.
    pub fn set_pitch(&mut self, step: usize, value: f32) -> Option<f32> {
        if step >= self.step_count {
            return None;
        }
        self.pitch[step] = value.clamp(0.0, 100.0);
        if step == self.current_step {
            Some(self.pitch[step] / 100.0)
        } else {
            None
        }
    }

    pub fn set_gate(&mut self, step: usize, on: bool) {
        if step < self.step_count {
            self.gate[step] = on;
        }
    }

    /// Register a gate listener; the cell is raised on every rising edge.
    pub fn add_gate_listener(&mut self, cell: Arc<AtomicBool>) -> u64 {
        let id = self.next_listener_id;
        self.next_listener_id += 1;
        self.listeners.push((id, cell));
        debug!(id, "sequencer: gate listener added");
        id
    }

    pub fn remove_gate_listener(&mut self, id: u64) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(lid, _)| *lid != id);
        self.listeners.len() != before
    }

    pub fn gate_listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Switch between free-running and sync-connected modes.
    ///
    /// Connecting sync cancels the local timer; disconnecting restarts the
    /// local loop from step 0 and returns that landing.
    pub fn set_sync_connected(&mut self, connected: bool) -> Option<StepEvent> {
        if self.sync_connected == connected {
            return None;
        }
        self.sync_connected = connected;
        debug!(connected, "sequencer: sync mode changed");
        if connected {
            self.accum_ms = 0.0;
            None
        } else {
            Some(self.restart())
        }
    }

    /// Free-running advancement by elapsed control time. No-op while
    /// sync-connected.
    pub fn advance(&mut self, dt_ms: f64) -> Vec<StepEvent> {
        let mut events = Vec::new();
        if self.sync_connected {
            return events;
        }
        self.accum_ms += dt_ms;
        let step_ms = self.step_ms();
        while self.accum_ms >= step_ms {
            self.accum_ms -= step_ms;
            let next = (self.current_step + 1) % self.step_count;
            events.push(self.land_on(next));
        }
        events
    }

    /// Sync-driven advancement: land on `master_tick mod step_count`.
    pub fn on_master_tick(&mut self, master_tick: u64) -> StepEvent {
        let step = (master_tick % self.step_count as u64) as usize;
        self.land_on(step)
    }
}
