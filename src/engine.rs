//! Engine
//!
//! Owns everything: the audio graph, the rack rows, the patch cables, the
//! master clock and the per-sequencer state. All state lives here behind
//! explicit methods; the audio driver and any frontend talk to the same
//! instance, control edits between blocks and rendering inside them.
//!
//! The render path is split in two per block: a control pass (master clock
//! ticks, sequencer timers, step landings applied as ramped port targets)
//! followed by one `process_block` over the graph and a fold of every row's
//! channel strip into the stereo master bus.

use crate::audio_node::NodeId;
use crate::clock::MasterClock;
use crate::error::EngineError;
use crate::graph::AudioGraph;
use crate::kernels::{ChannelStripNode, ScaleNode};
use crate::mixer::{effective_gain, MasterBus};
use crate::module::{ModuleInstance, ModuleKind, ModuleRegistry};
use crate::patch::{Connection, ConnectionSet, PatchSource, PatchTarget, Wiring};
use crate::rack::{Row, Slot, SlotIndex};
use crate::sequencer::{StepEvent, StepSequencer};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub sample_rate: f32,
    pub block_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100.0,
            block_size: 512,
        }
    }
}

/// Resolved wiring a `connect` call intends to make, before anything
/// touches the graph.
enum WiringPlan {
    Signal {
        from: NodeId,
        to: NodeId,
        port: &'static str,
        scale: f32,
    },
    Gate {
        src_slot: u64,
        cell: Arc<AtomicBool>,
    },
    Sync {
        dst_slot: u64,
    },
}

pub struct Engine {
    graph: AudioGraph,
    registry: ModuleRegistry,
    rows: Vec<Row>,
    connections: ConnectionSet,
    clock: MasterClock,
    sequencers: HashMap<u64, StepSequencer>,
    master: MasterBus,
    block_size: usize,
    next_row_id: u64,
    next_instance_id: u64,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        if !(config.sample_rate > 0.0 && config.sample_rate.is_finite()) {
            return Err(EngineError::InvalidConfig(format!(
                "bad sample rate {}",
                config.sample_rate
            )));
        }
        if config.block_size == 0 {
            return Err(EngineError::InvalidConfig("zero block size".into()));
        }
        Ok(Self {
            graph: AudioGraph::new(config.sample_rate),
            registry: ModuleRegistry::with_standard_modules(),
            rows: Vec::new(),
            connections: ConnectionSet::new(),
            clock: MasterClock::default(),
            sequencers: HashMap::new(),
            master: MasterBus::new(config.block_size),
            block_size: config.block_size,
            next_row_id: 0,
            next_instance_id: 0,
        })
    }

    pub fn sample_rate(&self) -> f32 {
        self.graph.sample_rate()
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn row(&self, row_id: u64) -> Option<&Row> {
        self.rows.iter().find(|r| r.id == row_id)
    }

    pub fn connections(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter()
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn master_bpm(&self) -> f64 {
        self.clock.bpm()
    }

    pub fn master_tick(&self) -> u64 {
        self.clock.tick()
    }

    /// Change the master tempo. The tick counter resets, so every synced
    /// sequencer realigns from zero on the next tick.
    pub fn set_master_bpm(&mut self, bpm: f64) {
        self.clock.set_bpm(bpm);
    }

    fn row_index(&self, row_id: u64) -> Result<usize, EngineError> {
        self.rows
            .iter()
            .position(|r| r.id == row_id)
            .ok_or(EngineError::NoSuchRow(row_id))
    }

    fn locate_slot(&self, slot_id: u64) -> Result<(usize, SlotIndex), EngineError> {
        for (i, row) in self.rows.iter().enumerate() {
            if let Some(index) = row.slot_index(slot_id) {
                return Ok((i, index));
            }
        }
        Err(EngineError::NoSuchSlot(slot_id))
    }

    fn find_module(&self, slot_id: u64) -> Option<&ModuleInstance> {
        self.rows
            .iter()
            .find_map(|r| r.slot(slot_id))
            .map(|s| &s.module)
    }

    // ---------------------------------------------------------------- rack

    /// Create a new row around a source module. Returns (row id, slot id).
    pub fn add_source_row(&mut self, type_id: &str, name: &str) -> Result<(u64, u64), EngineError> {
        match self.registry.kind_of(type_id) {
            Some(ModuleKind::Source) => {}
            Some(_) => {
                return Err(EngineError::ModuleKindMismatch(type_id.to_string(), "source"))
            }
            None => return Err(EngineError::UnknownModuleType(type_id.to_string())),
        }
        let built = self.registry.build(&mut self.graph, type_id)?;
        let strip = self.graph.add_node(Box::new(ChannelStripNode::new()));
        let row_id = self.next_row_id;
        self.next_row_id += 1;
        let slot_id = self.next_instance_id;
        self.next_instance_id += 1;

        let mut row = Row::new(row_id, name.to_string(), strip);
        row.source = Some(Slot {
            instance_id: slot_id,
            module: built.instance,
        });
        if let Some(seq) = built.sequencer {
            self.sequencers.insert(slot_id, seq);
        }
        self.rows.push(row);
        self.rebuild_row(row_id)?;
        self.apply_mix_state();
        info!(row = row_id, type_id, "rack: source row added");
        Ok((row_id, slot_id))
    }

    /// Append an effect to a row's chain and rewire the row's audio path.
    pub fn add_effect(&mut self, row_id: u64, type_id: &str) -> Result<u64, EngineError> {
        if !matches!(self.registry.kind_of(type_id), Some(ModuleKind::Effect)) {
            if !self.registry.contains(type_id) {
                return Err(EngineError::UnknownModuleType(type_id.to_string()));
            }
            return Err(EngineError::ModuleKindMismatch(type_id.to_string(), "effect"));
        }
        let slot_id = self.append_to_chain(row_id, type_id)?;
        self.rebuild_row(row_id)?;
        info!(row = row_id, type_id, "rack: effect added");
        Ok(slot_id)
    }

    /// Append a modulator to a row's chain. Modulators sit outside the
    /// audio path, so no rewiring happens.
    pub fn add_modulator(&mut self, row_id: u64, type_id: &str) -> Result<u64, EngineError> {
        if !matches!(self.registry.kind_of(type_id), Some(ModuleKind::Modulator)) {
            if !self.registry.contains(type_id) {
                return Err(EngineError::UnknownModuleType(type_id.to_string()));
            }
            return Err(EngineError::ModuleKindMismatch(type_id.to_string(), "modulator"));
        }
        let slot_id = self.append_to_chain(row_id, type_id)?;
        info!(row = row_id, type_id, "rack: modulator added");
        Ok(slot_id)
    }

    fn append_to_chain(&mut self, row_id: u64, type_id: &str) -> Result<u64, EngineError> {
        let row_idx = self.row_index(row_id)?;
        let built = self.registry.build(&mut self.graph, type_id)?;
        let slot_id = self.next_instance_id;
        self.next_instance_id += 1;
        if let Some(seq) = built.sequencer {
            self.sequencers.insert(slot_id, seq);
        }
        self.rows[row_idx].chain.push(Slot {
            instance_id: slot_id,
            module: built.instance,
        });
        Ok(slot_id)
    }

    /// Remove a module. Removing a row's source removes the whole row;
    /// removing a chain module closes the gap and rewires the path. All
    /// cables touching the module are disconnected first, and a sequencer's
    /// timer is cancelled before its outputs come down.
    pub fn remove_module(&mut self, slot_id: u64) -> Result<(), EngineError> {
        let (row_idx, index) = self.locate_slot(slot_id)?;
        match index {
            SlotIndex::Source => {
                let row_id = self.rows[row_idx].id;
                self.remove_row(row_id)
            }
            SlotIndex::Chain(i) => {
                self.sequencers.remove(&slot_id);
                for idx in self.connections.indices_for_slot(slot_id) {
                    let connection = self.connections.remove(idx);
                    self.unapply(connection)?;
                }
                let row_id = self.rows[row_idx].id;
                let slot = self.rows[row_idx].chain.remove(i);
                for &node in &slot.module.nodes {
                    let _ = self.graph.remove_node(node);
                }
                self.rebuild_row(row_id)?;
                info!(slot = slot_id, "rack: module removed");
                Ok(())
            }
            SlotIndex::Pan => Err(EngineError::NoSuchSlot(slot_id)),
        }
    }

    /// Move a chain module to position `to` within its row and rewire the
    /// audio path around the new order. Positions past the end clamp to the
    /// end. Cables address slots by stable id, so they survive the move.
    pub fn move_in_chain(&mut self, slot_id: u64, to: usize) -> Result<(), EngineError> {
        let (row_idx, index) = self.locate_slot(slot_id)?;
        let from = match index {
            SlotIndex::Chain(i) => i,
            _ => return Err(EngineError::NoSuchSlot(slot_id)),
        };
        let row_id = self.rows[row_idx].id;
        let chain = &mut self.rows[row_idx].chain;
        let to = to.min(chain.len() - 1);
        if to != from {
            let slot = chain.remove(from);
            chain.insert(to, slot);
            self.rebuild_row(row_id)?;
            info!(slot = slot_id, from, to, "rack: chain reordered");
        }
        Ok(())
    }

    pub fn set_row_name(&mut self, row_id: u64, name: &str) -> Result<(), EngineError> {
        let row_idx = self.row_index(row_id)?;
        self.rows[row_idx].name = name.to_string();
        Ok(())
    }

    pub fn remove_row(&mut self, row_id: u64) -> Result<(), EngineError> {
        let row_idx = self.row_index(row_id)?;
        let slot_ids: Vec<u64> = self.rows[row_idx].slots().map(|s| s.instance_id).collect();
        // Timers first, then cables, then nodes
        for slot_id in &slot_ids {
            self.sequencers.remove(slot_id);
        }
        for slot_id in &slot_ids {
            for idx in self.connections.indices_for_slot(*slot_id) {
                let connection = self.connections.remove(idx);
                self.unapply(connection)?;
            }
        }
        for idx in self.connections.indices_for_row_targets(row_id) {
            let connection = self.connections.remove(idx);
            self.unapply(connection)?;
        }
        let row = self.rows.remove(row_idx);
        for slot in row.source.iter().chain(row.chain.iter()) {
            for &node in &slot.module.nodes {
                let _ = self.graph.remove_node(node);
            }
        }
        let _ = self.graph.remove_node(row.strip);
        self.apply_mix_state();
        info!(row = row_id, "rack: row removed");
        Ok(())
    }

    pub fn clear_rack(&mut self) -> Result<(), EngineError> {
        let row_ids: Vec<u64> = self.rows.iter().map(|r| r.id).collect();
        for row_id in row_ids {
            self.remove_row(row_id)?;
        }
        Ok(())
    }

    /// Rebuild a row's serial audio path in two phases: snapshot the row's
    /// pan cables, tear down the old path, rewire source -> chain effects ->
    /// channel strip, then reattach the pan cables. On failure the old path
    /// is restored.
    pub fn rebuild_row(&mut self, row_id: u64) -> Result<(), EngineError> {
        let row_idx = self.row_index(row_id)?;
        let strip = self.rows[row_idx].strip;

        // Phase 1: snapshot cables landing on this row's pan, teardown
        let pan_edges: Vec<(NodeId, &'static str)> = self
            .connections
            .iter()
            .filter(|c| matches!(&c.target, PatchTarget::RowPan { row } if *row == row_id))
            .filter_map(|c| match &c.wiring {
                Wiring::Signal {
                    from,
                    port,
                    scale_node,
                    ..
                } => Some((scale_node.unwrap_or(*from), *port)),
                _ => None,
            })
            .collect();
        let old_wired = std::mem::take(&mut self.rows[row_idx].wired);
        for &(f, t) in &old_wired {
            self.graph.disconnect_audio(f, t);
        }
        for &(from, port) in &pan_edges {
            self.graph.disconnect_control(from, strip, port);
        }

        // Phase 2: rewire. Chain slots without audio endpoints (modulators)
        // are skipped; a row without a source keeps a silent strip.
        let mut plan: Vec<(NodeId, NodeId)> = Vec::new();
        {
            let row = &self.rows[row_idx];
            let mut prev = row.source.as_ref().and_then(|s| s.module.audio_out);
            for slot in &row.chain {
                if let (Some(prev_out), Some(a_in), Some(a_out)) =
                    (prev, slot.module.audio_in, slot.module.audio_out)
                {
                    plan.push((prev_out, a_in));
                    prev = Some(a_out);
                }
            }
            if let Some(prev_out) = prev {
                plan.push((prev_out, strip));
            }
        }
        for i in 0..plan.len() {
            if let Err(e) = self.graph.connect_audio(plan[i].0, plan[i].1) {
                for &(f, t) in &plan[..i] {
                    self.graph.disconnect_audio(f, t);
                }
                for &(f, t) in &old_wired {
                    let _ = self.graph.connect_audio(f, t);
                }
                for &(from, port) in &pan_edges {
                    let _ = self.graph.connect_control(from, strip, port);
                }
                self.rows[row_idx].wired = old_wired;
                return Err(e);
            }
        }
        self.rows[row_idx].wired = plan;
        for &(from, port) in &pan_edges {
            self.graph.connect_control(from, strip, port)?;
        }
        debug!(row = row_id, "rack: row path rebuilt");
        Ok(())
    }

    // --------------------------------------------------------------- patch

    /// Patch a cable. Both endpoints must advertise the needed capability;
    /// otherwise nothing happens and `Ok(false)` is returned. A target that
    /// already has a writer gets its old cable evicted, and the eviction is
    /// undone if the new wiring is rejected, so a failed connect leaves the
    /// patch exactly as it was.
    pub fn connect(
        &mut self,
        source: PatchSource,
        target: PatchTarget,
    ) -> Result<bool, EngineError> {
        let plan = match (&source, &target) {
            (PatchSource::MasterClock, PatchTarget::Sync { slot, .. }) => {
                if self.sequencers.contains_key(slot) {
                    WiringPlan::Sync { dst_slot: *slot }
                } else {
                    debug!(slot, "patch: sync target is not a sequencer, ignoring");
                    return Ok(false);
                }
            }
            (
                PatchSource::Module {
                    slot: src_slot,
                    output,
                    ..
                },
                PatchTarget::Trigger { slot: dst_slot, .. },
            ) => {
                let gate_source = output == "gate"
                    && self
                        .find_module(*src_slot)
                        .map(|m| m.has_gate_output)
                        .unwrap_or(false);
                let cell = self.find_module(*dst_slot).and_then(|m| m.trigger.clone());
                match (gate_source, cell) {
                    (true, Some(cell)) => WiringPlan::Gate {
                        src_slot: *src_slot,
                        cell,
                    },
                    _ => {
                        debug!(
                            src = src_slot,
                            dst = dst_slot,
                            "patch: gate/trigger endpoints not patchable, ignoring"
                        );
                        return Ok(false);
                    }
                }
            }
            (
                PatchSource::Module {
                    slot: src_slot,
                    output,
                    ..
                },
                PatchTarget::Param {
                    slot: dst_slot,
                    param,
                    ..
                },
            ) => {
                let from = self
                    .find_module(*src_slot)
                    .and_then(|m| m.mod_output(output))
                    .map(|o| o.node);
                let dst = self
                    .find_module(*dst_slot)
                    .and_then(|m| m.param(param))
                    .map(|p| (p.node, p.port, p.modulation_scale));
                match (from, dst) {
                    (Some(from), Some((to, port, scale))) => WiringPlan::Signal {
                        from,
                        to,
                        port,
                        scale,
                    },
                    _ => {
                        debug!(
                            src = src_slot,
                            dst = dst_slot,
                            param,
                            "patch: signal endpoints not patchable, ignoring"
                        );
                        return Ok(false);
                    }
                }
            }
            (
                PatchSource::Module {
                    slot: src_slot,
                    output,
                    ..
                },
                PatchTarget::RowPan { row },
            ) => {
                let from = self
                    .find_module(*src_slot)
                    .and_then(|m| m.mod_output(output))
                    .map(|o| o.node);
                let strip = self.row(*row).map(|r| r.strip);
                match (from, strip) {
                    (Some(from), Some(strip)) => WiringPlan::Signal {
                        from,
                        to: strip,
                        port: "pan",
                        scale: 1.0,
                    },
                    _ => {
                        debug!(src = src_slot, row, "patch: pan endpoints not patchable, ignoring");
                        return Ok(false);
                    }
                }
            }
            _ => {
                debug!("patch: incompatible endpoint kinds, ignoring");
                return Ok(false);
            }
        };

        // Single writer per target. The standing cable comes out before the
        // new edges go in, and goes back on failure.
        let evicted = match self.connections.find_target(&target) {
            Some(idx) => {
                let old = self.connections.remove(idx);
                let old_source = old.source.clone();
                self.unapply(old)?;
                Some(old_source)
            }
            None => None,
        };

        let wiring = match self.apply_plan(plan) {
            Ok(wiring) => wiring,
            Err(e) => {
                // Rewire the evicted cable; it was live a moment ago, so
                // this cannot fail structurally
                if let Some(old_source) = evicted {
                    let _ = self.connect(old_source, target);
                }
                return Err(e);
            }
        };

        info!(?source, ?target, "patch: connected");
        self.connections.push(Connection {
            source,
            target,
            wiring,
        });
        Ok(true)
    }

    /// Turn a resolved plan into live graph/sequencer state. On error the
    /// graph is left exactly as it was.
    fn apply_plan(&mut self, plan: WiringPlan) -> Result<Wiring, EngineError> {
        match plan {
            WiringPlan::Signal {
                from,
                to,
                port,
                scale,
            } => {
                if (scale - 1.0).abs() > f32::EPSILON {
                    // Range adapter between the [0,1]-ish source and the
                    // port's native units
                    let scale_node = self.graph.add_node(Box::new(ScaleNode::new(scale)));
                    let wired = self
                        .graph
                        .connect_audio(from, scale_node)
                        .and_then(|_| self.graph.connect_control(scale_node, to, port));
                    if let Err(e) = wired {
                        let _ = self.graph.remove_node(scale_node);
                        return Err(e);
                    }
                    Ok(Wiring::Signal {
                        from,
                        to,
                        port,
                        scale_node: Some(scale_node),
                    })
                } else {
                    self.graph.connect_control(from, to, port)?;
                    Ok(Wiring::Signal {
                        from,
                        to,
                        port,
                        scale_node: None,
                    })
                }
            }
            WiringPlan::Gate { src_slot, cell } => {
                let seq = self
                    .sequencers
                    .get_mut(&src_slot)
                    .ok_or(EngineError::NoSuchSlot(src_slot))?;
                Ok(Wiring::Gate {
                    listener: seq.add_gate_listener(cell),
                })
            }
            WiringPlan::Sync { dst_slot } => {
                if let Some(seq) = self.sequencers.get_mut(&dst_slot) {
                    seq.set_sync_connected(true);
                }
                Ok(Wiring::Sync)
            }
        }
    }

    /// Remove the cable writing to `target`, if one exists.
    pub fn disconnect(&mut self, target: &PatchTarget) -> Result<bool, EngineError> {
        match self.connections.find_target(target) {
            Some(idx) => {
                let connection = self.connections.remove(idx);
                info!(?target, "patch: disconnected");
                self.unapply(connection)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn unapply(&mut self, connection: Connection) -> Result<(), EngineError> {
        match connection.wiring {
            Wiring::Signal {
                from,
                to,
                port,
                scale_node,
            } => {
                if let Some(scale) = scale_node {
                    self.graph.disconnect_control(scale, to, port);
                    // Dropping the node also drops its input edge
                    let _ = self.graph.remove_node(scale);
                } else {
                    self.graph.disconnect_control(from, to, port);
                }
            }
            Wiring::Gate { listener } => {
                if let PatchSource::Module { slot, .. } = &connection.source {
                    if let Some(seq) = self.sequencers.get_mut(slot) {
                        seq.remove_gate_listener(listener);
                    }
                }
            }
            Wiring::Sync => {
                if let PatchTarget::Sync { slot, .. } = connection.target {
                    let event = self
                        .sequencers
                        .get_mut(&slot)
                        .and_then(|seq| seq.set_sync_connected(false));
                    if let Some(event) = event {
                        self.apply_step_event(slot, event)?;
                    }
                }
            }
        }
        Ok(())
    }

    // -------------------------------------------------------------- params

    /// Ramp a module parameter's base value to `value`.
    pub fn set_param(&mut self, slot_id: u64, param: &str, value: f32) -> Result<(), EngineError> {
        let (node, port) = self.resolve_param(slot_id, param)?;
        self.graph.set_port(node, port, value)
    }

    /// Set a parameter without a ramp (project load).
    pub(crate) fn set_param_immediate(
        &mut self,
        slot_id: u64,
        param: &str,
        value: f32,
    ) -> Result<(), EngineError> {
        let (node, port) = self.resolve_param(slot_id, param)?;
        self.graph.set_port_immediate(node, port, value)
    }

    /// Current ramp target of a module parameter.
    pub fn param_target(&self, slot_id: u64, param: &str) -> Result<f32, EngineError> {
        let (node, port) = self.resolve_param(slot_id, param)?;
        self.graph.port_target(node, port)
    }

    fn resolve_param(
        &self,
        slot_id: u64,
        param: &str,
    ) -> Result<(NodeId, &'static str), EngineError> {
        let module = self
            .find_module(slot_id)
            .ok_or(EngineError::NoSuchSlot(slot_id))?;
        let param_ref = module
            .param(param)
            .ok_or_else(|| EngineError::NoSuchParam(slot_id, param.to_string()))?;
        Ok((param_ref.node, param_ref.port))
    }

    /// Fire a module's trigger input. The kernel consumes it at the start
    /// of the next block. Returns false when the module has no trigger.
    pub fn trigger(&mut self, slot_id: u64) -> Result<bool, EngineError> {
        let module = self
            .find_module(slot_id)
            .ok_or(EngineError::NoSuchSlot(slot_id))?;
        match &module.trigger {
            Some(cell) => {
                cell.store(true, Ordering::Release);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ----------------------------------------------------------- mix state

    pub fn set_row_pan(&mut self, row_id: u64, pan: f32) -> Result<(), EngineError> {
        let row_idx = self.row_index(row_id)?;
        let pan = if pan.is_finite() { pan.clamp(-1.0, 1.0) } else { 0.0 };
        self.rows[row_idx].pan = pan;
        let strip = self.rows[row_idx].strip;
        self.graph.set_port(strip, "pan", pan)
    }

    pub fn set_row_mute(&mut self, row_id: u64, mute: bool) -> Result<(), EngineError> {
        let row_idx = self.row_index(row_id)?;
        self.rows[row_idx].mute = mute;
        self.apply_mix_state();
        Ok(())
    }

    pub fn set_row_solo(&mut self, row_id: u64, solo: bool) -> Result<(), EngineError> {
        let row_idx = self.row_index(row_id)?;
        self.rows[row_idx].solo = solo;
        self.apply_mix_state();
        Ok(())
    }

    /// Push the resolved mute/solo gain of every row to its strip. Any flag
    /// change re-resolves the whole rack, since one solo affects all rows.
    fn apply_mix_state(&mut self) {
        let any_solo = self.rows.iter().any(|r| r.solo);
        let targets: Vec<(NodeId, f32)> = self
            .rows
            .iter()
            .map(|r| (r.strip, effective_gain(r.mute, r.solo, any_solo)))
            .collect();
        for (strip, gain) in targets {
            let _ = self.graph.set_port(strip, "gain", gain);
        }
    }

    /// Resolved gain target currently applied to a row's strip.
    pub fn row_gain_target(&self, row_id: u64) -> Result<f32, EngineError> {
        let row_idx = self.row_index(row_id)?;
        self.graph.port_target(self.rows[row_idx].strip, "gain")
    }

    // ---------------------------------------------------------- sequencers

    pub fn sequencer(&self, slot_id: u64) -> Option<&StepSequencer> {
        self.sequencers.get(&slot_id)
    }

    pub fn set_sequencer_bpm(&mut self, slot_id: u64, bpm: f64) -> Result<(), EngineError> {
        let event = self
            .sequencers
            .get_mut(&slot_id)
            .ok_or(EngineError::NoSuchSlot(slot_id))?
            .set_bpm(bpm);
        self.apply_step_event(slot_id, event)
    }

    pub fn set_step_pitch(
        &mut self,
        slot_id: u64,
        step: usize,
        value: f32,
    ) -> Result<(), EngineError> {
        let held = self
            .sequencers
            .get_mut(&slot_id)
            .ok_or(EngineError::NoSuchSlot(slot_id))?
            .set_pitch(step, value);
        // Editing the held step re-ramps the live output
        if let Some(pitch) = held {
            let event = StepEvent {
                step,
                pitch,
                fired: false,
            };
            self.apply_step_event(slot_id, event)?;
        }
        Ok(())
    }

    pub fn set_step_gate(&mut self, slot_id: u64, step: usize, on: bool) -> Result<(), EngineError> {
        self.sequencers
            .get_mut(&slot_id)
            .ok_or(EngineError::NoSuchSlot(slot_id))?
            .set_gate(step, on);
        Ok(())
    }

    fn apply_step_event(&mut self, slot_id: u64, event: StepEvent) -> Result<(), EngineError> {
        let node = self
            .find_module(slot_id)
            .and_then(|m| m.mod_output("pitch"))
            .map(|o| o.node);
        if let Some(node) = node {
            self.graph.set_port(node, "value", event.pitch)?;
        }
        Ok(())
    }

    // -------------------------------------------------------------- render

    /// Render one block into the master bus.
    pub fn render_block(&mut self) -> Result<(), EngineError> {
        let dt_ms = self.block_size as f64 / self.graph.sample_rate() as f64 * 1000.0;

        // Control pass, in row order so landings are deterministic
        let seq_slots: Vec<u64> = self
            .rows
            .iter()
            .flat_map(|r| r.slots())
            .filter(|s| s.module.has_gate_output)
            .map(|s| s.instance_id)
            .collect();
        let ticks = self.clock.advance(dt_ms);
        for &tick in &ticks {
            for &slot_id in &seq_slots {
                let event = match self.sequencers.get_mut(&slot_id) {
                    Some(seq) if seq.is_sync_connected() => Some(seq.on_master_tick(tick)),
                    _ => None,
                };
                if let Some(event) = event {
                    self.apply_step_event(slot_id, event)?;
                }
            }
        }
        for &slot_id in &seq_slots {
            let events = match self.sequencers.get_mut(&slot_id) {
                Some(seq) => seq.advance(dt_ms),
                None => Vec::new(),
            };
            for event in events {
                self.apply_step_event(slot_id, event)?;
            }
        }

        self.graph.process_block(self.block_size)?;

        self.master.clear(self.block_size);
        for row in &self.rows {
            let signal = self.graph.output(row.strip);
            let pans = self.graph.control_values(row.strip, "pan");
            if let (Some(signal), Some(pans)) = (signal, pans) {
                self.master.mix_row(signal, pans);
            }
        }
        Ok(())
    }

    pub fn master_left(&self) -> &[f32] {
        self.master.left()
    }

    pub fn master_right(&self) -> &[f32] {
        self.master.right()
    }

    /// Offline render of `samples` frames per channel.
    pub fn render(&mut self, samples: usize) -> Result<(Vec<f32>, Vec<f32>), EngineError> {
        let mut left = Vec::with_capacity(samples);
        let mut right = Vec::with_capacity(samples);
        while left.len() < samples {
            self.render_block()?;
            let take = (samples - left.len()).min(self.block_size);
            left.extend_from_slice(&self.master.left()[..take]);
            right.extend_from_slice(&self.master.right()[..take]);
        }
        Ok((left, right))
    }

    /// Last-block output of a module's primary output node, for scopes.
    pub fn tap(&self, slot_id: u64) -> Option<&[f32]> {
        let module = self.find_module(slot_id)?;
        let node = module
            .audio_out
            .or_else(|| module.mod_outputs.first().map(|o| o.node))?;
        self.graph.output(node)
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Engine {
        Engine::new(EngineConfig::default()).unwrap()
    }

    fn rms(buf: &[f32]) -> f32 {
        (buf.iter().map(|x| x * x).sum::<f32>() / buf.len() as f32).sqrt()
    }

    #[test]
    fn test_source_row_produces_audio() {
        let mut engine = engine();
        let (_, _) = engine.add_source_row("pwm", "lead").unwrap();
        let (left, right) = engine.render(4096).unwrap();
        assert!(rms(&left) > 0.01);
        assert!(rms(&right) > 0.01);
    }

    #[test]
    fn test_effect_chain_is_serial() {
        let mut engine = engine();
        let (row, _) = engine.add_source_row("noise", "wash").unwrap();
        let lpf = engine.add_effect(row, "lpf").unwrap();
        engine.set_param(lpf, "frequency", 100.0).unwrap();

        let (bright, _) = {
            let mut open = Engine::new(EngineConfig::default()).unwrap();
            let (r, _) = open.add_source_row("noise", "wash").unwrap();
            let f = open.add_effect(r, "lpf").unwrap();
            open.set_param(f, "frequency", 20_000.0).unwrap();
            // Let the cutoff ramp settle before measuring
            open.render(8192).unwrap();
            open.render(8192).unwrap()
        };
        engine.render(8192).unwrap();
        let (dark, _) = engine.render(8192).unwrap();
        assert!(rms(&dark) < rms(&bright), "closed filter must be quieter");
    }

    #[test]
    fn test_kind_checks_on_add() {
        let mut engine = engine();
        assert!(matches!(
            engine.add_source_row("lpf", "x"),
            Err(EngineError::ModuleKindMismatch(_, "source"))
        ));
        let (row, _) = engine.add_source_row("pwm", "lead").unwrap();
        assert!(matches!(
            engine.add_effect(row, "pwm"),
            Err(EngineError::ModuleKindMismatch(_, "effect"))
        ));
        assert!(matches!(
            engine.add_effect(row, "nope"),
            Err(EngineError::UnknownModuleType(_))
        ));
    }

    #[test]
    fn test_single_writer_eviction() {
        let mut engine = engine();
        let (row, _) = engine.add_source_row("pwm", "lead").unwrap();
        let lpf = engine.add_effect(row, "lpf").unwrap();
        let lfo = engine.add_modulator(row, "lfo").unwrap();
        let seq = engine.add_modulator(row, "seq8").unwrap();

        let target = PatchTarget::Param {
            row,
            slot: lpf,
            param: "frequency".into(),
        };
        assert!(engine
            .connect(
                PatchSource::Module {
                    row,
                    slot: lfo,
                    output: "out".into()
                },
                target.clone()
            )
            .unwrap());
        assert!(engine
            .connect(
                PatchSource::Module {
                    row,
                    slot: seq,
                    output: "pitch".into()
                },
                target.clone()
            )
            .unwrap());

        // Second cable evicted the first
        assert_eq!(engine.connection_count(), 1);
        let survivor = engine.connections().next().unwrap();
        assert!(
            matches!(&survivor.source, PatchSource::Module { slot, .. } if *slot == seq)
        );
    }

    #[test]
    fn test_unpatchable_endpoints_are_silent_noops() {
        let mut engine = engine();
        let (row, pwm) = engine.add_source_row("pwm", "lead").unwrap();

        // pwm has no trigger input
        let patched = engine
            .connect(
                PatchSource::MasterClock,
                PatchTarget::Trigger { row, slot: pwm },
            )
            .unwrap();
        assert!(!patched);

        // pwm has no modulation outputs
        let patched = engine
            .connect(
                PatchSource::Module {
                    row,
                    slot: pwm,
                    output: "out".into(),
                },
                PatchTarget::RowPan { row },
            )
            .unwrap();
        assert!(!patched);
        assert_eq!(engine.connection_count(), 0);
    }

    #[test]
    fn test_scale_stage_inserted_and_removed() {
        let mut engine = engine();
        let (row, _) = engine.add_source_row("pwm", "lead").unwrap();
        let lpf = engine.add_effect(row, "lpf").unwrap();
        let lfo = engine.add_modulator(row, "lfo").unwrap();

        let nodes_before = engine.graph.node_count();
        let target = PatchTarget::Param {
            row,
            slot: lpf,
            param: "frequency".into(),
        };
        engine
            .connect(
                PatchSource::Module {
                    row,
                    slot: lfo,
                    output: "out".into(),
                },
                target.clone(),
            )
            .unwrap();
        // Cutoff scale is 2000, so a scale stage appears
        assert_eq!(engine.graph.node_count(), nodes_before + 1);

        engine.disconnect(&target).unwrap();
        assert_eq!(engine.graph.node_count(), nodes_before);
        assert_eq!(engine.connection_count(), 0);
    }

    #[test]
    fn test_gate_to_trigger_plucks() {
        let mut engine = engine();
        let (row, pluck) = engine.add_source_row("pluck", "string").unwrap();
        let seq = engine.add_modulator(row, "seq8").unwrap();

        assert!(engine
            .connect(
                PatchSource::Module {
                    row,
                    slot: seq,
                    output: "gate".into()
                },
                PatchTarget::Trigger { row, slot: pluck },
            )
            .unwrap());

        // A full free-running step cycle at 120 BPM is 125 ms; render past
        // the first landing so the default gate on step 0 has fired.
        let (left, _) = engine.render(44_100).unwrap();
        assert!(rms(&left) > 0.001, "sequencer gate should pluck the string");
    }

    #[test]
    fn test_sync_follows_master_tick() {
        let mut engine = engine();
        let (row, _) = engine.add_source_row("pwm", "lead").unwrap();
        let seq = engine.add_modulator(row, "seq16").unwrap();

        assert!(engine
            .connect(
                PatchSource::MasterClock,
                PatchTarget::Sync { row, slot: seq },
            )
            .unwrap());
        assert!(engine.sequencer(seq).unwrap().is_sync_connected());

        // 120 BPM -> 125 ms per tick; 1 s of audio crosses 8 ticks
        engine.render(44_100).unwrap();
        assert_eq!(engine.master_tick(), 8);
        assert_eq!(engine.sequencer(seq).unwrap().current_step(), 8);

        // Disconnect restarts the free-running loop from step 0
        engine
            .disconnect(&PatchTarget::Sync { row, slot: seq })
            .unwrap();
        assert!(!engine.sequencer(seq).unwrap().is_sync_connected());
        assert_eq!(engine.sequencer(seq).unwrap().current_step(), 0);
    }

    #[test]
    fn test_tempo_change_resets_master_tick() {
        let mut engine = engine();
        engine.add_source_row("pwm", "lead").unwrap();
        engine.render(44_100).unwrap();
        assert!(engine.master_tick() > 0);
        engine.set_master_bpm(90.0);
        assert_eq!(engine.master_tick(), 0);
    }

    #[test]
    fn test_remove_module_drops_its_cables() {
        let mut engine = engine();
        let (row, _) = engine.add_source_row("pwm", "lead").unwrap();
        let lpf = engine.add_effect(row, "lpf").unwrap();
        let lfo = engine.add_modulator(row, "lfo").unwrap();

        engine
            .connect(
                PatchSource::Module {
                    row,
                    slot: lfo,
                    output: "out".into(),
                },
                PatchTarget::Param {
                    row,
                    slot: lpf,
                    param: "frequency".into(),
                },
            )
            .unwrap();
        assert_eq!(engine.connection_count(), 1);

        engine.remove_module(lfo).unwrap();
        assert_eq!(engine.connection_count(), 0);
        // The row still renders through the remaining filter
        let (left, _) = engine.render(4096).unwrap();
        assert!(rms(&left) > 0.0);
    }

    #[test]
    fn test_removing_source_removes_row() {
        let mut engine = engine();
        let (row, pwm) = engine.add_source_row("pwm", "lead").unwrap();
        engine.add_effect(row, "lpf").unwrap();

        engine.remove_module(pwm).unwrap();
        assert!(engine.row(row).is_none());
        assert_eq!(engine.graph.node_count(), 0);
    }

    #[test]
    fn test_mute_and_solo_resolution() {
        let mut engine = engine();
        let (a, _) = engine.add_source_row("pwm", "a").unwrap();
        let (b, _) = engine.add_source_row("noise", "b").unwrap();
        let (c, _) = engine.add_source_row("pwm", "c").unwrap();

        engine.set_row_mute(a, true).unwrap();
        assert_eq!(engine.row_gain_target(a).unwrap(), 0.0);
        assert_eq!(engine.row_gain_target(b).unwrap(), 1.0);

        // Solo on b silences every other row
        engine.set_row_solo(b, true).unwrap();
        assert_eq!(engine.row_gain_target(a).unwrap(), 0.0);
        assert_eq!(engine.row_gain_target(b).unwrap(), 1.0);
        assert_eq!(engine.row_gain_target(c).unwrap(), 0.0);

        // Muting the soloed row silences it too
        engine.set_row_mute(b, true).unwrap();
        assert_eq!(engine.row_gain_target(b).unwrap(), 0.0);

        engine.set_row_solo(b, false).unwrap();
        assert_eq!(engine.row_gain_target(b).unwrap(), 0.0);
        assert_eq!(engine.row_gain_target(c).unwrap(), 1.0);

        engine.set_row_mute(a, false).unwrap();
        engine.set_row_mute(b, false).unwrap();
        for row in [a, b, c] {
            assert_eq!(engine.row_gain_target(row).unwrap(), 1.0);
        }
    }

    #[test]
    fn test_pan_moves_the_image() {
        let mut engine = engine();
        let (row, _) = engine.add_source_row("noise", "n").unwrap();
        engine.set_row_pan(row, -1.0).unwrap();
        // Render twice so the pan ramp settles
        engine.render(8192).unwrap();
        let (left, right) = engine.render(8192).unwrap();
        assert!(rms(&left) > 0.05);
        assert!(rms(&right) < rms(&left) * 0.05);
    }

    #[test]
    fn test_trigger_without_capability() {
        let mut engine = engine();
        let (_, pwm) = engine.add_source_row("pwm", "lead").unwrap();
        assert!(!engine.trigger(pwm).unwrap());
        assert!(matches!(
            engine.trigger(999),
            Err(EngineError::NoSuchSlot(999))
        ));
    }

    #[test]
    fn test_held_step_edit_reramps_output() {
        let mut engine = engine();
        let (row, _) = engine.add_source_row("pwm", "lead").unwrap();
        let seq = engine.add_modulator(row, "seq8").unwrap();

        // Step 0 is held after creation
        engine.set_step_pitch(seq, 0, 80.0).unwrap();
        let pitch_node = engine
            .find_module(seq)
            .and_then(|m| m.mod_output("pitch"))
            .map(|o| o.node)
            .unwrap();
        assert_eq!(engine.graph.port_target(pitch_node, "value").unwrap(), 0.8);

        // Editing a step that is not held leaves the output alone
        engine.set_step_pitch(seq, 3, 10.0).unwrap();
        assert_eq!(engine.graph.port_target(pitch_node, "value").unwrap(), 0.8);
    }

    #[test]
    fn test_failed_connect_keeps_the_evicted_cable() {
        let mut engine = engine();
        let (row, _) = engine.add_source_row("pwm", "lead").unwrap();
        let a = engine.add_modulator(row, "lfo").unwrap();
        let b = engine.add_modulator(row, "lfo").unwrap();
        let c = engine.add_modulator(row, "lfo").unwrap();

        let out_of = |slot| PatchSource::Module {
            row,
            slot,
            output: "out".into(),
        };
        let rate_of = |slot| PatchTarget::Param {
            row,
            slot,
            param: "rate".into(),
        };

        assert!(engine.connect(out_of(a), rate_of(b)).unwrap());
        assert!(engine.connect(out_of(b), rate_of(c)).unwrap());
        let nodes_before = engine.graph.node_count();

        // c -> b.rate would close a loop through the standing b -> c.rate
        // cable; the graph rejects it and the a -> b.rate cable survives
        assert!(matches!(
            engine.connect(out_of(c), rate_of(b)),
            Err(EngineError::GraphCycle)
        ));
        assert_eq!(engine.connection_count(), 2);
        assert_eq!(engine.graph.node_count(), nodes_before);
        let writer_idx = engine.connections.find_target(&rate_of(b)).unwrap();
        let writer = engine.connections().nth(writer_idx).unwrap();
        assert!(matches!(&writer.source, PatchSource::Module { slot, .. } if *slot == a));
    }

    #[test]
    fn test_chain_reorder_rewires_and_keeps_cables() {
        let mut engine = engine();
        let (row, _) = engine.add_source_row("noise", "wash").unwrap();
        let lpf = engine.add_effect(row, "lpf").unwrap();
        let hpf = engine.add_effect(row, "hpf").unwrap();
        let lfo = engine.add_modulator(row, "lfo").unwrap();
        engine
            .connect(
                PatchSource::Module {
                    row,
                    slot: lfo,
                    output: "out".into(),
                },
                PatchTarget::Param {
                    row,
                    slot: lpf,
                    param: "frequency".into(),
                },
            )
            .unwrap();

        engine.move_in_chain(hpf, 0).unwrap();
        let order: Vec<u64> = engine
            .row(row)
            .unwrap()
            .chain
            .iter()
            .map(|s| s.instance_id)
            .collect();
        assert_eq!(order, vec![hpf, lpf, lfo]);
        // source -> hpf -> lpf -> strip
        assert_eq!(engine.row(row).unwrap().wired.len(), 3);

        // The cable addresses the filter by id, so it rides along
        assert_eq!(engine.connection_count(), 1);
        engine.set_param(lpf, "frequency", 250.0).unwrap();
        assert_eq!(engine.param_target(lpf, "frequency").unwrap(), 250.0);
        let (left, _) = engine.render(4096).unwrap();
        assert!(rms(&left) > 0.0);

        // Positions past the end clamp; sources cannot be moved
        engine.move_in_chain(lpf, 99).unwrap();
        let order: Vec<u64> = engine
            .row(row)
            .unwrap()
            .chain
            .iter()
            .map(|s| s.instance_id)
            .collect();
        assert_eq!(order, vec![hpf, lfo, lpf]);
        let source = engine.row(row).unwrap().source.as_ref().unwrap().instance_id;
        assert!(matches!(
            engine.move_in_chain(source, 0),
            Err(EngineError::NoSuchSlot(_))
        ));
    }

    #[test]
    fn test_row_rename() {
        let mut engine = engine();
        let (row, _) = engine.add_source_row("pwm", "lead").unwrap();
        engine.set_row_name(row, "bass").unwrap();
        assert_eq!(engine.row(row).unwrap().name, "bass");
        assert!(matches!(
            engine.set_row_name(99, "x"),
            Err(EngineError::NoSuchRow(99))
        ));
    }
}
