//! Project persistence
//!
//! Versioned JSON snapshot of the whole session: master tempo, rows with
//! their module types, parameter base values and sequencer patterns, and
//! every patch cable. Live ids are not persisted; the format addresses
//! slots positionally via [`SlotIndex`], with row -1 / slot -1 reserved for
//! the master clock endpoint.
//!
//! Loading validates the snapshot against the module registry before
//! touching the rack, so a bad file leaves the current session intact.

use crate::engine::Engine;
use crate::error::EngineError;
use crate::module::ModuleKind;
use crate::patch::{PatchSource, PatchTarget};
use crate::rack::SlotIndex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

pub const PROJECT_VERSION: u32 = 1;

/// Sentinel for the master clock endpoint in persisted connections.
const MASTER_INDEX: i32 = -1;

#[derive(Debug, Serialize, Deserialize)]
pub struct ProjectData {
    pub version: u32,
    pub master_bpm: f64,
    pub rows: Vec<RowData>,
    pub connections: Vec<ConnectionData>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RowData {
    pub name: String,
    pub pan: f32,
    pub mute: bool,
    pub solo: bool,
    pub source: SlotData,
    pub chain: Vec<SlotData>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SlotData {
    pub type_id: String,
    pub params: Vec<ParamData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequencer: Option<SequencerData>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ParamData {
    pub id: String,
    pub value: f32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SequencerData {
    pub bpm: f64,
    pub pitch: Vec<f32>,
    pub gate: Vec<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ConnectionData {
    pub from_row: i32,
    pub from_slot: i32,
    pub from_output: String,
    pub to_row: i32,
    pub to_slot: i32,
    pub to_param: String,
}

impl ProjectData {
    pub fn to_json(&self) -> Result<String, EngineError> {
        serde_json::to_string_pretty(self)
            .map_err(|e| EngineError::InvalidProject(e.to_string()))
    }

    pub fn from_json(json: &str) -> Result<Self, EngineError> {
        serde_json::from_str(json).map_err(|e| EngineError::InvalidProject(e.to_string()))
    }
}

impl Engine {
    /// Snapshot the whole session into its persisted form.
    pub fn snapshot(&self) -> ProjectData {
        let rows = self
            .rows()
            .iter()
            .map(|row| RowData {
                name: row.name.clone(),
                pan: row.pan,
                mute: row.mute,
                solo: row.solo,
                source: row
                    .source
                    .as_ref()
                    .map(|slot| self.snapshot_slot(slot.instance_id))
                    .unwrap_or_else(|| SlotData {
                        type_id: String::new(),
                        params: Vec::new(),
                        sequencer: None,
                    }),
                chain: row
                    .chain
                    .iter()
                    .map(|slot| self.snapshot_slot(slot.instance_id))
                    .collect(),
            })
            .collect();

        let connections = self
            .connections()
            .filter_map(|c| self.snapshot_connection(&c.source, &c.target))
            .collect();

        ProjectData {
            version: PROJECT_VERSION,
            master_bpm: self.master_bpm(),
            rows,
            connections,
        }
    }

    fn snapshot_slot(&self, slot_id: u64) -> SlotData {
        let module = self
            .rows()
            .iter()
            .find_map(|r| r.slot(slot_id))
            .map(|s| &s.module);
        let Some(module) = module else {
            return SlotData {
                type_id: String::new(),
                params: Vec::new(),
                sequencer: None,
            };
        };
        let params = module
            .params
            .iter()
            .filter_map(|p| {
                self.param_target(slot_id, p.id).ok().map(|value| ParamData {
                    id: p.id.to_string(),
                    value,
                })
            })
            .collect();
        let sequencer = self.sequencer(slot_id).map(|seq| SequencerData {
            bpm: seq.bpm(),
            pitch: seq.pitches().to_vec(),
            gate: seq.gates().to_vec(),
        });
        SlotData {
            type_id: module.type_id.to_string(),
            params,
            sequencer,
        }
    }

    fn endpoint_indices(&self, row_id: u64, slot_id: u64) -> Option<(i32, i32)> {
        let row_pos = self.rows().iter().position(|r| r.id == row_id)?;
        let index = self.row(row_id)?.slot_index(slot_id)?;
        Some((row_pos as i32, index.to_i32()))
    }

    fn snapshot_connection(
        &self,
        source: &PatchSource,
        target: &PatchTarget,
    ) -> Option<ConnectionData> {
        let (from_row, from_slot, from_output) = match source {
            PatchSource::Module { row, slot, output } => {
                let (r, s) = self.endpoint_indices(*row, *slot)?;
                (r, s, output.clone())
            }
            PatchSource::MasterClock => (MASTER_INDEX, MASTER_INDEX, "tick".to_string()),
        };
        let (to_row, to_slot, to_param) = match target {
            PatchTarget::Param { row, slot, param } => {
                let (r, s) = self.endpoint_indices(*row, *slot)?;
                (r, s, param.clone())
            }
            PatchTarget::RowPan { row } => {
                let r = self.rows().iter().position(|r| r.id == *row)? as i32;
                (r, SlotIndex::Pan.to_i32(), "pan".to_string())
            }
            PatchTarget::Trigger { row, slot } => {
                let (r, s) = self.endpoint_indices(*row, *slot)?;
                (r, s, "trigger".to_string())
            }
            PatchTarget::Sync { row, slot } => {
                let (r, s) = self.endpoint_indices(*row, *slot)?;
                (r, s, "sync".to_string())
            }
        };
        Some(ConnectionData {
            from_row,
            from_slot,
            from_output,
            to_row,
            to_slot,
            to_param,
        })
    }

    /// Replace the session with a snapshot. The snapshot is validated in
    /// full first; on any error the current rack is left untouched.
    pub fn load_snapshot(&mut self, data: &ProjectData) -> Result<(), EngineError> {
        self.validate_snapshot(data)?;

        self.clear_rack()?;
        self.set_master_bpm(data.master_bpm);

        // Rebuild rows, remembering live ids per persisted position
        let mut slot_ids: Vec<Vec<u64>> = Vec::with_capacity(data.rows.len());
        let mut row_ids: Vec<u64> = Vec::with_capacity(data.rows.len());
        for row_data in &data.rows {
            let (row_id, source_id) =
                self.add_source_row(&row_data.source.type_id, &row_data.name)?;
            let mut ids = vec![source_id];
            self.apply_slot_data(source_id, &row_data.source)?;
            for slot_data in &row_data.chain {
                let slot_id = match self.registry().kind_of(&slot_data.type_id) {
                    Some(ModuleKind::Effect) => self.add_effect(row_id, &slot_data.type_id)?,
                    _ => self.add_modulator(row_id, &slot_data.type_id)?,
                };
                self.apply_slot_data(slot_id, slot_data)?;
                ids.push(slot_id);
            }
            self.set_row_pan(row_id, row_data.pan)?;
            self.set_row_mute(row_id, row_data.mute)?;
            self.set_row_solo(row_id, row_data.solo)?;
            row_ids.push(row_id);
            slot_ids.push(ids);
        }

        for c in &data.connections {
            let source = if c.from_row == MASTER_INDEX {
                PatchSource::MasterClock
            } else {
                let row = row_ids[c.from_row as usize];
                let slot = slot_ids[c.from_row as usize][c.from_slot as usize];
                PatchSource::Module {
                    row,
                    slot,
                    output: c.from_output.clone(),
                }
            };
            let row = row_ids[c.to_row as usize];
            let target = if c.to_slot == SlotIndex::Pan.to_i32() {
                PatchTarget::RowPan { row }
            } else {
                let slot = slot_ids[c.to_row as usize][c.to_slot as usize];
                match c.to_param.as_str() {
                    "trigger" => PatchTarget::Trigger { row, slot },
                    "sync" => PatchTarget::Sync { row, slot },
                    _ => PatchTarget::Param {
                        row,
                        slot,
                        param: c.to_param.clone(),
                    },
                }
            };
            // Capability mismatches degrade to the usual silent no-op
            self.connect(source, target)?;
        }

        info!(rows = data.rows.len(), "project: snapshot loaded");
        Ok(())
    }

    fn apply_slot_data(&mut self, slot_id: u64, data: &SlotData) -> Result<(), EngineError> {
        for param in &data.params {
            match self.set_param_immediate(slot_id, &param.id, param.value) {
                Ok(()) => {}
                Err(EngineError::NoSuchParam(_, _)) => {
                    debug!(slot = slot_id, param = %param.id, "project: unknown param, skipped");
                }
                Err(e) => return Err(e),
            }
        }
        if let Some(seq_data) = &data.sequencer {
            if self.sequencer(slot_id).is_some() {
                self.set_sequencer_bpm(slot_id, seq_data.bpm)?;
                for (step, &pitch) in seq_data.pitch.iter().enumerate() {
                    self.set_step_pitch(slot_id, step, pitch)?;
                }
                for (step, &gate) in seq_data.gate.iter().enumerate() {
                    self.set_step_gate(slot_id, step, gate)?;
                }
            }
        }
        Ok(())
    }

    fn validate_snapshot(&self, data: &ProjectData) -> Result<(), EngineError> {
        if data.version != PROJECT_VERSION {
            return Err(EngineError::InvalidProject(format!(
                "unsupported version {}",
                data.version
            )));
        }
        for (i, row) in data.rows.iter().enumerate() {
            match self.registry().kind_of(&row.source.type_id) {
                Some(ModuleKind::Source) => {}
                _ => {
                    return Err(EngineError::InvalidProject(format!(
                        "row {}: '{}' is not a source module",
                        i, row.source.type_id
                    )))
                }
            }
            for slot in &row.chain {
                match self.registry().kind_of(&slot.type_id) {
                    Some(ModuleKind::Effect) | Some(ModuleKind::Modulator) => {}
                    _ => {
                        return Err(EngineError::InvalidProject(format!(
                            "row {}: unknown chain module '{}'",
                            i, slot.type_id
                        )))
                    }
                }
            }
        }
        let valid_endpoint = |row: i32, slot: i32, is_target: bool| -> bool {
            if row == MASTER_INDEX {
                return !is_target && slot == MASTER_INDEX;
            }
            let Some(row_data) = data.rows.get(row as usize) else {
                return false;
            };
            match SlotIndex::from_i32(slot) {
                Some(SlotIndex::Source) => true,
                Some(SlotIndex::Chain(i)) => i < row_data.chain.len(),
                Some(SlotIndex::Pan) => is_target,
                None => false,
            }
        };
        for (i, c) in data.connections.iter().enumerate() {
            if !valid_endpoint(c.from_row, c.from_slot, false)
                || !valid_endpoint(c.to_row, c.to_slot, true)
            {
                return Err(EngineError::InvalidProject(format!(
                    "connection {}: endpoint out of range",
                    i
                )));
            }
        }
        Ok(())
    }

    pub fn save_project(&self, path: &Path) -> Result<(), EngineError> {
        let json = self.snapshot().to_json()?;
        fs::write(path, json)?;
        info!(path = %path.display(), "project: saved");
        Ok(())
    }

    pub fn load_project(&mut self, path: &Path) -> Result<(), EngineError> {
        let json = fs::read_to_string(path)?;
        let data = ProjectData::from_json(&json)?;
        self.load_snapshot(&data)?;
        info!(path = %path.display(), "project: loaded");
        Ok(())
    }
}
