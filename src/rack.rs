//! Rack rows and slots
//!
//! A row is one horizontal strip of the rack: an optional source module, a
//! left-to-right processing chain, and a channel strip (gain/pan) feeding
//! the master bus. Rows and slots carry stable ids that survive edits, so
//! patch cables keep pointing at the right module while the rack changes
//! around them. The persisted form addresses slots positionally instead;
//! [`SlotIndex`] is the bridge between the two schemes.

use crate::audio_node::NodeId;
use crate::module::ModuleInstance;

/// Positional slot address used by the persisted project format.
///
/// `Source` is slot 0, chain position `i` is slot `i + 1`, and the row's
/// pan destination is the sentinel slot -1. The master clock is addressed
/// as row -1, slot -1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotIndex {
    Source,
    Chain(usize),
    Pan,
}

impl SlotIndex {
    pub fn to_i32(self) -> i32 {
        match self {
            SlotIndex::Source => 0,
            SlotIndex::Chain(i) => i as i32 + 1,
            SlotIndex::Pan => -1,
        }
    }

    pub fn from_i32(index: i32) -> Option<Self> {
        match index {
            -1 => Some(SlotIndex::Pan),
            0 => Some(SlotIndex::Source),
            i if i > 0 => Some(SlotIndex::Chain(i as usize - 1)),
            _ => None,
        }
    }
}

/// One occupied position in a row.
pub struct Slot {
    pub instance_id: u64,
    pub module: ModuleInstance,
}

pub struct Row {
    pub id: u64,
    pub name: String,
    pub pan: f32,
    pub mute: bool,
    pub solo: bool,
    pub source: Option<Slot>,
    pub chain: Vec<Slot>,
    /// Channel strip node summing the row into the master bus
    pub strip: NodeId,
    /// Audio edges currently wired along the row's signal path
    pub wired: Vec<(NodeId, NodeId)>,
}

impl Row {
    pub fn new(id: u64, name: String, strip: NodeId) -> Self {
        Self {
            id,
            name,
            pan: 0.0,
            mute: false,
            solo: false,
            source: None,
            chain: Vec::new(),
            strip,
            wired: Vec::new(),
        }
    }

    /// All occupied slots, source first then the chain left to right.
    pub fn slots(&self) -> impl Iterator<Item = &Slot> {
        self.source.iter().chain(self.chain.iter())
    }

    pub fn slot(&self, instance_id: u64) -> Option<&Slot> {
        self.slots().find(|s| s.instance_id == instance_id)
    }

    pub fn slot_mut(&mut self, instance_id: u64) -> Option<&mut Slot> {
        self.source
            .iter_mut()
            .chain(self.chain.iter_mut())
            .find(|s| s.instance_id == instance_id)
    }

    pub fn contains_slot(&self, instance_id: u64) -> bool {
        self.slot(instance_id).is_some()
    }

    pub fn slot_index(&self, instance_id: u64) -> Option<SlotIndex> {
        if let Some(source) = &self.source {
            if source.instance_id == instance_id {
                return Some(SlotIndex::Source);
            }
        }
        self.chain
            .iter()
            .position(|s| s.instance_id == instance_id)
            .map(SlotIndex::Chain)
    }

    pub fn slot_at(&self, index: SlotIndex) -> Option<&Slot> {
        match index {
            SlotIndex::Source => self.source.as_ref(),
            SlotIndex::Chain(i) => self.chain.get(i),
            SlotIndex::Pan => None,
        }
    }
}
