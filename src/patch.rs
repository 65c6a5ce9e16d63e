//! Patch cables
//!
//! Data model for the connection manager: typed source and target
//! endpoints addressed by stable row/slot ids, plus the wiring record
//! each live cable keeps so it can be torn down exactly. The set enforces
//! the single-writer rule at the data level: at most one connection per
//! target, looked up before anything touches the graph.

use crate::audio_node::NodeId;

/// Where a cable starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchSource {
    /// Named modulation or gate output of a module
    Module { row: u64, slot: u64, output: String },
    /// The session master clock (sync connections only)
    MasterClock,
}

/// Where a cable ends. Each target accepts at most one writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchTarget {
    /// A modulatable parameter on a module
    Param { row: u64, slot: u64, param: String },
    /// A row's pan position
    RowPan { row: u64 },
    /// A module's trigger input (pluck, envelope)
    Trigger { row: u64, slot: u64 },
    /// A sequencer's sync input
    Sync { row: u64, slot: u64 },
}

impl PatchTarget {
    /// The slot the target lives on, when it is slot-addressed.
    pub fn slot(&self) -> Option<u64> {
        match self {
            PatchTarget::Param { slot, .. }
            | PatchTarget::Trigger { slot, .. }
            | PatchTarget::Sync { slot, .. } => Some(*slot),
            PatchTarget::RowPan { .. } => None,
        }
    }

    pub fn row(&self) -> u64 {
        match self {
            PatchTarget::Param { row, .. }
            | PatchTarget::RowPan { row }
            | PatchTarget::Trigger { row, .. }
            | PatchTarget::Sync { row, .. } => *row,
        }
    }
}

/// Graph-side residue of an applied connection, kept for teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Wiring {
    /// Control edge into a port, optionally through an inserted scale stage
    Signal {
        from: NodeId,
        to: NodeId,
        port: &'static str,
        scale_node: Option<NodeId>,
    },
    /// Gate listener registered on the source sequencer
    Gate { listener: u64 },
    /// Sync mode flag on the target sequencer
    Sync,
}

pub struct Connection {
    pub source: PatchSource,
    pub target: PatchTarget,
    pub wiring: Wiring,
}

/// All live cables, in creation order.
#[derive(Default)]
pub struct ConnectionSet {
    connections: Vec<Connection>,
}

impl ConnectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn push(&mut self, connection: Connection) {
        debug_assert!(
            self.find_target(&connection.target).is_none(),
            "target already has a writer"
        );
        self.connections.push(connection);
    }

    /// Index of the connection currently writing to `target`, if any.
    pub fn find_target(&self, target: &PatchTarget) -> Option<usize> {
        self.connections.iter().position(|c| c.target == *target)
    }

    pub fn remove(&mut self, index: usize) -> Connection {
        self.connections.remove(index)
    }

    /// Indices of every connection touching `slot` on either end,
    /// descending so they can be removed in order.
    pub fn indices_for_slot(&self, slot: u64) -> Vec<usize> {
        let mut indices: Vec<usize> = self
            .connections
            .iter()
            .enumerate()
            .filter(|(_, c)| {
                let source_hit = matches!(&c.source, PatchSource::Module { slot: s, .. } if *s == slot);
                source_hit || c.target.slot() == Some(slot)
            })
            .map(|(i, _)| i)
            .collect();
        indices.reverse();
        indices
    }

    /// Indices of every connection targeting a row-level destination of
    /// `row` (pan), descending.
    pub fn indices_for_row_targets(&self, row: u64) -> Vec<usize> {
        let mut indices: Vec<usize> = self
            .connections
            .iter()
            .enumerate()
            .filter(|(_, c)| matches!(&c.target, PatchTarget::RowPan { row: r } if *r == row))
            .map(|(i, _)| i)
            .collect();
        indices.reverse();
        indices
    }
}
