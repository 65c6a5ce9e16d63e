//! Dynamic audio graph
//!
//! Holds the processing nodes and two kinds of edges:
//! - **audio edges** feed a node's audio input; multiple edges into the same
//!   input are summed;
//! - **control edges** feed a named control port on top of the port's
//!   smoothed base value (also summed, matching patch-cable semantics).
//!
//! Topology can change at any time between blocks: nodes are stored in a
//! free-list slab and the execution order is a cached topological sort,
//! recomputed after mutations. Edges that would create a cycle are rejected
//! at connect time, so the render path itself cannot fail on ordering.
//!
//! Every node's output buffer persists after a block as a visualization tap,
//! and the per-port control buffers stay readable (the row mixer uses the
//! pan port this way).

use crate::audio_node::{AudioNode, NodeId};
use crate::error::EngineError;
use std::collections::VecDeque;
use tracing::debug;

/// Time constant for parameter smoothing ramps, in seconds.
///
/// Every base-value change approaches its target exponentially with this
/// constant instead of jumping, to avoid audible clicks.
pub const SMOOTHING_TAU: f32 = 0.01;

struct PortState {
    target: f32,
    current: f32,
}

struct NodeSlot {
    node: Box<dyn AudioNode>,
    ports: Vec<PortState>,
    /// Resolved per-sample control values from the last block, per port
    port_values: Vec<Vec<f32>>,
    /// Output of the last processed block (visualization tap)
    output: Vec<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ControlEdge {
    from: NodeId,
    to: NodeId,
    port: usize,
}

/// Directed processing graph over [`AudioNode`] boxes.
pub struct AudioGraph {
    nodes: Vec<Option<NodeSlot>>,
    free: Vec<NodeId>,
    audio_edges: Vec<(NodeId, NodeId)>,
    control_edges: Vec<ControlEdge>,
    order: Vec<NodeId>,
    order_dirty: bool,
    sample_rate: f32,
    exec: Vec<NodeId>,
    in_scratch: Vec<f32>,
    mod_scratch: Vec<Vec<f32>>,
}

impl AudioGraph {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            audio_edges: Vec::new(),
            control_edges: Vec::new(),
            order: Vec::new(),
            order_dirty: false,
            sample_rate,
            exec: Vec::new(),
            in_scratch: Vec::new(),
            mod_scratch: Vec::new(),
        }
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Add a node, reusing a vacant slab entry if one exists.
    ///
    /// Control ports start at their declared defaults with no ramp pending.
    pub fn add_node(&mut self, node: Box<dyn AudioNode>) -> NodeId {
        let ports = node
            .ports()
            .iter()
            .map(|spec| PortState {
                target: spec.default,
                current: spec.default,
            })
            .collect::<Vec<_>>();
        let n_ports = ports.len();
        let slot = NodeSlot {
            node,
            ports,
            port_values: (0..n_ports).map(|_| Vec::new()).collect(),
            output: Vec::new(),
        };
        let id = match self.free.pop() {
            Some(id) => {
                self.nodes[id] = Some(slot);
                id
            }
            None => {
                self.nodes.push(Some(slot));
                self.nodes.len() - 1
            }
        };
        self.order_dirty = true;
        debug!(id, name = self.node_name(id), "graph: add node");
        id
    }

    /// Remove a node and every edge touching it.
    pub fn remove_node(&mut self, id: NodeId) -> Result<(), EngineError> {
        let slot = self
            .nodes
            .get_mut(id)
            .and_then(|s| s.take())
            .ok_or(EngineError::NoSuchNode(id))?;
        debug!(id, name = slot.node.name(), "graph: remove node");
        self.audio_edges.retain(|&(f, t)| f != id && t != id);
        self.control_edges.retain(|e| e.from != id && e.to != id);
        self.free.push(id);
        self.order_dirty = true;
        Ok(())
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.get(id).map(|s| s.is_some()).unwrap_or(false)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|s| s.is_some()).count()
    }

    pub fn node_name(&self, id: NodeId) -> &str {
        self.nodes
            .get(id)
            .and_then(|s| s.as_ref())
            .map(|s| s.node.name())
            .unwrap_or("<vacant>")
    }

    fn check_node(&self, id: NodeId) -> Result<(), EngineError> {
        if self.contains(id) {
            Ok(())
        } else {
            Err(EngineError::NoSuchNode(id))
        }
    }

    fn port_index(&self, id: NodeId, port: &str) -> Result<usize, EngineError> {
        let slot = self
            .nodes
            .get(id)
            .and_then(|s| s.as_ref())
            .ok_or(EngineError::NoSuchNode(id))?;
        slot.node
            .ports()
            .iter()
            .position(|spec| spec.name == port)
            .ok_or_else(|| EngineError::NoSuchPort(id, port.to_string()))
    }

    /// Wire `from`'s output into `to`'s audio input.
    ///
    /// Rejected with [`EngineError::GraphCycle`] if the edge would make the
    /// graph cyclic; the graph is left unchanged in that case.
    pub fn connect_audio(&mut self, from: NodeId, to: NodeId) -> Result<(), EngineError> {
        self.check_node(from)?;
        self.check_node(to)?;
        if self.audio_edges.contains(&(from, to)) {
            return Ok(());
        }
        self.audio_edges.push((from, to));
        if let Err(e) = self.topo_order() {
            self.audio_edges.pop();
            return Err(e);
        }
        self.order_dirty = true;
        debug!(from, to, "graph: connect audio");
        Ok(())
    }

    pub fn disconnect_audio(&mut self, from: NodeId, to: NodeId) {
        let before = self.audio_edges.len();
        self.audio_edges.retain(|&e| e != (from, to));
        if self.audio_edges.len() != before {
            self.order_dirty = true;
            debug!(from, to, "graph: disconnect audio");
        }
    }

    /// Wire `from`'s output onto `to`'s named control port.
    pub fn connect_control(
        &mut self,
        from: NodeId,
        to: NodeId,
        port: &str,
    ) -> Result<(), EngineError> {
        self.check_node(from)?;
        let port_idx = self.port_index(to, port)?;
        let edge = ControlEdge {
            from,
            to,
            port: port_idx,
        };
        if self.control_edges.contains(&edge) {
            return Ok(());
        }
        self.control_edges.push(edge);
        if let Err(e) = self.topo_order() {
            self.control_edges.pop();
            return Err(e);
        }
        self.order_dirty = true;
        debug!(from, to, port, "graph: connect control");
        Ok(())
    }

    pub fn disconnect_control(&mut self, from: NodeId, to: NodeId, port: &str) {
        if let Ok(port_idx) = self.port_index(to, port) {
            let edge = ControlEdge {
                from,
                to,
                port: port_idx,
            };
            let before = self.control_edges.len();
            self.control_edges.retain(|&e| e != edge);
            if self.control_edges.len() != before {
                self.order_dirty = true;
                debug!(from, to, port, "graph: disconnect control");
            }
        }
    }

    pub fn audio_edge_count(&self) -> usize {
        self.audio_edges.len()
    }

    pub fn control_edge_count(&self) -> usize {
        self.control_edges.len()
    }

    /// Schedule a ramp of the port's base value toward `value`.
    pub fn set_port(&mut self, id: NodeId, port: &str, value: f32) -> Result<(), EngineError> {
        let port_idx = self.port_index(id, port)?;
        if let Some(slot) = self.nodes.get_mut(id).and_then(|s| s.as_mut()) {
            slot.ports[port_idx].target = value;
        }
        Ok(())
    }

    /// Set a port's base value without a ramp (initialization, project load).
    pub fn set_port_immediate(
        &mut self,
        id: NodeId,
        port: &str,
        value: f32,
    ) -> Result<(), EngineError> {
        let port_idx = self.port_index(id, port)?;
        if let Some(slot) = self.nodes.get_mut(id).and_then(|s| s.as_mut()) {
            slot.ports[port_idx].target = value;
            slot.ports[port_idx].current = value;
        }
        Ok(())
    }

    /// Current ramp target of a port's base value.
    pub fn port_target(&self, id: NodeId, port: &str) -> Result<f32, EngineError> {
        let port_idx = self.port_index(id, port)?;
        let slot = self
            .nodes
            .get(id)
            .and_then(|s| s.as_ref())
            .ok_or(EngineError::NoSuchNode(id))?;
        Ok(slot.ports[port_idx].target)
    }

    /// Output buffer of the last rendered block (visualization tap).
    pub fn output(&self, id: NodeId) -> Option<&[f32]> {
        self.nodes
            .get(id)
            .and_then(|s| s.as_ref())
            .map(|s| s.output.as_slice())
    }

    /// Resolved per-sample control values of a port from the last block.
    pub fn control_values(&self, id: NodeId, port: &str) -> Option<&[f32]> {
        let port_idx = self.port_index(id, port).ok()?;
        self.nodes
            .get(id)
            .and_then(|s| s.as_ref())
            .and_then(|s| s.port_values.get(port_idx))
            .map(|v| v.as_slice())
    }

    /// Kahn's algorithm over live nodes, both edge kinds combined.
    fn topo_order(&self) -> Result<Vec<NodeId>, EngineError> {
        let n = self.nodes.len();
        let mut live_count = 0usize;
        let mut indegree = vec![0usize; n];
        for &(f, t) in &self.audio_edges {
            debug_assert!(self.contains(f) && self.contains(t));
            indegree[t] += 1;
        }
        for e in &self.control_edges {
            indegree[e.to] += 1;
        }

        let mut queue = VecDeque::new();
        for id in 0..n {
            if self.nodes[id].is_some() {
                live_count += 1;
                if indegree[id] == 0 {
                    queue.push_back(id);
                }
            }
        }

        let mut order = Vec::with_capacity(live_count);
        while let Some(id) = queue.pop_front() {
            order.push(id);
            for &(f, t) in &self.audio_edges {
                if f == id {
                    indegree[t] -= 1;
                    if indegree[t] == 0 {
                        queue.push_back(t);
                    }
                }
            }
            for e in &self.control_edges {
                if e.from == id {
                    indegree[e.to] -= 1;
                    if indegree[e.to] == 0 {
                        queue.push_back(e.to);
                    }
                }
            }
        }

        if order.len() != live_count {
            return Err(EngineError::GraphCycle);
        }
        Ok(order)
    }

    /// Process one block through every node in dependency order.
    pub fn process_block(&mut self, block_size: usize) -> Result<(), EngineError> {
        if self.order_dirty {
            self.order = self.topo_order()?;
            self.order_dirty = false;
        }
        self.exec.clear();
        self.exec.extend_from_slice(&self.order);
        let coeff = 1.0 - (-1.0 / (SMOOTHING_TAU * self.sample_rate)).exp();

        for idx in 0..self.exec.len() {
            let id = self.exec[idx];
            let Self {
                nodes,
                audio_edges,
                control_edges,
                in_scratch,
                mod_scratch,
                sample_rate,
                ..
            } = self;

            let (has_audio, n_ports) = match nodes.get(id).and_then(|s| s.as_ref()) {
                Some(slot) => (slot.node.has_audio_input(), slot.ports.len()),
                None => continue,
            };

            // Sum upstream audio into the input scratch buffer
            in_scratch.clear();
            in_scratch.resize(block_size, 0.0);
            if has_audio {
                for &(from, to) in audio_edges.iter() {
                    if to != id {
                        continue;
                    }
                    if let Some(src) = nodes.get(from).and_then(|s| s.as_ref()) {
                        for (acc, &s) in in_scratch.iter_mut().zip(src.output.iter()) {
                            *acc += s;
                        }
                    }
                }
            }

            // Sum patched modulation per port
            if mod_scratch.len() < n_ports {
                mod_scratch.resize_with(n_ports, Vec::new);
            }
            for (p, buf) in mod_scratch.iter_mut().enumerate().take(n_ports) {
                buf.clear();
                buf.resize(block_size, 0.0);
                for e in control_edges.iter() {
                    if e.to != id || e.port != p {
                        continue;
                    }
                    if let Some(src) = nodes.get(e.from).and_then(|s| s.as_ref()) {
                        for (acc, &s) in buf.iter_mut().zip(src.output.iter()) {
                            *acc += s;
                        }
                    }
                }
            }

            let Some(slot) = nodes.get_mut(id).and_then(|s| s.as_mut()) else {
                continue;
            };
            let NodeSlot {
                node,
                ports,
                port_values,
                output,
            } = slot;

            // Resolve each port: smoothed base ramp plus summed modulation
            for (p, state) in ports.iter_mut().enumerate() {
                let vals = &mut port_values[p];
                vals.clear();
                vals.resize(block_size, 0.0);
                let modulation = &mod_scratch[p];
                for (v, &m) in vals.iter_mut().zip(modulation.iter()) {
                    state.current += (state.target - state.current) * coeff;
                    *v = state.current + m;
                }
            }

            output.clear();
            output.resize(block_size, 0.0);
            let mut inputs: Vec<&[f32]> = Vec::with_capacity(1 + n_ports);
            if node.has_audio_input() {
                inputs.push(in_scratch.as_slice());
            }
            for vals in port_values.iter() {
                inputs.push(vals.as_slice());
            }
            node.process_block(&inputs, output, *sample_rate);
        }
        Ok(())
    }
}
