//! Module capability model
//!
//! A module is a small bundle of graph nodes behind a capability record:
//! instead of probing an instance for methods at call time, a builder
//! declares up front which capabilities the module has: an audio input, an
//! audio output, modulatable params, named modulation outputs, a trigger, a
//! gate output. The routing layers only act on capabilities that are
//! present; anything else is a no-op by construction.

use crate::audio_node::NodeId;
use crate::error::EngineError;
use crate::graph::AudioGraph;
use crate::sequencer::StepSequencer;
use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    Source,
    Effect,
    Modulator,
}

/// A modulatable parameter: a named control port on one of the module's
/// nodes, plus the scale factor the connection manager applies when a
/// [-1,1] / [0,1] modulation signal is patched in.
#[derive(Debug, Clone)]
pub struct ParamRef {
    pub id: &'static str,
    pub node: NodeId,
    pub port: &'static str,
    pub modulation_scale: f32,
}

impl ParamRef {
    pub fn new(id: &'static str, node: NodeId, port: &'static str) -> Self {
        Self {
            id,
            node,
            port,
            modulation_scale: 1.0,
        }
    }

    pub fn scaled(id: &'static str, node: NodeId, port: &'static str, scale: f32) -> Self {
        Self {
            id,
            node,
            port,
            modulation_scale: scale,
        }
    }
}

/// A named modulation output backed by a graph node.
#[derive(Debug, Clone)]
pub struct ModOutput {
    pub id: &'static str,
    pub node: NodeId,
}

/// Capability record for one built module.
pub struct ModuleInstance {
    pub type_id: &'static str,
    pub kind: ModuleKind,
    pub audio_in: Option<NodeId>,
    pub audio_out: Option<NodeId>,
    pub params: Vec<ParamRef>,
    pub mod_outputs: Vec<ModOutput>,
    /// Trigger cell shared with a kernel (pluck, envelope)
    pub trigger: Option<Arc<AtomicBool>>,
    /// Whether the module emits gate edges (sequencers)
    pub has_gate_output: bool,
    /// Every graph node the module owns, for teardown
    pub nodes: Vec<NodeId>,
}

impl ModuleInstance {
    pub fn param(&self, id: &str) -> Option<&ParamRef> {
        self.params.iter().find(|p| p.id == id)
    }

    pub fn mod_output(&self, id: &str) -> Option<&ModOutput> {
        self.mod_outputs.iter().find(|o| o.id == id)
    }
}

/// Builder result: the capability record plus control-rate sequencer state
/// when the module is a sequencer.
pub struct BuiltModule {
    pub instance: ModuleInstance,
    pub sequencer: Option<StepSequencer>,
}

pub type ModuleBuilder = fn(&mut AudioGraph) -> Result<BuiltModule, EngineError>;

/// Table of known module types.
///
/// Checked at registration/build time; asking for an unknown type is an
/// error, and everything a built module can do is visible in its record.
pub struct ModuleRegistry {
    builders: HashMap<&'static str, (ModuleKind, ModuleBuilder)>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self {
            builders: HashMap::new(),
        }
    }

    /// Registry preloaded with the standard module library.
    pub fn with_standard_modules() -> Self {
        let mut registry = Self::new();
        crate::library::register_standard(&mut registry);
        registry
    }

    pub fn register(&mut self, type_id: &'static str, kind: ModuleKind, builder: ModuleBuilder) {
        self.builders.insert(type_id, (kind, builder));
    }

    pub fn contains(&self, type_id: &str) -> bool {
        self.builders.contains_key(type_id)
    }

    /// Declared kind of a type, without building it.
    pub fn kind_of(&self, type_id: &str) -> Option<ModuleKind> {
        self.builders.get(type_id).map(|(kind, _)| *kind)
    }

    pub fn build(
        &self,
        graph: &mut AudioGraph,
        type_id: &str,
    ) -> Result<BuiltModule, EngineError> {
        let (kind, builder) = self
            .builders
            .get(type_id)
            .ok_or_else(|| EngineError::UnknownModuleType(type_id.to_string()))?;
        let built = builder(graph)?;
        debug_assert_eq!(built.instance.kind, *kind, "registered kind mismatch");
        Ok(built)
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::with_standard_modules()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry_has_core_types() {
        let registry = ModuleRegistry::with_standard_modules();
        for type_id in ["pwm", "pluck", "noise", "lpf", "hpf", "lfo", "adenv", "seq8", "seq16", "seq64"] {
            assert!(registry.contains(type_id), "missing {}", type_id);
        }
        assert!(!registry.contains("fm"));
    }

    #[test]
    fn test_unknown_type_is_error() {
        let registry = ModuleRegistry::with_standard_modules();
        let mut graph = AudioGraph::new(44100.0);
        let err = registry.build(&mut graph, "does-not-exist");
        assert!(matches!(err, Err(EngineError::UnknownModuleType(_))));
    }
}
