//! Standard module library
//!
//! Builders assembling the stock modules out of DSP kernels. Each declares
//! the module's capability record: advertised audio endpoints, modulatable
//! params with their scale factors, modulation outputs, trigger cells.
//!
//! Modulation scales match the ranges the destinations expect: a [0,1]
//! sequencer pitch patched onto a filter cutoff goes through ×2000, onto an
//! oscillator frequency through ×100, onto a pulse width through ×0.5.

use crate::error::EngineError;
use crate::graph::AudioGraph;
use crate::kernels::{
    AdEnvelopeNode, GainNode, HighPassNode, LfoNode, LfoShape, LowPassNode, NoiseNode, PluckNode,
    PwmOscillatorNode, ValueNode,
};
use crate::module::{BuiltModule, ModOutput, ModuleInstance, ModuleKind, ModuleRegistry, ParamRef};
use crate::sequencer::StepSequencer;

pub fn register_standard(registry: &mut ModuleRegistry) {
    registry.register("pwm", ModuleKind::Source, build_pwm);
    registry.register("pluck", ModuleKind::Source, build_pluck);
    registry.register("noise", ModuleKind::Source, build_noise);
    registry.register("lpf", ModuleKind::Effect, build_lpf);
    registry.register("hpf", ModuleKind::Effect, build_hpf);
    registry.register("lfo", ModuleKind::Modulator, build_lfo);
    registry.register("adenv", ModuleKind::Modulator, build_adenv);
    registry.register("seq8", ModuleKind::Modulator, build_seq8);
    registry.register("seq16", ModuleKind::Modulator, build_seq16);
    registry.register("seq64", ModuleKind::Modulator, build_seq64);
}

fn build_pwm(graph: &mut AudioGraph) -> Result<BuiltModule, EngineError> {
    let osc = graph.add_node(Box::new(PwmOscillatorNode::new()));
    let amp = graph.add_node(Box::new(GainNode::new(0.3)));
    graph.connect_audio(osc, amp)?;
    Ok(BuiltModule {
        instance: ModuleInstance {
            type_id: "pwm",
            kind: ModuleKind::Source,
            audio_in: None,
            audio_out: Some(amp),
            params: vec![
                ParamRef::scaled("frequency", osc, "frequency", 100.0),
                ParamRef::scaled("pulseWidth", osc, "width", 0.5),
                ParamRef::new("gain", amp, "gain"),
            ],
            mod_outputs: Vec::new(),
            trigger: None,
            has_gate_output: false,
            nodes: vec![osc, amp],
        },
        sequencer: None,
    })
}

fn build_pluck(graph: &mut AudioGraph) -> Result<BuiltModule, EngineError> {
    let pluck = PluckNode::new();
    let trigger = pluck.trigger_cell();
    let string = graph.add_node(Box::new(pluck));
    let amp = graph.add_node(Box::new(GainNode::new(0.8)));
    graph.connect_audio(string, amp)?;
    Ok(BuiltModule {
        instance: ModuleInstance {
            type_id: "pluck",
            kind: ModuleKind::Source,
            audio_in: None,
            audio_out: Some(amp),
            params: vec![
                ParamRef::scaled("frequency", string, "frequency", 100.0),
                ParamRef::scaled("damping", string, "damping", 0.5),
                ParamRef::new("gain", amp, "gain"),
            ],
            mod_outputs: Vec::new(),
            trigger: Some(trigger),
            has_gate_output: false,
            nodes: vec![string, amp],
        },
        sequencer: None,
    })
}

fn build_noise(graph: &mut AudioGraph) -> Result<BuiltModule, EngineError> {
    let noise = graph.add_node(Box::new(NoiseNode::new()));
    Ok(BuiltModule {
        instance: ModuleInstance {
            type_id: "noise",
            kind: ModuleKind::Source,
            audio_in: None,
            audio_out: Some(noise),
            params: vec![ParamRef::new("level", noise, "level")],
            mod_outputs: Vec::new(),
            trigger: None,
            has_gate_output: false,
            nodes: vec![noise],
        },
        sequencer: None,
    })
}

fn build_lpf(graph: &mut AudioGraph) -> Result<BuiltModule, EngineError> {
    let filter = graph.add_node(Box::new(LowPassNode::new()));
    Ok(BuiltModule {
        instance: ModuleInstance {
            type_id: "lpf",
            kind: ModuleKind::Effect,
            audio_in: Some(filter),
            audio_out: Some(filter),
            params: vec![
                ParamRef::scaled("frequency", filter, "frequency", 2000.0),
                ParamRef::new("order", filter, "order"),
            ],
            mod_outputs: Vec::new(),
            trigger: None,
            has_gate_output: false,
            nodes: vec![filter],
        },
        sequencer: None,
    })
}

fn build_hpf(graph: &mut AudioGraph) -> Result<BuiltModule, EngineError> {
    let filter = graph.add_node(Box::new(HighPassNode::new()));
    Ok(BuiltModule {
        instance: ModuleInstance {
            type_id: "hpf",
            kind: ModuleKind::Effect,
            audio_in: Some(filter),
            audio_out: Some(filter),
            params: vec![
                ParamRef::scaled("frequency", filter, "frequency", 2000.0),
                ParamRef::new("order", filter, "order"),
            ],
            mod_outputs: Vec::new(),
            trigger: None,
            has_gate_output: false,
            nodes: vec![filter],
        },
        sequencer: None,
    })
}

fn build_lfo(graph: &mut AudioGraph) -> Result<BuiltModule, EngineError> {
    let lfo = graph.add_node(Box::new(LfoNode::new(LfoShape::Sine)));
    Ok(BuiltModule {
        instance: ModuleInstance {
            type_id: "lfo",
            kind: ModuleKind::Modulator,
            audio_in: None,
            audio_out: None,
            params: vec![
                ParamRef::scaled("rate", lfo, "rate", 10.0),
                ParamRef::new("depth", lfo, "depth"),
            ],
            mod_outputs: vec![ModOutput {
                id: "out",
                node: lfo,
            }],
            trigger: None,
            has_gate_output: false,
            nodes: vec![lfo],
        },
        sequencer: None,
    })
}

fn build_adenv(graph: &mut AudioGraph) -> Result<BuiltModule, EngineError> {
    let env = AdEnvelopeNode::new();
    let trigger = env.trigger_cell();
    let node = graph.add_node(Box::new(env));
    Ok(BuiltModule {
        instance: ModuleInstance {
            type_id: "adenv",
            kind: ModuleKind::Modulator,
            audio_in: None,
            audio_out: None,
            params: vec![
                ParamRef::new("attack", node, "attack"),
                ParamRef::new("decay", node, "decay"),
            ],
            mod_outputs: vec![ModOutput {
                id: "env",
                node,
            }],
            trigger: Some(trigger),
            has_gate_output: false,
            nodes: vec![node],
        },
        sequencer: None,
    })
}

fn build_sequencer(
    graph: &mut AudioGraph,
    type_id: &'static str,
    steps: usize,
) -> Result<BuiltModule, EngineError> {
    let sequencer = StepSequencer::new(steps);
    // Pitch output holds the first step's value until the loop moves
    let pitch_out = graph.add_node(Box::new(ValueNode::new(sequencer.pitches()[0] / 100.0)));
    Ok(BuiltModule {
        instance: ModuleInstance {
            type_id,
            kind: ModuleKind::Modulator,
            audio_in: None,
            audio_out: None,
            params: Vec::new(),
            mod_outputs: vec![ModOutput {
                id: "pitch",
                node: pitch_out,
            }],
            trigger: None,
            has_gate_output: true,
            nodes: vec![pitch_out],
        },
        sequencer: Some(sequencer),
    })
}

fn build_seq8(graph: &mut AudioGraph) -> Result<BuiltModule, EngineError> {
    build_sequencer(graph, "seq8", 8)
}

fn build_seq16(graph: &mut AudioGraph) -> Result<BuiltModule, EngineError> {
    build_sequencer(graph, "seq16", 16)
}

fn build_seq64(graph: &mut AudioGraph) -> Result<BuiltModule, EngineError> {
    build_sequencer(graph, "seq64", 64)
}
