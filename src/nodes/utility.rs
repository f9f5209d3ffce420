// Utility nodes (gain, mix, range mapping, graph memory access).

use crate::node::{AudioNode, NodeDescription, NodeIo, TickContext};
use crate::plug::PlugType;
use crate::registry::{NodeTypeRegistration, NodeTypeRegistry};

pub(crate) fn register_utility_nodes(registry: &mut NodeTypeRegistry) {
    registry.register(
        NodeTypeRegistration::new("util.gain", || Box::new(GainNode))
            .display_name("Gain")
            .input("in", PlugType::Signal)
            .input_default("gain", PlugType::Signal, "1")
            .output("out", PlugType::Signal),
    );
    registry.register(
        NodeTypeRegistration::new("util.mix", || Box::new(MixNode))
            .display_name("Mix")
            .input("a", PlugType::Signal)
            .input_default("gain_a", PlugType::Float, "1")
            .input("b", PlugType::Signal)
            .input_default("gain_b", PlugType::Float, "1")
            .output("out", PlugType::Signal),
    );
    registry.register(
        NodeTypeRegistration::new("util.map", || Box::new(MapRange))
            .display_name("Map Range")
            .input("in", PlugType::Signal)
            .input_default("in_min", PlugType::Float, "0")
            .input_default("in_max", PlugType::Float, "1")
            .input_default("out_min", PlugType::Float, "0")
            .input_default("out_max", PlugType::Float, "1")
            .output("out", PlugType::Signal),
    );
    registry.register(
        NodeTypeRegistration::new("util.memf", || Box::new(MemfReader))
            .display_name("Memory (float)")
            .input("name", PlugType::String)
            .input_default("index", PlugType::Int, "0")
            .output("value", PlugType::Float)
            .output("signal", PlugType::Signal),
    );
}

// ═══════════════════════════════════════════════════════════════════
// Gain
// ═══════════════════════════════════════════════════════════════════

pub struct GainNode;

impl AudioNode for GainNode {
    fn tick(&mut self, ctx: &mut TickContext<'_>, io: &mut NodeIo<'_>, _dt: f32) {
        let (gain, _) = io.signal_in_out(1, 0);
        let (input, out) = io.signal_in_out(0, 0);
        let Some(out) = out else { return };

        let Some(input) = input else {
            out.set_zero();
            return;
        };

        match gain {
            // bypassed or unwired gain: straight copy, scalar stays scalar
            _ if ctx.is_passthrough => out.set(input),
            None => out.set(input),
            Some(gain) => out.set_mul_sig(input, gain),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════
// Mix (two weighted inputs; fan-in on each covers wider sums)
// ═══════════════════════════════════════════════════════════════════

pub struct MixNode;

impl AudioNode for MixNode {
    fn tick(&mut self, _ctx: &mut TickContext<'_>, io: &mut NodeIo<'_>, _dt: f32) {
        let gain_a = io.input_float(1, 1.0);
        let gain_b = io.input_float(3, 1.0);
        let (a, _) = io.signal_in_out(0, 0);
        let (b, out) = io.signal_in_out(2, 0);
        let Some(out) = out else { return };

        match a {
            Some(a) => out.set_mul(a, gain_a),
            None => out.set_zero(),
        }
        if let Some(b) = b {
            out.add_mul(b, gain_b);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════
// Map Range (linear remap, unclamped)
// ═══════════════════════════════════════════════════════════════════

pub struct MapRange;

impl AudioNode for MapRange {
    fn tick(&mut self, ctx: &mut TickContext<'_>, io: &mut NodeIo<'_>, _dt: f32) {
        let in_min = io.input_float(1, 0.0);
        let in_max = io.input_float(2, 1.0);
        let out_min = io.input_float(3, 0.0);
        let out_max = io.input_float(4, 1.0);
        let (input, out) = io.signal_in_out(0, 0);
        let Some(out) = out else { return };

        let Some(input) = input else {
            out.set_scalar(out_min);
            return;
        };
        if ctx.is_passthrough {
            out.set(input);
            return;
        }

        let in_range = in_max - in_min;
        let scale = if in_range == 0.0 {
            0.0
        } else {
            (out_max - out_min) / in_range
        };
        let map = |v: f32| out_min + (v - in_min) * scale;

        if input.is_scalar() {
            out.set_scalar(map(input.scalar()));
        } else {
            out.set_vector();
            for (dst, src) in out.samples_mut().iter_mut().zip(input.samples()) {
                *dst = map(*src);
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════
// Memory reader (named float memory -> socket value)
// ═══════════════════════════════════════════════════════════════════

pub struct MemfReader;

impl AudioNode for MemfReader {
    fn tick(&mut self, ctx: &mut TickContext<'_>, io: &mut NodeIo<'_>, _dt: f32) {
        let index = io.input_int(1, 0).clamp(0, 3) as usize;
        let name = io.input_string(0, "");
        let value = if name.is_empty() {
            0.0
        } else {
            ctx.memf(name)[index]
        };

        io.set_output_float(0, value);
        if let Some(out) = io.output_signal(1) {
            out.set_scalar(value);
        }
    }

    fn describe(&self, d: &mut NodeDescription) {
        d.add("reads one lane of a named float memory cell");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_value::ControlValues;
    use crate::graph::Graph;
    use crate::graph_def::{GraphDef, NodeDef};
    use crate::plug::{PlugRef, PlugValue};
    use crate::signal::Signal;

    fn build(def: &GraphDef) -> Graph {
        let mut registry = NodeTypeRegistry::new();
        register_utility_nodes(&mut registry);
        let mut cv = ControlValues::new();
        Graph::from_def(def, &registry, &mut cv)
    }

    fn out_signal(graph: &Graph, node: u32, socket: usize) -> &Signal {
        graph
            .output_value(PlugRef { node, socket })
            .and_then(PlugValue::as_signal)
            .unwrap()
    }

    #[test]
    fn gain_scales_and_keeps_scalar_fast_path() {
        let mut def = GraphDef::new();
        let gain = def.add_node_def(
            NodeDef::new(0, "util.gain")
                .with_input("in", "4")
                .with_input("gain", "0.25"),
        );

        let mut graph = build(&def);
        graph.tick(0.01);

        let out = out_signal(&graph, gain, 0);
        assert!(out.is_scalar());
        assert_eq!(out.scalar(), 1.0);
    }

    #[test]
    fn gain_passthrough_copies_input() {
        let mut def = GraphDef::new();
        let gain = def.add_node_def(
            NodeDef::new(0, "util.gain")
                .with_input("in", "4")
                .with_input("gain", "0.25"),
        );

        let mut graph = build(&def);
        graph.set_node_passthrough(gain, true).unwrap();
        graph.tick(0.01);

        assert_eq!(out_signal(&graph, gain, 0).scalar(), 4.0);
    }

    #[test]
    fn mix_applies_both_weights() {
        let mut def = GraphDef::new();
        let mix = def.add_node_def(
            NodeDef::new(0, "util.mix")
                .with_input("a", "2")
                .with_input("gain_a", "3")
                .with_input("b", "10")
                .with_input("gain_b", "0.5"),
        );

        let mut graph = build(&def);
        graph.tick(0.01);

        // 2*3 + 10*0.5
        assert_eq!(out_signal(&graph, mix, 0).scalar(), 11.0);
    }

    #[test]
    fn map_range_remaps_scalar() {
        let mut def = GraphDef::new();
        let map = def.add_node_def(
            NodeDef::new(0, "util.map")
                .with_input("in", "0.5")
                .with_input("in_min", "0")
                .with_input("in_max", "1")
                .with_input("out_min", "100")
                .with_input("out_max", "200"),
        );

        let mut graph = build(&def);
        graph.tick(0.01);

        assert_eq!(out_signal(&graph, map, 0).scalar(), 150.0);
    }

    #[test]
    fn map_range_degenerate_input_range() {
        let mut def = GraphDef::new();
        let map = def.add_node_def(
            NodeDef::new(0, "util.map")
                .with_input("in", "0.5")
                .with_input("in_min", "1")
                .with_input("in_max", "1")
                .with_input("out_min", "-5")
                .with_input("out_max", "5"),
        );

        let mut graph = build(&def);
        graph.tick(0.01);

        // no division by zero; collapses to out_min
        assert_eq!(out_signal(&graph, map, 0).scalar(), -5.0);
    }

    #[test]
    fn memf_reader_tracks_graph_memory() {
        let mut def = GraphDef::new();
        let reader = def.add_node_def(
            NodeDef::new(0, "util.memf")
                .with_input("name", "lfo")
                .with_input("index", "1"),
        );

        let mut graph = build(&def);
        graph.set_memf("lfo", &[0.1, 0.7]);
        graph.tick(0.01);

        let value = graph
            .output_value(PlugRef { node: reader, socket: 0 })
            .and_then(PlugValue::as_float)
            .unwrap();
        assert_eq!(value, 0.7);
        assert_eq!(out_signal(&graph, reader, 1).scalar(), 0.7);
    }
}
