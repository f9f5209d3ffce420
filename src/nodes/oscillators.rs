// Basic oscillator nodes.

use std::f32::consts::TAU;

use crate::node::{AudioNode, NodeDescription, NodeIo, TickContext};
use crate::plug::PlugType;
use crate::registry::{NodeTypeRegistration, NodeTypeRegistry};
use crate::signal::BLOCK_SIZE;

pub(crate) fn register_oscillator_nodes(registry: &mut NodeTypeRegistry) {
    registry.register(
        NodeTypeRegistration::new("osc.sine", || Box::new(SineOsc::new()))
            .display_name("Sine Oscillator")
            .input_default("frequency", PlugType::Signal, "440")
            .input_default("gain", PlugType::Signal, "1")
            .output("audio", PlugType::Signal),
    );
    registry.register(
        NodeTypeRegistration::new("osc.saw", || Box::new(SawOsc::new()))
            .display_name("Saw Oscillator")
            .input_default("frequency", PlugType::Signal, "440")
            .input_default("gain", PlugType::Signal, "1")
            .output("audio", PlugType::Signal),
    );
    registry.register(
        NodeTypeRegistration::new("osc.ramp", || Box::new(PhaseRamp::new()))
            .display_name("Phase Ramp")
            .input_default("frequency", PlugType::Signal, "1")
            .output("phase", PlugType::Signal),
    );
}

const DEFAULT_FREQ: f32 = 440.0;

/// Shared phase accumulator. Frequency may be a scalar or per-sample.
struct Phase {
    value: f32,
}

impl Phase {
    fn new() -> Self {
        Self { value: 0.0 }
    }

    /// Fill `out` by mapping the advancing phase through `wave`.
    fn run(
        &mut self,
        freq: Option<&crate::signal::Signal>,
        out: &mut crate::signal::Signal,
        dt: f32,
        wave: impl Fn(f32) -> f32,
    ) {
        let dt_sample = dt / BLOCK_SIZE as f32;
        out.set_vector();

        match freq {
            Some(freq) if !freq.is_scalar() => {
                let freq = freq.samples();
                for (i, sample) in out.samples_mut().iter_mut().enumerate() {
                    *sample = wave(self.value);
                    self.value = (self.value + freq[i] * dt_sample).fract();
                }
            }
            _ => {
                let inc = freq.map_or(DEFAULT_FREQ, |f| f.scalar()) * dt_sample;
                for sample in out.samples_mut().iter_mut() {
                    *sample = wave(self.value);
                    self.value = (self.value + inc).fract();
                }
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════
// Sine Oscillator
// ═══════════════════════════════════════════════════════════════════

pub struct SineOsc {
    phase: Phase,
}

impl SineOsc {
    pub fn new() -> Self {
        Self { phase: Phase::new() }
    }
}

impl Default for SineOsc {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioNode for SineOsc {
    fn tick(&mut self, ctx: &mut TickContext<'_>, io: &mut NodeIo<'_>, dt: f32) {
        let (freq, _) = io.signal_in_out(0, 0);
        let (gain, out) = io.signal_in_out(1, 0);
        let Some(out) = out else { return };

        if ctx.is_passthrough {
            out.set_zero();
            return;
        }

        self.phase.run(freq, out, dt, |p| (p * TAU).sin());
        if let Some(gain) = gain {
            out.mul(gain);
        }
    }

    fn describe(&self, d: &mut NodeDescription) {
        d.add(format!("phase: {:.3}", self.phase.value));
    }
}

// ═══════════════════════════════════════════════════════════════════
// Saw Oscillator (naive, non-bandlimited)
// ═══════════════════════════════════════════════════════════════════

pub struct SawOsc {
    phase: Phase,
}

impl SawOsc {
    pub fn new() -> Self {
        Self { phase: Phase::new() }
    }
}

impl Default for SawOsc {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioNode for SawOsc {
    fn tick(&mut self, ctx: &mut TickContext<'_>, io: &mut NodeIo<'_>, dt: f32) {
        let (freq, _) = io.signal_in_out(0, 0);
        let (gain, out) = io.signal_in_out(1, 0);
        let Some(out) = out else { return };

        if ctx.is_passthrough {
            out.set_zero();
            return;
        }

        self.phase.run(freq, out, dt, |p| p * 2.0 - 1.0);
        if let Some(gain) = gain {
            out.mul(gain);
        }
    }

    fn describe(&self, d: &mut NodeDescription) {
        d.add(format!("phase: {:.3}", self.phase.value));
    }
}

// ═══════════════════════════════════════════════════════════════════
// Phase Ramp (0..1, for driving lookups and LFO shapers)
// ═══════════════════════════════════════════════════════════════════

pub struct PhaseRamp {
    phase: Phase,
}

impl PhaseRamp {
    pub fn new() -> Self {
        Self { phase: Phase::new() }
    }
}

impl Default for PhaseRamp {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioNode for PhaseRamp {
    fn tick(&mut self, _ctx: &mut TickContext<'_>, io: &mut NodeIo<'_>, dt: f32) {
        let (freq, out) = io.signal_in_out(0, 0);
        let Some(out) = out else { return };

        // default frequency for a ramp is 1 Hz, not the audio default
        match freq {
            Some(_) => self.phase.run(freq, out, dt, |p| p),
            None => {
                let one_hz = crate::signal::Signal::from_scalar(1.0);
                self.phase.run(Some(&one_hz), out, dt, |p| p);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control_value::ControlValues;
    use crate::graph::Graph;
    use crate::graph_def::{GraphDef, NodeDef};
    use crate::plug::PlugRef;
    use crate::signal::Signal;

    fn build(def: &GraphDef) -> Graph {
        let mut registry = NodeTypeRegistry::new();
        register_oscillator_nodes(&mut registry);
        let mut cv = ControlValues::new();
        Graph::from_def(def, &registry, &mut cv)
    }

    fn output_signal(graph: &Graph, node: u32) -> &Signal {
        graph
            .output_value(PlugRef { node, socket: 0 })
            .and_then(crate::plug::PlugValue::as_signal)
            .unwrap()
    }

    #[test]
    fn sine_output_is_bounded_and_oscillates() {
        let mut def = GraphDef::new();
        let osc = def.add_node_def(NodeDef::new(0, "osc.sine").with_input("frequency", "1000"));

        let mut graph = build(&def);
        // dt for one 256-sample block at 48kHz
        let dt = BLOCK_SIZE as f32 / 48_000.0;
        graph.tick(dt);

        let out = output_signal(&graph, osc);
        assert!(!out.is_scalar());
        let samples = out.samples();
        assert!(samples.iter().all(|s| s.abs() <= 1.0));
        assert!(samples.iter().any(|s| *s > 0.5));
        assert!(samples.iter().any(|s| *s < -0.5));
    }

    #[test]
    fn sine_frequency_sets_cycle_count() {
        let mut def = GraphDef::new();
        let osc = def.add_node_def(NodeDef::new(0, "osc.sine").with_input("frequency", "1500"));

        let mut graph = build(&def);
        let dt = BLOCK_SIZE as f32 / 48_000.0;
        graph.tick(dt);

        // 1500 Hz over 256 samples at 48kHz is 8 cycles -> 16 zero crossings
        let samples = output_signal(&graph, osc).samples();
        let crossings = samples
            .windows(2)
            .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
            .count();
        assert!((15..=17).contains(&crossings), "got {crossings} crossings");
    }

    #[test]
    fn gain_input_scales_output() {
        let mut def = GraphDef::new();
        let osc = def.add_node_def(
            NodeDef::new(0, "osc.sine")
                .with_input("frequency", "1000")
                .with_input("gain", "0.5"),
        );

        let mut graph = build(&def);
        graph.tick(BLOCK_SIZE as f32 / 48_000.0);

        let samples = output_signal(&graph, osc).samples();
        let peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
        assert!(peak <= 0.5);
        assert!(peak > 0.4);
    }

    #[test]
    fn phase_is_continuous_across_ticks() {
        let mut def = GraphDef::new();
        let ramp = def.add_node_def(NodeDef::new(0, "osc.ramp").with_input("frequency", "2"));

        let mut graph = build(&def);
        let dt = 0.125;
        graph.tick(dt);
        let end_of_first = output_signal(&graph, ramp).samples()[BLOCK_SIZE - 1];

        graph.tick(dt);
        let start_of_second = output_signal(&graph, ramp).samples()[0];

        // 2 Hz, blocks of 0.125s: phase covers 0.25 per block
        let step = 2.0 * dt / BLOCK_SIZE as f32;
        assert!((start_of_second - (end_of_first + step)).abs() < 1e-4);
    }
}
