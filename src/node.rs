// src/node.rs
//
// The node contract: a unit of computation with typed input/output sockets,
// ticked once per block in dependency order.
//
// Nodes never see the graph through ambient state; everything graph-scoped
// (traversal id, named memory, events, trigger routing) arrives through an
// explicit TickContext.

use crate::control_value::ControlValues;
use crate::graph::Graph;
use crate::graph_def::{NodeDef, NodeId};
use crate::plug::{InputPlug, PlugType, PlugValue};
use crate::signal::Signal;

/// Routing entry for an edge-triggered event: when the owning node fires
/// output socket `src_socket`, input `dst_socket` of `dst_node` is marked
/// triggered, to be dispatched at the start of that node's next traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerTarget {
    pub src_socket: usize,
    pub dst_node: NodeId,
    pub dst_socket: usize,
}

/// Multi-line human readable node status, for editor tooltips.
#[derive(Debug, Default)]
pub struct NodeDescription {
    pub lines: Vec<String>,
}

impl NodeDescription {
    pub fn add(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    pub fn newline(&mut self) {
        self.lines.push(String::new());
    }
}

/// Context for the non-real-time phases (init/shut), where nodes may
/// register shared control values.
pub struct InitContext<'a> {
    pub control_values: &'a mut ControlValues,
}

/// Per-tick context handed to a node while it processes one block.
pub struct TickContext<'a> {
    pub traversal_id: i64,
    /// Graph time in seconds at the start of this tick.
    pub time: f64,
    pub node_id: NodeId,
    /// Advisory bypass flag; honoring it is up to the node's tick.
    pub is_passthrough: bool,

    pub(crate) graph: &'a Graph,
    pub(crate) trigger_targets: &'a [TriggerTarget],
    pub(crate) pending_triggers: &'a mut Vec<(NodeId, usize)>,
}

impl TickContext<'_> {
    /// Named 4-float memory cell; zeros when absent.
    pub fn memf(&self, name: &str) -> [f32; 4] {
        self.graph.get_memf(name)
    }

    /// Named string memory cell.
    pub fn mems(&self, name: &str) -> Option<&str> {
        self.graph.get_mems(name)
    }

    pub fn is_flag_set(&self, name: &str) -> bool {
        self.graph.is_flag_set(name)
    }

    /// Events fired since the previous tick, drained at tick start.
    pub fn events(&self) -> &[String] {
        self.graph.active_events()
    }

    /// Fire a trigger-type output socket. Downstream inputs are marked, not
    /// called into: dispatch happens at the start of each target node's next
    /// traversal, keeping ordering deterministic relative to the DFS.
    pub fn fire_trigger(&mut self, output_socket: usize) {
        for target in self.trigger_targets {
            if target.src_socket == output_socket {
                self.pending_triggers
                    .push((target.dst_node, target.dst_socket));
            }
        }
    }
}

/// Resolved socket access for one node during its tick.
///
/// Inputs are read through the graph view (producer outputs, fan-in sums,
/// literals); outputs are the node's own storage.
pub struct NodeIo<'a> {
    graph: &'a Graph,
    pub inputs: &'a [InputPlug],
    pub outputs: &'a mut [PlugValue],
}

impl<'a> NodeIo<'a> {
    pub(crate) fn new(
        graph: &'a Graph,
        inputs: &'a [InputPlug],
        outputs: &'a mut [PlugValue],
    ) -> Self {
        Self {
            graph,
            inputs,
            outputs,
        }
    }

    fn resolved(&self, index: usize) -> Option<&PlugValue> {
        let plug = self.inputs.get(index)?;
        if let Some(conn) = plug.conn() {
            return self.graph.output_value(conn);
        }
        plug.literal()
    }

    fn resolve_signal(graph: &'a Graph, plug: &'a InputPlug) -> Option<&'a Signal> {
        debug_assert_eq!(plug.plug_type(), PlugType::Signal);
        match plug.fan_in.sources() {
            [] => plug.literal().and_then(PlugValue::as_signal),
            [source] => graph.signal_output(*source),
            _ => plug.fan_in.sum(),
        }
    }

    /// Whether the input has a producer or a literal; nodes use this to pick
    /// between a wired value and their built-in default behavior.
    pub fn has_input(&self, index: usize) -> bool {
        self.inputs.get(index).is_some_and(InputPlug::is_connected)
    }

    pub fn input_bool(&self, index: usize, default: bool) -> bool {
        self.resolved(index)
            .and_then(PlugValue::as_bool)
            .unwrap_or(default)
    }

    pub fn input_int(&self, index: usize, default: i32) -> i32 {
        self.resolved(index)
            .and_then(PlugValue::as_int)
            .unwrap_or(default)
    }

    pub fn input_float(&self, index: usize, default: f32) -> f32 {
        self.resolved(index)
            .and_then(PlugValue::as_float)
            .unwrap_or(default)
    }

    pub fn input_string(&self, index: usize, default: &'a str) -> &str {
        self.resolved(index)
            .and_then(PlugValue::as_str)
            .unwrap_or(default)
    }

    /// A signal input: the single producer's output (zero-copy), the cached
    /// fan-in sum, or the immediate literal. None while fully unconnected.
    pub fn input_signal(&self, index: usize) -> Option<&Signal> {
        let plug = self.inputs.get(index)?;
        Self::resolve_signal(self.graph, plug)
    }

    /// Read one signal input while holding a signal output mutably. The
    /// input resolves through the graph view and other nodes' storage, so
    /// the two borrows never alias.
    pub fn signal_in_out(
        &mut self,
        input: usize,
        output: usize,
    ) -> (Option<&'a Signal>, Option<&mut Signal>) {
        let resolved = self
            .inputs
            .get(input)
            .and_then(|plug| Self::resolve_signal(self.graph, plug));
        let out = self.outputs.get_mut(output).and_then(PlugValue::as_signal_mut);
        (resolved, out)
    }

    pub fn output_signal(&mut self, index: usize) -> Option<&mut Signal> {
        debug_assert!(index < self.outputs.len());
        self.outputs.get_mut(index)?.as_signal_mut()
    }

    pub fn set_output_bool(&mut self, index: usize, value: bool) {
        if let Some(PlugValue::Bool(v)) = self.outputs.get_mut(index) {
            *v = value;
        }
    }

    pub fn set_output_int(&mut self, index: usize, value: i32) {
        if let Some(PlugValue::Int(v)) = self.outputs.get_mut(index) {
            *v = value;
        }
    }

    pub fn set_output_float(&mut self, index: usize, value: f32) {
        if let Some(PlugValue::Float(v)) = self.outputs.get_mut(index) {
            *v = value;
        }
    }

    pub fn set_output_string(&mut self, index: usize, value: &str) {
        if let Some(PlugValue::Str(v)) = self.outputs.get_mut(index) {
            value.clone_into(v);
        }
    }
}

/// The per-type node behavior. One boxed instance per graph node.
///
/// `tick` and `handle_trigger` run on the audio path and must not block or
/// allocate; the init/shut pair runs outside the real-time budget.
pub trait AudioNode: Send {
    /// First init phase, before any links are wired. Register control values
    /// and do per-type setup here.
    fn init_self(&mut self, _ctx: &mut InitContext<'_>, _def: &NodeDef) {}

    /// Second init phase, after links and literals are in place.
    fn init(&mut self, _ctx: &mut InitContext<'_>, _def: &NodeDef) {}

    /// Process one block.
    fn tick(&mut self, ctx: &mut TickContext<'_>, io: &mut NodeIo<'_>, dt: f32);

    /// One queued trigger on `input_socket`, dispatched just before this
    /// node's tick, in input-index order.
    fn handle_trigger(
        &mut self,
        _ctx: &mut TickContext<'_>,
        _io: &mut NodeIo<'_>,
        _input_socket: usize,
    ) {
    }

    /// Teardown; unregister control values here.
    fn shut(&mut self, _ctx: &mut InitContext<'_>) {}

    fn describe(&self, _d: &mut NodeDescription) {}

    /// Fill `magnitude` with a normalized frequency response if this node is
    /// a filter. Returns false otherwise.
    fn filter_response(&self, _magnitude: &mut [f32]) -> bool {
        false
    }
}
