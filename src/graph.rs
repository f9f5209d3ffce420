// src/graph.rs
//
// The runtime graph: a node arena keyed by stable ids, ticked in dependency
// order via traversal-id marking, editable while running. All mutation is
// serialized by the owning manager's lock; nothing here blocks or panics on
// the tick path.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::mem;
use std::time::Instant;

use crate::control_value::ControlValues;
use crate::error::GraphError;
use crate::graph_def::{GraphDef, NodeDef, NodeId};
use crate::node::{InitContext, NodeDescription, NodeIo, TickContext, TriggerTarget};
use crate::plug::{InputPlug, PlugRef, PlugType, PlugValue};
use crate::registry::NodeTypeRegistry;
use crate::signal::{BLOCK_SIZE, Signal};

/// One node in the arena: its processor plus all per-node runtime state.
pub struct NodeEntry {
    pub type_name: String,

    /// None only for nodes whose type was unknown at construction; such
    /// entries keep their sockets (so links resolve) but never tick.
    processor: Option<Box<dyn crate::node::AudioNode>>,

    pub inputs: Vec<InputPlug>,
    pub outputs: Vec<PlugValue>,

    /// One entry per incoming wire (duplicates included); drives traversal
    /// order. Removing a wire removes exactly one entry.
    predeps: Vec<NodeId>,

    /// Trigger routing for this node's trigger outputs.
    trigger_targets: Vec<TriggerTarget>,

    last_traversal_id: i64,
    pub is_passthrough: bool,

    /// Editor mark for a node about to be removed; introspection skips it.
    pub is_deprecated: bool,

    /// Smoothed per-tick cost in microseconds, for editor heat display.
    pub tick_time_us: f32,
}

impl NodeEntry {
    pub fn predeps(&self) -> &[NodeId] {
        &self.predeps
    }

    pub fn trigger_targets(&self) -> &[TriggerTarget] {
        &self.trigger_targets
    }
}

/// The live graph.
pub struct Graph {
    nodes: BTreeMap<NodeId, NodeEntry>,

    /// Monotonic tick counter; doubles as the visited mark for traversal and
    /// the fan-in memoization key.
    traversal_id: i64,

    /// Accumulated graph time in seconds.
    time: f64,

    flags: HashSet<String>,
    memf: HashMap<String, [f32; 4]>,
    mems: HashMap<String, String>,

    /// Events fired since the last tick; swapped into `active_events` at the
    /// start of the next tick so each event is visible for exactly one tick.
    event_queue: Vec<String>,
    active_events: Vec<String>,

    // Scratch buffers reused every tick so the steady state stays
    // allocation-free.
    pending_triggers: Vec<(NodeId, usize)>,
    dfs_stack: Vec<(NodeId, usize)>,
    order_scratch: Vec<NodeId>,
    roots_scratch: Vec<NodeId>,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    pub fn new() -> Self {
        Self {
            nodes: BTreeMap::new(),
            traversal_id: 0,
            time: 0.0,
            flags: HashSet::new(),
            memf: HashMap::new(),
            mems: HashMap::new(),
            event_queue: Vec::new(),
            active_events: Vec::new(),
            pending_triggers: Vec::new(),
            dfs_stack: Vec::new(),
            order_scratch: Vec::new(),
            roots_scratch: Vec::new(),
        }
    }

    /// Build a runtime graph from a definition. Unknown node types, bad
    /// links and bad literals are logged and skipped; the rest of the graph
    /// comes up.
    pub fn from_def(
        def: &GraphDef,
        registry: &NodeTypeRegistry,
        control_values: &mut ControlValues,
    ) -> Graph {
        let mut graph = Graph::new();

        for node_def in def.nodes.values() {
            if let Err(e) = graph.add_node(node_def, registry, control_values) {
                log::error!(
                    "cannot create node {} of type '{}': {e}",
                    node_def.id,
                    node_def.type_name
                );
            }
        }

        for link in &def.links {
            if !link.enabled {
                continue;
            }
            if let Err(e) =
                graph.add_link(link.src_node, link.src_socket, link.dst_node, link.dst_socket)
            {
                log::error!(
                    "cannot create link {}:{} -> {}:{}: {e}",
                    link.src_node,
                    link.src_socket,
                    link.dst_node,
                    link.dst_socket
                );
            }
        }

        // literals apply only to inputs that didn't get a producer
        for node_def in def.nodes.values() {
            let Some(registration) = registry.get(&node_def.type_name) else {
                continue;
            };
            for (socket_name, value) in &node_def.input_values {
                let Some(socket) = registration.input_index(socket_name) else {
                    log::warn!("node {} has no input socket '{socket_name}'", node_def.id);
                    continue;
                };
                if graph.input_has_producer(node_def.id, socket) {
                    continue;
                }
                if let Err(e) = graph.set_input_literal(node_def.id, socket, value) {
                    log::error!(
                        "node {} socket '{socket_name}': bad value '{value}': {e}",
                        node_def.id
                    );
                }
            }
        }

        // second init phase, with links and literals in place
        for node_def in def.nodes.values() {
            let _ = graph.init_node(node_def.id, node_def, control_values);
        }

        graph
    }

    /// Shut every node down and drop the arena. Control value references
    /// taken during init are released here.
    pub fn shut(&mut self, control_values: &mut ControlValues) {
        let mut ctx = InitContext { control_values };
        for entry in self.nodes.values_mut() {
            if let Some(processor) = entry.processor.as_mut() {
                processor.shut(&mut ctx);
            }
        }
        self.nodes.clear();
    }

    // ---- editing ----------------------------------------------------------

    /// Create a node from its definition and run its first init phase. The
    /// second phase (`init_node`) runs once links and literals are wired.
    pub fn add_node(
        &mut self,
        def: &NodeDef,
        registry: &NodeTypeRegistry,
        control_values: &mut ControlValues,
    ) -> Result<NodeId, GraphError> {
        if self.nodes.contains_key(&def.id) {
            return Err(GraphError::DuplicateNode(def.id));
        }
        let registration = registry
            .get(&def.type_name)
            .ok_or_else(|| GraphError::UnknownNodeType(def.type_name.clone()))?;

        let inputs = registration
            .inputs
            .iter()
            .map(|s| InputPlug::new(s.plug_type))
            .collect();
        let outputs = registration
            .outputs
            .iter()
            .map(|s| PlugValue::new(s.plug_type))
            .collect();

        let mut processor = registration.create();
        let mut ctx = InitContext { control_values };
        processor.init_self(&mut ctx, def);

        self.nodes.insert(
            def.id,
            NodeEntry {
                type_name: def.type_name.clone(),
                processor: Some(processor),
                inputs,
                outputs,
                predeps: Vec::new(),
                trigger_targets: Vec::new(),
                last_traversal_id: -1,
                is_passthrough: def.is_passthrough,
                is_deprecated: false,
                tick_time_us: 0.0,
            },
        );
        Ok(def.id)
    }

    /// Second init phase for one node.
    pub fn init_node(
        &mut self,
        id: NodeId,
        def: &NodeDef,
        control_values: &mut ControlValues,
    ) -> Result<(), GraphError> {
        let entry = self.nodes.get_mut(&id).ok_or(GraphError::MissingNode(id))?;
        if let Some(processor) = entry.processor.as_mut() {
            let mut ctx = InitContext { control_values };
            processor.init(&mut ctx, def);
        }
        Ok(())
    }

    /// Remove a node. Callers are expected to remove its wires first; stale
    /// references from surviving nodes resolve to nothing and are harmless.
    pub fn remove_node(
        &mut self,
        id: NodeId,
        control_values: &mut ControlValues,
    ) -> Result<(), GraphError> {
        let mut entry = self.nodes.remove(&id).ok_or(GraphError::MissingNode(id))?;
        debug_assert!(entry.predeps.is_empty(), "node {id} removed while wired");

        if let Some(mut processor) = entry.processor.take() {
            let mut ctx = InitContext { control_values };
            processor.shut(&mut ctx);
        }
        Ok(())
    }

    /// Wire producer output `src_node:src_socket` into consumer input
    /// `dst_node:dst_socket`. On any error the graph is left untouched.
    pub fn add_link(
        &mut self,
        src_node: NodeId,
        src_socket: usize,
        dst_node: NodeId,
        dst_socket: usize,
    ) -> Result<(), GraphError> {
        let src_type = {
            let src = self
                .nodes
                .get(&src_node)
                .ok_or(GraphError::MissingNode(src_node))?;
            src.outputs
                .get(src_socket)
                .ok_or(GraphError::MissingSocket {
                    node: src_node,
                    socket: src_socket,
                })?
                .plug_type()
        };

        {
            let dst = self
                .nodes
                .get_mut(&dst_node)
                .ok_or(GraphError::MissingNode(dst_node))?;
            let input = dst
                .inputs
                .get_mut(dst_socket)
                .ok_or(GraphError::MissingSocket {
                    node: dst_node,
                    socket: dst_socket,
                })?;
            input.connect_to(
                PlugRef {
                    node: src_node,
                    socket: src_socket,
                },
                src_type,
            )?;
            dst.predeps.push(src_node);
        }

        if src_type == PlugType::Trigger {
            if let Some(src) = self.nodes.get_mut(&src_node) {
                src.trigger_targets.push(TriggerTarget {
                    src_socket,
                    dst_node,
                    dst_socket,
                });
            }
        }
        Ok(())
    }

    /// Remove one wire by identity: exactly one fan-in entry, one predep
    /// entry and (for trigger links) one routing entry go away.
    pub fn remove_link(
        &mut self,
        src_node: NodeId,
        src_socket: usize,
        dst_node: NodeId,
        dst_socket: usize,
    ) -> Result<(), GraphError> {
        let source = PlugRef {
            node: src_node,
            socket: src_socket,
        };

        {
            let dst = self
                .nodes
                .get_mut(&dst_node)
                .ok_or(GraphError::MissingNode(dst_node))?;
            let input = dst
                .inputs
                .get_mut(dst_socket)
                .ok_or(GraphError::MissingSocket {
                    node: dst_node,
                    socket: dst_socket,
                })?;
            input.remove_connection(source)?;

            let pos = dst.predeps.iter().position(|p| *p == src_node);
            debug_assert!(pos.is_some(), "predep missing for removed wire");
            if let Some(pos) = pos {
                dst.predeps.remove(pos);
            }
        }

        if let Some(src) = self.nodes.get_mut(&src_node) {
            let is_trigger = src
                .outputs
                .get(src_socket)
                .is_some_and(|o| o.plug_type() == PlugType::Trigger);
            if is_trigger {
                let pos = src.trigger_targets.iter().position(|t| {
                    t.src_socket == src_socket
                        && t.dst_node == dst_node
                        && t.dst_socket == dst_socket
                });
                debug_assert!(pos.is_some(), "trigger target missing for removed wire");
                if let Some(pos) = pos {
                    src.trigger_targets.remove(pos);
                }
            }
        }
        Ok(())
    }

    pub fn set_node_passthrough(&mut self, id: NodeId, enabled: bool) -> Result<(), GraphError> {
        let entry = self.nodes.get_mut(&id).ok_or(GraphError::MissingNode(id))?;
        entry.is_passthrough = enabled;
        Ok(())
    }

    pub fn set_node_deprecated(&mut self, id: NodeId, deprecated: bool) -> Result<(), GraphError> {
        let entry = self.nodes.get_mut(&id).ok_or(GraphError::MissingNode(id))?;
        entry.is_deprecated = deprecated;
        Ok(())
    }

    /// Parse and install an immediate literal on an input socket.
    pub fn set_input_literal(
        &mut self,
        node: NodeId,
        socket: usize,
        value: &str,
    ) -> Result<(), GraphError> {
        self.input_mut(node, socket)?.set_literal(value)
    }

    pub fn clear_input_literal(&mut self, node: NodeId, socket: usize) -> Result<(), GraphError> {
        self.input_mut(node, socket)?.clear_literal();
        Ok(())
    }

    /// Mark a trigger input directly, as if a wire had fired into it. The
    /// node handles it at the start of its next traversal.
    pub fn queue_trigger(&mut self, node: NodeId, socket: usize) -> Result<(), GraphError> {
        let plug = self.input_mut(node, socket)?;
        if plug.plug_type() != PlugType::Trigger {
            return Err(GraphError::TypeMismatch {
                expected: PlugType::Trigger,
                found: plug.plug_type(),
            });
        }
        plug.is_triggered = true;
        Ok(())
    }

    /// Fire a node's trigger output, marking every wired target.
    pub fn trigger_output(&mut self, node: NodeId, socket: usize) -> Result<(), GraphError> {
        let targets: Vec<(NodeId, usize)> = {
            let entry = self.nodes.get(&node).ok_or(GraphError::MissingNode(node))?;
            entry
                .outputs
                .get(socket)
                .ok_or(GraphError::MissingSocket { node, socket })?;
            entry
                .trigger_targets
                .iter()
                .filter(|t| t.src_socket == socket)
                .map(|t| (t.dst_node, t.dst_socket))
                .collect()
        };
        for (dst_node, dst_socket) in targets {
            self.mark_triggered(dst_node, dst_socket);
        }
        Ok(())
    }

    fn input_mut(&mut self, node: NodeId, socket: usize) -> Result<&mut InputPlug, GraphError> {
        self.nodes
            .get_mut(&node)
            .ok_or(GraphError::MissingNode(node))?
            .inputs
            .get_mut(socket)
            .ok_or(GraphError::MissingSocket { node, socket })
    }

    fn input_has_producer(&self, node: NodeId, socket: usize) -> bool {
        self.nodes.get(&node).is_some_and(|entry| {
            entry.inputs.get(socket).is_some_and(|plug| {
                plug.conn().is_some() || !plug.fan_in.sources().is_empty()
            })
        })
    }

    fn mark_triggered(&mut self, node: NodeId, socket: usize) {
        let Some(plug) = self
            .nodes
            .get_mut(&node)
            .and_then(|e| e.inputs.get_mut(socket))
        else {
            return;
        };
        if plug.plug_type() == PlugType::Trigger {
            plug.is_triggered = true;
        }
    }

    // ---- named state ------------------------------------------------------

    pub fn set_flag(&mut self, name: &str) {
        if !self.flags.contains(name) {
            self.flags.insert(name.to_owned());
        }
    }

    pub fn reset_flag(&mut self, name: &str) {
        self.flags.remove(name);
    }

    pub fn is_flag_set(&self, name: &str) -> bool {
        self.flags.contains(name)
    }

    /// Write up to four floats into a named memory cell.
    pub fn set_memf(&mut self, name: &str, values: &[f32]) {
        let mut cell = [0.0; 4];
        for (dst, src) in cell.iter_mut().zip(values) {
            *dst = *src;
        }
        match self.memf.get_mut(name) {
            Some(existing) => *existing = cell,
            None => {
                self.memf.insert(name.to_owned(), cell);
            }
        }
    }

    /// Read a named memory cell; zeros when absent.
    pub fn get_memf(&self, name: &str) -> [f32; 4] {
        self.memf.get(name).copied().unwrap_or_default()
    }

    pub fn set_mems(&mut self, name: &str, value: &str) {
        match self.mems.get_mut(name) {
            Some(cell) => value.clone_into(cell),
            None => {
                self.mems.insert(name.to_owned(), value.to_owned());
            }
        }
    }

    pub fn get_mems(&self, name: &str) -> Option<&str> {
        self.mems.get(name).map(String::as_str)
    }

    /// Queue a named event. It becomes visible to nodes for exactly one
    /// tick, starting with the next one.
    pub fn trigger_event(&mut self, name: &str) {
        self.event_queue.push(name.to_owned());
    }

    pub fn active_events(&self) -> &[String] {
        &self.active_events
    }

    /// Publish smoothed control values into named float memory.
    pub fn import_control_values(&mut self, control_values: &ControlValues) {
        for v in control_values.iter() {
            self.set_memf(&v.name, &[v.current_x, v.current_y]);
        }
    }

    // ---- ticking ----------------------------------------------------------

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn traversal_id(&self) -> i64 {
        self.traversal_id
    }

    /// Seconds of audio one tick advances at the given sample rate.
    pub fn block_dt(sample_rate: f32) -> f32 {
        BLOCK_SIZE as f32 / sample_rate
    }

    /// Advance the whole graph by one block. Every node ticks exactly once,
    /// producers before consumers; cycles are cut at the back edge, which
    /// observes the producer's previous-tick output.
    pub fn tick(&mut self, dt: f32) {
        self.active_events.clear();
        mem::swap(&mut self.active_events, &mut self.event_queue);

        self.traversal_id += 1;

        let mut roots = mem::take(&mut self.roots_scratch);
        roots.clear();
        roots.extend(self.nodes.keys().copied());
        for &root in &roots {
            let visited = self
                .nodes
                .get(&root)
                .is_none_or(|e| e.last_traversal_id == self.traversal_id);
            if !visited {
                self.traverse_and_tick(root, dt);
            }
        }
        self.roots_scratch = roots;

        self.time += f64::from(dt);
    }

    /// Depth-first from `root`: mark, descend into unvisited predeps, tick
    /// in post-order. Marking happens before descending so a cycle
    /// terminates instead of recursing forever.
    fn traverse_and_tick(&mut self, root: NodeId, dt: f32) {
        let tid = self.traversal_id;
        let mut stack = mem::take(&mut self.dfs_stack);
        let mut order = mem::take(&mut self.order_scratch);
        debug_assert!(stack.is_empty());
        order.clear();

        if let Some(entry) = self.nodes.get_mut(&root) {
            entry.last_traversal_id = tid;
        }
        stack.push((root, 0));

        loop {
            let Some(&mut (id, ref mut pred_idx)) = stack.last_mut() else {
                break;
            };

            let mut next = None;
            if let Some(entry) = self.nodes.get(&id) {
                while *pred_idx < entry.predeps.len() {
                    let p = entry.predeps[*pred_idx];
                    *pred_idx += 1;
                    let unvisited = self
                        .nodes
                        .get(&p)
                        .is_some_and(|e| e.last_traversal_id != tid);
                    if unvisited {
                        next = Some(p);
                        break;
                    }
                }
            }

            match next {
                Some(p) => {
                    if let Some(entry) = self.nodes.get_mut(&p) {
                        entry.last_traversal_id = tid;
                    }
                    stack.push((p, 0));
                }
                None => {
                    stack.pop();
                    order.push(id);
                }
            }
        }

        for i in 0..order.len() {
            self.tick_node(order[i], dt);
        }

        self.dfs_stack = stack;
        self.order_scratch = order;
    }

    /// Tick one node. Its processor and plug vectors are moved out of the
    /// entry for the duration so the node can read every other node's
    /// outputs through a shared view of the graph.
    fn tick_node(&mut self, id: NodeId, dt: f32) {
        let mut inputs = match self.nodes.get_mut(&id) {
            Some(entry) => mem::take(&mut entry.inputs),
            None => return,
        };

        let tid = self.traversal_id;

        // fan-in sums are computed while every output, including this
        // node's own, is still in the arena; a back edge into a fan-in
        // therefore contributes the previous tick's value
        {
            let graph: &Graph = &*self;
            for input in inputs.iter_mut() {
                if input.plug_type() == PlugType::Signal {
                    input.fan_in.refresh(tid, |r| graph.signal_output(r));
                }
            }
        }

        let (processor, mut outputs, is_passthrough) = match self.nodes.get_mut(&id) {
            Some(entry) => (
                entry.processor.take(),
                mem::take(&mut entry.outputs),
                entry.is_passthrough,
            ),
            None => return,
        };

        let Some(mut processor) = processor else {
            // unknown node type; sockets exist but there is nothing to run
            if let Some(entry) = self.nodes.get_mut(&id) {
                entry.inputs = inputs;
                entry.outputs = outputs;
            }
            return;
        };

        let mut pending = mem::take(&mut self.pending_triggers);
        let started = Instant::now();

        {
            let graph: &Graph = &*self;

            let trigger_targets: &[TriggerTarget] = graph
                .nodes
                .get(&id)
                .map_or(&[], |e| e.trigger_targets.as_slice());

            let mut ctx = TickContext {
                traversal_id: tid,
                time: graph.time,
                node_id: id,
                is_passthrough,
                graph,
                trigger_targets,
                pending_triggers: &mut pending,
            };

            // queued triggers dispatch before the tick, in input order
            for socket in 0..inputs.len() {
                if inputs[socket].take_trigger() {
                    let mut io = NodeIo::new(graph, &inputs, &mut outputs);
                    processor.handle_trigger(&mut ctx, &mut io, socket);
                }
            }

            let mut io = NodeIo::new(graph, &inputs, &mut outputs);
            processor.tick(&mut ctx, &mut io, dt);
        }

        let elapsed_us = started.elapsed().as_secs_f32() * 1e6;

        if let Some(entry) = self.nodes.get_mut(&id) {
            entry.processor = Some(processor);
            entry.inputs = inputs;
            entry.outputs = outputs;
            entry.tick_time_us = entry.tick_time_us * 0.9 + elapsed_us * 0.1;
        }

        // triggers fired during this node's tick reach their targets now;
        // targets later in this traversal handle them this tick, earlier
        // ones on the next
        for (dst_node, dst_socket) in pending.drain(..) {
            self.mark_triggered(dst_node, dst_socket);
        }
        self.pending_triggers = pending;
    }

    // ---- resolution and introspection -------------------------------------

    pub(crate) fn output_value(&self, r: PlugRef) -> Option<&PlugValue> {
        self.nodes.get(&r.node)?.outputs.get(r.socket)
    }

    pub(crate) fn signal_output(&self, r: PlugRef) -> Option<&Signal> {
        self.output_value(r)?.as_signal()
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeEntry> {
        self.nodes.get(&id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Editor snapshot of what an input socket currently carries.
    pub fn input_value_string(&self, node: NodeId, socket: usize) -> Option<String> {
        let entry = self.nodes.get(&node)?;
        let plug = entry.inputs.get(socket)?;

        if let Some(conn) = plug.conn() {
            return self.output_value(conn).map(PlugValue::display_value);
        }
        match plug.fan_in.sources() {
            [] => plug.literal().map(PlugValue::display_value),
            [source] => self
                .signal_output(*source)
                .map(|s| s.mean().to_string()),
            _ => plug.fan_in.sum().map(|s| s.mean().to_string()),
        }
    }

    /// Editor snapshot of an output socket's current value.
    pub fn output_value_string(&self, node: NodeId, socket: usize) -> Option<String> {
        self.nodes
            .get(&node)?
            .outputs
            .get(socket)
            .map(PlugValue::display_value)
    }

    pub fn describe_node(&self, id: NodeId) -> Option<NodeDescription> {
        let entry = self.nodes.get(&id)?;
        let mut d = NodeDescription::default();
        if let Some(processor) = entry.processor.as_ref() {
            processor.describe(&mut d);
        }
        Some(d)
    }
}
