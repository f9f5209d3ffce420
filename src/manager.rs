// src/manager.rs
//
// Instance lifecycle. A manager owns the node type registry, a definition
// cache keyed by filename, the shared control values and every live graph
// instance, all behind one mutex: the audio thread ticks under the lock,
// other threads edit under the same lock, and no operation is ever split
// across two acquisitions.
//
// Two flavors: GraphManager runs finished definitions; EditorManager
// additionally keeps definitions editable and propagates every edit to all
// live instances of the same file.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::Mutex;

use crate::control_value::ControlValues;
use crate::graph::Graph;
use crate::graph_def::{GraphDef, NodeId};
use crate::registry::NodeTypeRegistry;

/// Handle to one live graph instance. Plain value; stale handles are
/// detected (freed instances leave the map) rather than dangling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InstanceId(u64);

struct GraphInstance {
    filename: String,
    graph: Graph,
}

struct ManagerShared {
    defs: HashMap<String, GraphDef>,
    instances: HashMap<InstanceId, GraphInstance>,
    control_values: ControlValues,
    next_instance: u64,
}

impl ManagerShared {
    fn new() -> Self {
        Self {
            defs: HashMap::new(),
            instances: HashMap::new(),
            control_values: ControlValues::new(),
            next_instance: 1,
        }
    }

    fn alloc_id(&mut self) -> InstanceId {
        let id = InstanceId(self.next_instance);
        self.next_instance += 1;
        id
    }
}

/// Runs graph instances built from immutable definitions.
pub struct GraphManager {
    registry: NodeTypeRegistry,
    shared: Mutex<ManagerShared>,
}

impl GraphManager {
    pub fn new(registry: NodeTypeRegistry) -> Self {
        Self {
            registry,
            shared: Mutex::new(ManagerShared::new()),
        }
    }

    pub fn registry(&self) -> &NodeTypeRegistry {
        &self.registry
    }

    /// Register a definition under a name without touching the filesystem.
    pub fn add_def(&self, name: &str, def: GraphDef) {
        self.shared.lock().defs.insert(name.to_owned(), def);
    }

    /// Create an instance of the named definition, loading and caching the
    /// file on first use. None when the file cannot be loaded.
    pub fn create_instance(&self, filename: &str) -> Option<InstanceId> {
        let mut guard = self.shared.lock();
        let shared = &mut *guard;

        if !shared.defs.contains_key(filename) {
            match GraphDef::load(Path::new(filename)) {
                Ok(def) => {
                    shared.defs.insert(filename.to_owned(), def);
                }
                Err(e) => {
                    log::error!("cannot load graph '{filename}': {e}");
                    return None;
                }
            }
        }

        let def = shared.defs.get(filename)?;
        let graph = Graph::from_def(def, &self.registry, &mut shared.control_values);

        let id = shared.alloc_id();
        shared.instances.insert(
            id,
            GraphInstance {
                filename: filename.to_owned(),
                graph,
            },
        );
        Some(id)
    }

    /// Tear an instance down, releasing its control value references.
    /// Returns false for a stale handle.
    pub fn free(&self, id: InstanceId) -> bool {
        let mut guard = self.shared.lock();
        let shared = &mut *guard;
        match shared.instances.remove(&id) {
            Some(mut instance) => {
                instance.graph.shut(&mut shared.control_values);
                true
            }
            None => {
                log::warn!("free of unknown graph instance {id:?}");
                false
            }
        }
    }

    pub fn instance_count(&self) -> usize {
        self.shared.lock().instances.len()
    }

    /// Advance shared control values and every instance by one block.
    pub fn tick(&self, dt: f32) {
        let mut guard = self.shared.lock();
        let shared = &mut *guard;

        shared.control_values.tick(dt);
        for instance in shared.instances.values_mut() {
            instance.graph.import_control_values(&shared.control_values);
            instance.graph.tick(dt);
        }
    }

    /// Run a closure against one instance's graph, under the lock.
    pub fn with_graph<R>(&self, id: InstanceId, f: impl FnOnce(&mut Graph) -> R) -> Option<R> {
        let mut guard = self.shared.lock();
        guard.instances.get_mut(&id).map(|i| f(&mut i.graph))
    }

    pub fn set_control_desired(&self, name: &str, x: f32, y: f32) {
        self.shared.lock().control_values.set_desired(name, x, y);
    }

    /// Current smoothed value of a shared control, if registered.
    pub fn control_current(&self, name: &str) -> Option<(f32, f32)> {
        let guard = self.shared.lock();
        guard
            .control_values
            .get(name)
            .map(|v| (v.current_x, v.current_y))
    }

    /// Queue a named event on one instance.
    pub fn trigger_event(&self, id: InstanceId, name: &str) -> bool {
        self.with_graph(id, |g| g.trigger_event(name)).is_some()
    }
}

// ---- editor manager -------------------------------------------------------

struct EditorShared {
    manager: ManagerShared,

    /// Latest editor heat snapshot of the active instance, keyed by node.
    /// Purged per node on removal.
    heat: HashMap<NodeId, f32>,

    active: Option<InstanceId>,
}

/// Runs instances like [`GraphManager`] while keeping definitions live:
/// every edit applies to the definition and to each running instance of
/// that file in the same locked operation.
pub struct EditorManager {
    registry: NodeTypeRegistry,
    shared: Mutex<EditorShared>,
}

impl EditorManager {
    pub fn new(registry: NodeTypeRegistry) -> Self {
        Self {
            registry,
            shared: Mutex::new(EditorShared {
                manager: ManagerShared::new(),
                heat: HashMap::new(),
                active: None,
            }),
        }
    }

    pub fn registry(&self) -> &NodeTypeRegistry {
        &self.registry
    }

    pub fn add_def(&self, name: &str, def: GraphDef) {
        self.shared
            .lock()
            .manager
            .defs
            .insert(name.to_owned(), def);
    }

    pub fn create_instance(&self, filename: &str) -> Option<InstanceId> {
        let mut guard = self.shared.lock();
        let shared = &mut guard.manager;

        if !shared.defs.contains_key(filename) {
            match GraphDef::load(Path::new(filename)) {
                Ok(def) => {
                    shared.defs.insert(filename.to_owned(), def);
                }
                Err(e) => {
                    log::error!("cannot load graph '{filename}': {e}");
                    return None;
                }
            }
        }

        let def = shared.defs.get(filename)?;
        let graph = Graph::from_def(def, &self.registry, &mut shared.control_values);

        let id = shared.alloc_id();
        shared.instances.insert(
            id,
            GraphInstance {
                filename: filename.to_owned(),
                graph,
            },
        );

        if guard.active.is_none() {
            guard.active = Some(id);
        }
        Some(id)
    }

    pub fn free(&self, id: InstanceId) -> bool {
        let mut guard = self.shared.lock();
        if guard.active == Some(id) {
            guard.active = None;
        }
        let shared = &mut guard.manager;
        match shared.instances.remove(&id) {
            Some(mut instance) => {
                instance.graph.shut(&mut shared.control_values);
                true
            }
            None => false,
        }
    }

    /// Pick which instance the editor introspects.
    pub fn select_active(&self, id: InstanceId) -> bool {
        let mut guard = self.shared.lock();
        if guard.manager.instances.contains_key(&id) {
            guard.active = Some(id);
            true
        } else {
            false
        }
    }

    pub fn active_instance(&self) -> Option<InstanceId> {
        self.shared.lock().active
    }

    pub fn instance_count(&self) -> usize {
        self.shared.lock().manager.instances.len()
    }

    pub fn tick(&self, dt: f32) {
        let mut guard = self.shared.lock();
        let shared = &mut guard.manager;

        shared.control_values.tick(dt);
        for instance in shared.instances.values_mut() {
            instance.graph.import_control_values(&shared.control_values);
            instance.graph.tick(dt);
        }
    }

    pub fn with_graph<R>(&self, id: InstanceId, f: impl FnOnce(&mut Graph) -> R) -> Option<R> {
        let mut guard = self.shared.lock();
        guard
            .manager
            .instances
            .get_mut(&id)
            .map(|i| f(&mut i.graph))
    }

    pub fn set_control_desired(&self, name: &str, x: f32, y: f32) {
        self.shared
            .lock()
            .manager
            .control_values
            .set_desired(name, x, y);
    }

    /// Save the live definition back to its file.
    pub fn save_file(&self, filename: &str) -> bool {
        let guard = self.shared.lock();
        let Some(def) = guard.manager.defs.get(filename) else {
            return false;
        };
        match def.save(Path::new(filename)) {
            Ok(()) => true,
            Err(e) => {
                log::error!("cannot save graph '{filename}': {e}");
                false
            }
        }
    }

    // ---- live edits, applied to the def and every instance of the file ----

    fn for_instances_of(
        shared: &mut ManagerShared,
        filename: &str,
        mut f: impl FnMut(&mut Graph, &mut ControlValues),
    ) {
        let control_values = &mut shared.control_values;
        for instance in shared.instances.values_mut() {
            if instance.filename == filename {
                f(&mut instance.graph, control_values);
            }
        }
    }

    /// Append a node of the given type. Returns its definition id, shared
    /// by every instance.
    pub fn node_add(&self, filename: &str, type_name: &str) -> Option<NodeId> {
        let mut guard = self.shared.lock();
        let shared = &mut guard.manager;

        if self.registry.get(type_name).is_none() {
            log::error!("cannot add node: unknown type '{type_name}'");
            return None;
        }

        let id = shared.defs.get_mut(filename)?.add_node(type_name);
        let node_def = shared.defs.get(filename)?.get_node(id)?.clone();

        let registry = &self.registry;
        Self::for_instances_of(shared, filename, |graph, control_values| {
            if let Err(e) = graph.add_node(&node_def, registry, control_values) {
                log::error!("node add failed on live instance: {e}");
            } else {
                let _ = graph.init_node(id, &node_def, control_values);
            }
        });
        Some(id)
    }

    /// Remove a node: its wires go first, then the node, then any editor
    /// state keyed by its id.
    pub fn node_remove(&self, filename: &str, id: NodeId) -> bool {
        let mut guard = self.shared.lock();
        let EditorShared {
            manager: shared,
            heat,
            ..
        } = &mut *guard;

        let Some(def) = shared.defs.get_mut(filename) else {
            return false;
        };
        let touching: Vec<_> = def
            .links
            .iter()
            .copied()
            .filter(|l| l.src_node == id || l.dst_node == id)
            .collect();
        if def.remove_node(id).is_none() {
            return false;
        }

        Self::for_instances_of(shared, filename, |graph, control_values| {
            // mark first so concurrent introspection passes over the node
            let _ = graph.set_node_deprecated(id, true);
            for link in &touching {
                let _ = graph.remove_link(
                    link.src_node,
                    link.src_socket,
                    link.dst_node,
                    link.dst_socket,
                );
            }
            if let Err(e) = graph.remove_node(id, control_values) {
                log::error!("node remove failed on live instance: {e}");
            }
        });

        heat.remove(&id);
        true
    }

    pub fn link_add(
        &self,
        filename: &str,
        src_node: NodeId,
        src_socket: usize,
        dst_node: NodeId,
        dst_socket: usize,
    ) -> bool {
        let mut guard = self.shared.lock();
        let shared = &mut guard.manager;

        let Some(def) = shared.defs.get_mut(filename) else {
            return false;
        };
        def.connect(src_node, src_socket, dst_node, dst_socket);

        Self::for_instances_of(shared, filename, |graph, _| {
            if let Err(e) = graph.add_link(src_node, src_socket, dst_node, dst_socket) {
                log::error!("link add failed on live instance: {e}");
            }
        });
        true
    }

    pub fn link_remove(
        &self,
        filename: &str,
        src_node: NodeId,
        src_socket: usize,
        dst_node: NodeId,
        dst_socket: usize,
    ) -> bool {
        let mut guard = self.shared.lock();
        let shared = &mut guard.manager;

        let Some(def) = shared.defs.get_mut(filename) else {
            return false;
        };
        if !def.disconnect(src_node, src_socket, dst_node, dst_socket) {
            return false;
        }

        Self::for_instances_of(shared, filename, |graph, _| {
            if let Err(e) = graph.remove_link(src_node, src_socket, dst_node, dst_socket) {
                log::error!("link remove failed on live instance: {e}");
            }
        });
        true
    }

    pub fn node_set_passthrough(&self, filename: &str, id: NodeId, enabled: bool) -> bool {
        let mut guard = self.shared.lock();
        let shared = &mut guard.manager;

        let Some(def) = shared.defs.get_mut(filename) else {
            return false;
        };
        let Some(node) = def.nodes.get_mut(&id) else {
            return false;
        };
        node.is_passthrough = enabled;

        Self::for_instances_of(shared, filename, |graph, _| {
            let _ = graph.set_node_passthrough(id, enabled);
        });
        true
    }

    /// Set a socket literal by name. The literal lands in the definition
    /// and on every instance; wired producers still take precedence when
    /// the node reads the input.
    pub fn node_set_input_value(
        &self,
        filename: &str,
        id: NodeId,
        socket_name: &str,
        value: &str,
    ) -> bool {
        let Some(socket) = self.input_socket_index(filename, id, socket_name) else {
            return false;
        };

        let mut guard = self.shared.lock();
        let shared = &mut guard.manager;
        let Some(def) = shared.defs.get_mut(filename) else {
            return false;
        };
        def.set_input_value(id, socket_name, value);

        Self::for_instances_of(shared, filename, |graph, _| {
            if let Err(e) = graph.set_input_literal(id, socket, value) {
                log::error!("set input value failed on live instance: {e}");
            }
        });
        true
    }

    pub fn node_clear_input_value(&self, filename: &str, id: NodeId, socket_name: &str) -> bool {
        let Some(socket) = self.input_socket_index(filename, id, socket_name) else {
            return false;
        };

        let mut guard = self.shared.lock();
        let shared = &mut guard.manager;
        let Some(def) = shared.defs.get_mut(filename) else {
            return false;
        };
        def.clear_input_value(id, socket_name);

        Self::for_instances_of(shared, filename, |graph, _| {
            let _ = graph.clear_input_literal(id, socket);
        });
        true
    }

    fn input_socket_index(&self, filename: &str, id: NodeId, socket_name: &str) -> Option<usize> {
        let guard = self.shared.lock();
        let type_name = guard
            .manager
            .defs
            .get(filename)?
            .get_node(id)?
            .type_name
            .clone();
        drop(guard);
        self.registry.get(&type_name)?.input_index(socket_name)
    }

    // ---- active-instance introspection ------------------------------------

    /// Current value string of an input socket on the active instance.
    pub fn active_input_value(&self, id: NodeId, socket: usize) -> Option<String> {
        let guard = self.shared.lock();
        let active = guard.active?;
        let instance = guard.manager.instances.get(&active)?;
        instance.graph.input_value_string(id, socket)
    }

    /// Current value string of an output socket on the active instance.
    pub fn active_output_value(&self, id: NodeId, socket: usize) -> Option<String> {
        let guard = self.shared.lock();
        let active = guard.active?;
        let instance = guard.manager.instances.get(&active)?;
        instance.graph.output_value_string(id, socket)
    }

    /// Refresh and return the per-node CPU heat (smoothed microseconds per
    /// tick) of the active instance.
    pub fn capture_heat(&self) -> Option<HashMap<NodeId, f32>> {
        let mut guard = self.shared.lock();
        let active = guard.active?;
        let instance = guard.manager.instances.get(&active)?;

        let snapshot: HashMap<NodeId, f32> = instance
            .graph
            .node_ids()
            .filter_map(|id| instance.graph.node(id).map(|e| (id, e)))
            .filter(|(_, e)| !e.is_deprecated)
            .map(|(id, e)| (id, e.tick_time_us))
            .collect();
        guard.heat = snapshot.clone();
        Some(snapshot)
    }

    /// Processor-provided description lines for an editor tooltip.
    pub fn describe_node(&self, id: NodeId) -> Option<Vec<String>> {
        let guard = self.shared.lock();
        let active = guard.active?;
        let instance = guard.manager.instances.get(&active)?;
        instance.graph.describe_node(id).map(|d| d.lines)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph_def::NodeDef;
    use crate::node::{AudioNode, NodeIo, TickContext};
    use crate::plug::{PlugRef, PlugType, PlugValue};
    use crate::registry::NodeTypeRegistration;

    struct Const;

    impl AudioNode for Const {
        fn tick(&mut self, _ctx: &mut TickContext<'_>, io: &mut NodeIo<'_>, _dt: f32) {
            let value = io.input_float(0, 0.0);
            if let Some(out) = io.output_signal(0) {
                out.set_scalar(value);
            }
        }
    }

    struct Capture;

    impl AudioNode for Capture {
        fn tick(&mut self, _ctx: &mut TickContext<'_>, io: &mut NodeIo<'_>, _dt: f32) {
            let mean = io.input_signal(0).map_or(0.0, |s| s.mean());
            io.set_output_float(0, mean);
        }
    }

    /// Reads the control value exported into memf under "level".
    struct LevelReader;

    impl AudioNode for LevelReader {
        fn init_self(
            &mut self,
            ctx: &mut crate::node::InitContext<'_>,
            _def: &NodeDef,
        ) {
            ctx.control_values.register(
                crate::control_value::ControlValueKind::Vector1,
                "level",
                0.0,
                1.0,
                0.0,
                0.25,
                0.0,
            );
        }

        fn shut(&mut self, ctx: &mut crate::node::InitContext<'_>) {
            ctx.control_values.unregister("level");
        }

        fn tick(&mut self, ctx: &mut TickContext<'_>, io: &mut NodeIo<'_>, _dt: f32) {
            io.set_output_float(0, ctx.memf("level")[0]);
        }
    }

    fn test_registry() -> NodeTypeRegistry {
        let mut registry = NodeTypeRegistry::new();
        registry.register(
            NodeTypeRegistration::new("test.const", || Box::new(Const))
                .input("value", PlugType::Float)
                .output("signal", PlugType::Signal),
        );
        registry.register(
            NodeTypeRegistration::new("test.capture", || Box::new(Capture))
                .input("in", PlugType::Signal)
                .output("mean", PlugType::Float),
        );
        registry.register(
            NodeTypeRegistration::new("test.level", || Box::new(LevelReader))
                .output("level", PlugType::Float),
        );
        registry
    }

    fn simple_def() -> (GraphDef, NodeId, NodeId) {
        let mut def = GraphDef::new();
        let a = def.add_node_def(NodeDef::new(0, "test.const").with_input("value", "5"));
        let cap = def.add_node("test.capture");
        def.connect(a, 0, cap, 0);
        (def, a, cap)
    }

    fn read_float(manager: &GraphManager, id: InstanceId, node: NodeId) -> f32 {
        manager
            .with_graph(id, |g| {
                g.output_value(PlugRef { node, socket: 0 })
                    .and_then(PlugValue::as_float)
                    .unwrap()
            })
            .unwrap()
    }

    #[test]
    fn create_tick_and_free_an_instance() {
        let manager = GraphManager::new(test_registry());
        let (def, _a, cap) = simple_def();
        manager.add_def("patch", def);

        let id = manager.create_instance("patch").unwrap();
        assert_eq!(manager.instance_count(), 1);

        manager.tick(0.01);
        assert_eq!(read_float(&manager, id, cap), 5.0);

        assert!(manager.free(id));
        assert!(!manager.free(id));
        assert_eq!(manager.instance_count(), 0);
    }

    #[test]
    fn create_instance_loads_and_caches_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patch.json");
        let (def, _a, cap) = simple_def();
        def.save(&path).unwrap();

        let manager = GraphManager::new(test_registry());
        let filename = path.to_str().unwrap();

        let first = manager.create_instance(filename).unwrap();
        let second = manager.create_instance(filename).unwrap();
        assert_ne!(first, second);

        // cached definition survives file deletion
        std::fs::remove_file(&path).unwrap();
        let third = manager.create_instance(filename).unwrap();

        manager.tick(0.01);
        for id in [first, second, third] {
            assert_eq!(read_float(&manager, id, cap), 5.0);
        }

        assert!(manager.create_instance("missing.json").is_none());
    }

    #[test]
    fn control_values_are_shared_across_instances() {
        let manager = GraphManager::new(test_registry());
        let mut def = GraphDef::new();
        let level = def.add_node("test.level");
        manager.add_def("patch", def);

        let a = manager.create_instance("patch").unwrap();
        let b = manager.create_instance("patch").unwrap();

        // default 0.25 before any set_desired, zero smoothness
        manager.tick(0.01);
        assert_eq!(read_float(&manager, a, level), 0.25);

        manager.set_control_desired("level", 0.9, 0.0);
        manager.tick(0.01);
        assert_eq!(read_float(&manager, a, level), 0.9);
        assert_eq!(read_float(&manager, b, level), 0.9);

        // last free releases the registration
        manager.free(a);
        assert!(manager.control_current("level").is_some());
        manager.free(b);
        assert!(manager.control_current("level").is_none());
    }

    #[test]
    fn editor_edits_propagate_to_all_instances() {
        let editor = EditorManager::new(test_registry());
        editor.add_def("patch", GraphDef::new());

        let a = editor.create_instance("patch").unwrap();
        let b = editor.create_instance("patch").unwrap();

        let src = editor.node_add("patch", "test.const").unwrap();
        let cap = editor.node_add("patch", "test.capture").unwrap();
        assert!(editor.node_set_input_value("patch", src, "value", "3"));
        assert!(editor.link_add("patch", src, 0, cap, 0));

        editor.tick(0.01);
        for id in [a, b] {
            let mean = editor
                .with_graph(id, |g| g.output_value_string(cap, 0))
                .flatten()
                .unwrap();
            assert_eq!(mean, "3");
        }

        assert!(editor.link_remove("patch", src, 0, cap, 0));
        editor.tick(0.01);
        let mean = editor
            .with_graph(a, |g| g.output_value_string(cap, 0))
            .flatten()
            .unwrap();
        assert_eq!(mean, "0");

        assert!(editor.node_remove("patch", src));
        let count = editor.with_graph(a, |g| g.node_count()).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn node_remove_unwires_first() {
        let editor = EditorManager::new(test_registry());
        editor.add_def("patch", GraphDef::new());
        let _inst = editor.create_instance("patch").unwrap();

        let src = editor.node_add("patch", "test.const").unwrap();
        let cap = editor.node_add("patch", "test.capture").unwrap();
        assert!(editor.link_add("patch", src, 0, cap, 0));

        // removing a wired node removes the wire from the surviving side too
        assert!(editor.node_remove("patch", src));
        editor.tick(0.01);

        assert!(!editor.link_remove("patch", src, 0, cap, 0));
        assert!(!editor.node_remove("patch", src));
    }

    #[test]
    fn editor_introspects_active_instance() {
        let editor = EditorManager::new(test_registry());
        editor.add_def("patch", GraphDef::new());
        let inst = editor.create_instance("patch").unwrap();
        assert_eq!(editor.active_instance(), Some(inst));

        let src = editor.node_add("patch", "test.const").unwrap();
        let cap = editor.node_add("patch", "test.capture").unwrap();
        editor.node_set_input_value("patch", src, "value", "2.5");
        editor.link_add("patch", src, 0, cap, 0);
        editor.tick(0.01);

        assert_eq!(editor.active_input_value(cap, 0), Some("2.5".to_string()));
        assert_eq!(editor.active_output_value(src, 0), Some("2.5".to_string()));

        let heat = editor.capture_heat().unwrap();
        assert!(heat.contains_key(&src) && heat.contains_key(&cap));

        editor.free(inst);
        assert_eq!(editor.active_instance(), None);
        assert!(editor.active_input_value(cap, 0).is_none());
    }

    #[test]
    fn editor_saves_live_definition() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patch.json");
        GraphDef::new().save(&path).unwrap();
        let filename = path.to_str().unwrap().to_owned();

        let editor = EditorManager::new(test_registry());
        let _inst = editor.create_instance(&filename).unwrap();
        let src = editor.node_add(&filename, "test.const").unwrap();
        editor.node_set_input_value(&filename, src, "value", "8");
        assert!(editor.save_file(&filename));

        let reloaded = GraphDef::load(&path).unwrap();
        assert_eq!(
            reloaded.get_node(src).unwrap().input_values.get("value"),
            Some(&"8".to_string())
        );
    }
}
