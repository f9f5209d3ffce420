// src/graph_def.rs
//
// Declarative graph definition: the "document" an editor or file loader
// produces, compiled into a runtime Graph. Serializable as JSON for the
// manager's file cache.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::DefError;

/// Stable numeric identifier of a node instance within a graph.
pub type NodeId = u32;

/// One node instance in the definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDef {
    pub id: NodeId,

    /// Registry type name (e.g. "osc.sine").
    pub type_name: String,

    #[serde(default)]
    pub is_passthrough: bool,

    /// Socket-name keyed literal values for unconnected inputs.
    #[serde(default)]
    pub input_values: HashMap<String, String>,
}

impl NodeDef {
    pub fn new(id: NodeId, type_name: impl Into<String>) -> Self {
        Self {
            id,
            type_name: type_name.into(),
            is_passthrough: false,
            input_values: HashMap::new(),
        }
    }

    pub fn with_input(mut self, socket: impl Into<String>, value: impl Into<String>) -> Self {
        self.input_values.insert(socket.into(), value.into());
        self
    }
}

fn default_enabled() -> bool {
    true
}

/// One wire. `src` is the producer (output side), `dst` the consumer
/// (input side), in dataflow order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkDef {
    pub src_node: NodeId,
    pub src_socket: usize,
    pub dst_node: NodeId,
    pub dst_socket: usize,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// The complete declarative graph: node list plus link list.
///
/// Duplicate links are meaningful: each stands for one wire, and a signal
/// input sums every wire connected to it. `connect` never deduplicates and
/// `disconnect` removes exactly one matching entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphDef {
    pub nodes: BTreeMap<NodeId, NodeDef>,
    pub links: Vec<LinkDef>,

    #[serde(default)]
    next_id: NodeId,
}

impl GraphDef {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node of the given type, returning its id.
    pub fn add_node(&mut self, type_name: impl Into<String>) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        self.nodes.insert(id, NodeDef::new(id, type_name));
        id
    }

    /// Add a pre-configured node, assigning it a fresh id.
    pub fn add_node_def(&mut self, mut node: NodeDef) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        node.id = id;
        self.nodes.insert(id, node);
        id
    }

    /// Remove a node and every link touching it.
    pub fn remove_node(&mut self, id: NodeId) -> Option<NodeDef> {
        self.links
            .retain(|l| l.src_node != id && l.dst_node != id);
        self.nodes.remove(&id)
    }

    pub fn connect(
        &mut self,
        src_node: NodeId,
        src_socket: usize,
        dst_node: NodeId,
        dst_socket: usize,
    ) {
        self.links.push(LinkDef {
            src_node,
            src_socket,
            dst_node,
            dst_socket,
            enabled: true,
        });
    }

    /// Remove exactly one matching link.
    pub fn disconnect(
        &mut self,
        src_node: NodeId,
        src_socket: usize,
        dst_node: NodeId,
        dst_socket: usize,
    ) -> bool {
        let pos = self.links.iter().position(|l| {
            l.src_node == src_node
                && l.src_socket == src_socket
                && l.dst_node == dst_node
                && l.dst_socket == dst_socket
        });

        match pos {
            Some(pos) => {
                self.links.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn set_input_value(
        &mut self,
        node_id: NodeId,
        socket: impl Into<String>,
        value: impl Into<String>,
    ) {
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.input_values.insert(socket.into(), value.into());
        }
    }

    pub fn clear_input_value(&mut self, node_id: NodeId, socket: &str) {
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.input_values.remove(socket);
        }
    }

    pub fn get_node(&self, id: NodeId) -> Option<&NodeDef> {
        self.nodes.get(&id)
    }

    pub fn load(path: &Path) -> Result<Self, DefError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), DefError> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_stable_across_removal() {
        let mut def = GraphDef::new();
        let a = def.add_node("osc.sine");
        let b = def.add_node("util.gain");
        def.remove_node(a);
        let c = def.add_node("osc.sine");

        assert_ne!(b, c);
        assert_ne!(a, c);
    }

    #[test]
    fn remove_node_drops_its_links() {
        let mut def = GraphDef::new();
        let a = def.add_node("osc.sine");
        let b = def.add_node("util.gain");
        def.connect(a, 0, b, 0);
        def.connect(b, 0, a, 0);

        def.remove_node(a);
        assert!(def.links.is_empty());
    }

    #[test]
    fn duplicate_links_are_kept_and_removed_one_at_a_time() {
        let mut def = GraphDef::new();
        let a = def.add_node("osc.sine");
        let b = def.add_node("util.mix");
        def.connect(a, 0, b, 0);
        def.connect(a, 0, b, 0);
        assert_eq!(def.links.len(), 2);

        assert!(def.disconnect(a, 0, b, 0));
        assert_eq!(def.links.len(), 1);
        assert!(def.disconnect(a, 0, b, 0));
        assert!(!def.disconnect(a, 0, b, 0));
    }

    #[test]
    fn json_round_trip() {
        let mut def = GraphDef::new();
        let osc = def.add_node_def(NodeDef::new(0, "osc.sine").with_input("frequency", "440"));
        let out = def.add_node("util.gain");
        def.connect(osc, 0, out, 0);

        let text = serde_json::to_string(&def).unwrap();
        let back: GraphDef = serde_json::from_str(&text).unwrap();

        assert_eq!(back.nodes.len(), 2);
        assert_eq!(back.links.len(), 1);
        assert_eq!(
            back.get_node(osc).unwrap().input_values.get("frequency"),
            Some(&"440".to_string())
        );
        assert!(back.links[0].enabled);
    }
}
