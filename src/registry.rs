// src/registry.rs
//
// Node type registry: string type name -> socket schema + factory. The
// schema is the single source of truth for socket counts, ordering, types
// and editor-facing names; the runtime graph builds its plug vectors from
// it during construction.

use std::collections::HashMap;

use crate::node::AudioNode;
use crate::plug::PlugType;

/// One input or output socket in a node type's schema.
#[derive(Debug, Clone)]
pub struct SocketSpec {
    pub name: String,
    pub plug_type: PlugType,

    /// Editor default shown for unconnected inputs. Empty means "use the
    /// node's built-in default"; this is metadata, not a wired literal.
    pub default_value: String,
}

type CreateFn = Box<dyn Fn() -> Box<dyn AudioNode> + Send + Sync>;

/// Registration record for one node type.
pub struct NodeTypeRegistration {
    pub type_name: String,
    pub display_name: String,
    pub inputs: Vec<SocketSpec>,
    pub outputs: Vec<SocketSpec>,
    create: CreateFn,
}

impl NodeTypeRegistration {
    pub fn new<F>(type_name: impl Into<String>, create: F) -> Self
    where
        F: Fn() -> Box<dyn AudioNode> + Send + Sync + 'static,
    {
        let type_name = type_name.into();
        Self {
            display_name: type_name.clone(),
            type_name,
            inputs: Vec::new(),
            outputs: Vec::new(),
            create: Box::new(create),
        }
    }

    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    /// Declare the next input socket. Declaration order is socket order.
    pub fn input(mut self, name: impl Into<String>, plug_type: PlugType) -> Self {
        self.inputs.push(SocketSpec {
            name: name.into(),
            plug_type,
            default_value: String::new(),
        });
        self
    }

    /// Declare the next input socket with an editor default.
    pub fn input_default(
        mut self,
        name: impl Into<String>,
        plug_type: PlugType,
        default_value: impl Into<String>,
    ) -> Self {
        self.inputs.push(SocketSpec {
            name: name.into(),
            plug_type,
            default_value: default_value.into(),
        });
        self
    }

    /// Declare the next output socket. Declaration order is socket order.
    pub fn output(mut self, name: impl Into<String>, plug_type: PlugType) -> Self {
        self.outputs.push(SocketSpec {
            name: name.into(),
            plug_type,
            default_value: String::new(),
        });
        self
    }

    pub fn create(&self) -> Box<dyn AudioNode> {
        (self.create)()
    }

    pub fn input_index(&self, name: &str) -> Option<usize> {
        self.inputs.iter().position(|s| s.name == name)
    }

    pub fn output_index(&self, name: &str) -> Option<usize> {
        self.outputs.iter().position(|s| s.name == name)
    }
}

impl std::fmt::Debug for NodeTypeRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeTypeRegistration")
            .field("type_name", &self.type_name)
            .field("inputs", &self.inputs.len())
            .field("outputs", &self.outputs.len())
            .finish()
    }
}

/// All known node types, keyed by type name.
#[derive(Debug, Default)]
pub struct NodeTypeRegistry {
    types: HashMap<String, NodeTypeRegistration>,
}

impl NodeTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, registration: NodeTypeRegistration) {
        let prev = self
            .types
            .insert(registration.type_name.clone(), registration);
        if let Some(prev) = prev {
            log::warn!("node type '{}' registered twice", prev.type_name);
        }
    }

    pub fn get(&self, type_name: &str) -> Option<&NodeTypeRegistration> {
        self.types.get(type_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeTypeRegistration> {
        self.types.values()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}
