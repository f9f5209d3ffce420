// src/lib.rs
//
// Real-time audio node graph engine: block signals with scalar/vector
// duality, typed sockets with fan-in summation, traversal-id ticking over a
// live-editable node arena, shared smoothed control values, and managers
// that own instance lifecycle under a single lock.

mod control_value;
mod error;
mod graph;
mod graph_def;
mod manager;
mod node;
mod plug;
mod registry;
mod signal;

pub mod nodes;

// Re-export key types for consumers
pub use control_value::{ControlValue, ControlValueKind, ControlValues};
pub use error::{DefError, GraphError};
pub use graph::{Graph, NodeEntry};
pub use graph_def::{GraphDef, LinkDef, NodeDef, NodeId};
pub use manager::{EditorManager, GraphManager, InstanceId};
pub use node::{
    AudioNode, InitContext, NodeDescription, NodeIo, TickContext, TriggerTarget,
};
pub use nodes::register_core_nodes;
pub use plug::{FanIn, InputPlug, PlugRef, PlugType, PlugValue};
pub use registry::{NodeTypeRegistration, NodeTypeRegistry, SocketSpec};
pub use signal::{BLOCK_SIZE, Signal};
