// src/nodes/mod.rs
//
// Built-in node types.

mod oscillators;
mod triggers;
mod utility;

pub use oscillators::*;
pub use triggers::*;
pub use utility::*;

use crate::registry::NodeTypeRegistry;

/// Register every built-in node type. Applications extend the same registry
/// with their own types before handing it to a manager.
pub fn register_core_nodes(registry: &mut NodeTypeRegistry) {
    oscillators::register_oscillator_nodes(registry);
    utility::register_utility_nodes(registry);
    triggers::register_trigger_nodes(registry);
}
