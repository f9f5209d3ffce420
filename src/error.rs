// src/error.rs

use crate::plug::PlugType;
use thiserror::Error;

/// Refused graph configuration operations. The graph is left untouched when
/// any of these is returned; callers log and move on, nothing escapes the
/// tick path.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("plug type mismatch: expected {expected:?}, found {found:?}")]
    TypeMismatch { expected: PlugType, found: PlugType },

    #[error("node {0} does not exist")]
    MissingNode(u32),

    #[error("node {0} already exists")]
    DuplicateNode(u32),

    #[error("node {node} has no socket {socket}")]
    MissingSocket { node: u32, socket: usize },

    #[error("unknown node type '{0}'")]
    UnknownNodeType(String),

    #[error("socket already has a producer; disconnect it first")]
    AlreadyConnected,

    #[error("no matching connection to remove")]
    NotConnected,

    #[error("cannot parse '{value}' as {plug_type:?}")]
    LiteralParse { plug_type: PlugType, value: String },
}

/// Graph definition load/save failures. Surfaced to manager callers as an
/// absent instance, never as a panic.
#[derive(Debug, Error)]
pub enum DefError {
    #[error("failed to read graph definition: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse graph definition: {0}")]
    Json(#[from] serde_json::Error),
}
