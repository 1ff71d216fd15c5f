//! Error taxonomy for graph mutation and registry population.
//!
//! Channel operations deliberately have no error type: cancellation delivers
//! a terminal `None`, never a `Result`. Worker-internal faults never reach
//! this enum either; they are captured by `ComponentCore::spawn` and
//! surfaced only through `ComponentSnapshot::fault`.

use thiserror::Error;

use crate::graph::{Edge, NodeId};

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("no component class registered under the name {0:?}")]
    UnknownComponent(String),

    #[error("no node with id {0} in the graph")]
    NodeNotFound(NodeId),

    #[error("slot {slot:?} is not declared by node {node}")]
    SlotNotFound { node: NodeId, slot: String },

    #[error(
        "type mismatch wiring {source_node}.{source_slot} ({source_type}) \
         to {target_node}.{target_slot} ({target_type})"
    )]
    TypeMismatch {
        source_node: NodeId,
        source_slot: String,
        source_type: String,
        target_node: NodeId,
        target_slot: String,
        target_type: String,
    },

    #[error("target slot {target_slot:?} on node {target_node} already has an upstream")]
    SlotOccupied {
        target_node: NodeId,
        target_slot: String,
    },

    #[error("edge already exists: {0:?}")]
    EdgeExists(Edge),

    #[error("edge not found: {0:?}")]
    EdgeNotFound(Edge),

    #[error("component constructor rejected its init params: {0}")]
    ComponentInitError(String),
}

/// Errors raised while populating the process-wide [`crate::registry::Registry`].
///
/// These surface at startup registration time, not from graph-mutation
/// callers, so they are kept out of [`GraphError`].
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("a component class named {0:?} is already registered")]
    DuplicateClass(String),
}
