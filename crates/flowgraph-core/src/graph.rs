//! Registry-backed collection of nodes and typed edges, with lazy wiring
//! at start time.

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use indexmap::IndexMap;

use crate::component::{Component, ComponentSnapshot};
use crate::error::GraphError;
use crate::registry::{ComponentInit, Registry};

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Identifies a node within a single [`Graph`]. Opaque outside this crate:
/// callers get one back from `create_node` and pass it to everything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

/// A directed, typed wire from one node's output slot to another node's
/// input slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge {
    pub source_node: NodeId,
    pub source_slot: String,
    pub target_node: NodeId,
    pub target_slot: String,
}

struct Node {
    id: NodeId,
    class_name: String,
    component: Arc<dyn Component>,
}

/// A registry-backed collection of component nodes and the typed edges
/// wiring their slots together. Edges are validated at insertion time;
/// the subscriptions they describe are only built when `start_all` runs,
/// so edge order never matters and a node can be wired to others created
/// after it.
pub struct Graph {
    registry: Arc<Registry>,
    nodes: RwLock<IndexMap<NodeId, Node>>,
    nodes_by_name: RwLock<IndexMap<String, NodeId>>,
    edges: RwLock<HashSet<Edge>>,
    started: std::sync::atomic::AtomicBool,
}

impl Graph {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            nodes: RwLock::new(IndexMap::new()),
            nodes_by_name: RwLock::new(IndexMap::new()),
            edges: RwLock::new(HashSet::new()),
            started: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// Instantiates `class_name` under node name `name` and adds it to the
    /// graph. Calling this again with a name already in use returns the
    /// existing node rather than erroring or creating a duplicate: node
    /// creation is idempotent by name.
    pub fn create_node(
        &self,
        class_name: &str,
        name: &str,
        init: &ComponentInit,
    ) -> Result<NodeId, GraphError> {
        if let Some(existing) = self.nodes_by_name.read().unwrap().get(name) {
            return Ok(*existing);
        }

        let component = self
            .registry
            .instantiate(class_name, name, init)
            .map_err(|err| match err {
                crate::registry::InstantiateError::UnknownClass(name) => GraphError::UnknownComponent(name),
                crate::registry::InstantiateError::ConstructionFailed(msg) => GraphError::ComponentInitError(msg),
            })?;

        let id = NodeId(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed));
        self.nodes.write().unwrap().insert(
            id,
            Node {
                id,
                class_name: class_name.to_string(),
                component,
            },
        );
        self.nodes_by_name.write().unwrap().insert(name.to_string(), id);
        tracing::info!(node = %id, class = class_name, name, "node created");
        Ok(id)
    }

    /// Spec §6 `list_components()`: the registered classes available to
    /// build nodes from, independent of what's actually in this graph.
    pub fn list_components(&self) -> Vec<crate::registry::ComponentDescriptor> {
        self.registry.list_components()
    }

    pub fn get_node(&self, id: NodeId) -> Result<Arc<dyn Component>, GraphError> {
        self.nodes
            .read()
            .unwrap()
            .get(&id)
            .map(|n| Arc::clone(&n.component))
            .ok_or(GraphError::NodeNotFound(id))
    }

    /// Removes a node and every edge touching it. Running components are
    /// stopped first.
    pub fn delete_node(&self, id: NodeId) -> Result<(), GraphError> {
        let node = self
            .nodes
            .write()
            .unwrap()
            .shift_remove(&id)
            .ok_or(GraphError::NodeNotFound(id))?;
        node.component.stop();
        self.nodes_by_name.write().unwrap().retain(|_, v| *v != id);
        self.edges
            .write()
            .unwrap()
            .retain(|e| e.source_node != id && e.target_node != id);
        tracing::info!(node = %id, "node deleted");
        Ok(())
    }

    /// Validates and inserts a wire between two declared slots.
    ///
    /// Rejects: unknown endpoints, slots not declared by their node,
    /// mismatched structural types, a target slot that already has an
    /// upstream (fan-in isn't supported — a slot takes at most one
    /// producer), and an edge identical to one already present.
    pub fn create_edge(&self, edge: Edge) -> Result<(), GraphError> {
        let nodes = self.nodes.read().unwrap();
        let source = nodes.get(&edge.source_node).ok_or(GraphError::NodeNotFound(edge.source_node))?;
        let target = nodes.get(&edge.target_node).ok_or(GraphError::NodeNotFound(edge.target_node))?;

        let source_type = source
            .component
            .output_slots()
            .get(&edge.source_slot)
            .cloned()
            .ok_or_else(|| GraphError::SlotNotFound {
                node: edge.source_node,
                slot: edge.source_slot.clone(),
            })?;
        let target_type = target
            .component
            .input_slots()
            .get(&edge.target_slot)
            .cloned()
            .ok_or_else(|| GraphError::SlotNotFound {
                node: edge.target_node,
                slot: edge.target_slot.clone(),
            })?;

        if source_type != target_type {
            return Err(GraphError::TypeMismatch {
                source_node: edge.source_node,
                source_slot: edge.source_slot.clone(),
                source_type: source_type.to_string(),
                target_node: edge.target_node,
                target_slot: edge.target_slot.clone(),
                target_type: target_type.to_string(),
            });
        }

        drop(nodes);
        let mut edges = self.edges.write().unwrap();
        if edges.contains(&edge) {
            return Err(GraphError::EdgeExists(edge));
        }
        if edges
            .iter()
            .any(|e| e.target_node == edge.target_node && e.target_slot == edge.target_slot)
        {
            return Err(GraphError::SlotOccupied {
                target_node: edge.target_node,
                target_slot: edge.target_slot,
            });
        }

        tracing::info!(
            source = %edge.source_node, source_slot = %edge.source_slot,
            target = %edge.target_node, target_slot = %edge.target_slot,
            "edge created"
        );
        edges.insert(edge);
        Ok(())
    }

    /// Removes an edge. Both endpoint components are stopped: a severed
    /// wire leaves a component unable to do useful work, so the graph
    /// halts both sides rather than leaving them running with a dangling
    /// slot.
    pub fn delete_edge(&self, edge: &Edge) -> Result<(), GraphError> {
        let removed = self.edges.write().unwrap().remove(edge);
        if !removed {
            return Err(GraphError::EdgeNotFound(edge.clone()));
        }
        if let Ok(node) = self.get_node(edge.source_node) {
            node.stop();
        }
        if let Ok(node) = self.get_node(edge.target_node) {
            node.stop();
        }
        tracing::info!(
            source = %edge.source_node, target = %edge.target_node,
            "edge deleted, both endpoints stopped"
        );
        Ok(())
    }

    pub fn list_nodes(&self) -> Vec<NodeId> {
        self.nodes.read().unwrap().keys().copied().collect()
    }

    pub fn list_edges(&self) -> Vec<Edge> {
        self.edges.read().unwrap().iter().cloned().collect()
    }

    /// Starts every node's worker. Bindings between producer outputs and
    /// consumer inputs are resolved here, by scanning `edges`, rather than
    /// at `create_edge` time — a node can be wired before its peer exists
    /// and the graph is free to add edges in any order.
    pub fn start_all(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let nodes = self.nodes.read().unwrap();
        let edges = self.edges.read().unwrap();
        for edge in edges.iter() {
            let Some(source) = nodes.get(&edge.source_node) else { continue };
            let Some(target) = nodes.get(&edge.target_node) else { continue };
            if let Some(channel) = source.component.output_channel(&edge.source_slot) {
                target.component.bind_input(&edge.target_slot, channel);
            }
        }
        for node in nodes.values() {
            Arc::clone(&node.component).start();
        }
        tracing::info!(node_count = nodes.len(), edge_count = edges.len(), "graph started");
    }

    pub fn stop_all(&self) {
        let nodes = self.nodes.read().unwrap();
        for node in nodes.values() {
            node.component.stop();
        }
        self.started.store(false, Ordering::SeqCst);
        tracing::info!("graph stopped");
    }

    pub fn collect_metrics(&self) -> GraphSnapshot {
        let nodes = self.nodes.read().unwrap();
        GraphSnapshot {
            nodes: nodes
                .values()
                .map(|n| (n.id, n.class_name.clone(), n.component.snapshot()))
                .collect(),
            edges: self.edges.read().unwrap().iter().cloned().collect(),
            timestamp: SystemTime::now(),
        }
    }
}

/// Point-in-time state of every node and edge in a [`Graph`], returned by
/// `collect_metrics` for the discovery/telemetry surface.
#[derive(Debug, Clone)]
pub struct GraphSnapshot {
    pub nodes: Vec<(NodeId, String, ComponentSnapshot)>,
    pub edges: Vec<Edge>,
    pub timestamp: SystemTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{Category, ComponentCore};
    use crate::frame::TypeDescriptor;
    use crate::registry::ComponentClassBuilder;

    struct Source {
        core: ComponentCore,
    }
    impl Component for Source {
        fn core(&self) -> &ComponentCore {
            &self.core
        }
        fn category(&self) -> Category {
            Category::Source
        }
        fn output_slots(&self) -> IndexMap<String, TypeDescriptor> {
            IndexMap::from([("out".to_string(), TypeDescriptor::Str)])
        }
        fn start(self: Arc<Self>) {
            let cancel = self.core.cancel_signal().clone();
            self.core.spawn(move || {
                while !cancel.is_tripped() {
                    std::thread::sleep(std::time::Duration::from_millis(5));
                }
            });
        }
    }

    struct Sink {
        core: ComponentCore,
    }
    impl Component for Sink {
        fn core(&self) -> &ComponentCore {
            &self.core
        }
        fn category(&self) -> Category {
            Category::Sink
        }
        fn input_slots(&self) -> IndexMap<String, TypeDescriptor> {
            IndexMap::from([("in".to_string(), TypeDescriptor::Str)])
        }
        fn start(self: Arc<Self>) {
            let cancel = self.core.cancel_signal().clone();
            self.core.spawn(move || {
                while !cancel.is_tripped() {
                    std::thread::sleep(std::time::Duration::from_millis(5));
                }
            });
        }
    }

    fn test_registry() -> Arc<Registry> {
        let mut registry = Registry::new();
        registry
            .register(ComponentClassBuilder::new("source").output_slot("out", TypeDescriptor::Str).build(|n, _| {
                Ok(Arc::new(Source { core: ComponentCore::new(n) }) as Arc<dyn Component>)
            }))
            .unwrap();
        registry
            .register(ComponentClassBuilder::new("sink").input_slot("in", TypeDescriptor::Str).build(|n, _| {
                Ok(Arc::new(Sink { core: ComponentCore::new(n) }) as Arc<dyn Component>)
            }))
            .unwrap();
        Arc::new(registry)
    }

    #[test]
    fn create_node_is_idempotent_by_name() {
        let graph = Graph::new(test_registry());
        let a = graph.create_node("source", "s1", &ComponentInit::new()).unwrap();
        let b = graph.create_node("source", "s1", &ComponentInit::new()).unwrap();
        assert_eq!(a, b);
        assert_eq!(graph.list_nodes().len(), 1);
    }

    #[test]
    fn edges_validate_slots_and_types() {
        let graph = Graph::new(test_registry());
        let src = graph.create_node("source", "s1", &ComponentInit::new()).unwrap();
        let sink = graph.create_node("sink", "k1", &ComponentInit::new()).unwrap();

        let err = graph
            .create_edge(Edge {
                source_node: src,
                source_slot: "missing".to_string(),
                target_node: sink,
                target_slot: "in".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, GraphError::SlotNotFound { .. }));

        graph
            .create_edge(Edge {
                source_node: src,
                source_slot: "out".to_string(),
                target_node: sink,
                target_slot: "in".to_string(),
            })
            .unwrap();

        let dup = graph.create_edge(Edge {
            source_node: src,
            source_slot: "out".to_string(),
            target_node: sink,
            target_slot: "in".to_string(),
        });
        assert!(matches!(dup, Err(GraphError::EdgeExists(_))));
    }

    #[test]
    fn second_producer_to_occupied_slot_is_rejected() {
        let graph = Graph::new(test_registry());
        let src1 = graph.create_node("source", "s1", &ComponentInit::new()).unwrap();
        let src2 = graph.create_node("source", "s2", &ComponentInit::new()).unwrap();
        let sink = graph.create_node("sink", "k1", &ComponentInit::new()).unwrap();

        graph
            .create_edge(Edge {
                source_node: src1,
                source_slot: "out".to_string(),
                target_node: sink,
                target_slot: "in".to_string(),
            })
            .unwrap();

        let err = graph
            .create_edge(Edge {
                source_node: src2,
                source_slot: "out".to_string(),
                target_node: sink,
                target_slot: "in".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, GraphError::SlotOccupied { .. }));
    }

    #[test]
    fn deleting_an_edge_stops_both_endpoints() {
        let graph = Graph::new(test_registry());
        let src = graph.create_node("source", "s1", &ComponentInit::new()).unwrap();
        let sink = graph.create_node("sink", "k1", &ComponentInit::new()).unwrap();
        let edge = Edge {
            source_node: src,
            source_slot: "out".to_string(),
            target_node: sink,
            target_slot: "in".to_string(),
        };
        graph.create_edge(edge.clone()).unwrap();
        graph.start_all();
        std::thread::sleep(std::time::Duration::from_millis(20));

        graph.delete_edge(&edge).unwrap();

        // `stop()` never joins (spec §5): the `Stopped` transition happens
        // asynchronously on each worker's own exit path, so poll rather
        // than asserting immediately after `delete_edge` returns.
        let deadline = std::time::Instant::now() + std::time::Duration::from_millis(500);
        let both_stopped = |g: &Graph| {
            g.get_node(src).unwrap().status() == crate::component::Status::Stopped
                && g.get_node(sink).unwrap().status() == crate::component::Status::Stopped
        };
        while !both_stopped(&graph) && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(both_stopped(&graph));
    }

    #[test]
    fn deleting_a_node_removes_its_edges() {
        let graph = Graph::new(test_registry());
        let src = graph.create_node("source", "s1", &ComponentInit::new()).unwrap();
        let sink = graph.create_node("sink", "k1", &ComponentInit::new()).unwrap();
        graph
            .create_edge(Edge {
                source_node: src,
                source_slot: "out".to_string(),
                target_node: sink,
                target_slot: "in".to_string(),
            })
            .unwrap();

        graph.delete_node(src).unwrap();
        assert!(graph.list_edges().is_empty());
        assert!(matches!(graph.get_node(src), Err(GraphError::NodeNotFound(_))));
    }
}
