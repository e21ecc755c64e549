//! Audio Graph
//!
//! Arena of processing nodes and the directed connections between them.
//! The graph is shared between the mutation path (chains and strips) and
//! the render path; connection edits made inside `rewire` are applied under
//! a single write lock, so a render never observes a half-rebuilt chain.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::debug;

use super::node::ProcessingNode;
use super::nodes::Junction;

/// Stable handle of a node inside an `AudioGraph`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

struct NodeSlot {
    node: Box<dyn ProcessingNode>,
    outputs: Vec<NodeId>,
}

/// Node arena plus connection lists; mutated through `AudioGraph::rewire`
pub struct Topology {
    nodes: HashMap<NodeId, NodeSlot>,
    next_id: u64,
}

impl Topology {
    fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            next_id: 0,
        }
    }

    fn insert(&mut self, node: Box<dyn ProcessingNode>) -> NodeId {
        let id = NodeId(self.next_id);
        self.next_id += 1;
        self.nodes.insert(
            id,
            NodeSlot {
                node,
                outputs: Vec::new(),
            },
        );
        id
    }

    /// Connect `from` to `to`
    ///
    /// Returns false if either node is unknown or the edge already exists;
    /// an edge is never stored twice.
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> bool {
        if !self.nodes.contains_key(&to) {
            return false;
        }
        match self.nodes.get_mut(&from) {
            Some(slot) if !slot.outputs.contains(&to) => {
                slot.outputs.push(to);
                true
            }
            _ => false,
        }
    }

    /// Remove the single edge `from -> to` if present
    pub fn disconnect(&mut self, from: NodeId, to: NodeId) {
        if let Some(slot) = self.nodes.get_mut(&from) {
            slot.outputs.retain(|&out| out != to);
        }
    }

    /// Remove every outgoing edge of `from`
    pub fn disconnect_outputs(&mut self, from: NodeId) {
        if let Some(slot) = self.nodes.get_mut(&from) {
            slot.outputs.clear();
        }
    }

    pub fn outputs(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(&id)
            .map(|slot| slot.outputs.as_slice())
            .unwrap_or(&[])
    }

    pub fn incoming_count(&self, id: NodeId) -> usize {
        self.nodes
            .values()
            .filter(|slot| slot.outputs.contains(&id))
            .count()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn remove(&mut self, id: NodeId) -> Option<Box<dyn ProcessingNode>> {
        let slot = self.nodes.remove(&id)?;
        for other in self.nodes.values_mut() {
            other.outputs.retain(|&out| out != id);
        }
        Some(slot.node)
    }
}

/// Shared handle onto the audio graph
#[derive(Clone)]
pub struct AudioGraph {
    inner: Arc<RwLock<Topology>>,
    destination: NodeId,
}

impl AudioGraph {
    /// Create a graph holding only the final output node
    pub fn new() -> Self {
        let mut topology = Topology::new();
        let destination = topology.insert(Box::new(Junction::new("destination")));
        Self {
            inner: Arc::new(RwLock::new(topology)),
            destination,
        }
    }

    /// The final (hardware) output node
    pub fn destination(&self) -> NodeId {
        self.destination
    }

    fn read(&self) -> RwLockReadGuard<'_, Topology> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Topology> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a node; the caller owns it until `remove_node`
    pub fn add_node(&self, node: Box<dyn ProcessingNode>) -> NodeId {
        let id = self.write().insert(node);
        debug!("added {}", id);
        id
    }

    /// Drop a node and every edge touching it
    pub fn remove_node(&self, id: NodeId) -> bool {
        if id == self.destination {
            return false;
        }
        let removed = self.write().remove(id);
        if removed.is_some() {
            debug!("removed {}", id);
        }
        removed.is_some()
    }

    pub fn connect(&self, from: NodeId, to: NodeId) -> bool {
        self.write().connect(from, to)
    }

    pub fn disconnect_outputs(&self, from: NodeId) {
        self.write().disconnect_outputs(from);
    }

    /// Apply a batch of connection edits under one write lock
    pub fn rewire<R>(&self, edit: impl FnOnce(&mut Topology) -> R) -> R {
        let mut topology = self.write();
        edit(&mut topology)
    }

    pub fn outputs(&self, id: NodeId) -> Vec<NodeId> {
        self.read().outputs(id).to_vec()
    }

    pub fn incoming_count(&self, id: NodeId) -> usize {
        self.read().incoming_count(id)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.read().contains(id)
    }

    pub fn node_count(&self) -> usize {
        self.read().nodes.len()
    }

    /// Kind string of a node, if it exists
    pub fn node_kind(&self, id: NodeId) -> Option<String> {
        self.read()
            .nodes
            .get(&id)
            .map(|slot| slot.node.kind().to_string())
    }

    /// Run `f` against a live node
    pub fn with_node_mut<R>(
        &self,
        id: NodeId,
        f: impl FnOnce(&mut dyn ProcessingNode) -> R,
    ) -> Option<R> {
        let mut topology = self.write();
        topology.nodes.get_mut(&id).map(|slot| f(slot.node.as_mut()))
    }

    /// Follow single outgoing edges from `from` until `to`
    ///
    /// Returns the visited nodes (both ends included), or `None` when the
    /// walk hits a fork, a dead end, or a cycle before reaching `to`.
    pub fn walk(&self, from: NodeId, to: NodeId) -> Option<Vec<NodeId>> {
        let topology = self.read();
        if !topology.contains(from) {
            return None;
        }
        let mut path = vec![from];
        let mut seen = HashSet::from([from]);
        let mut current = from;
        while current != to {
            let next = match topology.outputs(current) {
                [only] => *only,
                _ => return None,
            };
            if !seen.insert(next) {
                return None;
            }
            path.push(next);
            current = next;
        }
        Some(path)
    }

    /// Render a block along the path starting at `from`
    ///
    /// Each node is processed in turn, following its first output, and the
    /// walk halts before `stop` or after a node with no outputs. Returns the
    /// node where rendering stopped.
    pub fn process_path(&self, from: NodeId, stop: NodeId, block: &mut [f32]) -> NodeId {
        let mut topology = self.write();
        let limit = topology.nodes.len();
        let mut current = from;
        for _ in 0..limit {
            if current == stop {
                break;
            }
            let Some(slot) = topology.nodes.get_mut(&current) else {
                break;
            };
            slot.node.process(block);
            match slot.outputs.first() {
                Some(&next) => current = next,
                None => break,
            }
        }
        current
    }

    /// Reset the internal state of every node
    pub fn reset_all(&self) {
        for slot in self.write().nodes.values_mut() {
            slot.node.reset();
        }
    }
}

impl Default for AudioGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AudioGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioGraph")
            .field("nodes", &self.node_count())
            .field("destination", &self.destination)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GainStage;

    fn junction(graph: &AudioGraph, label: &str) -> NodeId {
        graph.add_node(Box::new(Junction::new(label)))
    }

    #[test]
    fn test_connect_never_duplicates() {
        let graph = AudioGraph::new();
        let a = junction(&graph, "a");
        let b = junction(&graph, "b");

        assert!(graph.connect(a, b));
        assert!(!graph.connect(a, b));
        assert_eq!(graph.outputs(a), vec![b]);
        assert_eq!(graph.incoming_count(b), 1);
    }

    #[test]
    fn test_remove_node_drops_edges() {
        let graph = AudioGraph::new();
        let a = junction(&graph, "a");
        let b = junction(&graph, "b");
        let c = junction(&graph, "c");
        graph.connect(a, b);
        graph.connect(b, c);

        assert!(graph.remove_node(b));
        assert!(graph.outputs(a).is_empty());
        assert_eq!(graph.incoming_count(c), 0);
        assert!(!graph.remove_node(graph.destination()));
    }

    #[test]
    fn test_walk() {
        let graph = AudioGraph::new();
        let a = junction(&graph, "a");
        let b = junction(&graph, "b");
        let c = junction(&graph, "c");
        graph.rewire(|t| {
            t.connect(a, b);
            t.connect(b, c);
        });

        assert_eq!(graph.walk(a, c), Some(vec![a, b, c]));

        // fork
        graph.connect(b, a);
        assert_eq!(graph.walk(a, c), None);
    }

    #[test]
    fn test_walk_detects_cycle() {
        let graph = AudioGraph::new();
        let a = junction(&graph, "a");
        let b = junction(&graph, "b");
        let c = junction(&graph, "c");
        graph.connect(a, b);
        graph.connect(b, a);
        assert_eq!(graph.walk(a, c), None);
    }

    #[test]
    fn test_process_path_stops_before_stop() {
        let graph = AudioGraph::new();
        let a = graph.add_node(Box::new(GainStage::new(0.5, 1)));
        let b = graph.add_node(Box::new(GainStage::new(0.5, 1)));
        let c = graph.add_node(Box::new(GainStage::new(0.0, 1)));
        graph.connect(a, b);
        graph.connect(b, c);

        let mut block = [1.0_f32; 4];
        let reached = graph.process_path(a, c, &mut block);

        assert_eq!(reached, c);
        assert!(block.iter().all(|&s| (s - 0.25).abs() < 1e-6));
    }
}
