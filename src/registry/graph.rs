//! Native conversion graph.
//!
//! Nodes are native type identities. `Upcast` edges come from declared bases
//! and implicit casts; `Convert` edges are native conversion functions. An
//! implicit conversion is valid when the source reaches the target through
//! zero or more upcasts followed by exactly one conversion.

use std::collections::VecDeque;

use petgraph::Direction;
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{EdgeFiltered, EdgeRef};
use rustc_hash::{FxHashMap, FxHashSet};
use tether_core::TypeHash;

/// Kind of a native conversion edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionEdge {
    /// Derived to base, a projection into embedded storage.
    Upcast,
    /// A value-producing native conversion.
    Convert,
}

#[derive(Debug, Default)]
pub struct ConversionGraph {
    graph: DiGraph<TypeHash, ConversionEdge>,
    nodes: FxHashMap<TypeHash, NodeIndex>,
}

impl ConversionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn node(&mut self, hash: TypeHash) -> NodeIndex {
        *self
            .nodes
            .entry(hash)
            .or_insert_with(|| self.graph.add_node(hash))
    }

    fn has_edge(&self, from: NodeIndex, to: NodeIndex, kind: ConversionEdge) -> bool {
        self.graph
            .edges_connecting(from, to)
            .any(|edge| *edge.weight() == kind)
    }

    /// Whether `from` reaches `to` over upcast edges alone.
    pub fn upcasts_to(&self, from: TypeHash, to: TypeHash) -> bool {
        let (Some(&from), Some(&to)) = (self.nodes.get(&from), self.nodes.get(&to)) else {
            return from == to;
        };
        let upcasts = EdgeFiltered::from_fn(&self.graph, |edge| {
            *edge.weight() == ConversionEdge::Upcast
        });
        has_path_connecting(&upcasts, from, to, None)
    }

    /// Add an upcast edge. Returns `false`, leaving the graph unchanged, when
    /// the edge would close a cycle.
    pub fn add_upcast(&mut self, derived: TypeHash, base: TypeHash) -> bool {
        if self.upcasts_to(base, derived) {
            return false;
        }
        let from = self.node(derived);
        let to = self.node(base);
        if !self.has_edge(from, to, ConversionEdge::Upcast) {
            self.graph.add_edge(from, to, ConversionEdge::Upcast);
        }
        true
    }

    pub fn add_convert(&mut self, from: TypeHash, to: TypeHash) {
        let from = self.node(from);
        let to = self.node(to);
        if !self.has_edge(from, to, ConversionEdge::Convert) {
            self.graph.add_edge(from, to, ConversionEdge::Convert);
        }
    }

    /// Shortest upcast chain from `from` to a type with a conversion into `to`.
    ///
    /// The returned chain starts with `from` and ends with the type whose
    /// conversion is used.
    pub fn conversion_path(&self, from: TypeHash, to: TypeHash) -> Option<Vec<TypeHash>> {
        let target = *self.nodes.get(&to)?;
        self.search(from, |node| {
            self.has_edge(node, target, ConversionEdge::Convert)
        })
    }

    /// Shortest upcast chain from `from` to `to`, both ends included.
    pub fn upcast_path(&self, from: TypeHash, to: TypeHash) -> Option<Vec<TypeHash>> {
        let target = *self.nodes.get(&to)?;
        self.search(from, |node| node == target)
    }

    /// Breadth-first walk over upcast edges.
    fn search(&self, from: TypeHash, found: impl Fn(NodeIndex) -> bool) -> Option<Vec<TypeHash>> {
        let start = *self.nodes.get(&from)?;
        let mut queue = VecDeque::from([start]);
        let mut seen = FxHashSet::from_iter([start]);
        let mut previous: FxHashMap<NodeIndex, NodeIndex> = FxHashMap::default();

        while let Some(node) = queue.pop_front() {
            if found(node) {
                return Some(self.chain(start, node, &previous));
            }
            for edge in self.graph.edges_directed(node, Direction::Outgoing) {
                if *edge.weight() == ConversionEdge::Upcast && seen.insert(edge.target()) {
                    previous.insert(edge.target(), node);
                    queue.push_back(edge.target());
                }
            }
        }
        None
    }

    fn chain(
        &self,
        start: NodeIndex,
        end: NodeIndex,
        previous: &FxHashMap<NodeIndex, NodeIndex>,
    ) -> Vec<TypeHash> {
        let mut chain = vec![self.graph[end]];
        let mut node = end;
        while node != start {
            match previous.get(&node) {
                Some(&prev) => {
                    chain.push(self.graph[prev]);
                    node = prev;
                }
                None => break,
            }
        }
        chain.reverse();
        chain
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}
