//! Document graph backed by petgraph.
//!
//! One node per chunk, ids equal to insertion position. At most one edge per
//! node pair: the first edge established between two nodes is kept, later
//! ones are rejected.

use std::collections::BTreeMap;

use petgraph::graph::{NodeIndex, UnGraph};
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use regrag_core::chunk::TABLE_KEY;
use regrag_core::DocumentChunk;

pub type NodeId = usize;
pub type CommunityId = u32;

/// A document chunk stored in the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub content: String,
    pub metadata: BTreeMap<String, String>,
    pub embedding: Option<Vec<f32>>,
    pub community_id: Option<CommunityId>,
}

impl Node {
    pub fn is_table(&self) -> bool {
        self.metadata
            .get(TABLE_KEY)
            .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(false)
    }

    pub fn meta(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EdgeKind {
    /// Consecutive chunks of the same source file.
    Structural,
    /// Chunks sharing the value of a taxonomy field.
    Metadata(String),
    /// Chunks whose embeddings are near neighbours.
    Semantic,
}

impl EdgeKind {
    pub fn label(&self) -> &str {
        match self {
            EdgeKind::Structural => "structural",
            EdgeKind::Metadata(_) => "metadata",
            EdgeKind::Semantic => "semantic",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub kind: EdgeKind,
    pub weight: f32,
}

/// Flat edge representation used for persistence and comparison.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub a: NodeId,
    pub b: NodeId,
    pub kind: EdgeKind,
    pub weight: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
    pub structural_edges: usize,
    pub metadata_edges: usize,
    pub semantic_edges: usize,
    pub embedded_nodes: usize,
    pub communities: usize,
}

/// In-memory document graph.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    inner: UnGraph<Node, Edge>,
}

impl Graph {
    pub fn new() -> Self {
        Self {
            inner: UnGraph::new_undirected(),
        }
    }

    /// Append a node for `chunk`; its id is its position.
    pub fn add_chunk(&mut self, chunk: DocumentChunk) -> NodeId {
        let id = self.inner.node_count();
        let idx = self.inner.add_node(Node {
            id,
            content: chunk.content,
            metadata: chunk.metadata,
            embedding: None,
            community_id: None,
        });
        debug_assert_eq!(idx.index(), id);
        id
    }

    /// Re-insert a node as persisted; ids must arrive in order.
    pub(crate) fn push_node(&mut self, node: Node) -> NodeId {
        debug_assert_eq!(node.id, self.inner.node_count(), "node ids must be dense");
        self.inner.add_node(node).index()
    }

    /// Add an undirected edge. Returns false for self-loops, unknown nodes
    /// or when the pair is already connected.
    pub fn add_edge(&mut self, a: NodeId, b: NodeId, kind: EdgeKind, weight: f32) -> bool {
        if a == b || a >= self.node_count() || b >= self.node_count() {
            return false;
        }
        if kind == EdgeKind::Semantic {
            debug_assert!((-1e-4..=1.0 + 1e-4).contains(&weight), "semantic weight {}", weight);
        }
        let (ia, ib) = (NodeIndex::new(a), NodeIndex::new(b));
        if self.inner.find_edge(ia, ib).is_some() {
            return false;
        }
        self.inner.add_edge(ia, ib, Edge { kind, weight: weight.clamp(0.0, 1.0) });
        true
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.inner.node_weight(NodeIndex::new(id))
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.inner.node_weight_mut(NodeIndex::new(id))
    }

    /// All nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.inner.node_weights()
    }

    pub fn node_count(&self) -> usize {
        self.inner.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.inner.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.node_count() == 0
    }

    pub fn set_embedding(&mut self, id: NodeId, embedding: Option<Vec<f32>>) {
        if let Some(node) = self.node_mut(id) {
            node.embedding = embedding;
        }
    }

    pub fn set_community(&mut self, id: NodeId, community: CommunityId) {
        if let Some(node) = self.node_mut(id) {
            node.community_id = Some(community);
        }
    }

    pub fn embedding(&self, id: NodeId) -> Option<&[f32]> {
        self.node(id).and_then(|n| n.embedding.as_deref())
    }

    /// Neighbours of `id` with the connecting edge.
    pub fn neighbors(&self, id: NodeId) -> impl Iterator<Item = (NodeId, &Edge)> + '_ {
        let idx = NodeIndex::new(id);
        self.inner.edges(idx).map(move |e| {
            let other = if e.source() == idx { e.target() } else { e.source() };
            (other.index(), e.weight())
        })
    }

    pub fn degree(&self, id: NodeId) -> usize {
        self.inner.edges(NodeIndex::new(id)).count()
    }

    /// Sum of incident edge weights.
    pub fn weighted_degree(&self, id: NodeId) -> f64 {
        self.inner
            .edges(NodeIndex::new(id))
            .map(|e| e.weight().weight as f64)
            .sum()
    }

    pub fn edge_between(&self, a: NodeId, b: NodeId) -> Option<&Edge> {
        if a >= self.node_count() || b >= self.node_count() {
            return None;
        }
        self.inner
            .find_edge(NodeIndex::new(a), NodeIndex::new(b))
            .and_then(|e| self.inner.edge_weight(e))
    }

    /// All edges with `a < b`, sorted by (a, b).
    pub fn edge_records(&self) -> Vec<EdgeRecord> {
        let mut records: Vec<EdgeRecord> = self
            .inner
            .edge_references()
            .map(|e| {
                let (s, t) = (e.source().index(), e.target().index());
                EdgeRecord {
                    a: s.min(t),
                    b: s.max(t),
                    kind: e.weight().kind.clone(),
                    weight: e.weight().weight,
                }
            })
            .collect();
        records.sort_by(|x, y| (x.a, x.b).cmp(&(y.a, y.b)));
        records
    }

    pub fn stats(&self) -> GraphStats {
        let mut stats = GraphStats {
            node_count: self.node_count(),
            edge_count: self.edge_count(),
            ..Default::default()
        };
        for edge in self.inner.edge_weights() {
            match edge.kind {
                EdgeKind::Structural => stats.structural_edges += 1,
                EdgeKind::Metadata(_) => stats.metadata_edges += 1,
                EdgeKind::Semantic => stats.semantic_edges += 1,
            }
        }
        let mut communities = std::collections::BTreeSet::new();
        for node in self.nodes() {
            if node.embedding.is_some() {
                stats.embedded_nodes += 1;
            }
            if let Some(c) = node.community_id {
                communities.insert(c);
            }
        }
        stats.communities = communities.len();
        stats
    }
}

impl PartialEq for Graph {
    fn eq(&self, other: &Self) -> bool {
        self.node_count() == other.node_count()
            && self.nodes().zip(other.nodes()).all(|(a, b)| a == b)
            && self.edge_records() == other.edge_records()
    }
}
