use crate::{Error, Result};
use petgraph::graph::{DiGraph, EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::ops::Range;
use std::path::Path;

/// Per-node attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeAttributes {
    /// Source token, when the node was created from text.
    pub token: Option<String>,

    /// Free-form properties (POS tags, spans, ...).
    #[serde(default)]
    pub properties: HashMap<String, serde_json::Value>,
}

impl NodeAttributes {
    /// Attributes carrying only a token.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            properties: HashMap::new(),
        }
    }
}

/// Per-edge attributes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeAttributes {
    /// Learned or given edge weight. `None` means an unweighted edge.
    pub weight: Option<f32>,
}

/// A directed graph over densely numbered nodes `0..node_count()`.
///
/// Node indices are plain `usize` values so they line up with rows of node
/// feature tensors. Uses petgraph's `DiGraph` internally; nodes are never
/// removed, which keeps petgraph indices equal to positions.
///
/// # Example
///
/// ```rust
/// use lexgraph_core::GraphData;
///
/// let mut g = GraphData::new();
/// g.add_nodes(3);
/// g.add_edge(0, 1).unwrap();
/// g.add_weighted_edge(1, 2, 0.5).unwrap();
///
/// assert_eq!(g.edge_count(), 2);
/// assert_eq!(g.dense_adjacency(), vec![
///     0.0, 1.0, 0.0,
///     0.0, 0.0, 0.5,
///     0.0, 0.0, 0.0,
/// ]);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphData {
    graph: DiGraph<NodeAttributes, EdgeAttributes>,
}

impl GraphData {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
        }
    }

    /// Create a graph with estimated capacity.
    pub fn with_capacity(nodes: usize, edges: usize) -> Self {
        Self {
            graph: DiGraph::with_capacity(nodes, edges),
        }
    }

    /// Add `n` attribute-less nodes and return their index range.
    pub fn add_nodes(&mut self, n: usize) -> Range<usize> {
        let start = self.graph.node_count();
        for _ in 0..n {
            self.graph.add_node(NodeAttributes::default());
        }
        start..start + n
    }

    /// Add a single node.
    pub fn add_node(&mut self, attrs: NodeAttributes) -> usize {
        self.graph.add_node(attrs).index()
    }

    /// Append nodes linked in order by unweighted edges `i -> i + 1` and
    /// return their index range.
    pub fn add_path<I>(&mut self, nodes: I) -> Range<usize>
    where
        I: IntoIterator<Item = NodeAttributes>,
    {
        let start = self.graph.node_count();
        let mut prev: Option<NodeIndex> = None;
        for attrs in nodes {
            let idx = self.graph.add_node(attrs);
            if let Some(p) = prev {
                self.graph.add_edge(p, idx, EdgeAttributes::default());
            }
            prev = Some(idx);
        }
        start..self.graph.node_count()
    }

    /// Add an unweighted edge `src -> dst`.
    pub fn add_edge(&mut self, src: usize, dst: usize) -> Result<usize> {
        self.insert_edge(src, dst, EdgeAttributes::default())
    }

    /// Add a weighted edge `src -> dst`.
    pub fn add_weighted_edge(&mut self, src: usize, dst: usize, weight: f32) -> Result<usize> {
        self.insert_edge(src, dst, EdgeAttributes { weight: Some(weight) })
    }

    fn insert_edge(&mut self, src: usize, dst: usize, attrs: EdgeAttributes) -> Result<usize> {
        let s = self.node_index(src)?;
        let d = self.node_index(dst)?;
        Ok(self.graph.add_edge(s, d, attrs).index())
    }

    fn node_index(&self, index: usize) -> Result<NodeIndex> {
        let count = self.graph.node_count();
        if index < count {
            Ok(NodeIndex::new(index))
        } else {
            Err(Error::NodeOutOfRange { index, count })
        }
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Attributes of a node.
    pub fn node_attributes(&self, index: usize) -> Option<&NodeAttributes> {
        self.graph.node_weight(NodeIndex::new(index))
    }

    /// Mutable attributes of a node.
    pub fn node_attributes_mut(&mut self, index: usize) -> Result<&mut NodeAttributes> {
        let idx = self.node_index(index)?;
        Ok(&mut self.graph[idx])
    }

    /// Set the token of a node.
    pub fn set_token(&mut self, index: usize, token: impl Into<String>) -> Result<()> {
        self.node_attributes_mut(index)?.token = Some(token.into());
        Ok(())
    }

    /// Token of a node, if any.
    pub fn token(&self, index: usize) -> Option<&str> {
        self.node_attributes(index)?.token.as_deref()
    }

    /// Tokens of all nodes in index order (empty string for token-less nodes).
    pub fn tokens(&self) -> Vec<&str> {
        self.graph
            .node_weights()
            .map(|n| n.token.as_deref().unwrap_or(""))
            .collect()
    }

    /// Attributes of an edge by edge id.
    pub fn edge_attributes(&self, edge: usize) -> Option<&EdgeAttributes> {
        self.graph.edge_weight(EdgeIndex::new(edge))
    }

    /// All edges as `(src, dst, attrs)` in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize, &EdgeAttributes)> {
        self.graph
            .edge_references()
            .map(|e| (e.source().index(), e.target().index(), e.weight()))
    }

    /// Whether an edge `src -> dst` exists.
    pub fn has_edge(&self, src: usize, dst: usize) -> bool {
        if src >= self.node_count() || dst >= self.node_count() {
            return false;
        }
        self.graph
            .find_edge(NodeIndex::new(src), NodeIndex::new(dst))
            .is_some()
    }

    /// Number of edges ending at `index`.
    pub fn in_degree(&self, index: usize) -> usize {
        self.graph
            .edges_directed(NodeIndex::new(index), Direction::Incoming)
            .count()
    }

    /// Number of edges starting at `index`.
    pub fn out_degree(&self, index: usize) -> usize {
        self.graph
            .edges_directed(NodeIndex::new(index), Direction::Outgoing)
            .count()
    }

    /// Copy of this graph with every edge reversed.
    pub fn reverse(&self) -> Self {
        let mut graph = self.graph.clone();
        graph.reverse();
        Self { graph }
    }

    /// Row-major dense adjacency `A[src * n + dst]`.
    ///
    /// Unweighted edges count as `1.0`; parallel edges accumulate.
    pub fn dense_adjacency(&self) -> Vec<f32> {
        let n = self.node_count();
        let mut adj = vec![0.0f32; n * n];
        for (src, dst, attrs) in self.edges() {
            adj[src * n + dst] += attrs.weight.unwrap_or(1.0);
        }
        adj
    }

    /// Load from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Save to a JSON file.
    pub fn to_json_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer(writer, self)?;
        Ok(())
    }

    /// Get the underlying petgraph for advanced operations.
    pub fn as_petgraph(&self) -> &DiGraph<NodeAttributes, EdgeAttributes> {
        &self.graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_nodes_returns_range() {
        let mut g = GraphData::new();
        assert_eq!(g.add_nodes(3), 0..3);
        assert_eq!(g.add_nodes(2), 3..5);
        assert_eq!(g.node_count(), 5);
    }

    #[test]
    fn test_add_path_links_only_new_nodes() {
        let mut g = GraphData::new();
        g.add_nodes(1);
        let range = g.add_path(["x", "y", "z"].map(NodeAttributes::with_token));
        assert_eq!(range, 1..4);
        assert_eq!(g.edge_count(), 2);
        assert!(g.has_edge(1, 2) && g.has_edge(2, 3));
        assert!(!g.has_edge(0, 1));
        assert_eq!(g.token(3), Some("z"));
        assert_eq!(g.add_path(std::iter::empty()), 4..4);
    }

    #[test]
    fn test_edge_out_of_range() {
        let mut g = GraphData::new();
        g.add_nodes(2);
        let err = g.add_edge(0, 2).unwrap_err();
        assert!(matches!(err, Error::NodeOutOfRange { index: 2, count: 2 }));
    }

    #[test]
    fn test_degrees_and_reverse() {
        let mut g = GraphData::new();
        g.add_nodes(3);
        g.add_edge(0, 1).unwrap();
        g.add_edge(0, 2).unwrap();

        assert_eq!(g.out_degree(0), 2);
        assert_eq!(g.in_degree(0), 0);
        assert_eq!(g.in_degree(2), 1);

        let r = g.reverse();
        assert_eq!(r.in_degree(0), 2);
        assert!(r.has_edge(2, 0));
        assert!(!r.has_edge(0, 2));
    }

    #[test]
    fn test_tokens_default_to_empty() {
        let mut g = GraphData::new();
        g.add_nodes(2);
        g.set_token(1, "word").unwrap();
        assert_eq!(g.tokens(), vec!["", "word"]);
        assert!(g.set_token(5, "x").is_err());
    }

    #[test]
    fn test_json_roundtrip_keeps_weights() {
        let mut g = GraphData::new();
        g.add_node(NodeAttributes::with_token("a"));
        g.add_node(NodeAttributes::with_token("b"));
        g.add_weighted_edge(0, 1, 0.25).unwrap();

        let json = serde_json::to_string(&g).unwrap();
        let back: GraphData = serde_json::from_str(&json).unwrap();
        assert_eq!(back.token(1), Some("b"));
        assert_eq!(back.edge_attributes(0).unwrap().weight, Some(0.25));
    }
}
