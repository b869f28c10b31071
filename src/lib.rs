//! `lexgraph` bundles the text-graph substrate and the learned-topology
//! layers behind one dependency.
//!
//! - [`core`]: graphs, tokenization, vocabularies, chain graphs
//! - [`nn`]: similarity, sparsification, regularization, dynamic graph
//!   construction, GraphSAGE, GGNN and task heads
//!
//! # Example
//!
//! ```rust
//! use lexgraph::chain::raw_text_to_init_graph;
//! use lexgraph::WordTokenizer;
//!
//! let graph = raw_text_to_init_graph("Graphs from text.", true, &WordTokenizer);
//! assert_eq!(graph.node_count(), 4);
//! assert_eq!(graph.edge_count(), 3);
//! ```

pub use lexgraph_core as core;
pub use lexgraph_nn as nn;

pub use lexgraph_core::{chain, GraphData, Tokenizer, Vocab, WhitespaceTokenizer, WordTokenizer};
pub use lexgraph_nn::{
    adj_to_graph, ConstructedGraph, DynamicGraphConstruction, DynamicGraphConstructionBase,
    DynamicGraphConstructionConfig, ExecutionContext, NodeEmbeddingGraphConstruction,
    SimMetricType,
};
