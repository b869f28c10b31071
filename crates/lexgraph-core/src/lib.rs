// Allow minor clippy style warnings at crate level
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_precision_loss)]

//! Tensor-free substrate for lexgraph.
//!
//! - [`GraphData`] - directed graph with per-node token attributes and
//!   optional per-edge weights, the exchange format between graph
//!   construction and message passing
//! - [`Tokenizer`] / [`WordTokenizer`] - raw text to token sequence
//! - [`Vocab`] - token <-> id mapping with padding and unknown entries
//! - [`chain::raw_text_to_init_graph`] - sequential token graph used to
//!   bootstrap topology learning
//!
//! # Example
//!
//! ```rust
//! use lexgraph_core::{chain::raw_text_to_init_graph, WordTokenizer};
//!
//! let graph = raw_text_to_init_graph("The cat sat.", true, &WordTokenizer);
//!
//! assert_eq!(graph.node_count(), 4);
//! assert_eq!(graph.edge_count(), 3);
//! assert_eq!(graph.token(0), Some("the"));
//! ```

pub mod chain;
mod error;
mod graph;
mod tokenize;
mod vocab;

pub use error::{Error, Result};
pub use graph::{EdgeAttributes, GraphData, NodeAttributes};
pub use tokenize::{Tokenizer, WhitespaceTokenizer, WordTokenizer};
pub use vocab::{Vocab, PAD_TOKEN, UNK_TOKEN};

// Re-export petgraph for callers that want graph algorithms on GraphData
pub use petgraph;
