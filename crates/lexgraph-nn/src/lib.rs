// Allow minor clippy style warnings at crate level
#![allow(clippy::must_use_candidate)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]

//! Learned graph topology and graph neural networks on candle.
//!
//! `lexgraph-nn` turns node embeddings into weighted graphs and runs
//! message passing over them. It sits between the text/graph substrate
//! (`lexgraph-core`) and task code.
//!
//! # Modules
//!
//! - [`similarity`]: pairwise similarity metrics (attention, weighted cosine,
//!   GAT attention, RBF kernel, cosine)
//! - [`sparsify`]: top-k and epsilon neighbourhoods
//! - [`regularize`]: smoothness, connectivity and sparsity penalties
//! - [`construction`]: dynamic graph construction from raw text
//! - [`convert`]: dense adjacency <-> [`lexgraph_core::GraphData`]
//! - [`graphsage`], [`ggnn`]: graph encoders
//! - [`classification`]: node classifier
//! - [`kg_completion`]: DistMult / TransE heads (requires `kge` feature)
//!
//! # Example: topology from embeddings
//!
//! ```rust
//! use candle_nn::VarMap;
//! use lexgraph_nn::{
//!     DynamicGraphConstructionBase, DynamicGraphConstructionConfig, ExecutionContext,
//!     SimMetricType,
//! };
//!
//! let ctx = ExecutionContext::cpu(42);
//! let varmap = VarMap::new();
//! let config = DynamicGraphConstructionConfig::new(SimMetricType::Cosine).with_top_k(1);
//! let base = DynamicGraphConstructionBase::new(config, ctx.var_builder(&varmap))?;
//!
//! let emb = ctx.tensor_from_rows(&[vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]])?;
//! let sim = base.compute_similarity_metric(&emb, None)?;
//! let adj = base.sparsify_graph(&sim)?;
//! assert_eq!(adj.dims(), &[3, 3]);
//! # Ok::<(), lexgraph_nn::Error>(())
//! ```

pub mod classification;
pub mod construction;
mod context;
pub mod convert;
mod error;
pub mod ggnn;
pub mod graphsage;
#[cfg(feature = "kge")]
pub mod kg_completion;
pub mod ops;
pub mod regularize;
pub mod similarity;
pub mod sparsify;

pub use construction::{
    ConstructedGraph, DynamicGraphConstruction, DynamicGraphConstructionBase,
    DynamicGraphConstructionConfig, NodeEmbeddingGraphConstruction, TopologyOutput,
};
pub use context::ExecutionContext;
pub use convert::adj_to_graph;
pub use error::{Error, Result};
pub use regularize::{GraphRegularizer, RegularizationTerms};
pub use similarity::{pairwise_node_mask, SimMetricType, SimilarityMetric};
pub use sparsify::Sparsifier;
