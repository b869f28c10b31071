//! Error types for lexgraph-core.

use thiserror::Error;

/// Error type for graph and vocabulary operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A node index outside the graph.
    #[error("node {index} out of range (graph has {count} nodes)")]
    NodeOutOfRange { index: usize, count: usize },

    /// Token id outside the vocabulary.
    #[error("token id {0} not in vocabulary")]
    UnknownTokenId(usize),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type for lexgraph-core operations.
pub type Result<T> = std::result::Result<T, Error>;
