//! Error types for lexgraph-nn.

use thiserror::Error;

/// lexgraph-nn error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Graph container error.
    #[error("graph error: {0}")]
    Graph(#[from] lexgraph_core::Error),

    /// Dimension mismatch.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Invalid configuration, raised at construction time.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Index outside a lookup table.
    #[error("index {index} out of range for {len} rows")]
    IndexOutOfRange { index: usize, len: usize },

    /// Nothing to build a graph from.
    #[error("empty input: {0}")]
    EmptyInput(String),

    /// A companion tensor the computation needs was not supplied.
    #[error("missing tensor: {0}")]
    MissingTensor(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
