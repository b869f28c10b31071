//! Static chain graphs built from raw text.
//!
//! A chain graph has one node per token and an edge from every token to the
//! next one. Learned-topology models start from it before any similarity
//! information is available.

use crate::{GraphData, NodeAttributes, Tokenizer};

/// Convert raw text into a chain graph.
///
/// The text is trimmed (and lower-cased when `lower_case` is set) before
/// tokenization. Node `i` carries token `i`; edges run `i -> i + 1`.
/// Text without tokens yields an empty graph.
pub fn raw_text_to_init_graph<T>(raw_text: &str, lower_case: bool, tokenizer: &T) -> GraphData
where
    T: Tokenizer + ?Sized,
{
    let text = if lower_case {
        raw_text.to_lowercase()
    } else {
        raw_text.to_string()
    };
    let tokens = tokenizer.tokenize(text.trim());
    chain_graph(&tokens)
}

/// Chain graph over an already tokenized sequence.
pub fn chain_graph<S: AsRef<str>>(tokens: &[S]) -> GraphData {
    let n = tokens.len();
    let mut graph = GraphData::with_capacity(n, n.saturating_sub(1));
    graph.add_path(
        tokens
            .iter()
            .map(|tok| NodeAttributes::with_token(tok.as_ref())),
    );
    tracing::debug!(nodes = n, "built chain graph");
    graph
}
