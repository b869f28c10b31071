//! Word vocabulary.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Padding token, always id 0.
pub const PAD_TOKEN: &str = "<P>";
/// Unknown-word token, always id 1.
pub const UNK_TOKEN: &str = "<UNK>";

/// Bidirectional token <-> id mapping.
///
/// Ids are dense: `0..len()`. Ids 0 and 1 are reserved for [`PAD_TOKEN`]
/// and [`UNK_TOKEN`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vocab {
    index_to_token: Vec<String>,
    #[serde(skip, default)]
    token_to_index: HashMap<String, usize>,
}

impl Default for Vocab {
    fn default() -> Self {
        Self::new()
    }
}

impl Vocab {
    /// Vocabulary holding only the reserved tokens.
    pub fn new() -> Self {
        let mut vocab = Self {
            index_to_token: Vec::new(),
            token_to_index: HashMap::new(),
        };
        vocab.add_token(PAD_TOKEN);
        vocab.add_token(UNK_TOKEN);
        vocab
    }

    /// Build from a token stream, keeping tokens seen at least `min_freq` times.
    ///
    /// Tokens are added in order of descending frequency, ties by first
    /// appearance, so the mapping is deterministic.
    pub fn from_tokens<I, S>(tokens: I, min_freq: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
        for (pos, tok) in tokens.into_iter().enumerate() {
            let entry = counts.entry(tok.as_ref().to_string()).or_insert((0, pos));
            entry.0 += 1;
        }
        let mut ordered: Vec<(String, (usize, usize))> = counts
            .into_iter()
            .filter(|(_, (count, _))| *count >= min_freq)
            .collect();
        ordered.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));

        let mut vocab = Self::new();
        for (tok, _) in ordered {
            vocab.add_token(&tok);
        }
        tracing::debug!(size = vocab.len(), min_freq, "built vocabulary");
        vocab
    }

    /// Add a token, returning its id (existing id if already present).
    pub fn add_token(&mut self, token: &str) -> usize {
        if let Some(&id) = self.token_to_index.get(token) {
            return id;
        }
        let id = self.index_to_token.len();
        self.index_to_token.push(token.to_string());
        self.token_to_index.insert(token.to_string(), id);
        id
    }

    /// Id of a token, falling back to the unknown id.
    pub fn get_id(&self, token: &str) -> usize {
        self.token_to_index.get(token).copied().unwrap_or(1)
    }

    /// Whether a token is in the vocabulary.
    pub fn contains(&self, token: &str) -> bool {
        self.token_to_index.contains_key(token)
    }

    /// Token for an id.
    pub fn get_token(&self, id: usize) -> Result<&str> {
        self.index_to_token
            .get(id)
            .map(String::as_str)
            .ok_or(Error::UnknownTokenId(id))
    }

    /// Map a token sequence to ids.
    pub fn to_ids<S: AsRef<str>>(&self, tokens: &[S]) -> Vec<u32> {
        tokens.iter().map(|t| self.get_id(t.as_ref()) as u32).collect()
    }

    /// Number of entries, reserved tokens included.
    pub fn len(&self) -> usize {
        self.index_to_token.len()
    }

    /// Always false: the reserved tokens are present.
    pub fn is_empty(&self) -> bool {
        self.index_to_token.is_empty()
    }

    fn rebuild_index(&mut self) {
        self.token_to_index = self
            .index_to_token
            .iter()
            .enumerate()
            .map(|(i, t)| (t.clone(), i))
            .collect();
    }

    /// Load from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut vocab: Self = serde_json::from_str(&text)?;
        vocab.rebuild_index();
        Ok(vocab)
    }

    /// Save to a JSON file.
    pub fn to_json_file(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }
}
