//! Node classification head.

use crate::ops::Activation;
use crate::{Error, Result};
use candle_core::{Tensor, D};
use candle_nn::{linear, Linear, Module, VarBuilder};

/// Feed-forward classifier over node embeddings.
///
/// `input -> hidden_1 -> ... -> num_class`, with the activation between
/// layers and raw logits at the output.
pub struct FeedForwardNodeClassifier {
    layers: Vec<Linear>,
    activation: Activation,
    num_class: usize,
}

impl FeedForwardNodeClassifier {
    pub fn new(
        input_size: usize,
        num_class: usize,
        hidden_sizes: &[usize],
        activation: Activation,
        vb: VarBuilder,
    ) -> Result<Self> {
        if input_size == 0 || num_class == 0 {
            return Err(Error::InvalidConfig(
                "classifier sizes must be positive".into(),
            ));
        }
        let mut layers = Vec::with_capacity(hidden_sizes.len() + 1);
        let mut in_size = input_size;
        for (i, &h) in hidden_sizes.iter().enumerate() {
            layers.push(linear(in_size, h, vb.pp(format!("layers.{i}")))?);
            in_size = h;
        }
        layers.push(linear(
            in_size,
            num_class,
            vb.pp(format!("layers.{}", hidden_sizes.len())),
        )?);
        Ok(Self {
            layers,
            activation,
            num_class,
        })
    }

    pub fn num_class(&self) -> usize {
        self.num_class
    }

    /// Logits `(L, num_class)` for the nodes in `node_idx`, or `(N, num_class)`
    /// for every node when no index is given.
    pub fn forward(&self, node_emb: &Tensor, node_idx: Option<&[u32]>) -> Result<Tensor> {
        let mut h = match node_idx {
            Some(idx) => select_rows(node_emb, idx)?,
            None => node_emb.clone(),
        };
        let last = self.layers.len() - 1;
        for (i, layer) in self.layers.iter().enumerate() {
            h = layer.forward(&h)?;
            if i < last {
                h = self.activation.apply(&h)?;
            }
        }
        Ok(h)
    }

    /// Index of the highest logit per selected node.
    pub fn predict(&self, node_emb: &Tensor, node_idx: Option<&[u32]>) -> Result<Vec<u32>> {
        Ok(self
            .forward(node_emb, node_idx)?
            .argmax(D::Minus1)?
            .to_vec1::<u32>()?)
    }
}

/// Rows `idx` of a `(N, D)` tensor, with bounds checking.
pub(crate) fn select_rows(xs: &Tensor, idx: &[u32]) -> Result<Tensor> {
    let len = xs.dim(0)?;
    if let Some(&bad) = idx.iter().find(|&&i| i as usize >= len) {
        return Err(Error::IndexOutOfRange {
            index: bad as usize,
            len,
        });
    }
    let ids = Tensor::new(idx, xs.device())?;
    Ok(xs.index_select(&ids, 0)?)
}
