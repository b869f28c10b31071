//! Graph sparsification.
//!
//! Turns a dense similarity matrix into a sparse weighted adjacency. The two
//! strategies treat dropped cells differently:
//!
//! - **top-k** keeps the `k` largest entries per row and *replaces* every
//!   other entry with the mask-off value;
//! - **epsilon** keeps entries strictly above a threshold and *blends* the
//!   rest: `a * m + mask_off * (1 - m)` with `m = (a > eps)` held constant.

use crate::ops::full_like;
use crate::{Error, Result};
use candle_core::{DType, Tensor};
use serde::{Deserialize, Serialize};

/// Sparsification strategy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sparsifier {
    /// Keep the dense matrix.
    #[default]
    None,
    /// kNN neighbourhood: keep the k largest entries of each row.
    TopK(usize),
    /// Epsilon neighbourhood: keep entries greater than the threshold.
    Epsilon(f64),
}

impl Sparsifier {
    /// Build from the two optional knobs; at most one may be set.
    pub fn from_options(top_k_neigh: Option<usize>, epsilon_neigh: Option<f64>) -> Result<Self> {
        match (top_k_neigh, epsilon_neigh) {
            (Some(_), Some(_)) => Err(Error::InvalidConfig(
                "top_k_neigh and epsilon_neigh cannot be activated at the same time".into(),
            )),
            (Some(k), None) => Ok(Sparsifier::TopK(k)),
            (None, Some(eps)) => Ok(Sparsifier::Epsilon(eps)),
            (None, None) => Ok(Sparsifier::None),
        }
    }

    /// Apply to `adj` (any rank >= 1; rows are along the last dimension).
    pub fn apply(&self, adj: &Tensor, mask_off_val: f64) -> Result<Tensor> {
        match *self {
            Sparsifier::None => Ok(adj.clone()),
            Sparsifier::TopK(k) => knn_neighbourhood(adj, k, mask_off_val),
            Sparsifier::Epsilon(eps) => epsilon_neighbourhood(adj, eps, mask_off_val),
        }
    }
}

/// Keep the `k` largest values in each row, `mask_off_val` elsewhere.
///
/// `k` is clipped to the row length. Among equal values the arg-sort order
/// decides which survive; the result is always a valid top-k set.
pub fn knn_neighbourhood(attention: &Tensor, k: usize, mask_off_val: f64) -> Result<Tensor> {
    let ncols = attention.dims().last().copied().unwrap_or(0);
    if ncols == 0 {
        return Ok(attention.clone());
    }
    if k > ncols {
        tracing::warn!(k, ncols, "top_k_neigh exceeds row length, clipping");
    }
    let k = k.min(ncols);
    let nrows = attention.elem_count() / ncols;

    let mut keep = vec![0u8; nrows * ncols];
    if k > 0 {
        let order = attention
            .reshape((nrows, ncols))?
            .contiguous()?
            .arg_sort_last_dim(false)?
            .narrow(1, 0, k)?
            .to_vec2::<u32>()?;
        for (row, cols) in order.iter().enumerate() {
            for &col in cols {
                keep[row * ncols + col as usize] = 1;
            }
        }
    }

    let keep = Tensor::from_vec(keep, attention.shape(), attention.device())?;
    let fill = full_like(attention, mask_off_val)?;
    Ok(keep.where_cond(attention, &fill)?)
}

/// Keep values strictly greater than `epsilon`, blend the rest towards
/// `mask_off_val`.
pub fn epsilon_neighbourhood(attention: &Tensor, epsilon: f64, mask_off_val: f64) -> Result<Tensor> {
    let mask = attention.gt(epsilon)?.to_dtype(attention.dtype())?.detach();
    let off = mask.affine(-mask_off_val, mask_off_val)?;
    Ok(((attention * &mask)? + off)?)
}

/// Count entries per row that differ from `mask_off_val`.
pub fn row_edge_counts(adj: &Tensor, mask_off_val: f64) -> Result<Vec<usize>> {
    let ncols = adj.dims().last().copied().unwrap_or(0);
    if ncols == 0 {
        return Ok(Vec::new());
    }
    let nrows = adj.elem_count() / ncols;
    let kept = adj
        .ne(mask_off_val)?
        .to_dtype(DType::U32)?
        .reshape((nrows, ncols))?
        .sum(1)?
        .to_vec1::<u32>()?;
    Ok(kept.into_iter().map(|c| c as usize).collect())
}
