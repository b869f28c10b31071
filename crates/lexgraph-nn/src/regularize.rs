//! Graph regularization losses.
//!
//! Penalties on a learned adjacency `A` (N x N) given node features `X`:
//!
//! ```text
//! smoothness   =  ratio / N^2 * tr(X^T (D - A) X)
//! connectivity = -ratio / N   * 1^T log(A 1 + eps)
//! sparsity     =  ratio / N^2 * ||A||_F^2
//! ```
//!
//! where `D = diag(A 1)`. Each term is switched off by a `None` or `0` ratio.

use crate::ops::VERY_SMALL_NUMBER;
use crate::{Error, Result};
use candle_core::{DType, Tensor, D};
use serde::{Deserialize, Serialize};

/// Ratios of the three regularization terms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphRegularizer {
    pub smoothness_ratio: Option<f64>,
    pub connectivity_ratio: Option<f64>,
    pub sparsity_ratio: Option<f64>,
}

/// Individually computed terms; `None` for disabled ones.
#[derive(Debug, Clone)]
pub struct RegularizationTerms {
    pub smoothness: Option<Tensor>,
    pub connectivity: Option<Tensor>,
    pub sparsity: Option<Tensor>,
}

impl RegularizationTerms {
    /// Sum of the enabled terms as a scalar tensor.
    pub fn total(&self, like: &Tensor) -> Result<Tensor> {
        let mut total = Tensor::zeros((), like.dtype(), like.device())?;
        for term in [&self.smoothness, &self.connectivity, &self.sparsity]
            .into_iter()
            .flatten()
        {
            total = (total + term)?;
        }
        Ok(total)
    }
}

fn active(ratio: Option<f64>) -> Option<f64> {
    ratio.filter(|r| *r != 0.0)
}

impl GraphRegularizer {
    pub fn new(
        smoothness_ratio: Option<f64>,
        connectivity_ratio: Option<f64>,
        sparsity_ratio: Option<f64>,
    ) -> Self {
        Self {
            smoothness_ratio,
            connectivity_ratio,
            sparsity_ratio,
        }
    }

    /// Whether at least one term is switched on.
    pub fn is_enabled(&self) -> bool {
        active(self.smoothness_ratio).is_some()
            || active(self.connectivity_ratio).is_some()
            || active(self.sparsity_ratio).is_some()
    }

    /// Compute each enabled term.
    pub fn terms(&self, adj: &Tensor, node_feat: &Tensor) -> Result<RegularizationTerms> {
        self.masked_terms(adj, node_feat, None)
    }

    /// Compute each enabled term over the nodes flagged non-zero in `valid`
    /// `(N,)`.
    ///
    /// Rows and columns of the other nodes are zeroed and `N` becomes the
    /// number of valid nodes, so padding leaves the loss unchanged.
    pub fn masked_terms(
        &self,
        adj: &Tensor,
        node_feat: &Tensor,
        valid: Option<&Tensor>,
    ) -> Result<RegularizationTerms> {
        let (n, m) = adj.dims2()?;
        if n != m {
            return Err(Error::DimensionMismatch { expected: n, got: m });
        }
        let (adj, weights, count) = match valid {
            Some(valid) => {
                let len = valid.dims1()?;
                if len != n {
                    return Err(Error::DimensionMismatch {
                        expected: n,
                        got: len,
                    });
                }
                let weights = valid.ne(0.0)?.to_dtype(adj.dtype())?;
                let count = weights
                    .sum_all()?
                    .to_dtype(DType::F64)?
                    .to_scalar::<f64>()?
                    .max(1.0);
                let pairs = weights.unsqueeze(1)?.broadcast_mul(&weights.unsqueeze(0)?)?;
                ((adj * pairs)?, Some(weights), count)
            }
            None => (adj.clone(), None, n as f64),
        };
        let numel = count * count;

        let smoothness = match active(self.smoothness_ratio) {
            Some(ratio) => {
                let rows = node_feat.dim(0)?;
                if rows != n {
                    return Err(Error::DimensionMismatch {
                        expected: n,
                        got: rows,
                    });
                }
                // L X = diag(A 1) X - A X
                let degree = adj.sum_keepdim(D::Minus1)?;
                let lx = (degree.broadcast_mul(node_feat)? - adj.matmul(node_feat)?)?;
                let trace = (node_feat * lx)?.sum_all()?;
                Some((trace * (ratio / numel))?)
            }
            None => None,
        };

        let connectivity = match active(self.connectivity_ratio) {
            Some(ratio) => {
                let degree = adj.sum(D::Minus1)?;
                let mut log_deg = (degree + VERY_SMALL_NUMBER)?.log()?;
                if let Some(weights) = &weights {
                    log_deg = (log_deg * weights)?;
                }
                Some((log_deg.sum_all()? * (-ratio / count))?)
            }
            None => None,
        };

        let sparsity = match active(self.sparsity_ratio) {
            Some(ratio) => Some((adj.sqr()?.sum_all()? * (ratio / numel))?),
            None => None,
        };

        Ok(RegularizationTerms {
            smoothness,
            connectivity,
            sparsity,
        })
    }

    /// Combined regularization loss (scalar; zero when every term is off).
    pub fn compute(&self, adj: &Tensor, node_feat: &Tensor) -> Result<Tensor> {
        self.compute_masked(adj, node_feat, None)
    }

    /// [`GraphRegularizer::compute`] restricted to the valid nodes.
    pub fn compute_masked(
        &self,
        adj: &Tensor,
        node_feat: &Tensor,
        valid: Option<&Tensor>,
    ) -> Result<Tensor> {
        let terms = self.masked_terms(adj, node_feat, valid)?;
        let total = terms.total(adj)?;
        tracing::debug!(
            smoothness = terms.smoothness.is_some(),
            connectivity = terms.connectivity.is_some(),
            sparsity = terms.sparsity.is_some(),
            masked = valid.is_some(),
            "computed graph regularization"
        );
        Ok(total)
    }
}
