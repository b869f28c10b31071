//! Pairwise node similarity.
//!
//! A [`SimilarityMetric`] turns a node embedding matrix `(N, D)` (or a batch
//! `(B, N, D)`) into a dense similarity matrix `(N, N)` / `(B, N, N)` that
//! doubles as a weighted adjacency. The metric family is fixed when the
//! metric is built.
//!
//! | Metric | Similarity | Mask-off value |
//! |--------|------------|----------------|
//! | `attention` | mean_h relu(W_h x) relu(W_h x)^T | -INF |
//! | `weighted_cosine` | mean_h cos(w_h * x_i, w_h * x_j) | 0 |
//! | `gat_attention` | mean_h LeakyReLU(a_h x_i + b_h x_j) | -INF |
//! | `rbf_kernel` | exp(-0.5 p^2 (x_i - x_j)^T W W^T (x_i - x_j)) | 0 |
//! | `cosine` | cos(x_i, x_j), no gradient | 0 |

use crate::ops::{self, INF};
use crate::{Error, Result};
use candle_core::{Tensor, D};
use candle_nn::{linear_no_bias, Init, Linear, Module, VarBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const GAT_NEGATIVE_SLOPE: f64 = 0.2;

/// Similarity metric family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimMetricType {
    Attention,
    #[default]
    WeightedCosine,
    GatAttention,
    RbfKernel,
    Cosine,
}

impl SimMetricType {
    /// Value written into "no edge" cells.
    pub fn mask_off_val(&self) -> f64 {
        match self {
            SimMetricType::Attention | SimMetricType::GatAttention => -INF,
            SimMetricType::WeightedCosine | SimMetricType::RbfKernel | SimMetricType::Cosine => 0.0,
        }
    }

    /// Whether outputs are unnormalized scores (softmax-normalized downstream)
    /// rather than non-negative affinities.
    pub fn is_attention(&self) -> bool {
        matches!(self, SimMetricType::Attention | SimMetricType::GatAttention)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SimMetricType::Attention => "attention",
            SimMetricType::WeightedCosine => "weighted_cosine",
            SimMetricType::GatAttention => "gat_attention",
            SimMetricType::RbfKernel => "rbf_kernel",
            SimMetricType::Cosine => "cosine",
        }
    }
}

impl fmt::Display for SimMetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SimMetricType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "attention" => Ok(SimMetricType::Attention),
            "weighted_cosine" => Ok(SimMetricType::WeightedCosine),
            "gat_attention" => Ok(SimMetricType::GatAttention),
            "rbf_kernel" => Ok(SimMetricType::RbfKernel),
            "cosine" => Ok(SimMetricType::Cosine),
            other => Err(Error::InvalidConfig(format!(
                "unknown sim_metric_type: {other}"
            ))),
        }
    }
}

/// A similarity metric with its learned parameters.
pub enum SimilarityMetric {
    /// One projection per head.
    Attention { heads: Vec<Linear> },
    /// Per-head feature weights, shape `(num_heads, input_size)`.
    WeightedCosine { weight: Tensor },
    /// Per-head source and destination scorers.
    GatAttention { left: Vec<Linear>, right: Vec<Linear> },
    /// Distance transform `(input_size, hidden_size)` and precision `(1, 1)`.
    RbfKernel {
        weight: Tensor,
        precision_inv_dis: Tensor,
    },
    Cosine,
}

/// Xavier/Glorot uniform bound for a `(fan_out, fan_in)` matrix.
fn xavier_uniform(fan_in: usize, fan_out: usize) -> Init {
    let bound = (6.0 / (fan_in + fan_out) as f64).sqrt();
    Init::Uniform {
        lo: -bound,
        up: bound,
    }
}

fn require(value: Option<usize>, name: &str, kind: SimMetricType) -> Result<usize> {
    match value {
        Some(v) if v > 0 => Ok(v),
        _ => Err(Error::InvalidConfig(format!(
            "{kind} similarity requires a positive {name}"
        ))),
    }
}

impl SimilarityMetric {
    /// Build a metric and register its parameters under `vb`.
    ///
    /// # Arguments
    /// - `kind`: metric family
    /// - `num_heads`: heads for `attention`, `weighted_cosine`, `gat_attention`
    /// - `input_size`: embedding dimension (all learned metrics)
    /// - `hidden_size`: projection size (`attention`, `rbf_kernel`)
    pub fn new(
        kind: SimMetricType,
        num_heads: usize,
        input_size: Option<usize>,
        hidden_size: Option<usize>,
        vb: VarBuilder,
    ) -> Result<Self> {
        if num_heads == 0 && kind != SimMetricType::Cosine {
            return Err(Error::InvalidConfig("num_heads must be at least 1".into()));
        }
        let metric = match kind {
            SimMetricType::Attention => {
                let input = require(input_size, "input_size", kind)?;
                let hidden = require(hidden_size, "hidden_size", kind)?;
                let heads = (0..num_heads)
                    .map(|h| linear_no_bias(input, hidden, vb.pp(format!("linear_sims.{h}"))))
                    .collect::<candle_core::Result<Vec<_>>>()?;
                SimilarityMetric::Attention { heads }
            }
            SimMetricType::WeightedCosine => {
                let input = require(input_size, "input_size", kind)?;
                let weight = vb.get_with_hints(
                    (num_heads, input),
                    "weight",
                    xavier_uniform(input, num_heads),
                )?;
                SimilarityMetric::WeightedCosine { weight }
            }
            SimMetricType::GatAttention => {
                let input = require(input_size, "input_size", kind)?;
                let mut left = Vec::with_capacity(num_heads);
                let mut right = Vec::with_capacity(num_heads);
                for h in 0..num_heads {
                    left.push(linear_no_bias(input, 1, vb.pp(format!("linear_sims1.{h}")))?);
                    right.push(linear_no_bias(input, 1, vb.pp(format!("linear_sims2.{h}")))?);
                }
                SimilarityMetric::GatAttention { left, right }
            }
            SimMetricType::RbfKernel => {
                let input = require(input_size, "input_size", kind)?;
                let hidden = require(hidden_size, "hidden_size", kind)?;
                let weight =
                    vb.get_with_hints((input, hidden), "weight", xavier_uniform(hidden, input))?;
                let precision_inv_dis = vb.get_with_hints(
                    (1, 1),
                    "precision_inv_dis",
                    Init::Uniform { lo: 0.0, up: 1.0 },
                )?;
                SimilarityMetric::RbfKernel {
                    weight,
                    precision_inv_dis,
                }
            }
            SimMetricType::Cosine => SimilarityMetric::Cosine,
        };
        tracing::info!(metric = %kind, num_heads, "built similarity metric");
        Ok(metric)
    }

    /// Metric family.
    pub fn kind(&self) -> SimMetricType {
        match self {
            SimilarityMetric::Attention { .. } => SimMetricType::Attention,
            SimilarityMetric::WeightedCosine { .. } => SimMetricType::WeightedCosine,
            SimilarityMetric::GatAttention { .. } => SimMetricType::GatAttention,
            SimilarityMetric::RbfKernel { .. } => SimMetricType::RbfKernel,
            SimilarityMetric::Cosine => SimMetricType::Cosine,
        }
    }

    /// Value written into "no edge" cells.
    pub fn mask_off_val(&self) -> f64 {
        self.kind().mask_off_val()
    }

    /// Compute the similarity matrix.
    ///
    /// # Arguments
    /// - `node_emb`: `(N, D)` or `(B, N, D)`
    /// - `node_mask`: optional mask broadcastable to the output; zero cells
    ///   are overwritten with [`Self::mask_off_val`]
    ///
    /// # Returns
    /// - `(N, N)` or `(B, N, N)`
    pub fn compute(&self, node_emb: &Tensor, node_mask: Option<&Tensor>) -> Result<Tensor> {
        let rank = node_emb.rank();
        if rank != 2 && rank != 3 {
            return Err(Error::DimensionMismatch {
                expected: 2,
                got: rank,
            });
        }

        let attention = match self {
            SimilarityMetric::Attention { heads } => {
                let mut acc: Option<Tensor> = None;
                for lin in heads {
                    let v = lin.forward(node_emb)?.relu()?;
                    let a = gram(&v)?;
                    acc = Some(match acc {
                        Some(prev) => (prev + a)?,
                        None => a,
                    });
                }
                let sum = acc.ok_or_else(|| Error::InvalidConfig("no attention heads".into()))?;
                (sum / heads.len() as f64)?
            }
            SimilarityMetric::WeightedCosine { weight } => {
                // (H, 1, D) or (H, 1, 1, D) against (1, N, D) / (1, B, N, D)
                let mut w = weight.unsqueeze(1)?;
                if rank == 3 {
                    w = w.unsqueeze(1)?;
                }
                let x = node_emb.unsqueeze(0)?.broadcast_mul(&w)?;
                let x = ops::l2_normalize(&x)?;
                gram(&x)?.mean(0)?
            }
            SimilarityMetric::GatAttention { left, right } => {
                let mut per_head = Vec::with_capacity(left.len());
                for (l, r) in left.iter().zip(right) {
                    let a1 = l.forward(node_emb)?;
                    let a2 = r.forward(node_emb)?.t()?;
                    per_head.push(ops::leaky_relu(&a1.broadcast_add(&a2)?, GAT_NEGATIVE_SLOPE)?);
                }
                Tensor::stack(&per_head, 0)?.mean(0)?
            }
            SimilarityMetric::RbfKernel {
                weight,
                precision_inv_dis,
            } => {
                let dist_weight = weight.matmul(&weight.t()?)?;
                let dists = distance_matrix(node_emb, &dist_weight)?;
                let scale = (precision_inv_dis.sqr()? * -0.5)?;
                dists.broadcast_mul(&scale)?.exp()?
            }
            SimilarityMetric::Cosine => {
                let x = ops::l2_normalize(node_emb)?;
                gram(&x)?.detach()
            }
        };

        tracing::debug!(metric = %self.kind(), shape = ?attention.dims(), "computed similarity");

        match node_mask {
            Some(mask) => ops::masked_fill(&attention, mask, self.mask_off_val()),
            None => Ok(attention),
        }
    }
}

/// `x x^T` over the last two dimensions.
fn gram(x: &Tensor) -> Result<Tensor> {
    Ok(x.matmul(&x.t()?.contiguous()?)?)
}

/// Squared Mahalanobis-style distances `(x_i - x_j)^T M (x_i - x_j)` for a
/// symmetric `M`.
fn distance_matrix(x: &Tensor, weight: &Tensor) -> Result<Tensor> {
    let trans_x = x.broadcast_matmul(weight)?;
    let norm = (&trans_x * x)?.sum_keepdim(D::Minus1)?;
    let cross = trans_x.matmul(&x.t()?.contiguous()?)?;
    Ok((cross * -2.0)?
        .broadcast_add(&norm)?
        .broadcast_add(&norm.t()?)?)
}

/// Pairwise validity mask from a per-node validity vector.
///
/// `valid` is `(N,)` or `(B, N)`, non-zero for real nodes; the result is
/// `(N, N)` / `(B, N, N)` with `m[i][j] = valid[i] * valid[j]`.
pub fn pairwise_node_mask(valid: &Tensor) -> Result<Tensor> {
    let v = valid.ne(0.0)?.to_dtype(candle_core::DType::F32)?;
    let rows = v.unsqueeze(D::Minus1)?;
    let cols = v.unsqueeze(v.rank() - 1)?;
    Ok(rows.broadcast_mul(&cols)?)
}
