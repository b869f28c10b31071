//! Tensor helpers shared by the graph modules.

use crate::{Error, Result};
use candle_core::{Tensor, D};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Large finite stand-in for infinity; `-INF` marks "no edge" for
/// attention-style metrics.
pub const INF: f64 = 1e20;

/// Floor added before logs and divisions.
pub const VERY_SMALL_NUMBER: f64 = 1e-31;

/// Floor on row norms during L2 normalization.
pub(crate) const NORM_EPS: f64 = 1e-12;

/// Tensor of the same shape, dtype and device as `like`, filled with `value`.
pub fn full_like(like: &Tensor, value: f64) -> Result<Tensor> {
    Ok(like.ones_like()?.affine(0.0, value)?)
}

/// Replace entries where `mask` is zero with `value`.
///
/// `mask` must broadcast to the shape of `xs`; any non-zero entry keeps the
/// corresponding value of `xs`.
pub fn masked_fill(xs: &Tensor, mask: &Tensor, value: f64) -> Result<Tensor> {
    let keep = mask.ne(0.0)?.broadcast_as(xs.shape())?;
    let fill = full_like(xs, value)?;
    Ok(keep.where_cond(xs, &fill)?)
}

/// Per-node validity from a pairwise mask: `1` where the node's row of
/// `mask`, broadcast to the shape of `adj`, has any non-zero entry.
///
/// The result drops the last dimension of `adj` and has its dtype.
pub fn node_validity(mask: &Tensor, adj: &Tensor) -> Result<Tensor> {
    let pairs = mask
        .ne(0.0)?
        .to_dtype(adj.dtype())?
        .broadcast_as(adj.shape())?
        .contiguous()?;
    Ok(pairs.max(D::Minus1)?)
}

/// L2-normalize along the last dimension.
pub fn l2_normalize(xs: &Tensor) -> Result<Tensor> {
    let norm = xs.sqr()?.sum_keepdim(D::Minus1)?.sqrt()?.maximum(NORM_EPS)?;
    Ok(xs.broadcast_div(&norm)?)
}

/// LeakyReLU for slopes in `[0, 1)`.
pub fn leaky_relu(xs: &Tensor, negative_slope: f64) -> Result<Tensor> {
    Ok(xs.maximum(&(xs * negative_slope)?)?)
}

/// Row-wise sum over the last dimension, keeping it.
pub fn row_sum(xs: &Tensor) -> Result<Tensor> {
    Ok(xs.sum_keepdim(D::Minus1)?)
}

/// Pointwise activation, selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Relu,
    Sigmoid,
    Tanh,
    Elu,
    LeakyRelu(f64),
}

impl Activation {
    pub fn apply(&self, xs: &Tensor) -> Result<Tensor> {
        let out = match self {
            Activation::Relu => xs.relu()?,
            Activation::Sigmoid => candle_nn::ops::sigmoid(xs)?,
            Activation::Tanh => xs.tanh()?,
            Activation::Elu => xs.elu(1.0)?,
            Activation::LeakyRelu(slope) => return leaky_relu(xs, *slope),
        };
        Ok(out)
    }
}

impl FromStr for Activation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "relu" => Ok(Activation::Relu),
            "sigmoid" => Ok(Activation::Sigmoid),
            "tanh" => Ok(Activation::Tanh),
            "elu" => Ok(Activation::Elu),
            "leaky_relu" => Ok(Activation::LeakyRelu(0.01)),
            other => Err(Error::InvalidConfig(format!("unknown activation: {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;

    #[test]
    fn test_masked_fill_broadcasts_mask() {
        let xs = Tensor::new(&[[1f32, 2.], [3., 4.]], &Device::Cpu).unwrap();
        let mask = Tensor::new(&[[1f32, 0.]], &Device::Cpu).unwrap();
        let out = masked_fill(&xs, &mask, -5.0).unwrap();
        assert_eq!(
            out.to_vec2::<f32>().unwrap(),
            vec![vec![1.0, -5.0], vec![3.0, -5.0]]
        );
    }

    #[test]
    fn test_l2_normalize_zero_row_stays_zero() {
        let xs = Tensor::new(&[[3f32, 4.], [0., 0.]], &Device::Cpu).unwrap();
        let out = l2_normalize(&xs).unwrap().to_vec2::<f32>().unwrap();
        assert!((out[0][0] - 0.6).abs() < 1e-6);
        assert!((out[0][1] - 0.8).abs() < 1e-6);
        assert_eq!(out[1], vec![0.0, 0.0]);
    }

    #[test]
    fn test_leaky_relu() {
        let xs = Tensor::new(&[-10f32, 0., 2.], &Device::Cpu).unwrap();
        let out = leaky_relu(&xs, 0.2).unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(out, vec![-2.0, 0.0, 2.0]);
    }

    #[test]
    fn test_unknown_activation() {
        assert!("swish".parse::<Activation>().is_err());
        assert_eq!("tanh".parse::<Activation>().unwrap(), Activation::Tanh);
    }
}
