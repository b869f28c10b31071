//! Gated graph neural network (Li et al., 2016).
//!
//! ```text
//! h^0     = [x ; 0]                    (zero-padded to hidden_size)
//! m^t     = A (W h^{t-1} + b)
//! h^t     = GRU(m^t, h^{t-1})
//! ```
//!
//! `A[i][j]` weighs the message from `j` to `i`, so edge weights of learned
//! graphs scale the messages.

use crate::convert::incoming_adjacency;
use crate::graphsage::DirectionOption;
use crate::{Error, Result};
use candle_core::{Tensor, D};
use candle_nn::{linear_b, Linear, Module, VarBuilder};
use lexgraph_core::GraphData;
use serde::{Deserialize, Serialize};

/// GRU cell with the usual reset / update / candidate gates.
pub struct GruCell {
    w_ih: Linear,
    w_hh: Linear,
    hidden_size: usize,
}

impl GruCell {
    pub fn new(input_size: usize, hidden_size: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            w_ih: linear_b(input_size, 3 * hidden_size, true, vb.pp("w_ih"))?,
            w_hh: linear_b(hidden_size, 3 * hidden_size, true, vb.pp("w_hh"))?,
            hidden_size,
        })
    }

    /// One step: `x` is `(N, input_size)`, `h` is `(N, hidden_size)`.
    pub fn forward(&self, x: &Tensor, h: &Tensor) -> Result<Tensor> {
        let hs = self.hidden_size;
        let gi = self.w_ih.forward(x)?;
        let gh = self.w_hh.forward(h)?;
        let chunk = |t: &Tensor, i: usize| t.narrow(D::Minus1, i * hs, hs);

        let r = candle_nn::ops::sigmoid(&(chunk(&gi, 0)? + chunk(&gh, 0)?)?)?;
        let z = candle_nn::ops::sigmoid(&(chunk(&gi, 1)? + chunk(&gh, 1)?)?)?;
        let n = (chunk(&gi, 2)? + (r * chunk(&gh, 2)?)?)?.tanh()?;
        // h' = (1 - z) * n + z * h
        let keep = z.affine(-1.0, 1.0)?;
        Ok(((keep * n)? + (z * h)?)?)
    }
}

/// One direction's propagation weights.
struct GgnnBranch {
    message: Linear,
    gru: GruCell,
}

impl GgnnBranch {
    fn new(hidden_size: usize, bias: bool, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            message: linear_b(hidden_size, hidden_size, bias, vb.pp("message"))?,
            gru: GruCell::new(hidden_size, hidden_size, vb.pp("gru"))?,
        })
    }

    fn propagate(&self, adj_in: &Tensor, h0: &Tensor, n_steps: usize) -> Result<Tensor> {
        let mut h = h0.clone();
        for _ in 0..n_steps {
            let m = adj_in.matmul(&self.message.forward(&h)?)?;
            h = self.gru.forward(&m, &h)?;
        }
        Ok(h)
    }
}

/// GGNN configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GgnnConfig {
    pub n_steps: usize,
    pub input_size: usize,
    pub hidden_size: usize,
    /// `uni` or `bi_sep`.
    pub direction_option: DirectionOption,
    pub bias: bool,
}

impl Default for GgnnConfig {
    fn default() -> Self {
        Self {
            n_steps: 1,
            input_size: 0,
            hidden_size: 0,
            direction_option: DirectionOption::Uni,
            bias: true,
        }
    }
}

impl GgnnConfig {
    pub fn new(n_steps: usize, input_size: usize, hidden_size: usize) -> Self {
        Self {
            n_steps,
            input_size,
            hidden_size,
            ..Self::default()
        }
    }

    pub fn with_direction(mut self, direction: DirectionOption) -> Self {
        self.direction_option = direction;
        self
    }

    pub fn with_bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }

    pub fn output_size(&self) -> usize {
        match self.direction_option {
            DirectionOption::BiSep => 2 * self.hidden_size,
            _ => self.hidden_size,
        }
    }
}

/// Gated graph network encoder.
pub struct Ggnn {
    forward_branch: GgnnBranch,
    backward_branch: Option<GgnnBranch>,
    config: GgnnConfig,
}

impl Ggnn {
    pub fn new(config: GgnnConfig, vb: VarBuilder) -> Result<Self> {
        if config.hidden_size == 0 || config.input_size == 0 {
            return Err(Error::InvalidConfig(
                "ggnn sizes must be positive".into(),
            ));
        }
        if config.input_size > config.hidden_size {
            return Err(Error::InvalidConfig(format!(
                "ggnn input_size {} exceeds hidden_size {}",
                config.input_size, config.hidden_size
            )));
        }
        let backward_branch = match config.direction_option {
            DirectionOption::Uni => None,
            DirectionOption::BiSep => Some(GgnnBranch::new(config.hidden_size, config.bias, vb.pp("bw"))?),
            DirectionOption::BiFuse => {
                return Err(Error::InvalidConfig(
                    "ggnn supports the uni and bi_sep directions".into(),
                ))
            }
        };
        let forward_branch = GgnnBranch::new(config.hidden_size, config.bias, vb.pp("fw"))?;
        tracing::info!(
            n_steps = config.n_steps,
            hidden = config.hidden_size,
            direction = %config.direction_option,
            "built ggnn"
        );
        Ok(Self {
            forward_branch,
            backward_branch,
            config,
        })
    }

    pub fn config(&self) -> &GgnnConfig {
        &self.config
    }

    /// Node embeddings `(N, output_size)` for `graph` with features `feat`.
    pub fn forward(&self, graph: &GraphData, feat: &Tensor) -> Result<Tensor> {
        let adj = incoming_adjacency(graph, feat.device())?.to_dtype(feat.dtype())?;
        self.forward_incoming(&adj, feat)
    }

    /// Same as [`Self::forward`] for a dense adjacency with `adj[src][dst]`
    /// weights, such as a learned topology.
    pub fn forward_dense(&self, adj: &Tensor, feat: &Tensor) -> Result<Tensor> {
        self.forward_incoming(&adj.t()?.contiguous()?, feat)
    }

    fn forward_incoming(&self, adj_in: &Tensor, feat: &Tensor) -> Result<Tensor> {
        let (n, d) = feat.dims2()?;
        let (rows, cols) = adj_in.dims2()?;
        if rows != n || cols != n {
            return Err(Error::DimensionMismatch { expected: n, got: rows.max(cols) });
        }
        if d != self.config.input_size {
            return Err(Error::DimensionMismatch {
                expected: self.config.input_size,
                got: d,
            });
        }
        let h0 = feat.pad_with_zeros(D::Minus1, 0, self.config.hidden_size - d)?;

        let fw = self.forward_branch.propagate(adj_in, &h0, self.config.n_steps)?;
        let out = match &self.backward_branch {
            Some(branch) => {
                let adj_out = adj_in.t()?.contiguous()?;
                let bw = branch.propagate(&adj_out, &h0, self.config.n_steps)?;
                Tensor::cat(&[&fw, &bw], D::Minus1)?
            }
            None => fw,
        };
        tracing::debug!(shape = ?out.dims(), "ggnn forward");
        Ok(out)
    }
}
