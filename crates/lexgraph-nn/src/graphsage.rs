//! GraphSAGE encoder (Hamilton et al., 2017).
//!
//! ```text
//! h_N(i) = AGGREGATE({h_j : j in N(i)})
//! h_i'   = act(W_self h_i + W_neigh h_N(i))
//! ```
//!
//! A layer is an aggregator strategy (how neighbour states are pooled)
//! composed with a direction strategy (which edge directions are followed and
//! how their results are combined):
//!
//! | Direction | Views | Output |
//! |-----------|-------|--------|
//! | `uni` | in-neighbours | one state per node |
//! | `bi_sep` | in- and out-neighbours, separate weights | two states, concatenated at the end |
//! | `bi_fuse` | in- and out-neighbours, gated | one state per node |

use crate::ops::{self, Activation};
use crate::{Error, Result};
use candle_core::{DType, Device, Tensor, D};
use candle_nn::{linear_b, lstm, Dropout, LSTMConfig, Linear, Module, VarBuilder, LSTM, RNN};
use lexgraph_core::GraphData;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Neighbour pooling function.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregatorType {
    #[default]
    Mean,
    Gcn,
    Pool,
    Lstm,
}

impl FromStr for AggregatorType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "mean" => Ok(AggregatorType::Mean),
            "gcn" => Ok(AggregatorType::Gcn),
            "pool" => Ok(AggregatorType::Pool),
            "lstm" => Ok(AggregatorType::Lstm),
            other => Err(Error::InvalidConfig(format!(
                "aggregator type {other} not recognized"
            ))),
        }
    }
}

/// Edge directions followed by a message-passing layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectionOption {
    #[default]
    Uni,
    BiSep,
    BiFuse,
}

impl DirectionOption {
    pub fn as_str(&self) -> &'static str {
        match self {
            DirectionOption::Uni => "uni",
            DirectionOption::BiSep => "bi_sep",
            DirectionOption::BiFuse => "bi_fuse",
        }
    }
}

impl fmt::Display for DirectionOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DirectionOption {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "uni" => Ok(DirectionOption::Uni),
            "bi_sep" => Ok(DirectionOption::BiSep),
            "bi_fuse" => Ok(DirectionOption::BiFuse),
            other => Err(Error::InvalidConfig(format!(
                "unknown direction_option: {other}"
            ))),
        }
    }
}

/// Neighbourhood structure of one edge direction.
#[derive(Debug, Clone)]
pub struct GraphView {
    /// Binary `(N, N)` with `adj[dst][src] = 1` for every message edge.
    pub adj: Tensor,
    /// `(N, 1)` number of distinct neighbours.
    pub degree: Tensor,
    /// Neighbour ids of every node, in edge insertion order.
    pub neighbors: Vec<Vec<u32>>,
}

impl GraphView {
    /// Messages flow along edges: node `i` hears from its in-neighbours.
    pub fn incoming(graph: &GraphData, device: &Device) -> Result<Self> {
        let n = graph.node_count();
        let mut adj = vec![0f32; n * n];
        let mut neighbors = vec![Vec::new(); n];
        for (src, dst, _) in graph.edges() {
            let cell = &mut adj[dst * n + src];
            if *cell == 0.0 {
                *cell = 1.0;
                neighbors[dst].push(src as u32);
            }
        }
        let degree: Vec<f32> = neighbors.iter().map(|nb| nb.len() as f32).collect();
        Ok(Self {
            adj: Tensor::from_vec(adj, (n, n), device)?,
            degree: Tensor::from_vec(degree, (n, 1), device)?,
            neighbors,
        })
    }

    /// Messages flow against edges: node `i` hears from its out-neighbours.
    pub fn outgoing(graph: &GraphData, device: &Device) -> Result<Self> {
        Self::incoming(&graph.reverse(), device)
    }

    pub fn node_count(&self) -> usize {
        self.neighbors.len()
    }
}

/// Forward and backward views of one graph.
#[derive(Debug, Clone)]
pub struct GraphViews {
    pub forward: GraphView,
    pub backward: GraphView,
}

impl GraphViews {
    pub fn new(graph: &GraphData, device: &Device) -> Result<Self> {
        Ok(Self {
            forward: GraphView::incoming(graph, device)?,
            backward: GraphView::outgoing(graph, device)?,
        })
    }
}

/// Node states flowing between layers.
#[derive(Debug, Clone)]
pub enum NodeStates {
    Single(Tensor),
    /// Separate forward / backward states (`bi_sep`).
    Pair(Tensor, Tensor),
}

impl NodeStates {
    /// Forward and backward inputs; a single state feeds both.
    pub fn directions(&self) -> (&Tensor, &Tensor) {
        match self {
            NodeStates::Single(h) => (h, h),
            NodeStates::Pair(fw, bw) => (fw, bw),
        }
    }

    pub fn map<F>(self, f: F) -> Result<Self>
    where
        F: Fn(&Tensor) -> Result<Tensor>,
    {
        Ok(match self {
            NodeStates::Single(h) => NodeStates::Single(f(&h)?),
            NodeStates::Pair(fw, bw) => NodeStates::Pair(f(&fw)?, f(&bw)?),
        })
    }

    /// Collapse into one tensor, concatenating pairs along the feature axis.
    pub fn into_tensor(self) -> Result<Tensor> {
        match self {
            NodeStates::Single(h) => Ok(h),
            NodeStates::Pair(fw, bw) => Ok(Tensor::cat(&[&fw, &bw], D::Minus1)?),
        }
    }
}

/// Pools neighbour states into one vector per node.
pub trait NeighborAggregator {
    /// `feat_src` are the states messages are read from, `feat_dst` the
    /// receiving nodes' own states; both `(N, D)`.
    fn aggregate(&self, view: &GraphView, feat_src: &Tensor, feat_dst: &Tensor) -> Result<Tensor>;

    /// Whether the layer adds a separate self transform.
    fn uses_self_loop(&self) -> bool {
        true
    }
}

/// Mean of neighbour states; isolated nodes get zeros.
pub struct MeanAggregator;

impl NeighborAggregator for MeanAggregator {
    fn aggregate(&self, view: &GraphView, feat_src: &Tensor, _feat_dst: &Tensor) -> Result<Tensor> {
        let sum = view.adj.matmul(feat_src)?;
        Ok(sum.broadcast_div(&view.degree.maximum(1.0)?)?)
    }
}

/// Mean over neighbours and the node itself.
pub struct GcnAggregator;

impl NeighborAggregator for GcnAggregator {
    fn aggregate(&self, view: &GraphView, feat_src: &Tensor, feat_dst: &Tensor) -> Result<Tensor> {
        if feat_src.dims() != feat_dst.dims() {
            return Err(Error::DimensionMismatch {
                expected: feat_src.elem_count(),
                got: feat_dst.elem_count(),
            });
        }
        let sum = (view.adj.matmul(feat_src)? + feat_dst)?;
        Ok(sum.broadcast_div(&(&view.degree + 1.0)?)?)
    }

    fn uses_self_loop(&self) -> bool {
        false
    }
}

/// Element-wise max of `relu(W h_j + b)` over neighbours.
pub struct PoolAggregator {
    fc_pool: Linear,
}

impl PoolAggregator {
    pub fn new(size: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            fc_pool: linear_b(size, size, true, vb)?,
        })
    }

    pub fn from_linear(fc_pool: Linear) -> Self {
        Self { fc_pool }
    }
}

impl NeighborAggregator for PoolAggregator {
    fn aggregate(&self, view: &GraphView, feat_src: &Tensor, _feat_dst: &Tensor) -> Result<Tensor> {
        // relu output is non-negative, so zeroing non-neighbours leaves the max intact
        let h = self.fc_pool.forward(feat_src)?.relu()?;
        let masked = view.adj.unsqueeze(2)?.broadcast_mul(&h.unsqueeze(0)?)?;
        Ok(masked.max(1)?)
    }
}

/// Final hidden state of an LSTM run over each node's neighbour sequence.
pub struct LstmAggregator {
    lstm: LSTM,
    size: usize,
}

impl LstmAggregator {
    pub fn new(size: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            lstm: lstm(size, size, LSTMConfig::default(), vb)?,
            size,
        })
    }
}

impl NeighborAggregator for LstmAggregator {
    fn aggregate(&self, view: &GraphView, feat_src: &Tensor, _feat_dst: &Tensor) -> Result<Tensor> {
        let mut rows = Vec::with_capacity(view.node_count());
        for nbrs in &view.neighbors {
            if nbrs.is_empty() {
                rows.push(Tensor::zeros((1, self.size), feat_src.dtype(), feat_src.device())?);
                continue;
            }
            let idx = Tensor::new(nbrs.as_slice(), feat_src.device())?;
            let seq = feat_src.index_select(&idx, 0)?.unsqueeze(0)?;
            let states = self.lstm.seq(&seq)?;
            let last = states
                .last()
                .ok_or_else(|| Error::EmptyInput("lstm produced no states".into()))?;
            rows.push(last.h().clone());
        }
        Ok(Tensor::cat(&rows, 0)?)
    }
}

fn build_aggregator(
    kind: AggregatorType,
    input_size: usize,
    vb: VarBuilder,
) -> Result<Box<dyn NeighborAggregator>> {
    Ok(match kind {
        AggregatorType::Mean => Box::new(MeanAggregator),
        AggregatorType::Gcn => Box::new(GcnAggregator),
        AggregatorType::Pool => Box::new(PoolAggregator::new(input_size, vb.pp("fc_pool"))?),
        AggregatorType::Lstm => Box::new(LstmAggregator::new(input_size, vb.pp("lstm"))?),
    })
}

/// One direction's aggregator plus its self and neighbour transforms.
struct SageBranch {
    aggregator: Box<dyn NeighborAggregator>,
    fc_self: Option<Linear>,
    fc_neigh: Linear,
}

impl SageBranch {
    fn new(kind: AggregatorType, input_size: usize, output_size: usize, bias: bool, vb: VarBuilder) -> Result<Self> {
        let aggregator = build_aggregator(kind, input_size, vb.clone())?;
        let fc_self = if aggregator.uses_self_loop() {
            Some(linear_b(input_size, output_size, bias, vb.pp("fc_self"))?)
        } else {
            None
        };
        let fc_neigh = linear_b(input_size, output_size, bias, vb.pp("fc_neigh"))?;
        Ok(Self {
            aggregator,
            fc_self,
            fc_neigh,
        })
    }

    fn forward(&self, view: &GraphView, feat: &Tensor) -> Result<Tensor> {
        let h_neigh = self.aggregator.aggregate(view, feat, feat)?;
        combine(self.fc_self.as_ref(), &self.fc_neigh, feat, &h_neigh)
    }
}

fn combine(fc_self: Option<&Linear>, fc_neigh: &Linear, h_self: &Tensor, h_neigh: &Tensor) -> Result<Tensor> {
    let neigh = fc_neigh.forward(h_neigh)?;
    match fc_self {
        Some(fc) => Ok((fc.forward(h_self)? + neigh)?),
        None => Ok(neigh),
    }
}

/// How a layer follows edge directions.
pub trait DirectionStrategy {
    /// Pre-activation output states.
    fn propagate(&self, views: &GraphViews, states: &NodeStates) -> Result<NodeStates>;

    fn option(&self) -> DirectionOption;
}

/// Regular GraphSAGE over in-neighbours.
pub struct UniDirection {
    branch: SageBranch,
}

impl UniDirection {
    pub fn new(kind: AggregatorType, input_size: usize, output_size: usize, bias: bool, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            branch: SageBranch::new(kind, input_size, output_size, bias, vb)?,
        })
    }
}

impl DirectionStrategy for UniDirection {
    fn propagate(&self, views: &GraphViews, states: &NodeStates) -> Result<NodeStates> {
        let (fw, _) = states.directions();
        Ok(NodeStates::Single(self.branch.forward(&views.forward, fw)?))
    }

    fn option(&self) -> DirectionOption {
        DirectionOption::Uni
    }
}

/// Independent forward and backward branches.
pub struct BiSepDirection {
    fw: SageBranch,
    bw: SageBranch,
}

impl BiSepDirection {
    pub fn new(kind: AggregatorType, input_size: usize, output_size: usize, bias: bool, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            fw: SageBranch::new(kind, input_size, output_size, bias, vb.pp("fw"))?,
            bw: SageBranch::new(kind, input_size, output_size, bias, vb.pp("bw"))?,
        })
    }
}

impl DirectionStrategy for BiSepDirection {
    fn propagate(&self, views: &GraphViews, states: &NodeStates) -> Result<NodeStates> {
        let (fw, bw) = states.directions();
        Ok(NodeStates::Pair(
            self.fw.forward(&views.forward, fw)?,
            self.bw.forward(&views.backward, bw)?,
        ))
    }

    fn option(&self) -> DirectionOption {
        DirectionOption::BiSep
    }
}

/// Forward and backward neighbourhoods fused by a learned gate:
///
/// ```text
/// z     = act(W [fw; bw; fw + bw; fw - bw])
/// fused = z * fw + (1 - z) * bw
/// ```
pub struct BiFuseDirection {
    aggregator_fw: Box<dyn NeighborAggregator>,
    aggregator_bw: Box<dyn NeighborAggregator>,
    fc_self: Option<Linear>,
    fc_neigh: Linear,
    fuse_linear: Linear,
    gate_activation: Option<Activation>,
}

impl BiFuseDirection {
    pub fn new(
        kind: AggregatorType,
        input_size: usize,
        output_size: usize,
        bias: bool,
        gate_activation: Option<Activation>,
        vb: VarBuilder,
    ) -> Result<Self> {
        let aggregator_fw = build_aggregator(kind, input_size, vb.pp("fw"))?;
        let aggregator_bw = build_aggregator(kind, input_size, vb.pp("bw"))?;
        let fc_self = if aggregator_fw.uses_self_loop() {
            Some(linear_b(input_size, output_size, bias, vb.pp("fc_self"))?)
        } else {
            None
        };
        Ok(Self {
            aggregator_fw,
            aggregator_bw,
            fc_self,
            fc_neigh: linear_b(input_size, output_size, bias, vb.pp("fc_neigh"))?,
            fuse_linear: linear_b(4 * input_size, input_size, bias, vb.pp("fuse_linear"))?,
            gate_activation,
        })
    }

    fn fuse(&self, fw: &Tensor, bw: &Tensor) -> Result<Tensor> {
        let features = Tensor::cat(&[fw, bw, &(fw + bw)?, &(fw - bw)?], D::Minus1)?;
        let mut z = self.fuse_linear.forward(&features)?;
        if let Some(act) = &self.gate_activation {
            z = act.apply(&z)?;
        }
        let one_minus_z = z.affine(-1.0, 1.0)?;
        Ok(((&z * fw)? + (one_minus_z * bw)?)?)
    }
}

impl DirectionStrategy for BiFuseDirection {
    fn propagate(&self, views: &GraphViews, states: &NodeStates) -> Result<NodeStates> {
        let (fw, bw) = states.directions();
        let h_fw = self.aggregator_fw.aggregate(&views.forward, fw, fw)?;
        let h_bw = self.aggregator_bw.aggregate(&views.backward, bw, bw)?;
        let fused = self.fuse(&h_fw, &h_bw)?;
        Ok(NodeStates::Single(combine(
            self.fc_self.as_ref(),
            &self.fc_neigh,
            fw,
            &fused,
        )?))
    }

    fn option(&self) -> DirectionOption {
        DirectionOption::BiFuse
    }
}

/// One GraphSAGE layer: dropout, propagation, activation, optional L2 norm.
pub struct GraphSageLayer {
    direction: Box<dyn DirectionStrategy>,
    feat_drop: Option<Dropout>,
    activation: Option<Activation>,
    l2_norm: bool,
}

impl GraphSageLayer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        input_size: usize,
        output_size: usize,
        aggregator: AggregatorType,
        direction: DirectionOption,
        feat_drop: f32,
        bias: bool,
        activation: Option<Activation>,
        l2_norm: bool,
        vb: VarBuilder,
    ) -> Result<Self> {
        let direction: Box<dyn DirectionStrategy> = match direction {
            DirectionOption::Uni => Box::new(UniDirection::new(aggregator, input_size, output_size, bias, vb)?),
            DirectionOption::BiSep => Box::new(BiSepDirection::new(aggregator, input_size, output_size, bias, vb)?),
            DirectionOption::BiFuse => Box::new(BiFuseDirection::new(
                aggregator,
                input_size,
                output_size,
                bias,
                activation,
                vb,
            )?),
        };
        Ok(Self {
            direction,
            feat_drop: (feat_drop > 0.0).then(|| Dropout::new(feat_drop)),
            activation,
            l2_norm,
        })
    }

    pub fn direction(&self) -> DirectionOption {
        self.direction.option()
    }

    pub fn forward(&self, views: &GraphViews, states: NodeStates, train: bool) -> Result<NodeStates> {
        let states = match &self.feat_drop {
            Some(drop) => states.map(|h| Ok(drop.forward(h, train)?))?,
            None => states,
        };
        let mut out = self.direction.propagate(views, &states)?;
        if let Some(act) = &self.activation {
            out = out.map(|h| act.apply(h))?;
        }
        if self.l2_norm {
            out = out.map(ops::l2_normalize)?;
        }
        Ok(out)
    }
}

/// GraphSAGE stack configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphSageConfig {
    pub num_layers: usize,
    pub input_size: usize,
    /// One entry per hidden layer, or a single entry shared by all of them.
    pub hidden_size: Vec<usize>,
    /// Total output size; `bi_sep` splits it between the two directions.
    pub output_size: usize,
    pub aggregator_type: AggregatorType,
    pub direction_option: DirectionOption,
    pub feat_drop: f32,
    pub bias: bool,
    /// Applied after every layer but the last.
    pub activation: Option<Activation>,
    /// L2-normalize the final node states.
    pub l2_norm: bool,
}

impl Default for GraphSageConfig {
    fn default() -> Self {
        Self {
            num_layers: 1,
            input_size: 0,
            hidden_size: Vec::new(),
            output_size: 0,
            aggregator_type: AggregatorType::Mean,
            direction_option: DirectionOption::Uni,
            feat_drop: 0.0,
            bias: true,
            activation: None,
            l2_norm: false,
        }
    }
}

impl GraphSageConfig {
    pub fn new(num_layers: usize, input_size: usize, hidden_size: usize, output_size: usize) -> Self {
        Self {
            num_layers,
            input_size,
            hidden_size: vec![hidden_size],
            output_size,
            ..Self::default()
        }
    }

    pub fn with_hidden_sizes(mut self, sizes: Vec<usize>) -> Self {
        self.hidden_size = sizes;
        self
    }

    pub fn with_aggregator(mut self, aggregator: AggregatorType) -> Self {
        self.aggregator_type = aggregator;
        self
    }

    pub fn with_direction(mut self, direction: DirectionOption) -> Self {
        self.direction_option = direction;
        self
    }

    pub fn with_feat_drop(mut self, p: f32) -> Self {
        self.feat_drop = p;
        self
    }

    pub fn with_bias(mut self, bias: bool) -> Self {
        self.bias = bias;
        self
    }

    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = Some(activation);
        self
    }

    pub fn with_l2_norm(mut self, l2_norm: bool) -> Self {
        self.l2_norm = l2_norm;
        self
    }

    /// Input / output sizes of every layer (per direction for `bi_sep`).
    fn layer_sizes(&self) -> Result<Vec<(usize, usize)>> {
        if self.num_layers == 0 {
            return Err(Error::InvalidConfig("num_layers must be at least 1".into()));
        }
        if self.input_size == 0 || self.output_size == 0 {
            return Err(Error::InvalidConfig(
                "input_size and output_size must be positive".into(),
            ));
        }
        let output = match self.direction_option {
            DirectionOption::BiSep => {
                if self.output_size % 2 != 0 {
                    return Err(Error::InvalidConfig(format!(
                        "bi_sep needs an even output_size, got {}",
                        self.output_size
                    )));
                }
                self.output_size / 2
            }
            _ => self.output_size,
        };
        let n_hidden = self.num_layers - 1;
        let hidden: Vec<usize> = match self.hidden_size.len() {
            _ if n_hidden == 0 => Vec::new(),
            1 => vec![self.hidden_size[0]; n_hidden],
            len if len == n_hidden => self.hidden_size.clone(),
            len => {
                return Err(Error::DimensionMismatch {
                    expected: n_hidden,
                    got: len,
                })
            }
        };

        let mut sizes = Vec::with_capacity(self.num_layers);
        let mut input = self.input_size;
        for h in hidden {
            sizes.push((input, h));
            input = h;
        }
        sizes.push((input, output));
        Ok(sizes)
    }
}

/// Multi-layer GraphSAGE encoder.
pub struct GraphSage {
    layers: Vec<GraphSageLayer>,
    config: GraphSageConfig,
}

impl GraphSage {
    pub fn new(config: GraphSageConfig, vb: VarBuilder) -> Result<Self> {
        let sizes = config.layer_sizes()?;
        let last = sizes.len() - 1;
        let mut layers = Vec::with_capacity(sizes.len());
        for (l, (input, output)) in sizes.into_iter().enumerate() {
            let activation = if l < last { config.activation } else { None };
            let l2_norm = l == last && config.l2_norm;
            layers.push(GraphSageLayer::new(
                input,
                output,
                config.aggregator_type,
                config.direction_option,
                config.feat_drop,
                config.bias,
                activation,
                l2_norm,
                vb.pp(format!("layers.{l}")),
            )?);
        }
        tracing::info!(
            layers = layers.len(),
            aggregator = ?config.aggregator_type,
            direction = %config.direction_option,
            "built graphsage"
        );
        Ok(Self { layers, config })
    }

    pub fn config(&self) -> &GraphSageConfig {
        &self.config
    }

    /// Node embeddings `(N, output_size)` for `graph` with features `feat`.
    pub fn forward(&self, graph: &GraphData, feat: &Tensor, train: bool) -> Result<Tensor> {
        let n = graph.node_count();
        if feat.dim(0)? != n {
            return Err(Error::DimensionMismatch {
                expected: n,
                got: feat.dim(0)?,
            });
        }
        let views = GraphViews::new(graph, feat.device())?;
        let views = GraphViews {
            forward: cast_view(views.forward, feat.dtype())?,
            backward: cast_view(views.backward, feat.dtype())?,
        };
        let mut states = NodeStates::Single(feat.clone());
        for layer in &self.layers {
            states = layer.forward(&views, states, train)?;
        }
        let out = states.into_tensor()?;
        tracing::debug!(shape = ?out.dims(), "graphsage forward");
        Ok(out)
    }
}

fn cast_view(view: GraphView, dtype: DType) -> Result<GraphView> {
    Ok(GraphView {
        adj: view.adj.to_dtype(dtype)?,
        degree: view.degree.to_dtype(dtype)?,
        neighbors: view.neighbors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarMap;
    use lexgraph_core::chain::chain_graph;

    fn chain3() -> GraphData {
        chain_graph(&["a", "b", "c"])
    }

    fn feat() -> Tensor {
        Tensor::new(&[[1f32, 2.], [3., -4.], [5., 6.]], &Device::Cpu).unwrap()
    }

    fn vb(varmap: &VarMap) -> VarBuilder<'_> {
        VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu)
    }

    #[test]
    fn test_parse_strategy_names() {
        assert_eq!("pool".parse::<AggregatorType>().unwrap(), AggregatorType::Pool);
        assert_eq!("bi_fuse".parse::<DirectionOption>().unwrap(), DirectionOption::BiFuse);
        assert!("max".parse::<AggregatorType>().is_err());
        assert!("both".parse::<DirectionOption>().is_err());
    }

    #[test]
    fn test_views_follow_edge_direction() {
        let views = GraphViews::new(&chain3(), &Device::Cpu).unwrap();
        assert_eq!(views.forward.neighbors, vec![vec![], vec![0], vec![1]]);
        assert_eq!(views.backward.neighbors, vec![vec![1], vec![2], vec![]]);
    }

    #[test]
    fn test_mean_aggregator() {
        let view = GraphView::incoming(&chain3(), &Device::Cpu).unwrap();
        let h = MeanAggregator.aggregate(&view, &feat(), &feat()).unwrap();
        assert_eq!(
            h.to_vec2::<f32>().unwrap(),
            vec![vec![0.0, 0.0], vec![1.0, 2.0], vec![3.0, -4.0]]
        );
    }

    #[test]
    fn test_gcn_aggregator_includes_self() {
        let view = GraphView::incoming(&chain3(), &Device::Cpu).unwrap();
        let h = GcnAggregator.aggregate(&view, &feat(), &feat()).unwrap();
        let h = h.to_vec2::<f32>().unwrap();
        assert_eq!(h[0], vec![1.0, 2.0]);
        assert_eq!(h[1], vec![2.0, -1.0]);
        assert!(!GcnAggregator.uses_self_loop());
    }

    #[test]
    fn test_pool_aggregator_takes_max() {
        let mut g = GraphData::new();
        g.add_nodes(3);
        g.add_edge(0, 2).unwrap();
        g.add_edge(1, 2).unwrap();
        let view = GraphView::incoming(&g, &Device::Cpu).unwrap();
        let identity = Linear::new(Tensor::eye(2, DType::F32, &Device::Cpu).unwrap(), None);
        let h = PoolAggregator::from_linear(identity)
            .aggregate(&view, &feat(), &feat())
            .unwrap();
        let h = h.to_vec2::<f32>().unwrap();
        // relu(-4) = 0
        assert_eq!(h[2], vec![3.0, 2.0]);
        assert_eq!(h[0], vec![0.0, 0.0]);
    }

    #[test]
    fn test_lstm_aggregator_shape() {
        let varmap = VarMap::new();
        let agg = LstmAggregator::new(2, vb(&varmap)).unwrap();
        let view = GraphView::incoming(&chain3(), &Device::Cpu).unwrap();
        let h = agg.aggregate(&view, &feat(), &feat()).unwrap();
        assert_eq!(h.dims(), &[3, 2]);
        assert_eq!(h.to_vec2::<f32>().unwrap()[0], vec![0.0, 0.0]);
    }

    #[test]
    fn test_uni_stack_output_shape() {
        for agg in [
            AggregatorType::Mean,
            AggregatorType::Gcn,
            AggregatorType::Pool,
            AggregatorType::Lstm,
        ] {
            let varmap = VarMap::new();
            let config = GraphSageConfig::new(2, 2, 4, 3)
                .with_aggregator(agg)
                .with_activation(Activation::Relu);
            let model = GraphSage::new(config, vb(&varmap)).unwrap();
            let out = model.forward(&chain3(), &feat(), false).unwrap();
            assert_eq!(out.dims(), &[3, 3]);
        }
    }

    #[test]
    fn test_bi_sep_concatenates_directions() {
        let varmap = VarMap::new();
        let config = GraphSageConfig::new(3, 2, 5, 6).with_direction(DirectionOption::BiSep);
        let model = GraphSage::new(config, vb(&varmap)).unwrap();
        let out = model.forward(&chain3(), &feat(), false).unwrap();
        assert_eq!(out.dims(), &[3, 6]);

        let odd = GraphSageConfig::new(1, 2, 4, 5).with_direction(DirectionOption::BiSep);
        assert!(matches!(
            GraphSage::new(odd, vb(&VarMap::new())),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_bi_fuse_output_shape() {
        let varmap = VarMap::new();
        let config = GraphSageConfig::new(2, 2, 4, 3)
            .with_direction(DirectionOption::BiFuse)
            .with_aggregator(AggregatorType::Pool)
            .with_activation(Activation::Sigmoid);
        let model = GraphSage::new(config, vb(&varmap)).unwrap();
        let out = model.forward(&chain3(), &feat(), true).unwrap();
        assert_eq!(out.dims(), &[3, 3]);
    }

    #[test]
    fn test_hidden_size_count_mismatch() {
        let config = GraphSageConfig::new(3, 2, 4, 3).with_hidden_sizes(vec![4, 4, 4]);
        assert!(matches!(
            GraphSage::new(config, vb(&VarMap::new())),
            Err(Error::DimensionMismatch { expected: 2, got: 3 })
        ));
    }

    #[test]
    fn test_l2_norm_output() {
        let varmap = VarMap::new();
        let config = GraphSageConfig::new(1, 2, 4, 3).with_l2_norm(true);
        let model = GraphSage::new(config, vb(&varmap)).unwrap();
        let out = model.forward(&chain3(), &feat(), false).unwrap();
        for row in out.to_vec2::<f32>().unwrap() {
            let norm: f32 = row.iter().map(|v| v * v).sum::<f32>().sqrt();
            assert!((norm - 1.0).abs() < 1e-4 || norm < 1e-6);
        }
    }

    #[test]
    fn test_feature_count_mismatch() {
        let varmap = VarMap::new();
        let model = GraphSage::new(GraphSageConfig::new(1, 2, 2, 2), vb(&varmap)).unwrap();
        let feat = Tensor::zeros((2, 2), DType::F32, &Device::Cpu).unwrap();
        assert!(model.forward(&chain3(), &feat, false).is_err());
    }
}
