//! Dynamic graph construction.
//!
//! Learns a graph topology from node embeddings instead of taking it from
//! the input. The pipeline is
//!
//! ```text
//! node_emb -> similarity -> sparsify -> normalize -> adj (+ graph_reg)
//! ```
//!
//! [`DynamicGraphConstructionBase`] bundles the three learned-topology stages
//! (similarity metric, sparsifier, regularizer); concrete constructions such
//! as [`NodeEmbeddingGraphConstruction`] add embedding and normalization on
//! top and implement [`DynamicGraphConstruction`].

use crate::convert::{adj_to_graph, graph_to_adj};
use crate::ops::{self, VERY_SMALL_NUMBER};
use crate::regularize::GraphRegularizer;
use crate::similarity::{SimMetricType, SimilarityMetric};
use crate::sparsify::Sparsifier;
use crate::{Error, ExecutionContext, Result};
use candle_core::{DType, Device, Tensor};
use candle_nn::{Dropout, Embedding, Module, VarBuilder};
use lexgraph_core::{chain, GraphData, Tokenizer, Vocab, WordTokenizer};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration of a dynamic graph construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicGraphConstructionConfig {
    pub sim_metric_type: SimMetricType,
    pub num_heads: usize,
    pub top_k_neigh: Option<usize>,
    pub epsilon_neigh: Option<f64>,
    pub smoothness_ratio: Option<f64>,
    pub connectivity_ratio: Option<f64>,
    pub sparsity_ratio: Option<f64>,
    /// Node embedding dimension.
    pub input_size: Option<usize>,
    /// Projection size of `attention` and `rbf_kernel`.
    pub hidden_size: Option<usize>,
    /// Dropout on node embeddings during training.
    pub dropout: Option<f32>,
    /// Lower-case raw text before tokenization.
    pub lower_case: bool,
    /// Weight of a caller-supplied initial adjacency in the final topology.
    pub init_adj_alpha: Option<f64>,
}

impl Default for DynamicGraphConstructionConfig {
    fn default() -> Self {
        Self {
            sim_metric_type: SimMetricType::WeightedCosine,
            num_heads: 1,
            top_k_neigh: None,
            epsilon_neigh: None,
            smoothness_ratio: None,
            connectivity_ratio: None,
            sparsity_ratio: None,
            input_size: None,
            hidden_size: None,
            dropout: None,
            lower_case: true,
            init_adj_alpha: None,
        }
    }
}

impl DynamicGraphConstructionConfig {
    pub fn new(sim_metric_type: SimMetricType) -> Self {
        Self {
            sim_metric_type,
            ..Self::default()
        }
    }

    pub fn with_num_heads(mut self, num_heads: usize) -> Self {
        self.num_heads = num_heads;
        self
    }

    pub fn with_top_k(mut self, k: usize) -> Self {
        self.top_k_neigh = Some(k);
        self
    }

    pub fn with_epsilon(mut self, eps: f64) -> Self {
        self.epsilon_neigh = Some(eps);
        self
    }

    pub fn with_smoothness_ratio(mut self, ratio: f64) -> Self {
        self.smoothness_ratio = Some(ratio);
        self
    }

    pub fn with_connectivity_ratio(mut self, ratio: f64) -> Self {
        self.connectivity_ratio = Some(ratio);
        self
    }

    pub fn with_sparsity_ratio(mut self, ratio: f64) -> Self {
        self.sparsity_ratio = Some(ratio);
        self
    }

    pub fn with_input_size(mut self, size: usize) -> Self {
        self.input_size = Some(size);
        self
    }

    pub fn with_hidden_size(mut self, size: usize) -> Self {
        self.hidden_size = Some(size);
        self
    }

    pub fn with_dropout(mut self, p: f32) -> Self {
        self.dropout = Some(p);
        self
    }

    pub fn with_lower_case(mut self, lower_case: bool) -> Self {
        self.lower_case = lower_case;
        self
    }

    pub fn with_init_adj_alpha(mut self, alpha: f64) -> Self {
        self.init_adj_alpha = Some(alpha);
        self
    }

    /// Parse from JSON; unknown metric names are rejected here.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::InvalidConfig(format!("{}: {e}", path.as_ref().display())))?;
        Self::from_json(&json)
    }

    /// Sparsifier described by `top_k_neigh` / `epsilon_neigh`.
    pub fn sparsifier(&self) -> Result<Sparsifier> {
        Sparsifier::from_options(self.top_k_neigh, self.epsilon_neigh)
    }

    pub fn regularizer(&self) -> GraphRegularizer {
        GraphRegularizer::new(
            self.smoothness_ratio,
            self.connectivity_ratio,
            self.sparsity_ratio,
        )
    }

    /// Check knob combinations that do not depend on the metric's sizes.
    pub fn validate(&self) -> Result<()> {
        self.sparsifier()?;
        if let Some(p) = self.dropout {
            if !(0.0..1.0).contains(&p) {
                return Err(Error::InvalidConfig(format!(
                    "dropout must be in [0, 1), got {p}"
                )));
            }
        }
        if let Some(alpha) = self.init_adj_alpha {
            if !(0.0..=1.0).contains(&alpha) {
                return Err(Error::InvalidConfig(format!(
                    "init_adj_alpha must be in [0, 1], got {alpha}"
                )));
            }
        }
        Ok(())
    }
}

/// Shared machinery of dynamic graph constructions.
pub struct DynamicGraphConstructionBase {
    config: DynamicGraphConstructionConfig,
    metric: SimilarityMetric,
    sparsifier: Sparsifier,
    regularizer: GraphRegularizer,
}

impl DynamicGraphConstructionBase {
    /// Validate `config` and build the metric, sparsifier and regularizer.
    ///
    /// Metric parameters are registered under `vb`.
    pub fn new(config: DynamicGraphConstructionConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;
        let sparsifier = config.sparsifier()?;
        let regularizer = config.regularizer();
        let metric = SimilarityMetric::new(
            config.sim_metric_type,
            config.num_heads,
            config.input_size,
            config.hidden_size,
            vb,
        )?;
        tracing::info!(
            metric = %config.sim_metric_type,
            sparsifier = ?sparsifier,
            regularized = regularizer.is_enabled(),
            "built dynamic graph construction"
        );
        Ok(Self {
            config,
            metric,
            sparsifier,
            regularizer,
        })
    }

    pub fn config(&self) -> &DynamicGraphConstructionConfig {
        &self.config
    }

    pub fn metric(&self) -> &SimilarityMetric {
        &self.metric
    }

    pub fn sparsifier(&self) -> Sparsifier {
        self.sparsifier
    }

    pub fn regularizer(&self) -> GraphRegularizer {
        self.regularizer
    }

    /// Value marking "no edge" in similarity and sparsified matrices.
    pub fn mask_off_val(&self) -> f64 {
        self.metric.mask_off_val()
    }

    /// Dense similarity of every node pair, sentinel where `node_mask` is zero.
    pub fn compute_similarity_metric(
        &self,
        node_emb: &Tensor,
        node_mask: Option<&Tensor>,
    ) -> Result<Tensor> {
        self.metric.compute(node_emb, node_mask)
    }

    /// Apply the configured sparsifier.
    pub fn sparsify_graph(&self, adj: &Tensor) -> Result<Tensor> {
        self.sparsifier.apply(adj, self.mask_off_val())
    }

    /// Regularization loss of `adj` given `node_feat`.
    ///
    /// Batched inputs `(B, N, N)` / `(B, N, D)` are averaged over the batch.
    pub fn compute_graph_regularization(&self, adj: &Tensor, node_feat: &Tensor) -> Result<Tensor> {
        self.compute_masked_graph_regularization(adj, node_feat, None)
    }

    /// Regularization restricted to the nodes `node_mask` marks valid.
    ///
    /// `node_mask` is the pairwise mask given to the similarity metric; a
    /// node counts as padding when its whole row is masked.
    pub fn compute_masked_graph_regularization(
        &self,
        adj: &Tensor,
        node_feat: &Tensor,
        node_mask: Option<&Tensor>,
    ) -> Result<Tensor> {
        let valid = node_mask
            .map(|mask| ops::node_validity(mask, adj))
            .transpose()?;
        match adj.rank() {
            2 => self
                .regularizer
                .compute_masked(adj, node_feat, valid.as_ref()),
            3 => {
                let batch = adj.dim(0)?;
                if node_feat.rank() != 3 || node_feat.dim(0)? != batch {
                    return Err(Error::DimensionMismatch {
                        expected: batch,
                        got: node_feat.dims().first().copied().unwrap_or(0),
                    });
                }
                let mut losses = Vec::with_capacity(batch);
                for b in 0..batch {
                    let valid_b = valid.as_ref().map(|v| v.get(b)).transpose()?;
                    losses.push(self.regularizer.compute_masked(
                        &adj.get(b)?,
                        &node_feat.get(b)?,
                        valid_b.as_ref(),
                    )?);
                }
                Ok(Tensor::stack(&losses, 0)?.mean(0)?)
            }
            r => Err(Error::DimensionMismatch { expected: 2, got: r }),
        }
    }

    /// Chain graph over the tokens of `raw_text`.
    pub fn raw_text_to_init_graph<T: Tokenizer + ?Sized>(
        raw_text: &str,
        lower_case: bool,
        tokenizer: &T,
    ) -> GraphData {
        chain::raw_text_to_init_graph(raw_text, lower_case, tokenizer)
    }
}

/// Learned adjacency plus the regularization loss it incurred.
#[derive(Debug, Clone)]
pub struct TopologyOutput {
    /// Normalized adjacency, `(N, N)` or `(B, N, N)`.
    pub adj: Tensor,
    /// Present when at least one regularization term is enabled.
    pub graph_reg: Option<Tensor>,
}

/// Everything produced from one piece of raw text.
#[derive(Debug, Clone)]
pub struct ConstructedGraph {
    /// Learned graph; nodes keep their tokens, edges carry adjacency weights.
    pub graph: GraphData,
    /// `(N, input_size)` node embeddings.
    pub node_emb: Tensor,
    pub adj: Tensor,
    pub graph_reg: Option<Tensor>,
}

/// Entry points shared by dynamic graph constructions.
pub trait DynamicGraphConstruction {
    /// Initial node embeddings from token ids `(N,)` or `(B, N)`.
    fn embedding(&self, token_ids: &Tensor, train: bool) -> Result<Tensor>;

    /// Learned topology from node embeddings.
    ///
    /// `init_adj` is an optional prior adjacency of the same shape as the
    /// output; `node_mask` marks valid node pairs.
    fn topology(
        &self,
        node_emb: &Tensor,
        init_adj: Option<&Tensor>,
        node_mask: Option<&Tensor>,
    ) -> Result<TopologyOutput>;

    /// Tokenize, embed and learn the topology of `raw_text`.
    fn forward(&self, raw_text: &str, train: bool) -> Result<ConstructedGraph>;
}

/// Graph construction whose topology depends only on word embeddings.
pub struct NodeEmbeddingGraphConstruction<T: Tokenizer = WordTokenizer> {
    base: DynamicGraphConstructionBase,
    vocab: Vocab,
    word_emb: Embedding,
    dropout: Option<Dropout>,
    tokenizer: T,
    device: Device,
}

impl NodeEmbeddingGraphConstruction<WordTokenizer> {
    /// Build with the default [`WordTokenizer`].
    pub fn new(
        vocab: Vocab,
        config: DynamicGraphConstructionConfig,
        ctx: &ExecutionContext,
        vb: VarBuilder,
    ) -> Result<Self> {
        Self::with_tokenizer(vocab, config, WordTokenizer, ctx, vb)
    }
}

impl<T: Tokenizer> NodeEmbeddingGraphConstruction<T> {
    pub fn with_tokenizer(
        vocab: Vocab,
        config: DynamicGraphConstructionConfig,
        tokenizer: T,
        ctx: &ExecutionContext,
        vb: VarBuilder,
    ) -> Result<Self> {
        let input_size = config.input_size.filter(|s| *s > 0).ok_or_else(|| {
            Error::InvalidConfig("node embedding construction requires input_size".into())
        })?;
        let word_emb = candle_nn::embedding(vocab.len(), input_size, vb.pp("word_emb"))?;
        let dropout = config.dropout.filter(|p| *p > 0.0).map(Dropout::new);
        let base = DynamicGraphConstructionBase::new(config, vb.pp("graph_learner"))?;
        Ok(Self {
            base,
            vocab,
            word_emb,
            dropout,
            tokenizer,
            device: ctx.device.clone(),
        })
    }

    pub fn base(&self) -> &DynamicGraphConstructionBase {
        &self.base
    }

    pub fn vocab(&self) -> &Vocab {
        &self.vocab
    }

    /// Row-normalize a sparsified similarity matrix.
    ///
    /// Attention scores go through a softmax (the `-INF` sentinel becomes
    /// zero weight). Affinities are clamped at zero and divided by their row
    /// sums; negative cosine scores carry no edge weight.
    fn normalize(&self, adj: &Tensor) -> Result<Tensor> {
        if self.base.config.sim_metric_type.is_attention() {
            Ok(candle_nn::ops::softmax_last_dim(adj)?)
        } else {
            let adj = adj.relu()?;
            let denom = ops::row_sum(&adj)?.maximum(VERY_SMALL_NUMBER)?;
            Ok(adj.broadcast_div(&denom)?)
        }
    }

    fn fuse_init_adj(&self, adj: Tensor, init_adj: Option<&Tensor>) -> Result<Tensor> {
        match (self.base.config.init_adj_alpha, init_adj) {
            (Some(alpha), Some(init)) => {
                if init.dims() != adj.dims() {
                    return Err(Error::DimensionMismatch {
                        expected: adj.elem_count(),
                        got: init.elem_count(),
                    });
                }
                let denom = ops::row_sum(init)?.maximum(VERY_SMALL_NUMBER)?;
                let init = init.broadcast_div(&denom)?;
                Ok(((adj * (1.0 - alpha))? + (init * alpha)?)?)
            }
            (Some(_), None) => Err(Error::MissingTensor(
                "init_adj_alpha is set but no initial adjacency was given".into(),
            )),
            (None, Some(_)) => {
                tracing::warn!("initial adjacency ignored without init_adj_alpha");
                Ok(adj)
            }
            (None, None) => Ok(adj),
        }
    }
}

impl<T: Tokenizer> DynamicGraphConstruction for NodeEmbeddingGraphConstruction<T> {
    fn embedding(&self, token_ids: &Tensor, train: bool) -> Result<Tensor> {
        let emb = self.word_emb.forward(token_ids)?;
        match &self.dropout {
            Some(dropout) => Ok(dropout.forward(&emb, train)?),
            None => Ok(emb),
        }
    }

    fn topology(
        &self,
        node_emb: &Tensor,
        init_adj: Option<&Tensor>,
        node_mask: Option<&Tensor>,
    ) -> Result<TopologyOutput> {
        let sim = self.base.compute_similarity_metric(node_emb, node_mask)?;
        let sparse = self.base.sparsify_graph(&sim)?;
        let adj = self.normalize(&sparse)?;
        let adj = self.fuse_init_adj(adj, init_adj)?;
        // a fully masked row still softmaxes to a uniform distribution
        let adj = match node_mask {
            Some(mask) => ops::masked_fill(&adj, mask, 0.0)?,
            None => adj,
        };

        let graph_reg = if self.base.regularizer.is_enabled() {
            Some(
                self.base
                    .compute_masked_graph_regularization(&adj, node_emb, node_mask)?,
            )
        } else {
            None
        };
        tracing::debug!(shape = ?adj.dims(), regularized = graph_reg.is_some(), "inferred topology");
        Ok(TopologyOutput { adj, graph_reg })
    }

    fn forward(&self, raw_text: &str, train: bool) -> Result<ConstructedGraph> {
        let init = DynamicGraphConstructionBase::raw_text_to_init_graph(
            raw_text,
            self.base.config.lower_case,
            &self.tokenizer,
        );
        if init.is_empty() {
            return Err(Error::EmptyInput("raw text has no tokens".into()));
        }
        let tokens = init.tokens();
        let ids = self.vocab.to_ids(&tokens);
        let ids = Tensor::new(ids.as_slice(), &self.device)?;
        let node_emb = self.embedding(&ids, train)?;

        // the chain graph is the prior when fusion is configured
        let init_adj = match self.base.config.init_adj_alpha {
            Some(_) => Some(graph_to_adj(&init, &self.device)?.to_dtype(node_emb.dtype())?),
            None => None,
        };
        let TopologyOutput { adj, graph_reg } = self.topology(&node_emb, init_adj.as_ref(), None)?;

        // normalized adjacency uses 0 for "no edge" whatever the metric
        let mut graph = adj_to_graph(&adj.to_dtype(DType::F32)?.detach(), 0.0, false)?;
        for (idx, tok) in tokens.iter().enumerate() {
            graph.set_token(idx, *tok)?;
        }
        Ok(ConstructedGraph {
            graph,
            node_emb,
            adj,
            graph_reg,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparsify::row_edge_counts;
    use candle_nn::VarMap;

    fn vocab() -> Vocab {
        Vocab::from_tokens(["the", "cat", "sat", "on", "mat", "."], 1)
    }

    fn build(config: DynamicGraphConstructionConfig) -> (VarMap, NodeEmbeddingGraphConstruction) {
        let ctx = ExecutionContext::cpu(0);
        let varmap = VarMap::new();
        let model =
            NodeEmbeddingGraphConstruction::new(vocab(), config, &ctx, ctx.var_builder(&varmap))
                .unwrap();
        (varmap, model)
    }

    #[test]
    fn test_config_defaults_and_builders() {
        let config = DynamicGraphConstructionConfig::default();
        assert_eq!(config.sim_metric_type, SimMetricType::WeightedCosine);
        assert_eq!(config.num_heads, 1);
        assert!(config.lower_case);

        let config = DynamicGraphConstructionConfig::new(SimMetricType::Attention)
            .with_num_heads(4)
            .with_top_k(3)
            .with_input_size(8)
            .with_hidden_size(16);
        assert_eq!(config.sparsifier().unwrap(), Sparsifier::TopK(3));
        assert_eq!(config.hidden_size, Some(16));
    }

    #[test]
    fn test_config_from_json() {
        let config = DynamicGraphConstructionConfig::from_json(
            r#"{"sim_metric_type": "rbf_kernel", "epsilon_neigh": 0.5, "input_size": 4, "hidden_size": 2}"#,
        )
        .unwrap();
        assert_eq!(config.sim_metric_type, SimMetricType::RbfKernel);
        assert_eq!(config.epsilon_neigh, Some(0.5));
        assert_eq!(config.num_heads, 1);

        let err = DynamicGraphConstructionConfig::from_json(r#"{"sim_metric_type": "dot"}"#);
        assert!(matches!(err, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_base_rejects_both_sparsifiers() {
        let varmap = VarMap::new();
        let vb = ExecutionContext::default().var_builder(&varmap);
        let config = DynamicGraphConstructionConfig::new(SimMetricType::Cosine)
            .with_top_k(2)
            .with_epsilon(0.3);
        assert!(matches!(
            DynamicGraphConstructionBase::new(config, vb),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_base_pipeline_on_cosine() {
        let ctx = ExecutionContext::default();
        let varmap = VarMap::new();
        let config = DynamicGraphConstructionConfig::new(SimMetricType::Cosine).with_top_k(2);
        let base = DynamicGraphConstructionBase::new(config, ctx.var_builder(&varmap)).unwrap();
        assert_eq!(base.mask_off_val(), 0.0);

        let emb = ctx
            .tensor_from_rows(&[vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]])
            .unwrap();
        let sim = base.compute_similarity_metric(&emb, None).unwrap();
        let adj = base.sparsify_graph(&sim).unwrap();
        assert_eq!(row_edge_counts(&adj, 0.0).unwrap(), vec![2, 2, 2]);
    }

    #[test]
    fn test_batched_regularization_is_scalar() {
        let ctx = ExecutionContext::default();
        let varmap = VarMap::new();
        let config = DynamicGraphConstructionConfig::new(SimMetricType::Cosine).with_sparsity_ratio(1.0);
        let base = DynamicGraphConstructionBase::new(config, ctx.var_builder(&varmap)).unwrap();
        let adj = Tensor::ones((2, 3, 3), DType::F32, &ctx.device).unwrap();
        let feat = Tensor::zeros((2, 3, 4), DType::F32, &ctx.device).unwrap();
        let loss = base.compute_graph_regularization(&adj, &feat).unwrap();
        assert_eq!(loss.rank(), 0);
        assert!((loss.to_scalar::<f32>().unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_missing_input_size() {
        let ctx = ExecutionContext::default();
        let varmap = VarMap::new();
        let result = NodeEmbeddingGraphConstruction::new(
            vocab(),
            DynamicGraphConstructionConfig::new(SimMetricType::Cosine),
            &ctx,
            ctx.var_builder(&varmap),
        );
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_forward_builds_weighted_graph() {
        let config = DynamicGraphConstructionConfig::new(SimMetricType::WeightedCosine)
            .with_num_heads(2)
            .with_input_size(8)
            .with_top_k(2)
            .with_smoothness_ratio(0.2);
        let (_varmap, model) = build(config);
        let out = model.forward("The cat sat on the mat.", false).unwrap();

        assert_eq!(out.node_emb.dims(), &[7, 8]);
        assert_eq!(out.adj.dims(), &[7, 7]);
        assert_eq!(out.graph.node_count(), 7);
        assert_eq!(out.graph.token(0), Some("the"));
        assert_eq!(out.graph.token(6), Some("."));
        assert!(out.graph_reg.is_some());
        for i in 0..7 {
            assert!(out.graph.out_degree(i) <= 2);
        }
    }

    #[test]
    fn test_attention_rows_sum_to_one() {
        let config = DynamicGraphConstructionConfig::new(SimMetricType::GatAttention)
            .with_num_heads(2)
            .with_input_size(4)
            .with_top_k(3);
        let (_varmap, model) = build(config);
        let out = model.forward("the cat sat on the mat", false).unwrap();
        assert!(out.graph_reg.is_none());
        for row in out.adj.to_vec2::<f32>().unwrap() {
            let s: f32 = row.iter().sum();
            assert!((s - 1.0).abs() < 1e-4);
            assert!(row.iter().filter(|v| **v > 0.0).count() <= 3);
        }
    }

    #[test]
    fn test_empty_text_is_rejected() {
        let config = DynamicGraphConstructionConfig::new(SimMetricType::Cosine).with_input_size(4);
        let (_varmap, model) = build(config);
        assert!(matches!(model.forward("   ", false), Err(Error::EmptyInput(_))));
    }

    #[test]
    fn test_init_adj_fusion() {
        let config = DynamicGraphConstructionConfig::new(SimMetricType::Cosine)
            .with_input_size(2)
            .with_init_adj_alpha(1.0);
        let (_varmap, model) = build(config);
        let emb = Tensor::new(&[[1f32, 0.], [0., 1.]], &Device::Cpu).unwrap();
        let init = Tensor::new(&[[0f32, 2.], [1., 1.]], &Device::Cpu).unwrap();

        let out = model.topology(&emb, Some(&init), None).unwrap();
        assert_eq!(
            out.adj.to_vec2::<f32>().unwrap(),
            vec![vec![0.0, 1.0], vec![0.5, 0.5]]
        );
        assert!(matches!(
            model.topology(&emb, None, None),
            Err(Error::MissingTensor(_))
        ));
    }

    #[test]
    fn test_forward_fuses_chain_prior() {
        let config = DynamicGraphConstructionConfig::new(SimMetricType::Cosine)
            .with_input_size(4)
            .with_init_adj_alpha(0.5);
        let (_varmap, model) = build(config);
        let out = model.forward("cat sat", false).unwrap();
        // last node has no chain successor, so its prior row is all zero
        let adj = out.adj.to_vec2::<f32>().unwrap();
        let row_sum = |r: &Vec<f32>| r.iter().sum::<f32>();
        assert!((row_sum(&adj[0]) - 1.0).abs() < 1e-4);
        assert!((row_sum(&adj[1]) - 0.5).abs() < 1e-4);
        assert!(out.graph.has_edge(0, 1));
    }

    #[test]
    fn test_padding_node_gets_no_attention() {
        let config = DynamicGraphConstructionConfig::new(SimMetricType::Attention)
            .with_input_size(2)
            .with_hidden_size(4);
        let (_varmap, model) = build(config);
        let emb = Tensor::new(&[[1f32, 0.], [0., 1.], [0., 0.]], &Device::Cpu).unwrap();
        let valid = Tensor::new(&[1f32, 1., 0.], &Device::Cpu).unwrap();
        let mask = crate::similarity::pairwise_node_mask(&valid).unwrap();

        let out = model.topology(&emb, None, Some(&mask)).unwrap();
        let adj = out.adj.to_vec2::<f32>().unwrap();
        assert_eq!(adj[2], vec![0.0, 0.0, 0.0]);
        for row in &adj[..2] {
            assert_eq!(row[2], 0.0);
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-4);
        }

        let graph = adj_to_graph(&out.adj, 0.0, false).unwrap();
        assert_eq!(graph.out_degree(2), 0);
        assert!(graph.edges().all(|(src, dst, _)| src != 2 && dst != 2));
    }

    #[test]
    fn test_padding_node_leaves_regularization_unchanged() {
        let config = DynamicGraphConstructionConfig::new(SimMetricType::Cosine)
            .with_input_size(2)
            .with_connectivity_ratio(1.0)
            .with_sparsity_ratio(1.0);
        let (_varmap, model) = build(config);

        let emb = Tensor::new(&[[1f32, 0.], [1., 0.]], &Device::Cpu).unwrap();
        let plain = model.topology(&emb, None, None).unwrap();
        let plain = plain.graph_reg.unwrap().to_scalar::<f32>().unwrap();
        assert!((plain - 0.25).abs() < 1e-5);

        let padded = Tensor::new(&[[1f32, 0.], [1., 0.], [0., 0.]], &Device::Cpu).unwrap();
        let valid = Tensor::new(&[1f32, 1., 0.], &Device::Cpu).unwrap();
        let mask = crate::similarity::pairwise_node_mask(&valid).unwrap();
        let out = model.topology(&padded, None, Some(&mask)).unwrap();
        let loss = out.graph_reg.unwrap().to_scalar::<f32>().unwrap();
        assert!((loss - plain).abs() < 1e-5, "{loss} vs {plain}");
    }

    #[test]
    fn test_batched_regularization_honours_mask() {
        let ctx = ExecutionContext::default();
        let varmap = VarMap::new();
        let config = DynamicGraphConstructionConfig::new(SimMetricType::Cosine)
            .with_connectivity_ratio(1.0);
        let base = DynamicGraphConstructionBase::new(config, ctx.var_builder(&varmap)).unwrap();
        let adj = Tensor::new(
            &[[[0.5f32, 0.5, 0.], [0.5, 0.5, 0.], [0., 0., 0.]]; 2],
            &ctx.device,
        )
        .unwrap();
        let feat = Tensor::zeros((2, 3, 2), DType::F32, &ctx.device).unwrap();
        let valid = Tensor::new(&[[1f32, 1., 0.]; 2], &ctx.device).unwrap();
        let mask = crate::similarity::pairwise_node_mask(&valid).unwrap();

        let masked = base
            .compute_masked_graph_regularization(&adj, &feat, Some(&mask))
            .unwrap();
        assert!(masked.to_scalar::<f32>().unwrap().abs() < 1e-5);
        let unmasked = base.compute_graph_regularization(&adj, &feat).unwrap();
        assert!(unmasked.to_scalar::<f32>().unwrap() > 20.0);
    }

    #[test]
    fn test_negative_similarity_carries_no_weight() {
        let config = DynamicGraphConstructionConfig::new(SimMetricType::Cosine).with_input_size(2);
        let (_varmap, model) = build(config);
        // opposite vectors: every row sums to zero before clamping
        let emb = Tensor::new(&[[1f32, 0.], [-1., 0.]], &Device::Cpu).unwrap();
        let out = model.topology(&emb, None, None).unwrap();
        assert_eq!(
            out.adj.to_vec2::<f32>().unwrap(),
            vec![vec![1.0, 0.0], vec![0.0, 1.0]]
        );
    }

    #[test]
    fn test_same_seed_same_embeddings() {
        let config = DynamicGraphConstructionConfig::new(SimMetricType::Cosine)
            .with_input_size(4)
            .with_top_k(2);
        let (_a, first) = build(config.clone());
        let (_b, second) = build(config);
        let text = "the cat sat on the mat";
        let x = first.forward(text, false).unwrap();
        let y = second.forward(text, false).unwrap();
        assert_eq!(
            x.node_emb.to_vec2::<f32>().unwrap(),
            y.node_emb.to_vec2::<f32>().unwrap()
        );
        assert_eq!(x.adj.to_vec2::<f32>().unwrap(), y.adj.to_vec2::<f32>().unwrap());
    }
}
