//! End-to-end runs: raw text -> learned graph -> encoder -> task head.

use candle_core::Tensor;
use candle_nn::VarMap;
use lexgraph::nn::classification::FeedForwardNodeClassifier;
use lexgraph::nn::ggnn::{Ggnn, GgnnConfig};
use lexgraph::nn::graphsage::{AggregatorType, DirectionOption, GraphSage, GraphSageConfig};
use lexgraph::nn::kg_completion::{DistMult, KgCompletionLayer, KgLossType, KgQuery};
use lexgraph::nn::ops::Activation;
use lexgraph::{
    DynamicGraphConstruction, DynamicGraphConstructionConfig, ExecutionContext,
    NodeEmbeddingGraphConstruction, SimMetricType, Tokenizer, Vocab, WordTokenizer,
};

const TEXT: &str = "the quick brown fox jumps over the lazy dog";

fn build_constructor(
    ctx: &ExecutionContext,
    varmap: &VarMap,
    config: DynamicGraphConstructionConfig,
) -> NodeEmbeddingGraphConstruction {
    let vocab = Vocab::from_tokens(WordTokenizer.tokenize(TEXT), 1);
    NodeEmbeddingGraphConstruction::new(vocab, config, ctx, ctx.var_builder(varmap)).unwrap()
}

#[test]
fn test_text_to_node_predictions() -> Result<(), Box<dyn std::error::Error>> {
    let ctx = ExecutionContext::cpu(7);
    let varmap = VarMap::new();
    let config = DynamicGraphConstructionConfig::new(SimMetricType::WeightedCosine)
        .with_num_heads(2)
        .with_top_k(3)
        .with_input_size(16)
        .with_smoothness_ratio(0.2)
        .with_connectivity_ratio(0.1)
        .with_sparsity_ratio(0.1);
    let constructor = build_constructor(&ctx, &varmap, config);

    let out = constructor.forward(TEXT, true)?;
    assert_eq!(out.graph.node_count(), 9);
    assert_eq!(out.graph.token(2), Some("brown"));
    for i in 0..9 {
        assert!(out.graph.out_degree(i) <= 3);
    }
    assert!(out.graph_reg.is_some());

    let vb = ctx.var_builder(&varmap);
    let sage_config = GraphSageConfig::new(2, 16, 12, 8)
        .with_aggregator(AggregatorType::Mean)
        .with_direction(DirectionOption::BiFuse);
    let sage = GraphSage::new(sage_config, vb.pp("encoder"))?;
    let hidden = sage.forward(&out.graph, &out.node_emb, false)?;
    assert_eq!(hidden.dims(), &[9, 8]);

    let classifier =
        FeedForwardNodeClassifier::new(8, 3, &[6], Activation::Relu, vb.pp("classifier"))?;
    let logits = classifier.forward(&hidden, Some(&[0, 4, 8]))?;
    assert_eq!(logits.dims(), &[3, 3]);

    let preds = classifier.predict(&hidden, None)?;
    assert_eq!(preds.len(), 9);
    assert!(preds.iter().all(|&p| p < 3));
    Ok(())
}

#[test]
fn test_chain_prior_with_ggnn() -> Result<(), Box<dyn std::error::Error>> {
    let ctx = ExecutionContext::cpu(11);
    let varmap = VarMap::new();
    let config = DynamicGraphConstructionConfig::new(SimMetricType::Attention)
        .with_top_k(2)
        .with_input_size(10)
        .with_hidden_size(6)
        .with_init_adj_alpha(0.3);
    let constructor = build_constructor(&ctx, &varmap, config);

    let out = constructor.forward(TEXT, false)?;
    // every row is a convex blend of two distributions
    let sums = out.adj.sum(1)?.to_vec1::<f32>()?;
    for (i, s) in sums.iter().enumerate() {
        let expected = if i + 1 == sums.len() { 0.7 } else { 1.0 };
        assert!((s - expected).abs() < 1e-4, "row {i}: {s}");
    }

    let ggnn_config = GgnnConfig::new(3, 10, 12).with_direction(DirectionOption::BiSep);
    let ggnn = Ggnn::new(ggnn_config, ctx.var_builder(&varmap).pp("ggnn"))?;
    let h = ggnn.forward(&out.graph, &out.node_emb)?;
    assert_eq!(h.dims(), &[9, 24]);
    Ok(())
}

#[test]
fn test_link_scores_over_encoded_entities() -> Result<(), Box<dyn std::error::Error>> {
    let ctx = ExecutionContext::cpu(3);
    let varmap = VarMap::new();
    let config = DynamicGraphConstructionConfig::new(SimMetricType::Cosine)
        .with_epsilon(0.0)
        .with_input_size(8);
    let constructor = build_constructor(&ctx, &varmap, config);
    let out = constructor.forward(TEXT, false)?;

    let head = DistMult::new(
        0.0,
        Some(4),
        8,
        KgLossType::BceLoss,
        ctx.var_builder(&varmap).pp("kg"),
    )?;
    let query = KgQuery::EntityRelation(vec![(0, 1), (3, 2)]);
    let scores = head.score(&out.node_emb, None, &query, None, false)?;
    assert_eq!(scores.logits.dims(), &[2, 9]);

    let probs = scores.logits.flatten_all()?.to_vec1::<f32>()?;
    assert!(probs.iter().all(|p| (0.0..=1.0).contains(p)));

    let mut flags = vec![0f32; 18];
    flags[2] = 1.0;
    let labels = Tensor::from_vec(flags, (2, 9), &ctx.device)?;
    let split = head.score(&out.node_emb, None, &query, Some(&labels), false)?;
    assert_eq!(split.positive.map(|t| t.elem_count()), Some(1));
    assert_eq!(split.negative.map(|t| t.elem_count()), Some(17));
    Ok(())
}
