//! Knowledge-graph completion heads.
//!
//! Both heads score every candidate for a batch of queries:
//!
//! - [`KgQuery::EntityRelation`] `(head, relation)` pairs score all entities
//!   as tails, giving `(L, N)`;
//! - [`KgQuery::EntityEntity`] `(head, tail)` pairs score all relations,
//!   giving `(L, R)`.
//!
//! | Head | Score |
//! |------|-------|
//! | [`DistMult`] | `sigmoid((e_h * r) . e_t)` (`tanh` for soft-margin loss) |
//! | [`TransE`] | `||e_h + r - e_t||_p` on L2-normalized embeddings |

use crate::classification::select_rows;
use crate::ops::l2_normalize;
use crate::{Error, Result};
use candle_core::{Tensor, D};
use candle_nn::{Dropout, Embedding, Init, Module, VarBuilder};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Training loss the scores are shaped for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum KgLossType {
    #[default]
    #[serde(rename = "BCELoss")]
    BceLoss,
    SoftMarginLoss,
    MarginLoss,
    SoftplusLoss,
    SigmoidLoss,
}

impl KgLossType {
    /// Targets are `-1 / 1` and scores stay unsquashed or `tanh`-squashed.
    pub fn is_margin(&self) -> bool {
        matches!(self, KgLossType::SoftMarginLoss | KgLossType::MarginLoss)
    }

    /// Losses computed from positive / negative score lists.
    pub fn needs_multi_label(&self) -> bool {
        matches!(self, KgLossType::SoftplusLoss | KgLossType::SigmoidLoss)
    }
}

impl FromStr for KgLossType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "BCELoss" => Ok(KgLossType::BceLoss),
            "SoftMarginLoss" => Ok(KgLossType::SoftMarginLoss),
            "MarginLoss" => Ok(KgLossType::MarginLoss),
            "SoftplusLoss" => Ok(KgLossType::SoftplusLoss),
            "SigmoidLoss" => Ok(KgLossType::SigmoidLoss),
            other => Err(Error::InvalidConfig(format!("unknown loss type: {other}"))),
        }
    }
}

/// Batch of completion queries.
#[derive(Debug, Clone, PartialEq)]
pub enum KgQuery {
    /// `(head entity, relation)`: rank tail entities.
    EntityRelation(Vec<(u32, u32)>),
    /// `(head entity, tail entity)`: rank relations.
    EntityEntity(Vec<(u32, u32)>),
}

impl KgQuery {
    pub fn len(&self) -> usize {
        self.pairs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs().is_empty()
    }

    fn pairs(&self) -> &[(u32, u32)] {
        match self {
            KgQuery::EntityRelation(p) | KgQuery::EntityEntity(p) => p,
        }
    }

    fn split(&self) -> (Vec<u32>, Vec<u32>) {
        self.pairs().iter().copied().unzip()
    }
}

/// Scores of one query batch.
#[derive(Debug, Clone)]
pub struct KgScores {
    /// `(L, N)` or `(L, R)`.
    pub logits: Tensor,
    /// Scores at positions labelled 1, when a multi-label matrix was given.
    pub positive: Option<Tensor>,
    /// Scores at positions labelled 0.
    pub negative: Option<Tensor>,
}

/// Shared interface of completion heads.
pub trait KgCompletionLayer {
    /// # Arguments
    /// - `node_emb`: `(N, H)` entity embeddings
    /// - `rel_emb`: `(R, H)` relation embeddings from the encoder; must be
    ///   `None` when the head owns a relation table
    /// - `multi_label`: optional binary `(L, candidates)` targets
    fn score(
        &self,
        node_emb: &Tensor,
        rel_emb: Option<&Tensor>,
        query: &KgQuery,
        multi_label: Option<&Tensor>,
        train: bool,
    ) -> Result<KgScores>;

    fn loss_type(&self) -> KgLossType;
}

/// Where relation embeddings come from.
enum RelationSource {
    Encoder,
    Table(Embedding),
}

impl RelationSource {
    /// `num_relations` given: learn a table; otherwise expect the encoder
    /// to supply relation embeddings.
    fn new(num_relations: Option<usize>, embedding_dim: usize, vb: VarBuilder) -> Result<Self> {
        match num_relations {
            Some(r) => {
                let std = (2.0 / (r + embedding_dim) as f64).sqrt();
                let weight = vb.get_with_hints(
                    (r, embedding_dim),
                    "rel_emb",
                    Init::Randn { mean: 0.0, stdev: std },
                )?;
                Ok(RelationSource::Table(Embedding::new(weight, embedding_dim)))
            }
            None => Ok(RelationSource::Encoder),
        }
    }

    fn resolve(&self, rel_emb: Option<&Tensor>) -> Result<Tensor> {
        match (self, rel_emb) {
            (RelationSource::Encoder, Some(r)) => Ok(r.clone()),
            (RelationSource::Encoder, None) => Err(Error::MissingTensor(
                "rel_emb is required when relations come from the encoder".into(),
            )),
            (RelationSource::Table(table), None) => Ok(table.embeddings().clone()),
            (RelationSource::Table(_), Some(_)) => Err(Error::InvalidConfig(
                "rel_emb given to a head that learns its own relations".into(),
            )),
        }
    }
}

fn check_inputs(node_emb: &Tensor, rel: &Tensor, query: &KgQuery) -> Result<()> {
    if query.is_empty() {
        return Err(Error::EmptyInput("no completion queries".into()));
    }
    let h = node_emb.dim(1)?;
    let hr = rel.dim(1)?;
    if h != hr {
        return Err(Error::DimensionMismatch { expected: h, got: hr });
    }
    Ok(())
}

/// Split scores by a binary label matrix of the same shape.
fn split_by_label(pred: &Tensor, labels: &Tensor) -> Result<(Tensor, Tensor)> {
    if pred.dims() != labels.dims() {
        return Err(Error::DimensionMismatch {
            expected: pred.elem_count(),
            got: labels.elem_count(),
        });
    }
    let flat = labels.flatten_all()?.to_dtype(candle_core::DType::F32)?.to_vec1::<f32>()?;
    let mut pos = Vec::new();
    let mut neg = Vec::new();
    for (i, &v) in flat.iter().enumerate() {
        if v == 1.0 {
            pos.push(i as u32);
        } else if v == 0.0 {
            neg.push(i as u32);
        }
    }
    let pred = pred.flatten_all()?;
    let take = |ids: Vec<u32>| -> Result<Tensor> {
        let ids = Tensor::new(ids.as_slice(), pred.device())?;
        Ok(pred.index_select(&ids, 0)?)
    };
    Ok((take(pos)?, take(neg)?))
}

fn finish(loss: KgLossType, pred: Tensor, multi_label: Option<&Tensor>) -> Result<KgScores> {
    match multi_label {
        Some(labels) => {
            let (positive, negative) = split_by_label(&pred, labels)?;
            Ok(KgScores {
                logits: pred,
                positive: Some(positive),
                negative: Some(negative),
            })
        }
        None if loss.needs_multi_label() => Err(Error::MissingTensor(format!(
            "{loss:?} needs a multi-label target matrix"
        ))),
        None => Ok(KgScores {
            logits: pred,
            positive: None,
            negative: None,
        }),
    }
}

/// DistMult (Yang et al., 2015): `f(h, r, t) = e_h^T diag(r) e_t`.
pub struct DistMult {
    relations: RelationSource,
    input_dropout: Option<Dropout>,
    loss_type: KgLossType,
}

impl DistMult {
    /// # Arguments
    /// - `input_dropout`: dropout on the selected head / relation rows
    /// - `num_relations`: `Some` to learn a relation table of
    ///   `embedding_dim` columns, `None` to take relations from the encoder
    pub fn new(
        input_dropout: f32,
        num_relations: Option<usize>,
        embedding_dim: usize,
        loss_type: KgLossType,
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            relations: RelationSource::new(num_relations, embedding_dim, vb)?,
            input_dropout: (input_dropout > 0.0).then(|| Dropout::new(input_dropout)),
            loss_type,
        })
    }

    fn drop(&self, xs: Tensor, train: bool) -> Result<Tensor> {
        match &self.input_dropout {
            Some(d) => Ok(d.forward(&xs, train)?),
            None => Ok(xs),
        }
    }
}

impl KgCompletionLayer for DistMult {
    fn score(
        &self,
        node_emb: &Tensor,
        rel_emb: Option<&Tensor>,
        query: &KgQuery,
        multi_label: Option<&Tensor>,
        train: bool,
    ) -> Result<KgScores> {
        let rel = self.relations.resolve(rel_emb)?;
        check_inputs(node_emb, &rel, query)?;
        let (left, right) = query.split();

        let logits = match query {
            KgQuery::EntityRelation(_) => {
                let e = self.drop(select_rows(node_emb, &left)?, train)?;
                let r = self.drop(select_rows(&rel, &right)?, train)?;
                (e * r)?.matmul(&node_emb.t()?)?
            }
            KgQuery::EntityEntity(_) => {
                let h = self.drop(select_rows(node_emb, &left)?, train)?;
                let t = self.drop(select_rows(node_emb, &right)?, train)?;
                (h * t)?.matmul(&rel.t()?)?
            }
        };
        let pred = if self.loss_type == KgLossType::SoftMarginLoss {
            logits.tanh()?
        } else {
            candle_nn::ops::sigmoid(&logits)?
        };
        tracing::debug!(queries = query.len(), shape = ?pred.dims(), "distmult scores");
        finish(self.loss_type, pred, multi_label)
    }

    fn loss_type(&self) -> KgLossType {
        self.loss_type
    }
}

/// TransE (Bordes et al., 2013): `||e_h + r - e_t||_p`.
pub struct TransE {
    relations: RelationSource,
    p_norm: f64,
    loss_type: KgLossType,
}

impl TransE {
    pub fn new(
        p_norm: f64,
        num_relations: Option<usize>,
        embedding_dim: usize,
        loss_type: KgLossType,
        vb: VarBuilder,
    ) -> Result<Self> {
        if p_norm <= 0.0 {
            return Err(Error::InvalidConfig(format!("p_norm must be positive, got {p_norm}")));
        }
        Ok(Self {
            relations: RelationSource::new(num_relations, embedding_dim, vb)?,
            p_norm,
            loss_type,
        })
    }

    /// L_p norm over the last dimension.
    fn norm(&self, xs: &Tensor) -> Result<Tensor> {
        let out = if self.p_norm == 1.0 {
            xs.abs()?.sum(D::Minus1)?
        } else if self.p_norm == 2.0 {
            xs.sqr()?.sum(D::Minus1)?.sqrt()?
        } else {
            xs.abs()?
                .powf(self.p_norm)?
                .sum(D::Minus1)?
                .powf(1.0 / self.p_norm)?
        };
        Ok(out)
    }
}

impl KgCompletionLayer for TransE {
    fn score(
        &self,
        node_emb: &Tensor,
        rel_emb: Option<&Tensor>,
        query: &KgQuery,
        multi_label: Option<&Tensor>,
        _train: bool,
    ) -> Result<KgScores> {
        let rel = self.relations.resolve(rel_emb)?;
        check_inputs(node_emb, &rel, query)?;
        let (left, right) = query.split();

        // (L, 1, H) against (1, C, H)
        let diff = match query {
            KgQuery::EntityRelation(_) => {
                let h = l2_normalize(&select_rows(node_emb, &left)?)?;
                let r = l2_normalize(&select_rows(&rel, &right)?)?;
                let tails = l2_normalize(node_emb)?;
                (h + r)?
                    .unsqueeze(1)?
                    .broadcast_sub(&tails.unsqueeze(0)?)?
            }
            KgQuery::EntityEntity(_) => {
                let h = l2_normalize(&select_rows(node_emb, &left)?)?;
                let t = l2_normalize(&select_rows(node_emb, &right)?)?;
                let rels = l2_normalize(&rel)?;
                (h - t)?
                    .unsqueeze(1)?
                    .broadcast_add(&rels.unsqueeze(0)?)?
            }
        };
        let dist = self.norm(&diff)?;
        let pred = if self.loss_type.is_margin() {
            dist
        } else {
            candle_nn::ops::softmax_last_dim(&dist)?
        };
        tracing::debug!(queries = query.len(), shape = ?pred.dims(), "transe scores");
        finish(self.loss_type, pred, multi_label)
    }

    fn loss_type(&self) -> KgLossType {
        self.loss_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn vb(varmap: &VarMap) -> VarBuilder<'_> {
        VarBuilder::from_varmap(varmap, DType::F32, &Device::Cpu)
    }

    fn entities() -> Tensor {
        Tensor::new(&[[1f32, 0.], [0., 1.], [1., 1.]], &Device::Cpu).unwrap()
    }

    fn relations() -> Tensor {
        Tensor::new(&[[1f32, 1.], [2., 0.]], &Device::Cpu).unwrap()
    }

    #[test]
    fn test_parse_loss_type() {
        assert_eq!("BCELoss".parse::<KgLossType>().unwrap(), KgLossType::BceLoss);
        assert!("SoftMarginLoss".parse::<KgLossType>().unwrap().is_margin());
        assert!("L1".parse::<KgLossType>().is_err());
    }

    #[test]
    fn test_distmult_entity_relation_scores() {
        let head = DistMult::new(0.0, None, 2, KgLossType::BceLoss, vb(&VarMap::new())).unwrap();
        let query = KgQuery::EntityRelation(vec![(2, 1)]);
        let scores = head
            .score(&entities(), Some(&relations()), &query, None, false)
            .unwrap();
        // (e2 * r1) = [2, 0]; dot with entities = [2, 0, 2]
        let logits = scores.logits.to_vec2::<f32>().unwrap();
        let sig = |x: f32| 1.0 / (1.0 + (-x).exp());
        assert_eq!(logits[0].len(), 3);
        assert!((logits[0][0] - sig(2.0)).abs() < 1e-6);
        assert!((logits[0][1] - 0.5).abs() < 1e-6);
        assert!(scores.positive.is_none());
    }

    #[test]
    fn test_distmult_entity_entity_scores_relations() {
        let head = DistMult::new(0.0, None, 2, KgLossType::SoftMarginLoss, vb(&VarMap::new())).unwrap();
        let query = KgQuery::EntityEntity(vec![(0, 2), (1, 2)]);
        let scores = head
            .score(&entities(), Some(&relations()), &query, None, false)
            .unwrap();
        assert_eq!(scores.logits.dims(), &[2, 2]);
        // e0 * e2 = [1, 0]; dot with r1 = 2
        let logits = scores.logits.to_vec2::<f32>().unwrap();
        assert!((logits[0][1] - 2f32.tanh()).abs() < 1e-6);
    }

    #[test]
    fn test_missing_relation_embeddings() {
        let head = DistMult::new(0.0, None, 2, KgLossType::BceLoss, vb(&VarMap::new())).unwrap();
        let query = KgQuery::EntityRelation(vec![(0, 0)]);
        assert!(matches!(
            head.score(&entities(), None, &query, None, false),
            Err(Error::MissingTensor(_))
        ));
    }

    #[test]
    fn test_learned_relation_table() {
        let varmap = VarMap::new();
        let head = TransE::new(1.0, Some(4), 2, KgLossType::MarginLoss, vb(&varmap)).unwrap();
        let query = KgQuery::EntityEntity(vec![(0, 1)]);
        let scores = head.score(&entities(), None, &query, None, false).unwrap();
        assert_eq!(scores.logits.dims(), &[1, 4]);
        assert!(matches!(
            head.score(&entities(), Some(&relations()), &query, None, false),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_transe_margin_distance() {
        let head = TransE::new(2.0, None, 2, KgLossType::MarginLoss, vb(&VarMap::new())).unwrap();
        let rel = Tensor::new(&[[0f32, 1.]], &Device::Cpu).unwrap();
        let query = KgQuery::EntityRelation(vec![(0, 0)]);
        let dist = head
            .score(&entities(), Some(&rel), &query, None, false)
            .unwrap()
            .logits
            .to_vec2::<f32>()
            .unwrap();
        // e0 + r = [1, 1]; distance to e2 / |e2| = sqrt(2) - 1 per axis
        let expected = ((1.0 - 1.0 / 2f32.sqrt()).powi(2) * 2.0).sqrt();
        assert!((dist[0][2] - expected).abs() < 1e-5);
        assert!((dist[0][0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_transe_softmax_rows() {
        let head = TransE::new(1.0, None, 2, KgLossType::BceLoss, vb(&VarMap::new())).unwrap();
        let query = KgQuery::EntityRelation(vec![(0, 0), (1, 1)]);
        let scores = head
            .score(&entities(), Some(&relations()), &query, None, false)
            .unwrap();
        for row in scores.logits.to_vec2::<f32>().unwrap() {
            assert!((row.iter().sum::<f32>() - 1.0).abs() < 1e-5);
        }
    }

    #[test]
    fn test_multi_label_split() {
        let head = DistMult::new(0.0, None, 2, KgLossType::SigmoidLoss, vb(&VarMap::new())).unwrap();
        let query = KgQuery::EntityRelation(vec![(0, 0)]);
        let labels = Tensor::new(&[[1f32, 0., 1.]], &Device::Cpu).unwrap();
        let scores = head
            .score(&entities(), Some(&relations()), &query, Some(&labels), false)
            .unwrap();
        assert_eq!(scores.positive.unwrap().dims(), &[2]);
        assert_eq!(scores.negative.unwrap().dims(), &[1]);

        assert!(matches!(
            head.score(&entities(), Some(&relations()), &query, None, false),
            Err(Error::MissingTensor(_))
        ));
    }

    #[test]
    fn test_empty_query_and_bad_index() {
        let head = DistMult::new(0.0, None, 2, KgLossType::BceLoss, vb(&VarMap::new())).unwrap();
        let empty = KgQuery::EntityRelation(Vec::new());
        assert!(matches!(
            head.score(&entities(), Some(&relations()), &empty, None, false),
            Err(Error::EmptyInput(_))
        ));
        let bad = KgQuery::EntityRelation(vec![(7, 0)]);
        assert!(matches!(
            head.score(&entities(), Some(&relations()), &bad, None, false),
            Err(Error::IndexOutOfRange { index: 7, len: 3 })
        ));
    }
}
