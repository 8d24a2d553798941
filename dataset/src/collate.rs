use std::collections::BTreeMap;

use burn::prelude::Backend;
use burn::tensor::ElementConversion;

use crate::batch::{Batch, FieldName, PackedPoses};
use crate::error::{DatasetError, Result, mismatch};
use crate::structure::{Leaf, Node};

/// Keeps weight normalization finite when every weight is zero.
const WEIGHT_EPSILON: f32 = 1e-8;

/// How the per example values of one field are merged into a batch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Collation {
    /// Concatenate along the batch axis, recursing into maps and tuples.
    Stack,
    /// Pad variable length pose sequences and rebuild mask and lengths.
    PackPoses,
    /// Stack, then divide by the sum so the weights form a convex combination.
    NormalizeWeight,
    /// Add up the counts.
    Sum,
}

impl FieldName {
    pub fn strategy(self) -> Collation {
        match self {
            FieldName::LongCamT => Collation::PackPoses,
            FieldName::Weight => Collation::NormalizeWeight,
            FieldName::GlobalBatchSize => Collation::Sum,
            _ => Collation::Stack,
        }
    }
}

impl Collation {
    pub fn merge<B: Backend>(self, field: &str, parts: Vec<Node<B>>) -> Result<Node<B>> {
        match self {
            Collation::Stack => Node::concat(field, parts),
            Collation::PackPoses => {
                let packed = parts
                    .into_iter()
                    .map(|p| PackedPoses::from_node(field, p))
                    .collect::<Result<Vec<_>>>()?;
                let merged = PackedPoses::merge(packed);
                Ok(Node::Tuple(vec![
                    Node::Leaf(Leaf::Float4(merged.poses)),
                    Node::Leaf(Leaf::Bool2(merged.mask)),
                    Node::Leaf(Leaf::Int1(merged.lengths)),
                ]))
            }
            Collation::NormalizeWeight => {
                let stacked = Node::concat(field, parts)?.into_leaf(field)?;
                let weights = stacked
                    .into_float1()
                    .ok_or_else(|| mismatch(field, "weights must be a rank 1 float tensor"))?;
                let total = weights.clone().sum().into_scalar().elem::<f32>();
                Ok(Node::Leaf(Leaf::Float1(weights.div_scalar(total + WEIGHT_EPSILON))))
            }
            Collation::Sum => {
                let total = parts
                    .into_iter()
                    .map(|p| p.into_count(field))
                    .sum::<Result<usize>>()?;
                Ok(Node::Count(total))
            }
        }
    }
}

/// Merges single example records into one batch, dropping absent examples.
///
/// When fewer than half of the requested examples are usable, strict mode
/// fails with [`DatasetError::InsufficientData`] and non strict mode returns
/// `None` so the caller can skip the step.
pub fn collate<B: Backend>(examples: Vec<Option<Batch<B>>>, strict: bool) -> Result<Option<Batch<B>>> {
    let requested = examples.len();
    let valid: Vec<Batch<B>> = examples.into_iter().flatten().collect();

    if valid.is_empty() || valid.len() * 2 < requested {
        if strict {
            return Err(DatasetError::InsufficientData {
                requested,
                valid: valid.len(),
            });
        }
        log::warn!(
            "Skipping batch, only {} of {requested} examples are usable",
            valid.len()
        );
        return Ok(None);
    }

    let mut columns: BTreeMap<FieldName, Vec<Node<B>>> = BTreeMap::new();
    for example in valid {
        for (name, node) in example.into_fields() {
            columns.entry(name).or_default().push(node);
        }
    }

    let fields = columns
        .into_iter()
        .map(|(name, parts)| Ok((name, name.strategy().merge(name.as_str(), parts)?)))
        .collect::<Result<Vec<_>>>()?;
    Batch::from_fields(fields).map(Some)
}

/// [`collate`] that yields `None` instead of failing on mostly empty batches.
pub fn nonstrict_collate<B: Backend>(examples: Vec<Option<Batch<B>>>) -> Result<Option<Batch<B>>> {
    collate(examples, false)
}
