use std::collections::BTreeMap;

use burn::prelude::{Backend, Bool, Int, Tensor};

use crate::error::{DatasetError, Result, mismatch};

/// The tensor kinds that occur in a [`crate::Batch`]. Every leaf has the batch
/// as its leading axis.
#[derive(Clone, Debug)]
pub enum Leaf<B: Backend> {
    Float1(Tensor<B, 1>),
    Float2(Tensor<B, 2>),
    Float3(Tensor<B, 3>),
    Float4(Tensor<B, 4>),
    Float5(Tensor<B, 5>),
    Int1(Tensor<B, 1, Int>),
    Bool2(Tensor<B, 2, Bool>),
}

/// Shape of a batch field: a tensor leaf, a named mapping (per camera data),
/// a fixed tuple (packed sequences) or a plain count.
#[derive(Clone, Debug)]
pub enum Node<B: Backend> {
    Leaf(Leaf<B>),
    Map(BTreeMap<String, Node<B>>),
    Tuple(Vec<Node<B>>),
    Count(usize),
}

macro_rules! map_leaf {
    ($leaf:expr, |$t:ident| $body:expr) => {
        match $leaf {
            Leaf::Float1($t) => Leaf::Float1($body),
            Leaf::Float2($t) => Leaf::Float2($body),
            Leaf::Float3($t) => Leaf::Float3($body),
            Leaf::Float4($t) => Leaf::Float4($body),
            Leaf::Float5($t) => Leaf::Float5($body),
            Leaf::Int1($t) => Leaf::Int1($body),
            Leaf::Bool2($t) => Leaf::Bool2($body),
        }
    };
}

macro_rules! split_leaf {
    ($leaf:expr, |$t:ident| $body:expr) => {
        match $leaf {
            Leaf::Float1($t) => $body.into_iter().map(Leaf::Float1).collect(),
            Leaf::Float2($t) => $body.into_iter().map(Leaf::Float2).collect(),
            Leaf::Float3($t) => $body.into_iter().map(Leaf::Float3).collect(),
            Leaf::Float4($t) => $body.into_iter().map(Leaf::Float4).collect(),
            Leaf::Float5($t) => $body.into_iter().map(Leaf::Float5).collect(),
            Leaf::Int1($t) => $body.into_iter().map(Leaf::Int1).collect(),
            Leaf::Bool2($t) => $body.into_iter().map(Leaf::Bool2).collect(),
        }
    };
}

macro_rules! leaf_into {
    ($name:ident, $variant:ident, $ty:ty) => {
        pub fn $name(self) -> Option<$ty> {
            match self {
                Leaf::$variant(t) => Some(t),
                _ => None,
            }
        }
    };
}

impl<B: Backend> Leaf<B> {
    pub fn kind(&self) -> &'static str {
        match self {
            Leaf::Float1(_) => "float1",
            Leaf::Float2(_) => "float2",
            Leaf::Float3(_) => "float3",
            Leaf::Float4(_) => "float4",
            Leaf::Float5(_) => "float5",
            Leaf::Int1(_) => "int1",
            Leaf::Bool2(_) => "bool2",
        }
    }

    /// Size of the leading (batch) axis.
    pub fn batch_len(&self) -> usize {
        match self {
            Leaf::Float1(t) => t.dims()[0],
            Leaf::Float2(t) => t.dims()[0],
            Leaf::Float3(t) => t.dims()[0],
            Leaf::Float4(t) => t.dims()[0],
            Leaf::Float5(t) => t.dims()[0],
            Leaf::Int1(t) => t.dims()[0],
            Leaf::Bool2(t) => t.dims()[0],
        }
    }

    pub fn transfer(self, device: &B::Device) -> Self {
        map_leaf!(self, |t| t.to_device(device))
    }

    pub fn split(self, chunk: usize) -> Vec<Self> {
        split_leaf!(self, |t| t.split(chunk, 0))
    }

    /// Concatenates same-kind leaves along the batch axis.
    pub fn concat(field: &str, parts: Vec<Self>) -> Result<Self> {
        macro_rules! cat_as {
            ($variant:ident, $first:expr, $rest:expr) => {{
                let mut tensors = vec![$first];
                for part in $rest {
                    match part {
                        Leaf::$variant(t) => tensors.push(t),
                        other => {
                            return Err(mismatch(
                                field,
                                format!("expected {} leaf, got {}", stringify!($variant), other.kind()),
                            ));
                        }
                    }
                }
                Leaf::$variant(Tensor::cat(tensors, 0))
            }};
        }

        let mut parts = parts.into_iter();
        let first = parts
            .next()
            .ok_or_else(|| mismatch(field, "nothing to concatenate"))?;
        Ok(match first {
            Leaf::Float1(t) => cat_as!(Float1, t, parts),
            Leaf::Float2(t) => cat_as!(Float2, t, parts),
            Leaf::Float3(t) => cat_as!(Float3, t, parts),
            Leaf::Float4(t) => cat_as!(Float4, t, parts),
            Leaf::Float5(t) => cat_as!(Float5, t, parts),
            Leaf::Int1(t) => cat_as!(Int1, t, parts),
            Leaf::Bool2(t) => cat_as!(Bool2, t, parts),
        })
    }

    leaf_into!(into_float1, Float1, Tensor<B, 1>);
    leaf_into!(into_float2, Float2, Tensor<B, 2>);
    leaf_into!(into_float3, Float3, Tensor<B, 3>);
    leaf_into!(into_float4, Float4, Tensor<B, 4>);
    leaf_into!(into_float5, Float5, Tensor<B, 5>);
    leaf_into!(into_int1, Int1, Tensor<B, 1, Int>);
    leaf_into!(into_bool2, Bool2, Tensor<B, 2, Bool>);
}

impl<B: Backend> Node<B> {
    fn kind(&self) -> &'static str {
        match self {
            Node::Leaf(leaf) => leaf.kind(),
            Node::Map(_) => "map",
            Node::Tuple(_) => "tuple",
            Node::Count(_) => "count",
        }
    }

    /// Moves every tensor in the structure to `device`. Counts pass through.
    pub fn transfer(self, device: &B::Device) -> Self {
        match self {
            Node::Leaf(leaf) => Node::Leaf(leaf.transfer(device)),
            Node::Map(map) => Node::Map(
                map.into_iter()
                    .map(|(key, value)| (key, value.transfer(device)))
                    .collect(),
            ),
            Node::Tuple(items) => {
                Node::Tuple(items.into_iter().map(|i| i.transfer(device)).collect())
            }
            Node::Count(n) => Node::Count(n),
        }
    }

    /// Partitions the structure along the batch axis into groups of `chunk`
    /// examples (the last group may be smaller). Containers are rebuilt per
    /// group, so a map of K parts turns into one map per group.
    pub fn split(self, chunk: usize) -> Result<Vec<Self>> {
        match self {
            Node::Leaf(leaf) => Ok(leaf.split(chunk).into_iter().map(Node::Leaf).collect()),
            Node::Map(map) => {
                let mut groups: Vec<BTreeMap<String, Node<B>>> = vec![];
                for (key, value) in map {
                    for (i, part) in value.split(chunk)?.into_iter().enumerate() {
                        if groups.len() <= i {
                            groups.push(BTreeMap::new());
                        }
                        groups[i].insert(key.clone(), part);
                    }
                }
                Ok(groups.into_iter().map(Node::Map).collect())
            }
            Node::Tuple(items) => {
                let mut groups: Vec<Vec<Node<B>>> = vec![];
                for item in items {
                    for (i, part) in item.split(chunk)?.into_iter().enumerate() {
                        if groups.len() <= i {
                            groups.push(vec![]);
                        }
                        groups[i].push(part);
                    }
                }
                Ok(groups.into_iter().map(Node::Tuple).collect())
            }
            Node::Count(_) => Err(DatasetError::Unsplittable("a count")),
        }
    }

    /// The default merge rule: concatenate leaves along the batch axis and
    /// recurse key-wise into maps and position-wise into tuples.
    pub fn concat(field: &str, parts: Vec<Self>) -> Result<Self> {
        let Some(first) = parts.first() else {
            return Err(mismatch(field, "nothing to concatenate"));
        };

        match first {
            Node::Leaf(_) => {
                let leaves = parts
                    .into_iter()
                    .map(|p| match p {
                        Node::Leaf(leaf) => Ok(leaf),
                        other => Err(mismatch(field, format!("expected leaf, got {}", other.kind()))),
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Node::Leaf(Leaf::concat(field, leaves)?))
            }
            Node::Map(first) => {
                let keys: Vec<String> = first.keys().cloned().collect();
                let mut columns: BTreeMap<String, Vec<Node<B>>> =
                    keys.iter().map(|k| (k.clone(), vec![])).collect();

                for part in parts {
                    let Node::Map(map) = part else {
                        return Err(mismatch(field, format!("expected map, got {}", part.kind())));
                    };
                    if !map.keys().eq(keys.iter()) {
                        return Err(mismatch(field, "key sets differ between examples"));
                    }
                    for (key, value) in map {
                        if let Some(column) = columns.get_mut(&key) {
                            column.push(value);
                        }
                    }
                }

                let merged = columns
                    .into_iter()
                    .map(|(key, column)| {
                        let path = format!("{field}.{key}");
                        Ok((key, Node::concat(&path, column)?))
                    })
                    .collect::<Result<BTreeMap<_, _>>>()?;
                Ok(Node::Map(merged))
            }
            Node::Tuple(first) => {
                let arity = first.len();
                let mut columns: Vec<Vec<Node<B>>> = (0..arity).map(|_| vec![]).collect();

                for part in parts {
                    let Node::Tuple(items) = part else {
                        return Err(mismatch(field, format!("expected tuple, got {}", part.kind())));
                    };
                    if items.len() != arity {
                        return Err(mismatch(field, "tuple arity differs between examples"));
                    }
                    for (column, item) in columns.iter_mut().zip(items) {
                        column.push(item);
                    }
                }

                let merged = columns
                    .into_iter()
                    .enumerate()
                    .map(|(i, column)| Node::concat(&format!("{field}.{i}"), column))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Node::Tuple(merged))
            }
            Node::Count(_) => Err(mismatch(field, "counts are summed, not stacked")),
        }
    }

    /// Checks that every leaf holds `len` examples along the batch axis.
    pub fn check_batch_len(&self, field: &str, len: usize) -> Result<()> {
        match self {
            Node::Leaf(leaf) if leaf.batch_len() != len => Err(mismatch(
                field,
                format!("{} examples, expected {len}", leaf.batch_len()),
            )),
            Node::Leaf(_) | Node::Count(_) => Ok(()),
            Node::Map(map) => map
                .iter()
                .try_for_each(|(key, node)| node.check_batch_len(&format!("{field}.{key}"), len)),
            Node::Tuple(items) => items
                .iter()
                .enumerate()
                .try_for_each(|(i, node)| node.check_batch_len(&format!("{field}.{i}"), len)),
        }
    }

    pub fn into_leaf(self, field: &str) -> Result<Leaf<B>> {
        match self {
            Node::Leaf(leaf) => Ok(leaf),
            other => Err(mismatch(field, format!("expected leaf, got {}", other.kind()))),
        }
    }

    pub fn into_map(self, field: &str) -> Result<BTreeMap<String, Node<B>>> {
        match self {
            Node::Map(map) => Ok(map),
            other => Err(mismatch(field, format!("expected map, got {}", other.kind()))),
        }
    }

    pub fn into_tuple(self, field: &str) -> Result<Vec<Node<B>>> {
        match self {
            Node::Tuple(items) => Ok(items),
            other => Err(mismatch(field, format!("expected tuple, got {}", other.kind()))),
        }
    }

    pub fn into_count(self, field: &str) -> Result<usize> {
        match self {
            Node::Count(n) => Ok(n),
            other => Err(mismatch(field, format!("expected count, got {}", other.kind()))),
        }
    }
}
