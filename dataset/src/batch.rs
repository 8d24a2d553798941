use std::collections::BTreeMap;

use burn::prelude::{Backend, Bool, Int, Tensor, TensorData};

use crate::error::{DatasetError, Result, mismatch};
use crate::pose;
use crate::structure::{Leaf, Node};

/// A variable length pose sequence per example, packed as padded poses, a
/// validity mask and the per example lengths.
///
/// `mask[i, j] == (j < lengths[i])`. Poses past an example's length are zero
/// and must only be read through the mask.
#[derive(Clone, Debug)]
pub struct PackedPoses<B: Backend> {
    /// `[BS, L, 4, 4]`
    pub poses: Tensor<B, 4>,
    /// `[BS, L]`
    pub mask: Tensor<B, 2, Bool>,
    /// `[BS]`
    pub lengths: Tensor<B, 1, Int>,
}

impl<B: Backend> PackedPoses<B> {
    /// Packs a single `[L, 4, 4]` sequence into a one example record.
    pub fn from_sequence(poses: Tensor<B, 3>) -> Self {
        let device = poses.device();
        let len = poses.dims()[0];
        let lengths = Tensor::from_data(TensorData::new(vec![len as i64], [1]), &device);
        Self {
            mask: length_mask(lengths.clone(), len),
            poses: poses.unsqueeze(),
            lengths,
        }
    }

    pub fn max_len(&self) -> usize {
        self.poses.dims()[1]
    }

    pub fn lengths(&self) -> Vec<usize> {
        self.lengths
            .clone()
            .into_data()
            .iter::<i64>()
            .map(|l| l.max(0) as usize)
            .collect()
    }

    /// Merges packed records along the batch axis. Every record is padded (or
    /// trimmed) to the longest length in the merged batch and the mask is
    /// rebuilt from the lengths.
    pub fn merge(parts: Vec<Self>) -> Self {
        let max_len = parts
            .iter()
            .flat_map(|p| p.lengths())
            .max()
            .unwrap_or(0);

        let mut poses = Vec::with_capacity(parts.len());
        let mut lengths = Vec::with_capacity(parts.len());
        for part in parts {
            let [bs, len, _, _] = part.poses.dims();
            let padded = if len < max_len {
                let device = part.poses.device();
                let pad = Tensor::zeros([bs, max_len - len, 4, 4], &device);
                Tensor::cat(vec![part.poses, pad], 1)
            } else if len > max_len {
                part.poses.narrow(1, 0, max_len)
            } else {
                part.poses
            };
            poses.push(padded);
            lengths.push(part.lengths);
        }

        let lengths = Tensor::cat(lengths, 0);
        Self {
            poses: Tensor::cat(poses, 0),
            mask: length_mask(lengths.clone(), max_len),
            lengths,
        }
    }

    fn into_node(self) -> Node<B> {
        Node::Tuple(vec![
            Node::Leaf(Leaf::Float4(self.poses)),
            Node::Leaf(Leaf::Bool2(self.mask)),
            Node::Leaf(Leaf::Int1(self.lengths)),
        ])
    }

    pub(crate) fn from_node(field: &str, node: Node<B>) -> Result<Self> {
        let mut items = node.into_tuple(field)?.into_iter();
        let (Some(poses), Some(mask), Some(lengths), None) =
            (items.next(), items.next(), items.next(), items.next())
        else {
            return Err(mismatch(field, "packed poses are a (poses, mask, lengths) triple"));
        };
        Ok(Self {
            poses: leaf(field, poses, Leaf::into_float4)?,
            mask: leaf(field, mask, Leaf::into_bool2)?,
            lengths: leaf(field, lengths, Leaf::into_int1)?,
        })
    }
}

/// `[BS, max_len]` mask that is true exactly for indices below each length.
pub fn length_mask<B: Backend>(lengths: Tensor<B, 1, Int>, max_len: usize) -> Tensor<B, 2, Bool> {
    let [bs] = lengths.dims();
    let device = lengths.device();
    let index = Tensor::<B, 1, Int>::arange(0..max_len as i64, &device)
        .unsqueeze_dim::<2>(0)
        .repeat_dim(0, bs);
    let lengths = lengths.unsqueeze_dim::<2>(1).repeat_dim(1, max_len);
    index.lower(lengths)
}

/// One training step worth of examples, or a single example before collation
/// (batch axis of size 1).
#[derive(Clone, Debug)]
pub struct Batch<B: Backend> {
    /// Example weight `[BS]`, sums to one after collation.
    pub weight: Tensor<B, 1>,
    /// Per frame distance travelled in meters `[BS, F]`.
    pub distances: Tensor<B, 2>,
    /// Per frame world to car transform `[BS, F, 4, 4]`.
    pub cam_t: Tensor<B, 4>,
    /// Per frame car relative transform `[BS, F, 4, 4]`.
    pub frame_t: Tensor<B, 4>,
    /// Time of each frame in seconds, monotonically increasing `[BS, F]`.
    pub frame_time: Tensor<B, 2>,
    /// Per camera normalized intrinsics `[BS, 4, 4]`.
    pub intrinsics: BTreeMap<String, Tensor<B, 3>>,
    /// Per camera camera to car transform `[BS, 4, 4]`.
    pub extrinsics: BTreeMap<String, Tensor<B, 3>>,
    /// Per camera and frame color `[BS, F, 3, H, W]`.
    pub color: BTreeMap<String, Tensor<B, 5>>,
    /// Per camera validity mask `[BS, 1, h, w]`.
    pub mask: BTreeMap<String, Tensor<B, 4>>,
    /// World to car transforms starting at the first frame and extending into
    /// the future.
    pub long_cam_t: PackedPoses<B>,
    /// Number of examples across every shard of a distributed collation.
    pub global_batch_size: usize,
}

/// Names of the batch fields, used to pick the merge strategy per field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FieldName {
    Weight,
    Distances,
    CamT,
    FrameT,
    FrameTime,
    Intrinsics,
    Extrinsics,
    Color,
    Mask,
    LongCamT,
    GlobalBatchSize,
}

impl FieldName {
    pub const ALL: [FieldName; 11] = [
        FieldName::Weight,
        FieldName::Distances,
        FieldName::CamT,
        FieldName::FrameT,
        FieldName::FrameTime,
        FieldName::Intrinsics,
        FieldName::Extrinsics,
        FieldName::Color,
        FieldName::Mask,
        FieldName::LongCamT,
        FieldName::GlobalBatchSize,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FieldName::Weight => "weight",
            FieldName::Distances => "distances",
            FieldName::CamT => "cam_t",
            FieldName::FrameT => "frame_t",
            FieldName::FrameTime => "frame_time",
            FieldName::Intrinsics => "intrinsics",
            FieldName::Extrinsics => "extrinsics",
            FieldName::Color => "color",
            FieldName::Mask => "mask",
            FieldName::LongCamT => "long_cam_t",
            FieldName::GlobalBatchSize => "global_batch_size",
        }
    }
}

fn leaf<B: Backend, T>(
    field: &str,
    node: Node<B>,
    into: impl FnOnce(Leaf<B>) -> Option<T>,
) -> Result<T> {
    let leaf = node.into_leaf(field)?;
    let kind = leaf.kind();
    into(leaf).ok_or_else(|| mismatch(field, format!("unexpected {kind} leaf")))
}

fn camera_map<B: Backend, T>(
    field: &str,
    node: Node<B>,
    into: impl Fn(Leaf<B>) -> Option<T>,
) -> Result<BTreeMap<String, T>> {
    node.into_map(field)?
        .into_iter()
        .map(|(cam, value)| Ok((cam, leaf(field, value, &into)?)))
        .collect()
}

fn check_cameras<T, U>(
    field: &str,
    map: &BTreeMap<String, T>,
    cameras: &BTreeMap<String, U>,
) -> Result<()> {
    if map.keys().eq(cameras.keys()) {
        return Ok(());
    }
    let keys: Vec<_> = map.keys().map(String::as_str).collect();
    let expected: Vec<_> = cameras.keys().map(String::as_str).collect();
    Err(mismatch(
        field,
        format!("cameras {keys:?} differ from color cameras {expected:?}"),
    ))
}

fn leaf_map<B: Backend, const D: usize>(
    map: BTreeMap<String, Tensor<B, D>>,
    wrap: impl Fn(Tensor<B, D>) -> Leaf<B>,
) -> Node<B> {
    Node::Map(
        map.into_iter()
            .map(|(cam, t)| (cam, Node::Leaf(wrap(t))))
            .collect(),
    )
}

impl<B: Backend> Batch<B> {
    pub fn batch_size(&self) -> usize {
        self.weight.dims()[0]
    }

    pub fn device(&self) -> B::Device {
        self.weight.device()
    }

    pub fn cameras(&self) -> Vec<String> {
        self.color.keys().cloned().collect()
    }

    pub fn num_frames(&self) -> usize {
        self.cam_t.dims()[1]
    }

    /// Color of every camera at `frame`, `[BS, 3, H, W]` each.
    pub fn frame_colors(&self, frame: usize) -> BTreeMap<String, Tensor<B, 4>> {
        self.color
            .iter()
            .map(|(cam, color)| (cam.clone(), color.clone().narrow(1, frame, 1).squeeze(1)))
            .collect()
    }

    /// World space to car transform for `frame`, `[BS, 4, 4]`.
    pub fn world_to_car(&self, frame: usize) -> Tensor<B, 3> {
        self.cam_t.clone().narrow(1, frame, 1).squeeze(1)
    }

    /// Car to world space transform for `frame`, `[BS, 4, 4]`.
    pub fn car_to_world(&self, frame: usize) -> Tensor<B, 3> {
        pose::invert(self.world_to_car(frame))
    }

    /// World space to camera space transform, `[BS, 4, 4]`.
    pub fn world_to_cam(&self, cam: &str, frame: usize) -> Option<Tensor<B, 3>> {
        let extrinsics = self.extrinsics.get(cam)?.clone();
        Some(pose::invert(extrinsics).matmul(self.world_to_car(frame)))
    }

    /// Camera space to world space transform, `[BS, 4, 4]`.
    pub fn cam_to_world(&self, cam: &str, frame: usize) -> Option<Tensor<B, 3>> {
        self.world_to_cam(cam, frame).map(pose::invert)
    }

    /// Copy of the batch on `device`.
    pub fn to(&self, device: &B::Device) -> Self {
        let fields = self
            .clone()
            .into_fields()
            .into_iter()
            .map(|(name, node)| (name, node.transfer(device)));
        Self::assemble(fields).expect("Transfer keeps the field structure intact")
    }

    /// Splits the batch into pieces of `split_size` examples; the last piece
    /// may be smaller.
    pub fn split(&self, split_size: usize) -> Result<Vec<Self>> {
        if split_size == 0 {
            return Err(DatasetError::Unsplittable("into pieces of size zero"));
        }
        let parts = self.batch_size().div_ceil(split_size);
        let global_batch_size = self.global_batch_size;

        let mut groups: Vec<Vec<(FieldName, Node<B>)>> = (0..parts).map(|_| vec![]).collect();
        for (name, node) in self.clone().into_fields() {
            if name == FieldName::GlobalBatchSize {
                continue;
            }
            let is_empty_map = matches!(&node, Node::Map(map) if map.is_empty());
            let mut pieces = node.split(split_size)?;
            if pieces.is_empty() && is_empty_map {
                pieces = (0..parts).map(|_| Node::Map(BTreeMap::new())).collect();
            }
            if pieces.len() != parts {
                return Err(mismatch(
                    name.as_str(),
                    format!("split into {} pieces, expected {parts}", pieces.len()),
                ));
            }
            for (group, piece) in groups.iter_mut().zip(pieces) {
                group.push((name, piece));
            }
        }

        groups
            .into_iter()
            .map(|mut group| {
                group.push((FieldName::GlobalBatchSize, Node::Count(global_batch_size)));
                Self::from_fields(group)
            })
            .collect()
    }

    /// Breaks the batch into its named fields.
    pub fn into_fields(self) -> Vec<(FieldName, Node<B>)> {
        vec![
            (FieldName::Weight, Node::Leaf(Leaf::Float1(self.weight))),
            (FieldName::Distances, Node::Leaf(Leaf::Float2(self.distances))),
            (FieldName::CamT, Node::Leaf(Leaf::Float4(self.cam_t))),
            (FieldName::FrameT, Node::Leaf(Leaf::Float4(self.frame_t))),
            (FieldName::FrameTime, Node::Leaf(Leaf::Float2(self.frame_time))),
            (FieldName::Intrinsics, leaf_map(self.intrinsics, Leaf::Float3)),
            (FieldName::Extrinsics, leaf_map(self.extrinsics, Leaf::Float3)),
            (FieldName::Color, leaf_map(self.color, Leaf::Float5)),
            (FieldName::Mask, leaf_map(self.mask, Leaf::Float4)),
            (FieldName::LongCamT, self.long_cam_t.into_node()),
            (FieldName::GlobalBatchSize, Node::Count(self.global_batch_size)),
        ]
    }

    /// Reassembles a batch from named fields. Every field must be present
    /// exactly in the shape [`Batch::into_fields`] produces and the result
    /// must pass [`Batch::validate`].
    pub fn from_fields(fields: impl IntoIterator<Item = (FieldName, Node<B>)>) -> Result<Self> {
        let batch = Self::assemble(fields)?;
        batch.validate()?;
        Ok(batch)
    }

    /// Checks that every tensor has the same number of examples, every per
    /// frame field the same number of frames as `cam_t` and every per camera
    /// field the same cameras as `color`.
    pub fn validate(&self) -> Result<()> {
        let bs = self.batch_size();
        for (name, node) in self.clone().into_fields() {
            node.check_batch_len(name.as_str(), bs)?;
        }

        let frames = self.num_frames();
        let frame_counts = [
            ("distances".to_string(), self.distances.dims()[1]),
            ("frame_t".to_string(), self.frame_t.dims()[1]),
            ("frame_time".to_string(), self.frame_time.dims()[1]),
        ]
        .into_iter()
        .chain(
            self.color
                .iter()
                .map(|(cam, color)| (format!("color.{cam}"), color.dims()[1])),
        );
        for (field, count) in frame_counts {
            if count != frames {
                return Err(mismatch(
                    &field,
                    format!("{count} frames, cam_t has {frames}"),
                ));
            }
        }

        check_cameras("intrinsics", &self.intrinsics, &self.color)?;
        check_cameras("extrinsics", &self.extrinsics, &self.color)?;
        check_cameras("mask", &self.mask, &self.color)
    }

    fn assemble(fields: impl IntoIterator<Item = (FieldName, Node<B>)>) -> Result<Self> {
        let mut fields: BTreeMap<FieldName, Node<B>> = fields.into_iter().collect();
        let mut take = |name: FieldName| {
            fields
                .remove(&name)
                .ok_or(DatasetError::MissingField(name.as_str()))
        };

        let batch = Self {
            weight: leaf("weight", take(FieldName::Weight)?, Leaf::into_float1)?,
            distances: leaf("distances", take(FieldName::Distances)?, Leaf::into_float2)?,
            cam_t: leaf("cam_t", take(FieldName::CamT)?, Leaf::into_float4)?,
            frame_t: leaf("frame_t", take(FieldName::FrameT)?, Leaf::into_float4)?,
            frame_time: leaf("frame_time", take(FieldName::FrameTime)?, Leaf::into_float2)?,
            intrinsics: camera_map("intrinsics", take(FieldName::Intrinsics)?, Leaf::into_float3)?,
            extrinsics: camera_map("extrinsics", take(FieldName::Extrinsics)?, Leaf::into_float3)?,
            color: camera_map("color", take(FieldName::Color)?, Leaf::into_float5)?,
            mask: camera_map("mask", take(FieldName::Mask)?, Leaf::into_float4)?,
            long_cam_t: PackedPoses::from_node("long_cam_t", take(FieldName::LongCamT)?)?,
            global_batch_size: take(FieldName::GlobalBatchSize)?.into_count("global_batch_size")?,
        };
        Ok(batch)
    }
}
