use std::collections::BTreeMap;

use burn::prelude::Tensor;
use burn::tensor::ElementConversion;
use burn::tensor::backend::AutodiffBackend;

/// One named loss. Losses that are part of an autodiff graph take part in
/// the next backward pass, anything else is only reported.
#[derive(Clone, Debug)]
pub struct Loss<B: AutodiffBackend> {
    pub value: Tensor<B, 1>,
}

impl<B: AutodiffBackend> Loss<B> {
    pub fn is_tracked(&self) -> bool {
        self.value.is_require_grad()
    }

    /// Replaces the value with a detached one, dropping its graph.
    pub(crate) fn consume(&mut self, reduced: Tensor<B, 1>) {
        self.value = reduced.detach();
    }
}

/// Named losses in insertion order. Values are either scalars (`[1]`) or per
/// example (`[BS]`).
#[derive(Clone, Debug)]
pub struct Losses<B: AutodiffBackend> {
    entries: Vec<(String, Loss<B>)>,
}

impl<B: AutodiffBackend> Default for Losses<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: AutodiffBackend> Losses<B> {
    pub fn new() -> Self {
        Self { entries: vec![] }
    }

    /// Adds a loss, backpropagated if it carries a graph. Replaces an
    /// existing entry with the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: Tensor<B, 1>) {
        self.put(name.into(), Loss { value });
    }

    /// Adds a metric that is reported but never backpropagated.
    pub fn insert_metric(&mut self, name: impl Into<String>, value: Tensor<B, 1>) {
        self.put(
            name.into(),
            Loss {
                value: value.detach(),
            },
        );
    }

    fn put(&mut self, name: String, loss: Loss<B>) {
        match self.entries.iter_mut().find(|(k, _)| *k == name) {
            Some((_, existing)) => *existing = loss,
            None => self.entries.push((name, loss)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&Loss<B>> {
        self.entries.iter().find(|(k, _)| k == name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Loss<B>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Loss<B>> {
        self.entries.iter_mut().map(|(_, v)| v)
    }

    /// Renames every entry to `<prefix>-<name>` and moves them into `self`.
    pub fn extend_prefixed(&mut self, prefix: &str, other: Losses<B>) {
        for (name, loss) in other.entries {
            self.put(format!("{prefix}-{name}"), loss);
        }
    }

    /// Reads every loss back to the host, averaging per example values.
    pub fn to_scalars(&self) -> BTreeMap<String, f32> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.value.clone().mean().into_scalar().elem::<f32>()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::{Autodiff, NdArray};

    type B = Autodiff<NdArray>;

    #[test]
    fn keeps_insertion_order_and_prefixes() {
        let device = Default::default();
        let mut task = Losses::<B>::new();
        task.insert("b", Tensor::from_floats([1.0], &device));
        task.insert("a", Tensor::from_floats([2.0, 4.0], &device).require_grad() * 1.0);
        task.insert_metric("iou", Tensor::from_floats([0.5], &device).require_grad() * 1.0);

        let mut all = Losses::new();
        all.extend_prefixed("path", task);
        let names: Vec<_> = all.names().collect();
        assert_eq!(names, vec!["path-b", "path-a", "path-iou"]);
        assert!(all.get("path-a").unwrap().is_tracked());
        assert!(!all.get("path-b").unwrap().is_tracked());
        assert!(!all.get("path-iou").unwrap().is_tracked());
        assert_eq!(all.to_scalars()["path-a"], 3.0);
    }

    #[test]
    fn insert_replaces_same_name() {
        let device = Default::default();
        let mut losses = Losses::<B>::new();
        losses.insert("l1", Tensor::from_floats([1.0], &device));
        losses.insert("l1", Tensor::from_floats([2.0], &device));
        assert_eq!(losses.len(), 1);
        assert_eq!(losses.to_scalars()["l1"], 2.0);
    }
}
