//! Canonical, framework-agnostic model parameter representation.
//!
//! A [`ModelState`] is an ordered mapping from parameter name to an
//! arbitrary-rank `f32` tensor. Models convert to and from it, the
//! server broadcasts it and FedAvg combines it. Keys iterate in sorted
//! order, which is the order used by the list and flat conversions.

use std::collections::BTreeMap;

use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};

use crate::error::{FedError, Result};
use crate::math::norms::{l2_norm, l2_norm_sq};

/// Ordered mapping of parameter name to tensor.
///
/// # Example
///
/// ```rust
/// use fedsim::ModelState;
/// use ndarray::{ArrayD, IxDyn};
///
/// let mut state = ModelState::new();
/// state.insert("weight", ArrayD::zeros(IxDyn(&[2, 3])));
/// state.insert("bias", ArrayD::zeros(IxDyn(&[3])));
///
/// assert_eq!(state.num_params(), 9);
/// assert!(state.check_compatible(&state.zeros_like()).is_ok());
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelState {
    tensors: BTreeMap<String, ArrayD<f32>>,
}

impl ModelState {
    /// Create an empty state.
    pub fn new() -> Self {
        Self {
            tensors: BTreeMap::new(),
        }
    }

    /// Insert or replace a tensor, returning the previous one.
    pub fn insert(&mut self, key: impl Into<String>, tensor: ArrayD<f32>) -> Option<ArrayD<f32>> {
        self.tensors.insert(key.into(), tensor)
    }

    /// Look up a tensor by name.
    pub fn get(&self, key: &str) -> Option<&ArrayD<f32>> {
        self.tensors.get(key)
    }

    /// Iterate `(name, tensor)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &ArrayD<f32>)> {
        self.tensors.iter()
    }

    /// Parameter names in key order.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.tensors.keys()
    }

    /// Number of named tensors.
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// Whether the state holds no tensors.
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Total number of scalar parameters.
    pub fn num_params(&self) -> usize {
        self.tensors.values().map(|t| t.len()).sum()
    }

    /// Shape of every tensor, keyed by name.
    pub fn shapes(&self) -> BTreeMap<String, Vec<usize>> {
        self.tensors
            .iter()
            .map(|(k, t)| (k.clone(), t.shape().to_vec()))
            .collect()
    }

    /// A state with the same layout and every element set to zero.
    pub fn zeros_like(&self) -> Self {
        self.tensors
            .iter()
            .map(|(k, t)| (k.clone(), ArrayD::zeros(t.raw_dim())))
            .collect()
    }

    /// Check that `other` has exactly this state's key set and shapes.
    ///
    /// Reports the first offending key as [`FedError::MissingParameter`],
    /// [`FedError::UnexpectedParameter`] or [`FedError::ShapeMismatch`].
    pub fn check_compatible(&self, other: &ModelState) -> Result<()> {
        for (key, expected) in &self.tensors {
            let actual = other
                .tensors
                .get(key)
                .ok_or_else(|| FedError::MissingParameter(key.clone()))?;
            if actual.shape() != expected.shape() {
                return Err(FedError::ShapeMismatch {
                    key: key.clone(),
                    expected: expected.shape().to_vec(),
                    actual: actual.shape().to_vec(),
                });
            }
        }
        if let Some(extra) = other.keys().find(|k| !self.tensors.contains_key(*k)) {
            return Err(FedError::UnexpectedParameter(extra.clone()));
        }
        Ok(())
    }

    /// Export the tensors as a plain list, in key order.
    pub fn to_arrays(&self) -> Vec<ArrayD<f32>> {
        self.tensors.values().cloned().collect()
    }

    /// Rebuild a state from a plain list using `layout` for names and shapes.
    pub fn from_arrays(layout: &ModelState, arrays: Vec<ArrayD<f32>>) -> Result<Self> {
        if arrays.len() != layout.len() {
            return Err(FedError::ShapeError(format!(
                "expected {} arrays, got {}",
                layout.len(),
                arrays.len()
            )));
        }
        let state: ModelState = layout.keys().cloned().zip(arrays).collect();
        layout.check_compatible(&state)?;
        Ok(state)
    }

    /// Flatten every tensor, in key order, into one vector.
    pub fn to_flat(&self) -> Vec<f32> {
        let mut flat = Vec::with_capacity(self.num_params());
        for tensor in self.tensors.values() {
            flat.extend(tensor.iter().copied());
        }
        flat
    }

    /// Rebuild a state from a flat vector using `layout` for names and shapes.
    pub fn from_flat(layout: &ModelState, flat: &[f32]) -> Result<Self> {
        if flat.len() != layout.num_params() {
            return Err(FedError::ShapeError(format!(
                "expected {} values, got {}",
                layout.num_params(),
                flat.len()
            )));
        }
        let mut offset = 0;
        let mut state = ModelState::new();
        for (key, tensor) in layout.iter() {
            let end = offset + tensor.len();
            let values = flat[offset..end].to_vec();
            state.insert(key.clone(), ArrayD::from_shape_vec(IxDyn(tensor.shape()), values)?);
            offset = end;
        }
        Ok(state)
    }

    /// L2 norm over every parameter.
    pub fn l2_norm(&self) -> f32 {
        l2_norm(self.tensors.values().flat_map(|t| t.iter()))
    }

    /// L2 distance between two compatible states.
    pub fn l2_distance(&self, other: &ModelState) -> Result<f32> {
        self.check_compatible(other)?;
        let sq: f32 = self
            .tensors
            .iter()
            .map(|(k, a)| {
                let diff = a - &other.tensors[k];
                l2_norm_sq(diff.iter())
            })
            .sum();
        Ok(sq.sqrt())
    }
}

impl From<BTreeMap<String, ArrayD<f32>>> for ModelState {
    fn from(tensors: BTreeMap<String, ArrayD<f32>>) -> Self {
        Self { tensors }
    }
}

impl FromIterator<(String, ArrayD<f32>)> for ModelState {
    fn from_iter<I: IntoIterator<Item = (String, ArrayD<f32>)>>(iter: I) -> Self {
        Self {
            tensors: iter.into_iter().collect(),
        }
    }
}
