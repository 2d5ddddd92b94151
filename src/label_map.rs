//! Volumetric label maps and the combine operation.
//!
//! A [`LabelMap`] stores one class label per voxel. [`LabelMap::combine`] is
//! the operation the merge job performs: the two inputs are overlaid and the
//! `first_overwrites` policy decides which one wins where both are labelled.

use serde::{Deserialize, Serialize};

use crate::{Result, StepError};

/// A dense 3-D label volume in x-fastest order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelMap {
    dims: [usize; 3],
    voxels: Vec<u16>,
}

fn voxel_count(dims: [usize; 3]) -> Result<usize> {
    dims.iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| StepError::Scene(format!("label map {:?} is too large", dims)))
}

impl LabelMap {
    /// Creates a label map from its dimensions and voxel labels.
    ///
    /// # Errors
    ///
    /// Returns [`StepError::Scene`] if the voxel count does not match the
    /// dimensions, or the dimensions overflow `usize`.
    pub fn new(dims: [usize; 3], voxels: Vec<u16>) -> Result<Self> {
        let expected = voxel_count(dims)?;
        if voxels.len() != expected {
            return Err(StepError::Scene(format!(
                "label map {:?} needs {} voxels, got {}",
                dims,
                expected,
                voxels.len()
            )));
        }
        Ok(Self { dims, voxels })
    }

    /// Creates an unlabelled map of the given size.
    ///
    /// # Errors
    ///
    /// Returns [`StepError::Scene`] if the dimensions overflow `usize`.
    pub fn zeros(dims: [usize; 3]) -> Result<Self> {
        Ok(Self {
            dims,
            voxels: vec![0; voxel_count(dims)?],
        })
    }

    /// Returns the dimensions.
    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    /// Returns the raw voxel labels.
    pub fn voxels(&self) -> &[u16] {
        &self.voxels
    }

    /// Counts voxels carrying `label`.
    pub fn count_label(&self, label: u16) -> usize {
        self.voxels.iter().filter(|&&v| v == label).count()
    }

    /// Overlays two label maps of identical size.
    ///
    /// Unlabelled voxels (0) in one input take the other's label. Where both
    /// are labelled, `a` wins if `first_overwrites` is set, otherwise `b`.
    ///
    /// # Errors
    ///
    /// Returns [`StepError::JobFailed`] when the dimensions differ.
    pub fn combine(a: &LabelMap, b: &LabelMap, first_overwrites: bool) -> Result<LabelMap> {
        if a.dims != b.dims {
            return Err(StepError::JobFailed(format!(
                "input dimensions differ: {:?} vs {:?}",
                a.dims, b.dims
            )));
        }

        let voxels = a
            .voxels
            .iter()
            .zip(&b.voxels)
            .map(|(&va, &vb)| match (va, vb) {
                (0, vb) => vb,
                (va, 0) => va,
                (va, vb) => {
                    if first_overwrites {
                        va
                    } else {
                        vb
                    }
                }
            })
            .collect();

        Ok(LabelMap {
            dims: a.dims,
            voxels,
        })
    }
}
