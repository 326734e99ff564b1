//! Sliding-window patch grids for exhaustive inference

use crate::geometry::{padded_shape, PatchDescriptor};
use serde::{Deserialize, Serialize};
use uq_common::{Result, SegmentationError, Shape3};

/// Step between consecutive patch origins, uniform or per axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PatchStep {
    Uniform(usize),
    PerAxis(Shape3),
}

impl PatchStep {
    #[must_use]
    pub fn per_axis(self) -> Shape3 {
        match self {
            PatchStep::Uniform(step) => [step; 3],
            PatchStep::PerAxis(steps) => steps,
        }
    }
}

impl From<usize> for PatchStep {
    fn from(step: usize) -> Self {
        PatchStep::Uniform(step)
    }
}

impl From<Shape3> for PatchStep {
    fn from(steps: Shape3) -> Self {
        PatchStep::PerAxis(steps)
    }
}

/// Boundary-flush tiling of a volume
///
/// Offsets are computed once per axis; descriptors are produced lazily in
/// lexicographic order (height outermost, depth innermost). Iterating the
/// same grid again yields the same sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlidingWindowGrid {
    offsets: [Vec<usize>; 3],
    extent: Shape3,
    frame: Shape3,
}

fn axis_offsets(frame_len: usize, patch: usize, step: usize) -> Vec<usize> {
    let last = frame_len - patch;
    if last == 0 {
        return vec![0];
    }
    let mut offsets: Vec<usize> = (0..last).step_by(step).collect();
    offsets.push(last);
    offsets
}

/// Build the sliding-window grid for a volume
///
/// Axes shorter than the patch are treated as padded up to the patch
/// extent (see [`padded_shape`]).
pub fn sliding_window_grid(
    volume_shape: Shape3,
    patch_size: Shape3,
    step: impl Into<PatchStep>,
) -> Result<SlidingWindowGrid> {
    let step = step.into().per_axis();
    for axis in 0..3 {
        if patch_size[axis] == 0 {
            return Err(SegmentationError::config(format!(
                "patch_size must be positive on every axis, got {patch_size:?}"
            )));
        }
        if step[axis] == 0 {
            return Err(SegmentationError::config(format!(
                "patch_step must be positive on every axis, got {step:?}"
            )));
        }
        if step[axis] > patch_size[axis] {
            return Err(SegmentationError::config(format!(
                "patch_step {step:?} exceeds patch_size {patch_size:?} on axis {axis}; the grid would leave gaps"
            )));
        }
    }

    let frame = padded_shape(volume_shape, patch_size);
    let offsets = [
        axis_offsets(frame[0], patch_size[0], step[0]),
        axis_offsets(frame[1], patch_size[1], step[1]),
        axis_offsets(frame[2], patch_size[2], step[2]),
    ];

    Ok(SlidingWindowGrid {
        offsets,
        extent: patch_size,
        frame,
    })
}

impl SlidingWindowGrid {
    /// Number of patches in the grid
    #[must_use]
    pub fn len(&self) -> usize {
        self.offsets.iter().map(Vec::len).product()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Frame the descriptors live in (volume extent after padding)
    #[must_use]
    pub fn padded_shape(&self) -> Shape3 {
        self.frame
    }

    #[must_use]
    pub fn patch_extent(&self) -> Shape3 {
        self.extent
    }

    /// Origins along one axis
    #[must_use]
    pub fn axis_offsets(&self, axis: usize) -> &[usize] {
        &self.offsets[axis]
    }

    /// Descriptor at a flat position in iteration order
    #[must_use]
    pub fn get(&self, index: usize) -> Option<PatchDescriptor> {
        if index >= self.len() {
            return None;
        }
        let n1 = self.offsets[1].len();
        let n2 = self.offsets[2].len();
        let i = index / (n1 * n2);
        let j = (index / n2) % n1;
        let k = index % n2;
        Some(PatchDescriptor::new(
            [self.offsets[0][i], self.offsets[1][j], self.offsets[2][k]],
            self.extent,
        ))
    }

    #[must_use]
    pub fn iter(&self) -> GridIter<'_> {
        GridIter {
            grid: self,
            next: 0,
        }
    }
}

/// Lazy iterator over a [`SlidingWindowGrid`]
#[derive(Debug, Clone)]
pub struct GridIter<'a> {
    grid: &'a SlidingWindowGrid,
    next: usize,
}

impl Iterator for GridIter<'_> {
    type Item = PatchDescriptor;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.grid.get(self.next)?;
        self.next += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.grid.len().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for GridIter<'_> {}

impl<'a> IntoIterator for &'a SlidingWindowGrid {
    type Item = PatchDescriptor;
    type IntoIter = GridIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
