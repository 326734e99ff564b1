//! Patch descriptors, padding and cropping

use ndarray::{s, Array4, ArrayView4};
use serde::{Deserialize, Serialize};
use uq_common::{spatial_shape, Shape3};

/// How a volume shorter than the patch is extended along an axis
///
/// Padding is always appended after the last voxel of the axis, so patch
/// coordinates inside the original extent address original voxels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaddingMode {
    /// Out-of-volume voxels read as 0.0
    #[default]
    Zero,
    /// Out-of-volume voxels mirror the volume without repeating the edge voxel
    Reflect,
}

/// Location of one patch inside a (padded) volume frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatchDescriptor {
    pub origin: Shape3,
    pub extent: Shape3,
}

impl PatchDescriptor {
    #[must_use]
    pub fn new(origin: Shape3, extent: Shape3) -> Self {
        Self { origin, extent }
    }

    /// Exclusive upper corner
    #[must_use]
    pub fn end(&self) -> Shape3 {
        [
            self.origin[0] + self.extent[0],
            self.origin[1] + self.extent[1],
            self.origin[2] + self.extent[2],
        ]
    }

    #[must_use]
    pub fn fits_within(&self, frame: Shape3) -> bool {
        self.end().iter().zip(frame.iter()).all(|(e, f)| e <= f)
    }

    #[must_use]
    pub fn contains(&self, voxel: Shape3) -> bool {
        (0..3).all(|a| voxel[a] >= self.origin[a] && voxel[a] < self.origin[a] + self.extent[a])
    }
}

/// Volume extent raised to at least the patch extent on every axis
#[must_use]
pub fn padded_shape(volume: Shape3, patch: Shape3) -> Shape3 {
    [
        volume[0].max(patch[0]),
        volume[1].max(patch[1]),
        volume[2].max(patch[2]),
    ]
}

/// Source index along one axis, or `None` for a zero-padded position
fn source_index(pos: usize, len: usize, mode: PaddingMode) -> Option<usize> {
    if pos < len {
        return Some(pos);
    }
    match mode {
        PaddingMode::Zero => None,
        PaddingMode::Reflect if len == 1 => Some(0),
        PaddingMode::Reflect => {
            let period = 2 * (len - 1);
            let m = pos % period;
            Some(if m < len { m } else { period - m })
        }
    }
}

/// Copy the patch described by `patch` out of a channel-first volume
///
/// Positions past the volume extent are filled according to `padding`.
#[must_use]
pub fn extract_patch(
    volume: &ArrayView4<'_, f32>,
    patch: &PatchDescriptor,
    padding: PaddingMode,
) -> Array4<f32> {
    let shape = spatial_shape(volume);
    let [o0, o1, o2] = patch.origin;
    let [e0, e1, e2] = patch.extent;

    if patch.fits_within(shape) {
        return volume
            .slice(s![.., o0..o0 + e0, o1..o1 + e1, o2..o2 + e2])
            .to_owned();
    }

    let map_axis = |axis: usize| -> Vec<Option<usize>> {
        (0..patch.extent[axis])
            .map(|i| source_index(patch.origin[axis] + i, shape[axis], padding))
            .collect()
    };
    let (m0, m1, m2) = (map_axis(0), map_axis(1), map_axis(2));

    Array4::from_shape_fn((volume.dim().0, e0, e1, e2), |(c, i, j, k)| {
        match (m0[i], m1[j], m2[k]) {
            (Some(a), Some(b), Some(d)) => volume[[c, a, b, d]],
            _ => 0.0,
        }
    })
}

/// Drop padding appended after the original extent
#[must_use]
pub fn crop_to_spatial(volume: Array4<f32>, shape: Shape3) -> Array4<f32> {
    if spatial_shape(&volume.view()) == shape {
        return volume;
    }
    volume
        .slice(s![.., ..shape[0], ..shape[1], ..shape[2]])
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    fn ramp(shape: (usize, usize, usize, usize)) -> Array4<f32> {
        let n = shape.0 * shape.1 * shape.2 * shape.3;
        Array::from_shape_vec(shape, (0..n).map(|v| v as f32).collect()).unwrap()
    }

    #[test]
    fn test_extract_inside_volume() {
        let volume = ramp((2, 4, 4, 4));
        let patch = PatchDescriptor::new([1, 2, 0], [2, 2, 3]);
        let out = extract_patch(&volume.view(), &patch, PaddingMode::Zero);
        assert_eq!(out.dim(), (2, 2, 2, 3));
        assert_eq!(out[[1, 1, 0, 2]], volume[[1, 2, 2, 2]]);
    }

    #[test]
    fn test_zero_padding() {
        let volume = Array4::<f32>::ones((1, 2, 3, 3));
        let patch = PatchDescriptor::new([0, 0, 0], [4, 3, 3]);
        let out = extract_patch(&volume.view(), &patch, PaddingMode::Zero);
        assert_eq!(out[[0, 1, 2, 2]], 1.0);
        assert_eq!(out[[0, 2, 0, 0]], 0.0);
        assert_eq!(out[[0, 3, 1, 1]], 0.0);
    }

    #[test]
    fn test_reflect_padding() {
        let volume = Array::from_shape_vec((1, 3, 1, 1), vec![10.0, 20.0, 30.0]).unwrap();
        let patch = PatchDescriptor::new([0, 0, 0], [6, 1, 1]);
        let out = extract_patch(&volume.view(), &patch, PaddingMode::Reflect);
        let values: Vec<f32> = out.iter().copied().collect();
        assert_eq!(values, vec![10.0, 20.0, 30.0, 20.0, 10.0, 20.0]);
    }

    #[test]
    fn test_reflect_single_voxel_axis() {
        let volume = Array4::<f32>::from_elem((1, 1, 1, 1), 7.0);
        let patch = PatchDescriptor::new([0, 0, 0], [3, 2, 1]);
        let out = extract_patch(&volume.view(), &patch, PaddingMode::Reflect);
        assert!(out.iter().all(|&v| v == 7.0));
    }

    #[test]
    fn test_crop_removes_padding() {
        let volume = ramp((1, 5, 4, 4));
        let cropped = crop_to_spatial(volume.clone(), [3, 4, 2]);
        assert_eq!(cropped.dim(), (1, 3, 4, 2));
        assert_eq!(cropped[[0, 2, 3, 1]], volume[[0, 2, 3, 1]]);
    }

    #[test]
    fn test_descriptor_bounds() {
        let patch = PatchDescriptor::new([2, 0, 1], [2, 4, 3]);
        assert_eq!(patch.end(), [4, 4, 4]);
        assert!(patch.fits_within([4, 4, 4]));
        assert!(!patch.fits_within([4, 4, 3]));
        assert!(patch.contains([3, 3, 3]));
        assert!(!patch.contains([1, 3, 3]));
        assert_eq!(padded_shape([3, 10, 2], [4, 4, 4]), [4, 10, 4]);
    }
}
