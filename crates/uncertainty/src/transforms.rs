//! Invertible test-time augmentations

use ndarray::{Array4, Axis};
use serde::{Deserialize, Serialize};
use uq_common::{Result, SegmentationError};

/// Distinct spatial transforms available
///
/// Flips of height and width combined with at most one quarter turn give
/// the 8 symmetries of the square; the depth flip doubles that. More
/// quarter turns only repeat earlier entries (two turns equal flipping
/// height and width).
pub const MAX_TTA_TRANSFORMS: usize = 16;

/// One test-time augmentation
///
/// Spatial parts are exact index permutations, so `invert(apply(x)) == x`
/// bit for bit. The gamma part only alters input intensities and is the
/// identity on outputs.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TtaTransform {
    /// Flip along (height, width, depth)
    pub flips: [bool; 3],
    /// Quarter turns in the height-width plane
    pub quarter_turns: u8,
    /// Intensity gamma for images normalised to [0, 1]
    pub gamma: Option<f32>,
}

impl TtaTransform {
    #[must_use]
    pub fn identity() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_identity(&self) -> bool {
        !self.flips.iter().any(|&f| f) && self.quarter_turns % 4 == 0 && self.gamma.is_none()
    }

    #[must_use]
    pub fn with_gamma(mut self, gamma: f32) -> Self {
        self.gamma = Some(gamma);
        self
    }

    /// Transform an input image: gamma, then flips, then rotation
    #[must_use]
    pub fn apply(&self, image: Array4<f32>) -> Array4<f32> {
        let mut volume = match self.gamma {
            Some(gamma) => image.mapv_into(|v| v.max(0.0).powf(gamma)),
            None => image,
        };
        for axis in 0..3 {
            if self.flips[axis] {
                volume = flip(volume, axis);
            }
        }
        rotate(volume, self.quarter_turns % 4)
    }

    /// Map a model output back to the untransformed frame
    #[must_use]
    pub fn invert(&self, output: Array4<f32>) -> Array4<f32> {
        let mut volume = rotate(output, (4 - self.quarter_turns % 4) % 4);
        for axis in (0..3).rev() {
            if self.flips[axis] {
                volume = flip(volume, axis);
            }
        }
        volume
    }
}

fn flip(mut volume: Array4<f32>, spatial_axis: usize) -> Array4<f32> {
    volume.invert_axis(Axis(spatial_axis + 1));
    volume.as_standard_layout().into_owned()
}

/// Rotate by `turns` quarter turns from the height axis towards the width axis
fn rotate(volume: Array4<f32>, turns: u8) -> Array4<f32> {
    if turns == 0 {
        return volume;
    }
    let mut view = volume.view();
    for _ in 0..turns {
        view.invert_axis(Axis(2));
        view.swap_axes(1, 2);
    }
    view.as_standard_layout().into_owned()
}

/// The first `n` transforms: identity, then flip subsets, then the flip
/// subsets after one quarter turn
///
/// Transform `t` uses flip subset `t % 8` and `t / 8` quarter turns, so
/// every transform in the set is a different permutation.
pub fn tta_transforms(n: usize) -> Result<Vec<TtaTransform>> {
    if n == 0 {
        return Err(SegmentationError::config("tta needs at least one transform"));
    }
    if n > MAX_TTA_TRANSFORMS {
        return Err(SegmentationError::config(format!(
            "tta supports at most {MAX_TTA_TRANSFORMS} distinct transforms, {n} requested"
        )));
    }
    Ok((0..n)
        .map(|t| TtaTransform {
            flips: [t & 1 != 0, t & 2 != 0, t & 4 != 0],
            quarter_turns: (t / 8) as u8,
            gamma: None,
        })
        .collect())
}
