//! Overlap-aware reassembly of patch outputs into a whole volume

use crate::geometry::PatchDescriptor;
use ndarray::{s, Array1, Array3, Array4, ArrayView4, Axis};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;
use uq_common::{Result, SegmentationError, Shape3};

/// Floor for Gaussian weights so patch borders still count as coverage
const MIN_GAUSSIAN_WEIGHT: f32 = 1e-3;

/// Per-voxel weighting applied to each patch contribution
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum BlendingWindow {
    /// Every voxel of every patch weighs 1
    #[default]
    Flat,
    /// Separable Gaussian centred on the patch, sigma = extent * sigma_scale
    Gaussian { sigma_scale: f32 },
}

impl BlendingWindow {
    fn weights(&self, extent: Shape3) -> Option<Array3<f32>> {
        let sigma_scale = match self {
            BlendingWindow::Flat => return None,
            BlendingWindow::Gaussian { sigma_scale } => *sigma_scale,
        };

        let profile = |len: usize| -> Array1<f32> {
            let centre = (len as f32 - 1.0) / 2.0;
            let sigma = (len as f32 * sigma_scale).max(f32::EPSILON);
            Array1::from_shape_fn(len, |i| {
                let d = i as f32 - centre;
                (-(d * d) / (2.0 * sigma * sigma)).exp()
            })
        };
        let (p0, p1, p2) = (profile(extent[0]), profile(extent[1]), profile(extent[2]));
        let window = Array3::from_shape_fn((extent[0], extent[1], extent[2]), |(i, j, k)| {
            p0[i] * p1[j] * p2[k]
        });
        let peak = window.iter().copied().fold(0.0_f32, f32::max);
        Some(window.mapv(|w| (w / peak).max(MIN_GAUSSIAN_WEIGHT)))
    }
}

/// Accumulator for one case, mode and pass
///
/// The accumulator and weight arrays are owned by this value and dropped
/// with it; nothing persists across stitching calls.
#[derive(Debug)]
pub struct Stitcher {
    accumulator: Array4<f32>,
    weight: Array3<f32>,
    blending: BlendingWindow,
    windows: HashMap<Shape3, Array3<f32>>,
    patches: usize,
}

impl Stitcher {
    #[must_use]
    pub fn new(n_channels: usize, frame: Shape3, blending: BlendingWindow) -> Self {
        Self {
            accumulator: Array4::zeros((n_channels, frame[0], frame[1], frame[2])),
            weight: Array3::zeros((frame[0], frame[1], frame[2])),
            blending,
            windows: HashMap::new(),
            patches: 0,
        }
    }

    #[must_use]
    pub fn frame(&self) -> Shape3 {
        let (h, w, d) = self.weight.dim();
        [h, w, d]
    }

    /// Add one patch output at the location described by `patch`
    pub fn add(&mut self, patch: &PatchDescriptor, output: &ArrayView4<'_, f32>) -> Result<()> {
        let [e0, e1, e2] = patch.extent;
        let expected = (self.accumulator.dim().0, e0, e1, e2);
        if output.dim() != expected {
            return Err(SegmentationError::config(format!(
                "patch output shape {:?} does not match expected {:?}",
                output.dim(),
                expected
            )));
        }
        if !patch.fits_within(self.frame()) {
            return Err(SegmentationError::config(format!(
                "patch {:?} exceeds stitching frame {:?}",
                patch,
                self.frame()
            )));
        }

        let [o0, o1, o2] = patch.origin;
        let mut acc = self
            .accumulator
            .slice_mut(s![.., o0..o0 + e0, o1..o1 + e1, o2..o2 + e2]);
        let mut weight = self.weight.slice_mut(s![o0..o0 + e0, o1..o1 + e1, o2..o2 + e2]);

        if let BlendingWindow::Flat = self.blending {
            acc += output;
            weight += 1.0;
        } else {
            let blending = self.blending;
            let window = self
                .windows
                .entry(patch.extent)
                .or_insert_with(|| blending.weights(patch.extent).unwrap_or_else(|| Array3::ones((e0, e1, e2))));
            let window4 = window.view().insert_axis(Axis(0));
            acc += &(output * &window4);
            weight += &*window;
        }

        self.patches += 1;
        Ok(())
    }

    /// Normalise accumulated values by their weights
    ///
    /// Fails if any voxel of the frame was never covered by a patch.
    pub fn finalize(self) -> Result<Array4<f32>> {
        let uncovered = self.weight.iter().filter(|&&w| w <= 0.0).count();
        if uncovered > 0 {
            return Err(SegmentationError::IncompleteCoverage { uncovered });
        }

        let mut volume = self.accumulator;
        for mut channel in volume.outer_iter_mut() {
            channel /= &self.weight;
        }
        debug!(
            "Stitched {} patches into frame {:?}",
            self.patches,
            [volume.dim().1, volume.dim().2, volume.dim().3]
        );
        Ok(volume)
    }
}

/// Reassemble `(descriptor, output)` pairs into one volume over `frame`
pub fn stitch<I>(
    n_channels: usize,
    frame: Shape3,
    patch_results: I,
    blending: BlendingWindow,
) -> Result<Array4<f32>>
where
    I: IntoIterator<Item = (PatchDescriptor, Array4<f32>)>,
{
    let mut stitcher = Stitcher::new(n_channels, frame, blending);
    for (patch, output) in patch_results {
        stitcher.add(&patch, &output.view())?;
    }
    stitcher.finalize()
}
