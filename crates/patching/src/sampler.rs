//! Randomized training patches with foreground oversampling

use crate::geometry::{extract_patch, padded_shape, PaddingMode, PatchDescriptor};
use ndarray::{Array4, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uq_common::{Case, Result, SegmentationError, Shape3};

/// Label values above this count as foreground
const FOREGROUND_THRESHOLD: f32 = 0.5;

/// Training patch sampler configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerConfig {
    pub patch_size: Shape3,
    /// Probability that a patch is centred on a foreground voxel
    pub foreground_ratio: f64,
    pub padding: PaddingMode,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            patch_size: [128, 128, 64],
            foreground_ratio: 0.33,
            padding: PaddingMode::Zero,
        }
    }
}

impl SamplerConfig {
    pub fn validate(&self) -> Result<()> {
        validate(self.patch_size, self.foreground_ratio)
    }
}

fn validate(patch_size: Shape3, foreground_ratio: f64) -> Result<()> {
    if patch_size.contains(&0) {
        return Err(SegmentationError::config(format!(
            "patch_size must be positive on every axis, got {patch_size:?}"
        )));
    }
    if !(0.0..=1.0).contains(&foreground_ratio) {
        return Err(SegmentationError::config(format!(
            "foreground_oversample_ratio must lie in [0, 1], got {foreground_ratio}"
        )));
    }
    Ok(())
}

/// Image and label patches cut from one case
#[derive(Debug, Clone)]
pub struct TrainingPatch {
    pub descriptor: PatchDescriptor,
    pub image: Array4<f32>,
    pub label: Array4<f32>,
}

/// Samples patch locations for one case
///
/// Foreground voxel locations are indexed once so repeated draws stay cheap.
#[derive(Debug, Clone)]
pub struct PatchSampler {
    frame: Shape3,
    patch_size: Shape3,
    foreground_ratio: f64,
    foreground: Vec<Shape3>,
}

impl PatchSampler {
    pub fn new(case: &Case, patch_size: Shape3, foreground_ratio: f64) -> Result<Self> {
        validate(patch_size, foreground_ratio)?;

        let any_class = case
            .label
            .fold_axis(Axis(0), f32::NEG_INFINITY, |acc, &v| acc.max(v));
        let foreground: Vec<Shape3> = any_class
            .indexed_iter()
            .filter(|(_, &v)| v > FOREGROUND_THRESHOLD)
            .map(|((i, j, k), _)| [i, j, k])
            .collect();

        debug!(
            "Case {}: {} foreground voxels indexed for sampling",
            case.id,
            foreground.len()
        );

        Ok(Self {
            frame: padded_shape(case.spatial_shape(), patch_size),
            patch_size,
            foreground_ratio,
            foreground,
        })
    }

    #[must_use]
    pub fn foreground_voxels(&self) -> usize {
        self.foreground.len()
    }

    /// Draw one patch location
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> PatchDescriptor {
        let wants_foreground = rng.random_bool(self.foreground_ratio);
        if wants_foreground && !self.foreground.is_empty() {
            let voxel = self.foreground[rng.random_range(0..self.foreground.len())];
            self.around(voxel, rng)
        } else {
            if wants_foreground {
                debug!("No foreground voxels available, falling back to uniform patch");
            }
            self.uniform(rng)
        }
    }

    fn uniform<R: Rng + ?Sized>(&self, rng: &mut R) -> PatchDescriptor {
        let mut origin = [0; 3];
        for axis in 0..3 {
            origin[axis] = rng.random_range(0..=self.frame[axis] - self.patch_size[axis]);
        }
        PatchDescriptor::new(origin, self.patch_size)
    }

    /// Centre on `voxel` with jitter, clamped so `voxel` stays inside
    fn around<R: Rng + ?Sized>(&self, voxel: Shape3, rng: &mut R) -> PatchDescriptor {
        let mut origin = [0; 3];
        for axis in 0..3 {
            let extent = self.patch_size[axis];
            let lo = (voxel[axis] + 1).saturating_sub(extent);
            let hi = voxel[axis].min(self.frame[axis] - extent);
            let jitter = (extent / 4) as isize;
            let offset = if jitter > 0 {
                rng.random_range(-(jitter as i64)..=jitter as i64) as isize
            } else {
                0
            };
            let centred = voxel[axis] as isize - (extent / 2) as isize + offset;
            origin[axis] = centred.clamp(lo as isize, hi as isize) as usize;
        }
        PatchDescriptor::new(origin, self.patch_size)
    }
}

/// Draw one training patch location from `case`
///
/// With probability `foreground_ratio` the patch contains a foreground voxel.
pub fn sample_patch<R: Rng + ?Sized>(
    case: &Case,
    patch_size: Shape3,
    foreground_ratio: f64,
    rng: &mut R,
) -> Result<PatchDescriptor> {
    Ok(PatchSampler::new(case, patch_size, foreground_ratio)?.sample(rng))
}

/// Draw `n` patches and cut them out of the image and label volumes
pub fn sample_training_patches<R: Rng + ?Sized>(
    case: &Case,
    config: &SamplerConfig,
    n: usize,
    rng: &mut R,
) -> Result<Vec<TrainingPatch>> {
    let sampler = PatchSampler::new(case, config.patch_size, config.foreground_ratio)?;
    let image = case.image.view();
    let label = case.label.view();

    Ok((0..n)
        .map(|_| {
            let descriptor = sampler.sample(rng);
            TrainingPatch {
                descriptor,
                image: extract_patch(&image, &descriptor, config.padding),
                label: extract_patch(&label, &descriptor, config.padding),
            }
        })
        .collect())
}
