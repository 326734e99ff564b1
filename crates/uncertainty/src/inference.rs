//! Batched sliding-window inference over a whole volume

use ndarray::{stack, Array4, Array5, ArrayView4, ArrayView5, Axis};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uq_common::{spatial_shape, CancellationToken, Result, SegmentationError, Shape3};
use uq_patching::{
    crop_to_spatial, extract_patch, sliding_window_grid, BlendingWindow, PaddingMode,
    PatchDescriptor, PatchStep, Stitcher,
};

/// Segmentation network consumed through a batched forward pass
///
/// Input batches are `(batch, channels, h, w, d)`; outputs must keep the
/// batch and spatial extents and carry one channel per output class.
pub trait SegmentationModel: Send + Sync {
    /// Identifier used in log messages
    fn name(&self) -> &str {
        "model"
    }

    /// Run the network on a patch batch
    ///
    /// `stochastic` keeps dropout layers active (MC dropout sampling).
    fn forward(&self, patches: ArrayView5<'_, f32>, stochastic: bool) -> anyhow::Result<Array5<f32>>;
}

/// Sliding-window inference configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceConfig {
    pub patch_size: Shape3,
    pub step: PatchStep,
    /// Patches per forward call
    pub batch_size: usize,
    pub padding: PaddingMode,
    pub blending: BlendingWindow,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            patch_size: [128, 128, 64],
            step: PatchStep::PerAxis([64, 64, 32]),
            batch_size: 2,
            padding: PaddingMode::Zero,
            blending: BlendingWindow::Flat,
        }
    }
}

impl InferenceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(SegmentationError::config("batch_size must be at least 1"));
        }
        // Grid construction performs the patch/step checks
        sliding_window_grid(self.patch_size, self.patch_size, self.step)?;
        Ok(())
    }
}

fn inference_error(reason: impl Into<String>) -> SegmentationError {
    SegmentationError::Inference {
        mode: String::new(),
        sample: 0,
        reason: reason.into(),
    }
}

/// Predict a whole volume by tiling it into overlapping patches
///
/// The image is virtually padded up to the patch extent, tiled with the
/// configured step, pushed through `model` in batches and reassembled.
/// The returned volume has the image's spatial extent and the model's
/// channel count. Cancellation is checked before every batch; a cancelled
/// run drops its partial accumulator.
///
/// Model failures come back as `SegmentationError::Inference` without
/// mode or sample context; callers attach it with `for_pass`.
pub fn sliding_inference(
    model: &dyn SegmentationModel,
    image: &ArrayView4<'_, f32>,
    config: &InferenceConfig,
    stochastic: bool,
    cancel: &CancellationToken,
) -> Result<Array4<f32>> {
    config.validate()?;
    let volume_shape = spatial_shape(image);
    let grid = sliding_window_grid(volume_shape, config.patch_size, config.step)?;
    let descriptors: Vec<PatchDescriptor> = grid.iter().collect();
    let [e0, e1, e2] = grid.patch_extent();

    debug!(
        "{}: {} patches over frame {:?} in batches of {}",
        model.name(),
        descriptors.len(),
        grid.padded_shape(),
        config.batch_size
    );

    let mut stitcher: Option<Stitcher> = None;
    for chunk in descriptors.chunks(config.batch_size) {
        cancel.check()?;

        let patches: Vec<Array4<f32>> = chunk
            .iter()
            .map(|patch| extract_patch(image, patch, config.padding))
            .collect();
        let views: Vec<ArrayView4<'_, f32>> = patches.iter().map(|p| p.view()).collect();
        let batch = stack(Axis(0), &views)
            .map_err(|e| SegmentationError::config(format!("cannot assemble patch batch: {e}")))?;

        let output = model
            .forward(batch.view(), stochastic)
            .map_err(|e| inference_error(format!("{e:#}")))?;

        let (n, channels, h, w, d) = output.dim();
        if n != chunk.len() || (h, w, d) != (e0, e1, e2) || channels == 0 {
            return Err(inference_error(format!(
                "model returned shape {:?} for a batch of {} patches of extent {:?}",
                output.dim(),
                chunk.len(),
                grid.patch_extent()
            )));
        }

        let stitcher = stitcher
            .get_or_insert_with(|| Stitcher::new(channels, grid.padded_shape(), config.blending));
        for (patch, patch_output) in chunk.iter().zip(output.outer_iter()) {
            stitcher.add(patch, &patch_output).map_err(|e| match e {
                SegmentationError::Configuration(reason) => inference_error(reason),
                other => other,
            })?;
        }
    }

    let stitcher = stitcher.ok_or(SegmentationError::IncompleteCoverage {
        uncovered: volume_shape.iter().product(),
    })?;
    Ok(crop_to_spatial(stitcher.finalize()?, volume_shape))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use ndarray::s;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Copies the first input channel into every output channel
    pub(crate) struct CopyModel {
        pub channels: usize,
    }

    impl SegmentationModel for CopyModel {
        fn forward(&self, patches: ArrayView5<'_, f32>, _stochastic: bool) -> anyhow::Result<Array5<f32>> {
            let (n, _, h, w, d) = patches.dim();
            let first = patches.slice(s![.., 0..1, .., .., ..]);
            let mut out = Array5::zeros((n, self.channels, h, w, d));
            for c in 0..self.channels {
                out.slice_mut(s![.., c..c + 1, .., .., ..]).assign(&first);
            }
            Ok(out)
        }
    }

    struct CountingModel {
        calls: AtomicUsize,
        cancel_after: usize,
        token: CancellationToken,
    }

    impl SegmentationModel for CountingModel {
        fn forward(&self, patches: ArrayView5<'_, f32>, _stochastic: bool) -> anyhow::Result<Array5<f32>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) + 1 == self.cancel_after {
                self.token.cancel();
            }
            Ok(patches.to_owned())
        }
    }

    struct WrongShapeModel;

    impl SegmentationModel for WrongShapeModel {
        fn forward(&self, patches: ArrayView5<'_, f32>, _stochastic: bool) -> anyhow::Result<Array5<f32>> {
            let (n, c, h, w, _) = patches.dim();
            Ok(Array5::zeros((n, c, h, w, 1)))
        }
    }

    fn ramp(shape: (usize, usize, usize, usize)) -> Array4<f32> {
        Array4::from_shape_fn(shape, |(c, i, j, k)| ((c + i * 7 + j * 3 + k) % 23) as f32 / 23.0)
    }

    fn small_config() -> InferenceConfig {
        InferenceConfig {
            patch_size: [8, 8, 4],
            step: PatchStep::Uniform(4),
            batch_size: 3,
            ..InferenceConfig::default()
        }
    }

    #[test]
    fn test_identity_model_reconstructs_volume() {
        let image = ramp((1, 20, 13, 6));
        let model = CopyModel { channels: 2 };
        let out = sliding_inference(&model, &image.view(), &small_config(), false, &CancellationToken::new())
            .unwrap();
        assert_eq!(out.dim(), (2, 20, 13, 6));
        for c in 0..2 {
            for (a, b) in out.index_axis(Axis(0), c).iter().zip(image.index_axis(Axis(0), 0).iter()) {
                assert!((a - b).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_volume_smaller_than_patch_is_cropped_back() {
        let image = ramp((1, 5, 6, 3));
        let model = CopyModel { channels: 1 };
        let config = InferenceConfig {
            padding: PaddingMode::Reflect,
            ..small_config()
        };
        let out = sliding_inference(&model, &image.view(), &config, false, &CancellationToken::new()).unwrap();
        assert_eq!(out.dim(), (1, 5, 6, 3));
        assert!(out.iter().zip(image.iter()).all(|(a, b)| (a - b).abs() < 1e-6));
    }

    #[test]
    fn test_cancellation_between_batches() {
        let token = CancellationToken::new();
        let model = CountingModel {
            calls: AtomicUsize::new(0),
            cancel_after: 2,
            token: token.clone(),
        };
        let image = ramp((1, 24, 24, 8));
        let result = sliding_inference(&model, &image.view(), &small_config(), false, &token);
        assert!(matches!(result, Err(SegmentationError::Cancelled)));
        assert_eq!(model.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_wrong_output_shape_is_inference_error() {
        let image = ramp((1, 8, 8, 4));
        let result = sliding_inference(
            &WrongShapeModel,
            &image.view(),
            &small_config(),
            false,
            &CancellationToken::new(),
        );
        assert!(matches!(result, Err(SegmentationError::Inference { .. })));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let config = InferenceConfig {
            batch_size: 0,
            ..small_config()
        };
        assert!(config.validate().is_err());
        assert!(small_config().validate().is_ok());
    }

    #[test]
    fn test_config_from_yaml() {
        let yaml = "patch_size: [8, 8, 4]\nstep: [4, 4, 2]\nbatch_size: 3\npadding: reflect\nblending:\n  kind: gaussian\n  sigma_scale: 0.125\n";
        let config: InferenceConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.step, PatchStep::PerAxis([4, 4, 2]));
        assert_eq!(config.padding, PaddingMode::Reflect);
        assert_eq!(config.blending, BlendingWindow::Gaussian { sigma_scale: 0.125 });
        assert!(config.validate().is_ok());
    }
}
