//! Evaluation modes and the passes each one runs

use crate::inference::{sliding_inference, InferenceConfig, SegmentationModel};
use crate::transforms::{tta_transforms, TtaTransform};
use ndarray::{Array4, ArrayView4};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};
use uq_common::{CancellationToken, Result, SegmentationError};

/// Evaluation mode identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModeKind {
    #[serde(rename = "single")]
    Single,
    #[serde(rename = "mcdo")]
    McDropout,
    #[serde(rename = "tta")]
    Tta,
    #[serde(rename = "ensemble")]
    Ensemble,
}

impl ModeKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ModeKind::Single => "single",
            ModeKind::McDropout => "mcdo",
            ModeKind::Tta => "tta",
            ModeKind::Ensemble => "ensemble",
        }
    }
}

impl FromStr for ModeKind {
    type Err = SegmentationError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "single" => Ok(ModeKind::Single),
            "mcdo" => Ok(ModeKind::McDropout),
            "tta" => Ok(ModeKind::Tta),
            "ensemble" => Ok(ModeKind::Ensemble),
            other => Err(SegmentationError::config(format!(
                "unknown evaluation mode '{other}' (expected single, mcdo, tta or ensemble)"
            ))),
        }
    }
}

impl fmt::Display for ModeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured evaluation mode
///
/// Every variant produces a set of whole-volume probability samples;
/// reduction is shared and does not depend on the variant.
#[derive(Clone)]
pub enum ModeRunner {
    /// One deterministic pass
    Single { model: Arc<dyn SegmentationModel> },
    /// Repeated stochastic passes with dropout active
    McDropout {
        model: Arc<dyn SegmentationModel>,
        n_outputs: usize,
    },
    /// Deterministic passes over augmented inputs, mapped back by the inverse
    Tta {
        model: Arc<dyn SegmentationModel>,
        transforms: Vec<TtaTransform>,
    },
    /// One deterministic pass per member model
    Ensemble { models: Vec<Arc<dyn SegmentationModel>> },
}

impl fmt::Debug for ModeRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModeRunner")
            .field("kind", &self.kind())
            .field("n_samples", &self.n_samples())
            .finish()
    }
}

impl ModeRunner {
    #[must_use]
    pub fn single(model: Arc<dyn SegmentationModel>) -> Self {
        ModeRunner::Single { model }
    }

    pub fn mc_dropout(model: Arc<dyn SegmentationModel>, n_outputs: usize) -> Result<Self> {
        if n_outputs == 0 {
            return Err(SegmentationError::config("mcdo needs n_outputs >= 1"));
        }
        Ok(ModeRunner::McDropout { model, n_outputs })
    }

    pub fn tta(model: Arc<dyn SegmentationModel>, n_outputs: usize) -> Result<Self> {
        Ok(ModeRunner::Tta {
            model,
            transforms: tta_transforms(n_outputs)?,
        })
    }

    /// Ensemble over the first `min(n_outputs, models.len())` models
    pub fn ensemble(models: &[Arc<dyn SegmentationModel>], n_outputs: usize) -> Result<Self> {
        if models.is_empty() || n_outputs == 0 {
            return Err(SegmentationError::config(
                "ensemble needs at least one model and n_outputs >= 1",
            ));
        }
        let used = n_outputs.min(models.len());
        if used < n_outputs {
            info!(
                "Ensemble requested {} outputs but only {} models are available",
                n_outputs, used
            );
        }
        Ok(ModeRunner::Ensemble {
            models: models[..used].to_vec(),
        })
    }

    /// Build the runner for `kind` from the available models
    ///
    /// Single, MC dropout and TTA use the first model.
    pub fn build(kind: ModeKind, models: &[Arc<dyn SegmentationModel>], n_outputs: usize) -> Result<Self> {
        let first = || {
            models
                .first()
                .cloned()
                .ok_or_else(|| SegmentationError::config(format!("mode {kind} needs a model")))
        };
        match kind {
            ModeKind::Single => Ok(ModeRunner::single(first()?)),
            ModeKind::McDropout => ModeRunner::mc_dropout(first()?, n_outputs),
            ModeKind::Tta => ModeRunner::tta(first()?, n_outputs),
            ModeKind::Ensemble => ModeRunner::ensemble(models, n_outputs),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ModeKind {
        match self {
            ModeRunner::Single { .. } => ModeKind::Single,
            ModeRunner::McDropout { .. } => ModeKind::McDropout,
            ModeRunner::Tta { .. } => ModeKind::Tta,
            ModeRunner::Ensemble { .. } => ModeKind::Ensemble,
        }
    }

    /// Number of samples `produce_samples` returns
    #[must_use]
    pub fn n_samples(&self) -> usize {
        match self {
            ModeRunner::Single { .. } => 1,
            ModeRunner::McDropout { n_outputs, .. } => *n_outputs,
            ModeRunner::Tta { transforms, .. } => transforms.len(),
            ModeRunner::Ensemble { models } => models.len(),
        }
    }

    /// Run every pass of this mode over `image`
    ///
    /// Either all samples are returned or the first failure is; a failed
    /// pass is reported as `Inference` labelled with this mode and the
    /// sample index.
    pub fn produce_samples(
        &self,
        image: &ArrayView4<'_, f32>,
        config: &InferenceConfig,
        cancel: &CancellationToken,
    ) -> Result<Vec<Array4<f32>>> {
        let mode = self.kind().as_str();
        debug!("Mode {}: producing {} sample(s)", mode, self.n_samples());

        match self {
            ModeRunner::Single { model } => {
                let sample = sliding_inference(model.as_ref(), image, config, false, cancel)
                    .map_err(|e| e.for_pass(mode, 0))?;
                Ok(vec![sample])
            }
            ModeRunner::McDropout { model, n_outputs } => (0..*n_outputs)
                .into_par_iter()
                .map(|sample| {
                    sliding_inference(model.as_ref(), image, config, true, cancel)
                        .map_err(|e| e.for_pass(mode, sample))
                })
                .collect(),
            ModeRunner::Tta { model, transforms } => transforms
                .par_iter()
                .enumerate()
                .map(|(sample, transform)| {
                    let augmented = transform.apply(image.to_owned());
                    let output =
                        sliding_inference(model.as_ref(), &augmented.view(), config, false, cancel)
                            .map_err(|e| e.for_pass(mode, sample))?;
                    Ok(transform.invert(output))
                })
                .collect(),
            ModeRunner::Ensemble { models } => models
                .par_iter()
                .enumerate()
                .map(|(sample, model)| {
                    sliding_inference(model.as_ref(), image, config, false, cancel)
                        .map_err(|e| e.for_pass(mode, sample))
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::tests::CopyModel;
    use ndarray::{Array5, ArrayView5};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uq_patching::PatchStep;

    /// Adds a fixed offset so ensemble members are distinguishable
    struct OffsetModel(f32);

    impl SegmentationModel for OffsetModel {
        fn forward(&self, patches: ArrayView5<'_, f32>, _stochastic: bool) -> anyhow::Result<Array5<f32>> {
            Ok(patches.mapv(|v| v + self.0))
        }
    }

    /// Fails on its third forward call
    struct FlakyModel(AtomicUsize);

    impl SegmentationModel for FlakyModel {
        fn forward(&self, patches: ArrayView5<'_, f32>, stochastic: bool) -> anyhow::Result<Array5<f32>> {
            if self.0.fetch_add(1, Ordering::SeqCst) == 2 {
                anyhow::bail!("device lost");
            }
            assert!(stochastic);
            Ok(patches.to_owned())
        }
    }

    fn config() -> InferenceConfig {
        InferenceConfig {
            patch_size: [4, 4, 4],
            step: PatchStep::Uniform(4),
            batch_size: 4,
            ..InferenceConfig::default()
        }
    }

    fn image() -> Array4<f32> {
        Array4::from_shape_fn((1, 8, 8, 4), |(_, i, j, k)| ((i * 31 + j * 7 + k) % 13) as f32 / 13.0)
    }

    #[test]
    fn test_mode_names_roundtrip() {
        for name in ["single", "mcdo", "tta", "ensemble"] {
            assert_eq!(name.parse::<ModeKind>().unwrap().to_string(), name);
        }
        assert!("bayes".parse::<ModeKind>().is_err());
    }

    #[test]
    fn test_tta_samples_match_input_frame() {
        let model: Arc<dyn SegmentationModel> = Arc::new(CopyModel { channels: 1 });
        let runner = ModeRunner::tta(model, 12).unwrap();
        let image = image();
        let samples = runner
            .produce_samples(&image.view(), &config(), &CancellationToken::new())
            .unwrap();
        assert_eq!(samples.len(), 12);
        for sample in samples {
            assert_eq!(sample, image);
        }
    }

    #[test]
    fn test_tta_on_non_square_volume() {
        let model: Arc<dyn SegmentationModel> = Arc::new(CopyModel { channels: 2 });
        let runner = ModeRunner::tta(model, crate::transforms::MAX_TTA_TRANSFORMS).unwrap();
        let image =
            Array4::from_shape_fn((1, 12, 8, 4), |(_, i, j, k)| ((i * 31 + j * 7 + k) % 13) as f32 / 13.0);
        let samples = runner
            .produce_samples(&image.view(), &config(), &CancellationToken::new())
            .unwrap();
        assert_eq!(samples.len(), 16);
        for sample in samples {
            assert_eq!(sample.dim(), (2, 12, 8, 4));
            for c in 0..2 {
                assert_eq!(sample.index_axis(ndarray::Axis(0), c), image.index_axis(ndarray::Axis(0), 0));
            }
        }
    }

    #[test]
    fn test_ensemble_uses_min_of_outputs_and_models() {
        let models: Vec<Arc<dyn SegmentationModel>> = vec![
            Arc::new(OffsetModel(0.0)),
            Arc::new(OffsetModel(0.1)),
            Arc::new(OffsetModel(0.2)),
        ];
        let runner = ModeRunner::build(ModeKind::Ensemble, &models, 5).unwrap();
        assert_eq!(runner.n_samples(), 3);
        let runner = ModeRunner::build(ModeKind::Ensemble, &models, 2).unwrap();
        let image = image();
        let samples = runner
            .produce_samples(&image.view(), &config(), &CancellationToken::new())
            .unwrap();
        assert_eq!(samples.len(), 2);
        assert!((samples[1][[0, 0, 0, 0]] - samples[0][[0, 0, 0, 0]] - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_failed_pass_fails_whole_mode() {
        let model: Arc<dyn SegmentationModel> = Arc::new(FlakyModel(AtomicUsize::new(0)));
        let runner = ModeRunner::mc_dropout(model, 4).unwrap();
        let image = image();
        let err = runner
            .produce_samples(&image.view(), &config(), &CancellationToken::new())
            .unwrap_err();
        match err {
            SegmentationError::Inference { mode, reason, .. } => {
                assert_eq!(mode, "mcdo");
                assert!(reason.contains("device lost"));
            }
            other => panic!("expected inference error, got {other:?}"),
        }
    }

    #[test]
    fn test_build_validates_inputs() {
        assert!(ModeRunner::build(ModeKind::Single, &[], 1).is_err());
        let model: Arc<dyn SegmentationModel> = Arc::new(OffsetModel(0.0));
        assert!(ModeRunner::build(ModeKind::Tta, &[model.clone()], 17).is_err());
        assert!(ModeRunner::build(ModeKind::McDropout, &[model], 0).is_err());
    }
}
