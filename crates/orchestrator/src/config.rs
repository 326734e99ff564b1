//! Evaluation configuration loaded from YAML

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;
use uq_common::{Result, SegmentationError, Shape3};
use uq_data::{DuplicateStrategy, IntensityWindow, SplitConfig};
use uq_metrics::{parse_metric_specs, MetricSpec};
use uq_patching::{BlendingWindow, PaddingMode, PatchStep, SamplerConfig};
use uq_uncertainty::{EngineConfig, InferenceConfig, ModeKind, ProbabilityKind};

/// Complete evaluation configuration
///
/// Unspecified keys take their defaults. Nothing here is trusted until
/// [`EvaluationConfig::validate`] has run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    pub patch_size: Shape3,
    pub patch_step: PatchStep,
    pub foreground_oversample_ratio: f64,
    pub n_folds: usize,
    pub test_split: f64,
    pub duplicate_name_strategy: String,
    pub modes: Vec<String>,
    /// Samples per stochastic mode (MC dropout passes, TTA transforms,
    /// ensemble members)
    pub n_outputs: usize,
    pub metrics: Vec<String>,
    pub class_names: Vec<String>,
    pub seed: u64,
    pub batch_size: usize,
    pub padding: PaddingMode,
    pub blending: BlendingWindow,
    pub output_activation: String,
    /// Clip and rescale image intensities before inference
    pub intensity_window: Option<IntensityWindow>,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            patch_size: [128, 128, 64],
            patch_step: PatchStep::PerAxis([64, 64, 32]),
            foreground_oversample_ratio: 0.33,
            n_folds: 5,
            test_split: 0.2,
            duplicate_name_strategy: "skip".to_string(),
            modes: vec!["single".to_string()],
            n_outputs: 10,
            metrics: vec!["dice".to_string()],
            class_names: vec!["background".to_string(), "foreground".to_string()],
            seed: 42,
            batch_size: 2,
            padding: PaddingMode::Zero,
            blending: BlendingWindow::Flat,
            output_activation: "sigmoid".to_string(),
            intensity_window: None,
        }
    }
}

/// Configuration after validation, with every token parsed
#[derive(Debug, Clone)]
pub struct ValidatedConfig {
    pub split: SplitConfig,
    pub sampler: SamplerConfig,
    pub engine: EngineConfig,
    pub modes: Vec<ModeKind>,
    pub n_outputs: usize,
    pub metrics: Vec<MetricSpec>,
    pub class_names: Vec<String>,
    pub intensity_window: Option<IntensityWindow>,
}

impl ValidatedConfig {
    /// Whether any configured metric needs voxel spacing
    #[must_use]
    pub fn needs_spacing(&self) -> bool {
        self.metrics.iter().any(|spec| spec.kind.needs_spacing())
    }
}

impl EvaluationConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading evaluation config from {}", path.display());
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&text)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Check every option and parse every token before any case is loaded
    pub fn validate(&self) -> Result<ValidatedConfig> {
        let split = SplitConfig {
            test_split: self.test_split,
            n_folds: self.n_folds,
            duplicate_strategy: self.duplicate_name_strategy.parse::<DuplicateStrategy>()?,
            seed: self.seed,
        };
        split.validate()?;

        let sampler = SamplerConfig {
            patch_size: self.patch_size,
            foreground_ratio: self.foreground_oversample_ratio,
            padding: self.padding,
        };
        sampler.validate()?;

        let inference = InferenceConfig {
            patch_size: self.patch_size,
            step: self.patch_step,
            batch_size: self.batch_size,
            padding: self.padding,
            blending: self.blending,
        };
        inference.validate()?;

        if let BlendingWindow::Gaussian { sigma_scale } = self.blending {
            if !sigma_scale.is_finite() || sigma_scale <= 0.0 {
                return Err(SegmentationError::config(format!(
                    "gaussian blending needs a positive sigma_scale, got {sigma_scale}"
                )));
            }
        }

        if self.modes.is_empty() {
            return Err(SegmentationError::config("at least one evaluation mode is required"));
        }
        let modes = self
            .modes
            .iter()
            .map(|m| m.parse::<ModeKind>())
            .collect::<Result<Vec<_>>>()?;
        if self.n_outputs == 0 {
            return Err(SegmentationError::config("n_outputs must be at least 1"));
        }
        if modes.contains(&ModeKind::Tta) && self.n_outputs > uq_uncertainty::MAX_TTA_TRANSFORMS {
            return Err(SegmentationError::config(format!(
                "tta supports at most {} distinct transforms, n_outputs is {}",
                uq_uncertainty::MAX_TTA_TRANSFORMS,
                self.n_outputs
            )));
        }

        let metrics = parse_metric_specs(self.metrics.as_slice())?;
        if self.class_names.is_empty() {
            return Err(SegmentationError::config("class_names must not be empty"));
        }

        if let Some(window) = self.intensity_window {
            if window.upper <= window.lower {
                return Err(SegmentationError::config(format!(
                    "intensity window upper bound must exceed lower bound, got {window:?}"
                )));
            }
        }

        let probability = self.output_activation.parse::<ProbabilityKind>()?;

        Ok(ValidatedConfig {
            split,
            sampler,
            engine: EngineConfig {
                inference,
                probability,
            },
            modes,
            n_outputs: self.n_outputs,
            metrics,
            class_names: self.class_names.clone(),
            intensity_window: self.intensity_window,
        })
    }
}
