//! Per-case driver running each configured mode and reducing its samples

use crate::inference::InferenceConfig;
use crate::modes::{ModeKind, ModeRunner};
use crate::reduction::{binarise_samples, pairwise_dice, reduce_samples, ProbabilityKind, UncertaintyMaps};
use ndarray::Array4;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info, warn};
use uq_common::mask::DEFAULT_THRESHOLD;
use uq_common::{CancellationToken, Case, Result, SegmentationError};

/// Engine configuration shared by all modes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub inference: InferenceConfig,
    pub probability: ProbabilityKind,
}

/// Where the engine is in its per-case walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Idle,
    Running(ModeKind),
    Reducing(ModeKind),
    Done,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Idle => write!(f, "idle"),
            EngineState::Running(mode) => write!(f, "running({mode})"),
            EngineState::Reducing(mode) => write!(f, "reducing({mode})"),
            EngineState::Done => write!(f, "done"),
        }
    }
}

/// Reduced result of one mode on one case
#[derive(Debug, Clone)]
pub struct ModeOutput {
    pub mode: ModeKind,
    pub maps: UncertaintyMaps,
    /// Mean pairwise Dice between samples, per class
    pub pairwise_dice: Vec<f64>,
    /// Every sample binarised at 0.5, kept for sample-set metrics
    pub sample_masks: Vec<Array4<bool>>,
}

impl ModeOutput {
    /// Reduce a mode's sample set
    ///
    /// The probability samples themselves are not retained; only their
    /// reduced maps and binary masks are.
    pub fn from_samples(mode: ModeKind, samples: &[Array4<f32>], probability: ProbabilityKind) -> Result<Self> {
        let maps = reduce_samples(samples, probability)?;
        let agreement = pairwise_dice(samples, DEFAULT_THRESHOLD)?;
        Ok(Self {
            mode,
            maps,
            pairwise_dice: agreement,
            sample_masks: binarise_samples(samples, DEFAULT_THRESHOLD),
        })
    }

    #[must_use]
    pub fn n_classes(&self) -> usize {
        self.maps.mean.dim().0
    }
}

/// Result of one mode: reduced output, or the inference failure that
/// stopped it
#[derive(Debug)]
pub enum ModeOutcome {
    Completed(ModeOutput),
    Failed {
        mode: ModeKind,
        error: SegmentationError,
    },
}

impl ModeOutcome {
    #[must_use]
    pub fn mode(&self) -> ModeKind {
        match self {
            ModeOutcome::Completed(output) => output.mode,
            ModeOutcome::Failed { mode, .. } => *mode,
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        matches!(self, ModeOutcome::Completed(_))
    }

    #[must_use]
    pub fn output(&self) -> Option<&ModeOutput> {
        match self {
            ModeOutcome::Completed(output) => Some(output),
            ModeOutcome::Failed { .. } => None,
        }
    }
}

/// Uncertainty evaluation engine
///
/// Walks `Idle -> Running(mode) -> Reducing(mode) -> ... -> Done` for each
/// case. Modes run one after another; each mode's sample set lives only
/// until it has been reduced.
#[derive(Debug)]
pub struct UncertaintyEngine {
    config: EngineConfig,
    cancel: CancellationToken,
    state: EngineState,
}

impl UncertaintyEngine {
    #[must_use]
    pub fn new(config: EngineConfig, cancel: CancellationToken) -> Self {
        Self {
            config,
            cancel,
            state: EngineState::Idle,
        }
    }

    #[must_use]
    pub fn state(&self) -> EngineState {
        self.state
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn transition(&mut self, case_id: &str, next: EngineState) {
        debug!("Case {}: {} -> {}", case_id, self.state, next);
        self.state = next;
    }

    /// Run and reduce one mode
    pub fn evaluate_mode(&mut self, case: &Case, runner: &ModeRunner) -> Result<ModeOutput> {
        let mode = runner.kind();
        self.transition(&case.id, EngineState::Running(mode));
        let samples =
            runner.produce_samples(&case.image.view(), &self.config.inference, &self.cancel)?;

        self.transition(&case.id, EngineState::Reducing(mode));
        ModeOutput::from_samples(mode, &samples, self.config.probability)
    }

    /// Run every mode on `case` in order
    ///
    /// An inference failure marks only that mode as failed; any other
    /// error (cancellation, coverage, configuration) aborts the case.
    pub fn evaluate_case(&mut self, case: &Case, runners: &[ModeRunner]) -> Result<Vec<ModeOutcome>> {
        self.state = EngineState::Idle;
        let mut outcomes = Vec::with_capacity(runners.len());

        for runner in runners {
            match self.evaluate_mode(case, runner) {
                Ok(output) => {
                    info!(
                        "Case {}: mode {} reduced {} sample(s)",
                        case.id, output.mode, output.maps.n_samples
                    );
                    outcomes.push(ModeOutcome::Completed(output));
                }
                Err(error @ SegmentationError::Inference { .. }) => {
                    warn!("Case {}: mode {} failed: {}", case.id, runner.kind(), error);
                    outcomes.push(ModeOutcome::Failed {
                        mode: runner.kind(),
                        error,
                    });
                }
                Err(other) => {
                    self.state = EngineState::Idle;
                    return Err(other);
                }
            }
        }

        self.transition(&case.id, EngineState::Done);
        Ok(outcomes)
    }
}
