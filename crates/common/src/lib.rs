//! Common types and utilities for volumetric segmentation
pub mod mask;

use ndarray::{Array4, ArrayView4};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Segmentation pipeline errors
#[derive(Debug, Error)]
pub enum SegmentationError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Incomplete coverage: {uncovered} voxel(s) received no patch contribution")]
    IncompleteCoverage { uncovered: usize },

    #[error("Inference failed in mode {mode} (sample {sample}): {reason}")]
    Inference {
        mode: String,
        sample: usize,
        reason: String,
    },

    #[error("Unknown metric: {0}")]
    UnknownMetric(String),

    #[error("Case {case_id} unavailable: {reason}")]
    CaseUnavailable { case_id: String, reason: String },

    #[error("Evaluation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SegmentationError {
    pub fn config(msg: impl Into<String>) -> Self {
        SegmentationError::Configuration(msg.into())
    }

    /// Attach the evaluation mode and sample index to an inference failure
    #[must_use]
    pub fn for_pass(self, mode: &str, sample: usize) -> Self {
        match self {
            SegmentationError::Inference { reason, .. } => SegmentationError::Inference {
                mode: mode.to_string(),
                sample,
                reason,
            },
            other => other,
        }
    }

    /// Whether the batch runner may skip the affected case and continue
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, SegmentationError::CaseUnavailable { .. })
    }
}

/// Result type for segmentation operations
pub type Result<T> = std::result::Result<T, SegmentationError>;

/// Spatial extent of a volume (height, width, depth)
pub type Shape3 = [usize; 3];

/// Physical voxel size along each spatial axis
pub type VoxelSpacing = [f64; 3];

/// Spatial part of a channel-first 4D array
#[must_use]
pub fn spatial_shape<A>(volume: &ArrayView4<'_, A>) -> Shape3 {
    let dim = volume.dim();
    [dim.1, dim.2, dim.3]
}

/// Number of voxels in a spatial extent
#[must_use]
pub fn voxel_count(shape: Shape3) -> usize {
    shape.iter().product()
}

/// Partition a case belongs to after splitting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Partition {
    Test,
    Fold(usize),
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Partition::Test => write!(f, "test"),
            Partition::Fold(k) => write!(f, "fold_{k}"),
        }
    }
}

/// One subject scan with its reference segmentation
#[derive(Debug, Clone)]
pub struct Case {
    pub id: String,
    /// Channel-first image volume (channels, height, width, depth)
    pub image: Array4<f32>,
    /// Channel-first label volume, one channel per class
    pub label: Array4<f32>,
    pub spacing: Option<VoxelSpacing>,
    pub partition: Option<Partition>,
}

impl Case {
    /// Create a case, checking image and label share their spatial extent
    pub fn new(
        id: impl Into<String>,
        image: Array4<f32>,
        label: Array4<f32>,
        spacing: Option<VoxelSpacing>,
    ) -> Result<Self> {
        let id = id.into();
        let image_shape = spatial_shape(&image.view());
        let label_shape = spatial_shape(&label.view());
        if image_shape != label_shape {
            return Err(SegmentationError::config(format!(
                "case {id}: image extent {image_shape:?} differs from label extent {label_shape:?}"
            )));
        }
        if let Some(spacing) = spacing {
            if spacing.iter().any(|s| !s.is_finite() || *s <= 0.0) {
                return Err(SegmentationError::config(format!(
                    "case {id}: voxel spacing must be positive, got {spacing:?}"
                )));
            }
        }
        Ok(Self {
            id,
            image,
            label,
            spacing,
            partition: None,
        })
    }

    #[must_use]
    pub fn with_partition(mut self, partition: Partition) -> Self {
        self.partition = Some(partition);
        self
    }

    #[must_use]
    pub fn spatial_shape(&self) -> Shape3 {
        spatial_shape(&self.image.view())
    }

    #[must_use]
    pub fn n_classes(&self) -> usize {
        self.label.dim().0
    }
}

/// Cooperative cancellation flag shared between an orchestrator and workers
///
/// Workers observe it between patch batches, never mid-batch.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Return `Err(Cancelled)` once cancellation was requested
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(SegmentationError::Cancelled)
        } else {
            Ok(())
        }
    }
}
