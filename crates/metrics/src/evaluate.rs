//! Metric computation for one case and one mode

use crate::distance::SurfaceDistances;
use crate::registry::{MetricFamily, MetricKind, MetricSpec};
use crate::risk::risk_coverage_curve;
use ndarray::{Array3, ArrayBase, ArrayView3, ArrayView4, Axis, Data, Ix4};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uq_common::mask::{probability_map, OverlapCounts, DEFAULT_THRESHOLD};
use uq_common::{Case, Result, SegmentationError, VoxelSpacing};
use uq_uncertainty::{ModeKind, ModeOutput};

/// One metric value for one (case, mode, class)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricResultRow {
    pub case_id: String,
    pub mode: String,
    pub class_name: String,
    pub metric: String,
    pub value: f64,
}

/// Binarised prediction and reference for one class, with surface
/// distances computed on first use
struct ClassMasks {
    prediction: Array3<bool>,
    reference: Array3<bool>,
    spacing: Option<VoxelSpacing>,
    distances: Option<SurfaceDistances>,
    class_index: usize,
}

impl ClassMasks {
    fn new(
        prediction: &ArrayView3<'_, f32>,
        label: &ArrayView3<'_, f32>,
        class_index: usize,
        spacing: Option<VoxelSpacing>,
    ) -> Self {
        Self {
            prediction: probability_map(prediction, DEFAULT_THRESHOLD),
            reference: probability_map(label, DEFAULT_THRESHOLD),
            spacing,
            distances: None,
            class_index,
        }
    }

    fn overlap(&self) -> OverlapCounts {
        OverlapCounts::between(&self.prediction.view(), &self.reference.view())
    }

    fn distances(&mut self, spec: &MetricSpec) -> Result<&SurfaceDistances> {
        let spacing = self.spacing.ok_or_else(|| {
            SegmentationError::config(format!(
                "metric {spec} needs voxel spacing, but none is available"
            ))
        })?;
        let (prediction, reference, class_index) = (&self.prediction, &self.reference, self.class_index);
        Ok(self.distances.get_or_insert_with(|| {
            debug!("Computing surface distances for class {}", class_index);
            SurfaceDistances::between(&prediction.view(), &reference.view(), spacing)
        }))
    }

    fn score(&mut self, spec: &MetricSpec) -> Result<f64> {
        match spec.kind {
            MetricKind::Dice => Ok(self.overlap().dice()),
            MetricKind::Precision => Ok(self.overlap().precision()),
            MetricKind::Recall => Ok(self.overlap().recall()),
            MetricKind::Hausdorff => Ok(self.distances(spec)?.hausdorff()),
            MetricKind::Hausdorff95 => Ok(self.distances(spec)?.hausdorff95()),
            MetricKind::AverageSurfaceDistance => Ok(self.distances(spec)?.average_surface_distance()),
            MetricKind::AverageSymmetricSurfaceDistance => {
                Ok(self.distances(spec)?.average_symmetric_surface_distance())
            }
            MetricKind::SurfaceDice => {
                let tolerance = spec.parameter.ok_or_else(|| {
                    SegmentationError::config("surface_dice needs a tolerance parameter")
                })?;
                Ok(self.distances(spec)?.surface_dice(tolerance))
            }
            MetricKind::MeanEntropy
            | MetricKind::MeanVariance
            | MetricKind::PairwiseDice
            | MetricKind::PairwiseSurfaceDice
            | MetricKind::GeneralisedEnergyDistance
            | MetricKind::Aurc
            | MetricKind::Eaurc => Err(SegmentationError::config(format!(
                "metric {spec} is computed from a mode's uncertainty maps"
            ))),
        }
    }
}

fn class_channel<'a, S: Data<Elem = f32>>(
    volume: &'a ArrayBase<S, Ix4>,
    class_index: usize,
    what: &str,
) -> Result<ArrayView3<'a, f32>> {
    if class_index >= volume.dim().0 {
        return Err(SegmentationError::config(format!(
            "class index {class_index} out of range for {what} with {} channel(s)",
            volume.dim().0
        )));
    }
    Ok(volume.index_axis(Axis(0), class_index))
}

/// Compute one overlap or distance metric for one class
///
/// The prediction is binarised at 0.5. Distance metrics need `spacing`.
pub fn compute(
    spec: &MetricSpec,
    prediction: &ArrayView4<'_, f32>,
    label: &ArrayView4<'_, f32>,
    class_index: usize,
    spacing: Option<VoxelSpacing>,
) -> Result<f64> {
    if prediction.dim() != label.dim() {
        return Err(SegmentationError::config(format!(
            "prediction shape {:?} differs from label shape {:?}",
            prediction.dim(),
            label.dim()
        )));
    }
    let predicted = class_channel(prediction, class_index, "prediction")?;
    let reference = class_channel(label, class_index, "label")?;
    ClassMasks::new(&predicted, &reference, class_index, spacing).score(spec)
}

fn sample_class_masks<'a>(output: &'a ModeOutput, class_index: usize) -> Result<Vec<ArrayView3<'a, bool>>> {
    if output.sample_masks.is_empty() {
        return Err(SegmentationError::config(format!(
            "mode {} kept no sample masks",
            output.mode
        )));
    }
    output
        .sample_masks
        .iter()
        .map(|mask| {
            if class_index >= mask.dim().0 {
                return Err(SegmentationError::config(format!(
                    "class index {class_index} out of range for sample masks with {} channel(s)",
                    mask.dim().0
                )));
            }
            Ok(mask.index_axis(Axis(0), class_index))
        })
        .collect()
}

fn dice_distance(a: &ArrayView3<'_, bool>, b: &ArrayView3<'_, bool>) -> f64 {
    1.0 - OverlapCounts::between(a, b).dice()
}

/// Squared generalised energy distance with `1 - dice` as the distance
///
/// `2 E[d(S, Y)] - E[d(S, S')]`, where the sample expectation runs over
/// all ordered pairs, self-pairs included. A single reference makes the
/// `E[d(Y, Y')]` term vanish.
fn generalised_energy_distance(samples: &[ArrayView3<'_, bool>], reference: &ArrayView3<'_, bool>) -> f64 {
    let n = samples.len() as f64;
    let to_reference: f64 = samples.iter().map(|s| dice_distance(s, reference)).sum::<f64>() / n;
    let mut between = 0.0;
    for i in 0..samples.len() {
        for j in i + 1..samples.len() {
            between += 2.0 * dice_distance(&samples[i], &samples[j]);
        }
    }
    2.0 * to_reference - between / (n * n)
}

/// Mean surface dice over all sample pairs, 1.0 for a single sample
fn pairwise_surface_dice(samples: &[ArrayView3<'_, bool>], spacing: VoxelSpacing, tolerance: f64) -> f64 {
    let mut total = 0.0;
    let mut pairs = 0usize;
    for i in 0..samples.len() {
        for j in i + 1..samples.len() {
            total += SurfaceDistances::between(&samples[i], &samples[j], spacing).surface_dice(tolerance);
            pairs += 1;
        }
    }
    if pairs == 0 {
        1.0
    } else {
        total / pairs as f64
    }
}

/// Compute an uncertainty metric for one class of a mode's output
///
/// `ged`, `aurc` and `eaurc` compare against `label`; `pairwise_surface_dice`
/// needs `spacing`. The other summaries read only the mode's maps.
pub fn compute_uncertainty(
    spec: &MetricSpec,
    output: &ModeOutput,
    label: &ArrayView4<'_, f32>,
    class_index: usize,
    spacing: Option<VoxelSpacing>,
) -> Result<f64> {
    let maps = &output.maps;
    // Softmax entropy has a single channel shared by all classes
    let entropy_channel = class_index.min(maps.entropy.dim().0.saturating_sub(1));
    match spec.kind {
        MetricKind::MeanEntropy => {
            let entropy = class_channel(&maps.entropy, entropy_channel, "entropy")?;
            Ok(entropy.mean().map_or(0.0, f64::from))
        }
        MetricKind::MeanVariance => {
            let variance = class_channel(&maps.variance, class_index, "variance")?;
            Ok(variance.mean().map_or(0.0, f64::from))
        }
        MetricKind::PairwiseDice => output
            .pairwise_dice
            .get(class_index)
            .copied()
            .ok_or_else(|| SegmentationError::config(format!("no pairwise dice for class {class_index}"))),
        MetricKind::PairwiseSurfaceDice => {
            let tolerance = spec.parameter.ok_or_else(|| {
                SegmentationError::config("pairwise_surface_dice needs a tolerance parameter")
            })?;
            let spacing = spacing.ok_or_else(|| {
                SegmentationError::config(format!("metric {spec} needs voxel spacing, but none is available"))
            })?;
            let samples = sample_class_masks(output, class_index)?;
            Ok(pairwise_surface_dice(&samples, spacing, tolerance))
        }
        MetricKind::GeneralisedEnergyDistance => {
            let reference = probability_map(&class_channel(label, class_index, "label")?, DEFAULT_THRESHOLD);
            let samples = sample_class_masks(output, class_index)?;
            if samples.iter().any(|s| s.dim() != reference.dim()) {
                return Err(SegmentationError::config(format!(
                    "sample mask extent differs from label extent {:?}",
                    reference.dim()
                )));
            }
            Ok(generalised_energy_distance(&samples, &reference.view()))
        }
        MetricKind::Aurc | MetricKind::Eaurc => {
            let mean = class_channel(&maps.mean, class_index, "prediction")?;
            let reference = class_channel(label, class_index, "label")?;
            let entropy = class_channel(&maps.entropy, entropy_channel, "entropy")?;
            if mean.dim() != reference.dim() {
                return Err(SegmentationError::config(format!(
                    "prediction extent {:?} differs from label extent {:?}",
                    mean.dim(),
                    reference.dim()
                )));
            }
            let errors: Vec<bool> = mean
                .iter()
                .zip(reference.iter())
                .map(|(&p, &r)| (p > DEFAULT_THRESHOLD) != (r > DEFAULT_THRESHOLD))
                .collect();
            let uncertainty: Vec<f32> = entropy.iter().copied().collect();
            let curve = risk_coverage_curve(&uncertainty, &errors)?;
            Ok(if spec.kind == MetricKind::Aurc {
                curve.aurc()
            } else {
                curve.eaurc()
            })
        }
        _ => Err(SegmentationError::config(format!(
            "metric {spec} is not an uncertainty summary"
        ))),
    }
}

/// Evaluate every metric for every class of one mode's output on `case`
///
/// Rows are ordered by class, then by metric in `specs` order. Classes are
/// evaluated in parallel.
pub fn evaluate_case(
    case: &Case,
    mode: ModeKind,
    output: &ModeOutput,
    specs: &[MetricSpec],
    class_names: &[String],
) -> Result<Vec<MetricResultRow>> {
    let n_classes = output.n_classes();
    if n_classes != class_names.len() || case.n_classes() != class_names.len() {
        return Err(SegmentationError::config(format!(
            "case {}: model produced {} class channel(s), label has {}, but {} class name(s) are configured",
            case.id,
            n_classes,
            case.n_classes(),
            class_names.len()
        )));
    }

    let mean = output.maps.mean.view();
    let label = case.label.view();
    if mean.dim() != label.dim() {
        return Err(SegmentationError::config(format!(
            "case {}: prediction shape {:?} differs from label shape {:?}",
            case.id,
            mean.dim(),
            label.dim()
        )));
    }

    let per_class: Vec<Vec<MetricResultRow>> = class_names
        .par_iter()
        .enumerate()
        .map(|(class_index, class_name)| {
            let predicted = mean.index_axis(Axis(0), class_index);
            let reference = label.index_axis(Axis(0), class_index);
            let mut masks = ClassMasks::new(&predicted, &reference, class_index, case.spacing);

            specs
                .iter()
                .map(|spec| {
                    let value = match spec.kind.family() {
                        MetricFamily::Uncertainty => {
                            compute_uncertainty(spec, output, &label, class_index, case.spacing)?
                        }
                        MetricFamily::Overlap | MetricFamily::Distance => masks.score(spec)?,
                    };
                    Ok(MetricResultRow {
                        case_id: case.id.clone(),
                        mode: mode.to_string(),
                        class_name: class_name.clone(),
                        metric: spec.to_string(),
                        value,
                    })
                })
                .collect::<Result<Vec<_>>>()
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(per_class.into_iter().flatten().collect())
}
