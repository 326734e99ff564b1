//! Segmentation quality and uncertainty metrics
//!
//! Metrics are named by string tokens (`dice`, `hd95`, `surface_dice_1.5`),
//! parsed once against a closed registry and then evaluated per class on a
//! mode's mean prediction.
//!
//! # Features
//! - Overlap metrics: dice, precision, recall (1.0 on empty denominators)
//! - Surface distances in physical units: hd, hd95, asd, assd, surface_dice
//! - Uncertainty summaries: mean_entropy, mean_variance, pairwise_dice,
//!   pairwise_surface_dice
//! - Sample-set and ranking scores against the label: ged, aurc, eaurc
//! - CSV output of `(case_id, mode, class_name, metric, value)` rows
//!
//! # Example
//! ```no_run
//! use uq_metrics::{evaluate_case, parse_metric_specs, MetricCsvWriter};
//!
//! # fn demo(case: &uq_common::Case, output: &uq_uncertainty::ModeOutput) -> uq_common::Result<()> {
//! let specs = parse_metric_specs(&["dice", "hd95", "surface_dice_1.5"])?;
//! let classes = vec!["background".to_string(), "liver".to_string()];
//! let rows = evaluate_case(case, output.mode, output, &specs, &classes)?;
//!
//! let mut writer = MetricCsvWriter::create("metrics.csv")?;
//! writer.write_rows(&rows)?;
//! writer.flush()?;
//! # Ok(())
//! # }
//! ```

pub mod distance;
pub mod evaluate;
pub mod registry;
pub mod risk;
pub mod writer;

pub use distance::{distance_transform, surface_voxels, SurfaceDistances};
pub use evaluate::{compute, compute_uncertainty, evaluate_case, MetricResultRow};
pub use registry::{parse_metric_spec, parse_metric_specs, MetricFamily, MetricKind, MetricSpec};
pub use risk::{risk_coverage_curve, RiskCoverageCurve};
pub use writer::{read_metric_csv, MetricCsvWriter};
