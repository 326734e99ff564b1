//! Batch evaluation of many cases across every configured mode

use crate::config::ValidatedConfig;
use rayon::prelude::*;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use uq_common::{CancellationToken, Case, Partition, Result, SegmentationError};
use uq_data::{normalise_intensity, SplitAssignment, VolumeStore};
use uq_metrics::{evaluate_case, MetricCsvWriter, MetricResultRow};
use uq_uncertainty::{ModeOutcome, ModeRunner, SegmentationModel, UncertaintyEngine};

/// A case left out of the batch because it could not be loaded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedCase {
    pub case_id: String,
    pub reason: String,
}

/// A mode whose inference failed on one case
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedMode {
    pub case_id: String,
    pub mode: String,
    pub reason: String,
}

/// Everything a batch run produced
#[derive(Debug, Default)]
pub struct BatchReport {
    pub rows: Vec<MetricResultRow>,
    pub skipped: Vec<SkippedCase>,
    pub failed: Vec<FailedMode>,
    pub evaluated_cases: usize,
}

impl BatchReport {
    /// Write every metric row to a CSV file
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut writer = MetricCsvWriter::create(path)?;
        writer.write_rows(&self.rows)?;
        writer.flush()
    }

    fn absorb(&mut self, case: CaseReport) {
        match case {
            CaseReport::Skipped(skipped) => self.skipped.push(skipped),
            CaseReport::Evaluated { rows, failed } => {
                self.evaluated_cases += 1;
                self.rows.extend(rows);
                self.failed.extend(failed);
            }
        }
    }
}

enum CaseReport {
    Skipped(SkippedCase),
    Evaluated {
        rows: Vec<MetricResultRow>,
        failed: Vec<FailedMode>,
    },
}

/// Runs the uncertainty engine and metric engine over cases of a store
///
/// Cases are evaluated in parallel on the current rayon pool; modes of one
/// case run in sequence.
pub struct BatchEvaluator {
    config: ValidatedConfig,
    runners: Vec<ModeRunner>,
    cancel: CancellationToken,
}

impl BatchEvaluator {
    /// Build one runner per configured mode
    ///
    /// Single, MC dropout and TTA use the first model; ensembles use up to
    /// `n_outputs` of them.
    pub fn new(config: ValidatedConfig, models: &[Arc<dyn SegmentationModel>]) -> Result<Self> {
        let runners = config
            .modes
            .iter()
            .map(|&mode| ModeRunner::build(mode, models, config.n_outputs))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            config,
            runners,
            cancel: CancellationToken::new(),
        })
    }

    /// Share an externally controlled cancellation token
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    #[must_use]
    pub fn config(&self) -> &ValidatedConfig {
        &self.config
    }

    /// Evaluate the listed cases
    ///
    /// Unavailable cases are skipped with a warning and failed modes are
    /// recorded; any other error stops the batch.
    pub fn run(&self, store: &dyn VolumeStore, case_ids: &[String]) -> Result<BatchReport> {
        info!(
            "Evaluating {} case(s) with modes [{}]",
            case_ids.len(),
            self.runners
                .iter()
                .map(|r| r.kind().as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        self.check_spacing(store, case_ids)?;

        let reports = case_ids
            .par_iter()
            .map(|case_id| self.run_case(store, case_id))
            .collect::<Result<Vec<_>>>()?;

        let mut report = BatchReport::default();
        for case in reports {
            report.absorb(case);
        }
        info!(
            "Batch finished: {} evaluated, {} skipped, {} failed mode(s), {} metric row(s)",
            report.evaluated_cases,
            report.skipped.len(),
            report.failed.len(),
            report.rows.len()
        );
        Ok(report)
    }

    /// Evaluate every case of one partition of a split assignment
    pub fn run_partition(
        &self,
        store: &dyn VolumeStore,
        splits: &SplitAssignment,
        partition: Partition,
    ) -> Result<BatchReport> {
        let ids: Vec<String> = splits
            .entries
            .iter()
            .filter(|entry| entry.partition == partition)
            .map(|entry| entry.case_id.clone())
            .collect();
        info!("Partition {}: {} case(s)", partition, ids.len());
        self.run(store, &ids)
    }

    /// Fail before any case runs when distance metrics meet a case
    /// without voxel spacing
    fn check_spacing(&self, store: &dyn VolumeStore, case_ids: &[String]) -> Result<()> {
        if !self.config.needs_spacing() {
            return Ok(());
        }
        for case_id in case_ids {
            match store.spacing(case_id) {
                Ok(Some(_)) => {}
                Ok(None) => {
                    return Err(SegmentationError::config(format!(
                        "case {case_id}: distance metrics are configured but the case has no voxel spacing"
                    )));
                }
                // Reported as a skipped case when the batch reaches it
                Err(err) if err.is_recoverable() => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn run_case(&self, store: &dyn VolumeStore, case_id: &str) -> Result<CaseReport> {
        self.cancel.check()?;

        let case = match store.get_case(case_id) {
            Ok(case) => case,
            Err(SegmentationError::CaseUnavailable { case_id, reason }) => {
                warn!("Skipping case {}: {}", case_id, reason);
                return Ok(CaseReport::Skipped(SkippedCase { case_id, reason }));
            }
            Err(other) => return Err(other),
        };
        let case = self.prepare(case)?;
        if self.config.needs_spacing() && case.spacing.is_none() {
            return Err(SegmentationError::config(format!(
                "case {}: distance metrics are configured but the case has no voxel spacing",
                case.id
            )));
        }

        let mut engine = UncertaintyEngine::new(self.config.engine.clone(), self.cancel.clone());
        let outcomes = engine.evaluate_case(&case, &self.runners)?;

        let mut rows = Vec::new();
        let mut failed = Vec::new();
        for outcome in outcomes {
            match outcome {
                ModeOutcome::Completed(output) => rows.extend(evaluate_case(
                    &case,
                    output.mode,
                    &output,
                    &self.config.metrics,
                    &self.config.class_names,
                )?),
                ModeOutcome::Failed { mode, error } => failed.push(FailedMode {
                    case_id: case.id.clone(),
                    mode: mode.to_string(),
                    reason: error.to_string(),
                }),
            }
        }
        Ok(CaseReport::Evaluated { rows, failed })
    }

    fn prepare(&self, mut case: Case) -> Result<Case> {
        if let Some(window) = self.config.intensity_window {
            case.image = normalise_intensity(&case.image, window)?;
        }
        Ok(case)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvaluationConfig;
    use ndarray::{s, Array4, Array5, ArrayView5};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uq_data::InMemoryVolumeStore;

    /// Predicts the first input channel as foreground, its complement as background
    struct ThresholdModel;

    impl SegmentationModel for ThresholdModel {
        fn forward(&self, patches: ArrayView5<'_, f32>, _stochastic: bool) -> anyhow::Result<Array5<f32>> {
            let (n, _, h, w, d) = patches.dim();
            let mut out = Array5::zeros((n, 2, h, w, d));
            let fg = patches.slice(s![.., 0, .., .., ..]);
            out.slice_mut(s![.., 1, .., .., ..]).assign(&fg);
            out.slice_mut(s![.., 0, .., .., ..]).assign(&fg.mapv(|v| 1.0 - v));
            Ok(out)
        }
    }

    struct UnreliableModel;

    impl SegmentationModel for UnreliableModel {
        fn forward(&self, _patches: ArrayView5<'_, f32>, stochastic: bool) -> anyhow::Result<Array5<f32>> {
            anyhow::bail!("dropout kernel crashed (stochastic = {stochastic})")
        }
    }

    fn make_case(id: &str) -> Case {
        let mut label = Array4::<f32>::zeros((2, 16, 16, 8));
        label.slice_mut(s![1, 4..10, 4..10, 2..6]).fill(1.0);
        let background = label.slice(s![1, .., .., ..]).mapv(|v| 1.0 - v);
        label.slice_mut(s![0, .., .., ..]).assign(&background);
        let image = label.slice(s![1..2, .., .., ..]).to_owned();
        Case::new(id, image, label, Some([1.0, 1.0, 2.0])).unwrap()
    }

    fn config(modes: &[&str]) -> ValidatedConfig {
        EvaluationConfig {
            patch_size: [8, 8, 4],
            patch_step: uq_patching::PatchStep::Uniform(4),
            modes: modes.iter().map(|m| m.to_string()).collect(),
            n_outputs: 3,
            metrics: vec!["dice".into(), "hd95".into(), "mean_variance".into()],
            class_names: vec!["background".into(), "lesion".into()],
            batch_size: 4,
            ..EvaluationConfig::default()
        }
        .validate()
        .unwrap()
    }

    fn store(ids: &[&str]) -> InMemoryVolumeStore {
        ids.iter().map(|id| make_case(id)).collect()
    }

    #[test]
    fn test_batch_rows_for_every_case_mode_class_metric() {
        let models: Vec<Arc<dyn SegmentationModel>> = vec![Arc::new(ThresholdModel)];
        let evaluator = BatchEvaluator::new(config(&["single", "tta"]), &models).unwrap();
        let ids = vec!["a".to_string(), "b".to_string()];
        let report = evaluator.run(&store(&["a", "b"]), &ids).unwrap();

        assert_eq!(report.evaluated_cases, 2);
        assert_eq!(report.rows.len(), 2 * 2 * 2 * 3);
        assert!(report.failed.is_empty());
        assert_eq!(report.rows[0].case_id, "a");
        for row in &report.rows {
            let expected = if row.metric == "dice" { 1.0 } else { 0.0 };
            assert!((row.value - expected).abs() < 1e-9, "{row:?}");
        }
    }

    #[test]
    fn test_missing_case_is_skipped() {
        let models: Vec<Arc<dyn SegmentationModel>> = vec![Arc::new(ThresholdModel)];
        let evaluator = BatchEvaluator::new(config(&["single"]), &models).unwrap();
        let ids = vec!["a".to_string(), "ghost".to_string()];
        let report = evaluator.run(&store(&["a"]), &ids).unwrap();
        assert_eq!(report.evaluated_cases, 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].case_id, "ghost");
    }

    #[test]
    fn test_failed_mode_does_not_stop_siblings() {
        let models: Vec<Arc<dyn SegmentationModel>> =
            vec![Arc::new(UnreliableModel), Arc::new(ThresholdModel)];
        // single/mcdo use the first model, ensemble uses both and fails as a whole
        let evaluator = BatchEvaluator::new(config(&["mcdo", "ensemble"]), &models).unwrap();
        let ids = vec!["a".to_string()];
        let report = evaluator.run(&store(&["a"]), &ids).unwrap();
        assert_eq!(report.failed.len(), 2);
        assert!(report.rows.is_empty());
        assert_eq!(report.failed[0].mode, "mcdo");
        assert!(report.failed[0].reason.contains("dropout kernel crashed"));

        let healthy: Vec<Arc<dyn SegmentationModel>> =
            vec![Arc::new(ThresholdModel), Arc::new(UnreliableModel)];
        let evaluator = BatchEvaluator::new(config(&["mcdo", "ensemble"]), &healthy).unwrap();
        let report = evaluator.run(&store(&["a"]), &ids).unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].mode, "ensemble");
        assert_eq!(report.rows.len(), 2 * 3);
    }

    /// Counts forward calls before delegating to [`ThresholdModel`]
    struct CountingModel(AtomicUsize);

    impl SegmentationModel for CountingModel {
        fn forward(&self, patches: ArrayView5<'_, f32>, stochastic: bool) -> anyhow::Result<Array5<f32>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            ThresholdModel.forward(patches, stochastic)
        }
    }

    #[test]
    fn test_missing_spacing_rejected_before_any_case_runs() {
        let model = Arc::new(CountingModel(AtomicUsize::new(0)));
        let models: Vec<Arc<dyn SegmentationModel>> = vec![model.clone()];
        let evaluator = BatchEvaluator::new(config(&["single"]), &models).unwrap();

        let bare = make_case("bare");
        let bare = Case::new("bare", bare.image, bare.label, None).unwrap();
        let store: InMemoryVolumeStore = [make_case("a"), make_case("b"), bare].into_iter().collect();
        let ids = vec!["a".to_string(), "b".to_string(), "ghost".to_string(), "bare".to_string()];

        let result = evaluator.run(&store, &ids);
        assert!(matches!(result, Err(SegmentationError::Configuration(_))));
        assert_eq!(model.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cancelled_batch_returns_cancelled() {
        let models: Vec<Arc<dyn SegmentationModel>> = vec![Arc::new(ThresholdModel)];
        let evaluator = BatchEvaluator::new(config(&["single"]), &models).unwrap();
        evaluator.cancellation_token().cancel();
        let ids = vec!["a".to_string()];
        let result = evaluator.run(&store(&["a"]), &ids);
        assert!(matches!(result, Err(SegmentationError::Cancelled)));
    }

    #[test]
    fn test_report_csv_output() {
        let models: Vec<Arc<dyn SegmentationModel>> = vec![Arc::new(ThresholdModel)];
        let evaluator = BatchEvaluator::new(config(&["single"]), &models).unwrap();
        let ids = vec!["a".to_string()];
        let report = evaluator.run(&store(&["a"]), &ids).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.csv");
        report.write_csv(&path).unwrap();
        let rows = uq_metrics::read_metric_csv(&path).unwrap();
        assert_eq!(rows, report.rows);
    }
}
