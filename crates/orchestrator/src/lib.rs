//! Configuration surface and batch orchestration for uncertainty evaluation
//!
//! Loads an [`EvaluationConfig`] from YAML, validates it before any case is
//! touched, and drives the uncertainty and metric engines over the cases of
//! a [`uq_data::VolumeStore`].
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//! use uq_orchestrator::{BatchEvaluator, EvaluationConfig};
//!
//! # fn demo(store: &dyn uq_data::VolumeStore, model: Arc<dyn uq_uncertainty::SegmentationModel>) -> uq_common::Result<()> {
//! let config = EvaluationConfig::from_yaml_file("eval.yaml")?.validate()?;
//! let evaluator = BatchEvaluator::new(config, &[model])?;
//! let report = evaluator.run(store, &store.case_ids())?;
//! report.write_csv("metrics.csv")?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod runner;
pub mod training;

pub use config::{EvaluationConfig, ValidatedConfig};
pub use runner::{BatchEvaluator, BatchReport, FailedMode, SkippedCase};
pub use training::collect_training_patches;
