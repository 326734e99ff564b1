//! Multi-mode uncertainty evaluation for volumetric segmentation models
//!
//! Runs repeated inference passes over a whole volume through the sliding
//! window pipeline and reduces the resulting sample set into mean,
//! variance and entropy maps.
//!
//! # Features
//! - Single deterministic pass, MC dropout, test-time augmentation, ensembles
//! - Batched sliding-window inference with overlap-aware stitching
//! - Welford reduction over samples (exactly zero variance for identical samples)
//! - Sigmoid (multi-label) and softmax (categorical) entropy
//! - Cooperative cancellation between patch batches
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//! use uq_common::CancellationToken;
//! use uq_uncertainty::{EngineConfig, ModeRunner, SegmentationModel, UncertaintyEngine};
//!
//! # fn demo(model: Arc<dyn SegmentationModel>, case: &uq_common::Case) -> uq_common::Result<()> {
//! let runners = vec![
//!     ModeRunner::single(model.clone()),
//!     ModeRunner::mc_dropout(model, 10)?,
//! ];
//! let mut engine = UncertaintyEngine::new(EngineConfig::default(), CancellationToken::new());
//! for outcome in engine.evaluate_case(case, &runners)? {
//!     println!("{}: {}", outcome.mode(), outcome.is_ok());
//! }
//! # Ok(())
//! # }
//! ```

pub mod engine;
pub mod inference;
pub mod modes;
pub mod reduction;
pub mod transforms;

pub use engine::{EngineConfig, EngineState, ModeOutcome, ModeOutput, UncertaintyEngine};
pub use inference::{sliding_inference, InferenceConfig, SegmentationModel};
pub use modes::{ModeKind, ModeRunner};
pub use reduction::{binarise_samples, pairwise_dice, reduce_samples, ProbabilityKind, UncertaintyMaps};
pub use transforms::{tta_transforms, TtaTransform, MAX_TTA_TRANSFORMS};
