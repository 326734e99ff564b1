//! Volumetric segmentation with uncertainty quantification
//!
//! Facade over the workspace crates: patch extraction and stitching,
//! multi-mode uncertainty evaluation, and metric aggregation.

pub use uq_common as common;
pub use uq_data as data;
pub use uq_metrics as metrics;
pub use uq_orchestrator as orchestrator;
pub use uq_patching as patching;
pub use uq_uncertainty as uncertainty;
