//! Volumetric patch pipeline
//!
//! Turns whole 3D volumes into patches and reassembles patch outputs into
//! whole-volume predictions.
//!
//! # Features
//! - Randomized training patches with a configurable foreground ratio
//! - Exhaustive, boundary-flush sliding-window grids for inference
//! - Zero or reflect padding for volumes smaller than the patch
//! - Flat or Gaussian-weighted overlap blending when stitching
//!
//! # Example
//! ```no_run
//! use ndarray::Array4;
//! use uq_patching::{extract_patch, sliding_window_grid, BlendingWindow, PaddingMode, Stitcher};
//!
//! # fn main() -> uq_common::Result<()> {
//! let volume = Array4::<f32>::zeros((1, 64, 64, 16));
//! let grid = sliding_window_grid([64, 64, 16], [16, 16, 8], [8, 8, 8])?;
//! let mut stitcher = Stitcher::new(1, grid.padded_shape(), BlendingWindow::Flat);
//! for patch in &grid {
//!     let input = extract_patch(&volume.view(), &patch, PaddingMode::Zero);
//!     stitcher.add(&patch, &input.view())?;
//! }
//! let reconstructed = stitcher.finalize()?;
//! # Ok(())
//! # }
//! ```

pub mod geometry;
pub mod grid;
pub mod sampler;
pub mod stitch;

pub use geometry::{crop_to_spatial, extract_patch, padded_shape, PaddingMode, PatchDescriptor};
pub use grid::{sliding_window_grid, GridIter, PatchStep, SlidingWindowGrid};
pub use sampler::{
    sample_patch, sample_training_patches, PatchSampler, SamplerConfig, TrainingPatch,
};
pub use stitch::{stitch, BlendingWindow, Stitcher};
