//! Case storage, train/test/fold splitting and intensity preprocessing
//!
//! # Example
//! ```no_run
//! use uq_data::{assign_splits, DuplicateStrategy, SplitConfig};
//!
//! # fn main() -> uq_common::Result<()> {
//! let ids = vec!["p1".to_string(), "p2".to_string(), "p3".to_string()];
//! let config = SplitConfig {
//!     test_split: 0.2,
//!     n_folds: 2,
//!     duplicate_strategy: DuplicateStrategy::Skip,
//!     seed: 42,
//! };
//! let splits = assign_splits(&ids, &config)?;
//! println!("{} test cases", splits.test_ids().len());
//! # Ok(())
//! # }
//! ```

pub mod preprocessing;
pub mod splits;
pub mod store;

pub use preprocessing::{normalise_intensity, IntensityWindow};
pub use splits::{
    assign_splits, deduplicate, DedupedCase, DuplicateStrategy, SplitAssignment, SplitConfig,
};
pub use store::{InMemoryVolumeStore, VolumeStore};
