//! Training patch collection for one cross-validation fold

use crate::config::ValidatedConfig;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, warn};
use uq_common::{Result, SegmentationError};
use uq_data::{normalise_intensity, SplitAssignment, VolumeStore};
use uq_patching::{sample_training_patches, TrainingPatch};

/// Draw `patches_per_case` training patches from every training case of
/// the run validated on `fold`
///
/// Each case gets its own generator seeded from the configured seed and
/// the case's position in the split, so results do not depend on which
/// other cases are available.
pub fn collect_training_patches(
    store: &dyn VolumeStore,
    splits: &SplitAssignment,
    fold: usize,
    config: &ValidatedConfig,
    patches_per_case: usize,
) -> Result<Vec<TrainingPatch>> {
    if fold >= splits.n_folds {
        return Err(SegmentationError::config(format!(
            "fold {fold} out of range for {} fold(s)",
            splits.n_folds
        )));
    }

    let mut patches = Vec::new();
    for (position, case_id) in splits.training_ids_excluding(fold).into_iter().enumerate() {
        let mut case = match store.get_case(case_id) {
            Ok(case) => case,
            Err(err) if err.is_recoverable() => {
                warn!("Skipping training case {}: {}", case_id, err);
                continue;
            }
            Err(err) => return Err(err),
        };
        if let Some(window) = config.intensity_window {
            case.image = normalise_intensity(&case.image, window)?;
        }

        let mut rng = StdRng::seed_from_u64(config.split.seed.wrapping_add(position as u64));
        let drawn = sample_training_patches(&case, &config.sampler, patches_per_case, &mut rng)?;
        debug!("Case {}: drew {} training patches", case_id, drawn.len());
        patches.extend(drawn);
    }
    Ok(patches)
}
