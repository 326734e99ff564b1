//! Read-only access to pre-staged cases

use crate::splits::SplitAssignment;
use std::collections::HashMap;
use tracing::debug;
use uq_common::{Case, Result, SegmentationError, VoxelSpacing};

/// Source of cases keyed by identifier
///
/// Implementations must be shareable across evaluation workers.
pub trait VolumeStore: Send + Sync {
    /// Identifiers of every case the store can serve
    fn case_ids(&self) -> Vec<String>;

    /// Load one case; unreadable data is reported as `CaseUnavailable`
    fn get_case(&self, case_id: &str) -> Result<Case>;

    /// Voxel spacing of one case
    ///
    /// The default loads the whole case; stores with cheap metadata access
    /// should override it.
    fn spacing(&self, case_id: &str) -> Result<Option<VoxelSpacing>> {
        Ok(self.get_case(case_id)?.spacing)
    }
}

/// Store holding fully loaded cases in memory
#[derive(Debug, Default)]
pub struct InMemoryVolumeStore {
    order: Vec<String>,
    cases: HashMap<String, Case>,
}

impl InMemoryVolumeStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a case, replacing any earlier case with the same identifier
    pub fn insert(&mut self, case: Case) {
        if !self.cases.contains_key(&case.id) {
            self.order.push(case.id.clone());
        }
        self.cases.insert(case.id.clone(), case);
    }

    /// Attach partitions from a split assignment to the stored cases
    pub fn apply_splits(&mut self, splits: &SplitAssignment) {
        for entry in &splits.entries {
            if let Some(case) = self.cases.get_mut(&entry.case_id) {
                case.partition = Some(entry.partition);
            } else {
                debug!("Split entry '{}' has no stored case", entry.case_id);
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cases.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }
}

impl FromIterator<Case> for InMemoryVolumeStore {
    fn from_iter<I: IntoIterator<Item = Case>>(iter: I) -> Self {
        let mut store = Self::new();
        for case in iter {
            store.insert(case);
        }
        store
    }
}

impl VolumeStore for InMemoryVolumeStore {
    fn case_ids(&self) -> Vec<String> {
        self.order.clone()
    }

    fn get_case(&self, case_id: &str) -> Result<Case> {
        self.cases
            .get(case_id)
            .cloned()
            .ok_or_else(|| SegmentationError::CaseUnavailable {
                case_id: case_id.to_string(),
                reason: "not present in store".to_string(),
            })
    }

    fn spacing(&self, case_id: &str) -> Result<Option<VoxelSpacing>> {
        self.cases
            .get(case_id)
            .map(|case| case.spacing)
            .ok_or_else(|| SegmentationError::CaseUnavailable {
                case_id: case_id.to_string(),
                reason: "not present in store".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::splits::{assign_splits, DuplicateStrategy, SplitConfig};
    use ndarray::Array4;
    use uq_common::Partition;

    fn case(id: &str) -> Case {
        Case::new(
            id,
            Array4::zeros((1, 2, 2, 2)),
            Array4::zeros((1, 2, 2, 2)),
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_store_preserves_insertion_order() {
        let store: InMemoryVolumeStore = ["b", "a", "c"].iter().map(|id| case(id)).collect();
        assert_eq!(store.case_ids(), vec!["b", "a", "c"]);
        assert_eq!(store.get_case("a").unwrap().id, "a");
    }

    #[test]
    fn test_missing_case_is_recoverable() {
        let store = InMemoryVolumeStore::new();
        let err = store.get_case("ghost").unwrap_err();
        assert!(err.is_recoverable());
        assert!(store.spacing("ghost").unwrap_err().is_recoverable());
    }

    #[test]
    fn test_spacing_lookup() {
        let mut store: InMemoryVolumeStore = std::iter::once(case("bare")).collect();
        let spaced = Case::new(
            "spaced",
            Array4::zeros((1, 2, 2, 2)),
            Array4::zeros((1, 2, 2, 2)),
            Some([0.8, 0.8, 2.5]),
        )
        .unwrap();
        store.insert(spaced);
        assert_eq!(store.spacing("bare").unwrap(), None);
        assert_eq!(store.spacing("spaced").unwrap(), Some([0.8, 0.8, 2.5]));
    }

    #[test]
    fn test_apply_splits() {
        let mut store: InMemoryVolumeStore = ["p0", "p1", "p2", "p3"].iter().map(|id| case(id)).collect();
        let config = SplitConfig {
            test_split: 0.25,
            n_folds: 3,
            duplicate_strategy: DuplicateStrategy::Skip,
            seed: 1,
        };
        let splits = assign_splits(&store.case_ids(), &config).unwrap();
        store.apply_splits(&splits);

        let tests: Vec<_> = store
            .case_ids()
            .into_iter()
            .filter(|id| store.get_case(id).unwrap().partition == Some(Partition::Test))
            .collect();
        assert_eq!(tests.len(), 1);
        assert_eq!(tests[0], splits.test_ids()[0]);
    }
}
