//! Deterministic train/test and cross-validation fold assignment

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};
use uq_common::{Partition, Result, SegmentationError};

/// How repeated case identifiers are resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateStrategy {
    /// Keep the first occurrence, drop later ones
    Skip,
    /// Later occurrences replace the earlier entry
    Overwrite,
    /// Suffix later occurrences so every entry survives
    Rename,
}

impl FromStr for DuplicateStrategy {
    type Err = SegmentationError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "skip" => Ok(DuplicateStrategy::Skip),
            "overwrite" => Ok(DuplicateStrategy::Overwrite),
            "rename" => Ok(DuplicateStrategy::Rename),
            other => Err(SegmentationError::config(format!(
                "unknown duplicate_name_strategy '{other}' (expected skip, overwrite or rename)"
            ))),
        }
    }
}

impl fmt::Display for DuplicateStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DuplicateStrategy::Skip => "skip",
            DuplicateStrategy::Overwrite => "overwrite",
            DuplicateStrategy::Rename => "rename",
        };
        f.write_str(name)
    }
}

/// Split configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitConfig {
    /// Target fraction of cases held out for testing, in [0, 1)
    pub test_split: f64,
    /// Number of cross-validation folds (>= 1)
    pub n_folds: usize,
    pub duplicate_strategy: DuplicateStrategy,
    pub seed: u64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            test_split: 0.2,
            n_folds: 5,
            duplicate_strategy: DuplicateStrategy::Skip,
            seed: 42,
        }
    }
}

impl SplitConfig {
    pub fn validate(&self) -> Result<()> {
        if self.n_folds < 1 {
            return Err(SegmentationError::config("n_folds must be at least 1"));
        }
        if !(0.0..1.0).contains(&self.test_split) {
            return Err(SegmentationError::config(format!(
                "test_split must lie in [0, 1), got {}",
                self.test_split
            )));
        }
        Ok(())
    }
}

/// A case identifier that survived deduplication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupedCase {
    pub id: String,
    /// Index into the original identifier list whose data backs this case
    pub source_index: usize,
}

/// Resolve repeated identifiers according to `strategy`
///
/// Survivors keep the position of the first occurrence of their identifier.
#[must_use]
pub fn deduplicate(case_ids: &[String], strategy: DuplicateStrategy) -> Vec<DedupedCase> {
    let mut survivors: Vec<DedupedCase> = Vec::with_capacity(case_ids.len());
    let mut position: HashMap<&str, usize> = HashMap::with_capacity(case_ids.len());

    match strategy {
        DuplicateStrategy::Skip | DuplicateStrategy::Overwrite => {
            for (index, id) in case_ids.iter().enumerate() {
                match position.get(id.as_str()) {
                    Some(&slot) => {
                        if strategy == DuplicateStrategy::Overwrite {
                            debug!("Duplicate case '{}' overwrites entry {}", id, slot);
                            survivors[slot].source_index = index;
                        } else {
                            debug!("Skipping duplicate case '{}' at index {}", id, index);
                        }
                    }
                    None => {
                        position.insert(id.as_str(), survivors.len());
                        survivors.push(DedupedCase {
                            id: id.clone(),
                            source_index: index,
                        });
                    }
                }
            }
        }
        DuplicateStrategy::Rename => {
            let mut taken: HashSet<String> = case_ids.iter().cloned().collect();
            let mut seen: HashSet<&str> = HashSet::with_capacity(case_ids.len());
            for (index, id) in case_ids.iter().enumerate() {
                let name = if seen.insert(id.as_str()) {
                    id.clone()
                } else {
                    let mut suffix = 1;
                    loop {
                        let candidate = format!("{id}_{suffix}");
                        if !taken.contains(&candidate) {
                            break candidate;
                        }
                        suffix += 1;
                    }
                };
                if name != *id {
                    debug!("Renaming duplicate case '{}' to '{}'", id, name);
                }
                taken.insert(name.clone());
                survivors.push(DedupedCase {
                    id: name,
                    source_index: index,
                });
            }
        }
    }

    survivors
}

/// One row of a split manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitEntry {
    pub case_id: String,
    pub source_index: usize,
    pub partition: Partition,
}

/// Case identifier to partition mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SplitAssignment {
    pub n_folds: usize,
    pub entries: Vec<SplitEntry>,
}

impl SplitAssignment {
    #[must_use]
    pub fn partition(&self, case_id: &str) -> Option<Partition> {
        self.entries
            .iter()
            .find(|e| e.case_id == case_id)
            .map(|e| e.partition)
    }

    fn ids_where(&self, pred: impl Fn(Partition) -> bool) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| pred(e.partition))
            .map(|e| e.case_id.as_str())
            .collect()
    }

    #[must_use]
    pub fn test_ids(&self) -> Vec<&str> {
        self.ids_where(|p| p == Partition::Test)
    }

    #[must_use]
    pub fn fold_ids(&self, fold: usize) -> Vec<&str> {
        self.ids_where(|p| p == Partition::Fold(fold))
    }

    /// Training cases for the cross-validation run validated on `fold`
    #[must_use]
    pub fn training_ids_excluding(&self, fold: usize) -> Vec<&str> {
        self.ids_where(|p| matches!(p, Partition::Fold(k) if k != fold))
    }

    #[must_use]
    pub fn fold_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0; self.n_folds];
        for entry in &self.entries {
            if let Partition::Fold(k) = entry.partition {
                sizes[k] += 1;
            }
        }
        sizes
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write the assignment as a JSON manifest
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Read a manifest, rejecting fold indices outside `0..n_folds`
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let reader = BufReader::new(File::open(path.as_ref())?);
        let assignment: Self = serde_json::from_reader(reader)?;
        assignment.validate()?;
        Ok(assignment)
    }

    /// Check the fold count and every entry's fold index
    pub fn validate(&self) -> Result<()> {
        if self.n_folds < 1 {
            return Err(SegmentationError::config("split manifest needs n_folds >= 1"));
        }
        for entry in &self.entries {
            if let Partition::Fold(k) = entry.partition {
                if k >= self.n_folds {
                    return Err(SegmentationError::config(format!(
                        "case {} is assigned to fold {} but the manifest has {} fold(s)",
                        entry.case_id, k, self.n_folds
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Partition case identifiers into a test set and `n_folds` folds
///
/// The same identifiers, configuration and seed always produce the same
/// assignment.
pub fn assign_splits(case_ids: &[String], config: &SplitConfig) -> Result<SplitAssignment> {
    config.validate()?;

    let survivors = deduplicate(case_ids, config.duplicate_strategy);
    if survivors.len() != case_ids.len() {
        info!(
            "Deduplication ({}) kept {} of {} cases",
            config.duplicate_strategy,
            survivors.len(),
            case_ids.len()
        );
    }

    let mut order: Vec<usize> = (0..survivors.len()).collect();
    let mut rng = StdRng::seed_from_u64(config.seed);
    order.shuffle(&mut rng);

    let n_test = ((config.test_split * survivors.len() as f64).round() as usize).min(survivors.len());
    if n_test == survivors.len() && !survivors.is_empty() {
        warn!(
            "test_split {} leaves no training cases out of {}",
            config.test_split,
            survivors.len()
        );
    }

    let mut partitions = vec![Partition::Test; survivors.len()];
    for (rank, &slot) in order.iter().enumerate().skip(n_test) {
        partitions[slot] = Partition::Fold((rank - n_test) % config.n_folds);
    }

    let entries: Vec<SplitEntry> = survivors
        .into_iter()
        .zip(partitions)
        .map(|(case, partition)| SplitEntry {
            case_id: case.id,
            source_index: case.source_index,
            partition,
        })
        .collect();

    let assignment = SplitAssignment {
        n_folds: config.n_folds,
        entries,
    };
    info!(
        "Assigned {} test cases and fold sizes {:?}",
        n_test,
        assignment.fold_sizes()
    );
    Ok(assignment)
}
