//! Split command - assign case identifiers to test and fold partitions

use anyhow::{Context as _, Result};
use clap::Args;
use std::path::{Path, PathBuf};
use tracing::info;
use uq_data::assign_splits;
use uq_orchestrator::EvaluationConfig;

#[derive(Args)]
pub struct SplitCommand {
    /// Text file with one case identifier per line
    #[arg(value_name = "IDS")]
    ids: PathBuf,

    /// Evaluation config (YAML); defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Where to write the JSON split manifest
    #[arg(short, long, default_value = "splits.json")]
    output: PathBuf,

    /// Override the configured seed
    #[arg(long)]
    seed: Option<u64>,
}

pub(crate) fn read_case_ids(path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read case ids from {}", path.display()))?;
    Ok(text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

impl SplitCommand {
    pub fn execute(self) -> Result<()> {
        let mut config = match &self.config {
            Some(path) => EvaluationConfig::from_yaml_file(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => EvaluationConfig::default(),
        };
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        let validated = config.validate().context("Invalid evaluation config")?;

        let ids = read_case_ids(&self.ids)?;
        info!("Read {} case identifiers", ids.len());

        let splits = assign_splits(&ids, &validated.split)?;
        splits
            .save_json(&self.output)
            .with_context(|| format!("Failed to write {}", self.output.display()))?;

        info!(
            "Wrote {} cases ({} test, folds {:?}) to {}",
            splits.len(),
            splits.test_ids().len(),
            splits.fold_sizes(),
            self.output.display()
        );
        Ok(())
    }
}
