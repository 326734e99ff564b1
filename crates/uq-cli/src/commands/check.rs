//! Check-config command - load and validate an evaluation config

use anyhow::{Context as _, Result};
use clap::Args;
use std::path::PathBuf;
use tracing::debug;
use uq_orchestrator::EvaluationConfig;

#[derive(Args)]
pub struct CheckConfigCommand {
    /// Evaluation config (YAML)
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Print the config with every default filled in
    #[arg(long)]
    resolved: bool,
}

impl CheckConfigCommand {
    pub fn execute(self) -> Result<()> {
        let config = EvaluationConfig::from_yaml_file(&self.config)
            .with_context(|| format!("Failed to load config {}", self.config.display()))?;
        let validated = config
            .validate()
            .with_context(|| format!("{} is not a valid evaluation config", self.config.display()))?;
        debug!("Validated config: {validated:?}");

        let modes: Vec<String> = validated.modes.iter().map(ToString::to_string).collect();
        let metrics: Vec<String> = validated.metrics.iter().map(ToString::to_string).collect();
        println!("{}: ok", self.config.display());
        println!("  modes:     {} (n_outputs {})", modes.join(", "), validated.n_outputs);
        println!("  metrics:   {}", metrics.join(", "));
        println!("  classes:   {}", validated.class_names.join(", "));
        println!(
            "  patch:     {:?} step {:?}",
            validated.engine.inference.patch_size,
            validated.engine.inference.step.per_axis()
        );
        println!(
            "  splits:    {} folds, test fraction {}",
            validated.split.n_folds, validated.split.test_split
        );
        if validated.needs_spacing() {
            println!("  note:      distance metrics require voxel spacing on every case");
        }
        if self.resolved {
            print!("{}", config.to_yaml_string()?);
        }
        Ok(())
    }
}
