//! Grid command - inspect the sliding-window tiling of a volume

use crate::parser::{parse_shape, parse_step};
use anyhow::Result;
use clap::Args;
use uq_patching::sliding_window_grid;

#[derive(Args)]
pub struct GridCommand {
    /// Volume shape, e.g. 512x512x120
    #[arg(long)]
    shape: String,

    /// Patch size, e.g. 128x128x64
    #[arg(long, default_value = "128x128x64")]
    patch: String,

    /// Step between origins: one number or a shape
    #[arg(long, default_value = "64x64x32")]
    step: String,

    /// Print every patch origin
    #[arg(long)]
    list: bool,

    /// Emit JSON instead of text
    #[arg(long)]
    json: bool,
}

impl GridCommand {
    pub fn execute(self) -> Result<()> {
        let shape = parse_shape(&self.shape)?;
        let patch = parse_shape(&self.patch)?;
        let step = parse_step(&self.step)?;
        let grid = sliding_window_grid(shape, patch, step)?;

        if self.json {
            let origins: Vec<_> = if self.list {
                grid.iter().map(|p| p.origin).collect()
            } else {
                Vec::new()
            };
            let summary = serde_json::json!({
                "volume_shape": shape,
                "padded_shape": grid.padded_shape(),
                "patch_size": grid.patch_extent(),
                "patches": grid.len(),
                "axis_offsets": [grid.axis_offsets(0), grid.axis_offsets(1), grid.axis_offsets(2)],
                "origins": origins,
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
            return Ok(());
        }

        println!("volume:  {shape:?}");
        println!("padded:  {:?}", grid.padded_shape());
        println!("patch:   {:?}", grid.patch_extent());
        println!("patches: {}", grid.len());
        for (axis, name) in ["height", "width", "depth"].iter().enumerate() {
            println!("  {name:<6} offsets {:?}", grid.axis_offsets(axis));
        }
        if self.list {
            for (index, patch) in grid.iter().enumerate() {
                println!("{index:>6} {:?}", patch.origin);
            }
        }
        Ok(())
    }
}
