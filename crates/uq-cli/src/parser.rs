//! Parsing of volume shapes and patch steps given on the command line

use anyhow::{bail, Context as _, Result};
use uq_common::Shape3;
use uq_patching::PatchStep;

/// Parse a shape written as `HxWxD` or `H,W,D`
pub fn parse_shape(input: &str) -> Result<Shape3> {
    let parts: Vec<&str> = input
        .split(|c| c == 'x' || c == ',')
        .map(str::trim)
        .collect();
    if parts.len() != 3 {
        bail!("expected three extents like 64x64x16, got '{input}'");
    }
    let mut shape = [0usize; 3];
    for (slot, part) in shape.iter_mut().zip(&parts) {
        *slot = part
            .parse()
            .with_context(|| format!("invalid extent '{part}' in '{input}'"))?;
    }
    Ok(shape)
}

/// Parse a step: one number for every axis, or a full shape
pub fn parse_step(input: &str) -> Result<PatchStep> {
    if let Ok(step) = input.trim().parse::<usize>() {
        return Ok(PatchStep::Uniform(step));
    }
    parse_shape(input).map(PatchStep::PerAxis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_shape() {
        assert_eq!(parse_shape("64x64x16").unwrap(), [64, 64, 16]);
        assert_eq!(parse_shape("128, 128, 64").unwrap(), [128, 128, 64]);
        assert!(parse_shape("64x64").is_err());
        assert!(parse_shape("64xax16").is_err());
    }

    #[test]
    fn test_parse_step() {
        assert_eq!(parse_step("8").unwrap(), PatchStep::Uniform(8));
        assert_eq!(parse_step("8x8x4").unwrap(), PatchStep::PerAxis([8, 8, 4]));
        assert!(parse_step("eight").is_err());
    }
}
