//! Intensity preprocessing for CT volumes

use ndarray::Array4;
use serde::{Deserialize, Serialize};
use uq_common::{Result, SegmentationError};

/// Hounsfield window clipped and mapped onto [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntensityWindow {
    pub lower: f32,
    pub upper: f32,
}

impl Default for IntensityWindow {
    fn default() -> Self {
        Self {
            lower: -500.0,
            upper: 1000.0,
        }
    }
}

/// Clip intensities to `window` and rescale linearly to [0, 1]
pub fn normalise_intensity(volume: &Array4<f32>, window: IntensityWindow) -> Result<Array4<f32>> {
    let range = window.upper - window.lower;
    if !range.is_finite() || range <= 0.0 {
        return Err(SegmentationError::config(format!(
            "intensity window upper bound must exceed lower bound, got {window:?}"
        )));
    }
    Ok(volume.mapv(|v| (v.clamp(window.lower, window.upper) - window.lower) / range))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array;

    #[test]
    fn test_normalise_clips_and_rescales() {
        let volume = Array::from_shape_vec((1, 1, 1, 4), vec![-2000.0, -500.0, 250.0, 3000.0]).unwrap();
        let out = normalise_intensity(&volume, IntensityWindow::default()).unwrap();
        assert_eq!(out.iter().copied().collect::<Vec<_>>(), vec![0.0, 0.0, 0.5, 1.0]);
    }

    #[test]
    fn test_invalid_window() {
        let volume = Array4::<f32>::zeros((1, 1, 1, 1));
        let window = IntensityWindow {
            lower: 10.0,
            upper: 10.0,
        };
        assert!(normalise_intensity(&volume, window).is_err());
    }
}
