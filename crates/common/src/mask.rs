//! Binary mask helpers shared by uncertainty reduction and metrics

use ndarray::{Array3, ArrayView3, Zip};

/// Probabilities above this threshold are foreground
pub const DEFAULT_THRESHOLD: f32 = 0.5;

/// Threshold a probability map into a binary mask
#[must_use]
pub fn probability_map(probabilities: &ArrayView3<'_, f32>, threshold: f32) -> Array3<bool> {
    probabilities.mapv(|p| p > threshold)
}

/// Overlap counts between two same-shaped masks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OverlapCounts {
    pub true_positive: usize,
    pub false_positive: usize,
    pub false_negative: usize,
}

impl OverlapCounts {
    /// Count agreement of `prediction` against `reference`
    #[must_use]
    pub fn between(prediction: &ArrayView3<'_, bool>, reference: &ArrayView3<'_, bool>) -> Self {
        let mut counts = Self::default();
        Zip::from(prediction).and(reference).for_each(|&p, &r| match (p, r) {
            (true, true) => counts.true_positive += 1,
            (true, false) => counts.false_positive += 1,
            (false, true) => counts.false_negative += 1,
            (false, false) => {}
        });
        counts
    }

    /// `2TP / (2TP + FP + FN)`, 1.0 when both masks are empty
    #[must_use]
    pub fn dice(&self) -> f64 {
        ratio_or_one(
            2 * self.true_positive,
            2 * self.true_positive + self.false_positive + self.false_negative,
        )
    }

    /// `TP / (TP + FP)`, 1.0 when nothing is predicted
    #[must_use]
    pub fn precision(&self) -> f64 {
        ratio_or_one(self.true_positive, self.true_positive + self.false_positive)
    }

    /// `TP / (TP + FN)`, 1.0 when the reference is empty
    #[must_use]
    pub fn recall(&self) -> f64 {
        ratio_or_one(self.true_positive, self.true_positive + self.false_negative)
    }
}

fn ratio_or_one(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        1.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_overlap_counts() {
        let mut a = Array3::from_elem((2, 2, 2), false);
        let mut b = Array3::from_elem((2, 2, 2), false);
        a[[0, 0, 0]] = true;
        a[[0, 0, 1]] = true;
        b[[0, 0, 1]] = true;
        b[[1, 1, 1]] = true;
        let counts = OverlapCounts::between(&a.view(), &b.view());
        assert_eq!(counts.true_positive, 1);
        assert_eq!(counts.false_positive, 1);
        assert_eq!(counts.false_negative, 1);
        assert!((counts.dice() - 0.5).abs() < 1e-12);
        assert!((counts.precision() - 0.5).abs() < 1e-12);
        assert!((counts.recall() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_empty_masks_score_one() {
        let empty = Array3::from_elem((3, 3, 3), false);
        let counts = OverlapCounts::between(&empty.view(), &empty.view());
        assert_eq!(counts.dice(), 1.0);
        assert_eq!(counts.precision(), 1.0);
        assert_eq!(counts.recall(), 1.0);
    }

    #[test]
    fn test_probability_map_threshold() {
        let probs = Array3::from_shape_vec((1, 1, 3), vec![0.2_f32, 0.5, 0.9]).unwrap();
        let mask = probability_map(&probs.view(), DEFAULT_THRESHOLD);
        assert_eq!(mask.iter().copied().collect::<Vec<_>>(), vec![false, false, true]);
    }
}
