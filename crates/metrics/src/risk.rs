//! Voxel-level risk-coverage analysis of an uncertainty map
//!
//! Voxels are admitted in order of increasing uncertainty. At coverage
//! `k / n` the risk is the error rate among the `k` most certain voxels.
//! A useful uncertainty map keeps the risk low until the erroneous voxels
//! are the only ones left.

use uq_common::{Result, SegmentationError};

/// Risk at every coverage level, from one voxel up to all of them
#[derive(Debug, Clone, PartialEq)]
pub struct RiskCoverageCurve {
    /// `k / n` for `k = 1..=n`
    pub coverages: Vec<f64>,
    /// Error rate among the `k` most certain voxels
    pub risks: Vec<f64>,
    /// Uncertainty of the `k`-th admitted voxel
    pub thresholds: Vec<f32>,
    pub n_errors: usize,
}

impl RiskCoverageCurve {
    #[must_use]
    pub fn len(&self) -> usize {
        self.risks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.risks.is_empty()
    }

    /// Area under the curve, the mean risk over all coverage levels
    ///
    /// 0 for an empty curve.
    #[must_use]
    pub fn aurc(&self) -> f64 {
        mean_or_zero(&self.risks)
    }

    /// Excess AURC over a ranking that admits every correct voxel first
    #[must_use]
    pub fn eaurc(&self) -> f64 {
        (self.aurc() - optimal_aurc(self.len(), self.n_errors)).max(0.0)
    }
}

fn mean_or_zero(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// AURC of `n` voxels of which `errors` are wrong, ranked errors last
fn optimal_aurc(n: usize, errors: usize) -> f64 {
    let correct = n - errors.min(n);
    let risks: Vec<f64> = (1..=n)
        .map(|k| k.saturating_sub(correct) as f64 / k as f64)
        .collect();
    mean_or_zero(&risks)
}

/// Build the risk-coverage curve of per-voxel `uncertainty` against
/// per-voxel prediction `errors`
///
/// Ties in uncertainty keep their input order.
pub fn risk_coverage_curve(uncertainty: &[f32], errors: &[bool]) -> Result<RiskCoverageCurve> {
    if uncertainty.len() != errors.len() {
        return Err(SegmentationError::config(format!(
            "risk-coverage needs one error flag per voxel: {} uncertainties, {} flags",
            uncertainty.len(),
            errors.len()
        )));
    }

    let mut order: Vec<usize> = (0..uncertainty.len()).collect();
    order.sort_by(|&a, &b| uncertainty[a].total_cmp(&uncertainty[b]));

    let n = order.len();
    let mut curve = RiskCoverageCurve {
        coverages: Vec::with_capacity(n),
        risks: Vec::with_capacity(n),
        thresholds: Vec::with_capacity(n),
        n_errors: 0,
    };
    let mut wrong = 0usize;
    for (k, &voxel) in order.iter().enumerate() {
        if errors[voxel] {
            wrong += 1;
        }
        let admitted = (k + 1) as f64;
        curve.coverages.push(admitted / n as f64);
        curve.risks.push(wrong as f64 / admitted);
        curve.thresholds.push(uncertainty[voxel]);
    }
    curve.n_errors = wrong;
    Ok(curve)
}
