//! Mode-agnostic reduction of a sample set into uncertainty maps

use ndarray::{Array4, Axis, Zip};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uq_common::mask::{probability_map, OverlapCounts};
use uq_common::{Result, SegmentationError};

/// How the model's output channels are interpreted as probabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbabilityKind {
    /// Independent per-class probabilities (multi-label)
    #[default]
    Sigmoid,
    /// Channels form one categorical distribution per voxel
    Softmax,
}

impl FromStr for ProbabilityKind {
    type Err = SegmentationError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sigmoid" => Ok(ProbabilityKind::Sigmoid),
            "softmax" => Ok(ProbabilityKind::Softmax),
            other => Err(SegmentationError::config(format!(
                "unknown output activation '{other}' (expected sigmoid or softmax)"
            ))),
        }
    }
}

impl fmt::Display for ProbabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbabilityKind::Sigmoid => write!(f, "sigmoid"),
            ProbabilityKind::Softmax => write!(f, "softmax"),
        }
    }
}

/// Per-voxel summary of one mode's sample set
#[derive(Debug, Clone)]
pub struct UncertaintyMaps {
    /// Mean probability per class channel
    pub mean: Array4<f32>,
    /// Unbiased sample variance per class channel (zero for one sample)
    pub variance: Array4<f32>,
    /// Entropy in nats: one channel per class for sigmoid outputs,
    /// a single channel for softmax outputs
    pub entropy: Array4<f32>,
    pub n_samples: usize,
}

fn xlogx(x: f32) -> f32 {
    if x <= 0.0 {
        0.0
    } else {
        x * x.ln()
    }
}

fn check_shapes(samples: &[Array4<f32>]) -> Result<()> {
    let first = samples
        .first()
        .ok_or_else(|| SegmentationError::config("cannot reduce an empty sample set"))?;
    if let Some(other) = samples.iter().find(|s| s.dim() != first.dim()) {
        return Err(SegmentationError::config(format!(
            "sample shapes differ: {:?} vs {:?}",
            first.dim(),
            other.dim()
        )));
    }
    Ok(())
}

/// Reduce samples into mean, variance and entropy maps
///
/// Mean and variance use Welford's single-pass update, so a set of
/// identical samples has exactly zero variance. Entropy is taken from the
/// mean probabilities.
pub fn reduce_samples(samples: &[Array4<f32>], kind: ProbabilityKind) -> Result<UncertaintyMaps> {
    check_shapes(samples)?;

    let mut mean = samples[0].clone();
    let mut m2 = Array4::<f32>::zeros(mean.raw_dim());
    for (index, sample) in samples.iter().enumerate().skip(1) {
        let count = (index + 1) as f32;
        Zip::from(&mut mean)
            .and(&mut m2)
            .and(sample)
            .for_each(|mean, m2, &x| {
                let delta = x - *mean;
                *mean += delta / count;
                *m2 += delta * (x - *mean);
            });
    }

    let n = samples.len();
    let variance = if n > 1 {
        m2.mapv_into(|v| (v / (n - 1) as f32).max(0.0))
    } else {
        m2
    };

    let entropy = match kind {
        ProbabilityKind::Sigmoid => mean.mapv(|p| {
            let p = p.clamp(0.0, 1.0);
            -(xlogx(p) + xlogx(1.0 - p))
        }),
        ProbabilityKind::Softmax => mean
            .map_axis(Axis(0), |probs| -probs.iter().map(|&p| xlogx(p)).sum::<f32>())
            .insert_axis(Axis(0)),
    };

    Ok(UncertaintyMaps {
        mean,
        variance,
        entropy,
        n_samples: n,
    })
}

/// Mean Dice over all sample pairs, one value per class channel
///
/// Samples are binarised at `threshold`. A single sample agrees with
/// itself, giving 1.0 for every class.
pub fn pairwise_dice(samples: &[Array4<f32>], threshold: f32) -> Result<Vec<f64>> {
    check_shapes(samples)?;
    let n_classes = samples[0].dim().0;
    if samples.len() < 2 {
        return Ok(vec![1.0; n_classes]);
    }

    (0..n_classes)
        .map(|class| {
            let masks: Vec<_> = samples
                .iter()
                .map(|s| probability_map(&s.index_axis(Axis(0), class), threshold))
                .collect();
            let mut total = 0.0;
            let mut pairs = 0usize;
            for i in 0..masks.len() {
                for j in i + 1..masks.len() {
                    total += OverlapCounts::between(&masks[i].view(), &masks[j].view()).dice();
                    pairs += 1;
                }
            }
            Ok(total / pairs as f64)
        })
        .collect()
}

/// Threshold every sample into a per-class binary mask
#[must_use]
pub fn binarise_samples(samples: &[Array4<f32>], threshold: f32) -> Vec<Array4<bool>> {
    samples.iter().map(|s| s.mapv(|p| p > threshold)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probs(values: &[f32]) -> Array4<f32> {
        Array4::from_shape_vec((1, 1, 1, values.len()), values.to_vec()).unwrap()
    }

    #[test]
    fn test_binarised_samples_match_probability_map() {
        let samples = vec![probs(&[0.2, 0.5, 0.51]), probs(&[0.9, 0.0, 1.0])];
        let masks = binarise_samples(&samples, 0.5);
        assert_eq!(masks.len(), 2);
        assert_eq!(masks[0].iter().copied().collect::<Vec<_>>(), vec![false, false, true]);
        assert_eq!(masks[1].iter().copied().collect::<Vec<_>>(), vec![true, false, true]);
    }

    #[test]
    fn test_identical_samples_have_zero_variance() {
        let sample = Array4::from_shape_fn((2, 4, 4, 4), |(c, i, j, k)| {
            ((c + i + 2 * j + 3 * k) % 10) as f32 / 9.0 + 0.0137
        });
        let samples = vec![sample.clone(); 7];
        let maps = reduce_samples(&samples, ProbabilityKind::Sigmoid).unwrap();
        assert!(maps.variance.iter().all(|&v| v == 0.0));
        assert_eq!(maps.mean, sample);

        let single = reduce_samples(&samples[..1], ProbabilityKind::Sigmoid).unwrap();
        assert_eq!(maps.entropy, single.entropy);
        assert!(single.variance.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_mean_and_unbiased_variance() {
        let samples = vec![probs(&[0.0, 1.0]), probs(&[0.5, 1.0]), probs(&[1.0, 1.0])];
        let maps = reduce_samples(&samples, ProbabilityKind::Sigmoid).unwrap();
        assert!((maps.mean[[0, 0, 0, 0]] - 0.5).abs() < 1e-6);
        assert!((maps.variance[[0, 0, 0, 0]] - 0.25).abs() < 1e-6);
        assert_eq!(maps.variance[[0, 0, 0, 1]], 0.0);
        assert_eq!(maps.n_samples, 3);
    }

    #[test]
    fn test_sigmoid_entropy() {
        let maps = reduce_samples(&[probs(&[0.5, 0.0, 1.0])], ProbabilityKind::Sigmoid).unwrap();
        assert!((maps.entropy[[0, 0, 0, 0]] - std::f32::consts::LN_2).abs() < 1e-6);
        assert_eq!(maps.entropy[[0, 0, 0, 1]], 0.0);
        assert_eq!(maps.entropy[[0, 0, 0, 2]], 0.0);
    }

    #[test]
    fn test_softmax_entropy_single_channel() {
        let mut sample = Array4::<f32>::zeros((4, 1, 1, 2));
        sample.index_axis_mut(Axis(3), 0).fill(0.25);
        sample[[2, 0, 0, 1]] = 1.0;
        let maps = reduce_samples(&[sample], ProbabilityKind::Softmax).unwrap();
        assert_eq!(maps.entropy.dim(), (1, 1, 1, 2));
        assert!((maps.entropy[[0, 0, 0, 0]] - 4.0_f32.ln()).abs() < 1e-6);
        assert_eq!(maps.entropy[[0, 0, 0, 1]], 0.0);
    }

    #[test]
    fn test_empty_or_mismatched_samples() {
        assert!(reduce_samples(&[], ProbabilityKind::Sigmoid).is_err());
        let mixed = vec![probs(&[0.1]), probs(&[0.1, 0.2])];
        assert!(reduce_samples(&mixed, ProbabilityKind::Sigmoid).is_err());
    }

    #[test]
    fn test_pairwise_dice() {
        let a = probs(&[0.9, 0.9, 0.1, 0.1]);
        let b = probs(&[0.9, 0.1, 0.1, 0.1]);
        let scores = pairwise_dice(&[a.clone(), a.clone(), b], 0.5).unwrap();
        // pairs: (a, a) = 1, (a, b) = 2/3 twice
        assert!((scores[0] - (1.0 + 2.0 / 3.0 + 2.0 / 3.0) / 3.0).abs() < 1e-9);
        assert_eq!(pairwise_dice(&[a], 0.5).unwrap(), vec![1.0]);
    }

    #[test]
    fn test_activation_parsing() {
        assert_eq!("softmax".parse::<ProbabilityKind>().unwrap(), ProbabilityKind::Softmax);
        assert_eq!(ProbabilityKind::Sigmoid.to_string(), "sigmoid");
        assert!("relu".parse::<ProbabilityKind>().is_err());
    }
}
