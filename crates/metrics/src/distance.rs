//! Surface extraction and anisotropic Euclidean distance transforms

use ndarray::{Array3, ArrayView1, ArrayView3, Axis};
use uq_common::VoxelSpacing;

/// Foreground voxels with at least one 6-neighbour outside the mask
///
/// Voxels on the volume boundary count as surface.
#[must_use]
pub fn surface_voxels(mask: &ArrayView3<'_, bool>) -> Array3<bool> {
    let (h, w, d) = mask.dim();
    let outside = |i: isize, j: isize, k: isize| -> bool {
        if i < 0 || j < 0 || k < 0 || i >= h as isize || j >= w as isize || k >= d as isize {
            return true;
        }
        !mask[[i as usize, j as usize, k as usize]]
    };
    Array3::from_shape_fn((h, w, d), |(i, j, k)| {
        if !mask[[i, j, k]] {
            return false;
        }
        let (i, j, k) = (i as isize, j as isize, k as isize);
        outside(i - 1, j, k)
            || outside(i + 1, j, k)
            || outside(i, j - 1, k)
            || outside(i, j + 1, k)
            || outside(i, j, k - 1)
            || outside(i, j, k + 1)
    })
}

/// Squared distance transform of one line with sample spacing `step`
///
/// Lower envelope of parabolas rooted at the finite entries of `f`; lines
/// without any finite entry stay infinite.
fn squared_distance_1d(f: &[f64], step: f64, out: &mut [f64]) {
    let w = step * step;
    let mut roots: Vec<usize> = Vec::with_capacity(f.len());
    let mut starts: Vec<f64> = Vec::with_capacity(f.len());

    for (q, &fq) in f.iter().enumerate() {
        if !fq.is_finite() {
            continue;
        }
        loop {
            match (roots.last(), starts.last()) {
                (Some(&p), Some(&start)) => {
                    let (qf, pf) = (q as f64, p as f64);
                    let s = ((fq + w * qf * qf) - (f[p] + w * pf * pf)) / (2.0 * w * (qf - pf));
                    if s <= start {
                        roots.pop();
                        starts.pop();
                        continue;
                    }
                    roots.push(q);
                    starts.push(s);
                }
                _ => {
                    roots.push(q);
                    starts.push(f64::NEG_INFINITY);
                }
            }
            break;
        }
    }

    if roots.is_empty() {
        out.fill(f64::INFINITY);
        return;
    }

    let mut k = 0;
    for (p, slot) in out.iter_mut().enumerate() {
        let pf = p as f64;
        while k + 1 < roots.len() && starts[k + 1] < pf {
            k += 1;
        }
        let r = roots[k] as f64;
        *slot = w * (pf - r) * (pf - r) + f[roots[k]];
    }
}

/// Physical distance from every voxel to the nearest `true` voxel of `features`
///
/// Separable exact transform, one pass per axis. Without any feature voxel
/// every distance is infinite.
#[must_use]
pub fn distance_transform(features: &ArrayView3<'_, bool>, spacing: VoxelSpacing) -> Array3<f64> {
    let mut squared = features.mapv(|f| if f { 0.0 } else { f64::INFINITY });
    let mut line = Vec::new();
    let mut out = Vec::new();

    for (axis, &step) in spacing.iter().enumerate() {
        for mut lane in squared.lanes_mut(Axis(axis)) {
            line.clear();
            line.extend(lane.iter().copied());
            out.resize(line.len(), 0.0);
            squared_distance_1d(&line, step, &mut out);
            lane.assign(&ArrayView1::from(&out[..]));
        }
    }

    squared.mapv_into(f64::sqrt)
}

/// Directed distances between the surfaces of a prediction and a reference
#[derive(Debug, Clone, Default)]
pub struct SurfaceDistances {
    /// Distance of each prediction surface voxel to the reference surface
    pub prediction_to_reference: Vec<f64>,
    /// Distance of each reference surface voxel to the prediction surface
    pub reference_to_prediction: Vec<f64>,
}

fn directed(from_surface: &Array3<bool>, to_distance: &Array3<f64>) -> Vec<f64> {
    from_surface
        .iter()
        .zip(to_distance.iter())
        .filter(|(&on_surface, _)| on_surface)
        .map(|(_, &d)| d)
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

/// Linear-interpolated percentile of unsorted values, `q` in [0, 100]
fn percentile(values: &[f64], q: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = q / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (rank - lo as f64)
}

impl SurfaceDistances {
    /// Compute both directed surface distance sets
    #[must_use]
    pub fn between(
        prediction: &ArrayView3<'_, bool>,
        reference: &ArrayView3<'_, bool>,
        spacing: VoxelSpacing,
    ) -> Self {
        let prediction_surface = surface_voxels(prediction);
        let reference_surface = surface_voxels(reference);
        let to_reference = distance_transform(&reference_surface.view(), spacing);
        let to_prediction = distance_transform(&prediction_surface.view(), spacing);
        Self {
            prediction_to_reference: directed(&prediction_surface, &to_reference),
            reference_to_prediction: directed(&reference_surface, &to_prediction),
        }
    }

    fn both_empty(&self) -> bool {
        self.prediction_to_reference.is_empty() && self.reference_to_prediction.is_empty()
    }

    fn one_empty(&self) -> bool {
        self.prediction_to_reference.is_empty() != self.reference_to_prediction.is_empty()
    }

    /// Symmetric surface distance statistic; 0 when both masks are empty and
    /// infinite when exactly one is
    fn symmetric(&self, directed_stat: impl Fn(&[f64]) -> f64) -> f64 {
        if self.both_empty() {
            0.0
        } else if self.one_empty() {
            f64::INFINITY
        } else {
            directed_stat(&self.prediction_to_reference).max(directed_stat(&self.reference_to_prediction))
        }
    }

    #[must_use]
    pub fn hausdorff(&self) -> f64 {
        self.symmetric(|d| d.iter().copied().fold(0.0, f64::max))
    }

    #[must_use]
    pub fn hausdorff95(&self) -> f64 {
        self.symmetric(|d| percentile(d, 95.0))
    }

    /// Mean distance from the prediction surface to the reference surface
    #[must_use]
    pub fn average_surface_distance(&self) -> f64 {
        if self.both_empty() {
            0.0
        } else if self.one_empty() {
            f64::INFINITY
        } else {
            mean(&self.prediction_to_reference)
        }
    }

    #[must_use]
    pub fn average_symmetric_surface_distance(&self) -> f64 {
        if self.both_empty() {
            0.0
        } else if self.one_empty() {
            f64::INFINITY
        } else {
            (mean(&self.prediction_to_reference) + mean(&self.reference_to_prediction)) / 2.0
        }
    }

    /// Fraction of surface voxels of either mask lying within `tolerance` of
    /// the other surface
    #[must_use]
    pub fn surface_dice(&self, tolerance: f64) -> f64 {
        if self.both_empty() {
            return 1.0;
        }
        if self.one_empty() {
            return 0.0;
        }
        let within = |d: &[f64]| d.iter().filter(|&&x| x <= tolerance).count();
        let total = self.prediction_to_reference.len() + self.reference_to_prediction.len();
        (within(&self.prediction_to_reference) + within(&self.reference_to_prediction)) as f64
            / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::s;

    fn cube(shape: (usize, usize, usize), lo: usize, hi: usize) -> Array3<bool> {
        let mut mask = Array3::from_elem(shape, false);
        mask.slice_mut(s![lo..hi, lo..hi, lo..hi]).fill(true);
        mask
    }

    #[test]
    fn test_surface_of_cube() {
        let mask = cube((6, 6, 6), 1, 5);
        let surface = surface_voxels(&mask.view());
        // 4^3 cube minus its 2^3 interior
        assert_eq!(surface.iter().filter(|&&v| v).count(), 64 - 8);
        assert!(!surface[[2, 2, 2]]);
        assert!(surface[[1, 2, 2]]);
    }

    #[test]
    fn test_distance_transform_matches_brute_force() {
        let mut features = Array3::from_elem((7, 5, 4), false);
        features[[1, 1, 1]] = true;
        features[[5, 3, 0]] = true;
        features[[6, 0, 3]] = true;
        let spacing = [1.0, 2.0, 0.5];
        let dist = distance_transform(&features.view(), spacing);
        let seeds: Vec<_> = features
            .indexed_iter()
            .filter(|(_, &f)| f)
            .map(|(idx, _)| idx)
            .collect();
        for ((i, j, k), &d) in dist.indexed_iter() {
            let expected = seeds
                .iter()
                .map(|&(a, b, c)| {
                    let di = (i as f64 - a as f64) * spacing[0];
                    let dj = (j as f64 - b as f64) * spacing[1];
                    let dk = (k as f64 - c as f64) * spacing[2];
                    (di * di + dj * dj + dk * dk).sqrt()
                })
                .fold(f64::INFINITY, f64::min);
            assert!((d - expected).abs() < 1e-9, "({i},{j},{k}): {d} vs {expected}");
        }
    }

    #[test]
    fn test_distance_transform_without_features() {
        let features = Array3::from_elem((3, 3, 3), false);
        let dist = distance_transform(&features.view(), [1.0; 3]);
        assert!(dist.iter().all(|d| d.is_infinite()));
    }

    #[test]
    fn test_identical_masks_have_zero_distance() {
        let mask = cube((10, 10, 10), 2, 7);
        let distances = SurfaceDistances::between(&mask.view(), &mask.view(), [1.0, 1.0, 1.0]);
        assert_eq!(distances.hausdorff(), 0.0);
        assert_eq!(distances.hausdorff95(), 0.0);
        assert_eq!(distances.average_symmetric_surface_distance(), 0.0);
        assert_eq!(distances.surface_dice(0.0), 1.0);
    }

    #[test]
    fn test_shifted_cube_distances() {
        let prediction = cube((12, 12, 12), 2, 6);
        let mut reference = Array3::from_elem((12, 12, 12), false);
        reference.slice_mut(s![4..8, 2..6, 2..6]).fill(true);
        let distances = SurfaceDistances::between(&prediction.view(), &reference.view(), [1.0; 3]);
        assert!((distances.hausdorff() - 2.0).abs() < 1e-9);
        assert!(distances.surface_dice(2.0) == 1.0);
        assert!(distances.surface_dice(0.5) < 1.0);

        // Doubling the spacing along the shift axis doubles the Hausdorff distance
        let stretched =
            SurfaceDistances::between(&prediction.view(), &reference.view(), [2.0, 1.0, 1.0]);
        assert!((stretched.hausdorff() - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_mask_conventions() {
        let empty = Array3::from_elem((5, 5, 5), false);
        let full = cube((5, 5, 5), 1, 4);
        let both = SurfaceDistances::between(&empty.view(), &empty.view(), [1.0; 3]);
        assert_eq!(both.hausdorff(), 0.0);
        assert_eq!(both.surface_dice(1.0), 1.0);
        let one = SurfaceDistances::between(&empty.view(), &full.view(), [1.0; 3]);
        assert!(one.hausdorff95().is_infinite());
        assert!(one.average_surface_distance().is_infinite());
        assert_eq!(one.surface_dice(1.0), 0.0);
    }

    #[test]
    fn test_percentile_interpolates() {
        let values = [4.0, 1.0, 3.0, 2.0, 5.0];
        assert_eq!(percentile(&values, 50.0), 3.0);
        assert!((percentile(&values, 95.0) - 4.8).abs() < 1e-12);
    }
}
