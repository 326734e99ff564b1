//! Closed metric registry and metric-token parsing

use serde::{Deserialize, Serialize};
use std::fmt;
use uq_common::{Result, SegmentationError};

/// Metrics the engine can compute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricKind {
    Dice,
    Precision,
    Recall,
    /// Maximum symmetric surface distance
    Hausdorff,
    /// 95th percentile symmetric surface distance
    Hausdorff95,
    /// Mean distance from prediction surface to reference surface
    AverageSurfaceDistance,
    /// Mean of both directed average surface distances
    AverageSymmetricSurfaceDistance,
    /// Fraction of both surfaces within a tolerance of the other
    SurfaceDice,
    MeanEntropy,
    MeanVariance,
    PairwiseDice,
    /// Mean surface dice between sample pairs at a tolerance
    PairwiseSurfaceDice,
    /// Generalised energy distance between the sample set and the label
    GeneralisedEnergyDistance,
    /// Area under the voxel risk-coverage curve
    Aurc,
    /// AURC in excess of the optimal ranking's AURC
    Eaurc,
}

/// How a metric obtains its inputs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricFamily {
    /// Voxel overlap between binarised prediction and reference
    Overlap,
    /// Surface distances; needs voxel spacing
    Distance,
    /// Summaries of a mode's uncertainty maps
    Uncertainty,
}

const REGISTRY: &[(&str, MetricKind)] = &[
    ("dice", MetricKind::Dice),
    ("precision", MetricKind::Precision),
    ("recall", MetricKind::Recall),
    ("hd", MetricKind::Hausdorff),
    ("hd95", MetricKind::Hausdorff95),
    ("asd", MetricKind::AverageSurfaceDistance),
    ("assd", MetricKind::AverageSymmetricSurfaceDistance),
    ("surface_dice", MetricKind::SurfaceDice),
    ("mean_entropy", MetricKind::MeanEntropy),
    ("mean_variance", MetricKind::MeanVariance),
    ("pairwise_dice", MetricKind::PairwiseDice),
    ("pairwise_surface_dice", MetricKind::PairwiseSurfaceDice),
    ("ged", MetricKind::GeneralisedEnergyDistance),
    ("aurc", MetricKind::Aurc),
    ("eaurc", MetricKind::Eaurc),
];

impl MetricKind {
    #[must_use]
    pub fn name(&self) -> &'static str {
        REGISTRY
            .iter()
            .find(|(_, kind)| kind == self)
            .map_or("unknown", |(name, _)| *name)
    }

    /// Whether the metric requires a numeric parameter suffix
    #[must_use]
    pub fn is_parameterized(&self) -> bool {
        matches!(self, MetricKind::SurfaceDice | MetricKind::PairwiseSurfaceDice)
    }

    /// Whether the metric measures surface distances in physical units
    #[must_use]
    pub fn needs_spacing(&self) -> bool {
        self.family() == MetricFamily::Distance || *self == MetricKind::PairwiseSurfaceDice
    }

    #[must_use]
    pub fn family(&self) -> MetricFamily {
        match self {
            MetricKind::Dice | MetricKind::Precision | MetricKind::Recall => MetricFamily::Overlap,
            MetricKind::Hausdorff
            | MetricKind::Hausdorff95
            | MetricKind::AverageSurfaceDistance
            | MetricKind::AverageSymmetricSurfaceDistance
            | MetricKind::SurfaceDice => MetricFamily::Distance,
            MetricKind::MeanEntropy
            | MetricKind::MeanVariance
            | MetricKind::PairwiseDice
            | MetricKind::PairwiseSurfaceDice
            | MetricKind::GeneralisedEnergyDistance
            | MetricKind::Aurc
            | MetricKind::Eaurc => MetricFamily::Uncertainty,
        }
    }

    fn lookup(name: &str) -> Option<MetricKind> {
        REGISTRY
            .iter()
            .find(|(registered, _)| *registered == name)
            .map(|(_, kind)| *kind)
    }

    /// Names of every registered metric
    pub fn names() -> impl Iterator<Item = &'static str> {
        REGISTRY.iter().map(|(name, _)| *name)
    }
}

/// A parsed metric with its optional parameter
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricSpec {
    pub kind: MetricKind,
    /// Tolerance in physical units for `surface_dice` and `pairwise_surface_dice`
    pub parameter: Option<f64>,
}

impl MetricSpec {
    #[must_use]
    pub fn new(kind: MetricKind) -> Self {
        Self { kind, parameter: None }
    }
}

impl fmt::Display for MetricSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.parameter {
            Some(parameter) => write!(f, "{}_{}", self.kind.name(), parameter),
            None => f.write_str(self.kind.name()),
        }
    }
}

impl std::str::FromStr for MetricSpec {
    type Err = SegmentationError;

    fn from_str(s: &str) -> Result<Self> {
        parse_metric_spec(s)
    }
}

/// Parse one metric token
///
/// Zero-parameter metrics match their name exactly. A parameterized metric
/// is written `<name>_<value>`, split at the last underscore, where the
/// value is a finite non-negative number.
pub fn parse_metric_spec(token: &str) -> Result<MetricSpec> {
    let token = token.trim();
    if let Some(kind) = MetricKind::lookup(token) {
        if !kind.is_parameterized() {
            return Ok(MetricSpec::new(kind));
        }
    }

    let unknown = || SegmentationError::UnknownMetric(token.to_string());
    let (base, suffix) = token.rsplit_once('_').ok_or_else(unknown)?;
    let kind = MetricKind::lookup(base)
        .filter(MetricKind::is_parameterized)
        .ok_or_else(unknown)?;
    let parameter: f64 = suffix.parse().map_err(|_| unknown())?;
    if !parameter.is_finite() || parameter < 0.0 {
        return Err(unknown());
    }

    Ok(MetricSpec {
        kind,
        parameter: Some(parameter),
    })
}

/// Parse a whole metric list, failing on the first unknown token
pub fn parse_metric_specs<S: AsRef<str>>(tokens: &[S]) -> Result<Vec<MetricSpec>> {
    tokens.iter().map(|t| parse_metric_spec(t.as_ref())).collect()
}
