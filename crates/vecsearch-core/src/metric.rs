use crate::VecFloat;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Distance metric fixed at index creation.
///
/// Distances are "smaller is closer". Cosine distance is `1 - cos(a, b)` on the
/// raw vectors (nothing is normalised implicitly), L2 is the squared Euclidean
/// distance. Scores handed back to callers are higher-is-better, see
/// [`Metric::score`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    #[default]
    Cosine,
    L2,
}

impl Metric {
    #[inline]
    pub fn distance(self, a: &[VecFloat], b: &[VecFloat]) -> VecFloat {
        match self {
            Metric::Cosine => cosine_distance(a, b),
            Metric::L2 => l2_squared(a, b),
        }
    }

    /// Maps a distance to a similarity score in `[0, 1]`.
    ///
    /// Cosine: `(1 + cos) / 2`. L2: `1 / (1 + d²)`. Both are strictly
    /// decreasing in the distance, so ordering by score descending is the same
    /// as ordering by distance ascending.
    #[inline]
    pub fn score(self, distance: VecFloat) -> VecFloat {
        match self {
            Metric::Cosine => (2.0 - distance) / 2.0,
            Metric::L2 => 1.0 / (1.0 + distance),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::L2 => "l2",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cosine" | "cos" => Ok(Metric::Cosine),
            "l2" | "euclidean" => Ok(Metric::L2),
            other => Err(format!("unknown metric '{other}' (expected cosine or l2)")),
        }
    }
}

#[inline]
pub fn dot(a: &[VecFloat], b: &[VecFloat]) -> VecFloat {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[inline]
pub fn l2_squared(a: &[VecFloat], b: &[VecFloat]) -> VecFloat {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

/// `1 - a·b / (|a||b|)`. A zero-length vector has no direction; it sits at
/// distance 1 (orthogonal) from everything, itself included.
#[inline]
pub fn cosine_distance(a: &[VecFloat], b: &[VecFloat]) -> VecFloat {
    let mut ab = 0.0;
    let mut aa = 0.0;
    let mut bb = 0.0;
    for (x, y) in a.iter().zip(b) {
        ab += x * y;
        aa += x * x;
        bb += y * y;
    }
    let denom = (aa * bb).sqrt();
    if denom <= VecFloat::EPSILON {
        return 1.0;
    }
    // Rounding can push |cos| a hair past 1.
    let cos = (ab / denom).clamp(-1.0, 1.0);
    1.0 - cos
}
