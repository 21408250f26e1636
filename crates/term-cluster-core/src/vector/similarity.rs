//! Similarity measures between term vectors.
//!
//! The engines never hard-code a formula: they call [`Similarity::score`],
//! which is either one of the enumerated [`SimilarityMeasure`]s or a caller
//! closure injected through the parameter block.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::ClusterError;

use super::TermVector;

/// Enumerated similarity formulas. All return values in `[0, 1]` for
/// non-negative weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimilarityMeasure {
    /// dot / (|a| |b|)
    #[default]
    Cosine,
    /// 2 Σmin / (Σa + Σb)
    Dice,
    /// Weighted Jaccard: Σmin / Σmax
    Jaccard,
    /// Σmin / min(Σa, Σb)
    Overlap,
    /// 1 / (1 + euclidean distance)
    Euclidean,
}

impl SimilarityMeasure {
    /// All measures.
    pub fn all() -> [Self; 5] {
        [
            Self::Cosine,
            Self::Dice,
            Self::Jaccard,
            Self::Overlap,
            Self::Euclidean,
        ]
    }

    /// Canonical name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cosine => "cosine",
            Self::Dice => "dice",
            Self::Jaccard => "jaccard",
            Self::Overlap => "overlap",
            Self::Euclidean => "euclidean",
        }
    }

    /// Score two vectors.
    pub fn score(&self, a: &TermVector, b: &TermVector) -> f64 {
        let (wa, wb) = (a.weights(), b.weights());
        match self {
            Self::Cosine => {
                let denom = wa.norm() * wb.norm();
                if denom < f64::EPSILON {
                    0.0
                } else {
                    wa.dot(wb) / denom
                }
            }
            Self::Dice => {
                let denom = wa.total() + wb.total();
                if denom < f64::EPSILON {
                    0.0
                } else {
                    2.0 * wa.min_sum(wb) / denom
                }
            }
            Self::Jaccard => {
                let denom = wa.max_sum(wb);
                if denom < f64::EPSILON {
                    0.0
                } else {
                    wa.min_sum(wb) / denom
                }
            }
            Self::Overlap => {
                let denom = wa.total().min(wb.total());
                if denom < f64::EPSILON {
                    0.0
                } else {
                    wa.min_sum(wb) / denom
                }
            }
            Self::Euclidean => 1.0 / (1.0 + wa.squared_distance(wb).sqrt()),
        }
    }
}

impl fmt::Display for SimilarityMeasure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SimilarityMeasure {
    type Err = ClusterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| {
                ClusterError::invalid_parameter(format!(
                    "unknown similarity measure '{}', expected one of cosine, dice, jaccard, overlap, euclidean",
                    s
                ))
            })
    }
}

/// Caller-supplied similarity function.
pub type SimilarityFn = Arc<dyn Fn(&TermVector, &TermVector) -> f64 + Send + Sync>;

/// Similarity policy used by every engine.
#[derive(Clone)]
pub enum Similarity {
    /// One of the built-in formulas.
    Measure(SimilarityMeasure),
    /// Injected closure.
    Custom(SimilarityFn),
}

impl Similarity {
    /// Wrap a closure.
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&TermVector, &TermVector) -> f64 + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Score two vectors. NaN results are reported as zero.
    #[inline]
    pub fn score(&self, a: &TermVector, b: &TermVector) -> f64 {
        let s = match self {
            Self::Measure(m) => m.score(a, b),
            Self::Custom(f) => f(a, b),
        };
        if s.is_nan() {
            0.0
        } else {
            s
        }
    }

    /// Distance derived from the score, never negative.
    #[inline]
    pub fn distance(&self, a: &TermVector, b: &TermVector) -> f64 {
        (1.0 - self.score(a, b)).max(0.0)
    }
}

impl Default for Similarity {
    fn default() -> Self {
        Self::Measure(SimilarityMeasure::default())
    }
}

impl From<SimilarityMeasure> for Similarity {
    fn from(m: SimilarityMeasure) -> Self {
        Self::Measure(m)
    }
}

impl fmt::Debug for Similarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Measure(m) => write!(f, "Similarity::Measure({})", m),
            Self::Custom(_) => f.write_str("Similarity::Custom(..)"),
        }
    }
}
