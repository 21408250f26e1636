//! Threshold schedule and backoff.
//!
//! A [`ThresholdList`] maps a pair of frequencies to a nominal similarity
//! floor; the floor is multiplied by a backoff scale in `(0, 1]`. Scale `1.0`
//! is the strictest setting. When no pair qualifies, [`Backoff::relax`]
//! lowers the scale geometrically, shrinking faster as it nears zero, until
//! it is exhausted.

use serde::{Deserialize, Serialize};

use crate::error::ClusterError;

/// One step of the schedule: pairs whose smaller frequency is at least
/// `min_frequency` must reach `similarity`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdEntry {
    /// Lower frequency bound for this entry.
    pub min_frequency: f64,
    /// Nominal similarity floor.
    pub similarity: f64,
}

/// Frequency-dependent similarity floors.
///
/// # Example
///
/// ```
/// use term_cluster_core::clustering::ThresholdList;
///
/// let list = ThresholdList::from_entries(vec![(0.0, 0.5), (100.0, 0.3)]).unwrap();
/// assert_eq!(list.threshold(5.0, 500.0, 1.0), 0.5);
/// assert_eq!(list.threshold(200.0, 500.0, 1.0), 0.3);
/// assert_eq!(list.threshold(200.0, 500.0, 0.5), 0.15);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawThresholdList")]
pub struct ThresholdList {
    entries: Vec<ThresholdEntry>,
}

/// Wire shape of [`ThresholdList`]; deserialization goes through
/// [`ThresholdList::from_entries`] so entries are always sorted.
#[derive(Deserialize)]
struct RawThresholdList {
    entries: Vec<ThresholdEntry>,
}

impl TryFrom<RawThresholdList> for ThresholdList {
    type Error = ClusterError;

    fn try_from(raw: RawThresholdList) -> Result<Self, Self::Error> {
        Self::from_entries(
            raw.entries
                .into_iter()
                .map(|e| (e.min_frequency, e.similarity))
                .collect(),
        )
    }
}

impl ThresholdList {
    /// Degenerate single-value schedule.
    pub fn constant(similarity: f64) -> Self {
        Self {
            entries: vec![ThresholdEntry {
                min_frequency: 0.0,
                similarity,
            }],
        }
    }

    /// Build from `(min_frequency, similarity)` pairs.
    ///
    /// # Errors
    ///
    /// Returns `ClusterError::InvalidParameter` if the list is empty or any
    /// value is negative or non-finite.
    pub fn from_entries(pairs: Vec<(f64, f64)>) -> Result<Self, ClusterError> {
        let mut entries: Vec<ThresholdEntry> = pairs
            .into_iter()
            .map(|(min_frequency, similarity)| ThresholdEntry {
                min_frequency,
                similarity,
            })
            .collect();
        entries.sort_by(|a, b| a.min_frequency.total_cmp(&b.min_frequency));
        let list = Self { entries };
        list.validate()?;
        Ok(list)
    }

    /// Schedule entries, ascending by frequency bound.
    pub fn entries(&self) -> &[ThresholdEntry] {
        &self.entries
    }

    /// Validate the schedule.
    ///
    /// # Errors
    ///
    /// Returns `ClusterError::InvalidParameter` on an empty list, negative
    /// or non-finite values, or bounds out of ascending order.
    pub fn validate(&self) -> Result<(), ClusterError> {
        if self.entries.is_empty() {
            return Err(ClusterError::invalid_parameter(
                "threshold list must contain at least one entry",
            ));
        }
        if self
            .entries
            .windows(2)
            .any(|w| w[0].min_frequency > w[1].min_frequency)
        {
            return Err(ClusterError::invalid_parameter(
                "threshold entries must be in ascending min_frequency order",
            ));
        }
        for e in &self.entries {
            if !e.similarity.is_finite() || e.similarity < 0.0 {
                return Err(ClusterError::invalid_parameter(format!(
                    "threshold similarity must be finite and >= 0.0, got {}",
                    e.similarity
                )));
            }
            if !e.min_frequency.is_finite() || e.min_frequency < 0.0 {
                return Err(ClusterError::invalid_parameter(format!(
                    "threshold min_frequency must be finite and >= 0.0, got {}",
                    e.min_frequency
                )));
            }
        }
        Ok(())
    }

    /// Nominal floor for a frequency pair, before scaling.
    ///
    /// The smaller of the two frequencies selects the last entry whose bound
    /// it reaches; frequencies below every bound use the first entry.
    pub fn nominal(&self, freq_a: f64, freq_b: f64) -> f64 {
        let f = freq_a.min(freq_b);
        let mut chosen = self.entries[0].similarity;
        for e in &self.entries {
            if f >= e.min_frequency {
                chosen = e.similarity;
            } else {
                break;
            }
        }
        chosen
    }

    /// Minimum acceptable similarity at backoff `scale`.
    ///
    /// Monotone non-decreasing in `scale`; negative scales clamp to zero.
    #[inline]
    pub fn threshold(&self, freq_a: f64, freq_b: f64, scale: f64) -> f64 {
        self.nominal(freq_a, freq_b) * scale.max(0.0)
    }
}

impl Default for ThresholdList {
    fn default() -> Self {
        Self::constant(0.3)
    }
}

/// Scale below which backoff is considered exhausted.
pub const BACKOFF_FLOOR: f64 = 1e-3;

/// Geometric relaxation of the threshold scale.
///
/// # Example
///
/// ```
/// use term_cluster_core::clustering::Backoff;
///
/// let mut b = Backoff::new(0.5);
/// assert_eq!(b.scale(), 1.0);
/// assert!(b.relax());
/// assert!(b.scale() < 1.0);
/// while b.relax() {}
/// assert!(b.is_exhausted());
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    scale: f64,
    step: f64,
}

impl Backoff {
    /// Start at the nominal scale `1.0`.
    pub fn new(step: f64) -> Self {
        Self { scale: 1.0, step }
    }

    /// Current scale; negative once exhausted.
    #[inline]
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// True once the scale has dropped below zero.
    #[inline]
    pub fn is_exhausted(&self) -> bool {
        self.scale < 0.0
    }

    /// Lower the scale one step. Returns false when exhausted.
    ///
    /// The multiplicative factor is `1 - step` above 0.5, `1 - 2·step`
    /// above 0.1 and `1 - 4·step` below, each clamped to `[0, 0.95]`, so the
    /// tail is short even for tiny steps.
    pub fn relax(&mut self) -> bool {
        if self.is_exhausted() {
            return false;
        }
        let multiplier = if self.scale > 0.5 {
            1.0
        } else if self.scale > 0.1 {
            2.0
        } else {
            4.0
        };
        let factor = (1.0 - self.step * multiplier).clamp(0.0, 0.95);
        let next = self.scale * factor;
        self.scale = if next < BACKOFF_FLOOR { -1.0 } else { next };
        !self.is_exhausted()
    }
}
