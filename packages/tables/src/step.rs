//! Explicit step functions over numeric values.
//!
//! Both tables are ordered lists of `(threshold, score)` pairs rather than
//! parallel threshold/score arrays:
//!
//! * [`BinTable`] uses inclusive *lower* bounds, the shape of coverage
//!   percentage bins (`0%`, `1-19%`, `20-39%`, ...).
//! * [`BandTable`] uses inclusive *upper* bounds, the shape of
//!   literature-defined hazard classes, with no-data and zero mapped to a
//!   dedicated no-hazard score.

use geest_model_models::{MAX_SCORE, MIN_SCORE};
use serde::{Deserialize, Serialize};

use crate::TableError;

/// One bin: values `>= lower` (up to the next bin) score `score`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bin {
    /// Inclusive lower bound.
    pub lower: f64,
    /// Score for values in this bin.
    pub score: f64,
}

/// Lower-bound step function (digitize semantics).
#[derive(Debug, Clone, PartialEq)]
pub struct BinTable {
    name: String,
    bins: Vec<Bin>,
}

impl BinTable {
    /// Builds a bin table.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::InvalidTable`] if the table is empty, bounds are
    /// not strictly increasing, or a score is outside `[0, 5]`.
    pub fn new(name: impl Into<String>, bins: Vec<Bin>) -> Result<Self, TableError> {
        let name = name.into();
        validate_steps(&name, bins.iter().map(|b| (b.lower, b.score)))?;
        Ok(Self { name, bins })
    }

    /// Builds a bin table from paired threshold and score lists.
    ///
    /// # Errors
    ///
    /// Same as [`BinTable::new`], plus a length mismatch.
    pub fn from_pairs(
        name: impl Into<String>,
        thresholds: &[f64],
        scores: &[f64],
    ) -> Result<Self, TableError> {
        let name = name.into();
        if thresholds.len() != scores.len() {
            return Err(TableError::InvalidTable {
                name,
                message: format!(
                    "{} thresholds but {} scores",
                    thresholds.len(),
                    scores.len()
                ),
            });
        }
        let bins = thresholds
            .iter()
            .zip(scores)
            .map(|(&lower, &score)| Bin { lower, score })
            .collect();
        Self::new(name, bins)
    }

    /// The two-bin presence rule: any positive value scores the maximum.
    #[must_use]
    pub fn binary(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bins: vec![
                Bin {
                    lower: 0.0,
                    score: MIN_SCORE,
                },
                Bin {
                    lower: f64::MIN_POSITIVE,
                    score: MAX_SCORE,
                },
            ],
        }
    }

    /// Table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ordered bins.
    #[must_use]
    pub fn bins(&self) -> &[Bin] {
        &self.bins
    }

    /// Scores a value: the last bin whose lower bound is `<= value`. Values
    /// below the first bound (and `NaN`) fall into the first bin.
    #[must_use]
    pub fn score(&self, value: f64) -> f64 {
        let idx = self.bins.partition_point(|b| b.lower <= value);
        self.bins[idx.saturating_sub(1)].score
    }
}

/// One band: values `<= upper` (and above the previous band) score `score`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Band {
    /// Inclusive upper bound.
    pub upper: f64,
    /// Score for values in this band.
    pub score: f64,
}

/// Upper-bound step function for hazard-style classes.
#[derive(Debug, Clone, PartialEq)]
pub struct BandTable {
    name: String,
    bands: Vec<Band>,
    no_data_score: f64,
}

impl BandTable {
    /// Builds a band table.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::InvalidTable`] if the table is empty, bounds are
    /// not strictly increasing, or any score is outside `[0, 5]`.
    pub fn new(
        name: impl Into<String>,
        bands: Vec<Band>,
        no_data_score: f64,
    ) -> Result<Self, TableError> {
        let name = name.into();
        validate_steps(&name, bands.iter().map(|b| (b.upper, b.score)))?;
        if !(MIN_SCORE..=MAX_SCORE).contains(&no_data_score) {
            return Err(TableError::InvalidTable {
                name,
                message: format!("no-data score {no_data_score} is outside [0, 5]"),
            });
        }
        Ok(Self {
            name,
            bands,
            no_data_score,
        })
    }

    /// Builds a band table from paired upper bounds and scores, using the
    /// maximum score for no-data.
    ///
    /// # Errors
    ///
    /// Same as [`BandTable::new`], plus a length mismatch.
    pub fn from_pairs(
        name: impl Into<String>,
        uppers: &[f64],
        scores: &[f64],
    ) -> Result<Self, TableError> {
        let name = name.into();
        if uppers.len() != scores.len() {
            return Err(TableError::InvalidTable {
                name,
                message: format!("{} bounds but {} scores", uppers.len(), scores.len()),
            });
        }
        let bands = uppers
            .iter()
            .zip(scores)
            .map(|(&upper, &score)| Band { upper, score })
            .collect();
        Self::new(name, bands, MAX_SCORE)
    }

    /// Table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ordered bands.
    #[must_use]
    pub fn bands(&self) -> &[Band] {
        &self.bands
    }

    /// Scores a value. No-data (`None`, `NaN`) and zero take the no-hazard
    /// score; values above the last bound take the last band's score.
    #[must_use]
    pub fn score(&self, value: Option<f64>) -> f64 {
        let Some(value) = value.filter(|v| !v.is_nan() && *v != 0.0) else {
            return self.no_data_score;
        };
        let idx = self.bands.partition_point(|b| b.upper < value);
        self.bands[idx.min(self.bands.len() - 1)].score
    }
}

fn validate_steps(
    name: &str,
    steps: impl Iterator<Item = (f64, f64)>,
) -> Result<(), TableError> {
    let mut previous: Option<f64> = None;
    let mut count = 0_usize;

    for (bound, score) in steps {
        count += 1;
        if !(MIN_SCORE..=MAX_SCORE).contains(&score) {
            return Err(TableError::InvalidTable {
                name: name.to_string(),
                message: format!("score {score} is outside [0, 5]"),
            });
        }
        if bound.is_nan() || previous.is_some_and(|p| p >= bound) {
            return Err(TableError::InvalidTable {
                name: name.to_string(),
                message: "bounds must be strictly increasing".to_string(),
            });
        }
        previous = Some(bound);
    }

    if count == 0 {
        return Err(TableError::InvalidTable {
            name: name.to_string(),
            message: "table has no steps".to_string(),
        });
    }

    Ok(())
}
