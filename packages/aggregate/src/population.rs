//! Population tertiles and the 15-class combined index.
//!
//! The composite is cut into five enablement levels (`(0,1]` is level 1,
//! `(4,5]` level 5) and the population raster into three tertiles. The
//! combined class is `(level - 1) * 3 + tertile`, so 1 is "not enabling,
//! low population" and 15 is "highly enabling, high population".

use geest_model_models::{MAX_COMBINED_SCORE, MAX_SCORE};
use geest_raster::ScoreRaster;

use crate::AggregateError;

/// Number of enablement levels the composite is cut into.
pub const ENABLEMENT_LEVELS: u8 = 5;

/// Tertile breakpoints over positive population values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PopulationTertiles {
    /// Upper bound of the low tertile.
    pub low: f64,
    /// Upper bound of the medium tertile.
    pub high: f64,
}

impl PopulationTertiles {
    /// Nearest-rank 1/3 and 2/3 quantiles of the positive valid values.
    ///
    /// # Errors
    ///
    /// Returns [`AggregateError::EmptyPopulation`] if no cell holds a
    /// positive value.
    pub fn from_raster(population: &ScoreRaster) -> Result<Self, AggregateError> {
        let mut values: Vec<f64> = population
            .valid_cells()
            .map(|(_, _, v)| v)
            .filter(|v| *v > 0.0)
            .collect();
        if values.is_empty() {
            return Err(AggregateError::EmptyPopulation);
        }
        values.sort_by(f64::total_cmp);

        let rank = |numerator: usize| {
            let index = (values.len() * numerator).div_ceil(3).saturating_sub(1);
            values[index.min(values.len() - 1)]
        };
        Ok(Self {
            low: rank(1),
            high: rank(2),
        })
    }

    /// Tertile (1, 2 or 3) of a population value. Missing and non-positive
    /// values fall in the low tertile.
    #[must_use]
    pub fn tertile(&self, value: Option<f64>) -> u8 {
        match value {
            Some(v) if v > self.high => 3,
            Some(v) if v > self.low => 2,
            _ => 1,
        }
    }
}

/// Enablement level (1-5) of a composite score.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn enablement_level(score: f64) -> u8 {
    let clamped = score.clamp(0.0, MAX_SCORE);
    (clamped.ceil() as u8).clamp(1, ENABLEMENT_LEVELS)
}

/// Combines the composite index with population tertiles sampled at each
/// index cell centre. Index no-data stays no-data.
///
/// # Errors
///
/// Returns [`AggregateError::EmptyPopulation`] if the population raster has
/// no positive values.
pub fn combine_population(
    index: &ScoreRaster,
    population: &ScoreRaster,
) -> Result<ScoreRaster, AggregateError> {
    let tertiles = PopulationTertiles::from_raster(population)?;
    log::info!(
        "Population tertile breaks: {:.3} / {:.3}",
        tertiles.low,
        tertiles.high
    );

    let transform = *index.transform();
    let (rows, cols) = index.shape();
    let mut out = ScoreRaster::empty(transform, rows, cols);

    for (row, col, score) in index.valid_cells() {
        let center = transform.cell_center(row, col);
        let tertile = tertiles.tertile(population.sample(center.x, center.y));
        let combined = f64::from((enablement_level(score) - 1) * 3 + tertile);
        out.set(row, col, Some(combined.min(MAX_COMBINED_SCORE)));
    }

    Ok(out)
}
