//! Distance rings around points of interest.
//!
//! Concentric Euclidean buffers stand in for travel-time isochrones: ring
//! `i` (distance `thresholds[i]`) scores `scores[i]`, by default `5 - i`.
//! Rings nest, so folding every ring with [`MaxWins`] leaves each cell the
//! score of the innermost ring that reaches it. Cells beyond the last ring
//! score 0.

use geest_grid::{AreaGrid, CellIndex};
use geest_model_models::{MAX_SCORE, MIN_SCORE, TravelMode};
use geo::{Buffer, BoundingRect, Geometry};

use crate::cells::intersecting_cells;
use crate::{Feature, MaxWins, ProgressCallback, ScoreMap, ScoreStats, Scored, ScoringError, Ticker};

/// Scores cells by distance band to the nearest point of interest.
#[derive(Debug, Clone)]
pub struct MultiBufferScorer {
    rings: Vec<(f64, f64)>,
    travel_mode: TravelMode,
    progress_every: u64,
}

impl MultiBufferScorer {
    /// Builds rings from strictly increasing distances. With no explicit
    /// scores, ring `i` scores `5 - i` (never below 0).
    ///
    /// # Errors
    ///
    /// Returns [`ScoringError::InvalidThresholds`] if the distances are
    /// empty, not positive and increasing, or do not pair with `scores`.
    #[allow(clippy::cast_precision_loss)]
    pub fn new(
        thresholds: &[f64],
        scores: &[f64],
        travel_mode: TravelMode,
    ) -> Result<Self, ScoringError> {
        let invalid = |message: String| ScoringError::InvalidThresholds { message };

        if thresholds.is_empty() {
            return Err(invalid("at least one ring distance is required".to_string()));
        }
        if !scores.is_empty() && scores.len() != thresholds.len() {
            return Err(invalid(format!(
                "{} distances but {} scores",
                thresholds.len(),
                scores.len()
            )));
        }
        if thresholds.iter().any(|d| !(d.is_finite() && *d > 0.0))
            || thresholds.windows(2).any(|w| w[1] <= w[0])
        {
            return Err(invalid(format!(
                "ring distances must be positive and increasing: {thresholds:?}"
            )));
        }

        let rings = thresholds
            .iter()
            .enumerate()
            .map(|(i, &distance)| {
                let score = scores
                    .get(i)
                    .copied()
                    .unwrap_or_else(|| (MAX_SCORE - i as f64).max(MIN_SCORE));
                (distance, score)
            })
            .collect();

        Ok(Self {
            rings,
            travel_mode,
            progress_every: 1000,
        })
    }

    #[must_use]
    pub const fn progress_every(mut self, every: u64) -> Self {
        self.progress_every = every;
        self
    }

    /// Travel mode the rings stand in for; recorded in output metadata.
    #[must_use]
    pub const fn travel_mode(&self) -> TravelMode {
        self.travel_mode
    }

    /// `(distance, score)` per ring, innermost first.
    #[must_use]
    pub fn rings(&self) -> &[(f64, f64)] {
        &self.rings
    }

    /// Folds every ring of every feature into a score map over `grid`.
    pub fn score<'f>(
        &self,
        grid: &AreaGrid,
        index: &CellIndex,
        features: impl IntoIterator<Item = &'f Feature>,
        progress: &dyn ProgressCallback,
    ) -> Scored<MaxWins> {
        let mut map = ScoreMap::new();
        let mut stats = ScoreStats::default();
        let mut ticker = Ticker::new(progress, self.progress_every);

        for feature in features {
            stats.features += 1;
            ticker.tick();

            let Some((geometry, _)) = feature.valid_geometry() else {
                stats.invalid_geometry += 1;
                continue;
            };

            for &(distance, score) in &self.rings {
                let ring = Geometry::MultiPolygon(geometry.buffer(distance));
                let Some(bounds) = ring.bounding_rect() else {
                    continue;
                };
                for cell in intersecting_cells(grid, index, &ring, &bounds) {
                    map.apply(cell, score);
                }
            }
        }

        Scored { map, stats }
    }
}
