//! Per-cell feature scorer for line and point classification inputs.
//!
//! Each feature is scored on its own (the best of its primary and secondary
//! classifications) and that score is folded into every cell the geometry
//! touches with [`MaxWins`]: a cell crossed by a residential road and a
//! shared-lane cycleway keeps the better of the two.

use geest_grid::{AreaGrid, CellIndex};
use geest_tables::ScoringRule;

use crate::cells::intersecting_cells;
use crate::{Feature, MaxWins, ProgressCallback, ScoreMap, ScoreStats, Scored, Ticker};

/// A classification table applied to one attribute.
#[derive(Debug, Clone, Copy)]
pub struct AttributeRule<'a> {
    /// Attribute read from each feature.
    pub field: &'a str,
    /// Table mapping that attribute to a score.
    pub rule: &'a ScoringRule,
}

/// Scores line/point features onto grid cells, best score wins.
#[derive(Debug, Clone)]
pub struct FeatureScorer<'a> {
    rules: Vec<AttributeRule<'a>>,
    progress_every: u64,
}

impl<'a> FeatureScorer<'a> {
    #[must_use]
    pub fn new(rules: Vec<AttributeRule<'a>>) -> Self {
        Self {
            rules,
            progress_every: 1000,
        }
    }

    /// Sets how many features pass between progress updates.
    #[must_use]
    pub const fn progress_every(mut self, every: u64) -> Self {
        self.progress_every = every;
        self
    }

    /// The feature's own score: the maximum over every rule whose attribute
    /// is present and known to the table.
    #[must_use]
    pub fn feature_score(&self, feature: &Feature) -> Option<f64> {
        self.rules
            .iter()
            .filter_map(|r| feature.text(r.field).and_then(|v| r.rule.score(&v)))
            .reduce(f64::max)
    }

    /// Folds every feature into a score map over `grid`.
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

            let Some((geometry, bounds)) = feature.valid_geometry() else {
                stats.invalid_geometry += 1;
                log::debug!("{}: feature {} has no usable geometry", grid.part(), stats.features);
                continue;
            };
            let Some(score) = self.feature_score(feature) else {
                stats.unscored += 1;
                continue;
            };

            for cell in intersecting_cells(grid, index, geometry, &bounds) {
                map.apply(cell, score);
            }
        }

        Scored { map, stats }
    }
}
