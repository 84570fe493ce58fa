//! Severity buffers around events.
//!
//! This is the inverse of the classification scorer: every event buffers
//! its location by the category radius (or a per-event override) and each
//! cell keeps the *lowest* score of all buffers touching it ([`MinWins`]).
//! Cells no buffer touches carry no negative signal and score 5.

use geest_grid::{AreaGrid, CellIndex};
use geest_model_models::MAX_SCORE;
use geest_tables::EventTable;
use geo::{Buffer, BoundingRect, Geometry};

use crate::cells::intersecting_cells;
use crate::{Feature, MinWins, ProgressCallback, ScoreMap, ScoreStats, Scored, Ticker};

/// Score for land cells no event buffer reaches.
pub const UNTOUCHED_SEVERITY: f64 = MAX_SCORE;

/// Scores event points by category severity, most severe wins.
#[derive(Debug, Clone)]
pub struct SeverityScorer<'a> {
    table: &'a EventTable,
    category_field: &'a str,
    radius_field: Option<&'a str>,
    progress_every: u64,
}

impl<'a> SeverityScorer<'a> {
    #[must_use]
    pub const fn new(table: &'a EventTable, category_field: &'a str) -> Self {
        Self {
            table,
            category_field,
            radius_field: None,
            progress_every: 1000,
        }
    }

    /// Reads a per-event radius (metres) that overrides the category
    /// default when present and positive.
    #[must_use]
    pub const fn radius_field(mut self, field: &'a str) -> Self {
        self.radius_field = Some(field);
        self
    }

    #[must_use]
    pub const fn progress_every(mut self, every: u64) -> Self {
        self.progress_every = every;
        self
    }

    /// Buffer radius and severity of one event.
    #[must_use]
    pub fn event_rule(&self, feature: &Feature) -> Option<(f64, f64)> {
        let category = feature.text(self.category_field)?;
        let rule = self.table.rule(&category)?;
        let radius = self
            .radius_field
            .and_then(|field| feature.number(field))
            .filter(|r| *r > 0.0)
            .unwrap_or(rule.radius_m);
        Some((radius, rule.score))
    }

    /// Folds every event buffer into a score map over `grid`. Use
    /// [`ScoreMap::finish`] with [`UNTOUCHED_SEVERITY`] for the dense form.
    pub fn score<'f>(
        &self,
        grid: &AreaGrid,
        index: &CellIndex,
        features: impl IntoIterator<Item = &'f Feature>,
        progress: &dyn ProgressCallback,
    ) -> Scored<MinWins> {
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
            let Some((radius, score)) = self.event_rule(feature) else {
                stats.unscored += 1;
                continue;
            };

            let buffer = Geometry::MultiPolygon(geometry.buffer(radius));
            let Some(bounds) = buffer.bounding_rect() else {
                continue;
            };
            for cell in intersecting_cells(grid, index, &buffer, &bounds) {
                map.apply(cell, score);
            }
        }

        Scored { map, stats }
    }
}

#[cfg(test)]
mod tests {
    use geest_grid::GridBuilder;
    use geest_model_models::PartId;
    use geest_tables::TableSet;
    use geo::{Point, polygon};

    use super::*;
    use crate::NullProgress;

    fn grid() -> AreaGrid {
        let square = polygon![
            (x: 0.0, y: 0.0),
            (x: 20_000.0, y: 0.0),
            (x: 20_000.0, y: 20_000.0),
            (x: 0.0, y: 20_000.0),
        ];
        GridBuilder::new(1000.0, [0.0, 0.0])
            .unwrap()
            .build_part(PartId::new("s", 0), &square)
            .unwrap()
    }

    fn event(x: f64, y: f64, kind: &str) -> Feature {
        Feature::new(Some(Geometry::Point(Point::new(x, y)))).with("event_type", kind)
    }

    #[test]
    fn most_severe_buffer_wins_and_untouched_scores_five() {
        let tables = TableSet::embedded();
        let scorer = SeverityScorer::new(tables.events("acled_events").unwrap(), "event_type");
        let grid = grid();
        let index = CellIndex::build(&grid);

        let events = [
            event(5_500.0, 5_500.0, "Battles"),
            event(5_500.0, 5_500.0, "Protests"),
            event(14_500.0, 14_500.0, "Protests"),
        ];
        let dense = scorer
            .score(&grid, &index, &events, &NullProgress)
            .map
            .finish(&grid, UNTOUCHED_SEVERITY);

        let shared = grid.cell_containing(5_500.0, 5_500.0).unwrap().id;
        assert_eq!(dense.get(shared), Some(0.0));
        let protest = grid.cell_containing(14_500.0, 14_500.0).unwrap().id;
        assert_eq!(dense.get(protest), Some(4.0));
        let quiet = grid.cell_containing(19_500.0, 500.0).unwrap().id;
        assert_eq!(dense.get(quiet), Some(5.0));
    }

    #[test]
    fn per_event_radius_overrides_category_default() {
        let tables = TableSet::embedded();
        let table = tables.events("acled_events").unwrap();
        let scorer = SeverityScorer::new(table, "event_type").radius_field("radius");
        let grid = grid();
        let index = CellIndex::build(&grid);

        let plain = [event(10_500.0, 10_500.0, "protests")];
        let wide = [event(10_500.0, 10_500.0, "protests").with("radius", 4_000.0)];

        let narrow = scorer.score(&grid, &index, &plain, &NullProgress).map;
        let widened = scorer.score(&grid, &index, &wide, &NullProgress).map;
        assert!(widened.len() > narrow.len());

        let far = grid.cell_containing(13_500.0, 10_500.0).unwrap().id;
        assert_eq!(narrow.get(far), None);
        assert_eq!(widened.get(far), Some(4.0));
    }

    #[test]
    fn unknown_categories_are_unscored() {
        let tables = TableSet::embedded();
        let scorer = SeverityScorer::new(tables.events("acled_events").unwrap(), "event_type");
        let grid = grid();
        let index = CellIndex::build(&grid);
        let scored = scorer.score(&grid, &index, &[event(500.0, 500.0, "parade")], &NullProgress);
        assert!(scored.map.is_empty());
        assert_eq!(scored.stats.unscored, 1);
    }
}
