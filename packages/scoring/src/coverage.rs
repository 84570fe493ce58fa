//! Percentage coverage of cells by buffered features.
//!
//! Each cell is split into `SUBDIVISIONS x SUBDIVISIONS` sub-pixels. A
//! buffer burns the sub-pixels whose centres it covers into a per-cell bit
//! mask; masks from different features are OR-ed, which gives the union of
//! buffers without ever materializing it. The block sum of a mask (its
//! population count) is the covered percentage, digitized through a
//! [`BinTable`].
//!
//! [`CoverageMode::Presence`] is the national-scale binary rule: any
//! intersection at all counts as covered, so a two-bin table scores it.

use std::collections::BTreeMap;

use geest_grid::{AreaGrid, CellId, CellIndex, GridCell};
use geest_tables::BinTable;
use geo::{Buffer, BoundingRect, Geometry, Intersects, Point, PreparedGeometry, Relate};

use crate::{CellScores, Feature, ProgressCallback, ScoreStats, ScoringError, Ticker};

/// Sub-pixels per cell edge.
pub const SUBDIVISIONS: usize = 10;

const SUBPIXELS: u32 = (SUBDIVISIONS * SUBDIVISIONS) as u32;
const FULL_MASK: u128 = (1u128 << SUBPIXELS) - 1;

/// How coverage is turned into a score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoverageMode {
    /// The covered percentage goes through the bin table.
    Percentage,
    /// Any intersection counts as covered.
    Presence,
}

#[derive(Debug, Clone, Copy, Default)]
struct CellCoverage {
    mask: u128,
    touched: bool,
}

impl CellCoverage {
    fn merge(&mut self, mask: u128) {
        self.mask |= mask;
        self.touched = true;
    }

    fn percent(self) -> f64 {
        f64::from(self.mask.count_ones()) * 100.0 / f64::from(SUBPIXELS)
    }
}

/// Scores cells by the share of their area inside point buffers.
#[derive(Debug, Clone)]
pub struct CoverageScorer<'a> {
    radius_m: f64,
    bins: &'a BinTable,
    mode: CoverageMode,
    progress_every: u64,
}

impl<'a> CoverageScorer<'a> {
    /// A scorer buffering every feature by `radius_m`. A zero radius uses
    /// polygon features as they are.
    ///
    /// # Errors
    ///
    /// Returns [`ScoringError::InvalidRadius`] for negative or non-finite
    /// radii.
    pub fn new(radius_m: f64, bins: &'a BinTable, mode: CoverageMode) -> Result<Self, ScoringError> {
        if !(radius_m.is_finite() && radius_m >= 0.0) {
            return Err(ScoringError::InvalidRadius { radius: radius_m });
        }
        Ok(Self {
            radius_m,
            bins,
            mode,
            progress_every: 1000,
        })
    }

    #[must_use]
    pub const fn progress_every(mut self, every: u64) -> Self {
        self.progress_every = every;
        self
    }

    /// Score for a covered percentage.
    #[must_use]
    pub fn digitize(&self, percent: f64) -> f64 {
        self.bins.score(percent)
    }

    /// Scores every land cell of `grid`. Cells no buffer reaches have 0%
    /// coverage.
    pub fn score<'f>(
        &self,
        grid: &AreaGrid,
        index: &CellIndex,
        features: impl IntoIterator<Item = &'f Feature>,
        progress: &dyn ProgressCallback,
    ) -> (CellScores, ScoreStats) {
        let mut coverage: BTreeMap<CellId, CellCoverage> = BTreeMap::new();
        let mut stats = ScoreStats::default();
        let mut ticker = Ticker::new(progress, self.progress_every);

        for feature in features {
            stats.features += 1;
            ticker.tick();

            let Some((geometry, _)) = feature.valid_geometry() else {
                stats.invalid_geometry += 1;
                continue;
            };
            let buffer = if self.radius_m > 0.0 {
                Geometry::MultiPolygon(geometry.buffer(self.radius_m))
            } else {
                geometry.clone()
            };
            let Some(bounds) = buffer.bounding_rect() else {
                continue;
            };

            let candidates = index.candidates(&bounds);
            if candidates.is_empty() {
                continue;
            }
            let prepared = PreparedGeometry::from(&buffer);
            for cell in grid.cells_by_ids(&candidates) {
                let matrix = prepared.relate(&cell.rect.to_polygon());
                if !matrix.is_intersects() {
                    continue;
                }
                let mask = if matrix.is_covers() {
                    FULL_MASK
                } else {
                    subpixel_mask(cell, &buffer)
                };
                coverage.entry(cell.id).or_default().merge(mask);
            }
        }

        let minimum = 100.0 / f64::from(SUBPIXELS);
        let scores = CellScores::from_land(grid, |id| {
            let cell = coverage.get(&id).copied().unwrap_or_default();
            let percent = match self.mode {
                CoverageMode::Percentage => cell.percent(),
                CoverageMode::Presence if cell.touched => cell.percent().max(minimum),
                CoverageMode::Presence => 0.0,
            };
            Some(self.digitize(percent))
        });
        (scores, stats)
    }
}

#[allow(clippy::cast_precision_loss)]
fn subpixel_mask(cell: &GridCell, buffer: &Geometry<f64>) -> u128 {
    let step = cell.rect.width() / SUBDIVISIONS as f64;
    let origin = cell.rect.min();
    let mut mask = 0u128;
    for sy in 0..SUBDIVISIONS {
        for sx in 0..SUBDIVISIONS {
            let x = (sx as f64 + 0.5).mul_add(step, origin.x);
            let y = (sy as f64 + 0.5).mul_add(step, origin.y);
            if buffer.intersects(&Point::new(x, y)) {
                mask |= 1u128 << (sy * SUBDIVISIONS + sx);
            }
        }
    }
    mask
}

#[cfg(test)]
mod tests {
    use geest_grid::GridBuilder;
    use geest_model_models::PartId;
    use geest_tables::TableSet;
    use geo::{Rect, coord, polygon};

    use super::*;
    use crate::NullProgress;

    fn grid() -> AreaGrid {
        let square = polygon![
            (x: 0.0, y: 0.0),
            (x: 1000.0, y: 0.0),
            (x: 1000.0, y: 1000.0),
            (x: 0.0, y: 1000.0),
        ];
        GridBuilder::new(100.0, [0.0, 0.0])
            .unwrap()
            .build_part(PartId::new("c", 0), &square)
            .unwrap()
    }

    fn point(x: f64, y: f64) -> Feature {
        Feature::new(Some(Geometry::Point(Point::new(x, y))))
    }

    #[test]
    fn forty_five_percent_scores_two() {
        let tables = TableSet::embedded();
        let bins = tables.bins("lighting_coverage").unwrap();
        let scorer = CoverageScorer::new(0.0, bins, CoverageMode::Percentage).unwrap();
        assert!((scorer.digitize(45.0) - 2.0).abs() < f64::EPSILON);

        // Covers 5 of 10 sub-pixel columns and 9 of 10 rows of cell (9, 0).
        let patch = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 48.0, y: 88.0 });
        let features = [Feature::new(Some(Geometry::Polygon(patch.to_polygon())))];
        let grid = grid();
        let index = CellIndex::build(&grid);
        let (scores, _) = scorer.score(&grid, &index, &features, &NullProgress);

        let cell = grid.cell_containing(50.0, 50.0).unwrap().id;
        assert_eq!(scores.get(cell), Some(2.0));
        let elsewhere = grid.cell_containing(550.0, 550.0).unwrap().id;
        assert_eq!(scores.get(elsewhere), Some(0.0));
    }

    #[test]
    fn fully_covered_cell_scores_five() {
        let tables = TableSet::embedded();
        let scorer =
            CoverageScorer::new(400.0, tables.bins("lighting_coverage").unwrap(), CoverageMode::Percentage)
                .unwrap();
        let grid = grid();
        let index = CellIndex::build(&grid);
        let (scores, _) = scorer.score(&grid, &index, &[point(550.0, 550.0)], &NullProgress);
        assert_eq!(scores.get(grid.cell_containing(550.0, 550.0).unwrap().id), Some(5.0));
    }

    #[test]
    fn overlapping_buffers_count_once() {
        let tables = TableSet::embedded();
        let bins = tables.bins("lighting_coverage").unwrap();
        let scorer = CoverageScorer::new(0.0, bins, CoverageMode::Percentage).unwrap();
        let patch = Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 48.0, y: 88.0 });
        let one = Feature::new(Some(Geometry::Polygon(patch.to_polygon())));
        let grid = grid();
        let index = CellIndex::build(&grid);

        let (single, _) = scorer.score(&grid, &index, std::slice::from_ref(&one), &NullProgress);
        let (doubled, _) = scorer.score(&grid, &index, &[one.clone(), one], &NullProgress);
        assert_eq!(single, doubled);
    }

    #[test]
    fn larger_radius_never_lowers_a_score() {
        let tables = TableSet::embedded();
        let bins = tables.bins("lighting_coverage").unwrap();
        let grid = grid();
        let index = CellIndex::build(&grid);
        let lights = [point(130.0, 170.0), point(420.0, 610.0), point(800.0, 240.0)];

        let mut previous: Option<CellScores> = None;
        for radius in [50.0, 120.0, 200.0, 350.0] {
            let scorer = CoverageScorer::new(radius, bins, CoverageMode::Percentage).unwrap();
            let (scores, _) = scorer.score(&grid, &index, &lights, &NullProgress);
            if let Some(prev) = &previous {
                for cell in grid.land_cells() {
                    assert!(
                        scores.get(cell.id) >= prev.get(cell.id),
                        "radius {radius} lowered cell ({}, {})",
                        cell.row,
                        cell.col
                    );
                }
            }
            previous = Some(scores);
        }
    }

    #[test]
    fn presence_mode_scores_any_touch_as_maximum() {
        let tables = TableSet::embedded();
        let scorer =
            CoverageScorer::new(30.0, tables.bins("binary_coverage").unwrap(), CoverageMode::Presence)
                .unwrap();
        let grid = grid();
        let index = CellIndex::build(&grid);
        // The buffer just clips the corner of the neighbouring cells.
        let (scores, _) = scorer.score(&grid, &index, &[point(195.0, 195.0)], &NullProgress);

        assert_eq!(scores.get(grid.cell_containing(150.0, 150.0).unwrap().id), Some(5.0));
        assert_eq!(scores.get(grid.cell_containing(250.0, 250.0).unwrap().id), Some(5.0));
        assert_eq!(scores.get(grid.cell_containing(750.0, 750.0).unwrap().id), Some(0.0));
    }

    #[test]
    fn rejects_negative_radius() {
        let tables = TableSet::embedded();
        let bins = tables.bins("lighting_coverage").unwrap();
        assert!(CoverageScorer::new(-1.0, bins, CoverageMode::Percentage).is_err());
    }
}
