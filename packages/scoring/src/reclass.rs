//! Linear and step reclassification of numeric and polygon inputs.

use geest_grid::{AreaGrid, CellIndex};
use geest_model_models::{MAX_SCORE, clamp_score};
use geest_raster::ScoreRaster;
use geest_tables::{BandTable, ScoringRule};
use geo::{Geometry, Intersects, MultiPolygon, Point};

use crate::cells::intersecting_cells;
use crate::{
    CellScores, Feature, MaxWins, ProgressCallback, ScoreMap, ScoreStats, Scored, ScoringError,
    Ticker,
};

/// `5 * (v - min) / (max - min)`, clipped to the 0-5 scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearRescale {
    min: f64,
    max: f64,
}

impl LinearRescale {
    /// # Errors
    ///
    /// Returns [`ScoringError::InvalidDomain`] unless `min < max` and both
    /// are finite.
    pub fn new(min: f64, max: f64) -> Result<Self, ScoringError> {
        if min.is_finite() && max.is_finite() && min < max {
            Ok(Self { min, max })
        } else {
            Err(ScoringError::InvalidDomain { min, max })
        }
    }

    #[must_use]
    pub fn score(&self, value: f64) -> f64 {
        clamp_score(MAX_SCORE * (value - self.min) / (self.max - self.min))
    }
}

/// Applies one national index value to every land cell of the grid.
#[must_use]
pub fn index_value_scores(grid: &AreaGrid, value: f64, rescale: &LinearRescale) -> CellScores {
    let score = rescale.score(value);
    CellScores::from_land(grid, |_| Some(score))
}

/// Samples a continuous raster at every land cell centre and maps the
/// sample (`None` for no-data or outside the raster) through `reclass`.
#[must_use]
pub fn sample_raster(
    grid: &AreaGrid,
    raster: &ScoreRaster,
    reclass: impl Fn(Option<f64>) -> Option<f64>,
) -> CellScores {
    let transform = grid.transform();
    CellScores::from_land(grid, |id| {
        let cell = grid.cell(id)?;
        let center = transform.cell_center(cell.row, cell.col);
        reclass(raster.sample(center.x, center.y))
    })
}

/// How a polygon's attribute becomes a score.
#[derive(Debug, Clone, Copy)]
pub enum PolygonValue<'a> {
    /// Categorical lookup.
    Rule {
        /// Attribute read.
        field: &'a str,
        /// Lookup table.
        rule: &'a ScoringRule,
    },
    /// Linear rescale of a numeric attribute.
    Linear {
        /// Attribute read.
        field: &'a str,
        /// Domain.
        rescale: LinearRescale,
    },
    /// Band table over a numeric attribute; missing values take the
    /// table's no-data score.
    Bands {
        /// Attribute read.
        field: &'a str,
        /// Band table.
        bands: &'a BandTable,
    },
}

impl PolygonValue<'_> {
    /// Score of one polygon feature.
    #[must_use]
    pub fn score(&self, feature: &Feature) -> Option<f64> {
        match self {
            Self::Rule { field, rule } => feature.text(field).and_then(|v| rule.score(&v)),
            Self::Linear { field, rescale } => feature.number(field).map(|v| rescale.score(v)),
            Self::Bands { field, bands } => Some(bands.score(feature.number(field))),
        }
    }
}

/// Burns polygon scores at cell centres, optionally restricted to a
/// sub-mask (e.g. urban settlement polygons).
#[derive(Debug, Clone)]
pub struct PolygonBurner<'a> {
    value: PolygonValue<'a>,
    sub_mask: Option<&'a MultiPolygon<f64>>,
    progress_every: u64,
}

impl<'a> PolygonBurner<'a> {
    #[must_use]
    pub const fn new(value: PolygonValue<'a>) -> Self {
        Self {
            value,
            sub_mask: None,
            progress_every: 1000,
        }
    }

    /// Only cells whose centre lies inside `mask` receive a burned score.
    #[must_use]
    pub const fn sub_mask(mut self, mask: &'a MultiPolygon<f64>) -> Self {
        self.sub_mask = Some(mask);
        self
    }

    #[must_use]
    pub const fn progress_every(mut self, every: u64) -> Self {
        self.progress_every = every;
        self
    }

    /// Burns every feature. Overlapping polygons resolve to the best score.
    /// Non-polygonal features score every cell they touch.
    pub fn burn<'f>(
        &self,
        grid: &AreaGrid,
        index: &CellIndex,
        features: impl IntoIterator<Item = &'f Feature>,
        progress: &dyn ProgressCallback,
    ) -> Scored<MaxWins> {
        let mut map = ScoreMap::new();
        let mut stats = ScoreStats::default();
        let mut ticker = Ticker::new(progress, self.progress_every);
        let transform = grid.transform();

        for feature in features {
            stats.features += 1;
            ticker.tick();

            let Some((geometry, bounds)) = feature.valid_geometry() else {
                stats.invalid_geometry += 1;
                continue;
            };
            let Some(score) = self.value.score(feature) else {
                stats.unscored += 1;
                continue;
            };

            let cells = if is_polygonal(geometry) {
                index
                    .candidates(&bounds)
                    .into_iter()
                    .filter(|id| {
                        grid.cell(*id).is_some_and(|cell| {
                            let c = transform.cell_center(cell.row, cell.col);
                            geometry.intersects(&Point::from(c))
                        })
                    })
                    .collect()
            } else {
                intersecting_cells(grid, index, geometry, &bounds)
            };

            for id in cells {
                if self.in_mask(grid, id) {
                    map.apply(id, score);
                }
            }
        }

        Scored { map, stats }
    }

    /// Dense scores for a burn result. Cells outside the sub-mask are
    /// no-data; untouched cells inside it score `untouched`.
    #[must_use]
    pub fn finish(&self, grid: &AreaGrid, map: &ScoreMap<MaxWins>, untouched: f64) -> CellScores {
        CellScores::from_land(grid, |id| {
            self.in_mask(grid, id).then(|| map.get(id).unwrap_or(untouched))
        })
    }

    fn in_mask(&self, grid: &AreaGrid, id: geest_grid::CellId) -> bool {
        let Some(mask) = self.sub_mask else {
            return true;
        };
        grid.cell(id).is_some_and(|cell| {
            let c = grid.transform().cell_center(cell.row, cell.col);
            mask.intersects(&Point::from(c))
        })
    }
}

const fn is_polygonal(geometry: &Geometry<f64>) -> bool {
    matches!(
        geometry,
        Geometry::Polygon(_) | Geometry::MultiPolygon(_) | Geometry::Rect(_) | Geometry::Triangle(_)
    )
}
