//! Dense per-cell scores of one grid.

use geest_grid::{AreaGrid, CellId, CellIndex};
use geest_model_models::clamp_score;
use geest_raster::{ScoreRaster, rasterize};
use geo::{Geometry, PreparedGeometry, Rect, Relate};

/// One optional score per grid cell, indexed by [`CellId`]. Excluded cells
/// are always `None`.
#[derive(Debug, Clone, PartialEq)]
pub struct CellScores {
    values: Vec<Option<f64>>,
}

impl CellScores {
    /// Scores every land cell with `f`, clamped to the 0-5 scale.
    #[must_use]
    pub fn from_land(grid: &AreaGrid, f: impl Fn(CellId) -> Option<f64>) -> Self {
        let values = grid
            .cells()
            .iter()
            .map(|cell| {
                if cell.is_land() {
                    f(cell.id).map(clamp_score)
                } else {
                    None
                }
            })
            .collect();
        Self { values }
    }

    /// Score of a cell.
    #[must_use]
    pub fn get(&self, id: CellId) -> Option<f64> {
        self.values.get(id.index()).copied().flatten()
    }

    /// Raw values by cell index.
    #[must_use]
    pub fn as_slice(&self) -> &[Option<f64>] {
        &self.values
    }

    /// Number of scored cells.
    #[must_use]
    pub fn scored_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }

    /// Burns the scores onto the grid lattice, clipped to the part.
    #[must_use]
    pub fn to_raster(&self, grid: &AreaGrid) -> ScoreRaster {
        rasterize(grid, &self.values)
    }
}

/// Land cells whose rectangle intersects `geometry`.
///
/// The R-tree narrows candidates by bounding box; each candidate is then
/// tested exactly against a prepared form of the geometry. Ids come back
/// sorted.
#[must_use]
pub fn intersecting_cells(
    grid: &AreaGrid,
    index: &CellIndex,
    geometry: &Geometry<f64>,
    bounds: &Rect<f64>,
) -> Vec<CellId> {
    let candidates = index.candidates(bounds);
    if candidates.is_empty() {
        return candidates;
    }
    let prepared = PreparedGeometry::from(geometry);
    grid.cells_by_ids(&candidates)
        .filter(|cell| prepared.relate(&cell.rect.to_polygon()).is_intersects())
        .map(|cell| cell.id)
        .collect()
}
