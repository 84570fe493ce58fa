//! Burning per-cell scores onto the grid lattice and clipping to the part.

use geest_grid::AreaGrid;
use geo::{Intersects, Point, Polygon};

use crate::ScoreRaster;

/// Burns `scores` (indexed by [`CellId`](geest_grid::CellId)) onto a raster
/// aligned with `grid`, then clips it to the part boundary.
///
/// Excluded cells, cells without a score and lattice positions where no cell
/// was generated are left as no-data.
#[must_use]
pub fn rasterize(grid: &AreaGrid, scores: &[Option<f64>]) -> ScoreRaster {
    let (rows, cols) = grid.shape();
    let mut raster = ScoreRaster::empty(*grid.transform(), rows, cols);

    for cell in grid.land_cells() {
        if let Some(score) = scores.get(cell.id.index()).copied().flatten() {
            raster.set(cell.row, cell.col, Some(score));
        }
    }

    let cleared = mask_to_polygon(&mut raster, grid.boundary());
    if cleared > 0 {
        log::debug!("{}: clipped {cleared} edge cells", grid.part());
    }
    raster
}

/// Sets every valid cell whose centre lies outside `boundary` to no-data.
/// Returns the number of cells cleared.
pub fn mask_to_polygon(raster: &mut ScoreRaster, boundary: &Polygon<f64>) -> usize {
    let transform = *raster.transform();
    let outside: Vec<(usize, usize)> = raster
        .valid_cells()
        .filter(|(row, col, _)| {
            let center = Point::from(transform.cell_center(*row, *col));
            !boundary.intersects(&center)
        })
        .map(|(row, col, _)| (row, col))
        .collect();

    for (row, col) in &outside {
        raster.set(*row, *col, None);
    }
    outside.len()
}

#[cfg(test)]
mod tests {
    use geest_grid::GridBuilder;
    use geest_model_models::PartId;
    use geo::{MultiPolygon, polygon};

    use super::*;

    #[test]
    fn burns_land_scores_and_leaves_excluded_empty() {
        let square = polygon![
            (x: 0.0, y: 0.0),
            (x: 300.0, y: 0.0),
            (x: 300.0, y: 300.0),
            (x: 0.0, y: 300.0),
        ];
        let sea = polygon![
            (x: 0.0, y: 0.0),
            (x: 100.0, y: 0.0),
            (x: 100.0, y: 100.0),
            (x: 0.0, y: 100.0),
        ];
        let grid = GridBuilder::new(100.0, [0.0, 0.0])
            .unwrap()
            .with_exclusions(MultiPolygon(vec![sea]))
            .build_part(PartId::new("r", 0), &square)
            .unwrap();
        let scores = vec![Some(3.0); grid.cells().len()];

        let raster = rasterize(&grid, &scores);
        assert_eq!(raster.shape(), (3, 3));
        assert_eq!(raster.valid_count(), 8);
        // Bottom-left cell is sea.
        assert_eq!(raster.get(2, 0), None);
        assert_eq!(raster.get(0, 0), Some(3.0));
    }

    #[test]
    fn clips_cells_with_centre_outside_boundary() {
        let triangle = polygon![(x: 0.0, y: 0.0), (x: 300.0, y: 0.0), (x: 0.0, y: 300.0)];
        let grid = GridBuilder::new(100.0, [0.0, 0.0])
            .unwrap()
            .build_part(PartId::new("t", 0), &triangle)
            .unwrap();
        let scores = vec![Some(5.0); grid.cells().len()];

        let raster = rasterize(&grid, &scores);
        let t = raster.transform();
        for (row, col, _) in raster.valid_cells() {
            let c = t.cell_center(row, col);
            assert!(c.x + c.y <= 300.0, "cell ({row}, {col}) lies outside the part");
        }
        // Diagonal cells touch the hypotenuse but their centres sit on it,
        // so they survive; cells past it do not.
        assert_eq!(raster.get(1, 1), Some(5.0));
        assert_eq!(raster.get(0, 2), None);
    }
}
