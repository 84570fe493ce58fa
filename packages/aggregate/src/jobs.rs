//! Job-distribution masks restricting the index to areas of interest.

use geest_raster::ScoreRaster;
use geo::{BoundingRect, Buffer, Geometry, Intersects, Point, Polygon};
use rstar::{AABB, RTree, RTreeObject};

#[derive(Debug, Clone)]
struct MaskEntry {
    polygon: Polygon<f64>,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for MaskEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

impl MaskEntry {
    fn new(polygon: Polygon<f64>) -> Option<Self> {
        let rect = polygon.bounding_rect()?;
        Some(Self {
            envelope: AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y]),
            polygon,
        })
    }
}

#[derive(Debug)]
enum MaskSource {
    /// Polygon footprints, either given or produced by buffering points.
    Areas(RTree<MaskEntry>),
    /// Density raster; cells with a positive value are kept.
    Density(ScoreRaster),
}

/// Where jobs are. Index cells whose centre falls outside the mask become
/// no-data.
#[derive(Debug)]
pub struct JobsMask {
    source: MaskSource,
}

impl JobsMask {
    /// Buffers every job location by `radius`.
    #[must_use]
    pub fn from_points<'a>(geometries: impl IntoIterator<Item = &'a Geometry<f64>>, radius: f64) -> Self {
        let polygons = geometries
            .into_iter()
            .flat_map(|g| g.buffer(radius).0)
            .collect::<Vec<_>>();
        Self::from_polygon_list(polygons)
    }

    /// Uses polygon footprints as they are. Non-polygonal geometries are
    /// ignored.
    #[must_use]
    pub fn from_polygons<'a>(geometries: impl IntoIterator<Item = &'a Geometry<f64>>) -> Self {
        let polygons = geometries
            .into_iter()
            .flat_map(|g| match g {
                Geometry::Polygon(p) => vec![p.clone()],
                Geometry::MultiPolygon(mp) => mp.0.clone(),
                Geometry::Rect(r) => vec![r.to_polygon()],
                _ => Vec::new(),
            })
            .collect::<Vec<_>>();
        Self::from_polygon_list(polygons)
    }

    #[must_use]
    pub const fn from_raster(density: ScoreRaster) -> Self {
        Self {
            source: MaskSource::Density(density),
        }
    }

    fn from_polygon_list(polygons: Vec<Polygon<f64>>) -> Self {
        let entries: Vec<MaskEntry> = polygons.into_iter().filter_map(MaskEntry::new).collect();
        log::debug!("Jobs mask built from {} polygons", entries.len());
        Self {
            source: MaskSource::Areas(RTree::bulk_load(entries)),
        }
    }

    /// Returns `true` when `(x, y)` lies in a job area.
    #[must_use]
    pub fn contains(&self, x: f64, y: f64) -> bool {
        match &self.source {
            MaskSource::Areas(tree) => {
                let point = Point::new(x, y);
                tree.locate_in_envelope_intersecting(&AABB::from_point([x, y]))
                    .any(|e| e.polygon.intersects(&point))
            }
            MaskSource::Density(raster) => raster.sample(x, y).is_some_and(|v| v > 0.0),
        }
    }

    /// Copy of `index` with every cell outside the mask set to no-data.
    #[must_use]
    pub fn apply(&self, index: &ScoreRaster) -> ScoreRaster {
        let transform = *index.transform();
        let mut out = index.clone();
        let outside: Vec<(usize, usize)> = index
            .valid_cells()
            .filter(|(row, col, _)| {
                let c = transform.cell_center(*row, *col);
                !self.contains(c.x, c.y)
            })
            .map(|(row, col, _)| (row, col))
            .collect();
        for (row, col) in &outside {
            out.set(*row, *col, None);
        }
        log::info!(
            "Jobs mask kept {} of {} index cells",
            out.valid_count(),
            index.valid_count()
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use geest_grid::GeoTransform;
    use geo::polygon;

    use super::*;

    fn index() -> ScoreRaster {
        ScoreRaster::from_vec(GeoTransform::new(0.0, 100.0, 100.0), 1, 5, vec![3.0; 5]).unwrap()
    }

    #[test]
    fn buffered_points_keep_nearby_cells() {
        let sites = [Geometry::Point(Point::new(50.0, 50.0))];
        let mask = JobsMask::from_points(&sites, 120.0);
        let out = mask.apply(&index());
        assert_eq!(out.get(0, 0), Some(3.0));
        assert_eq!(out.get(0, 1), Some(3.0));
        assert_eq!(out.get(0, 2), None);
        assert_eq!(out.valid_count(), 2);
    }

    #[test]
    fn polygons_mask_by_cell_centre() {
        let estate = Geometry::Polygon(polygon![
            (x: 280.0, y: 0.0),
            (x: 500.0, y: 0.0),
            (x: 500.0, y: 100.0),
            (x: 280.0, y: 100.0),
        ]);
        let line = Geometry::Point(Point::new(0.0, 0.0));
        let mask = JobsMask::from_polygons([&estate, &line]);
        let out = mask.apply(&index());
        assert_eq!(out.get(0, 2), None);
        assert_eq!(out.get(0, 3), Some(3.0));
        assert_eq!(out.get(0, 4), Some(3.0));
    }

    #[test]
    fn density_raster_keeps_positive_cells() {
        let density = ScoreRaster::from_vec(
            GeoTransform::new(0.0, 100.0, 100.0),
            1,
            5,
            vec![0.0, 12.0, geest_raster::NO_DATA, 1.0, 0.0],
        )
        .unwrap();
        let out = JobsMask::from_raster(density).apply(&index());
        let kept: Vec<usize> = out.valid_cells().map(|(_, c, _)| c).collect();
        assert_eq!(kept, vec![1, 3]);
    }
}
