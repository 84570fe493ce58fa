//! Majority class per administrative boundary.

use std::collections::BTreeMap;

use geest_raster::ScoreRaster;
use geo::{BoundingRect, Geometry, Intersects, Point};
use serde::Serialize;

/// Class counts and winning class of one boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoundarySummary {
    /// Boundary identifier.
    pub id: String,
    /// Most frequent class, ties resolved to the lowest class. `None` when
    /// the boundary covers no valid cell.
    pub majority: Option<u32>,
    /// Valid cells whose centre lies inside the boundary.
    pub cells: usize,
    /// Cells per class.
    pub counts: BTreeMap<u32, usize>,
}

/// Counts `classify(value)` over the valid cells whose centre lies in each
/// boundary and picks the most frequent class.
pub fn majority_by_boundary(
    raster: &ScoreRaster,
    boundaries: &[(String, Geometry<f64>)],
    classify: impl Fn(f64) -> Option<u32>,
) -> Vec<BoundarySummary> {
    let transform = *raster.transform();

    boundaries
        .iter()
        .map(|(id, geometry)| {
            let mut counts = BTreeMap::new();
            if let Some(bounds) = geometry.bounding_rect() {
                for (row, col, value) in raster.valid_cells() {
                    let c = transform.cell_center(row, col);
                    if c.x < bounds.min().x
                        || c.x > bounds.max().x
                        || c.y < bounds.min().y
                        || c.y > bounds.max().y
                    {
                        continue;
                    }
                    if !geometry.intersects(&Point::from(c)) {
                        continue;
                    }
                    if let Some(class) = classify(value) {
                        *counts.entry(class).or_insert(0_usize) += 1;
                    }
                }
            }

            // BTreeMap iterates ascending, so a strict `>` keeps the lowest
            // class on ties.
            let mut majority: Option<(u32, usize)> = None;
            for (&class, &count) in &counts {
                if majority.is_none_or(|(_, best)| count > best) {
                    majority = Some((class, count));
                }
            }

            let summary = BoundarySummary {
                id: id.clone(),
                majority: majority.map(|(class, _)| class),
                cells: counts.values().sum(),
                counts,
            };
            if summary.majority.is_none() {
                log::warn!("Boundary '{id}' covers no scored cells");
            }
            summary
        })
        .collect()
}

/// Paints each boundary's majority class onto the valid cells of
/// `template` whose centre it contains. Other cells become no-data.
#[must_use]
pub fn burn_majority(
    template: &ScoreRaster,
    boundaries: &[(String, Geometry<f64>)],
    summaries: &[BoundarySummary],
) -> ScoreRaster {
    let transform = *template.transform();
    let (rows, cols) = template.shape();
    let mut out = ScoreRaster::empty(transform, rows, cols);

    for ((_, geometry), summary) in boundaries.iter().zip(summaries) {
        let Some(class) = summary.majority else {
            continue;
        };
        for (row, col, _) in template.valid_cells() {
            let c = transform.cell_center(row, col);
            if geometry.intersects(&Point::from(c)) {
                out.set(row, col, Some(f64::from(class)));
            }
        }
    }

    out
}
