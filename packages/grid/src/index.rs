//! R-tree over the land cells of one grid.

use geo::Rect;
use rstar::{AABB, RTree, RTreeObject};

use crate::{AreaGrid, CellId};

/// A land cell stored in the R-tree.
struct CellEntry {
    id: CellId,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for CellEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

/// Spatial index of land cells.
///
/// Built per scoring run and dropped afterwards; it never outlives the
/// grid it was built from.
pub struct CellIndex {
    tree: RTree<CellEntry>,
}

impl CellIndex {
    /// Bulk-loads every land cell of `grid`.
    #[must_use]
    pub fn build(grid: &AreaGrid) -> Self {
        let entries = grid
            .land_cells()
            .map(|cell| CellEntry {
                id: cell.id,
                envelope: rect_envelope(&cell.rect),
            })
            .collect();
        Self {
            tree: RTree::bulk_load(entries),
        }
    }

    /// Number of indexed cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tree.size()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }

    /// Ids of cells whose bounding box intersects `rect`, sorted so callers
    /// see a deterministic order.
    #[must_use]
    pub fn candidates(&self, rect: &Rect<f64>) -> Vec<CellId> {
        let mut ids: Vec<CellId> = self
            .tree
            .locate_in_envelope_intersecting(&rect_envelope(rect))
            .map(|e| e.id)
            .collect();
        ids.sort_unstable();
        ids
    }
}

fn rect_envelope(rect: &Rect<f64>) -> AABB<[f64; 2]> {
    AABB::from_corners([rect.min().x, rect.min().y], [rect.max().x, rect.max().y])
}

#[cfg(test)]
mod tests {
    use geo::{Coord, MultiPolygon, polygon};
    use geest_model_models::PartId;

    use super::*;
    use crate::GridBuilder;

    fn grid() -> AreaGrid {
        let square = polygon![
            (x: 0.0, y: 0.0),
            (x: 500.0, y: 0.0),
            (x: 500.0, y: 500.0),
            (x: 0.0, y: 500.0),
        ];
        let exclusion = polygon![
            (x: 0.0, y: 0.0),
            (x: 100.0, y: 0.0),
            (x: 100.0, y: 100.0),
            (x: 0.0, y: 100.0),
        ];
        GridBuilder::new(100.0, [0.0, 0.0])
            .unwrap()
            .with_exclusions(MultiPolygon(vec![exclusion]))
            .build_part(PartId::new("idx", 0), &square)
            .unwrap()
    }

    #[test]
    fn indexes_only_land_cells() {
        let grid = grid();
        let index = CellIndex::build(&grid);
        assert_eq!(index.len(), 24);
        assert!(!index.is_empty());
    }

    #[test]
    fn candidates_cover_query_rect() {
        let grid = grid();
        let index = CellIndex::build(&grid);
        let query = Rect::new(Coord { x: 210.0, y: 210.0 }, Coord { x: 290.0, y: 290.0 });
        let ids = index.candidates(&query);
        assert_eq!(ids.len(), 1);
        let cell = grid.cell(ids[0]).unwrap();
        assert_eq!((cell.row, cell.col), (2, 2));
    }

    #[test]
    fn excluded_cells_are_never_candidates() {
        let grid = grid();
        let index = CellIndex::build(&grid);
        let query = Rect::new(Coord { x: 10.0, y: 10.0 }, Coord { x: 20.0, y: 20.0 });
        assert!(index.candidates(&query).is_empty());
    }
}
