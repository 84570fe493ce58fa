//! Grid Builder: resolution-aligned cell lattices per study-area part.

use geo::{Area, BoundingRect, Contains, Intersects, MultiPolygon, Point, Polygon, Rect};
use geest_model_models::PartId;
use geest_model_models::config::{MAX_RESOLUTION, MIN_RESOLUTION};
use rstar::{AABB, RTree, RTreeObject};

use crate::{GeoTransform, GridError, StudyArea};

/// Dense identifier of a cell within one [`AreaGrid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellId(pub u32);

impl CellId {
    /// Index into the grid's cell list.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Whether a cell takes part in scoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Membership {
    /// A target cell that receives scores.
    Land,
    /// A non-target cell (e.g. marine) that always carries no-data.
    Excluded,
}

/// One cell of an analysis grid.
///
/// Scores are kept outside the cell (in a score map) so the grid itself is
/// immutable after construction, membership included.
#[derive(Debug, Clone, PartialEq)]
pub struct GridCell {
    /// Dense identifier.
    pub id: CellId,
    /// Row from the top of the grid.
    pub row: usize,
    /// Column from the left of the grid.
    pub col: usize,
    /// Cell footprint.
    pub rect: Rect<f64>,
    /// Land or excluded.
    pub membership: Membership,
}

impl GridCell {
    /// Returns `true` for cells that receive scores.
    #[must_use]
    pub fn is_land(&self) -> bool {
        self.membership == Membership::Land
    }
}

/// The cell grid of one study-area part.
#[derive(Debug, Clone)]
pub struct AreaGrid {
    part: PartId,
    transform: GeoTransform,
    rows: usize,
    cols: usize,
    boundary: Polygon<f64>,
    cells: Vec<GridCell>,
    /// Row-major `rows x cols` lookup into `cells`; `None` where no cell
    /// was generated.
    lookup: Vec<Option<CellId>>,
}

impl AreaGrid {
    /// Part identifier.
    #[must_use]
    pub const fn part(&self) -> &PartId {
        &self.part
    }

    /// Affine transform of the grid.
    #[must_use]
    pub const fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    /// Grid `(rows, cols)`.
    #[must_use]
    pub const fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Part polygon the grid was built from.
    #[must_use]
    pub const fn boundary(&self) -> &Polygon<f64> {
        &self.boundary
    }

    /// Every generated cell, in row-major order.
    #[must_use]
    pub fn cells(&self) -> &[GridCell] {
        &self.cells
    }

    /// Cells that receive scores.
    pub fn land_cells(&self) -> impl Iterator<Item = &GridCell> {
        self.cells.iter().filter(|c| c.is_land())
    }

    /// Number of land cells.
    #[must_use]
    pub fn land_count(&self) -> usize {
        self.land_cells().count()
    }

    /// Looks up a cell by id.
    #[must_use]
    pub fn cell(&self, id: CellId) -> Option<&GridCell> {
        self.cells.get(id.index())
    }

    /// Fetches only the given cells, skipping unknown ids.
    pub fn cells_by_ids<'a>(
        &'a self,
        ids: &'a [CellId],
    ) -> impl Iterator<Item = &'a GridCell> + 'a {
        ids.iter().filter_map(|id| self.cell(*id))
    }

    /// Cell at a grid position, if one was generated there.
    #[must_use]
    pub fn cell_at(&self, row: usize, col: usize) -> Option<&GridCell> {
        if row >= self.rows || col >= self.cols {
            return None;
        }
        self.lookup[row * self.cols + col].and_then(|id| self.cell(id))
    }

    /// Cell containing a map coordinate.
    #[must_use]
    pub fn cell_containing(&self, x: f64, y: f64) -> Option<&GridCell> {
        let (row, col) = self.transform.cell_at(x, y, self.rows, self.cols)?;
        self.cell_at(row, col)
    }
}

/// Lays aligned cell grids over study-area parts.
#[derive(Debug, Clone)]
pub struct GridBuilder {
    resolution: f64,
    origin: [f64; 2],
    exclusions: RTree<ExclusionEntry>,
}

#[derive(Debug, Clone)]
struct ExclusionEntry {
    polygon: Polygon<f64>,
    envelope: AABB<[f64; 2]>,
}

impl RTreeObject for ExclusionEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        self.envelope
    }
}

impl GridBuilder {
    /// Creates a builder for grids of `resolution` anchored on `origin`.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::InvalidResolution`] outside `[100, 1000]`.
    pub fn new(resolution: f64, origin: [f64; 2]) -> Result<Self, GridError> {
        if !(MIN_RESOLUTION..=MAX_RESOLUTION).contains(&resolution) {
            return Err(GridError::InvalidResolution { value: resolution });
        }
        Ok(Self {
            resolution,
            origin,
            exclusions: RTree::new(),
        })
    }

    /// Adds non-target polygons; cells whose centre falls inside one are
    /// flagged [`Membership::Excluded`].
    #[must_use]
    pub fn with_exclusions(mut self, exclusions: MultiPolygon<f64>) -> Self {
        let entries = exclusions
            .0
            .into_iter()
            .filter_map(|polygon| {
                let rect = polygon.bounding_rect()?;
                Some(ExclusionEntry {
                    envelope: AABB::from_corners(
                        [rect.min().x, rect.min().y],
                        [rect.max().x, rect.max().y],
                    ),
                    polygon,
                })
            })
            .collect();
        self.exclusions = RTree::bulk_load(entries);
        self
    }

    /// Grid resolution.
    #[must_use]
    pub const fn resolution(&self) -> f64 {
        self.resolution
    }

    /// Builds one grid per valid part. Invalid parts are skipped with a
    /// warning; they never fail the whole area.
    #[must_use]
    pub fn build_area(&self, area: &StudyArea) -> Vec<AreaGrid> {
        area.identified_parts()
            .filter_map(|(part, polygon)| match self.build_part(part, polygon) {
                Ok(grid) => Some(grid),
                Err(e) => {
                    log::warn!("Skipping part: {e}");
                    None
                }
            })
            .collect()
    }

    /// Builds the grid of a single part.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::InvalidPart`] if the polygon is empty, has
    /// non-finite coordinates, or has zero area.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn build_part(&self, part: PartId, polygon: &Polygon<f64>) -> Result<AreaGrid, GridError> {
        let invalid = |message: &str| GridError::InvalidPart {
            part: part.to_string(),
            message: message.to_string(),
        };

        if polygon.exterior().0.is_empty() {
            return Err(invalid("empty polygon"));
        }
        if polygon
            .exterior()
            .coords()
            .chain(polygon.interiors().iter().flat_map(|r| r.coords()))
            .any(|c| !(c.x.is_finite() && c.y.is_finite()))
        {
            return Err(invalid("non-finite coordinates"));
        }
        if polygon.unsigned_area() <= 0.0 {
            return Err(invalid("zero area"));
        }
        let bounds = polygon
            .bounding_rect()
            .ok_or_else(|| invalid("no bounding box"))?;

        let r = self.resolution;
        let [ox, oy] = self.origin;
        let min_x = ((bounds.min().x - ox) / r).floor().mul_add(r, ox);
        let max_x = ((bounds.max().x - ox) / r).ceil().mul_add(r, ox);
        let min_y = ((bounds.min().y - oy) / r).floor().mul_add(r, oy);
        let max_y = ((bounds.max().y - oy) / r).ceil().mul_add(r, oy);

        let cols = (((max_x - min_x) / r).round() as usize).max(1);
        let rows = (((max_y - min_y) / r).round() as usize).max(1);
        let transform = GeoTransform::new(min_x, max_y, r);

        let mut cells = Vec::new();
        let mut lookup = vec![None; rows * cols];
        let mut excluded = 0_usize;

        for row in 0..rows {
            for col in 0..cols {
                let rect = transform.cell_rect(row, col);
                if !polygon.intersects(&rect) {
                    continue;
                }
                let membership = if self.is_excluded(transform.cell_center(row, col)) {
                    excluded += 1;
                    Membership::Excluded
                } else {
                    Membership::Land
                };
                let id = CellId(cells.len() as u32);
                lookup[row * cols + col] = Some(id);
                cells.push(GridCell {
                    id,
                    row,
                    col,
                    rect,
                    membership,
                });
            }
        }

        if cells.len() == excluded {
            return Err(invalid("no land cells"));
        }

        log::info!(
            "Built grid for {part}: {rows}x{cols}, {} cells ({excluded} excluded)",
            cells.len()
        );

        Ok(AreaGrid {
            part,
            transform,
            rows,
            cols,
            boundary: polygon.clone(),
            cells,
            lookup,
        })
    }

    fn is_excluded(&self, center: geo::Coord<f64>) -> bool {
        let point = Point::from(center);
        self.exclusions
            .locate_in_envelope_intersecting(&AABB::from_point([center.x, center.y]))
            .any(|e| e.polygon.contains(&point))
    }
}
