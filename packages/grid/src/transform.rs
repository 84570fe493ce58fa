//! North-up affine transform between cell indices and map coordinates.

use geo::{Coord, Rect};
use serde::{Deserialize, Serialize};

/// Affine coefficients of a north-up grid with square cells.
///
/// ```text
/// x = origin_x + col * cell_size
/// y = origin_y - row * cell_size
/// ```
///
/// `origin_*` is the upper-left corner of cell `(0, 0)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    /// X coordinate of the upper-left corner.
    pub origin_x: f64,
    /// Y coordinate of the upper-left corner.
    pub origin_y: f64,
    /// Cell edge length.
    pub cell_size: f64,
}

impl GeoTransform {
    #[must_use]
    pub const fn new(origin_x: f64, origin_y: f64, cell_size: f64) -> Self {
        Self {
            origin_x,
            origin_y,
            cell_size,
        }
    }

    /// GDAL-style coefficients
    /// `[origin_x, pixel_width, 0, origin_y, 0, -pixel_height]`.
    #[must_use]
    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.origin_x,
            self.cell_size,
            0.0,
            self.origin_y,
            0.0,
            -self.cell_size,
        ]
    }

    /// Centre of a cell.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn cell_center(&self, row: usize, col: usize) -> Coord<f64> {
        Coord {
            x: (col as f64 + 0.5).mul_add(self.cell_size, self.origin_x),
            y: (row as f64 + 0.5).mul_add(-self.cell_size, self.origin_y),
        }
    }

    /// Rectangle covered by a cell.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn cell_rect(&self, row: usize, col: usize) -> Rect<f64> {
        let min_x = (col as f64).mul_add(self.cell_size, self.origin_x);
        let max_y = (row as f64).mul_add(-self.cell_size, self.origin_y);
        Rect::new(
            Coord { x: min_x, y: max_y - self.cell_size },
            Coord { x: min_x + self.cell_size, y: max_y },
        )
    }

    /// Fractional `(col, row)` of a map coordinate.
    #[must_use]
    pub fn to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.origin_x) / self.cell_size,
            (self.origin_y - y) / self.cell_size,
        )
    }

    /// Cell `(row, col)` containing a map coordinate, if it lies inside a
    /// `rows x cols` grid.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn cell_at(&self, x: f64, y: f64, rows: usize, cols: usize) -> Option<(usize, usize)> {
        let (col, row) = self.to_pixel(x, y);
        if !(col.is_finite() && row.is_finite()) || col < 0.0 || row < 0.0 {
            return None;
        }
        let (row, col) = (row.floor() as usize, col.floor() as usize);
        (row < rows && col < cols).then_some((row, col))
    }

    /// Returns `true` when both transforms share a cell size and their
    /// origins sit on the same lattice.
    #[must_use]
    pub fn is_aligned_with(&self, other: &Self) -> bool {
        const TOLERANCE: f64 = 1e-6;
        if (self.cell_size - other.cell_size).abs() > TOLERANCE {
            return false;
        }
        let dx = (self.origin_x - other.origin_x) / self.cell_size;
        let dy = (self.origin_y - other.origin_y) / self.cell_size;
        (dx - dx.round()).abs() < TOLERANCE && (dy - dy.round()).abs() < TOLERANCE
    }
}
