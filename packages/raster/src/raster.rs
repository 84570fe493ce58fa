//! In-memory single-band raster.

use geest_grid::GeoTransform;
use ndarray::Array2;

use crate::RasterError;

/// No-data sentinel written to every unscored cell.
pub const NO_DATA: f32 = -9999.0;

/// A north-up float raster with a no-data sentinel.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreRaster {
    transform: GeoTransform,
    data: Array2<f32>,
}

impl ScoreRaster {
    /// A `rows x cols` raster filled with no-data.
    #[must_use]
    pub fn empty(transform: GeoTransform, rows: usize, cols: usize) -> Self {
        Self {
            transform,
            data: Array2::from_elem((rows, cols), NO_DATA),
        }
    }

    /// Wraps an existing array. `NaN` values are normalized to no-data.
    #[must_use]
    pub fn from_array(transform: GeoTransform, mut data: Array2<f32>) -> Self {
        data.mapv_inplace(|v| if v.is_nan() { NO_DATA } else { v });
        Self { transform, data }
    }

    /// Builds a raster from row-major values.
    ///
    /// # Errors
    ///
    /// Returns [`RasterError::ShapeMismatch`] if `values.len() != rows * cols`.
    pub fn from_vec(
        transform: GeoTransform,
        rows: usize,
        cols: usize,
        values: Vec<f32>,
    ) -> Result<Self, RasterError> {
        let found = values.len();
        let data = Array2::from_shape_vec((rows, cols), values).map_err(|_| {
            RasterError::ShapeMismatch {
                expected: (rows, cols),
                found: (found, 1),
            }
        })?;
        Ok(Self::from_array(transform, data))
    }

    #[must_use]
    pub const fn transform(&self) -> &GeoTransform {
        &self.transform
    }

    /// `(rows, cols)`.
    #[must_use]
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Underlying array, no-data included.
    #[must_use]
    pub const fn data(&self) -> &Array2<f32> {
        &self.data
    }

    /// Value at a cell, `None` for no-data or out of range.
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        self.data
            .get((row, col))
            .copied()
            .filter(|v| is_valid(*v))
            .map(f64::from)
    }

    /// Writes a value, or no-data for `None`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn set(&mut self, row: usize, col: usize, value: Option<f64>) {
        if let Some(cell) = self.data.get_mut((row, col)) {
            *cell = value.map_or(NO_DATA, |v| v as f32);
        }
    }

    /// Value under a map coordinate.
    #[must_use]
    pub fn sample(&self, x: f64, y: f64) -> Option<f64> {
        let (rows, cols) = self.shape();
        let (row, col) = self.transform.cell_at(x, y, rows, cols)?;
        self.get(row, col)
    }

    /// Row-major iterator over `(row, col, value)` for valid cells.
    pub fn valid_cells(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.data
            .indexed_iter()
            .filter(|(_, v)| is_valid(**v))
            .map(|((r, c), v)| (r, c, f64::from(*v)))
    }

    /// Number of cells holding a value.
    #[must_use]
    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|v| is_valid(**v)).count()
    }

    /// Minimum and maximum valid value.
    #[must_use]
    pub fn value_range(&self) -> Option<(f64, f64)> {
        self.valid_cells().fold(None, |acc, (_, _, v)| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
    }

    /// Applies `f` to every valid cell; `None` turns the cell into no-data.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn map_valid(&self, f: impl Fn(f64) -> Option<f64>) -> Self {
        let data = self.data.mapv(|v| {
            if is_valid(v) {
                f(f64::from(v)).map_or(NO_DATA, |out| out as f32)
            } else {
                NO_DATA
            }
        });
        Self {
            transform: self.transform,
            data,
        }
    }

    /// Returns `true` when `other` shares transform and shape.
    #[must_use]
    pub fn is_congruent(&self, other: &Self) -> bool {
        self.shape() == other.shape()
            && self.transform.is_aligned_with(&other.transform)
            && (self.transform.origin_x - other.transform.origin_x).abs() < 1e-6
            && (self.transform.origin_y - other.transform.origin_y).abs() < 1e-6
    }

    /// Little-endian row-major bytes of the whole raster, used to compare
    /// runs for bit-identical output.
    #[must_use]
    pub fn to_le_bytes(&self) -> Vec<u8> {
        self.data.iter().flat_map(|v| v.to_le_bytes()).collect()
    }
}

/// Returns `true` for a value that is neither no-data nor `NaN`.
#[must_use]
pub fn is_valid(value: f32) -> bool {
    !value.is_nan() && (value - NO_DATA).abs() > f32::EPSILON
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transform() -> GeoTransform {
        GeoTransform::new(0.0, 300.0, 100.0)
    }

    #[test]
    fn empty_raster_is_all_no_data() {
        let raster = ScoreRaster::empty(transform(), 3, 3);
        assert_eq!(raster.valid_count(), 0);
        assert_eq!(raster.get(1, 1), None);
        assert_eq!(raster.value_range(), None);
    }

    #[test]
    fn set_get_and_sample() {
        let mut raster = ScoreRaster::empty(transform(), 3, 3);
        raster.set(1, 2, Some(4.5));
        assert_eq!(raster.get(1, 2), Some(4.5));
        assert_eq!(raster.sample(250.0, 150.0), Some(4.5));
        assert_eq!(raster.sample(50.0, 250.0), None);
        assert_eq!(raster.sample(-10.0, 250.0), None);
        raster.set(1, 2, None);
        assert_eq!(raster.get(1, 2), None);
    }

    #[test]
    fn nan_is_normalized_to_no_data() {
        let raster =
            ScoreRaster::from_vec(transform(), 1, 3, vec![1.0, f32::NAN, 3.0]).unwrap();
        assert_eq!(raster.valid_count(), 2);
        assert!((raster.data()[[0, 1]] - NO_DATA).abs() < f32::EPSILON);
    }

    #[test]
    fn from_vec_rejects_wrong_length() {
        let err = ScoreRaster::from_vec(transform(), 2, 2, vec![1.0; 3]).unwrap_err();
        assert!(matches!(err, RasterError::ShapeMismatch { .. }));
    }

    #[test]
    fn map_valid_keeps_no_data() {
        let raster = ScoreRaster::from_vec(transform(), 1, 3, vec![1.0, NO_DATA, 3.0]).unwrap();
        let doubled = raster.map_valid(|v| Some(v * 2.0));
        assert_eq!(doubled.get(0, 0), Some(2.0));
        assert_eq!(doubled.get(0, 1), None);
        assert_eq!(doubled.value_range(), Some((2.0, 6.0)));
    }
}
