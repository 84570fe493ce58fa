#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Score rasters and everything that moves them on and off disk.
//!
//! A [`ScoreRaster`] is a single-band `f32` grid on a north-up
//! [`GeoTransform`](geest_grid::GeoTransform) with `-9999` as no-data.
//! [`rasterize`] burns per-cell scores onto the exact lattice of an
//! [`AreaGrid`](geest_grid::AreaGrid) and clips to the part boundary.
//! [`geotiff`] reads and writes float32 `GeoTIFF`s without GDAL, and
//! [`Mosaic`] stitches per-part rasters into a VRT without touching values.

pub mod geotiff;
pub mod mosaic;
pub mod raster;
pub mod rasterize;

use std::path::PathBuf;

pub use geotiff::{read_geotiff, read_geotiff_with_crs, write_geotiff};
pub use mosaic::{Mosaic, MosaicSource};
pub use raster::{NO_DATA, ScoreRaster};
pub use rasterize::{mask_to_polygon, rasterize};

/// Errors that can occur while building, reading or writing rasters.
#[derive(Debug, thiserror::Error)]
pub enum RasterError {
    /// A file could not be read or written, even after a retry.
    #[error(
        "I/O error on {path}: {source}. If a previous run left temporary files \
         behind, remove them and run again"
    )]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// A file is not a usable `GeoTIFF`.
    #[error("Invalid GeoTIFF {path}: {message}")]
    Format {
        /// Offending path.
        path: PathBuf,
        /// Description of what went wrong.
        message: String,
    },

    /// Two rasters were expected to share a shape.
    #[error("Shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        /// Expected `(rows, cols)`.
        expected: (usize, usize),
        /// Actual `(rows, cols)`.
        found: (usize, usize),
    },

    /// Mosaic inputs have different cell sizes.
    #[error("Resolution mismatch in mosaic: expected {expected}, found {found} ({path})")]
    ResolutionMismatch {
        /// Cell size of the first input.
        expected: f64,
        /// Cell size of the offending input.
        found: f64,
        /// Offending input.
        path: PathBuf,
    },

    /// Mosaic inputs share a cell size but sit on different lattices.
    #[error("Mosaic input {path} is not aligned with the shared grid origin")]
    Misaligned {
        /// Offending input.
        path: PathBuf,
    },

    /// A mosaic was requested with no inputs.
    #[error("Mosaic has no inputs")]
    EmptyMosaic,
}
