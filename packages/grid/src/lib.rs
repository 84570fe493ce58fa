#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Analysis grids for study-area parts.
//!
//! A [`StudyArea`] is split into polygon parts; the [`GridBuilder`] lays a
//! resolution-aligned cell lattice over each part, anchored on a shared
//! origin so neighbouring parts tile exactly. [`CellIndex`] wraps an R-tree
//! over the land cells of one grid and is rebuilt (then discarded) on every
//! scoring run.

pub mod area;
pub mod builder;
pub mod crs;
pub mod index;
pub mod transform;

pub use area::StudyArea;
pub use builder::{AreaGrid, CellId, GridBuilder, GridCell, Membership};
pub use crs::{Reprojector, SpatialRef};
pub use index::CellIndex;
pub use transform::GeoTransform;

/// Errors that can occur while building grids or handling CRSs.
#[derive(Debug, thiserror::Error)]
pub enum GridError {
    /// Resolution outside the supported range.
    #[error("Resolution {value} is outside [100, 1000]")]
    InvalidResolution {
        /// The rejected resolution.
        value: f64,
    },

    /// A polygon part is empty or degenerate.
    #[error("Invalid polygon part {part}: {message}")]
    InvalidPart {
        /// Part identifier.
        part: String,
        /// Description of what went wrong.
        message: String,
    },

    /// A study area geometry is not polygonal.
    #[error("Study area '{area}' has unsupported geometry type {kind}")]
    UnsupportedGeometry {
        /// Study area identifier.
        area: String,
        /// Geometry type name.
        kind: &'static str,
    },

    /// A CRS definition could not be understood.
    #[error("Unsupported CRS '{crs}'")]
    UnsupportedCrs {
        /// The CRS definition as given.
        crs: String,
    },

    /// A coordinate transform failed.
    #[error("Reprojection from '{from}' to '{to}' failed: {message}")]
    Reprojection {
        /// Source CRS.
        from: String,
        /// Target CRS.
        to: String,
        /// Description of what went wrong.
        message: String,
    },
}

/// Returns the geometry type name used in log and error messages.
#[must_use]
pub const fn geometry_kind(geometry: &geo::Geometry<f64>) -> &'static str {
    match geometry {
        geo::Geometry::Point(_) => "Point",
        geo::Geometry::Line(_) => "Line",
        geo::Geometry::LineString(_) => "LineString",
        geo::Geometry::Polygon(_) => "Polygon",
        geo::Geometry::MultiPoint(_) => "MultiPoint",
        geo::Geometry::MultiLineString(_) => "MultiLineString",
        geo::Geometry::MultiPolygon(_) => "MultiPolygon",
        geo::Geometry::GeometryCollection(_) => "GeometryCollection",
        geo::Geometry::Rect(_) => "Rect",
        geo::Geometry::Triangle(_) => "Triangle",
    }
}
