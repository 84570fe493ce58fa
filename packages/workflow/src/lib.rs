#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Per-part workflows for the enablement index.
//!
//! A [`Workflow`] owns the analysis configuration, the classification
//! tables and a [`LayerProvider`]. [`Workflow::study_parts`] splits the
//! study area into independent [`PartTask`]s; the host runs each one with
//! [`Workflow::run_part`] on whatever pool it likes, then calls
//! [`Workflow::finish_region`] to mosaic the per-part outputs and summarise
//! them by boundary.
//!
//! Within a part, failures are contained: a failed factor does not stop its
//! siblings, and only parents with a failed *used* member fail in turn.
//! Everything that happened is recorded in a serializable [`RunReport`].

pub mod cancel;
pub mod factor;
pub mod layers;
pub mod region;
pub mod report;
pub mod workflow;

use std::path::PathBuf;

pub use cancel::CancellationToken;
pub use geest_scoring::{Feature, NullProgress, ProgressCallback, null_progress};
pub use layers::{
    FileLayerProvider, Layer, LayerCache, LayerProvider, MemoryLayerProvider, RasterLayer,
    VectorLayer,
};
pub use region::{MosaicOutput, RegionSummary};
pub use report::{NodeReport, NodeStatus, PartReport, RunReport};
pub use workflow::{PartTask, Workflow};

/// Errors that can occur while running a workflow.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// A required layer, field or table is missing.
    #[error("Missing input for '{node}': {what}")]
    MissingInput {
        /// Node that needed the input.
        node: String,
        /// What was missing.
        what: String,
    },

    /// A study area geometry is unusable.
    #[error("Invalid geometry in '{layer}': {message}")]
    InvalidGeometry {
        /// Layer or part the geometry came from.
        layer: String,
        /// Description of what went wrong.
        message: String,
    },

    /// Used weights do not sum to one and rebalancing is disabled.
    #[error("Weights of '{node}' sum to {sum}, not 1, and rebalancing is disabled")]
    WeightImbalance {
        /// Parent node.
        node: String,
        /// Sum of the used weights.
        sum: f64,
    },

    /// A layer's CRS cannot be brought onto the grid CRS.
    #[error("Layer '{layer}' cannot be reprojected onto the analysis CRS: {message}")]
    CrsMismatch {
        /// Layer reference.
        layer: String,
        /// Description of what went wrong.
        message: String,
    },

    /// A file could not be read or written.
    #[error("I/O error on {path}: {source}")]
    Io {
        /// Offending path.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The run was cancelled by the host.
    #[error("Cancelled")]
    Cancelled,

    /// The analysis configuration is unusable.
    #[error(transparent)]
    Config(#[from] geest_model_models::ConfigError),

    /// Grid construction or CRS handling failed.
    #[error(transparent)]
    Grid(#[from] geest_grid::GridError),

    /// A scorer could not be configured.
    #[error(transparent)]
    Scoring(#[from] geest_scoring::ScoringError),

    /// A classification table lookup failed.
    #[error(transparent)]
    Table(#[from] geest_tables::TableError),

    /// A raster operation failed.
    #[error(transparent)]
    Raster(#[from] geest_raster::RasterError),

    /// Aggregation failed.
    #[error(transparent)]
    Aggregate(geest_aggregate::AggregateError),

    /// A `GeoJSON` document could not be parsed.
    #[error("Invalid GeoJSON {path}: {message}")]
    GeoJson {
        /// Offending path.
        path: PathBuf,
        /// Description of what went wrong.
        message: String,
    },

    /// A report could not be serialized.
    #[error("Failed to serialize report: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<geest_aggregate::AggregateError> for WorkflowError {
    fn from(error: geest_aggregate::AggregateError) -> Self {
        match error {
            geest_aggregate::AggregateError::WeightImbalance { group, sum } => {
                Self::WeightImbalance { node: group, sum }
            }
            other => Self::Aggregate(other),
        }
    }
}
