#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Weighted aggregation of score rasters.
//!
//! Subfactors roll up into factors, factors into dimensions and dimensions
//! into the composite index, each level through the same two steps:
//! [`rebalance`] the weights of the used members, then take the per-cell
//! [`weighted_sum`]. The composite can then be combined with population
//! tertiles, masked by job locations and summarised per administrative
//! boundary. [`Legend`] maps results onto interpretive classes.

pub mod combine;
pub mod jobs;
pub mod legend;
pub mod majority;
pub mod population;
pub mod weights;

pub use combine::weighted_sum;
pub use jobs::JobsMask;
pub use legend::{Legend, LegendClass, StyleDescriptor};
pub use majority::{BoundarySummary, burn_majority, majority_by_boundary};
pub use population::{PopulationTertiles, combine_population, enablement_level};
pub use weights::{Member, Weights, rebalance};

/// Errors that can occur during aggregation.
#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    /// A group has no used members left to aggregate.
    #[error("'{group}' has no used members")]
    NoUsedMembers {
        /// Group identifier.
        group: String,
    },

    /// Used weights do not sum to one and rebalancing is disabled.
    #[error("Weights of '{group}' sum to {sum}, not 1, and rebalancing is disabled")]
    WeightImbalance {
        /// Group identifier.
        group: String,
        /// Sum of the used weights.
        sum: f64,
    },

    /// Member rasters do not share a grid.
    #[error("Member rasters of '{group}' are not on the same grid")]
    GridMismatch {
        /// Group identifier.
        group: String,
    },

    /// A population raster has no positive values to derive tertiles from.
    #[error("Population raster has no positive values")]
    EmptyPopulation,

    /// A raster operation failed.
    #[error(transparent)]
    Raster(#[from] geest_raster::RasterError),

    /// A style descriptor could not be serialized.
    #[error("Failed to serialize style: {0}")]
    Json(#[from] serde_json::Error),
}
