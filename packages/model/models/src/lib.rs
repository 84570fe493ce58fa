#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared data model for the enablement index engine.
//!
//! Defines the score scale, identifiers for study-area parts and model
//! nodes, the factor input modes, and the TOML-backed analysis
//! configuration consumed by the workflow crate.

pub mod config;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

pub use config::{
    AnalysisConfig, AnalysisSettings, BoundaryConfig, ConfigError, DimensionConfig, FactorConfig,
    IndexConfig, JobsConfig, JobsKind, StudyAreaConfig,
};

/// Lowest score any factor, dimension, or index cell can carry.
pub const MIN_SCORE: f64 = 0.0;

/// Highest score any factor, dimension, or index cell can carry.
pub const MAX_SCORE: f64 = 5.0;

/// Highest value of the population-combined index (5 levels x 3 tertiles).
pub const MAX_COMBINED_SCORE: f64 = 15.0;

/// Node id of the composite index outputs.
pub const INDEX_NODE: &str = "index";

/// Node id of the population-combined index outputs.
pub const POPULATION_NODE: &str = "index_population";

/// Node id of the job-masked index outputs.
pub const JOBS_NODE: &str = "index_jobs";

/// Tolerance used when checking that weights sum to one.
pub const WEIGHT_EPSILON: f64 = 1e-6;

/// Clamps a raw value onto the 0-5 score scale.
///
/// `NaN` maps to [`MIN_SCORE`] so a malformed input can never escape the
/// scale.
#[must_use]
pub fn clamp_score(value: f64) -> f64 {
    if value.is_nan() {
        MIN_SCORE
    } else {
        value.clamp(MIN_SCORE, MAX_SCORE)
    }
}

/// Identifies one polygon part of a study area.
///
/// Parts are processed independently and each writes to its own files,
/// named after [`PartId`]'s `Display` form (`{area}_{part}`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PartId {
    /// Study area identifier (e.g. a country or admin name).
    pub area: String,
    /// Zero-based index of the polygon part within the area.
    pub part: usize,
}

impl PartId {
    #[must_use]
    pub fn new(area: impl Into<String>, part: usize) -> Self {
        Self {
            area: area.into(),
            part,
        }
    }
}

impl std::fmt::Display for PartId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{}", self.area, self.part)
    }
}

/// How a factor turns its input layer into 0-5 cell scores.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum InputMode {
    /// Attribute lookup through a classification table. Line and point
    /// features are intersected with cells (best score wins); polygon
    /// features are burned at cell centres.
    Classification,
    /// Per-category severity buffers around events (most severe wins,
    /// untouched cells score the maximum).
    Buffer,
    /// Percentage of each cell covered by fixed-radius point buffers,
    /// digitized through a bin table.
    Coverage,
    /// Any intersection with a fixed-radius point buffer scores the
    /// maximum, none scores the minimum.
    Binary,
    /// Concentric distance rings around points of interest.
    MultiBuffer,
    /// Linear rescale of a numeric field or raster over a known domain.
    Linear,
    /// Breakpoint band table over a numeric field or raster.
    Step,
    /// A single national index value rescaled onto every land cell.
    IndexValue,
}

impl InputMode {
    /// Returns `true` when the mode reads a layer (everything except
    /// [`InputMode::IndexValue`]).
    #[must_use]
    pub const fn needs_layer(self) -> bool {
        !matches!(self, Self::IndexValue)
    }
}

/// Travel mode recorded for accessibility factors.
///
/// Network isochrones are produced outside the engine; the mode is carried
/// into output metadata so downstream tools can tell walk and drive runs
/// apart.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TravelMode {
    /// Pedestrian travel.
    #[default]
    Walk,
    /// Motorised travel.
    Drive,
}

/// Level of the aggregation tree a node lives on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NodeLevel {
    /// A scored input (or a parent of subfactors).
    Factor,
    /// A themed group of factors.
    Dimension,
    /// The composite enablement index.
    Index,
}
