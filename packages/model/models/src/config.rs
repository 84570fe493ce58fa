//! TOML-backed analysis configuration.
//!
//! An analysis file describes the grid (resolution, CRS, shared origin),
//! the study area layer, and the Dimension -> Factor -> Subfactor tree with
//! weights and per-factor input options. Parsing only checks structure;
//! missing layers and table entries surface at run time as per-factor
//! failures so sibling factors still run.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{INDEX_NODE, InputMode, JOBS_NODE, POPULATION_NODE, TravelMode};

/// Smallest accepted grid resolution, in CRS linear units.
pub const MIN_RESOLUTION: f64 = 100.0;

/// Largest accepted grid resolution, in CRS linear units.
pub const MAX_RESOLUTION: f64 = 1000.0;

const RESERVED_NODE_IDS: [&str; 3] = [INDEX_NODE, POPULATION_NODE, JOBS_NODE];

/// Errors produced while loading or validating an analysis configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The TOML document could not be parsed.
    #[error("Failed to parse analysis config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config file could not be read.
    #[error("Failed to read analysis config: {0}")]
    Io(#[from] std::io::Error),

    /// Grid resolution outside the supported range.
    #[error("Resolution {value} is outside [100, 1000]")]
    InvalidResolution {
        /// The rejected resolution.
        value: f64,
    },

    /// A weight outside `[0, 1]`.
    #[error("Weight {weight} of '{id}' is outside [0, 1]")]
    InvalidWeight {
        /// Node identifier.
        id: String,
        /// The rejected weight.
        weight: f64,
    },

    /// Two nodes share an identifier.
    #[error("Duplicate node id '{id}'")]
    DuplicateId {
        /// The repeated identifier.
        id: String,
    },

    /// A factor has neither an input mode nor subfactors.
    #[error("Factor '{id}' has neither an input_mode nor subfactors")]
    MissingInputMode {
        /// Factor identifier.
        id: String,
    },

    /// `thresholds` and `scores` disagree in length or ordering.
    #[error("Factor '{id}' has invalid thresholds: {message}")]
    InvalidThresholds {
        /// Factor identifier.
        id: String,
        /// Description of what went wrong.
        message: String,
    },

    /// Worker pool size of zero.
    #[error("Worker count must be at least 1")]
    InvalidWorkers,

    /// A dimension or factor uses an id reserved for index outputs.
    #[error("Node id '{id}' is reserved for index outputs")]
    ReservedId {
        /// The rejected identifier.
        id: String,
    },
}

/// A complete analysis configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Grid and run settings.
    pub analysis: AnalysisSettings,
    /// Study area polygon layer.
    pub study_area: StudyAreaConfig,
    /// Themed groups of factors.
    #[serde(default)]
    pub dimensions: Vec<DimensionConfig>,
    /// Composite index post-processing options.
    #[serde(default)]
    pub index: IndexConfig,
}

/// Grid and run settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSettings {
    /// Cell size in CRS linear units (100-1000).
    pub resolution: f64,
    /// Analysis CRS, either `EPSG:<code>` or a PROJ.4 string.
    pub crs: String,
    /// Shared grid origin so every part tiles on the same lattice.
    #[serde(default)]
    pub origin: [f64; 2],
    /// Directory that receives every raster, mosaic and report.
    pub output_dir: PathBuf,
    /// Bounded worker pool size used by the host.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Redistribute weights proportionally when members are excluded.
    #[serde(default = "default_true")]
    pub rebalance: bool,
    /// Number of features between progress updates.
    #[serde(default = "default_progress_every")]
    pub progress_every: u64,
}

const fn default_workers() -> usize {
    2
}

const fn default_true() -> bool {
    true
}

const fn default_progress_every() -> u64 {
    1_000
}

/// Study area polygon layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudyAreaConfig {
    /// Path (or host handle) of the polygon layer.
    pub path: String,
    /// Attribute holding the area name. Falls back to `area{n}`.
    #[serde(default)]
    pub id_field: Option<String>,
    /// Optional non-target polygons (e.g. marine areas) whose cells are
    /// excluded.
    #[serde(default)]
    pub exclusion_path: Option<String>,
}

/// A themed group of factors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionConfig {
    /// Unique identifier, also used for output file names.
    pub id: String,
    /// Human-readable name.
    #[serde(default)]
    pub name: Option<String>,
    /// Weight within the composite index.
    pub weight: f64,
    /// Whether the dimension takes part in the index.
    #[serde(default = "default_true")]
    pub used: bool,
    /// Member factors.
    #[serde(default)]
    pub factors: Vec<FactorConfig>,
}

/// A scored input, or a parent aggregating subfactors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorConfig {
    /// Unique identifier, also used for output file names.
    pub id: String,
    /// Human-readable name.
    #[serde(default)]
    pub name: Option<String>,
    /// Weight within the parent.
    pub weight: f64,
    /// Whether the factor takes part in its parent.
    #[serde(default = "default_true")]
    pub used: bool,
    /// Scoring strategy. Required unless `subfactors` is non-empty.
    #[serde(default)]
    pub input_mode: Option<InputMode>,
    /// Travel mode for accessibility factors.
    #[serde(default)]
    pub travel_mode: TravelMode,
    /// Bin lower bounds, band upper bounds, or ring distances depending on
    /// the input mode.
    #[serde(default)]
    pub thresholds: Vec<f64>,
    /// Scores paired with `thresholds`.
    #[serde(default)]
    pub scores: Vec<f64>,
    /// Buffer radius in metres for coverage, binary and job inputs.
    #[serde(default)]
    pub buffer_radius_m: Option<f64>,
    /// Attribute holding the primary classification value.
    #[serde(default)]
    pub classification_field: Option<String>,
    /// Named classification table for the primary field.
    #[serde(default)]
    pub table: Option<String>,
    /// Attribute holding a secondary classification value.
    #[serde(default)]
    pub secondary_field: Option<String>,
    /// Named classification table for the secondary field.
    #[serde(default)]
    pub secondary_table: Option<String>,
    /// Attribute holding the event category for buffer mode.
    #[serde(default)]
    pub category_field: Option<String>,
    /// Attribute holding a per-event radius override for buffer mode.
    #[serde(default)]
    pub radius_field: Option<String>,
    /// Path (or host handle) of the input layer.
    #[serde(default)]
    pub layer: Option<String>,
    /// Value for [`InputMode::IndexValue`].
    #[serde(default)]
    pub index_value: Option<f64>,
    /// `[min, max]` domain for linear rescaling. Defaults to `[0, 100]`.
    #[serde(default)]
    pub domain: Option<[f64; 2]>,
    /// Optional polygon layer restricting polygon outputs to covered cells.
    #[serde(default)]
    pub sub_mask: Option<String>,
    /// Finer-grained components aggregated into this factor.
    #[serde(default)]
    pub subfactors: Vec<FactorConfig>,
}

/// Composite index post-processing options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Population raster used to build the 15-class combined index.
    #[serde(default)]
    pub population: Option<String>,
    /// Job distribution layer restricting the index to areas of interest.
    #[serde(default)]
    pub jobs: Option<JobsConfig>,
    /// Administrative boundaries for majority-class summaries.
    #[serde(default)]
    pub boundaries: Option<BoundaryConfig>,
}

/// Kind of job distribution input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobsKind {
    /// Point locations, buffered by `buffer_radius_m`.
    Points,
    /// Polygon footprints.
    Polygons,
    /// Density raster; cells with a positive value are kept.
    Raster,
}

/// Job distribution mask configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Input kind.
    pub kind: JobsKind,
    /// Path (or host handle) of the layer.
    pub path: String,
    /// Buffer radius for point inputs.
    #[serde(default)]
    pub buffer_radius_m: Option<f64>,
}

/// Administrative boundary layer for majority summaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundaryConfig {
    /// Path (or host handle) of the polygon layer.
    pub path: String,
    /// Attribute holding the boundary identifier.
    pub id_field: String,
}

impl AnalysisConfig {
    /// Parses and validates an analysis config from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the TOML is malformed or the structure is
    /// invalid (see [`AnalysisConfig::validate`]).
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates an analysis config file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read or is invalid.
    pub fn load(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Checks resolution, weights, identifiers and threshold tables.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let resolution = self.analysis.resolution;
        if !(MIN_RESOLUTION..=MAX_RESOLUTION).contains(&resolution) {
            return Err(ConfigError::InvalidResolution { value: resolution });
        }
        if self.analysis.workers == 0 {
            return Err(ConfigError::InvalidWorkers);
        }

        let mut seen = BTreeSet::new();
        for dimension in &self.dimensions {
            check_weight(&dimension.id, dimension.weight)?;
            check_unique(&mut seen, &dimension.id)?;
            for factor in &dimension.factors {
                validate_factor(factor, &mut seen)?;
            }
        }

        Ok(())
    }
}

impl FactorConfig {
    /// Returns `true` when this factor aggregates subfactors instead of
    /// scoring a layer itself.
    #[must_use]
    pub fn is_parent(&self) -> bool {
        !self.subfactors.is_empty()
    }

    /// Returns the linear domain, defaulting to `[0, 100]`.
    #[must_use]
    pub fn linear_domain(&self) -> (f64, f64) {
        self.domain.map_or((0.0, 100.0), |[min, max]| (min, max))
    }
}

fn validate_factor(factor: &FactorConfig, seen: &mut BTreeSet<String>) -> Result<(), ConfigError> {
    check_weight(&factor.id, factor.weight)?;
    check_unique(seen, &factor.id)?;

    if factor.input_mode.is_none() && !factor.is_parent() {
        return Err(ConfigError::MissingInputMode {
            id: factor.id.clone(),
        });
    }

    if !factor.scores.is_empty() && factor.scores.len() != factor.thresholds.len() {
        return Err(ConfigError::InvalidThresholds {
            id: factor.id.clone(),
            message: format!(
                "{} thresholds but {} scores",
                factor.thresholds.len(),
                factor.scores.len()
            ),
        });
    }

    if factor.thresholds.windows(2).any(|w| w[0] >= w[1]) {
        return Err(ConfigError::InvalidThresholds {
            id: factor.id.clone(),
            message: "thresholds must be strictly increasing".to_string(),
        });
    }

    for sub in &factor.subfactors {
        validate_factor(sub, seen)?;
    }

    Ok(())
}

fn check_weight(id: &str, weight: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&weight) {
        Ok(())
    } else {
        Err(ConfigError::InvalidWeight {
            id: id.to_string(),
            weight,
        })
    }
}

fn check_unique(seen: &mut BTreeSet<String>, id: &str) -> Result<(), ConfigError> {
    if RESERVED_NODE_IDS.contains(&id) {
        return Err(ConfigError::ReservedId { id: id.to_string() });
    }
    if seen.insert(id.to_string()) {
        Ok(())
    } else {
        Err(ConfigError::DuplicateId { id: id.to_string() })
    }
}
