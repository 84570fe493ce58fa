#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Per-cell scoring of features against an analysis grid.
//!
//! Every scorer reads [`Feature`]s, queries a [`CellIndex`](geest_grid::CellIndex)
//! for candidate cells and folds scores into a [`ScoreMap`] through a
//! commutative reducer:
//!
//! | Scorer | Reducer | Untouched land cell |
//! |---|---|---|
//! | [`FeatureScorer`] (classification) | [`MaxWins`] | 0 |
//! | [`SeverityScorer`] (event buffers) | [`MinWins`] | 5 |
//! | [`MultiBufferScorer`] (distance rings) | [`MaxWins`] | 0 |
//! | [`PolygonBurner`] (cell-centre burn) | [`MaxWins`] | 0 |
//!
//! [`CoverageScorer`] folds sub-pixel coverage masks with a bitwise OR
//! instead and digitizes the covered percentage through a bin table.
//! Because every reducer is commutative and associative, the result never
//! depends on feature order, and shard maps can be merged with the same
//! reducer.

pub mod cells;
pub mod classify;
pub mod coverage;
pub mod feature;
pub mod progress;
pub mod proximity;
pub mod reclass;
pub mod reduce;
pub mod severity;

pub use cells::{CellScores, intersecting_cells};
pub use classify::{AttributeRule, FeatureScorer};
pub use coverage::{CoverageMode, CoverageScorer, SUBDIVISIONS};
pub use feature::Feature;
pub use progress::{NullProgress, ProgressCallback, Ticker, null_progress};
pub use proximity::MultiBufferScorer;
pub use reclass::{LinearRescale, PolygonBurner, PolygonValue, index_value_scores, sample_raster};
pub use reduce::{MaxWins, MinWins, Reducer, ScoreMap};
pub use severity::{SeverityScorer, UNTOUCHED_SEVERITY};

/// Errors produced while configuring a scorer.
#[derive(Debug, thiserror::Error)]
pub enum ScoringError {
    /// A classification table lookup failed.
    #[error(transparent)]
    Table(#[from] geest_tables::TableError),

    /// A linear domain is empty or inverted.
    #[error("Invalid linear domain [{min}, {max}]")]
    InvalidDomain {
        /// Lower end.
        min: f64,
        /// Upper end.
        max: f64,
    },

    /// Ring distances or scores are unusable.
    #[error("Invalid thresholds: {message}")]
    InvalidThresholds {
        /// Description of what went wrong.
        message: String,
    },

    /// A buffer radius is not a positive finite number.
    #[error("Invalid buffer radius {radius}")]
    InvalidRadius {
        /// The rejected radius.
        radius: f64,
    },
}

/// Counters gathered while scoring one layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScoreStats {
    /// Features read.
    pub features: u64,
    /// Features skipped for empty, null or non-finite geometry.
    pub invalid_geometry: u64,
    /// Features with geometry but no applicable rule.
    pub unscored: u64,
}

impl ScoreStats {
    /// Logs the skip counters once for a whole layer.
    pub fn log_summary(&self, layer: &str) {
        if self.invalid_geometry > 0 {
            log::warn!(
                "{layer}: skipped {} of {} features with empty or invalid geometry",
                self.invalid_geometry,
                self.features
            );
        }
        if self.unscored > 0 {
            log::info!(
                "{layer}: {} of {} features matched no scoring rule",
                self.unscored,
                self.features
            );
        }
    }
}

/// Result of a scoring pass: the reduced map plus layer counters.
#[derive(Debug, Clone)]
pub struct Scored<R: Reducer> {
    /// Reduced scores of touched cells.
    pub map: ScoreMap<R>,
    /// Layer counters.
    pub stats: ScoreStats,
}
