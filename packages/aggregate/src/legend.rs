//! Interpretive classes and the JSON style descriptor written next to each
//! output raster.

use std::path::Path;

use geest_model_models::{NodeLevel, TravelMode};
use geest_raster::NO_DATA;
use serde::{Deserialize, Serialize};

use crate::AggregateError;

/// One class of a legend. A value belongs to the first class whose `max` it
/// does not exceed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegendClass {
    /// Lower bound.
    pub min: f64,
    /// Upper bound, inclusive.
    pub max: f64,
    /// Human-readable class name.
    pub label: String,
    /// `#rrggbb`.
    pub color: String,
}

/// Ordered, contiguous classes covering a score range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Legend {
    /// Legend identifier, e.g. `enablement`.
    pub name: String,
    /// Classes in ascending order of `min`.
    pub classes: Vec<LegendClass>,
}

const ENABLEMENT: [(f64, f64, &str, &str); 6] = [
    (0.0, 0.5, "Not enabling", "#d7191c"),
    (0.5, 1.5, "Very low enablement", "#f07c4a"),
    (1.5, 2.5, "Low enablement", "#fec980"),
    (2.5, 3.5, "Moderately enabling", "#ffffbf"),
    (3.5, 4.5, "Enabling", "#c7e9ad"),
    (4.5, 5.0, "Highly enabling", "#1a9641"),
];

const LEVELS: [&str; 5] = [
    "Not enabling",
    "Low enablement",
    "Moderately enabling",
    "Enabling",
    "Highly enabling",
];

const TERTILES: [&str; 3] = ["low population", "medium population", "high population"];

const COMBINED_COLORS: [&str; 15] = [
    "#fee5d9", "#fcae91", "#de2d26", //
    "#feedde", "#fdbe85", "#e6550d", //
    "#ffffcc", "#ffeda0", "#feb24c", //
    "#edf8e9", "#bae4b3", "#74c476", //
    "#eff3ff", "#9ecae1", "#3182bd",
];

impl Legend {
    /// Six-class legend for 0-5 factor, dimension and index outputs.
    #[must_use]
    pub fn enablement() -> Self {
        Self {
            name: "enablement".to_string(),
            classes: ENABLEMENT
                .iter()
                .map(|&(min, max, label, color)| LegendClass {
                    min,
                    max,
                    label: label.to_string(),
                    color: color.to_string(),
                })
                .collect(),
        }
    }

    /// Fifteen-class legend for the population-combined index.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn population_combined() -> Self {
        let classes = LEVELS
            .iter()
            .enumerate()
            .flat_map(|(level, level_label)| {
                TERTILES.iter().enumerate().map(move |(tertile, tertile_label)| {
                    let value = (level * 3 + tertile + 1) as f64;
                    LegendClass {
                        min: value - 0.5,
                        max: value + 0.5,
                        label: format!("{level_label}, {tertile_label}"),
                        color: COMBINED_COLORS[level * 3 + tertile].to_string(),
                    }
                })
            })
            .collect();
        Self {
            name: "population_combined".to_string(),
            classes,
        }
    }

    /// Index of the class `value` falls in; `None` outside the legend.
    #[must_use]
    pub fn class_index(&self, value: f64) -> Option<usize> {
        let first = self.classes.first()?;
        if !value.is_finite() || value < first.min {
            return None;
        }
        self.classes.iter().position(|c| value <= c.max)
    }

    #[must_use]
    pub fn classify(&self, value: f64) -> Option<&LegendClass> {
        self.class_index(value).and_then(|i| self.classes.get(i))
    }
}

/// Style sidecar describing how to render one output raster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StyleDescriptor {
    /// Id of the styled node.
    pub node: String,
    /// Level of the node in the analysis tree.
    pub level: NodeLevel,
    /// Set for multi-buffer factors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub travel_mode: Option<TravelMode>,
    /// Sentinel written to no-data pixels.
    pub no_data: f32,
    /// Classes used to render the node's raster.
    pub legend: Legend,
}

impl StyleDescriptor {
    #[must_use]
    pub fn new(node: impl Into<String>, level: NodeLevel, legend: Legend) -> Self {
        Self {
            node: node.into(),
            level,
            travel_mode: None,
            no_data: NO_DATA,
            legend,
        }
    }

    #[must_use]
    pub const fn with_travel_mode(mut self, mode: TravelMode) -> Self {
        self.travel_mode = Some(mode);
        self
    }

    /// Pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`AggregateError::Json`] if serialization fails.
    pub fn to_json(&self) -> Result<String, AggregateError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Writes the descriptor to `path`.
    ///
    /// # Errors
    ///
    /// Returns [`AggregateError::Raster`] wrapping the I/O failure.
    pub fn write(&self, path: &Path) -> Result<(), AggregateError> {
        let json = self.to_json()?;
        std::fs::write(path, json).map_err(|source| geest_raster::RasterError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }
}
