//! Table registry: loads every scoring table from embedded TOML configs.
//!
//! Each `.toml` file in `packages/tables/tables/` is baked into the binary
//! at compile time via [`include_str!`]. Adding a table is as simple as
//! creating a new TOML file and adding it to the list below.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::rule::{EventRule, EventTable, ScoringRule};
use crate::step::{Band, BandTable, Bin, BinTable};
use crate::TableError;

/// TOML tables embedded at compile time.
const TABLE_TOMLS: &[(&str, &str)] = &[
    // ── Classification rules ─────────────────────────────────────────
    ("road_types", include_str!("../tables/road_types.toml")),
    ("cycleway_types", include_str!("../tables/cycleway_types.toml")),
    (
        "education_levels",
        include_str!("../tables/education_levels.toml"),
    ),
    // ── Event buffers ────────────────────────────────────────────────
    ("acled_events", include_str!("../tables/acled_events.toml")),
    // ── Coverage bins ────────────────────────────────────────────────
    (
        "lighting_coverage",
        include_str!("../tables/lighting_coverage.toml"),
    ),
    (
        "binary_coverage",
        include_str!("../tables/binary_coverage.toml"),
    ),
    // ── Hazard bands ─────────────────────────────────────────────────
    ("fire_hazard", include_str!("../tables/fire_hazard.toml")),
    ("flood_hazard", include_str!("../tables/flood_hazard.toml")),
    (
        "landslide_hazard",
        include_str!("../tables/landslide_hazard.toml"),
    ),
    ("cyclone_hazard", include_str!("../tables/cyclone_hazard.toml")),
    ("drought_hazard", include_str!("../tables/drought_hazard.toml")),
];

/// Serialized form of one table file.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TableDefinition {
    /// Attribute value -> score.
    Rule {
        /// Table name.
        name: String,
        /// Free-form description.
        #[serde(default)]
        description: Option<String>,
        /// Value -> score entries.
        scores: BTreeMap<String, f64>,
        /// Score for values missing from `scores`.
        #[serde(default)]
        default: Option<f64>,
    },
    /// Lower-bound coverage bins.
    Bins {
        /// Table name.
        name: String,
        /// Free-form description.
        #[serde(default)]
        description: Option<String>,
        /// Ordered bins.
        bins: Vec<Bin>,
    },
    /// Upper-bound hazard bands.
    Bands {
        /// Table name.
        name: String,
        /// Free-form description.
        #[serde(default)]
        description: Option<String>,
        /// Ordered bands.
        bands: Vec<Band>,
        /// Score for no-data and zero values.
        no_data_score: f64,
    },
    /// Event category buffers.
    Events {
        /// Table name.
        name: String,
        /// Free-form description.
        #[serde(default)]
        description: Option<String>,
        /// Category -> radius and severity.
        events: BTreeMap<String, EventDefinition>,
    },
}

/// Serialized form of one event category.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct EventDefinition {
    /// Default buffer radius in metres.
    pub radius_m: f64,
    /// Severity score.
    pub score: f64,
}

/// Parses one table definition from TOML text.
///
/// # Errors
///
/// Returns [`TableError::Parse`] if the TOML is malformed.
pub fn parse_table_toml(text: &str) -> Result<TableDefinition, TableError> {
    Ok(toml::from_str(text)?)
}

/// An immutable, name-indexed collection of scoring tables.
#[derive(Debug, Clone, Default)]
pub struct TableSet {
    rules: BTreeMap<String, ScoringRule>,
    bins: BTreeMap<String, BinTable>,
    bands: BTreeMap<String, BandTable>,
    events: BTreeMap<String, EventTable>,
}

impl TableSet {
    /// Returns every embedded table.
    ///
    /// # Panics
    ///
    /// Panics if any embedded TOML is malformed (the tables are compiled in,
    /// so this is covered by the registry tests).
    #[must_use]
    pub fn embedded() -> Self {
        let mut set = Self::default();
        for (name, text) in TABLE_TOMLS {
            let definition = parse_table_toml(text)
                .unwrap_or_else(|e| panic!("Failed to parse {name}.toml: {e}"));
            set.insert(definition)
                .unwrap_or_else(|e| panic!("Invalid table {name}.toml: {e}"));
        }
        log::debug!(
            "Loaded {} rules, {} bin tables, {} band tables, {} event tables",
            set.rules.len(),
            set.bins.len(),
            set.bands.len(),
            set.events.len()
        );
        set
    }

    /// Validates a definition and adds it to the set, replacing any table
    /// of the same kind and name.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::InvalidTable`] if the definition breaks its
    /// table's invariants.
    pub fn insert(&mut self, definition: TableDefinition) -> Result<(), TableError> {
        match definition {
            TableDefinition::Rule {
                name,
                scores,
                default,
                ..
            } => {
                let rule = ScoringRule::new(name.clone(), scores, default)?;
                self.rules.insert(name, rule);
            }
            TableDefinition::Bins { name, bins, .. } => {
                let table = BinTable::new(name.clone(), bins)?;
                self.bins.insert(name, table);
            }
            TableDefinition::Bands {
                name,
                bands,
                no_data_score,
                ..
            } => {
                let table = BandTable::new(name.clone(), bands, no_data_score)?;
                self.bands.insert(name, table);
            }
            TableDefinition::Events { name, events, .. } => {
                let table = EventTable::new(
                    name.clone(),
                    events.into_iter().map(|(k, v)| {
                        (
                            k,
                            EventRule {
                                radius_m: v.radius_m,
                                score: v.score,
                            },
                        )
                    }),
                )?;
                self.events.insert(name, table);
            }
        }
        Ok(())
    }

    /// Looks up a classification rule.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::MissingTable`] if no rule has this name.
    pub fn rule(&self, name: &str) -> Result<&ScoringRule, TableError> {
        self.rules.get(name).ok_or_else(|| missing("rule", name))
    }

    /// Looks up a bin table.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::MissingTable`] if no bin table has this name.
    pub fn bins(&self, name: &str) -> Result<&BinTable, TableError> {
        self.bins.get(name).ok_or_else(|| missing("bins", name))
    }

    /// Looks up a band table.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::MissingTable`] if no band table has this name.
    pub fn bands(&self, name: &str) -> Result<&BandTable, TableError> {
        self.bands.get(name).ok_or_else(|| missing("bands", name))
    }

    /// Looks up an event table.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::MissingTable`] if no event table has this name.
    pub fn events(&self, name: &str) -> Result<&EventTable, TableError> {
        self.events.get(name).ok_or_else(|| missing("events", name))
    }
}

fn missing(kind: &'static str, name: &str) -> TableError {
    TableError::MissingTable {
        kind,
        name: name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_all_embedded_tables() {
        let set = TableSet::embedded();
        assert_eq!(
            set.rules.len() + set.bins.len() + set.bands.len() + set.events.len(),
            TABLE_TOMLS.len()
        );
    }

    #[test]
    fn registry_keys_match_table_names() {
        for (key, text) in TABLE_TOMLS {
            let name = match parse_table_toml(text).unwrap() {
                TableDefinition::Rule { name, .. }
                | TableDefinition::Bins { name, .. }
                | TableDefinition::Bands { name, .. }
                | TableDefinition::Events { name, .. } => name,
            };
            assert_eq!(*key, name, "{key}.toml declares name '{name}'");
        }
    }

    #[test]
    fn road_and_cycleway_scores_match_scenario() {
        let set = TableSet::embedded();
        assert_eq!(set.rule("road_types").unwrap().score("residential"), Some(5.0));
        assert_eq!(
            set.rule("cycleway_types").unwrap().score("shared_lane"),
            Some(4.0)
        );
    }

    #[test]
    fn conflict_events_are_ordered_by_severity() {
        let set = TableSet::embedded();
        let events = set.events("acled_events").unwrap();
        let battles = events.rule("Battles").unwrap();
        let protests = events.rule("Protests").unwrap();
        assert!(battles.score.abs() < f64::EPSILON);
        assert!((protests.score - 4.0).abs() < f64::EPSILON);
        assert!(battles.radius_m > protests.radius_m);
        assert!(events.rule("Explosions/Remote violence").is_some());
    }

    #[test]
    fn hazard_bands_send_zero_to_no_hazard() {
        let set = TableSet::embedded();
        for name in [
            "fire_hazard",
            "flood_hazard",
            "landslide_hazard",
            "cyclone_hazard",
            "drought_hazard",
        ] {
            let bands = set.bands(name).unwrap();
            assert!((bands.score(Some(0.0)) - 5.0).abs() < f64::EPSILON, "{name}");
            assert!(bands.score(Some(1e9)).abs() < f64::EPSILON, "{name}");
        }
    }

    #[test]
    fn missing_table_is_reported_by_kind() {
        let set = TableSet::embedded();
        let err = set.rule("nope").unwrap_err();
        assert!(matches!(err, TableError::MissingTable { kind: "rule", .. }));
    }
}
