#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Immutable scoring tables.
//!
//! Classification rules (attribute value -> score), coverage bins, hazard
//! breakpoint bands and event buffer tables are defined as TOML files under
//! `packages/tables/tables/`, embedded at compile time and parsed once into a
//! [`TableSet`]. Scorers receive the tables they need by reference; nothing
//! here is global or mutable.

pub mod registry;
pub mod rule;
pub mod step;

pub use registry::{TableDefinition, TableSet, parse_table_toml};
pub use rule::{EventRule, EventTable, ScoringRule};
pub use step::{Band, BandTable, Bin, BinTable};

/// Errors produced while loading or querying tables.
#[derive(Debug, thiserror::Error)]
pub enum TableError {
    /// A table TOML document failed to parse.
    #[error("Failed to parse table: {0}")]
    Parse(#[from] toml::de::Error),

    /// A requested table does not exist in the set.
    #[error("Missing {kind} table '{name}'")]
    MissingTable {
        /// Requested table kind (`rule`, `bins`, `bands`, `events`).
        kind: &'static str,
        /// Requested table name.
        name: String,
    },

    /// A table violates its structural invariants.
    #[error("Invalid table '{name}': {message}")]
    InvalidTable {
        /// Table name.
        name: String,
        /// Description of what went wrong.
        message: String,
    },
}

/// Normalizes a raw attribute value for table lookup: trimmed, lowercase,
/// with spaces, slashes and dashes folded to underscores.
///
/// `"Explosions/Remote violence"` and `"explosions_remote_violence"` resolve
/// to the same key.
#[must_use]
pub fn normalize_key(raw: &str) -> String {
    let mut key = String::with_capacity(raw.len());
    let mut last_underscore = false;
    for ch in raw.trim().chars() {
        if ch == ' ' || ch == '/' || ch == '-' || ch == '_' {
            if !last_underscore && !key.is_empty() {
                key.push('_');
                last_underscore = true;
            }
        } else {
            key.extend(ch.to_lowercase());
            last_underscore = false;
        }
    }
    if key.ends_with('_') {
        key.pop();
    }
    key
}
