//! Categorical lookup tables.
//!
//! A [`ScoringRule`] maps a normalized attribute value to a 0-5 score. An
//! [`EventTable`] adds a default buffer radius per category for
//! severity-style inputs.

use std::collections::BTreeMap;

use geest_model_models::{MAX_SCORE, MIN_SCORE};

use crate::{TableError, normalize_key};

/// Attribute value -> score lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoringRule {
    name: String,
    scores: BTreeMap<String, f64>,
    default: Option<f64>,
}

impl ScoringRule {
    /// Builds a rule, normalizing keys and checking every score is on the
    /// 0-5 scale.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::InvalidTable`] if a score is outside `[0, 5]`
    /// or two keys collide after normalization.
    pub fn new(
        name: impl Into<String>,
        scores: impl IntoIterator<Item = (String, f64)>,
        default: Option<f64>,
    ) -> Result<Self, TableError> {
        let name = name.into();
        let mut normalized = BTreeMap::new();

        for (key, score) in scores {
            check_score(&name, &key, score)?;
            let norm = normalize_key(&key);
            if normalized.insert(norm.clone(), score).is_some() {
                return Err(TableError::InvalidTable {
                    name,
                    message: format!("key '{norm}' appears twice after normalization"),
                });
            }
        }

        if let Some(default) = default {
            check_score(&name, "default", default)?;
        }

        Ok(Self {
            name,
            scores: normalized,
            default,
        })
    }

    /// Table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Looks up a raw attribute value. Falls back to the table default, or
    /// `None` when the value is unknown and no default is set.
    #[must_use]
    pub fn score(&self, raw: &str) -> Option<f64> {
        self.scores
            .get(&normalize_key(raw))
            .copied()
            .or(self.default)
    }

    /// Number of explicit entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    /// Returns `true` if the rule has no explicit entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

/// Default area of influence and severity for one event category.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EventRule {
    /// Default buffer radius in metres.
    pub radius_m: f64,
    /// Score assigned to every cell the buffer touches (0 = most severe).
    pub score: f64,
}

/// Event category -> buffer radius and severity score.
#[derive(Debug, Clone, PartialEq)]
pub struct EventTable {
    name: String,
    events: BTreeMap<String, EventRule>,
}

impl EventTable {
    /// Builds an event table.
    ///
    /// # Errors
    ///
    /// Returns [`TableError::InvalidTable`] if a radius is not positive or a
    /// score is outside `[0, 5]`.
    pub fn new(
        name: impl Into<String>,
        events: impl IntoIterator<Item = (String, EventRule)>,
    ) -> Result<Self, TableError> {
        let name = name.into();
        let mut normalized = BTreeMap::new();

        for (key, rule) in events {
            check_score(&name, &key, rule.score)?;
            if !(rule.radius_m.is_finite() && rule.radius_m > 0.0) {
                return Err(TableError::InvalidTable {
                    name,
                    message: format!("radius {} of '{key}' must be positive", rule.radius_m),
                });
            }
            normalized.insert(normalize_key(&key), rule);
        }

        Ok(Self {
            name,
            events: normalized,
        })
    }

    /// Table name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Looks up the rule for a raw event category.
    #[must_use]
    pub fn rule(&self, category: &str) -> Option<EventRule> {
        self.events.get(&normalize_key(category)).copied()
    }

    /// Iterates categories in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &EventRule)> {
        self.events.iter().map(|(k, v)| (k.as_str(), v))
    }
}

fn check_score(table: &str, key: &str, score: f64) -> Result<(), TableError> {
    if (MIN_SCORE..=MAX_SCORE).contains(&score) {
        Ok(())
    } else {
        Err(TableError::InvalidTable {
            name: table.to_string(),
            message: format!("score {score} for '{key}' is outside [0, 5]"),
        })
    }
}
