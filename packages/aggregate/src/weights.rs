//! Weight normalization and proportional rebalancing.

use geest_model_models::WEIGHT_EPSILON;

use crate::AggregateError;

/// One member of an aggregation group as configured.
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    /// Member identifier.
    pub id: String,
    /// Configured weight in `[0, 1]`.
    pub weight: f64,
    /// Whether the member takes part.
    pub used: bool,
}

impl Member {
    #[must_use]
    pub fn new(id: impl Into<String>, weight: f64, used: bool) -> Self {
        Self {
            id: id.into(),
            weight,
            used,
        }
    }
}

/// Effective weights of a group, in member order. Excluded members are
/// present with weight 0.
#[derive(Debug, Clone, PartialEq)]
pub struct Weights {
    entries: Vec<(String, f64)>,
}

impl Weights {
    /// Effective weight of a member.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<f64> {
        self.entries.iter().find(|(m, _)| m == id).map(|(_, w)| *w)
    }

    /// Members with a positive weight.
    pub fn used(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries
            .iter()
            .filter(|(_, w)| *w > 0.0)
            .map(|(id, w)| (id.as_str(), *w))
    }

    /// Every member in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.entries.iter().map(|(id, w)| (id.as_str(), *w))
    }

    /// Sum of all effective weights.
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.entries.iter().map(|(_, w)| w).sum()
    }
}

/// Computes effective weights for `group`.
///
/// Excluded members get weight 0. Used members are redistributed in
/// proportion to their configured weights, `w_i / sum(w_used)`. If every
/// used weight is 0 the used members share equally. With `rebalance` off,
/// used weights must already sum to 1, so all-zero weights are an error.
///
/// # Errors
///
/// Returns [`AggregateError::NoUsedMembers`] if nothing is used, or
/// [`AggregateError::WeightImbalance`] if rebalancing is off and the used
/// weights do not sum to 1.
#[allow(clippy::cast_precision_loss)]
pub fn rebalance(group: &str, members: &[Member], rebalance: bool) -> Result<Weights, AggregateError> {
    let used: Vec<&Member> = members.iter().filter(|m| m.used).collect();
    if used.is_empty() {
        return Err(AggregateError::NoUsedMembers {
            group: group.to_string(),
        });
    }

    let sum: f64 = used.iter().map(|m| m.weight.max(0.0)).sum();

    let effective = |m: &Member| -> f64 {
        if !m.used {
            0.0
        } else if sum <= 0.0 {
            1.0 / used.len() as f64
        } else {
            m.weight.max(0.0) / sum
        }
    };

    if !rebalance && (sum - 1.0).abs() > WEIGHT_EPSILON {
        return Err(AggregateError::WeightImbalance {
            group: group.to_string(),
            sum,
        });
    }

    if sum <= 0.0 {
        log::warn!("{group}: all used weights are 0, weighting members equally");
    } else if (sum - 1.0).abs() > WEIGHT_EPSILON {
        log::info!("{group}: rebalanced used weights from a sum of {sum:.4}");
    }

    Ok(Weights {
        entries: members.iter().map(|m| (m.id.clone(), effective(m))).collect(),
    })
}
