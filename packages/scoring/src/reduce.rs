//! Commutative score reducers and the per-cell score map they fold into.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use geest_grid::{AreaGrid, CellId};

use crate::CellScores;

/// A commutative, associative combination of two scores for one cell.
pub trait Reducer {
    /// Short name used in logs.
    const NAME: &'static str;

    /// Combines the score so far with a new one.
    fn reduce(current: f64, incoming: f64) -> f64;
}

/// Best score wins (suitability scoring).
#[derive(Debug, Clone, Copy, Default)]
pub struct MaxWins;

impl Reducer for MaxWins {
    const NAME: &'static str = "max";

    fn reduce(current: f64, incoming: f64) -> f64 {
        current.max(incoming)
    }
}

/// Most severe (lowest) score wins (severity scoring).
#[derive(Debug, Clone, Copy, Default)]
pub struct MinWins;

impl Reducer for MinWins {
    const NAME: &'static str = "min";

    fn reduce(current: f64, incoming: f64) -> f64 {
        current.min(incoming)
    }
}

/// Sparse map of reduced scores for the cells a layer touched.
#[derive(Debug, Clone)]
pub struct ScoreMap<R: Reducer> {
    scores: BTreeMap<CellId, f64>,
    reducer: PhantomData<R>,
}

impl<R: Reducer> Default for ScoreMap<R> {
    fn default() -> Self {
        Self {
            scores: BTreeMap::new(),
            reducer: PhantomData,
        }
    }
}

impl<R: Reducer> ScoreMap<R> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds `score` into `cell`.
    pub fn apply(&mut self, cell: CellId, score: f64) {
        self.scores
            .entry(cell)
            .and_modify(|current| *current = R::reduce(*current, score))
            .or_insert(score);
    }

    /// Reduced score of a cell, `None` if untouched.
    #[must_use]
    pub fn get(&self, cell: CellId) -> Option<f64> {
        self.scores.get(&cell).copied()
    }

    /// Merges another shard with the same reducer.
    pub fn merge(&mut self, other: Self) {
        for (cell, score) in other.scores {
            self.apply(cell, score);
        }
    }

    /// Number of touched cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.scores.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }

    /// Touched cells in id order.
    pub fn iter(&self) -> impl Iterator<Item = (CellId, f64)> + '_ {
        self.scores.iter().map(|(id, s)| (*id, *s))
    }

    /// Expands to a dense score per cell: touched land cells keep their
    /// reduced score, untouched land cells get `untouched`, excluded cells
    /// stay no-data.
    #[must_use]
    pub fn finish(&self, grid: &AreaGrid, untouched: f64) -> CellScores {
        CellScores::from_land(grid, |id| Some(self.get(id).unwrap_or(untouched)))
    }
}

impl<R: Reducer> FromIterator<(CellId, f64)> for ScoreMap<R> {
    fn from_iter<I: IntoIterator<Item = (CellId, f64)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (cell, score) in iter {
            map.apply(cell, score);
        }
        map
    }
}
