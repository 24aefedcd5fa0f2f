//! Least-loaded worker selection.
//!
//! Scores every available candidate and picks the best. Candidates scoring
//! within `tie_epsilon` of the best form a tie set, and the winner is drawn
//! uniformly from it so near-equal workers share load instead of the first
//! one in list order taking everything.

use rand::Rng;

use crate::config::WorkerEndpoint;
use crate::error::SelectionError;

use super::probe::Capacity;

/// An available worker together with its fresh reading.
#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub worker: &'a WorkerEndpoint,
    pub capacity: Capacity,
}

/// Outcome of a selection round.
#[derive(Debug, Clone)]
pub struct Selection<'a> {
    pub worker: &'a WorkerEndpoint,
    pub score: f64,
    /// Every candidate's score, in candidate order.
    pub scores: Vec<(&'a str, f64)>,
    /// Names of the candidates the winner was drawn from.
    pub tie_set: Vec<&'a str>,
}

/// Scoring and tie-break parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Selector {
    penalty: f64,
    tie_epsilon: f64,
}

impl Default for Selector {
    fn default() -> Self {
        Self::new(3.0, 0.5)
    }
}

impl Selector {
    pub fn new(penalty: f64, tie_epsilon: f64) -> Self {
        Self {
            penalty,
            tie_epsilon,
        }
    }

    pub fn score(&self, capacity: &Capacity) -> f64 {
        capacity.score(self.penalty)
    }

    /// Picks the best candidate, breaking near-ties with `rng`.
    ///
    /// Returns [`SelectionError::NoCapacity`] when there are no candidates.
    pub fn select<'a, R: Rng + ?Sized>(
        &self,
        candidates: &[Candidate<'a>],
        rng: &mut R,
    ) -> Result<Selection<'a>, SelectionError> {
        let scores: Vec<(&'a str, f64)> = candidates
            .iter()
            .map(|c| (c.worker.name.as_str(), self.score(&c.capacity)))
            .collect();

        let best = scores
            .iter()
            .map(|(_, score)| *score)
            .fold(f64::NEG_INFINITY, f64::max);

        let tied: Vec<usize> = scores
            .iter()
            .enumerate()
            .filter(|(_, (_, score))| *score >= best - self.tie_epsilon)
            .map(|(idx, _)| idx)
            .collect();

        if tied.is_empty() {
            return Err(SelectionError::NoCapacity);
        }

        let chosen = tied[rng.gen_range(0..tied.len())];
        Ok(Selection {
            worker: candidates[chosen].worker,
            score: scores[chosen].1,
            tie_set: tied.iter().map(|&idx| scores[idx].0).collect(),
            scores,
        })
    }
}
