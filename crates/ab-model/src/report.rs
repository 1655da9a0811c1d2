//! Evaluation reports: the witnesses recorded against a candidate.

use std::cmp::Ordering;

use crate::tree::InstanceTree;

/// A grounded sample together with the score it received, if any.
#[derive(Debug, Clone)]
pub struct Witness {
    pub tree: InstanceTree,
    pub score: Option<f64>,
}

/// Append-only list of witnesses. Lower scores are better.
#[derive(Debug, Clone, Default)]
pub struct EvalReport {
    witnesses: Vec<Witness>,
}

impl EvalReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from parallel lists of samples and their scores.
    pub fn from_results(witnesses: Vec<InstanceTree>, scores: Vec<Option<f64>>) -> Self {
        let mut report = Self::new();
        report.extend(witnesses, scores);
        report
    }

    /// Append results. Samples beyond the length of `scores` count as unscored.
    pub fn extend(&mut self, witnesses: Vec<InstanceTree>, scores: Vec<Option<f64>>) {
        let mut scores = scores.into_iter();
        self.witnesses.extend(witnesses.into_iter().map(|tree| Witness {
            tree,
            score: scores.next().flatten(),
        }));
    }

    pub fn push(&mut self, witness: Witness) {
        self.witnesses.push(witness);
    }

    pub fn witnesses(&self) -> &[Witness] {
        &self.witnesses
    }

    pub fn len(&self) -> usize {
        self.witnesses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.witnesses.is_empty()
    }

    /// Minimum of the present scores.
    pub fn score(&self) -> Option<f64> {
        self.witnesses
            .iter()
            .filter_map(|w| w.score)
            .filter(|s| !s.is_nan())
            .min_by(f64::total_cmp)
    }

    /// Best scored witness, if any.
    pub fn best(&self) -> Option<&Witness> {
        self.witnesses
            .iter()
            .filter(|w| w.score.is_some_and(|s| !s.is_nan()))
            .min_by(|a, b| compare_scores(a.score, b.score))
    }
}

/// Order optional scores: present before absent, then ascending.
pub fn compare_scores(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
