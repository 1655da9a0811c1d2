//! The frontier plus a record of the best concrete solution seen so far.

use chrono::{DateTime, Utc};
use tracing::info;

use ab_model::{Candidate, CandidateId, InstanceTree, RefinementRecord};
use ab_scheduler::BatchSink;
use ab_types::CsResult;

use crate::frontier::Frontier;

/// Best-scoring grounded sample and the refinement it was drawn for.
#[derive(Debug, Clone)]
pub struct BestSolution {
    pub witness: InstanceTree,
    pub score: f64,
    pub refinement: CandidateId,
    /// Refinement steps that led to the owning candidate.
    pub history: Vec<RefinementRecord>,
    pub found_at: DateTime<Utc>,
}

/// Receives closed batches from the scheduler.
#[derive(Debug, Default)]
pub struct SolutionCache {
    frontier: Frontier,
    best: Option<BestSolution>,
    new_best: bool,
    batches_closed: usize,
}

impl SolutionCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frontier(&self) -> &Frontier {
        &self.frontier
    }

    pub fn push(&mut self, candidate: Candidate) {
        self.frontier.push(candidate);
    }

    pub fn pop(&mut self) -> Option<Candidate> {
        self.frontier.pop()
    }

    pub fn best(&self) -> Option<&BestSolution> {
        self.best.as_ref()
    }

    pub fn best_score(&self) -> Option<f64> {
        self.best.as_ref().map(|b| b.score)
    }

    /// Whether a new best arrived since the last call.
    pub fn take_new_best(&mut self) -> bool {
        std::mem::take(&mut self.new_best)
    }

    pub fn batches_closed(&self) -> usize {
        self.batches_closed
    }

    /// Replace the best solution if `score` is strictly better.
    fn update_best(&mut self, refinement: &Candidate, witness: &InstanceTree, score: f64) {
        if score.is_nan() {
            return;
        }
        let improves = match &self.best {
            None => true,
            Some(current) => score < current.score,
        };
        if !improves {
            return;
        }
        info!(
            score,
            previous = ?self.best_score(),
            candidate = %refinement.id(),
            solution = %witness,
            "New best solution"
        );
        self.best = Some(BestSolution {
            witness: witness.clone(),
            score,
            refinement: refinement.id(),
            history: refinement.history().to_vec(),
            found_at: Utc::now(),
        });
        self.new_best = true;
    }
}

impl BatchSink for SolutionCache {
    fn close(
        &mut self,
        refinement: Candidate,
        witnesses: Vec<InstanceTree>,
        scores: Vec<Option<f64>>,
    ) -> CsResult<()> {
        for (witness, score) in witnesses.iter().zip(&scores) {
            if let Some(score) = score {
                self.update_best(&refinement, witness, *score);
            }
        }
        self.batches_closed += 1;
        self.frontier.close(refinement, witnesses, scores);
        Ok(())
    }
}
