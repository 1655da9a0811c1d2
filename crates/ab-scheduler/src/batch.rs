//! Batches of samples and the results reported for them.

use std::time::Duration;

use ab_model::{Candidate, CandidateId, InstanceTree};
use ab_types::CsResult;

/// One refinement's samples, evaluated under shared deadlines.
#[derive(Debug, Clone)]
pub struct SampleBatch {
    pub refinement: Candidate,
    pub samples: Vec<InstanceTree>,
    /// Budget for the whole batch, counted from its first submitted sample.
    pub batch_timeout: Duration,
    /// Budget for each sample, counted from when it starts.
    pub sample_timeout: Duration,
}

impl SampleBatch {
    pub fn new(
        refinement: Candidate,
        samples: Vec<InstanceTree>,
        batch_timeout: Duration,
        sample_timeout: Duration,
    ) -> Self {
        Self {
            refinement,
            samples,
            batch_timeout,
            sample_timeout,
        }
    }
}

/// Batches handed to one scheduler run.
#[derive(Debug, Clone, Default)]
pub struct EvalQueue {
    batches: Vec<SampleBatch>,
}

impl EvalQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, batch: SampleBatch) {
        self.batches.push(batch);
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Total number of samples across all batches.
    pub fn total_samples(&self) -> usize {
        self.batches.iter().map(|b| b.samples.len()).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SampleBatch> {
        self.batches.iter()
    }

    pub fn into_batches(self) -> Vec<SampleBatch> {
        self.batches
    }
}

/// Terminal outcome of one sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SampleOutcome {
    /// Finished on time with a score.
    Scored(f64),
    /// Finished on time without a score (failure or panic).
    NoScore,
    /// Missed its own or its batch's deadline; excluded from the witnesses.
    TimedOut,
}

impl SampleOutcome {
    pub fn score(&self) -> Option<f64> {
        match self {
            Self::Scored(score) => Some(*score),
            _ => None,
        }
    }

    /// Whether the sample ended on time and so counts as a witness.
    pub fn is_witness(&self) -> bool {
        !matches!(self, Self::TimedOut)
    }
}

/// Per-batch result of a scheduler run, aligned with the batch's samples.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchSummary {
    pub refinement: CandidateId,
    pub outcomes: Vec<SampleOutcome>,
    pub elapsed: Duration,
}

impl BatchSummary {
    pub fn scored(&self) -> usize {
        self.outcomes.iter().filter(|o| o.score().is_some()).count()
    }

    pub fn timed_out(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_witness()).count()
    }

    pub fn unscored(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, SampleOutcome::NoScore))
            .count()
    }
}

/// Receives each batch once all of its samples are terminal.
pub trait BatchSink {
    /// `witnesses` and `scores` are aligned and exclude timed-out samples.
    fn close(
        &mut self,
        refinement: Candidate,
        witnesses: Vec<InstanceTree>,
        scores: Vec<Option<f64>>,
    ) -> CsResult<()>;
}

/// Split a finished batch into the sink's witness and score lists.
pub(crate) fn gather(
    samples: Vec<InstanceTree>,
    outcomes: &[SampleOutcome],
) -> (Vec<InstanceTree>, Vec<Option<f64>>) {
    samples
        .into_iter()
        .zip(outcomes)
        .filter(|(_, outcome)| outcome.is_witness())
        .map(|(sample, outcome)| (sample, outcome.score()))
        .unzip()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ab_types::Component;
    use std::sync::Arc;

    #[test]
    fn gather_excludes_timed_out_samples() {
        let tree = InstanceTree::new(Arc::new(Component::new("leaf")));
        let samples = vec![tree.clone(), tree.clone(), tree];
        let outcomes = [
            SampleOutcome::Scored(0.5),
            SampleOutcome::TimedOut,
            SampleOutcome::NoScore,
        ];
        let (witnesses, scores) = gather(samples, &outcomes);
        assert_eq!(witnesses.len(), 2);
        assert_eq!(scores, vec![Some(0.5), None]);
    }

    #[test]
    fn summary_counts() {
        let summary = BatchSummary {
            refinement: uuid::Uuid::new_v4(),
            outcomes: vec![
                SampleOutcome::Scored(1.0),
                SampleOutcome::NoScore,
                SampleOutcome::TimedOut,
                SampleOutcome::Scored(2.0),
            ],
            elapsed: Duration::from_millis(5),
        };
        assert_eq!(summary.scored(), 2);
        assert_eq!(summary.unscored(), 1);
        assert_eq!(summary.timed_out(), 1);
    }

    #[test]
    fn queue_totals() {
        let tree = InstanceTree::new(Arc::new(Component::new("leaf")));
        let mut queue = EvalQueue::new();
        for n in [2, 0, 3] {
            queue.push(SampleBatch::new(
                ab_model::Candidate::root(tree.clone()),
                vec![tree.clone(); n],
                Duration::from_secs(1),
                Duration::from_millis(100),
            ));
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.total_samples(), 5);
    }
}
