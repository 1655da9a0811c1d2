//! Single-threaded scheduler for debugging and deterministic runs.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use ab_types::{CsError, CsResult};

use crate::batch::{gather, BatchSink, BatchSummary, EvalQueue, SampleOutcome};
use crate::cache::EvaluationCache;
use crate::evaluator::{CancelToken, Evaluator};
use crate::scheduler::{Completion, EvalScheduler};
use crate::timer::Timer;

/// Evaluates samples one at a time on the calling thread.
///
/// An evaluator cannot be preempted here, so a sample that returns after
/// its deadline is counted as timed out, and once a batch's budget is spent
/// its remaining samples are skipped.
#[derive(Debug, Default)]
pub struct SerialScheduler {
    cache: Option<Arc<EvaluationCache>>,
}

impl SerialScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache(mut self, cache: Arc<EvaluationCache>) -> Self {
        self.cache = Some(cache);
        self
    }
}

impl EvalScheduler for SerialScheduler {
    fn run(
        &mut self,
        queue: EvalQueue,
        evaluator: &Arc<dyn Evaluator>,
        sink: &mut dyn BatchSink,
        stop: &CancelToken,
    ) -> CsResult<Vec<BatchSummary>> {
        let mut summaries = Vec::with_capacity(queue.len());
        for batch in queue.into_batches() {
            let mut batch_timer = Timer::new(batch.batch_timeout);
            batch_timer.start(Instant::now());
            let mut outcomes = Vec::with_capacity(batch.samples.len());

            for sample in &batch.samples {
                if stop.is_cancelled() {
                    return Err(CsError::Cancelled);
                }
                if batch_timer.is_expired(Instant::now()) {
                    outcomes.push(SampleOutcome::TimedOut);
                    continue;
                }
                if let Some(score) = self.cache.as_ref().and_then(|c| c.get(sample)) {
                    outcomes.push(SampleOutcome::Scored(score));
                    continue;
                }

                let cancel = CancelToken::new();
                let mut timer = Timer::new(batch.sample_timeout);
                timer.start(Instant::now());
                let completion = Completion::capture(evaluator.as_ref(), sample, &cancel);
                let now = Instant::now();
                let outcome = if timer.is_expired(now) || batch_timer.is_expired(now) {
                    timer.interrupt(now);
                    SampleOutcome::TimedOut
                } else {
                    timer.end(now);
                    completion.into_outcome()
                };
                if let (Some(cache), SampleOutcome::Scored(score)) = (&self.cache, outcome) {
                    cache.insert(sample, score);
                }
                outcomes.push(outcome);
            }

            let now = Instant::now();
            batch_timer.end(now);
            let summary = BatchSummary {
                refinement: batch.refinement.id(),
                outcomes,
                elapsed: batch_timer.elapsed(now),
            };
            let (witnesses, scores) = gather(batch.samples, &summary.outcomes);
            debug!(
                candidate = %summary.refinement,
                witnesses = witnesses.len(),
                "Batch closed"
            );
            sink.close(batch.refinement, witnesses, scores)?;
            summaries.push(summary);
        }
        Ok(summaries)
    }

    fn name(&self) -> &str {
        "serial"
    }
}
