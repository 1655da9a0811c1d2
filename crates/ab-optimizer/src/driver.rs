//! The step-wise best-first search loop.
//!
//! One step pops the best open candidates, refines them, draws samples for
//! every child and evaluates the accumulated batches in a single scheduler
//! run. Children that drew nothing are closed at once so they still reach
//! the frontier.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, warn};

use ab_model::{Candidate, CandidateId, InstanceTree};
use ab_refine::{Refiner, Sampler};
use ab_scheduler::{
    BatchSink, CacheStats, CancelToken, EvalQueue, EvalScheduler, EvaluationCache, Evaluator,
    SampleBatch,
};
use ab_types::{CsError, CsResult};

use crate::config::SearchConfig;
use crate::solution::{BestSolution, SolutionCache};
use crate::status::{SearchState, SearchStatus};

/// Result of one [`SearchDriver::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Progress {
        refined: usize,
        children: usize,
        batches: usize,
        samples: usize,
    },
    /// The frontier was empty.
    NoProgress,
}

/// Drives one search run. Not shareable across threads; stop it from
/// elsewhere through [`SearchDriver::stop_handle`].
pub struct SearchDriver {
    config: SearchConfig,
    refiner: Refiner,
    sampler: Sampler,
    scheduler: Box<dyn EvalScheduler>,
    evaluator: Arc<dyn Evaluator>,
    solutions: SolutionCache,
    cache: Option<Arc<EvaluationCache>>,
    status: SearchStatus,
    stop: CancelToken,
}

/// Forwards closed batches to the solution cache, remembering which
/// refinements were closed.
struct StepSink<'a> {
    solutions: &'a mut SolutionCache,
    closed: &'a mut HashSet<CandidateId>,
}

impl BatchSink for StepSink<'_> {
    fn close(
        &mut self,
        refinement: Candidate,
        witnesses: Vec<InstanceTree>,
        scores: Vec<Option<f64>>,
    ) -> CsResult<()> {
        self.closed.insert(refinement.id());
        self.solutions.close(refinement, witnesses, scores)
    }
}

impl SearchDriver {
    pub(crate) fn new(
        config: SearchConfig,
        refiner: Refiner,
        sampler: Sampler,
        scheduler: Box<dyn EvalScheduler>,
        evaluator: Arc<dyn Evaluator>,
        roots: Vec<Candidate>,
        cache: Option<Arc<EvaluationCache>>,
    ) -> Self {
        let mut solutions = SolutionCache::new();
        for root in roots {
            solutions.push(root);
        }
        let status = SearchStatus::new(&config);
        Self {
            config,
            refiner,
            sampler,
            scheduler,
            evaluator,
            solutions,
            cache,
            status,
            stop: CancelToken::new(),
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn status(&self) -> &SearchStatus {
        &self.status
    }

    pub fn solutions(&self) -> &SolutionCache {
        &self.solutions
    }

    pub fn best(&self) -> Option<&BestSolution> {
        self.solutions.best()
    }

    pub fn frontier_len(&self) -> usize {
        self.solutions.frontier().len()
    }

    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|cache| cache.stats())
    }

    /// Handle that stops the search from another thread.
    pub fn stop_handle(&self) -> CancelToken {
        self.stop.clone()
    }

    /// Install a fresh stop token after a cancellation so the search can
    /// continue. Handles obtained earlier no longer affect this driver.
    pub fn resume(&mut self) -> CancelToken {
        self.stop = CancelToken::new();
        if self.status.is_finished() {
            self.status.mark_running();
        }
        self.stop.clone()
    }

    pub fn step(&mut self) -> CsResult<StepOutcome> {
        if self.stop.is_cancelled() {
            self.status.mark_cancelled();
            return Err(CsError::Cancelled);
        }
        if self.solutions.frontier().is_empty() {
            return Ok(StepOutcome::NoProgress);
        }
        if self.status.state != SearchState::Running {
            self.status.mark_running();
        }

        match self.build_queue() {
            Ok((queue, queued, refined, children)) => {
                self.evaluate(queue, queued, refined, children)
            }
            Err(error) => {
                self.status.mark_failed(error.to_string());
                Err(error)
            }
        }
    }

    /// Pop and refine until enough samples are queued or the frontier is
    /// empty. At least one candidate is popped per call.
    fn build_queue(&mut self) -> CsResult<(EvalQueue, Vec<Candidate>, usize, usize)> {
        let mut queue = EvalQueue::new();
        let mut queued = Vec::new();
        let (mut refined, mut children_total) = (0, 0);

        while let Some(parent) = self.solutions.pop() {
            refined += 1;
            let children = self.refiner.refine(&parent)?;
            children_total += children.len();

            let to_sample = if !children.is_empty() {
                children
            } else if parent.is_closed() || parent.is_first_generation() {
                debug!(candidate = %parent.id(), "Candidate exhausted");
                Vec::new()
            } else {
                // Returned unevaluated by a cancelled step. Evaluate it
                // before it leaves the frontier.
                debug!(candidate = %parent.id(), "Sampling unreported leaf");
                vec![parent]
            };

            for candidate in to_sample {
                let samples = self
                    .sampler
                    .draw(&candidate, self.config.samples_per_refinement)?;
                if samples.is_empty() {
                    self.solutions.close(candidate, Vec::new(), Vec::new())?;
                    continue;
                }
                queued.push(candidate.clone());
                queue.push(SampleBatch::new(
                    candidate,
                    samples,
                    self.config.batch_timeout(),
                    self.config.sample_timeout(),
                ));
            }

            if queue.total_samples() >= self.config.min_eval_queue_size {
                break;
            }
        }
        Ok((queue, queued, refined, children_total))
    }

    fn evaluate(
        &mut self,
        queue: EvalQueue,
        queued: Vec<Candidate>,
        refined: usize,
        children: usize,
    ) -> CsResult<StepOutcome> {
        let batches = queue.len();
        let samples = queue.total_samples();
        self.status.steps += 1;
        self.status.candidates_refined += refined;
        self.status.children_created += children;

        if !queue.is_empty() {
            let mut closed = HashSet::new();
            let mut sink = StepSink {
                solutions: &mut self.solutions,
                closed: &mut closed,
            };
            let result = self.scheduler.run(queue, &self.evaluator, &mut sink, &self.stop);
            self.status.batches_closed = self.solutions.batches_closed();
            match result {
                Ok(summaries) => {
                    for summary in &summaries {
                        self.status.record_batch(summary);
                    }
                }
                Err(CsError::Cancelled) => {
                    // Unfinished refinements go back unevaluated.
                    let mut returned = 0;
                    for candidate in queued.into_iter().filter(|c| !closed.contains(&c.id())) {
                        self.solutions.push(candidate);
                        returned += 1;
                    }
                    warn!(returned, "Search cancelled during evaluation");
                    self.status.mark_cancelled();
                    return Err(CsError::Cancelled);
                }
                Err(error) => {
                    self.status.mark_failed(error.to_string());
                    return Err(error);
                }
            }
        }

        self.status.batches_closed = self.solutions.batches_closed();
        if let Some(score) = self.solutions.best_score() {
            self.status.update_best(score);
        }
        if self.solutions.take_new_best() {
            debug!(
                score = ?self.status.best_score,
                step = self.status.steps,
                "Step improved best score"
            );
        }
        debug!(
            step = self.status.steps,
            refined,
            children,
            batches,
            samples,
            frontier = self.frontier_len(),
            "Search step finished"
        );
        Ok(StepOutcome::Progress {
            refined,
            children,
            batches,
            samples,
        })
    }

    /// Step until the frontier is exhausted.
    pub fn run_all(&mut self) -> CsResult<Option<BestSolution>> {
        self.run(None)
    }

    /// Step until the frontier is exhausted or `deadline` passes. A search
    /// stopped by the deadline stays running and can be continued.
    pub fn run_until(&mut self, deadline: Instant) -> CsResult<Option<BestSolution>> {
        self.run(Some(deadline))
    }

    fn run(&mut self, deadline: Option<Instant>) -> CsResult<Option<BestSolution>> {
        info!(
            search = %self.config.name,
            frontier = self.frontier_len(),
            scheduler = self.scheduler.name(),
            "Starting search"
        );
        loop {
            if deadline.is_some_and(|d| Instant::now() >= d) {
                info!(
                    steps = self.status.steps,
                    best = ?self.status.best_score,
                    "Search deadline reached"
                );
                break;
            }
            if self.step()? == StepOutcome::NoProgress {
                self.status.mark_completed();
                info!(
                    steps = self.status.steps,
                    samples = self.status.samples_evaluated,
                    best = ?self.status.best_score,
                    "Search space exhausted"
                );
                break;
            }
        }
        Ok(self.solutions.best().cloned())
    }
}
