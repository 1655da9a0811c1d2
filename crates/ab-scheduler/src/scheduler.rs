//! Concurrent evaluation of sample batches under per-sample and per-batch
//! deadlines.
//!
//! Every sample of every batch is submitted to the worker pool up front. A
//! sample's timer starts when a worker picks it up; a batch's timer starts
//! when its first sample is submitted. The coordinating loop on the calling
//! thread sleeps until the soonest deadline (or the next completion),
//! interrupts whatever has overrun, and hands each batch to the
//! [`BatchSink`] once all of its samples are terminal.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};

use ab_model::{Candidate, InstanceTree};
use ab_types::{internal_error, CsError, CsResult, ScheduleError};

use crate::batch::{gather, BatchSink, BatchSummary, EvalQueue, SampleBatch, SampleOutcome};
use crate::cache::EvaluationCache;
use crate::evaluator::{CancelToken, EvalError, Evaluator};
use crate::pool::WorkerPool;
use crate::timer::{Timer, TimerState};

/// Runs a queue of batches against an evaluator.
pub trait EvalScheduler: Send {
    /// Evaluate every batch, closing each one on `sink` as it completes.
    ///
    /// Returns one summary per batch, in queue order. If `stop` fires, the
    /// unfinished batches are discarded and `CsError::Cancelled` is returned;
    /// batches already closed stay closed.
    fn run(
        &mut self,
        queue: EvalQueue,
        evaluator: &Arc<dyn Evaluator>,
        sink: &mut dyn BatchSink,
        stop: &CancelToken,
    ) -> CsResult<Vec<BatchSummary>>;

    fn name(&self) -> &str;
}

/// How one evaluator call ended.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Completion {
    Returned(Result<Option<f64>, EvalError>),
    Panicked,
}

impl Completion {
    pub(crate) fn capture(
        evaluator: &dyn Evaluator,
        sample: &InstanceTree,
        cancel: &CancelToken,
    ) -> Self {
        match catch_unwind(AssertUnwindSafe(|| evaluator.evaluate(sample, cancel))) {
            Ok(result) => Self::Returned(result),
            Err(_) => Self::Panicked,
        }
    }

    /// Outcome of a call that finished on time.
    pub(crate) fn into_outcome(self) -> SampleOutcome {
        match self {
            Self::Returned(Ok(Some(score))) if !score.is_nan() => SampleOutcome::Scored(score),
            Self::Returned(Ok(_)) => SampleOutcome::NoScore,
            Self::Returned(Err(error)) => {
                warn!(%error, "Evaluator returned an error");
                SampleOutcome::NoScore
            }
            Self::Panicked => {
                warn!("Evaluator panicked");
                SampleOutcome::NoScore
            }
        }
    }
}

enum Event {
    Started,
    Finished {
        batch: usize,
        sample: usize,
        completion: Completion,
    },
    Skipped {
        batch: usize,
        sample: usize,
    },
}

/// Timer state shared between the coordinating loop and the workers.
struct SampleSlot {
    timer: Mutex<Timer>,
    cancel: CancelToken,
}

struct BatchSlot {
    timer: Mutex<Timer>,
    samples: Vec<SampleSlot>,
}

impl BatchSlot {
    fn new(batch: &SampleBatch) -> Self {
        Self {
            timer: Mutex::new(Timer::new(batch.batch_timeout)),
            samples: batch
                .samples
                .iter()
                .map(|_| SampleSlot {
                    timer: Mutex::new(Timer::new(batch.sample_timeout)),
                    cancel: CancelToken::new(),
                })
                .collect(),
        }
    }

    fn cancel_all(&self) {
        for sample in &self.samples {
            sample.cancel.cancel();
        }
    }
}

/// Coordinator-side bookkeeping for one run.
struct RunState {
    refinements: Vec<Option<Candidate>>,
    samples: Vec<Vec<InstanceTree>>,
    outcomes: Vec<Vec<Option<SampleOutcome>>>,
    summaries: Vec<Option<BatchSummary>>,
    started_at: Instant,
}

impl RunState {
    fn new(batches: Vec<SampleBatch>) -> Self {
        let mut state = Self {
            refinements: Vec::with_capacity(batches.len()),
            samples: Vec::with_capacity(batches.len()),
            outcomes: Vec::with_capacity(batches.len()),
            summaries: Vec::with_capacity(batches.len()),
            started_at: Instant::now(),
        };
        for batch in batches {
            state.outcomes.push(vec![None; batch.samples.len()]);
            state.summaries.push(None);
            state.refinements.push(Some(batch.refinement));
            state.samples.push(batch.samples);
        }
        state
    }

    fn is_closed(&self, batch: usize) -> bool {
        self.summaries[batch].is_some()
    }

    fn all_closed(&self) -> bool {
        self.summaries.iter().all(Option::is_some)
    }

    fn record(&mut self, batch: usize, sample: usize, outcome: SampleOutcome) {
        self.outcomes[batch][sample].get_or_insert(outcome);
    }
}

/// Evaluates samples concurrently on a bounded worker pool.
pub struct ParallelScheduler {
    pool: WorkerPool,
    poll_interval: Duration,
    cache: Option<Arc<EvaluationCache>>,
}

impl ParallelScheduler {
    /// `poll_interval` bounds how long the loop sleeps between checks of
    /// the stop token.
    pub fn new(threads: usize, poll_interval: Duration) -> CsResult<Self> {
        Ok(Self {
            pool: WorkerPool::new(threads)?,
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            cache: None,
        })
    }

    pub fn with_cache(mut self, cache: Arc<EvaluationCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    fn submit(
        &self,
        slots: &Arc<Vec<BatchSlot>>,
        state: &mut RunState,
        evaluator: &Arc<dyn Evaluator>,
        tx: &Sender<Event>,
    ) {
        for (b, batch) in state.samples.iter().enumerate() {
            for (s, sample) in batch.iter().enumerate() {
                if let Some(score) = self.cache.as_ref().and_then(|c| c.get(sample)) {
                    let now = Instant::now();
                    let mut timer = slots[b].samples[s].timer.lock();
                    timer.start(now);
                    timer.end(now);
                    state.outcomes[b][s] = Some(SampleOutcome::Scored(score));
                    continue;
                }
                slots[b].timer.lock().start(Instant::now());

                let slots = Arc::clone(slots);
                let evaluator = Arc::clone(evaluator);
                let sample = sample.clone();
                let tx = tx.clone();
                self.pool.spawn(move || {
                    let batch_slot = &slots[b];
                    let slot = &batch_slot.samples[s];
                    let skipped = Event::Skipped { batch: b, sample: s };
                    if slot.cancel.is_cancelled() {
                        let _ = tx.send(skipped);
                        return;
                    }
                    let now = Instant::now();
                    {
                        let batch_timer = batch_slot.timer.lock();
                        if batch_timer.is_terminal() || batch_timer.is_expired(now) {
                            let _ = tx.send(skipped);
                            return;
                        }
                    }
                    if !slot.timer.lock().start(now) {
                        let _ = tx.send(skipped);
                        return;
                    }
                    let _ = tx.send(Event::Started);
                    let completion = Completion::capture(evaluator.as_ref(), &sample, &slot.cancel);
                    let _ = tx.send(Event::Finished {
                        batch: b,
                        sample: s,
                        completion,
                    });
                });
            }
        }
    }

    fn apply(&self, event: Event, slots: &[BatchSlot], state: &mut RunState) {
        let now = Instant::now();
        match event {
            Event::Started => {}
            Event::Skipped { batch, sample } => {
                slots[batch].samples[sample].timer.lock().interrupt(now);
                state.record(batch, sample, SampleOutcome::TimedOut);
            }
            Event::Finished {
                batch,
                sample,
                completion,
            } => {
                let mut timer = slots[batch].samples[sample].timer.lock();
                if timer.state() == TimerState::Interrupted {
                    // Already timed out; a late result is discarded.
                    return;
                }
                timer.end(now);
                drop(timer);
                let outcome = completion.into_outcome();
                if let (Some(cache), SampleOutcome::Scored(score)) = (&self.cache, outcome) {
                    cache.insert(&state.samples[batch][sample], score);
                }
                state.record(batch, sample, outcome);
            }
        }
    }

    /// Interrupt every sample past its own or its batch's deadline.
    fn enforce_deadlines(&self, slots: &[BatchSlot], state: &mut RunState, now: Instant) {
        for (b, batch_slot) in slots.iter().enumerate() {
            if state.is_closed(b) {
                continue;
            }
            let batch_expired = batch_slot.timer.lock().is_expired(now);
            for (s, slot) in batch_slot.samples.iter().enumerate() {
                if state.outcomes[b][s].is_some() {
                    continue;
                }
                let mut timer = slot.timer.lock();
                let overdue = match timer.state() {
                    TimerState::Pending => batch_expired,
                    TimerState::Running => batch_expired || timer.is_expired(now),
                    TimerState::Ended | TimerState::Interrupted => false,
                };
                if overdue {
                    timer.interrupt(now);
                    drop(timer);
                    slot.cancel.cancel();
                    debug!(batch = b, sample = s, batch_expired, "Sample timed out");
                    state.record(b, s, SampleOutcome::TimedOut);
                }
            }
        }
    }

    /// Time until the next deadline among unfinished samples.
    fn next_deadline(
        &self,
        slots: &[BatchSlot],
        state: &RunState,
        now: Instant,
    ) -> Option<Duration> {
        let mut soonest: Option<Duration> = None;
        for (b, batch_slot) in slots.iter().enumerate() {
            if state.is_closed(b) {
                continue;
            }
            let batch_left = batch_slot.timer.lock().remaining(now);
            for (s, slot) in batch_slot.samples.iter().enumerate() {
                if state.outcomes[b][s].is_some() {
                    continue;
                }
                let sample_left = slot.timer.lock().remaining(now);
                let left = match (sample_left, batch_left) {
                    (Some(own), Some(shared)) => Some(own.min(shared)),
                    (own, shared) => own.or(shared),
                };
                if let Some(left) = left {
                    soonest = Some(soonest.map_or(left, |current| current.min(left)));
                }
            }
        }
        soonest
    }

    /// Close every batch whose samples are all terminal.
    fn close_finished(
        &self,
        slots: &[BatchSlot],
        state: &mut RunState,
        sink: &mut dyn BatchSink,
    ) -> CsResult<()> {
        let now = Instant::now();
        for b in 0..slots.len() {
            if state.is_closed(b) || state.outcomes[b].iter().any(Option::is_none) {
                continue;
            }
            let outcomes: Vec<SampleOutcome> =
                state.outcomes[b].iter().flatten().copied().collect();
            let elapsed = {
                let mut timer = slots[b].timer.lock();
                timer.end(now);
                timer.elapsed(now)
            };
            let refinement = state.refinements[b]
                .take()
                .ok_or_else(|| internal_error!("batch {b} closed twice"))?;
            let summary = BatchSummary {
                refinement: refinement.id(),
                outcomes,
                elapsed,
            };
            let samples = std::mem::take(&mut state.samples[b]);
            let (witnesses, scores) = gather(samples, &summary.outcomes);
            debug!(
                candidate = %summary.refinement,
                witnesses = witnesses.len(),
                scored = summary.scored(),
                timed_out = summary.timed_out(),
                "Batch closed"
            );
            state.summaries[b] = Some(summary);
            sink.close(refinement, witnesses, scores)?;
        }
        Ok(())
    }
}

impl EvalScheduler for ParallelScheduler {
    fn run(
        &mut self,
        queue: EvalQueue,
        evaluator: &Arc<dyn Evaluator>,
        sink: &mut dyn BatchSink,
        stop: &CancelToken,
    ) -> CsResult<Vec<BatchSummary>> {
        let batches = queue.into_batches();
        let slots: Arc<Vec<BatchSlot>> = Arc::new(batches.iter().map(BatchSlot::new).collect());
        let mut state = RunState::new(batches);
        let (tx, rx) = unbounded();
        self.submit(&slots, &mut state, evaluator, &tx);

        loop {
            if stop.is_cancelled() {
                for slot in slots.iter() {
                    slot.cancel_all();
                }
                warn!(
                    open_batches = state.summaries.iter().filter(|s| s.is_none()).count(),
                    "Evaluation cancelled, discarding unfinished batches"
                );
                self.pool.reset()?;
                return Err(CsError::Cancelled);
            }

            let now = Instant::now();
            self.enforce_deadlines(&slots, &mut state, now);
            self.close_finished(&slots, &mut state, sink)?;
            if state.all_closed() {
                break;
            }

            let wait = self
                .next_deadline(&slots, &state, now)
                .map_or(self.poll_interval, |d| d.min(self.poll_interval));
            match rx.recv_timeout(wait) {
                Ok(event) => self.apply(event, &slots, &mut state),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ScheduleError::Disconnected.into());
                }
            }
            while let Ok(event) = rx.try_recv() {
                self.apply(event, &slots, &mut state);
            }
        }

        debug!(
            batches = state.summaries.len(),
            elapsed_ms = state.started_at.elapsed().as_millis() as u64,
            "Scheduler run finished"
        );
        Ok(state.summaries.into_iter().flatten().collect())
    }

    fn name(&self) -> &str {
        "parallel"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ab_types::{Component, ParamValue};
    use std::thread;

    /// Closes batches into a plain list.
    #[derive(Default)]
    struct Collect {
        closed: Vec<(Candidate, Vec<InstanceTree>, Vec<Option<f64>>)>,
    }

    impl BatchSink for Collect {
        fn close(
            &mut self,
            refinement: Candidate,
            witnesses: Vec<InstanceTree>,
            scores: Vec<Option<f64>>,
        ) -> CsResult<()> {
            self.closed.push((refinement, witnesses, scores));
            Ok(())
        }
    }

    fn component() -> Arc<Component> {
        Arc::new(
            Component::new("job")
                .add_numeric("sleep_ms", 0.0, 10_000.0)
                .add_numeric("score", -10.0, 10.0),
        )
    }

    fn job(sleep_ms: f64, score: f64) -> InstanceTree {
        InstanceTree::new(component())
            .with_params(
                &[],
                [
                    ("sleep_ms".to_string(), ParamValue::Number(sleep_ms)),
                    ("score".to_string(), ParamValue::Number(score)),
                ],
            )
            .unwrap()
    }

    fn param(sample: &InstanceTree, name: &str) -> f64 {
        sample.root().value(name).unwrap().bounds().unwrap().0
    }

    /// Sleeps in small steps so cancellation is honoured, then returns the
    /// encoded score. Negative scores are reported as failures.
    fn sleeper() -> Arc<dyn Evaluator> {
        Arc::new(|sample: &InstanceTree, cancel: &CancelToken| -> Result<Option<f64>, EvalError> {
            let deadline = Instant::now() + Duration::from_millis(param(sample, "sleep_ms") as u64);
            while Instant::now() < deadline {
                cancel.check()?;
                thread::sleep(Duration::from_millis(2));
            }
            let score = param(sample, "score");
            if score < 0.0 {
                return Err(EvalError::Failed("negative".into()));
            }
            Ok(Some(score))
        })
    }

    fn batch(samples: Vec<InstanceTree>, batch_ms: u64, sample_ms: u64) -> SampleBatch {
        SampleBatch::new(
            Candidate::root(InstanceTree::new(component())),
            samples,
            Duration::from_millis(batch_ms),
            Duration::from_millis(sample_ms),
        )
    }

    fn scheduler() -> ParallelScheduler {
        ParallelScheduler::new(4, Duration::from_millis(5)).unwrap()
    }

    #[test]
    fn slow_sample_is_excluded_fast_sibling_kept() {
        let mut queue = EvalQueue::new();
        queue.push(batch(vec![job(200.0, 0.9), job(10.0, 0.5)], 5_000, 50));
        let mut sink = Collect::default();

        let summaries = scheduler()
            .run(queue, &sleeper(), &mut sink, &CancelToken::new())
            .unwrap();

        assert_eq!(summaries.len(), 1);
        assert_eq!(
            summaries[0].outcomes,
            vec![SampleOutcome::TimedOut, SampleOutcome::Scored(0.5)]
        );
        assert_eq!(sink.closed.len(), 1);
        let (_, witnesses, scores) = &sink.closed[0];
        assert_eq!(witnesses.len(), 1);
        assert_eq!(param(&witnesses[0], "score"), 0.5);
        assert_eq!(scores, &vec![Some(0.5)]);
    }

    #[test]
    fn failures_are_witnesses_without_score() {
        let mut queue = EvalQueue::new();
        queue.push(batch(vec![job(0.0, -1.0), job(0.0, 2.0)], 5_000, 1_000));
        let mut sink = Collect::default();
        let summaries = scheduler()
            .run(queue, &sleeper(), &mut sink, &CancelToken::new())
            .unwrap();
        assert_eq!(summaries[0].outcomes, vec![SampleOutcome::NoScore, SampleOutcome::Scored(2.0)]);
        assert_eq!(sink.closed[0].2, vec![None, Some(2.0)]);
    }

    #[test]
    fn panicking_evaluator_yields_no_score() {
        let evaluator: Arc<dyn Evaluator> =
            Arc::new(|_: &InstanceTree, _: &CancelToken| -> Result<Option<f64>, EvalError> {
                panic!("boom");
            });
        let mut queue = EvalQueue::new();
        queue.push(batch(vec![job(0.0, 1.0)], 5_000, 1_000));
        let mut sink = Collect::default();
        let summaries = scheduler()
            .run(queue, &evaluator, &mut sink, &CancelToken::new())
            .unwrap();
        assert_eq!(summaries[0].outcomes, vec![SampleOutcome::NoScore]);
        assert_eq!(sink.closed[0].1.len(), 1);
    }

    #[test]
    fn empty_batch_still_closes() {
        let mut queue = EvalQueue::new();
        queue.push(batch(vec![], 5_000, 1_000));
        queue.push(batch(vec![job(0.0, 1.0)], 5_000, 1_000));
        let mut sink = Collect::default();
        let summaries = scheduler()
            .run(queue, &sleeper(), &mut sink, &CancelToken::new())
            .unwrap();
        assert_eq!(summaries.len(), 2);
        assert!(summaries[0].outcomes.is_empty());
        assert_eq!(sink.closed.len(), 2);
        assert!(sink.closed.iter().any(|(_, w, s)| w.is_empty() && s.is_empty()));
    }

    #[test]
    fn batch_deadline_caps_long_sample_deadlines() {
        let mut queue = EvalQueue::new();
        queue.push(batch(vec![job(500.0, 1.0), job(500.0, 2.0)], 60, 5_000));
        let started = Instant::now();
        let mut sink = Collect::default();
        let summaries = scheduler()
            .run(queue, &sleeper(), &mut sink, &CancelToken::new())
            .unwrap();
        assert!(started.elapsed() < Duration::from_millis(400));
        assert_eq!(summaries[0].timed_out(), 2);
        assert!(sink.closed[0].1.is_empty());
    }

    #[test]
    fn samples_queued_behind_an_expired_batch_never_run() {
        // One worker: the second sample can only start after the first,
        // by which time the batch budget is spent.
        let mut scheduler = ParallelScheduler::new(1, Duration::from_millis(5)).unwrap();
        let mut queue = EvalQueue::new();
        queue.push(batch(vec![job(150.0, 1.0), job(0.0, 2.0)], 50, 5_000));
        let mut sink = Collect::default();
        let summaries = scheduler
            .run(queue, &sleeper(), &mut sink, &CancelToken::new())
            .unwrap();
        assert_eq!(summaries[0].outcomes, vec![SampleOutcome::TimedOut, SampleOutcome::TimedOut]);
    }

    #[test]
    fn results_are_attributed_to_their_batch() {
        let mut queue = EvalQueue::new();
        queue.push(batch(vec![job(30.0, 3.0), job(5.0, 1.0)], 5_000, 1_000));
        queue.push(batch(vec![job(1.0, 7.0)], 5_000, 1_000));
        let mut sink = Collect::default();
        let summaries = scheduler()
            .run(queue, &sleeper(), &mut sink, &CancelToken::new())
            .unwrap();
        assert_eq!(
            summaries[0].outcomes,
            vec![SampleOutcome::Scored(3.0), SampleOutcome::Scored(1.0)]
        );
        assert_eq!(summaries[1].outcomes, vec![SampleOutcome::Scored(7.0)]);
    }

    #[test]
    fn external_stop_discards_and_recreates_pool() {
        let mut scheduler = scheduler();
        let stop = CancelToken::new();
        let trigger = stop.clone();
        let stopper = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            trigger.cancel();
        });

        let mut queue = EvalQueue::new();
        queue.push(batch(vec![job(2_000.0, 1.0)], 10_000, 10_000));
        let mut sink = Collect::default();
        let started = Instant::now();
        let result = scheduler.run(queue, &sleeper(), &mut sink, &stop);
        stopper.join().unwrap();

        assert!(matches!(result, Err(CsError::Cancelled)));
        assert!(started.elapsed() < Duration::from_millis(1_000));
        assert!(sink.closed.is_empty());
        assert_eq!(scheduler.pool().generation(), 1);

        // The scheduler is usable again afterwards.
        let mut queue = EvalQueue::new();
        queue.push(batch(vec![job(0.0, 4.0)], 5_000, 1_000));
        let summaries = scheduler
            .run(queue, &sleeper(), &mut sink, &CancelToken::new())
            .unwrap();
        assert_eq!(summaries[0].outcomes, vec![SampleOutcome::Scored(4.0)]);
    }

    #[test]
    fn cached_scores_skip_evaluation() {
        let cache = Arc::new(EvaluationCache::new());
        cache.insert(&job(5_000.0, 1.0), 0.125);
        let mut scheduler = scheduler().with_cache(cache.clone());

        let mut queue = EvalQueue::new();
        queue.push(batch(vec![job(5_000.0, 1.0), job(0.0, 3.0)], 5_000, 1_000));
        let mut sink = Collect::default();
        let summaries = scheduler
            .run(queue, &sleeper(), &mut sink, &CancelToken::new())
            .unwrap();
        assert_eq!(
            summaries[0].outcomes,
            vec![SampleOutcome::Scored(0.125), SampleOutcome::Scored(3.0)]
        );
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&job(0.0, 3.0)), Some(3.0));
    }
}
