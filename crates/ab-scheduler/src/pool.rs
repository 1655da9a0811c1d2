//! Bounded worker pool for sample evaluation.

use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::info;

use ab_types::{CsResult, ScheduleError};

/// A fixed-size rayon pool that can be torn down and rebuilt.
///
/// Rebuilding abandons the old pool: jobs still running on it finish on
/// their own threads, which exit once the old pool drains.
pub struct WorkerPool {
    threads: usize,
    generation: u64,
    inner: ThreadPool,
}

impl WorkerPool {
    pub fn new(threads: usize) -> CsResult<Self> {
        Ok(Self {
            threads,
            generation: 0,
            inner: Self::build(threads, 0)?,
        })
    }

    fn build(threads: usize, generation: u64) -> CsResult<ThreadPool> {
        ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(move |i| format!("arbor-eval-{generation}-{i}"))
            .build()
            .map_err(|e| {
                ScheduleError::PoolCreation {
                    message: e.to_string(),
                }
                .into()
            })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Number of times the pool has been rebuilt.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.spawn(job);
    }

    /// Replace the pool with a fresh one of the same size.
    pub fn reset(&mut self) -> CsResult<()> {
        let generation = self.generation + 1;
        self.inner = Self::build(self.threads, generation)?;
        self.generation = generation;
        info!(threads = self.threads, generation, "Worker pool recreated");
        Ok(())
    }
}
