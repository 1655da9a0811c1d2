//! Concurrent, deadline-bounded evaluation of sample batches.

pub mod batch;
pub mod cache;
pub mod evaluator;
pub mod pool;
pub mod scheduler;
pub mod serial;
pub mod timer;

pub use batch::{BatchSink, BatchSummary, EvalQueue, SampleBatch, SampleOutcome};
pub use cache::{CacheStats, EvaluationCache};
pub use evaluator::{CancelToken, EvalError, Evaluator};
pub use pool::WorkerPool;
pub use scheduler::{EvalScheduler, ParallelScheduler};
pub use serial::SerialScheduler;
pub use timer::{Timer, TimerState};
