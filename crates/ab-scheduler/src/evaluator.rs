//! The evaluator contract and cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

use ab_model::InstanceTree;

/// Why an evaluation produced no score.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("Evaluation interrupted by caller")]
    Interrupted,

    #[error("Evaluation failed: {0}")]
    Failed(String),
}

/// Shared cancellation flag. Cloning yields a handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Interrupted)` once cancelled, for use with `?` inside evaluators.
    pub fn check(&self) -> Result<(), EvalError> {
        if self.is_cancelled() {
            Err(EvalError::Interrupted)
        } else {
            Ok(())
        }
    }
}

/// Scores one grounded sample. Lower is better; `Ok(None)` means the
/// sample could not be scored.
///
/// Implementations run on worker threads and should poll `cancel` during
/// long computations, returning [`EvalError::Interrupted`] promptly once it
/// is set.
pub trait Evaluator: Send + Sync {
    fn evaluate(
        &self,
        sample: &InstanceTree,
        cancel: &CancelToken,
    ) -> Result<Option<f64>, EvalError>;
}

impl<F> Evaluator for F
where
    F: Fn(&InstanceTree, &CancelToken) -> Result<Option<f64>, EvalError> + Send + Sync,
{
    fn evaluate(
        &self,
        sample: &InstanceTree,
        cancel: &CancelToken,
    ) -> Result<Option<f64>, EvalError> {
        self(sample, cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ab_types::Component;

    #[test]
    fn token_is_shared_between_clones() {
        let token = CancelToken::new();
        let handle = token.clone();
        assert!(token.check().is_ok());
        handle.cancel();
        assert!(token.is_cancelled());
        assert_eq!(token.check(), Err(EvalError::Interrupted));
    }

    #[test]
    fn closures_are_evaluators() {
        let evaluator = |sample: &InstanceTree, _: &CancelToken| -> Result<Option<f64>, EvalError> {
            Ok(Some(sample.len() as f64))
        };
        let tree = InstanceTree::new(Arc::new(Component::new("leaf")));
        assert_eq!(evaluator.evaluate(&tree, &CancelToken::new()), Ok(Some(1.0)));
    }
}
