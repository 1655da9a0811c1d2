//! Search run lifecycle and progress counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ab_scheduler::BatchSummary;

use crate::config::{SearchConfig, SearchId};

/// Lifecycle state for a search run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchState {
    Pending,
    Running,
    /// The frontier was exhausted.
    Completed,
    Failed,
    Cancelled,
}

/// Aggregate status of a search run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchStatus {
    pub id: SearchId,
    pub name: String,
    pub state: SearchState,
    pub steps: usize,
    pub candidates_refined: usize,
    pub children_created: usize,
    pub batches_closed: usize,
    pub samples_evaluated: usize,
    pub samples_scored: usize,
    pub samples_timed_out: usize,
    pub best_score: Option<f64>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl SearchStatus {
    pub fn new(config: &SearchConfig) -> Self {
        Self {
            id: config.id,
            name: config.name.clone(),
            state: SearchState::Pending,
            steps: 0,
            candidates_refined: 0,
            children_created: 0,
            batches_closed: 0,
            samples_evaluated: 0,
            samples_scored: 0,
            samples_timed_out: 0,
            best_score: None,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        if self.started_at.is_none() {
            self.started_at = Some(Utc::now());
        }
        self.state = SearchState::Running;
        self.finished_at = None;
    }

    pub fn mark_completed(&mut self) {
        self.state = SearchState::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_cancelled(&mut self) {
        self.state = SearchState::Cancelled;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: String) {
        self.state = SearchState::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.state,
            SearchState::Completed | SearchState::Failed | SearchState::Cancelled
        )
    }

    /// Sample counters for one scheduled batch. `batches_closed` mirrors
    /// the solution cache, which also sees batches that drew no samples.
    pub fn record_batch(&mut self, summary: &BatchSummary) {
        self.samples_evaluated += summary.outcomes.len();
        self.samples_scored += summary.scored();
        self.samples_timed_out += summary.timed_out();
    }

    /// Lower is better.
    pub fn update_best(&mut self, score: f64) {
        if self.best_score.map_or(true, |best| score < best) {
            self.best_score = Some(score);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ab_scheduler::SampleOutcome;
    use std::time::Duration;

    #[test]
    fn search_status_lifecycle() {
        let mut status = SearchStatus::new(&SearchConfig::new("lifecycle"));
        assert_eq!(status.state, SearchState::Pending);
        assert!(status.started_at.is_none());

        status.mark_running();
        let started = status.started_at;
        assert!(started.is_some());
        status.mark_running();
        assert_eq!(status.started_at, started);

        status.mark_completed();
        assert!(status.is_finished());
        assert!(status.finished_at.is_some());
    }

    #[test]
    fn counters_and_best() {
        let mut status = SearchStatus::new(&SearchConfig::default());
        status.record_batch(&BatchSummary {
            refinement: uuid::Uuid::new_v4(),
            outcomes: vec![
                SampleOutcome::Scored(0.3),
                SampleOutcome::TimedOut,
                SampleOutcome::NoScore,
            ],
            elapsed: Duration::from_millis(3),
        });
        assert_eq!(status.batches_closed, 0);
        assert_eq!(status.samples_evaluated, 3);
        assert_eq!(status.samples_scored, 1);
        assert_eq!(status.samples_timed_out, 1);

        status.update_best(0.5);
        status.update_best(0.7);
        status.update_best(0.2);
        assert_eq!(status.best_score, Some(0.2));

        status.mark_failed("boom".into());
        assert_eq!(status.state, SearchState::Failed);
        assert_eq!(status.error.as_deref(), Some("boom"));
    }
}
