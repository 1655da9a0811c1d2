//! Search configuration.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use ab_refine::SamplerSettings;
use ab_types::{config_error, CsResult, RefinementConfig};

/// Unique search run identifier.
pub type SearchId = Uuid;

/// How sample batches are evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingMode {
    /// Concurrently on a bounded worker pool.
    Parallel,
    /// One sample at a time on the driver thread.
    Serial,
}

impl Default for SchedulingMode {
    fn default() -> Self {
        Self::Parallel
    }
}

/// Top-level configuration for a search run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub id: SearchId,
    pub name: String,

    /// Size of the evaluation worker pool.
    pub worker_threads: usize,
    pub scheduling: SchedulingMode,

    /// Samples drawn for every refined child (witnesses it already carries
    /// count towards this).
    pub samples_per_refinement: usize,

    /// A step keeps refining until at least this many samples are queued
    /// or the frontier runs dry. A step always refines at least one
    /// candidate, so 0 means one candidate per step.
    pub min_eval_queue_size: usize,

    pub batch_timeout_ms: u64,
    pub sample_timeout_ms: u64,

    /// Sampler seed. Generated and logged when absent.
    pub seed: Option<u64>,

    /// Draw numeric values from split midpoints instead of uniformly.
    pub draw_split_means: bool,

    /// Start from one artificial root requiring the interface, rather than
    /// from every provider of it.
    pub artificial_root: bool,

    pub default_min_split_size: f64,
    pub default_refinements_per_step: usize,
    pub max_grounding_depth: usize,

    /// Upper bound on how long the scheduler waits between stop checks.
    pub cancel_poll_ms: u64,

    /// Reuse scores of structurally identical samples.
    pub memoize_evaluations: bool,

    pub created_at: DateTime<Utc>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            name: "search".to_string(),
            worker_threads: 8,
            scheduling: SchedulingMode::Parallel,
            samples_per_refinement: 2,
            min_eval_queue_size: 8,
            batch_timeout_ms: 8_000,
            sample_timeout_ms: 2_000,
            seed: None,
            draw_split_means: false,
            artificial_root: true,
            default_min_split_size: 2.0,
            default_refinements_per_step: 2,
            max_grounding_depth: 32,
            cancel_poll_ms: 10,
            memoize_evaluations: false,
            created_at: Utc::now(),
        }
    }
}

impl SearchConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Parse and validate a JSON document. Missing fields take defaults.
    pub fn from_json_str(json: &str) -> CsResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_worker_threads(mut self, n: usize) -> Self {
        self.worker_threads = n;
        self
    }

    pub fn with_scheduling(mut self, mode: SchedulingMode) -> Self {
        self.scheduling = mode;
        self
    }

    pub fn with_samples_per_refinement(mut self, n: usize) -> Self {
        self.samples_per_refinement = n;
        self
    }

    pub fn with_min_eval_queue_size(mut self, n: usize) -> Self {
        self.min_eval_queue_size = n;
        self
    }

    pub fn with_timeouts(mut self, batch: Duration, sample: Duration) -> Self {
        self.batch_timeout_ms = batch.as_millis() as u64;
        self.sample_timeout_ms = sample.as_millis() as u64;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_draw_split_means(mut self, enabled: bool) -> Self {
        self.draw_split_means = enabled;
        self
    }

    pub fn with_artificial_root(mut self, enabled: bool) -> Self {
        self.artificial_root = enabled;
        self
    }

    pub fn with_refinement_defaults(mut self, defaults: RefinementConfig) -> Self {
        self.default_min_split_size = defaults.min_split_size;
        self.default_refinements_per_step = defaults.refinements_per_step;
        self
    }

    pub fn with_memoization(mut self, enabled: bool) -> Self {
        self.memoize_evaluations = enabled;
        self
    }

    pub fn validate(&self) -> CsResult<()> {
        if self.worker_threads == 0 {
            return Err(config_error!("worker_threads must be at least 1"));
        }
        if self.samples_per_refinement == 0 {
            return Err(config_error!("samples_per_refinement must be at least 1"));
        }
        if self.batch_timeout_ms == 0 || self.sample_timeout_ms == 0 {
            return Err(config_error!(
                "timeouts must be positive (batch {} ms, sample {} ms)",
                self.batch_timeout_ms,
                self.sample_timeout_ms
            ));
        }
        if !(self.default_min_split_size.is_finite() && self.default_min_split_size > 0.0) {
            return Err(config_error!(
                "default_min_split_size must be positive, got {}",
                self.default_min_split_size
            ));
        }
        if self.default_refinements_per_step < 2 {
            return Err(config_error!(
                "default_refinements_per_step must be at least 2, got {}",
                self.default_refinements_per_step
            ));
        }
        if self.max_grounding_depth == 0 {
            return Err(config_error!("max_grounding_depth must be at least 1"));
        }
        if self.cancel_poll_ms == 0 {
            return Err(config_error!("cancel_poll_ms must be at least 1"));
        }
        Ok(())
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    pub fn sample_timeout(&self) -> Duration {
        Duration::from_millis(self.sample_timeout_ms)
    }

    pub fn cancel_poll(&self) -> Duration {
        Duration::from_millis(self.cancel_poll_ms)
    }

    pub fn refinement_defaults(&self) -> RefinementConfig {
        RefinementConfig {
            min_split_size: self.default_min_split_size,
            refinements_per_step: self.default_refinements_per_step,
        }
    }

    pub fn sampler_settings(&self) -> SamplerSettings {
        SamplerSettings {
            draw_split_means: self.draw_split_means,
            max_grounding_depth: self.max_grounding_depth,
            defaults: self.refinement_defaults(),
        }
    }
}
