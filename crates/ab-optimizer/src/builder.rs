//! Assembles a [`SearchDriver`] from a registry, an evaluator and a
//! configuration.

use std::sync::Arc;

use tracing::{info, warn};

use ab_model::{Candidate, InstanceTree};
use ab_refine::{Refiner, Sampler};
use ab_scheduler::{
    EvalScheduler, EvaluationCache, Evaluator, ParallelScheduler, SerialScheduler,
};
use ab_types::{validation_error, Component, ComponentRegistry, CsResult};

use crate::config::{SchedulingMode, SearchConfig};
use crate::driver::SearchDriver;

/// Name of the synthetic component that requires the requested interface.
pub const ARTIFICIAL_ROOT: &str = "ROOT";

pub struct SearchBuilder {
    registry: Arc<dyn ComponentRegistry>,
    evaluator: Arc<dyn Evaluator>,
    interface: String,
    config: SearchConfig,
}

impl SearchBuilder {
    /// Search for a configuration of something providing `interface`.
    pub fn new(
        registry: Arc<dyn ComponentRegistry>,
        evaluator: Arc<dyn Evaluator>,
        interface: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            evaluator,
            interface: interface.into(),
            config: SearchConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SearchConfig) -> Self {
        self.config = config;
        self
    }

    /// First-generation roots: one artificial root requiring the interface,
    /// or every provider of it.
    fn roots(&self) -> Vec<Candidate> {
        let providers = self.registry.providers_of(&self.interface);
        if providers.is_empty() {
            warn!(interface = %self.interface, "No component provides the requested interface");
        }
        if self.config.artificial_root {
            let root = Component::new(ARTIFICIAL_ROOT)
                .requires(self.interface.clone(), self.interface.clone());
            return vec![Candidate::root(InstanceTree::new(Arc::new(root)))];
        }
        providers
            .into_iter()
            .map(|provider| Candidate::root(InstanceTree::new(provider)))
            .collect()
    }

    pub fn build(self) -> CsResult<SearchDriver> {
        self.config.validate()?;
        if self.interface.trim().is_empty() {
            return Err(validation_error!("requested interface must not be empty"));
        }

        let seed = self.config.seed.unwrap_or_else(rand::random);
        let cache = self
            .config
            .memoize_evaluations
            .then(|| Arc::new(EvaluationCache::new()));
        let scheduler: Box<dyn EvalScheduler> = match self.config.scheduling {
            SchedulingMode::Parallel => {
                let scheduler =
                    ParallelScheduler::new(self.config.worker_threads, self.config.cancel_poll())?;
                match &cache {
                    Some(cache) => Box::new(scheduler.with_cache(Arc::clone(cache))),
                    None => Box::new(scheduler),
                }
            }
            SchedulingMode::Serial => {
                let scheduler = SerialScheduler::new();
                match &cache {
                    Some(cache) => Box::new(scheduler.with_cache(Arc::clone(cache))),
                    None => Box::new(scheduler),
                }
            }
        };

        let roots = self.roots();
        info!(
            search = %self.config.name,
            interface = %self.interface,
            roots = roots.len(),
            seed,
            scheduler = scheduler.name(),
            workers = self.config.worker_threads,
            "Search configured"
        );

        let refiner = Refiner::new(Arc::clone(&self.registry), self.config.refinement_defaults());
        let sampler = Sampler::new(
            Arc::clone(&self.registry),
            self.config.sampler_settings(),
            Some(seed),
        );
        Ok(SearchDriver::new(
            self.config,
            refiner,
            sampler,
            scheduler,
            self.evaluator,
            roots,
            cache,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ab_scheduler::{CancelToken, EvalError};
    use ab_types::{Catalog, CsError};

    fn evaluator() -> Arc<dyn Evaluator> {
        Arc::new(|_: &InstanceTree, _: &CancelToken| -> Result<Option<f64>, EvalError> {
            Ok(Some(0.0))
        })
    }

    fn registry() -> Arc<dyn ComponentRegistry> {
        Arc::new(Catalog::new(vec![Component::new("A").provides("X")]).unwrap())
    }

    #[test]
    fn blank_interface_rejected() {
        for interface in ["", "  "] {
            let result = SearchBuilder::new(registry(), evaluator(), interface).build();
            assert!(matches!(result, Err(CsError::Validation(_))));
        }
    }

    #[test]
    fn invalid_config_rejected() {
        let result = SearchBuilder::new(registry(), evaluator(), "X")
            .with_config(SearchConfig::new("broken").with_worker_threads(0))
            .build();
        assert!(matches!(result, Err(CsError::Config(_))));
    }
}
