//! Searches a small machine-learning pipeline catalog against a synthetic
//! loss. Run with `RUST_LOG=info` (or `debug`) to follow the search.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use ab_model::InstanceTree;
use ab_optimizer::{SearchBuilder, SearchConfig};
use ab_scheduler::{CancelToken, EvalError, Evaluator};
use ab_types::{Catalog, Component, Condition, Dependency, ParamValue, RefinementConfig};

fn catalog() -> anyhow::Result<Catalog> {
    let components = vec![
        Component::new("pipeline")
            .provides("model")
            .requires("preprocessor", "preprocessor")
            .requires("learner", "learner"),
        Component::new("scaler")
            .provides("preprocessor")
            .add_categorical("with_mean", ["true", "false"]),
        Component::new("pca")
            .provides("preprocessor")
            .add_integer("components", 1, 16),
        Component::new("svm")
            .provides("learner")
            .add_numeric("c", 0.0, 64.0)
            .add_categorical("kernel", ["linear", "rbf"])
            .with_dependency(Dependency::new(
                vec![vec![Condition::new("kernel", ParamValue::Category("linear".into()))]],
                vec![Condition::new("c", ParamValue::range(0.0, 8.0))],
            )),
        Component::new("forest")
            .provides("learner")
            .add_integer("trees", 8, 256)
            .add_integer("depth", 2, 24),
    ];
    let catalog = Catalog::new(components)?
        .with_refinement_config("forest", "trees", RefinementConfig {
            min_split_size: 16.0,
            refinements_per_step: 4,
        })?;
    Ok(catalog)
}

fn number(sample: &InstanceTree, component: &str, parameter: &str) -> Option<f64> {
    sample
        .bfs()
        .find(|node| node.component().name == component)
        .and_then(|node| node.value(parameter).ok())
        .and_then(|value| value.bounds())
        .map(|(value, _)| value)
}

fn category(sample: &InstanceTree, component: &str, parameter: &str) -> Option<String> {
    sample
        .bfs()
        .find(|node| node.component().name == component)
        .and_then(|node| node.value(parameter).ok())
        .map(|value| value.to_string())
}

/// A made-up loss with its optimum at pca(components = 6) + svm(rbf, c = 20).
struct SyntheticLoss;

impl Evaluator for SyntheticLoss {
    fn evaluate(
        &self,
        sample: &InstanceTree,
        cancel: &CancelToken,
    ) -> Result<Option<f64>, EvalError> {
        // Pretend to train for a moment.
        for _ in 0..5 {
            cancel.check()?;
            std::thread::sleep(Duration::from_millis(1));
        }

        let preprocessing = match number(sample, "pca", "components") {
            Some(components) => (components - 6.0).abs() / 16.0,
            None if category(sample, "scaler", "with_mean").as_deref() == Some("true") => 0.3,
            None => 0.4,
        };
        let learning = if let Some(c) = number(sample, "svm", "c") {
            let kernel_penalty = match category(sample, "svm", "kernel").as_deref() {
                Some("rbf") => 0.0,
                _ => 0.2,
            };
            ((c - 20.0) / 64.0).powi(2) + kernel_penalty
        } else if let Some(trees) = number(sample, "forest", "trees") {
            let depth = number(sample, "forest", "depth").unwrap_or(2.0);
            0.25 + 1.0 / trees.sqrt() + (depth - 10.0).abs() / 100.0
        } else {
            return Ok(None);
        };
        Ok(Some(preprocessing + learning))
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = SearchConfig::new("toy-pipeline")
        .with_worker_threads(4)
        .with_seed(42)
        .with_timeouts(Duration::from_secs(2), Duration::from_millis(250));

    let mut driver = SearchBuilder::new(Arc::new(catalog()?), Arc::new(SyntheticLoss), "model")
        .with_config(config)
        .build()
        .context("building search")?;

    let best = driver
        .run_until(Instant::now() + Duration::from_secs(10))
        .context("running search")?;

    let status = driver.status();
    info!(
        steps = status.steps,
        samples = status.samples_evaluated,
        timed_out = status.samples_timed_out,
        state = ?status.state,
        "Search finished"
    );
    match best {
        Some(best) => {
            println!("best loss {:.4}: {}", best.score, best.witness);
            for step in &best.history {
                println!("  {step}");
            }
        }
        None => println!("no solution found"),
    }
    Ok(())
}
