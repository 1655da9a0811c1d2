//! Grounding sampler: turns a partial candidate into concrete samples.

use std::sync::Arc;

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, warn};

use ab_model::{format_path, Candidate, InstanceTree};
use ab_types::{ComponentRegistry, CsResult, ParamDomain, ParamValue, RefinementConfig};

use crate::split::NumericSplit;

/// Sampler behaviour.
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerSettings {
    /// Draw numeric values from the midpoints a split would produce instead
    /// of uniformly over the range.
    pub draw_split_means: bool,
    /// Interfaces nested deeper than this are not grounded; the draw is
    /// abandoned instead.
    pub max_grounding_depth: usize,
    /// Split settings used for `draw_split_means` when the catalog has none.
    pub defaults: RefinementConfig,
}

impl Default for SamplerSettings {
    fn default() -> Self {
        Self {
            draw_split_means: false,
            max_grounding_depth: 32,
            defaults: RefinementConfig::default(),
        }
    }
}

/// Draws concrete instances from candidates.
///
/// Every draw gets its own generator seeded from the sampler's master
/// generator, so draws never share state and a seeded sampler is
/// reproducible.
pub struct Sampler {
    registry: Arc<dyn ComponentRegistry>,
    settings: SamplerSettings,
    rng: ChaCha8Rng,
}

impl Sampler {
    pub fn new(
        registry: Arc<dyn ComponentRegistry>,
        settings: SamplerSettings,
        seed: Option<u64>,
    ) -> Self {
        let rng = match seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        Self {
            registry,
            settings,
            rng,
        }
    }

    pub fn settings(&self) -> &SamplerSettings {
        &self.settings
    }

    /// Draw up to `count` samples, minus the witnesses the candidate already
    /// carries. Draws that cannot be completed (no provider for an
    /// interface, grounding too deep, an empty integer range) are skipped, so
    /// fewer samples may come back.
    pub fn draw(&mut self, candidate: &Candidate, count: usize) -> CsResult<Vec<InstanceTree>> {
        let wanted = count.saturating_sub(candidate.witness_count());
        let mut samples = Vec::with_capacity(wanted);
        for _ in 0..wanted {
            let mut rng = ChaCha8Rng::seed_from_u64(self.rng.gen());
            if let Some(sample) = self.ground(candidate.tree(), &mut rng)? {
                samples.push(sample);
            }
        }
        debug!(
            candidate = %candidate.id(),
            requested = count,
            drawn = samples.len(),
            "Drew samples"
        );
        Ok(samples)
    }

    /// Ground one tree: satisfy every interface, then fix every parameter.
    pub fn ground(
        &self,
        tree: &InstanceTree,
        rng: &mut ChaCha8Rng,
    ) -> CsResult<Option<InstanceTree>> {
        let mut tree = tree.clone();
        while let Some(unresolved) = tree.first_unresolved() {
            if unresolved.path.len() >= self.settings.max_grounding_depth {
                warn!(
                    path = %format_path(&unresolved.path),
                    depth = unresolved.path.len(),
                    "Grounding depth exceeded, abandoning draw"
                );
                return Ok(None);
            }
            let providers = self.registry.providers_of(&unresolved.interface_type);
            let Some(provider) = providers.choose(rng) else {
                warn!(
                    path = %format_path(&unresolved.path),
                    interface = %unresolved.interface,
                    "No provider while grounding, abandoning draw"
                );
                return Ok(None);
            };
            tree = tree.with_child(&unresolved.path, &unresolved.interface, provider.clone())?;
        }

        let mut assignments = Vec::new();
        for node in tree.bfs() {
            let mut updates = Vec::new();
            for param in &node.component().parameters {
                let value = node.value(&param.name)?;
                if value.is_singleton() {
                    continue;
                }
                let Some(drawn) = self.draw_value(
                    &node.component().name,
                    &param.name,
                    &param.domain,
                    &value,
                    rng,
                ) else {
                    return Ok(None);
                };
                updates.push((param.name.clone(), drawn));
            }
            if !updates.is_empty() {
                assignments.push((node.path().to_vec(), updates));
            }
        }
        for (path, updates) in assignments {
            tree = tree.with_params(&path, updates)?;
        }
        Ok(Some(tree))
    }

    fn draw_value(
        &self,
        component: &str,
        parameter: &str,
        domain: &ParamDomain,
        value: &ParamValue,
        rng: &mut ChaCha8Rng,
    ) -> Option<ParamValue> {
        if let Some(categories) = value.category_set() {
            return categories
                .choose(rng)
                .map(|c| ParamValue::Category(c.to_string()));
        }
        let (min, max) = value.bounds()?;
        let integer = domain.is_integer();

        if self.settings.draw_split_means {
            let config = self
                .registry
                .refinement_config(component, parameter)
                .unwrap_or(self.settings.defaults);
            let means = NumericSplit::new(min, max, integer).split_means(&config);
            if let Some(mean) = means.choose(rng) {
                return Some(ParamValue::Number(*mean));
            }
        }

        if integer {
            let (lo, hi) = (min.ceil() as i64, max.floor() as i64);
            (lo <= hi).then(|| ParamValue::Number(rng.gen_range(lo..=hi) as f64))
        } else {
            Some(ParamValue::Number(rng.gen_range(min..=max)))
        }
    }
}
