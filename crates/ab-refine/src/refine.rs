//! The refinement engine: one generation of children per call.

use std::collections::BTreeMap;
use std::sync::Arc;

use ab_model::{format_path, Candidate, ParamSlot, Phase, RefinementRecord};
use ab_types::{ComponentRegistry, CsResult, ParamDomain, ParamValue, RefinementConfig};
use tracing::{debug, trace, warn};

use crate::propagate::{propagate, Propagation};
use crate::split::{NumericSplit, SplitOutcome};
use crate::witness::valid_witnesses;

/// Produces refined children of a candidate.
///
/// Zero children means the candidate is exhausted: nothing is left to
/// resolve or tune, or every refinement was pruned.
pub struct Refiner {
    registry: Arc<dyn ComponentRegistry>,
    defaults: RefinementConfig,
}

impl Refiner {
    pub fn new(registry: Arc<dyn ComponentRegistry>, defaults: RefinementConfig) -> Self {
        Self { registry, defaults }
    }

    /// Refinement settings for one parameter, falling back to the defaults.
    pub fn config_for(&self, component: &str, parameter: &str) -> RefinementConfig {
        self.registry
            .refinement_config(component, parameter)
            .unwrap_or(self.defaults)
    }

    pub fn refine(&self, candidate: &Candidate) -> CsResult<Vec<Candidate>> {
        let mut children = match candidate.phase() {
            Phase::InterfaceResolution => self.resolve_interface(candidate)?,
            Phase::ParameterTuning { order, cursor } => {
                self.tune_parameter(candidate, order, *cursor)?
            }
        };

        if let Some(report) = candidate.report() {
            for child in &mut children {
                let inherited = valid_witnesses(child.tree(), report.witnesses())?;
                child.inherit_witnesses(inherited);
            }
        }
        debug!(
            candidate = %candidate.id(),
            phase = %candidate.phase(),
            children = children.len(),
            "Refined candidate"
        );
        Ok(children)
    }

    fn resolve_interface(&self, candidate: &Candidate) -> CsResult<Vec<Candidate>> {
        let tree = candidate.tree();
        let Some(unresolved) = tree.first_unresolved() else {
            let phase = Phase::tuning(tree);
            return Ok(vec![candidate.derive(tree.clone(), phase, RefinementRecord::Promotion)]);
        };

        let providers = self.registry.providers_of(&unresolved.interface_type);
        if providers.is_empty() {
            warn!(
                path = %format_path(&unresolved.path),
                interface = %unresolved.interface,
                interface_type = %unresolved.interface_type,
                "No provider for required interface, pruning"
            );
            return Ok(Vec::new());
        }

        let mut children = Vec::with_capacity(providers.len());
        for provider in providers {
            let record = RefinementRecord::Interface {
                path: unresolved.path.clone(),
                interface: unresolved.interface.clone(),
                provider: provider.name.clone(),
            };
            let child_tree = tree.with_child(&unresolved.path, &unresolved.interface, provider)?;
            let phase = if child_tree.is_interface_complete() {
                Phase::tuning(&child_tree)
            } else {
                Phase::InterfaceResolution
            };
            children.push(candidate.derive(child_tree, phase, record));
        }
        Ok(children)
    }

    fn tune_parameter(
        &self,
        candidate: &Candidate,
        order: &Arc<[ParamSlot]>,
        cursor: usize,
    ) -> CsResult<Vec<Candidate>> {
        let tree = candidate.tree();
        for step in 0..order.len() {
            let position = (cursor + step) % order.len();
            let slot = &order[position];
            let node = tree.resolve_path(&slot.path)?;
            let component = node.component();
            let parameter = component.require_parameter(&slot.parameter)?;
            let value = node.value(&slot.parameter)?;

            let refinements: Vec<ParamValue> = match &parameter.domain {
                ParamDomain::Categorical { .. } => match value.category_set() {
                    Some(remaining) if remaining.len() > 1 => remaining
                        .into_iter()
                        .map(|c| ParamValue::Category(c.to_string()))
                        .collect(),
                    _ => Vec::new(),
                },
                ParamDomain::Numeric { integer, .. } => {
                    let config = self.config_for(&component.name, &slot.parameter);
                    match NumericSplit::from_value(&value, *integer)?.split(&config) {
                        SplitOutcome::Exhausted => Vec::new(),
                        SplitOutcome::Collapsed(mid) => vec![ParamValue::Number(mid)],
                        SplitOutcome::Pieces(pieces) => pieces
                            .into_iter()
                            .map(|(lo, hi)| ParamValue::range(lo, hi))
                            .collect(),
                    }
                }
            };
            if refinements.is_empty() {
                trace!(slot = %slot, "Parameter exhausted, advancing");
                continue;
            }

            let current = node.values()?;
            let next_phase = Phase::ParameterTuning {
                order: order.clone(),
                cursor: (position + 1) % order.len(),
            };
            let mut children = Vec::with_capacity(refinements.len());
            for refined in refinements {
                let mut values = current.clone();
                values.insert(slot.parameter.clone(), refined.clone());
                if let Propagation::Unsatisfiable { dependency } =
                    propagate(component, &mut values)?
                {
                    trace!(
                        slot = %slot,
                        value = %refined,
                        dependency,
                        "Refinement violates dependency, discarded"
                    );
                    continue;
                }
                let updates = changed_values(&current, values);
                let child_tree = tree.with_params(&slot.path, updates)?;
                let record = RefinementRecord::Parameter {
                    path: slot.path.clone(),
                    parameter: slot.parameter.clone(),
                    value: refined,
                };
                children.push(candidate.derive(child_tree, next_phase.clone(), record));
            }
            return Ok(children);
        }
        Ok(Vec::new())
    }
}

fn changed_values(
    before: &BTreeMap<String, ParamValue>,
    after: BTreeMap<String, ParamValue>,
) -> Vec<(String, ParamValue)> {
    after
        .into_iter()
        .filter(|(name, value)| before.get(name) != Some(value))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ab_model::InstanceTree;
    use ab_types::{Catalog, Component, Condition, Dependency};

    fn registry(components: Vec<Component>) -> Arc<dyn ComponentRegistry> {
        Arc::new(Catalog::new(components).unwrap())
    }

    fn refiner(components: Vec<Component>) -> Refiner {
        Refiner::new(registry(components), RefinementConfig::default())
    }

    fn artificial_root(interface: &str) -> Candidate {
        let root = Component::new("ROOT").requires(interface, interface);
        Candidate::root(InstanceTree::new(Arc::new(root)))
    }

    #[test]
    fn interface_phase_branches_per_provider() {
        let refiner = refiner(vec![
            Component::new("A").provides("X"),
            Component::new("B").provides("X"),
        ]);
        let children = refiner.refine(&artificial_root("X")).unwrap();
        assert_eq!(children.len(), 2);
        let names: Vec<_> = children
            .iter()
            .map(|c| c.tree().resolve_path(&["X".to_string()]).unwrap().component().name.clone())
            .collect();
        assert_eq!(names, vec!["A", "B"]);
        // No interfaces left, so both are already tuning.
        assert!(children.iter().all(|c| c.phase().is_tuning()));
        assert!(children.iter().all(|c| !c.is_first_generation()));
    }

    #[test]
    fn missing_provider_prunes() {
        let refiner = refiner(vec![Component::new("A").provides("X")]);
        assert!(refiner.refine(&artificial_root("Y")).unwrap().is_empty());
    }

    #[test]
    fn partial_children_stay_in_interface_phase() {
        let refiner = refiner(vec![
            Component::new("outer").provides("X").requires("inner", "Y"),
            Component::new("leaf").provides("Y"),
        ]);
        let children = refiner.refine(&artificial_root("X")).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].phase(), &Phase::InterfaceResolution);

        let grandchildren = refiner.refine(&children[0]).unwrap();
        assert_eq!(grandchildren.len(), 1);
        assert!(grandchildren[0].phase().is_tuning());
        assert_eq!(grandchildren[0].history().len(), 2);
    }

    #[test]
    fn complete_root_is_promoted_once() {
        let leaf = Component::new("leaf").provides("X").add_numeric("x", 0.0, 1.0);
        let refiner = refiner(vec![leaf.clone()]);
        let root = Candidate::root(InstanceTree::new(Arc::new(leaf)));
        let children = refiner.refine(&root).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].history(), &[RefinementRecord::Promotion]);
        assert!(children[0].phase().is_tuning());
    }

    fn tuning(component: Component) -> (Refiner, Candidate) {
        let refiner = refiner(vec![component.clone()]);
        let root = Candidate::root(InstanceTree::new(Arc::new(component)));
        let promoted = refiner.refine(&root).unwrap().remove(0);
        (refiner, promoted)
    }

    #[test]
    fn categorical_explodes_into_categories() {
        let (refiner, promoted) =
            tuning(Component::new("svm").add_categorical("kernel", ["rbf", "poly", "linear"]));
        let children = refiner.refine(&promoted).unwrap();
        let kernels: Vec<_> = children
            .iter()
            .map(|c| c.tree().root().value("kernel").unwrap())
            .collect();
        assert_eq!(
            kernels,
            vec![
                ParamValue::Category("rbf".into()),
                ParamValue::Category("poly".into()),
                ParamValue::Category("linear".into()),
            ]
        );
        // Fixed categorical with nothing else to tune is terminal.
        assert!(refiner.refine(&children[0]).unwrap().is_empty());
    }

    #[test]
    fn numeric_split_then_collapse() {
        let (refiner, promoted) = tuning(Component::new("f").add_numeric("x", 0.0, 4.0));
        let halves = refiner.refine(&promoted).unwrap();
        assert_eq!(halves.len(), 2);
        assert_eq!(halves[0].tree().root().value("x").unwrap(), ParamValue::range(0.0, 2.0));
        assert_eq!(halves[1].tree().root().value("x").unwrap(), ParamValue::range(2.0, 4.0));

        // [0, 2] cannot hold two pieces of the minimum split size.
        let collapsed = refiner.refine(&halves[0]).unwrap();
        assert_eq!(collapsed.len(), 1);
        assert_eq!(collapsed[0].tree().root().value("x").unwrap(), ParamValue::Number(1.0));
        assert!(collapsed[0].tree().is_grounded().unwrap());
        assert!(refiner.refine(&collapsed[0]).unwrap().is_empty());
    }

    #[test]
    fn cursor_advances_round_robin() {
        let (refiner, promoted) = tuning(
            Component::new("f")
                .add_categorical("a", ["p", "q"])
                .add_categorical("b", ["r", "s"]),
        );
        let first = refiner.refine(&promoted).unwrap();
        assert!(matches!(
            first[0].history().last(),
            Some(RefinementRecord::Parameter { parameter, .. }) if parameter == "a"
        ));
        let second = refiner.refine(&first[0]).unwrap();
        assert!(matches!(
            second[0].history().last(),
            Some(RefinementRecord::Parameter { parameter, .. }) if parameter == "b"
        ));
        assert!(refiner.refine(&second[0]).unwrap().is_empty());
    }

    #[test]
    fn dependency_prunes_and_narrows() {
        let component = Component::new("svm")
            .add_categorical("kernel", ["rbf", "poly"])
            .add_integer("degree", 1, 1)
            .add_numeric("gamma", 0.0, 1.0)
            .with_dependency(Dependency::new(
                vec![vec![Condition::new("kernel", ParamValue::Category("poly".into()))]],
                vec![Condition::new("degree", ParamValue::range(2.0, 5.0))],
            ))
            .with_dependency(Dependency::new(
                vec![vec![Condition::new("kernel", ParamValue::Category("rbf".into()))]],
                vec![Condition::new("gamma", ParamValue::range(0.0, 0.25))],
            ));
        let (refiner, promoted) = tuning(component);
        let children = refiner.refine(&promoted).unwrap();
        // poly needs degree in [2,5] but degree is fixed at 1.
        assert_eq!(children.len(), 1);
        let root = children[0].tree().root().clone();
        assert_eq!(root.value("kernel").unwrap(), ParamValue::Category("rbf".into()));
        assert_eq!(root.value("gamma").unwrap(), ParamValue::range(0.0, 0.25));
    }

    #[test]
    fn children_inherit_valid_witnesses() {
        let component = Component::new("f").add_categorical("x", ["1", "2", "3"]);
        let (refiner, mut promoted) = tuning(component.clone());
        let shared = Arc::new(component);
        let witnesses: Vec<InstanceTree> = ["1", "2", "3"]
            .iter()
            .map(|x| {
                InstanceTree::new(shared.clone())
                    .with_params(&[], [("x".to_string(), ParamValue::Category(x.to_string()))])
                    .unwrap()
            })
            .collect();
        promoted.record_results(witnesses, vec![Some(0.1), Some(0.2), Some(0.3)]);

        let children = refiner.refine(&promoted).unwrap();
        assert_eq!(children.len(), 3);
        let two = &children[1];
        assert_eq!(two.witness_count(), 1);
        assert_eq!(two.score(), Some(0.2));
        assert_eq!(
            two.report().unwrap().witnesses()[0].tree.root().value("x").unwrap(),
            ParamValue::Category("2".into())
        );
    }
}
