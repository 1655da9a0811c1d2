//! Dependency propagation over one node's parameter values.

use std::collections::BTreeMap;

use ab_types::{CatalogError, Component, Condition, CsResult, ParamValue};
use tracing::trace;

/// Outcome of propagating a component's dependencies.
#[derive(Debug, Clone, PartialEq)]
pub enum Propagation {
    /// All entailed conclusions hold; lists the parameters that were narrowed.
    Consistent { narrowed: Vec<String> },
    /// An entailed conclusion cannot be satisfied.
    Unsatisfiable { dependency: usize },
}

fn current<'a>(
    component: &Component,
    values: &'a BTreeMap<String, ParamValue>,
    condition: &Condition,
) -> CsResult<&'a ParamValue> {
    values.get(&condition.parameter).ok_or_else(|| {
        CatalogError::UnknownParameter {
            component: component.name.clone(),
            parameter: condition.parameter.clone(),
        }
        .into()
    })
}

/// A premise is entailed when every value admitted by the current domains
/// satisfies at least one of its conjunctions.
fn entailed(
    component: &Component,
    values: &BTreeMap<String, ParamValue>,
    premise: &[Vec<Condition>],
) -> CsResult<bool> {
    for conjunction in premise {
        let mut holds = true;
        for condition in conjunction {
            if !condition.domain.subsumes(current(component, values, condition)?)? {
                holds = false;
                break;
            }
        }
        if holds {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Apply `component`'s dependencies to `values` in place until nothing
/// changes. `values` must hold the current value of every declared parameter.
pub fn propagate(
    component: &Component,
    values: &mut BTreeMap<String, ParamValue>,
) -> CsResult<Propagation> {
    let mut narrowed: Vec<String> = Vec::new();
    // Each productive pass strictly narrows some domain; bound the passes so
    // a float edge case cannot loop.
    for _ in 0..=component.dependencies.len() {
        let mut changed = false;
        for (i, dependency) in component.dependencies.iter().enumerate() {
            if !entailed(component, values, &dependency.premise)? {
                continue;
            }
            for condition in &dependency.conclusion {
                let value = current(component, values, condition)?;
                let Some(intersection) = value.intersect(&condition.domain)? else {
                    trace!(
                        component = %component.name,
                        parameter = %condition.parameter,
                        dependency = i,
                        "Dependency conclusion unsatisfiable"
                    );
                    return Ok(Propagation::Unsatisfiable { dependency: i });
                };
                if &intersection != value {
                    values.insert(condition.parameter.clone(), intersection);
                    if !narrowed.contains(&condition.parameter) {
                        narrowed.push(condition.parameter.clone());
                    }
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }
    Ok(Propagation::Consistent { narrowed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ab_types::Dependency;

    fn cat(value: &str) -> ParamValue {
        ParamValue::Category(value.to_string())
    }

    /// degree is only meaningful for the polynomial kernel, and gamma must
    /// stay small for rbf.
    fn svm() -> Component {
        Component::new("svm")
            .add_categorical("kernel", ["rbf", "poly", "linear"])
            .add_integer("degree", 1, 10)
            .add_numeric("gamma", 0.0, 1.0)
            .with_dependency(Dependency::new(
                vec![vec![Condition::new("kernel", cat("poly"))]],
                vec![Condition::new("degree", ParamValue::range(2.0, 5.0))],
            ))
            .with_dependency(Dependency::new(
                vec![
                    vec![Condition::new("kernel", cat("rbf"))],
                    vec![Condition::new("kernel", cat("linear"))],
                ],
                vec![Condition::new("gamma", ParamValue::range(0.0, 0.1))],
            ))
    }

    fn values(kernel: ParamValue, degree: ParamValue) -> BTreeMap<String, ParamValue> {
        let mut values = BTreeMap::new();
        values.insert("kernel".to_string(), kernel);
        values.insert("degree".to_string(), degree);
        values.insert("gamma".to_string(), ParamValue::range(0.0, 1.0));
        values
    }

    #[test]
    fn entailed_conclusion_narrows() {
        let component = svm();
        let mut vals = values(cat("poly"), ParamValue::range(1.0, 10.0));
        let outcome = propagate(&component, &mut vals).unwrap();
        assert_eq!(
            outcome,
            Propagation::Consistent {
                narrowed: vec!["degree".to_string()]
            }
        );
        assert_eq!(vals["degree"], ParamValue::range(2.0, 5.0));
    }

    #[test]
    fn unentailed_premise_leaves_values_alone() {
        let component = svm();
        // kernel still undecided: neither premise is entailed.
        let mut vals = values(
            ParamValue::categories(vec!["rbf".into(), "poly".into()]),
            ParamValue::range(1.0, 10.0),
        );
        let outcome = propagate(&component, &mut vals).unwrap();
        assert_eq!(outcome, Propagation::Consistent { narrowed: vec![] });
        assert_eq!(vals["gamma"], ParamValue::range(0.0, 1.0));
    }

    #[test]
    fn disjunctive_premise() {
        let component = svm();
        let mut vals = values(cat("linear"), ParamValue::Number(1.0));
        propagate(&component, &mut vals).unwrap();
        assert_eq!(vals["gamma"], ParamValue::range(0.0, 0.1));
    }

    #[test]
    fn unsatisfiable_conclusion_detected() {
        let component = svm();
        let mut vals = values(cat("poly"), ParamValue::Number(8.0));
        let outcome = propagate(&component, &mut vals).unwrap();
        assert_eq!(outcome, Propagation::Unsatisfiable { dependency: 0 });
    }

    #[test]
    fn missing_value_is_a_configuration_error() {
        let component = svm();
        let mut vals = BTreeMap::new();
        vals.insert("kernel".to_string(), cat("poly"));
        assert!(propagate(&component, &mut vals).is_err());
    }
}
