//! Witness reuse between a parent candidate and its refinements.

use std::collections::{HashSet, VecDeque};

use ab_model::{InstanceTree, Witness};
use ab_types::CsResult;

/// Whether the grounded `witness` is still a valid sample of `candidate`.
///
/// Both trees are walked in lock-step from the root. Paired nodes must be
/// instances of the same component, every value assigned in the candidate
/// must subsume the witness's value, and every interface the candidate has
/// satisfied must be satisfied in the witness too.
pub fn is_valid_witness(candidate: &InstanceTree, witness: &InstanceTree) -> CsResult<bool> {
    let mut queue = VecDeque::new();
    queue.push_back((candidate.root_index(), witness.root_index()));
    let mut seen = HashSet::new();

    while let Some((ci, wi)) = queue.pop_front() {
        if !seen.insert(ci) {
            continue;
        }
        let (Some(cnode), Some(wnode)) = (candidate.node(ci), witness.node(wi)) else {
            return Ok(false);
        };
        if cnode.component().name != wnode.component().name {
            return Ok(false);
        }
        for (name, value) in cnode.params() {
            if !value.subsumes(&wnode.value(name)?)? {
                return Ok(false);
            }
        }
        for (interface, child) in cnode.children() {
            let Some(wchild) = wnode.children().get(interface) else {
                return Ok(false);
            };
            queue.push_back((*child, *wchild));
        }
    }
    Ok(true)
}

/// The subset of `witnesses` that remain valid for `candidate`.
pub fn valid_witnesses(candidate: &InstanceTree, witnesses: &[Witness]) -> CsResult<Vec<Witness>> {
    let mut kept = Vec::new();
    for witness in witnesses {
        if is_valid_witness(candidate, &witness.tree)? {
            kept.push(witness.clone());
        }
    }
    Ok(kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ab_types::{Component, ParamValue};
    use std::sync::Arc;

    fn tree_with(component: &Arc<Component>, x: f64) -> InstanceTree {
        InstanceTree::new(component.clone())
            .with_params(&[], [("x".to_string(), ParamValue::Number(x))])
            .unwrap()
    }

    #[test]
    fn narrowed_child_keeps_matching_witnesses() {
        let component = Arc::new(Component::new("f").add_integer("x", 1, 3));
        let witnesses: Vec<Witness> = [1.0, 2.0, 3.0, 2.0]
            .iter()
            .enumerate()
            .map(|(i, x)| Witness {
                tree: tree_with(&component, *x),
                score: Some(i as f64),
            })
            .collect();

        let child = tree_with(&component, 2.0);
        let kept = valid_witnesses(&child, &witnesses).unwrap();
        assert_eq!(kept.len(), 2);
        for witness in &kept {
            let x = witness.tree.root().value("x").unwrap();
            assert_eq!(x, ParamValue::Number(2.0));
        }
        assert_eq!(kept[0].score, Some(1.0));
        assert_eq!(kept[1].score, Some(3.0));
    }

    #[test]
    fn unset_parameters_admit_everything() {
        let component = Arc::new(Component::new("f").add_integer("x", 1, 3));
        let parent = InstanceTree::new(component.clone());
        assert!(is_valid_witness(&parent, &tree_with(&component, 3.0)).unwrap());
    }

    #[test]
    fn structure_must_match() {
        let root = Arc::new(Component::new("root").requires("x", "X"));
        let a = Arc::new(Component::new("a").provides("X"));
        let b = Arc::new(Component::new("b").provides("X"));

        let with_a = InstanceTree::new(root.clone()).with_child(&[], "x", a).unwrap();
        let with_b = InstanceTree::new(root.clone()).with_child(&[], "x", b).unwrap();
        let bare = InstanceTree::new(root);

        assert!(!is_valid_witness(&with_a, &with_b).unwrap());
        assert!(is_valid_witness(&bare, &with_b).unwrap());
        assert!(!is_valid_witness(&with_a, &bare).unwrap());
    }
}
