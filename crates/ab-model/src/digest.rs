//! Structural digest of an instance tree.
//!
//! The digest covers component names, explicitly assigned parameter values
//! (sorted by name) and satisfied interfaces (sorted by id), recursively. Node
//! indices are not part of it, so two trees built along different refinement
//! paths that end up identical share a digest. Used as a memoization key
//! only; collisions are not treated as a correctness concern.

use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;

use crate::tree::{InstanceTree, NodeIndex};

/// SHA-256 digest of a tree's structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TreeDigest([u8; 32]);

impl TreeDigest {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for TreeDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Compute the structural digest of `tree`.
pub fn digest(tree: &InstanceTree) -> TreeDigest {
    let mut seen = HashSet::new();
    TreeDigest(node_digest(tree, tree.root_index(), &mut seen))
}

fn node_digest(tree: &InstanceTree, index: NodeIndex, seen: &mut HashSet<NodeIndex>) -> [u8; 32] {
    let mut hasher = Sha256::new();
    let Some(node) = tree.node(index) else {
        hasher.update(b"missing");
        return finish(hasher);
    };
    if !seen.insert(index) {
        hasher.update(b"revisit");
        return finish(hasher);
    }

    hasher.update(node.component().name.as_bytes());
    for (name, value) in node.params() {
        hasher.update(b"\x1fp");
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(value.to_string().as_bytes());
    }
    for (interface, child) in node.children() {
        let child_digest = node_digest(tree, *child, seen);
        hasher.update(b"\x1fi");
        hasher.update(interface.as_bytes());
        hasher.update(child_digest);
    }
    finish(hasher)
}

fn finish(hasher: Sha256) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ab_types::{Component, ParamValue};
    use std::sync::Arc;

    fn svm() -> Arc<Component> {
        Arc::new(
            Component::new("svm")
                .requires("kernel", "kernel")
                .add_numeric("c", 0.0, 10.0)
                .add_categorical("shrinking", ["on", "off"]),
        )
    }

    fn rbf() -> Arc<Component> {
        Arc::new(Component::new("rbf").provides("kernel"))
    }

    fn set(tree: &InstanceTree, name: &str, value: ParamValue) -> InstanceTree {
        tree.with_params(&[], [(name.to_string(), value)]).unwrap()
    }

    #[test]
    fn digest_ignores_derivation_order() {
        let base = InstanceTree::new(svm());
        let on = ParamValue::Category("on".into());
        let a = set(&set(&base, "c", ParamValue::Number(1.0)), "shrinking", on.clone())
            .with_child(&[], "kernel", rbf())
            .unwrap();
        let b = set(&base.with_child(&[], "kernel", rbf()).unwrap(), "shrinking", on);
        let b = set(&b, "c", ParamValue::Number(1.0));

        assert_ne!(a.root_index(), b.root_index());
        assert_eq!(digest(&a), digest(&b));
        assert_eq!(digest(&a).to_hex().len(), 64);
    }

    #[test]
    fn digest_tracks_values_and_structure() {
        let base = InstanceTree::new(svm());
        let one = set(&base, "c", ParamValue::Number(1.0));
        let two = set(&base, "c", ParamValue::Number(2.0));
        assert_ne!(digest(&one), digest(&two));

        let attached = one.with_child(&[], "kernel", rbf()).unwrap();
        assert_ne!(digest(&one), digest(&attached));
    }
}
