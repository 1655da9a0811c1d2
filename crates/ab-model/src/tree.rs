//! Instance trees: an arena of component instances linked by node index.
//!
//! Nodes are immutable and reference-counted. Deriving a new tree rewrites
//! only the spine from the root to the edited node (each spine node gets a
//! fresh index); every other subtree is the very same `Arc` as in the parent
//! tree. Traversals de-duplicate by index, so a node reachable along two
//! edges is visited once and a malformed cycle still terminates.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use ab_types::{CatalogError, Component, CsResult, ModelError, ParamValue};

/// Index of a node, unique within one tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeIndex(pub u32);

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Render an interface path for diagnostics.
pub fn format_path(path: &[String]) -> String {
    if path.is_empty() {
        "/".to_string()
    } else {
        path.iter().map(|p| format!("/{p}")).collect()
    }
}

/// One (node path, parameter) pair in the tuning order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSlot {
    pub path: Vec<String>,
    pub parameter: String,
}

impl fmt::Display for ParamSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", format_path(&self.path), self.parameter)
    }
}

/// The first required interface found unsatisfied in breadth-first order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedInterface {
    /// Path of the node declaring the interface.
    pub path: Vec<String>,
    pub interface: String,
    pub interface_type: String,
}

/// A component instance.
#[derive(Debug, Clone)]
pub struct InstanceNode {
    index: NodeIndex,
    component: Arc<Component>,
    params: BTreeMap<String, ParamValue>,
    children: BTreeMap<String, NodeIndex>,
    path: Vec<String>,
}

impl InstanceNode {
    fn fresh(index: NodeIndex, component: Arc<Component>, path: Vec<String>) -> Self {
        Self {
            index,
            component,
            params: BTreeMap::new(),
            children: BTreeMap::new(),
            path,
        }
    }

    pub fn index(&self) -> NodeIndex {
        self.index
    }

    pub fn component(&self) -> &Arc<Component> {
        &self.component
    }

    /// Explicitly assigned parameter values. Absent entries hold the full
    /// declared domain.
    pub fn params(&self) -> &BTreeMap<String, ParamValue> {
        &self.params
    }

    /// Satisfied interfaces, by interface id.
    pub fn children(&self) -> &BTreeMap<String, NodeIndex> {
        &self.children
    }

    pub fn path(&self) -> &[String] {
        &self.path
    }

    /// Current value of `name`, falling back to the declared domain.
    pub fn value(&self, name: &str) -> CsResult<ParamValue> {
        if let Some(value) = self.params.get(name) {
            return Ok(value.clone());
        }
        Ok(self.component.require_parameter(name)?.domain.full_value())
    }

    /// Current values of every declared parameter.
    pub fn values(&self) -> CsResult<BTreeMap<String, ParamValue>> {
        self.component
            .parameters
            .iter()
            .map(|p| Ok((p.name.clone(), self.value(&p.name)?)))
            .collect()
    }

    /// Required interfaces (id, type) that have no child yet.
    pub fn unresolved_interfaces(&self) -> impl Iterator<Item = (&String, &String)> {
        self.component
            .required_interfaces
            .iter()
            .filter(|(id, _)| !self.children.contains_key(*id))
    }

    fn set_param(&mut self, name: String, value: ParamValue) -> CsResult<()> {
        self.component.require_parameter(&name)?;
        self.params.insert(name, value);
        Ok(())
    }
}

/// A (possibly partial) configuration rooted at one component instance.
#[derive(Debug, Clone)]
pub struct InstanceTree {
    nodes: BTreeMap<NodeIndex, Arc<InstanceNode>>,
    root: NodeIndex,
    next_index: u32,
}

impl InstanceTree {
    /// A single-node tree with every parameter at its full domain.
    pub fn new(component: Arc<Component>) -> Self {
        let root = NodeIndex(0);
        let mut nodes = BTreeMap::new();
        nodes.insert(root, Arc::new(InstanceNode::fresh(root, component, Vec::new())));
        Self {
            nodes,
            root,
            next_index: 1,
        }
    }

    pub fn root(&self) -> &Arc<InstanceNode> {
        // The root index is always present: every constructor inserts it and
        // spine rewrites replace it atomically.
        &self.nodes[&self.root]
    }

    pub fn root_index(&self) -> NodeIndex {
        self.root
    }

    pub fn node(&self, index: NodeIndex) -> Option<&Arc<InstanceNode>> {
        self.nodes.get(&index)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn allocate(&mut self) -> NodeIndex {
        let index = NodeIndex(self.next_index);
        self.next_index += 1;
        index
    }

    fn child_of(&self, node: &InstanceNode, interface: &str) -> CsResult<&Arc<InstanceNode>> {
        if !node.component.required_interfaces.contains_key(interface) {
            return Err(ModelError::PathNotFound {
                path: format_path(&node.path),
                interface: interface.to_string(),
            }
            .into());
        }
        let index = node.children.get(interface).ok_or_else(|| ModelError::InterfaceUnsatisfied {
            path: format_path(&node.path),
            interface: interface.to_string(),
        })?;
        self.nodes
            .get(index)
            .ok_or_else(|| ModelError::NodeMissing { index: index.0 }.into())
    }

    /// Walk satisfied interfaces from the root.
    pub fn resolve_path(&self, path: &[String]) -> CsResult<&Arc<InstanceNode>> {
        let mut node = self.root();
        for interface in path {
            node = self.child_of(node, interface)?;
        }
        Ok(node)
    }

    /// Nodes from the root to the end of `path`, inclusive.
    fn spine(&self, path: &[String]) -> CsResult<Vec<Arc<InstanceNode>>> {
        let mut spine = Vec::with_capacity(path.len() + 1);
        let mut node = self.root();
        spine.push(node.clone());
        for interface in path {
            node = self.child_of(node, interface)?;
            spine.push(node.clone());
        }
        Ok(spine)
    }

    /// Lazy breadth-first traversal, visiting each index once.
    pub fn bfs(&self) -> Bfs<'_> {
        let mut queue = VecDeque::new();
        queue.push_back(self.root);
        Bfs {
            tree: self,
            queue,
            seen: HashSet::new(),
        }
    }

    /// Copy-on-write along `path`: the node at the end of the path and every
    /// ancestor are re-created with fresh indices, `edit` is applied to the
    /// copy of the target, and all other subtrees are shared.
    fn rewrite_spine<F>(&self, path: &[String], edit: F) -> CsResult<InstanceTree>
    where
        F: FnOnce(&mut InstanceTree, &mut InstanceNode) -> CsResult<()>,
    {
        let spine = self.spine(path)?;
        let mut tree = self.clone();
        for node in &spine {
            tree.nodes.remove(&node.index);
        }

        let mut target = InstanceNode::clone(&spine[path.len()]);
        target.index = tree.allocate();
        edit(&mut tree, &mut target)?;
        let mut child = target.index;
        tree.nodes.insert(child, Arc::new(target));

        for depth in (0..path.len()).rev() {
            let mut ancestor = InstanceNode::clone(&spine[depth]);
            ancestor.index = tree.allocate();
            ancestor.children.insert(path[depth].clone(), child);
            child = ancestor.index;
            tree.nodes.insert(child, Arc::new(ancestor));
        }
        tree.root = child;
        Ok(tree)
    }

    /// Derive a tree whose node at `path` carries the given parameter values.
    pub fn with_params<I>(&self, path: &[String], updates: I) -> CsResult<InstanceTree>
    where
        I: IntoIterator<Item = (String, ParamValue)>,
    {
        self.rewrite_spine(path, |_, node| {
            for (name, value) in updates {
                node.set_param(name, value)?;
            }
            Ok(())
        })
    }

    /// Derive a tree where `interface` of the node at `parent_path` is
    /// satisfied by a fresh instance of `component`.
    pub fn with_child(
        &self,
        parent_path: &[String],
        interface: &str,
        component: Arc<Component>,
    ) -> CsResult<InstanceTree> {
        self.rewrite_spine(parent_path, |tree, node| {
            if !node.component.required_interfaces.contains_key(interface) {
                return Err(CatalogError::UnknownInterface {
                    component: node.component.name.clone(),
                    interface: interface.to_string(),
                }
                .into());
            }
            if node.children.contains_key(interface) {
                return Err(ModelError::InterfaceAlreadySatisfied {
                    path: format_path(&node.path),
                    interface: interface.to_string(),
                }
                .into());
            }
            let index = tree.allocate();
            let mut path = node.path.clone();
            path.push(interface.to_string());
            tree.nodes
                .insert(index, Arc::new(InstanceNode::fresh(index, component, path)));
            node.children.insert(interface.to_string(), index);
            Ok(())
        })
    }

    /// First unsatisfied required interface in breadth-first order.
    pub fn first_unresolved(&self) -> Option<UnresolvedInterface> {
        self.bfs().find_map(|node| {
            node.unresolved_interfaces()
                .next()
                .map(|(id, ty)| UnresolvedInterface {
                    path: node.path.clone(),
                    interface: id.clone(),
                    interface_type: ty.clone(),
                })
        })
    }

    pub fn is_interface_complete(&self) -> bool {
        self.first_unresolved().is_none()
    }

    /// Interface-complete with every parameter fixed to a single point.
    pub fn is_grounded(&self) -> CsResult<bool> {
        if !self.is_interface_complete() {
            return Ok(false);
        }
        for node in self.bfs() {
            for param in &node.component.parameters {
                if !node.value(&param.name)?.is_singleton() {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    /// Round-robin tuning order over every parameter in the tree.
    ///
    /// Each node contributes its own parameters (declaration order) as one
    /// list and each child's order as further lists (by interface id); the
    /// lists are then drained one element at a time in turn.
    pub fn parameter_order(&self) -> Vec<ParamSlot> {
        let mut seen = HashSet::new();
        self.order_from(self.root, &mut seen)
    }

    fn order_from(&self, index: NodeIndex, seen: &mut HashSet<NodeIndex>) -> Vec<ParamSlot> {
        let Some(node) = self.nodes.get(&index) else {
            return Vec::new();
        };
        if !seen.insert(index) {
            return Vec::new();
        }
        let own: Vec<ParamSlot> = node
            .component
            .parameters
            .iter()
            .map(|p| ParamSlot {
                path: node.path.clone(),
                parameter: p.name.clone(),
            })
            .collect();
        let mut lists: Vec<VecDeque<ParamSlot>> = vec![own.into()];
        for child in node.children.values() {
            lists.push(self.order_from(*child, seen).into());
        }

        let mut order = Vec::new();
        while lists.iter().any(|l| !l.is_empty()) {
            for list in lists.iter_mut() {
                if let Some(slot) = list.pop_front() {
                    order.push(slot);
                }
            }
        }
        order
    }

    fn fmt_node(
        &self,
        f: &mut fmt::Formatter<'_>,
        index: NodeIndex,
        seen: &mut HashSet<NodeIndex>,
    ) -> fmt::Result {
        let Some(node) = self.nodes.get(&index) else {
            return write!(f, "<missing {index}>");
        };
        if !seen.insert(index) {
            return write!(f, "<shared {index}>");
        }
        write!(f, "{}", node.component.name)?;
        if !node.params.is_empty() {
            let params: Vec<String> = node
                .params
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            write!(f, "{{{}}}", params.join(", "))?;
        }
        if !node.component.required_interfaces.is_empty() {
            write!(f, "(")?;
            for (i, id) in node.component.required_interfaces.keys().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{id}: ")?;
                match node.children.get(id) {
                    Some(child) => self.fmt_node(f, *child, seen)?,
                    None => write!(f, "?")?,
                }
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

impl fmt::Display for InstanceTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.fmt_node(f, self.root, &mut HashSet::new())
    }
}

/// Breadth-first iterator over an [`InstanceTree`].
pub struct Bfs<'a> {
    tree: &'a InstanceTree,
    queue: VecDeque<NodeIndex>,
    seen: HashSet<NodeIndex>,
}

impl<'a> Iterator for Bfs<'a> {
    type Item = &'a Arc<InstanceNode>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(index) = self.queue.pop_front() {
            if !self.seen.insert(index) {
                continue;
            }
            let Some(node) = self.tree.nodes.get(&index) else {
                continue;
            };
            self.queue.extend(node.children.values().copied());
            return Some(node);
        }
        None
    }
}
