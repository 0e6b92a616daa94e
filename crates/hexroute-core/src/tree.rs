//! Per-net routing trees.
//!
//! A routing tree describes how one net's packets spread through the mesh:
//! the root sits at the source chip and every edge carries a [`Route`].
//! Edges with a child node are hops to a physically adjacent chip; edges
//! without are terminal deliveries (to a local core, or out of a
//! constrained link). Nodes live in an arena indexed by [`NodeId`], so the
//! structure is cycle-free by construction and cheap to copy.

use std::collections::VecDeque;

use crate::geom::Chip;
use crate::link::Route;

identifier!(NodeId, usize);

#[derive(Debug, Clone)]
struct TreeNode {
    chip: Chip,
    children: Vec<(Route, Option<NodeId>)>,
}

/// The routing tree of a single net.
#[derive(Debug, Clone)]
pub struct RoutingTree {
    root: NodeId,
    nodes: Vec<TreeNode>,
}

impl RoutingTree {
    /// Creates a tree with a single root node at the given chip.
    pub fn new(root_chip: Chip) -> RoutingTree {
        RoutingTree {
            root: NodeId::ZERO,
            nodes: vec![TreeNode {
                chip: root_chip,
                children: Vec::new(),
            }],
        }
    }

    /// The root node (the net's source chip).
    pub fn root(&self) -> NodeId {
        self.root
    }

    /// The chip a node sits on.
    pub fn chip(&self, node: NodeId) -> Chip {
        self.nodes[node.inner()].chip
    }

    /// The outgoing edges of a node, in insertion order.
    pub fn children(&self, node: NodeId) -> &[(Route, Option<NodeId>)] {
        &self.nodes[node.inner()].children
    }

    /// Adds a detached node at the given chip.
    pub fn add_node(&mut self, chip: Chip) -> NodeId {
        self.nodes.push(TreeNode {
            chip,
            children: Vec::new(),
        });
        NodeId::new(self.nodes.len() - 1)
    }

    /// Connects `child` under `parent` via the given route.
    pub fn add_child(&mut self, parent: NodeId, route: Route, child: NodeId) {
        self.nodes[parent.inner()].children.push((route, Some(child)));
    }

    /// Adds a terminal delivery edge to a node. Duplicates are ignored.
    pub fn add_terminal(&mut self, node: NodeId, route: Route) {
        let children = &mut self.nodes[node.inner()].children;
        if !children.contains(&(route, None)) {
            children.push((route, None));
        }
    }

    /// Disconnects `child` from `parent`. Returns true if an edge was
    /// removed.
    pub fn remove_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        let children = &mut self.nodes[parent.inner()].children;
        let before = children.len();
        children.retain(|&(_, c)| c != Some(child));
        children.len() < before
    }

    /// Iterates over every node in the arena, attached or not.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId::new)
    }

    /// Iterates (breadth-first) over the nodes reachable from `from`.
    pub fn descendants(&self, from: NodeId) -> Descendants<'_> {
        Descendants {
            tree: self,
            queue: VecDeque::from([from]),
        }
    }

    /// Iterates (breadth-first) over the whole tree from the root.
    pub fn iter(&self) -> Descendants<'_> {
        self.descendants(self.root)
    }

    /// Iterates over the chips of the whole tree.
    pub fn chips(&self) -> impl Iterator<Item = Chip> + '_ {
        self.iter().map(|node| self.chip(node))
    }
}

/// Breadth-first traversal of a [`RoutingTree`].
#[derive(Debug)]
pub struct Descendants<'a> {
    tree: &'a RoutingTree,
    queue: VecDeque<NodeId>,
}

impl Iterator for Descendants<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let node = self.queue.pop_front()?;
        for &(_, child) in self.tree.children(node) {
            if let Some(child) = child {
                self.queue.push_back(child);
            }
        }
        Some(node)
    }
}

#[cfg(test)]
mod tests {
    use crate::link::Link;

    use super::*;

    #[test]
    fn build_and_traverse() {
        let mut tree = RoutingTree::new(Chip::new(0, 0));
        let a = tree.add_node(Chip::new(1, 0));
        let b = tree.add_node(Chip::new(1, 1));
        tree.add_child(tree.root(), Route::Link(Link::East), a);
        tree.add_child(a, Route::Link(Link::North), b);
        tree.add_terminal(b, Route::core(1));

        let chips = tree.chips().collect::<Vec<_>>();
        assert_eq!(
            chips,
            vec![Chip::new(0, 0), Chip::new(1, 0), Chip::new(1, 1)]
        );
        assert_eq!(tree.children(b), &[(Route::core(1), None)]);
    }

    #[test]
    fn terminals_do_not_duplicate() {
        let mut tree = RoutingTree::new(Chip::new(0, 0));
        tree.add_terminal(tree.root(), Route::Link(Link::West));
        tree.add_terminal(tree.root(), Route::Link(Link::West));
        assert_eq!(tree.children(tree.root()).len(), 1);
    }

    #[test]
    fn remove_child_detaches_subtree() {
        let mut tree = RoutingTree::new(Chip::new(0, 0));
        let a = tree.add_node(Chip::new(1, 0));
        let b = tree.add_node(Chip::new(2, 0));
        tree.add_child(tree.root(), Route::Link(Link::East), a);
        tree.add_child(a, Route::Link(Link::East), b);

        assert!(tree.remove_child(tree.root(), a));
        assert!(!tree.remove_child(tree.root(), a));
        assert_eq!(tree.iter().count(), 1);
        // The detached subtree is still intact.
        assert_eq!(tree.descendants(a).count(), 2);
    }
}
