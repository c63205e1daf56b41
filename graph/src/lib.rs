// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

mod node;


pub use crate::node::{Node, NodeId, NodeKey, NodeState, COMMAND_PRIORITY, FILE_PRIORITY};

use fnv::FnvHashMap as HashMap;
use log::debug;

///
/// A set of nodes deduplicated by identity, connected by bidirectional
/// dependency/influence edges.
///
/// Nodes live in an arena addressed by stable `NodeId`s; the edge sets hold
/// ids rather than references, which keeps ownership in one place even though
/// the edge relation is cyclic in principle. Slots of nodes discarded by
/// `merge` become tombstones and are never reused.
///
/// Nodes created with `reserve` are not yet registered in the identity index:
/// the scheduler folds them in at the end of an update, merging each one into
/// an equivalent registered node if it exists.
///
#[derive(Debug)]
pub struct Graph {
    nodes: Vec<Option<Node>>,
    index: HashMap<NodeKey, NodeId>,
}

impl Graph {
    pub fn new() -> Graph {
        Graph {
            nodes: Vec::new(),
            index: HashMap::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        self.nodes[id.0 as usize]
            .as_ref()
            .expect("NodeId referenced a merged-away node")
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        self.nodes[id.0 as usize]
            .as_mut()
            .expect("NodeId referenced a merged-away node")
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &Node)> {
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.as_ref().map(|node| (NodeId(index as u32), node)))
    }

    ///
    /// Inserts a registered node, or returns the id of the existing node with
    /// the same identity. Used at bootstrap and restore; nodes discovered
    /// during updates go through `reserve`/`fold` instead.
    ///
    pub fn add(&mut self, state: NodeState, dirty: bool) -> NodeId {
        let key = state.key();
        if let Some(&existing) = self.index.get(&key) {
            return existing;
        }
        let id = self.push(Node::new(state, dirty));
        self.index.insert(key, id);
        id
    }

    ///
    /// Inserts a node without registering its identity. The node can
    /// participate in edges immediately; a later `fold` either registers it
    /// or merges it into its registered twin.
    ///
    pub fn reserve(&mut self, state: NodeState) -> NodeId {
        self.push(Node::new(state, false))
    }

    pub fn find_equivalent(&self, key: &NodeKey) -> Option<NodeId> {
        self.index.get(key).copied()
    }

    /// Inserts `b` into `a`'s dependencies and `a` into `b`'s influences.
    /// Idempotent.
    pub fn add_dependency(&mut self, a: NodeId, b: NodeId) {
        self.node_mut(a).deps.insert(b);
        self.node_mut(b).influences.insert(a);
    }

    pub fn has_dependency(&self, a: NodeId, b: NodeId) -> bool {
        self.node(a).deps.contains(&b)
    }

    /// Marks every node influenced by `id` dirty.
    pub fn mark_influences_dirty(&mut self, id: NodeId) {
        let influences: Vec<NodeId> = self.node(id).influences.iter().copied().collect();
        for influence in influences {
            self.node_mut(influence).dirty = true;
        }
    }

    ///
    /// Folds `duplicate`'s edges into `canonical` and discards `duplicate`:
    /// every counterparty has its edge rewritten from the duplicate to the
    /// canonical node, preserving edge direction and the deps/influences
    /// symmetry. The canonical node's own state wins; dirtiness is carried
    /// over so an already-flagged duplicate cannot lose its pending update.
    ///
    pub fn merge(&mut self, canonical: NodeId, duplicate: NodeId) {
        if canonical == duplicate {
            return;
        }
        let duplicate_node = self.nodes[duplicate.0 as usize]
            .take()
            .expect("merge of an already-discarded node");
        if self.index.get(&duplicate_node.key()) == Some(&duplicate) {
            self.index.remove(&duplicate_node.key());
        }
        for &dep in &duplicate_node.deps {
            if dep == duplicate {
                // A self-edge on the duplicate collapses onto the canonical node.
                let canonical_node = self.node_mut(canonical);
                canonical_node.deps.insert(canonical);
                canonical_node.influences.insert(canonical);
                continue;
            }
            let counterparty = self.node_mut(dep);
            counterparty.influences.remove(&duplicate);
            counterparty.influences.insert(canonical);
            self.node_mut(canonical).deps.insert(dep);
        }
        for &influence in &duplicate_node.influences {
            if influence == duplicate {
                continue;
            }
            let counterparty = self.node_mut(influence);
            counterparty.deps.remove(&duplicate);
            counterparty.deps.insert(canonical);
            self.node_mut(canonical).influences.insert(influence);
        }
        if duplicate_node.dirty {
            self.node_mut(canonical).dirty = true;
        }
    }

    ///
    /// Registers each of the given (reserved) nodes, merging any whose
    /// identity already belongs to a registered node. Returns how many were
    /// genuinely new to the graph.
    ///
    pub fn fold(&mut self, novel: Vec<NodeId>) -> usize {
        let mut added = 0;
        for id in novel {
            let key = self.node(id).key();
            match self.index.get(&key) {
                Some(&existing) => {
                    debug!("Merging rediscovered {} into the tracked node", self.node(id));
                    self.merge(existing, id);
                }
                None => {
                    debug!("Tracking new node: {}", self.node(id));
                    self.index.insert(key, id);
                    added += 1;
                }
            }
        }
        added
    }

    fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Some(node));
        id
    }
}
