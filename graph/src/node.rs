// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;
use std::path::PathBuf;

use fnv::FnvHashSet as HashSet;
use hashing::ContentDigest;

// 2^32 Nodes ought to be more than enough for anyone!
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct NodeId(pub u32);

/// File nodes update before command nodes within a scheduler round.
pub const FILE_PRIORITY: i32 = -100;
pub const COMMAND_PRIORITY: i32 = 100;

///
/// A Node's persistent identity: file nodes are identified by their
/// project-relative path alone, command nodes by their exact command string
/// alone. Everything else a node carries is mutable state.
///
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum NodeKey {
    File(PathBuf),
    Command(String),
}

///
/// The variant payload of a Node.
///
/// Command subtypes (compile, index, bibliography, ...) differ only in how
/// their command string is constructed; once built they are all plain
/// `Command` payloads.
///
#[derive(Clone, Debug)]
pub enum NodeState {
    File {
        path: PathBuf,
        checksum: ContentDigest,
    },
    Command {
        command: String,
        ignores: Vec<String>,
        status: Option<i32>,
    },
}

impl NodeState {
    pub fn file(path: PathBuf) -> NodeState {
        NodeState::File {
            path,
            checksum: ContentDigest::empty(),
        }
    }

    pub fn command(command: String, ignores: Vec<String>) -> NodeState {
        NodeState::Command {
            command,
            ignores,
            status: None,
        }
    }

    pub fn key(&self) -> NodeKey {
        match self {
            NodeState::File { path, .. } => NodeKey::File(path.clone()),
            NodeState::Command { command, .. } => NodeKey::Command(command.clone()),
        }
    }
}

///
/// The envelope shared by both node variants: the dirty flag and the two edge
/// sets. For every edge `b ∈ a.deps` the reverse edge `a ∈ b.influences` is
/// maintained by the owning Graph.
///
#[derive(Clone, Debug)]
pub struct Node {
    pub state: NodeState,
    pub dirty: bool,
    pub(crate) deps: HashSet<NodeId>,
    pub(crate) influences: HashSet<NodeId>,
}

impl Node {
    pub(crate) fn new(state: NodeState, dirty: bool) -> Node {
        Node {
            state,
            dirty,
            deps: HashSet::default(),
            influences: HashSet::default(),
        }
    }

    pub fn key(&self) -> NodeKey {
        self.state.key()
    }

    pub fn priority(&self) -> i32 {
        match self.state {
            NodeState::File { .. } => FILE_PRIORITY,
            NodeState::Command { .. } => COMMAND_PRIORITY,
        }
    }

    pub fn deps(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.deps.iter().copied()
    }

    pub fn influences(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.influences.iter().copied()
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.state {
            NodeState::File { path, .. } => write!(f, "watch {:?}", path.display().to_string()),
            NodeState::Command { command, .. } => write!(f, "{command}"),
        }
    }
}
