// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use graph::{Graph, NodeId, NodeState};
use hashing::ContentDigest;
use serde::{Deserialize, Serialize};

/// Bump when the record layout changes; mismatching state files are rejected
/// and the engine re-bootstraps.
pub const STATE_VERSION: u32 = 2;

const FILE_NODE: &str = "FileNode";
const COMMAND_NODE: &str = "CommandNode";

///
/// The on-disk layout: gzip-compressed MessagePack of the whole graph. Node
/// ids are only stable within one file; restore translates them back into
/// arena ids.
///
#[derive(Debug, Deserialize, Serialize)]
struct StateFile {
    state_version: u32,
    actions: Vec<NodeRecord>,
}

#[derive(Debug, Deserialize, Serialize)]
struct NodeRecord {
    id: u32,
    #[serde(rename = "type")]
    node_type: String,
    dirty: bool,
    deps: Vec<u32>,
    influences: Vec<u32>,
    state: StateRecord,
}

///
/// The union of the per-variant fields; the record's type tag decides which
/// of them must be present. Absent fields are not written.
///
#[derive(Debug, Default, Deserialize, Serialize)]
struct StateRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    checksum: Option<ContentDigest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ignores: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<i32>,
}

fn encode_node(state: &NodeState) -> (&'static str, StateRecord) {
    match state {
        NodeState::File { path, checksum } => (
            FILE_NODE,
            StateRecord {
                path: Some(path.clone()),
                checksum: Some(checksum.clone()),
                ..StateRecord::default()
            },
        ),
        NodeState::Command {
            command,
            ignores,
            status,
        } => (
            COMMAND_NODE,
            StateRecord {
                command: Some(command.clone()),
                ignores: Some(ignores.clone()),
                status: *status,
                ..StateRecord::default()
            },
        ),
    }
}

fn decode_node(record: &NodeRecord) -> Result<NodeState, String> {
    match record.node_type.as_str() {
        FILE_NODE => Ok(NodeState::File {
            path: record
                .state
                .path
                .clone()
                .ok_or_else(|| format!("FileNode record {} has no path", record.id))?,
            checksum: record
                .state
                .checksum
                .clone()
                .unwrap_or_else(ContentDigest::empty),
        }),
        COMMAND_NODE => Ok(NodeState::Command {
            command: record
                .state
                .command
                .clone()
                .ok_or_else(|| format!("CommandNode record {} has no command", record.id))?,
            ignores: record.state.ignores.clone().unwrap_or_default(),
            status: record.state.status,
        }),
        other => Err(format!("Unknown node type {other:?} in the state file")),
    }
}

///
/// Serializes the graph to `path` atomically: the bytes land in a temporary
/// file next to it first and are renamed into place, so the on-disk state is
/// never torn.
///
pub fn persist(graph: &Graph, path: &Path) -> Result<(), String> {
    let ids: HashMap<NodeId, u32> = graph
        .iter()
        .enumerate()
        .map(|(index, (id, _))| (id, index as u32))
        .collect();
    let actions: Vec<NodeRecord> = graph
        .iter()
        .map(|(id, node)| {
            let mut deps: Vec<u32> = node.deps().map(|dep| ids[&dep]).collect();
            let mut influences: Vec<u32> = node.influences().map(|i| ids[&i]).collect();
            deps.sort_unstable();
            influences.sort_unstable();
            let (node_type, state) = encode_node(&node.state);
            NodeRecord {
                id: ids[&id],
                node_type: node_type.to_owned(),
                dirty: node.dirty,
                deps,
                influences,
                state,
            }
        })
        .collect();
    let state = StateFile {
        state_version: STATE_VERSION,
        actions,
    };

    let bytes =
        rmp_serde::to_vec_named(&state).map_err(|e| format!("Failed to encode state: {e}"))?;

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| {
        format!(
            "Failed to create a temporary state file in {}: {}",
            parent.display(),
            e
        )
    })?;
    let mut encoder = GzEncoder::new(tmp.as_file_mut(), Compression::default());
    encoder
        .write_all(&bytes)
        .map_err(|e| format!("Failed to write the state file: {e}"))?;
    encoder
        .finish()
        .map_err(|e| format!("Failed to write the state file: {e}"))?;
    tmp.persist(path)
        .map_err(|e| format!("Failed to move the state file into place: {e}"))?;
    Ok(())
}

///
/// Restores a graph persisted by `persist`. Any defect (missing file, bad
/// gzip, undecodable records, an unknown type tag, a version mismatch, a
/// dangling id) fails the restore; callers fall back to bootstrapping.
///
pub fn restore(path: &Path) -> Result<Graph, String> {
    let file = File::open(path).map_err(|e| format!("Failed to open the state file: {e}"))?;
    let mut bytes = Vec::new();
    GzDecoder::new(file)
        .read_to_end(&mut bytes)
        .map_err(|e| format!("The state file is not valid gzip: {e}"))?;
    let state: StateFile = rmp_serde::from_slice(&bytes)
        .map_err(|e| format!("The state file failed to decode: {e}"))?;
    if state.state_version != STATE_VERSION {
        return Err(format!(
            "State version {} is incompatible with {}",
            state.state_version, STATE_VERSION
        ));
    }

    // First pass: instantiate every node; second pass: translate the id
    // lists into edges. The dep lists alone carry the edge relation, since
    // persist always writes them symmetrically.
    let mut graph = Graph::new();
    let mut ids: HashMap<u32, NodeId> = HashMap::new();
    for record in &state.actions {
        let id = graph.add(decode_node(record)?, record.dirty);
        ids.insert(record.id, id);
    }
    for record in &state.actions {
        let from = ids[&record.id];
        for dep in &record.deps {
            let to = ids
                .get(dep)
                .ok_or_else(|| format!("The state file references an unknown node id {dep}"))?;
            graph.add_dependency(from, *to);
        }
    }
    Ok(graph)
}
