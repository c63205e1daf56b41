// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use graph::{Graph, NodeState};
use hashing::ContentDigest;

use crate::store::{persist, restore};

/// A structural snapshot keyed by node display form, for comparing graphs up
/// to object identity.
fn snapshot(graph: &Graph) -> BTreeMap<String, (bool, Vec<String>, Vec<String>)> {
    graph
        .iter()
        .map(|(_, node)| {
            let mut deps: Vec<String> = node
                .deps()
                .map(|dep| graph.node(dep).to_string())
                .collect();
            let mut influences: Vec<String> = node
                .influences()
                .map(|i| graph.node(i).to_string())
                .collect();
            deps.sort();
            influences.sort();
            (node.to_string(), (node.dirty, deps, influences))
        })
        .collect()
}

fn sample_graph() -> Graph {
    let mut graph = Graph::new();
    let tex = graph.add(NodeState::file(PathBuf::from("doc.tex")), false);
    let aux = graph.add(
        NodeState::File {
            path: PathBuf::from("doc.aux"),
            checksum: ContentDigest::of_bytes(b"aux contents"),
        },
        true,
    );
    let compile = graph.add(
        NodeState::Command {
            command: "lualatex -pdf doc.tex".to_owned(),
            ignores: vec![r"\.log$".to_owned(), r"\.pdf$".to_owned()],
            status: Some(0),
        },
        false,
    );
    let index = graph.add(
        NodeState::command("makeindex -s gind.ist -o doc.ind doc.idx".to_owned(), vec![]),
        false,
    );
    graph.add_dependency(compile, tex);
    graph.add_dependency(compile, aux);
    graph.add_dependency(index, aux);
    graph
}

#[test]
fn round_trip_preserves_structure() {
    let dir = tempfile::TempDir::new().unwrap();
    let state_path = dir.path().join(".autotex.state");
    let graph = sample_graph();

    persist(&graph, &state_path).unwrap();
    let restored = restore(&state_path).unwrap();

    assert_eq!(snapshot(&restored), snapshot(&graph));
}

#[test]
fn round_trip_preserves_node_state() {
    let dir = tempfile::TempDir::new().unwrap();
    let state_path = dir.path().join(".autotex.state");
    persist(&sample_graph(), &state_path).unwrap();
    let restored = restore(&state_path).unwrap();

    let mut checksums = Vec::new();
    let mut statuses = Vec::new();
    for (_, node) in restored.iter() {
        match &node.state {
            NodeState::File { checksum, .. } => checksums.push(checksum.clone()),
            NodeState::Command { status, ignores, .. } => {
                statuses.push((*status, ignores.clone()))
            }
        }
    }
    checksums.sort_by_key(|checksum| checksum.to_hex());
    assert_eq!(
        checksums,
        vec![ContentDigest::empty(), ContentDigest::of_bytes(b"aux contents")]
    );
    statuses.sort();
    assert_eq!(
        statuses,
        vec![
            (None, vec![]),
            (Some(0), vec![r"\.log$".to_owned(), r"\.pdf$".to_owned()]),
        ]
    );
}

#[test]
fn empty_graph_round_trips() {
    let dir = tempfile::TempDir::new().unwrap();
    let state_path = dir.path().join(".autotex.state");
    persist(&Graph::new(), &state_path).unwrap();
    assert_eq!(restore(&state_path).unwrap().len(), 0);
}

#[test]
fn persist_overwrites_atomically() {
    let dir = tempfile::TempDir::new().unwrap();
    let state_path = dir.path().join(".autotex.state");
    persist(&sample_graph(), &state_path).unwrap();
    persist(&Graph::new(), &state_path).unwrap();
    assert_eq!(restore(&state_path).unwrap().len(), 0);
    // No temporary files left behind.
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}

#[test]
fn missing_state_file_fails_restore() {
    let dir = tempfile::TempDir::new().unwrap();
    assert!(restore(&dir.path().join("missing.state")).is_err());
}

#[test]
fn incompatible_version_fails_restore() {
    #[derive(serde::Serialize)]
    struct Stale {
        state_version: u32,
        actions: Vec<i32>,
    }
    let bytes = rmp_serde::to_vec_named(&Stale {
        state_version: 1,
        actions: vec![],
    })
    .unwrap();

    let dir = tempfile::TempDir::new().unwrap();
    let state_path = dir.path().join(".autotex.state");
    let file = std::fs::File::create(&state_path).unwrap();
    let mut encoder =
        flate2::write::GzEncoder::new(file, flate2::Compression::default());
    encoder.write_all(&bytes).unwrap();
    encoder.finish().unwrap();

    let err = restore(&state_path).unwrap_err();
    assert!(err.contains("incompatible"), "unexpected error: {err}");
}

#[test]
fn garbage_fails_restore() {
    let dir = tempfile::TempDir::new().unwrap();
    let state_path = dir.path().join(".autotex.state");
    std::fs::File::create(&state_path)
        .unwrap()
        .write_all(b"not a state file")
        .unwrap();
    assert!(restore(&state_path).is_err());
}

#[test]
fn checksum_bytes_survive_the_round_trip() {
    let dir = tempfile::TempDir::new().unwrap();
    let state_path = dir.path().join(".autotex.state");
    let mut graph = Graph::new();
    graph.add(
        NodeState::File {
            path: PathBuf::from("doc.tex"),
            checksum: ContentDigest::of_file(Path::new("/does/not/exist")),
        },
        false,
    );
    persist(&graph, &state_path).unwrap();
    let restored = restore(&state_path).unwrap();
    let (_, node) = restored.iter().next().unwrap();
    match &node.state {
        NodeState::File { checksum, .. } => assert!(checksum.is_empty()),
        _ => panic!("expected a file node"),
    }
}
