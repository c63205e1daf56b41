// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::fs::File;
use std::io::Write;

use crate::ContentDigest;

const EMPTY_INPUT_HEX: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

#[test]
fn of_bytes() {
    assert_eq!(ContentDigest::of_bytes(b"").to_hex(), EMPTY_INPUT_HEX);
    assert_eq!(
        ContentDigest::of_bytes(b"hello world").to_hex(),
        "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
    );
}

#[test]
fn empty_is_distinct_from_empty_input() {
    assert!(ContentDigest::empty().is_empty());
    assert_ne!(ContentDigest::empty(), ContentDigest::of_bytes(b""));
}

#[test]
fn of_file_matches_of_bytes() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("some_file.txt");
    File::create(&path)
        .unwrap()
        .write_all(b"hello world")
        .unwrap();
    assert_eq!(
        ContentDigest::of_file(&path),
        ContentDigest::of_bytes(b"hello world")
    );
}

#[test]
fn of_file_absent_is_empty() {
    let dir = tempfile::TempDir::new().unwrap();
    let digest = ContentDigest::of_file(&dir.path().join("does_not_exist"));
    assert!(digest.is_empty());
    assert_eq!(digest, ContentDigest::empty());
}

#[test]
fn display() {
    assert_eq!(format!("{}", ContentDigest::empty()), "<empty>");
    assert_eq!(
        format!("{}", ContentDigest::of_bytes(b"")),
        EMPTY_INPUT_HEX
    );
}
