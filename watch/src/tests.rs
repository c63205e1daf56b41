// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::fs::{create_dir, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use crate::{InvalidationWatcher, WatchSignal};

fn setup_fs() -> (tempfile::TempDir, PathBuf) {
    // Set up a build root with a file in it to watch.
    let tempdir = tempfile::TempDir::new().unwrap();
    let build_root = tempdir.path();
    create_dir(build_root.join("chapters")).unwrap();
    let file_path = build_root.join("chapters/watch_me.tex");
    File::create(&file_path)
        .unwrap()
        .write_all(b"contents")
        .unwrap();
    (tempdir, file_path)
}

fn append(path: &Path, content: &[u8]) {
    let mut file = std::fs::OpenOptions::new().append(true).open(path).unwrap();
    file.write_all(content).unwrap();
}

/// Polls for up to a second, returning whether a wake was observed.
fn observed_wake(signal: &WatchSignal) -> bool {
    for _ in 0..10 {
        if signal.wait(Duration::from_millis(100)) {
            return true;
        }
    }
    false
}

#[test]
fn wake_on_file_change() {
    let (tempdir, file_path) = setup_fs();
    let signal = Arc::new(WatchSignal::new());
    let _watcher =
        InvalidationWatcher::new(tempdir.path().to_path_buf(), signal.clone()).unwrap();

    append(&file_path, b"stnetnoc");
    assert!(observed_wake(&signal), "Did not observe a wake");
}

#[test]
fn wake_on_file_creation() {
    let (tempdir, _file_path) = setup_fs();
    let signal = Arc::new(WatchSignal::new());
    let _watcher =
        InvalidationWatcher::new(tempdir.path().to_path_buf(), signal.clone()).unwrap();

    File::create(tempdir.path().join("chapters/new.tex")).unwrap();
    assert!(observed_wake(&signal), "Did not observe a wake");
}

#[test]
fn suppressed_paths_absorb_their_next_event() {
    let (tempdir, file_path) = setup_fs();
    let signal = Arc::new(WatchSignal::new());
    let _watcher =
        InvalidationWatcher::new(tempdir.path().to_path_buf(), signal.clone()).unwrap();

    let relative = PathBuf::from("chapters/watch_me.tex");
    signal.suppress(relative.clone());
    append(&file_path, b"self-inflicted");

    // The first event consumes the suppression entry. A single write can fan
    // out into several event kinds, so we only assert consumption here; the
    // one-event-one-entry accounting is covered at the signal level below.
    for _ in 0..10 {
        if !signal.is_suppressed(&relative) {
            break;
        }
        sleep(Duration::from_millis(100));
    }
    assert!(
        !signal.is_suppressed(&relative),
        "The event did not consume the suppression entry"
    );

    // Once the entry is gone, events on the path wake as usual.
    append(&file_path, b"for real this time");
    assert!(observed_wake(&signal), "Did not observe a wake");
}

#[test]
fn wait_consumes_the_wake() {
    let signal = WatchSignal::new();
    signal.notify(Path::new("doc.tex"));
    assert!(signal.wait(Duration::from_millis(10)));
    assert!(!signal.wait(Duration::from_millis(10)));
}

#[test]
fn notify_on_suppressed_path_does_not_wake() {
    let signal = WatchSignal::new();
    signal.suppress(PathBuf::from("doc.aux"));
    signal.notify(Path::new("doc.aux"));
    assert!(!signal.wait(Duration::from_millis(10)));
    // The entry is gone, so the next event wakes.
    signal.notify(Path::new("doc.aux"));
    assert!(signal.wait(Duration::from_millis(10)));
}
