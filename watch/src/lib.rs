// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#[cfg(test)]
mod tests;

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{self, Receiver};
use log::{debug, trace, warn};
use notify::event::{AccessKind, AccessMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::{Condvar, Mutex};

///
/// The scheduler's side of the watcher: a wake flag it can sleep on while
/// quiescent, and the suppression set of project-relative paths whose next
/// filesystem event should be swallowed because the engine itself provoked
/// it. Both live under one lock; the watcher thread and the scheduler each
/// hold it only briefly.
///
pub struct WatchSignal {
    state: Mutex<SignalState>,
    condvar: Condvar,
}

#[derive(Default)]
struct SignalState {
    suppressed: HashSet<PathBuf>,
    woken: bool,
}

impl WatchSignal {
    pub fn new() -> WatchSignal {
        WatchSignal {
            state: Mutex::new(SignalState::default()),
            condvar: Condvar::new(),
        }
    }

    /// Marks `path` so that its next event does not wake the scheduler.
    pub fn suppress(&self, path: PathBuf) {
        self.state.lock().suppressed.insert(path);
    }

    pub fn is_suppressed(&self, path: &Path) -> bool {
        self.state.lock().suppressed.contains(path)
    }

    ///
    /// Called by the watcher thread for every relevant event path. A
    /// suppressed path consumes its suppression entry instead of waking the
    /// scheduler.
    ///
    pub fn notify(&self, path: &Path) {
        let mut state = self.state.lock();
        if state.suppressed.remove(path) {
            trace!("Absorbed self-inflicted event on {path:?}");
            return;
        }
        trace!("Filesystem event on {path:?}");
        state.woken = true;
        self.condvar.notify_all();
    }

    ///
    /// Blocks until a wake arrives or `timeout` elapses; returns whether a
    /// wake was observed, consuming it.
    ///
    pub fn wait(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if !state.woken {
            let _timed_out = self.condvar.wait_for(&mut state, timeout);
        }
        let woken = state.woken;
        state.woken = false;
        woken
    }
}

///
/// Watches the project root recursively and routes events into a WatchSignal
/// from a dedicated background thread. Dropping the watcher stops both the
/// notify backend and, shortly after, the thread.
///
pub struct InvalidationWatcher {
    _watcher: RecommendedWatcher,
    // Detached on drop; the thread exits once the watcher's event sender is
    // gone.
    _thread: thread::JoinHandle<()>,
}

impl InvalidationWatcher {
    pub fn new(
        build_root: PathBuf,
        signal: Arc<WatchSignal>,
    ) -> Result<InvalidationWatcher, String> {
        // Inotify events contain canonical paths to the files being watched.
        // If the build root contains a symlink the event paths would not have
        // the build root as a prefix, and we would fail to relativize them.
        // We canonicalize the build root once so this isn't a problem.
        let canonical_build_root = std::fs::canonicalize(build_root.as_path())
            .map_err(|e| format!("Failed to canonicalize build root: {e:?}"))?;

        let (watch_sender, watch_receiver) = crossbeam_channel::unbounded();
        let mut watcher = notify::recommended_watcher(move |ev| {
            if watch_sender.send(ev).is_err() {
                // The watch thread shutting down first is ok, because it can
                // exit when the WatchSignal's consumer is done.
                debug!("Watch thread has shutdown, but Watcher is still running.");
            }
        })
        .map_err(|e| format!("Failed to begin watching the filesystem: {e}"))?;
        watcher
            .watch(&canonical_build_root, RecursiveMode::Recursive)
            .map_err(|e| {
                format!("Failed to begin recursively watching files in the build root: {e}")
            })?;

        let thread = InvalidationWatcher::start_background_thread(
            signal,
            canonical_build_root,
            watch_receiver,
        );

        Ok(InvalidationWatcher {
            _watcher: watcher,
            _thread: thread,
        })
    }

    fn start_background_thread(
        signal: Arc<WatchSignal>,
        canonical_build_root: PathBuf,
        watch_receiver: Receiver<notify::Result<notify::Event>>,
    ) -> thread::JoinHandle<()> {
        thread::spawn(move || {
            let exit_msg = loop {
                match watch_receiver.recv() {
                    Ok(Ok(ev)) => {
                        if !is_relevant(&ev.kind) {
                            continue;
                        }
                        for path in ev.paths {
                            // Relativize paths to the build root; events from
                            // elsewhere are none of our business.
                            match path.strip_prefix(&canonical_build_root) {
                                Ok(relative) => signal.notify(relative),
                                Err(_) => trace!("Ignoring out-of-root event on {path:?}"),
                            }
                        }
                    }
                    Ok(Err(err)) => {
                        if let notify::ErrorKind::PathNotFound = err.kind {
                            warn!("Path(s) did not exist: {:?}", err.paths);
                            continue;
                        } else {
                            break format!("Watch error: {err}");
                        }
                    }
                    Err(_) => {
                        break "The watch provider exited.".to_owned();
                    }
                }
            };
            warn!("File watcher exiting with: {exit_msg}");
        })
    }
}

///
/// The event kinds that can change tracked content: creations, removals,
/// data/metadata/name modifications, and writable-handle closes.
///
fn is_relevant(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_)
            | EventKind::Modify(_)
            | EventKind::Remove(_)
            | EventKind::Access(AccessKind::Close(AccessMode::Write))
    )
}
