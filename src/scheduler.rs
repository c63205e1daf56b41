// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use graph::{Graph, NodeId, NodeKey, NodeState};
use hashing::ContentDigest;
use log::{debug, info, warn};
use options::Config;
use process_execution::CommandRunner;
use regex::Regex;
use watch::WatchSignal;

use crate::rules::RuleSet;
use crate::store;

///
/// The single-threaded cooperative engine: it owns the graph and drives it to
/// a fixed point, one command at a time. The only other thread in the process
/// is the filesystem watcher, which communicates exclusively through the
/// attached `WatchSignal`.
///
pub struct Engine {
    graph: Graph,
    rules: RuleSet,
    runner: CommandRunner,
    basedir: PathBuf,
    state_path: PathBuf,
    max_rounds: u32,
    signal: Option<Arc<WatchSignal>>,
    terminate: Arc<AtomicBool>,
    // Owns the scratch directory holding trace logs; removed on drop.
    _scratch: tempfile::TempDir,
}

impl Engine {
    pub fn new(config: &Config, terminate: Arc<AtomicBool>) -> Result<Engine, String> {
        let basedir = match &config.basedir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()
                .map_err(|e| format!("Failed to determine the working directory: {e}"))?,
        };
        let basedir = std::fs::canonicalize(&basedir)
            .map_err(|e| format!("Failed to canonicalize basedir {}: {}", basedir.display(), e))?;

        let rules = RuleSet::from_config(&config.command_map)?;

        let scratch = match &config.tmpdir {
            Some(dir) => {
                std::fs::create_dir_all(dir)
                    .map_err(|e| format!("Failed to create tmpdir {}: {}", dir.display(), e))?;
                tempfile::Builder::new().prefix("autotex-").tempdir_in(dir)
            }
            None => tempfile::tempdir(),
        }
        .map_err(|e| format!("Failed to create the scratch directory: {e}"))?;

        let log_path = basedir.join(&config.log);
        let runner = CommandRunner::new(
            basedir.clone(),
            scratch.path().to_path_buf(),
            &log_path,
            config.append_log,
            terminate.clone(),
        )?;
        let state_path = basedir.join(&config.state);

        Ok(Engine {
            graph: Graph::new(),
            rules,
            runner,
            basedir,
            state_path,
            max_rounds: config.max_rounds,
            signal: None,
            terminate,
            _scratch: scratch,
        })
    }

    pub fn basedir(&self) -> &Path {
        &self.basedir
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Enables continuous-mode behavior: suppression of self-inflicted
    /// events, and sleeping on the signal while quiescent.
    pub fn attach_watcher(&mut self, signal: Arc<WatchSignal>) {
        self.signal = Some(signal);
    }

    ///
    /// Restores persisted state, or bootstraps the graph from the initial
    /// file list: every file is tracked, and every rule matching it fires.
    /// Fails when neither yields a command to run.
    ///
    pub fn bootstrap(&mut self, files: &[PathBuf]) -> Result<(), String> {
        match store::restore(&self.state_path) {
            Ok(graph) => {
                info!(
                    "Restored {} tracked actions from {}",
                    graph.len(),
                    self.state_path.display()
                );
                self.graph = graph;
                return Ok(());
            }
            Err(err) => debug!("No usable state at {}: {}", self.state_path.display(), err),
        }

        if files.is_empty() {
            return Err("No state to restore and no input files given".to_owned());
        }
        let mut matched = false;
        for file in files {
            let path = self.relativize(file)?;
            let file_id = self.graph.add(NodeState::file(path.clone()), true);
            for action in self.rules.detect_actions(&path, false) {
                let command_id = self
                    .graph
                    .add(NodeState::command(action.command, action.ignores), true);
                self.graph.add_dependency(command_id, file_id);
                matched = true;
            }
        }
        if !matched {
            return Err("No command template matched the given files".to_owned());
        }
        Ok(())
    }

    ///
    /// Drives the graph to a fixed point: rounds of priority-ordered updates
    /// (files first) run until one changes nothing, folding newly discovered
    /// nodes in as they appear and persisting after every round that changed
    /// anything. Fails when `max_rounds` is exceeded.
    ///
    pub fn run_to_fixed_point(&mut self) -> Result<(), String> {
        let mut rounds = 0_u32;
        let mut changed = true;
        while changed {
            if self.terminate.load(Ordering::SeqCst) {
                info!("Interrupted; state was persisted, not starting another round");
                break;
            }
            if self.max_rounds != 0 && rounds >= self.max_rounds {
                return Err(format!(
                    "The pipeline did not reach a fixed point within {rounds} rounds"
                ));
            }
            changed = false;

            let mut schedule: Vec<NodeId> = self
                .graph
                .iter()
                .filter(|(id, _)| self.needs_update(*id))
                .map(|(id, _)| id)
                .collect();
            // A stable sort: files run before commands, ties keep discovery
            // order.
            schedule.sort_by_key(|id| self.graph.node(*id).priority());
            debug!("Round {rounds}: {} nodes to update", schedule.len());

            let mut interrupted = false;
            for id in schedule {
                if self.terminate.load(Ordering::SeqCst) {
                    interrupted = true;
                    break;
                }
                match self.update(id) {
                    Ok(novel) => {
                        self.graph.fold(novel);
                        changed = true;
                    }
                    Err(err) => {
                        if self.terminate.load(Ordering::SeqCst) {
                            warn!("{err}");
                            interrupted = true;
                            break;
                        }
                        return Err(err);
                    }
                }
            }

            rounds += 1;
            if changed {
                self.persist()?;
                debug!("Tracked actions:");
                for (_, node) in self.graph.iter() {
                    debug!("  {node}");
                }
            }
            if interrupted {
                break;
            }
        }
        Ok(())
    }

    ///
    /// Continuous mode: converge, then sleep on the watch signal until some
    /// node reports needing an update, debounce, and converge again. Bursts
    /// of editor-save events collapse into the debounce window.
    ///
    pub fn watch_loop(&mut self, debounce: Duration) -> Result<(), String> {
        let signal = self
            .signal
            .clone()
            .ok_or_else(|| "Continuous mode requires an attached watcher".to_owned())?;
        loop {
            self.run_to_fixed_point()?;
            if self.terminate.load(Ordering::SeqCst) {
                return Ok(());
            }
            info!("Reached a fixed point; waiting for filesystem changes");
            loop {
                if self.terminate.load(Ordering::SeqCst) {
                    return Ok(());
                }
                if self.any_needs_update() {
                    break;
                }
                while !signal.wait(Duration::from_millis(500)) {
                    if self.terminate.load(Ordering::SeqCst) {
                        return Ok(());
                    }
                }
            }
            thread::sleep(debounce);
        }
    }

    /// True when every recorded command status is a success. Checked at
    /// process exit.
    pub fn check_status(&self) -> bool {
        self.graph.iter().all(|(_, node)| match &node.state {
            NodeState::Command {
                status: Some(code), ..
            } => *code == 0,
            _ => true,
        })
    }

    pub fn any_needs_update(&self) -> bool {
        self.graph.iter().any(|(id, _)| self.needs_update(id))
    }

    ///
    /// A node needs an update when its dirty flag is set, or (file nodes
    /// only) when its stored digest no longer matches the file's content and
    /// the path is not currently suppressed.
    ///
    fn needs_update(&self, id: NodeId) -> bool {
        let node = self.graph.node(id);
        if node.dirty {
            return true;
        }
        match &node.state {
            NodeState::File { path, checksum } => {
                if let Some(signal) = &self.signal {
                    if signal.is_suppressed(path) {
                        return false;
                    }
                }
                *checksum != ContentDigest::of_file(&self.basedir.join(path))
            }
            NodeState::Command { .. } => false,
        }
    }

    fn update(&mut self, id: NodeId) -> Result<Vec<NodeId>, String> {
        let state = self.graph.node(id).state.clone();
        match state {
            NodeState::File { path, .. } => {
                self.update_file(id, &path);
                Ok(Vec::new())
            }
            NodeState::Command {
                command, ignores, ..
            } => self.update_command(id, &command, &ignores),
        }
    }

    ///
    /// Re-hashes the file and marks everything it influences dirty. In
    /// continuous mode the path is suppressed first, so the event for the
    /// write being hashed does not re-enqueue the node.
    ///
    fn update_file(&mut self, id: NodeId, path: &Path) {
        if let Some(signal) = &self.signal {
            signal.suppress(path.to_path_buf());
        }
        let checksum = ContentDigest::of_file(&self.basedir.join(path));
        info!("File changed: {:?} (checksum={})", path.display().to_string(), checksum);
        let node = self.graph.node_mut(id);
        if let NodeState::File { checksum: stored, .. } = &mut node.state {
            *stored = checksum;
        }
        node.dirty = false;
        self.graph.mark_influences_dirty(id);
    }

    ///
    /// Runs the command under the tracer and feeds the observations back into
    /// the graph: every in-tree path that is neither ignored nor already a
    /// dependency becomes a file node, and newly tracked files spawn their
    /// auto-matching follow-on commands. Returns the new nodes for the
    /// scheduler to fold in; a non-zero exit is recorded, not fatal.
    ///
    fn update_command(
        &mut self,
        id: NodeId,
        command: &str,
        ignores: &[String],
    ) -> Result<Vec<NodeId>, String> {
        let ignore_patterns: Vec<Regex> = ignores
            .iter()
            .map(|pattern| Regex::new(pattern))
            .collect::<Result<_, _>>()
            .map_err(|e| format!("Invalid ignore pattern on {command:?}: {e}"))?;

        let result = self.runner.run(command)?;

        let mut novel = Vec::new();
        for path in result.paths {
            let text = path.to_string_lossy();
            if ignore_patterns.iter().any(|re| re.is_match(&text)) {
                continue;
            }
            // Paths this command already depends on are old news.
            if let Some(file_id) = self.graph.find_equivalent(&NodeKey::File(path.clone())) {
                if self.graph.has_dependency(id, file_id) {
                    continue;
                }
            }
            let file_id = self.graph.reserve(NodeState::file(path.clone()));
            self.graph.add_dependency(id, file_id);
            novel.push(file_id);
            for action in self.rules.detect_actions(&path, true) {
                let command_id = self
                    .graph
                    .reserve(NodeState::command(action.command, action.ignores));
                self.graph.add_dependency(command_id, file_id);
                novel.push(command_id);
            }
        }

        if result.exit_code != 0 {
            warn!("Command failed with status {}: {}", result.exit_code, command);
        }
        let node = self.graph.node_mut(id);
        if let NodeState::Command { status, .. } = &mut node.state {
            *status = Some(result.exit_code);
        }
        node.dirty = false;
        self.graph.mark_influences_dirty(id);
        Ok(novel)
    }

    fn persist(&self) -> Result<(), String> {
        store::persist(&self.graph, &self.state_path)
    }

    /// Initial files are tracked in project-root-relative form, like every
    /// other path in the graph.
    fn relativize(&self, file: &Path) -> Result<PathBuf, String> {
        if file.is_absolute() {
            file.strip_prefix(&self.basedir)
                .map(|path| path.to_path_buf())
                .map_err(|_| {
                    format!(
                        "{} is outside the project root {}",
                        file.display(),
                        self.basedir.display()
                    )
                })
        } else {
            Ok(file.to_path_buf())
        }
    }
}
