// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Component, Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;

/// Matches `PID func(args) = status`; anything else is ignored. The status
/// and the annotations strace prints after it are dropped.
static TRACE_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+\s+(\w+)\(([^)]*)\)\s*=\s*[0-9-]+").unwrap());

///
/// For each recognized file-touching syscall, the 0-based index of the
/// comma-separated argument holding the target path. Adding a syscall here is
/// a deliberate schema change: it widens what the engine considers an input.
///
fn target_arg_index(func: &str) -> Option<usize> {
    match func {
        "access" | "execve" | "getcwd" | "lstat" | "mkdir" | "open" | "readlink" | "stat"
        | "unlink" => Some(0),
        "openat" => Some(1),
        _ => None,
    }
}

pub fn parse_log(path: &Path, basedir: &Path) -> Result<BTreeSet<PathBuf>, String> {
    let file = File::open(path)
        .map_err(|e| format!("Failed to open trace log {}: {}", path.display(), e))?;
    Ok(parse_reader(BufReader::new(file), basedir))
}

///
/// Extracts the set of paths inside `basedir` from a syscall trace, in the
/// form relative to `basedir`. Malformed lines, unknown syscalls and
/// out-of-tree paths are silently skipped.
///
pub fn parse_reader<R: BufRead>(reader: R, basedir: &Path) -> BTreeSet<PathBuf> {
    let mut targets = BTreeSet::new();
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(_) => continue,
        };
        let captures = match TRACE_LINE.captures(&line) {
            Some(captures) => captures,
            None => continue,
        };
        let index = match target_arg_index(&captures[1]) {
            Some(index) => index,
            None => continue,
        };
        let args: Vec<&str> = captures[2].split(", ").collect();
        let raw = match args.get(index) {
            Some(raw) => raw.trim_matches('"'),
            None => continue,
        };
        let target = normalize(basedir, Path::new(raw));
        if let Ok(relative) = target.strip_prefix(basedir) {
            if !relative.as_os_str().is_empty() {
                targets.insert(relative.to_path_buf());
            }
        }
    }
    targets
}

///
/// Resolves `path` to an absolute form: joined onto `basedir` when relative,
/// with `.` and `..` components resolved lexically (no symlink traversal).
///
fn normalize(basedir: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        basedir.join(path)
    };
    let mut out = PathBuf::new();
    for component in joined.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}
