// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).


use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use toml::Value;

/// A key prefixed with this patches the existing subtree or list instead of
/// replacing it.
const PATCH_PREFIX: &str = "?+";
/// A key prefixed with this removes the existing entry; inside a list, a bare
/// string item with this prefix removes the matching item.
const REMOVE_PREFIX: &str = "?-";

/// The built-in bottom layer of the configuration.
const DEFAULT_CONFIG: &str = r##"
continuously = false
continuously_wait = 0.25
log = "autotex.log"
append_log = false
max_rounds = 10
state = ".autotex.state"
verbose = false

[[command_map]]
pattern = '\.tex$'
action = "compile"
auto = false
ignores = ['\.log$', '\.pdf$']

[[command_map]]
pattern = '\.idx$'
action = "index"
auto = true
args = { style = "gind.ist" }

[[command_map]]
pattern = '\.bcf$'
action = "bibliography"
auto = true
"##;

///
/// The typed view of the fully merged configuration tree.
///
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// Project root for the in-tree filter; defaults to the working directory.
    #[serde(default)]
    pub basedir: Option<PathBuf>,
    #[serde(default)]
    pub command_map: Vec<RuleConfig>,
    #[serde(default)]
    pub continuously: bool,
    #[serde(default = "default_continuously_wait")]
    pub continuously_wait: f64,
    #[serde(default = "default_log")]
    pub log: PathBuf,
    #[serde(default)]
    pub append_log: bool,
    /// Fixed-point iteration cap; 0 disables the cap.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    #[serde(default = "default_state")]
    pub state: PathBuf,
    /// Scratch directory for trace logs; defaults to a process-private
    /// temporary directory.
    #[serde(default)]
    pub tmpdir: Option<PathBuf>,
    #[serde(default)]
    pub verbose: bool,
}

///
/// One `command_map` entry: a path pattern bound to a command constructor.
///
#[derive(Clone, Debug, Deserialize)]
pub struct RuleConfig {
    pub pattern: String,
    pub action: String,
    #[serde(default)]
    pub args: BTreeMap<String, String>,
    #[serde(default)]
    pub auto: bool,
    #[serde(default)]
    pub ignores: Vec<String>,
}

fn default_continuously_wait() -> f64 {
    0.25
}

fn default_log() -> PathBuf {
    PathBuf::from("autotex.log")
}

fn default_max_rounds() -> u32 {
    10
}

fn default_state() -> PathBuf {
    PathBuf::from(".autotex.state")
}

impl Config {
    ///
    /// Builds the configuration from its three layers: built-in defaults,
    /// then the on-disk file (when given), then command-line overrides.
    ///
    pub fn load(config_file: Option<&Path>, overrides: Value) -> Result<Config, String> {
        let mut tree: Value = DEFAULT_CONFIG
            .parse()
            .map_err(|e| format!("The built-in defaults failed to parse: {e}"))?;
        if let Some(path) = config_file {
            let contents = fs::read_to_string(path)
                .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;
            let file_tree: Value = contents
                .parse()
                .map_err(|e| format!("Failed to parse config file {}: {}", path.display(), e))?;
            if !file_tree.is_table() {
                return Err(format!(
                    "Expected the config file {} to contain a table but contained a {}",
                    path.display(),
                    file_tree.type_str()
                ));
            }
            merge_values(&mut tree, file_tree);
        }
        merge_values(&mut tree, overrides);
        tree.try_into()
            .map_err(|e| format!("Invalid configuration: {e}"))
    }
}

///
/// Merges `patch` into `base`, honoring the key operators: a bare key
/// replaces the entry, `?+key` patches it in place (tables merge recursively,
/// lists extend), `?-key` removes it. Non-table patches replace `base`
/// wholesale.
///
pub fn merge_values(base: &mut Value, patch: Value) {
    let patch_table = match patch {
        Value::Table(table) if base.is_table() => table,
        other => {
            *base = other;
            return;
        }
    };
    let base_table = base.as_table_mut().expect("checked above");
    for (key, value) in patch_table {
        if let Some(name) = key.strip_prefix(PATCH_PREFIX) {
            match base_table.get_mut(name) {
                Some(existing) => patch_value(existing, value),
                None => {
                    base_table.insert(name.to_owned(), value);
                }
            }
        } else if let Some(name) = key.strip_prefix(REMOVE_PREFIX) {
            base_table.remove(name);
        } else {
            base_table.insert(key, value);
        }
    }
}

fn patch_value(existing: &mut Value, patch: Value) {
    match patch {
        table @ Value::Table(_) if existing.is_table() => merge_values(existing, table),
        Value::Array(items) if existing.is_array() => {
            let base_items = existing.as_array_mut().expect("checked above");
            for item in items {
                let removal = item
                    .as_str()
                    .and_then(|s| s.strip_prefix(REMOVE_PREFIX))
                    .map(str::to_owned);
                match removal {
                    Some(removal) => base_items.retain(|x| x.as_str() != Some(removal.as_str())),
                    None => base_items.push(item),
                }
            }
        }
        other => *existing = other,
    }
}
