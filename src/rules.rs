// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::collections::BTreeMap;
use std::path::Path;

use options::RuleConfig;
use regex::Regex;

///
/// How a rule constructs its command string when a tracked path matches. The
/// constructed commands are ordinary command nodes; the kind only shapes
/// their birth.
///
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RuleKind {
    /// A caller-supplied template from `args.command`.
    Command,
    Compile,
    Index,
    Bibliography,
}

impl RuleKind {
    fn parse(name: &str) -> Result<RuleKind, String> {
        match name {
            "command" => Ok(RuleKind::Command),
            "compile" => Ok(RuleKind::Compile),
            "index" => Ok(RuleKind::Index),
            "bibliography" => Ok(RuleKind::Bibliography),
            other => Err(format!("Unknown command_map action {other:?}")),
        }
    }
}

///
/// One pattern -> command binding. The pattern is searched, not anchored, and
/// all matching rules fire.
///
pub struct Rule {
    pattern: Regex,
    kind: RuleKind,
    args: BTreeMap<String, String>,
    auto: bool,
    ignores: Vec<String>,
}

/// A constructed command, ready to be folded into the graph.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DetectedAction {
    pub command: String,
    pub ignores: Vec<String>,
}

impl Rule {
    pub fn from_config(config: &RuleConfig) -> Result<Rule, String> {
        let pattern = Regex::new(&config.pattern)
            .map_err(|e| format!("Invalid command_map pattern {:?}: {}", config.pattern, e))?;
        let kind = RuleKind::parse(&config.action)?;
        if kind == RuleKind::Command && !config.args.contains_key("command") {
            return Err(format!(
                "The rule for {:?} needs a `command` argument",
                config.pattern
            ));
        }
        for ignore in &config.ignores {
            Regex::new(ignore)
                .map_err(|e| format!("Invalid ignore pattern {ignore:?}: {e}"))?;
        }
        Ok(Rule {
            pattern,
            kind,
            args: config.args.clone(),
            auto: config.auto,
            ignores: config.ignores.clone(),
        })
    }

    fn construct(&self, path: &Path) -> DetectedAction {
        let command = match self.kind {
            RuleKind::Command => {
                let template = self.args.get("command").map(String::as_str).unwrap_or("");
                expand(template, path)
            }
            RuleKind::Compile => expand("lualatex -pdf ?p", path),
            RuleKind::Index => {
                let style = self.arg(path, "style", "gind.ist");
                format!(
                    "makeindex -s {} -o {} {}",
                    style,
                    expand("?w.ind", path),
                    expand("?p", path)
                )
            }
            RuleKind::Bibliography => expand("biber ?w", path),
        };
        DetectedAction {
            command: unescape(&command),
            ignores: self.ignores.clone(),
        }
    }

    /// An argument value with placeholders expanded, or `default`.
    fn arg(&self, path: &Path, name: &str, default: &str) -> String {
        match self.args.get(name) {
            Some(value) => expand(value, path),
            None => default.to_owned(),
        }
    }
}

///
/// The full pattern -> rule table.
///
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn from_config(configs: &[RuleConfig]) -> Result<RuleSet, String> {
        let rules = configs
            .iter()
            .map(Rule::from_config)
            .collect::<Result<Vec<_>, String>>()?;
        Ok(RuleSet { rules })
    }

    ///
    /// Constructs a command for every rule whose pattern matches `path`;
    /// `auto_only` restricts to the rules that fire for newly discovered
    /// files.
    ///
    pub fn detect_actions(&self, path: &Path, auto_only: bool) -> Vec<DetectedAction> {
        let text = path.to_string_lossy();
        self.rules
            .iter()
            .filter(|rule| (!auto_only || rule.auto) && rule.pattern.is_match(&text))
            .map(|rule| rule.construct(path))
            .collect()
    }
}

///
/// Substitutes path placeholders in a single left-to-right pass: `?p` the
/// full path, `?w` the path without its extension, `?e` the extension
/// including its dot, `?d` the directory, `?b` the basename. A `??` pair is
/// copied through untouched rather than collapsed here: a bare `?` in the
/// output could abut a following placeholder letter and get re-expanded by
/// a later pass, while the intact pair keeps expansion idempotent. The
/// pairs collapse in `unescape`, once the command string is fully
/// assembled.
///
pub fn expand(template: &str, path: &Path) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars();
    while let Some(c) = chars.next() {
        if c != '?' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('p') => out.push_str(&path.to_string_lossy()),
            Some('w') => out.push_str(&path.with_extension("").to_string_lossy()),
            Some('e') => {
                if let Some(ext) = path.extension() {
                    out.push('.');
                    out.push_str(&ext.to_string_lossy());
                }
            }
            Some('d') => {
                let dir = path.parent().unwrap_or_else(|| Path::new(""));
                out.push_str(&dir.to_string_lossy());
            }
            Some('b') => {
                if let Some(name) = path.file_name() {
                    out.push_str(&name.to_string_lossy());
                }
            }
            Some('?') => out.push_str("??"),
            Some(other) => {
                out.push('?');
                out.push(other);
            }
            None => out.push('?'),
        }
    }
    out
}

/// Collapses each `??` escape into a literal `?`. Applied exactly once,
/// after all placeholder expansion is done.
pub fn unescape(command: &str) -> String {
    command.replace("??", "?")
}
