// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::collections::BTreeMap;
use std::path::Path;

use maplit::btreemap;
use options::RuleConfig;

use crate::rules::{expand, unescape, DetectedAction, RuleSet};

fn rule(pattern: &str, action: &str, args: BTreeMap<String, String>, auto: bool) -> RuleConfig {
    RuleConfig {
        pattern: pattern.to_owned(),
        action: action.to_owned(),
        args,
        auto,
        ignores: vec![],
    }
}

#[test]
fn expand_placeholders() {
    let path = Path::new("chapters/intro.tex");
    assert_eq!(expand("?p", path), "chapters/intro.tex");
    assert_eq!(expand("?w", path), "chapters/intro");
    assert_eq!(expand("?e", path), ".tex");
    assert_eq!(expand("?d", path), "chapters");
    assert_eq!(expand("?b", path), "intro.tex");
    assert_eq!(
        expand("lualatex -pdf ?p > ?w.out", path),
        "lualatex -pdf chapters/intro.tex > chapters/intro.out"
    );
}

#[test]
fn expand_degenerate_paths() {
    assert_eq!(expand("?e", Path::new("Makefile")), "");
    assert_eq!(expand("?d", Path::new("doc.tex")), "");
}

#[test]
fn expand_question_mark_escaping() {
    let path = Path::new("doc.tex");
    // The escape pair survives expansion untouched; it only collapses in
    // the final unescape over the assembled command.
    assert_eq!(expand("??p", path), "??p");
    assert_eq!(unescape(&expand("??p", path)), "?p");
    assert_eq!(expand("a?zb", path), "a?zb");
    assert_eq!(expand("trailing?", path), "trailing?");
}

#[test]
fn expand_is_idempotent() {
    // Escapes stay inert under expansion, even when the pair abuts a
    // placeholder letter, so a second pass over expanded output changes
    // nothing.
    let once = expand("echo ??done", Path::new("doc.tex"));
    assert_eq!(once, "echo ??done");
    assert_eq!(expand(&once, Path::new("doc.tex")), once);

    let once = expand("??p ?b", Path::new("chapters/intro.tex"));
    assert_eq!(once, "??p intro.tex");
    assert_eq!(expand(&once, Path::new("chapters/intro.tex")), once);
}

#[test]
fn escaped_placeholders_reach_the_command_verbatim() {
    let rules = RuleSet::from_config(&[rule(
        r"\.tex$",
        "command",
        btreemap! {"command".to_owned() => "printf '%s' ??p ?b".to_owned()},
        false,
    )])
    .unwrap();
    assert_eq!(
        rules.detect_actions(Path::new("doc.tex"), false)[0].command,
        "printf '%s' ?p doc.tex"
    );
}

#[test]
fn all_matching_rules_fire() {
    let rules = RuleSet::from_config(&[
        rule(
            r"\.tex$",
            "command",
            btreemap! {"command".to_owned() => "first ?p".to_owned()},
            false,
        ),
        rule(
            r"intro",
            "command",
            btreemap! {"command".to_owned() => "second ?b".to_owned()},
            false,
        ),
        rule(
            r"\.idx$",
            "command",
            btreemap! {"command".to_owned() => "never".to_owned()},
            false,
        ),
    ])
    .unwrap();

    let actions = rules.detect_actions(Path::new("chapters/intro.tex"), false);
    assert_eq!(
        actions,
        vec![
            DetectedAction {
                command: "first chapters/intro.tex".to_owned(),
                ignores: vec![],
            },
            DetectedAction {
                command: "second intro.tex".to_owned(),
                ignores: vec![],
            },
        ]
    );
}

#[test]
fn auto_only_filters_rules() {
    let rules = RuleSet::from_config(&[
        rule(
            r"\.tex$",
            "command",
            btreemap! {"command".to_owned() => "manual ?p".to_owned()},
            false,
        ),
        rule(
            r"\.tex$",
            "command",
            btreemap! {"command".to_owned() => "automatic ?p".to_owned()},
            true,
        ),
    ])
    .unwrap();

    let auto = rules.detect_actions(Path::new("doc.tex"), true);
    assert_eq!(auto.len(), 1);
    assert_eq!(auto[0].command, "automatic doc.tex");
    assert_eq!(rules.detect_actions(Path::new("doc.tex"), false).len(), 2);
}

#[test]
fn builtin_constructors() {
    let rules = RuleSet::from_config(&[
        rule(r"\.tex$", "compile", BTreeMap::new(), false),
        rule(r"\.idx$", "index", BTreeMap::new(), true),
        rule(r"\.bcf$", "bibliography", BTreeMap::new(), true),
    ])
    .unwrap();

    assert_eq!(
        rules.detect_actions(Path::new("doc.tex"), false)[0].command,
        "lualatex -pdf doc.tex"
    );
    assert_eq!(
        rules.detect_actions(Path::new("doc.idx"), false)[0].command,
        "makeindex -s gind.ist -o doc.ind doc.idx"
    );
    assert_eq!(
        rules.detect_actions(Path::new("doc.bcf"), false)[0].command,
        "biber doc"
    );
}

#[test]
fn index_style_is_overridable() {
    let rules = RuleSet::from_config(&[rule(
        r"\.idx$",
        "index",
        btreemap! {"style".to_owned() => "custom.ist".to_owned()},
        true,
    )])
    .unwrap();
    assert_eq!(
        rules.detect_actions(Path::new("doc.idx"), true)[0].command,
        "makeindex -s custom.ist -o doc.ind doc.idx"
    );
}

#[test]
fn ignores_are_carried_onto_the_action() {
    let mut config = rule(
        r"\.tex$",
        "command",
        btreemap! {"command".to_owned() => "run ?p".to_owned()},
        false,
    );
    config.ignores = vec![r"\.log$".to_owned()];
    let rules = RuleSet::from_config(&[config]).unwrap();
    assert_eq!(
        rules.detect_actions(Path::new("doc.tex"), false)[0].ignores,
        vec![r"\.log$"]
    );
}

#[test]
fn invalid_configs_are_rejected() {
    assert!(RuleSet::from_config(&[rule(r"(", "compile", BTreeMap::new(), false)]).is_err());
    assert!(RuleSet::from_config(&[rule(r"\.tex$", "explode", BTreeMap::new(), false)]).is_err());
    // The generic constructor needs its template.
    assert!(RuleSet::from_config(&[rule(r"\.tex$", "command", BTreeMap::new(), false)]).is_err());
    let mut bad_ignore = rule(r"\.tex$", "compile", BTreeMap::new(), false);
    bad_ignore.ignores = vec![r"(".to_owned()];
    assert!(RuleSet::from_config(&[bad_ignore]).is_err());
}
