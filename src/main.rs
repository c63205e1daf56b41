// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, warn};
use options::Config;
use toml::value::Table;
use toml::Value;
use watch::{InvalidationWatcher, WatchSignal};

use autotex::scheduler::Engine;

/// Looked for in the working directory when `--config` is not given.
const DEFAULT_CONFIG_FILE: &str = "autotex.toml";

#[derive(Debug, Parser)]
#[command(
    name = "autotex",
    about = "Builds documents by discovering their pipeline from syscall traces."
)]
struct Opts {
    /// Entry files to build, e.g. the top-level .tex file.
    files: Vec<PathBuf>,

    /// Path of the build log file.
    #[arg(short = 'l', long)]
    log: Option<PathBuf>,

    /// Append to the build log instead of truncating it.
    #[arg(long = "append_log")]
    append_log: bool,

    /// TOML config file merged over the built-in defaults.
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Keep watching the project and rebuilding after convergence.
    #[arg(short = 'e', long)]
    continuously: bool,

    /// Path of the persistent engine state.
    #[arg(short = 's', long)]
    state: Option<PathBuf>,

    /// Enable debug output.
    #[arg(short = 'v', long)]
    verbose: bool,
}

/// The top configuration layer, built from whatever was passed explicitly.
fn overrides(opts: &Opts) -> Value {
    let mut table = Table::new();
    if let Some(log) = &opts.log {
        table.insert(
            "log".to_owned(),
            Value::String(log.display().to_string()),
        );
    }
    if opts.append_log {
        table.insert("append_log".to_owned(), Value::Boolean(true));
    }
    if opts.continuously {
        table.insert("continuously".to_owned(), Value::Boolean(true));
    }
    if let Some(state) = &opts.state {
        table.insert(
            "state".to_owned(),
            Value::String(state.display().to_string()),
        );
    }
    if opts.verbose {
        table.insert("verbose".to_owned(), Value::Boolean(true));
    }
    Value::Table(table)
}

fn run(opts: &Opts) -> Result<bool, String> {
    let config_path = opts.config.clone().or_else(|| {
        let default = PathBuf::from(DEFAULT_CONFIG_FILE);
        default.exists().then_some(default)
    });
    let config = Config::load(config_path.as_deref(), overrides(opts))?;
    if config.verbose {
        log::set_max_level(log::LevelFilter::Debug);
    }

    let terminate = Arc::new(AtomicBool::new(false));
    {
        let terminate = terminate.clone();
        ctrlc::set_handler(move || {
            if !terminate.swap(true, Ordering::SeqCst) {
                warn!("Interrupted; finishing the current step and persisting state");
            }
        })
        .map_err(|e| format!("Failed to install the interrupt handler: {e}"))?;
    }

    let mut engine = Engine::new(&config, terminate)?;
    if config.continuously {
        let signal = Arc::new(WatchSignal::new());
        let _watcher = InvalidationWatcher::new(engine.basedir().to_path_buf(), signal.clone())?;
        engine.attach_watcher(signal);
        engine.bootstrap(&opts.files)?;
        let debounce = Duration::from_secs_f64(config.continuously_wait.max(0.0));
        engine.watch_loop(debounce)?;
    } else {
        engine.bootstrap(&opts.files)?;
        engine.run_to_fixed_point()?;
    }
    Ok(engine.check_status())
}

fn main() {
    let opts = Opts::parse();
    logging::BuildLogger::init(opts.verbose, true);

    let code = match run(&opts) {
        Ok(true) => 0,
        Ok(false) => {
            error!("At least one command exited with a non-zero status");
            1
        }
        Err(err) => {
            error!("{err}");
            1
        }
    };
    process::exit(code);
}
