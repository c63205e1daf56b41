// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Timelike;
use colored::Colorize;
use lazy_static::lazy_static;
use log::{debug, max_level, set_logger, set_max_level, Level, LevelFilter, Log, Metadata, Record};

const TIME_FORMAT_STR: &str = "%H:%M:%S";

lazy_static! {
    pub static ref BUILD_LOGGER: BuildLogger = BuildLogger::new();
}

///
/// The engine's `log` backend: timestamped, optionally colored lines on
/// stderr. The build log file is a separate concern owned by the executor;
/// this logger never writes there.
///
pub struct BuildLogger {
    use_color: AtomicBool,
}

impl BuildLogger {
    pub fn new() -> BuildLogger {
        BuildLogger {
            use_color: AtomicBool::new(false),
        }
    }

    /// Installs the global logger. `verbose` raises the level to Debug.
    pub fn init(verbose: bool, use_color: bool) {
        let level = if verbose {
            LevelFilter::Debug
        } else {
            LevelFilter::Info
        };
        set_max_level(level);
        BUILD_LOGGER.use_color.store(use_color, Ordering::SeqCst);
        if set_logger(&*BUILD_LOGGER).is_err() {
            debug!("Logging already initialized.");
        }
    }
}

impl Log for BuildLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let cur_date = chrono::Local::now();
        let time_str = format!(
            "{}.{:02}",
            cur_date.format(TIME_FORMAT_STR),
            cur_date.time().nanosecond() / 10_000_000 // Two decimal places of precision.
        );

        let level = record.level();
        let use_color = self.use_color.load(Ordering::SeqCst);

        let level_marker = match level {
            _ if !use_color => format!("[{level}]").normal().clear(),
            Level::Info => format!("[{level}]").normal(),
            Level::Error | Level::Warn => format!("[{level}]").red(),
            Level::Debug => format!("[{level}]").green(),
            Level::Trace => format!("[{level}]").magenta(),
        };

        eprintln!("{} {} {}", time_str, level_marker, record.args());
    }

    fn flush(&self) {}
}
