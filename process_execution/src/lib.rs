// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

mod children;
pub mod trace;


pub use crate::children::ManagedChild;

use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::info;
use nix::fcntl::{fcntl, FcntlArg, OFlag};

/// The exact tracer invocation; the trace log path and the traced command are
/// appended, and the whole line runs through a shell.
pub const TRACE_CMD: &str = "strace -e trace=file -f -qq -y -o";

const OUTPUT_POLL_TIME: Duration = Duration::from_millis(50);

const SPINNER_PHASES: [char; 4] = ['-', '/', '|', '\\'];

pub struct ExecuteResult {
    pub exit_code: i32,
    /// In-tree paths the trace observed, relative to the project root.
    pub paths: BTreeSet<PathBuf>,
}

///
/// Runs commands under the syscall tracer, one at a time, streaming their
/// output to the build log while advancing a spinner on stderr.
///
pub struct CommandRunner {
    basedir: PathBuf,
    scratch: PathBuf,
    log: File,
    spinner: Spinner,
    terminate: Arc<AtomicBool>,
}

impl CommandRunner {
    pub fn new(
        basedir: PathBuf,
        scratch: PathBuf,
        log_path: &Path,
        append_log: bool,
        terminate: Arc<AtomicBool>,
    ) -> Result<CommandRunner, String> {
        let mut open_options = OpenOptions::new();
        open_options.create(true);
        if append_log {
            open_options.append(true);
        } else {
            open_options.write(true).truncate(true);
        }
        let log = open_options
            .open(log_path)
            .map_err(|e| format!("Failed to open build log {}: {}", log_path.display(), e))?;
        Ok(CommandRunner {
            basedir,
            scratch,
            log,
            spinner: Spinner::new(),
            terminate,
        })
    }

    ///
    /// Runs `command` through a shell under the tracer, with the project root
    /// as working directory. Returns the exit status together with the set of
    /// in-tree paths the trace observed across the command and all of its
    /// descendants.
    ///
    pub fn run(&mut self, command: &str) -> Result<ExecuteResult, String> {
        let trace_log = self.scratch.join("trace.log");
        let traced = format!("{} {} {}", TRACE_CMD, trace_log.display(), command);
        info!("Running: {command}");

        let mut shell = Command::new("sh");
        shell
            .arg("-c")
            .arg(&traced)
            .current_dir(&self.basedir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let mut child = ManagedChild::spawn(&mut shell)?;

        let status = self.stream_output(&mut child, command)?;
        let exit_code = status
            .code()
            .or_else(|| status.signal().map(|signal| -signal))
            .unwrap_or(-1);

        let paths = trace::parse_log(&trace_log, &self.basedir)?;
        Ok(ExecuteResult { exit_code, paths })
    }

    ///
    /// Reads the child's stdout and stderr non-blockingly, character by
    /// character, appending each to the build log. The loop ends when the
    /// child has a wait status and both streams read empty; it sleeps briefly
    /// whenever no output arrives.
    ///
    fn stream_output(
        &mut self,
        child: &mut ManagedChild,
        command: &str,
    ) -> Result<ExitStatus, String> {
        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| "Child stdout was not captured".to_owned())?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| "Child stderr was not captured".to_owned())?;
        set_nonblocking(stdout.as_raw_fd())?;
        set_nonblocking(stderr.as_raw_fd())?;

        let mut stdout_open = true;
        let mut stderr_open = true;
        let mut status: Option<ExitStatus> = None;
        loop {
            if self.terminate.load(Ordering::SeqCst) && status.is_none() {
                self.spinner.clear();
                child.graceful_shutdown_sync()?;
                return Err(format!("Interrupted while running: {command}"));
            }

            let mut progressed = false;
            if stdout_open {
                progressed |= self.relay_byte(&mut stdout, &mut stdout_open)?;
            }
            if stderr_open {
                progressed |= self.relay_byte(&mut stderr, &mut stderr_open)?;
            }
            if progressed {
                continue;
            }

            if status.is_none() {
                status = child
                    .try_wait()
                    .map_err(|e| format!("Failed to poll traced process: {e}"))?;
            }
            if let Some(status) = status {
                if !stdout_open && !stderr_open {
                    self.spinner.clear();
                    return Ok(status);
                }
            }
            thread::sleep(OUTPUT_POLL_TIME);
        }
    }

    ///
    /// Moves at most one byte from `stream` to the build log, flushing so a
    /// crash never loses streamed output. An EOF closes the stream for good.
    ///
    fn relay_byte(&mut self, stream: &mut impl Read, open: &mut bool) -> Result<bool, String> {
        let mut buf = [0_u8; 1];
        match stream.read(&mut buf) {
            Ok(0) => {
                *open = false;
                Ok(false)
            }
            Ok(_) => {
                self.log
                    .write_all(&buf)
                    .and_then(|()| self.log.flush())
                    .map_err(|e| format!("Failed to append to the build log: {e}"))?;
                self.spinner.advance();
                Ok(true)
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(format!("Failed to read traced process output: {e}")),
        }
    }
}

struct Spinner {
    phase: usize,
}

impl Spinner {
    fn new() -> Spinner {
        Spinner { phase: 0 }
    }

    fn advance(&mut self) {
        let mut stderr = io::stderr();
        let _ = write!(stderr, "\r{}", SPINNER_PHASES[self.phase]);
        let _ = stderr.flush();
        self.phase = (self.phase + 1) % SPINNER_PHASES.len();
    }

    fn clear(&mut self) {
        let mut stderr = io::stderr();
        let _ = write!(stderr, "\r \r");
        let _ = stderr.flush();
        self.phase = 0;
    }
}

fn set_nonblocking(fd: RawFd) -> Result<(), String> {
    let flags = fcntl(fd, FcntlArg::F_GETFL)
        .map_err(|e| format!("Failed to read stream flags: {e}"))?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd, FcntlArg::F_SETFL(flags))
        .map_err(|e| format!("Failed to mark stream non-blocking: {e}"))?;
    Ok(())
}
