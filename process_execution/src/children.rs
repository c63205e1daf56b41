// Copyright 2025 Pants project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use std::ops::{Deref, DerefMut};
use std::process::{Child, Command};
use std::{thread, time};

use nix::sys::signal;
use nix::unistd::{getpgid, Pid};

const GRACEFUL_SHUTDOWN_POLL_TIME: time::Duration = time::Duration::from_millis(50);
const GRACEFUL_SHUTDOWN_TIMEOUT: time::Duration = time::Duration::from_secs(1);

///
/// A child process running in its own PGID, with a drop implementation that
/// will kill that PGID if the child has not already exited.
///
/// The tracer spawns the traced command (and that command's own children)
/// inside the same process group, so signalling the group tears the whole
/// tree down at once.
///
pub struct ManagedChild {
    child: Child,
    killed: bool,
}

impl ManagedChild {
    pub fn spawn(command: &mut Command) -> Result<ManagedChild, String> {
        // Adjust the Command to create its own PGID as it starts, to make it
        // safe to kill the PGID later.
        unsafe {
            use std::os::unix::process::CommandExt;
            command.pre_exec(|| {
                nix::unistd::setsid().map(|_sid| ()).map_err(|e| {
                    std::io::Error::new(
                        std::io::ErrorKind::Other,
                        format!("Could not create new pgid: {e}"),
                    )
                })
            });
        }

        let child = command
            .spawn()
            .map_err(|e| format!("Error executing traced process: {e}"))?;
        Ok(ManagedChild {
            child,
            killed: false,
        })
    }

    fn get_pgid(&self) -> Result<Pid, String> {
        let pid = self.child.id();
        let pgid = getpgid(Some(Pid::from_raw(pid as i32)))
            .map_err(|e| format!("Could not get process group id of child process: {e}"))?;
        Ok(pgid)
    }

    /// Send a signal to the child process group.
    fn signal_pg<T: Into<Option<signal::Signal>>>(&mut self, signal: T) -> Result<(), String> {
        let pgid = self.get_pgid()?;
        // The negative PGID will signal the entire process group.
        signal::kill(Pid::from_raw(-pgid.as_raw()), signal)
            .map_err(|e| format!("Failed to interrupt child process group: {e}"))?;
        Ok(())
    }

    fn check_child_has_exited(&mut self) -> Result<bool, String> {
        self.child
            .try_wait()
            .map(|status| status.is_some())
            .map_err(|e| e.to_string())
    }

    ///
    /// Waits for the child to exit by polling, up to `max_wait_duration`.
    /// Returns whether the child exited within that window.
    ///
    fn wait_for_child_exit_sync(
        &mut self,
        max_wait_duration: time::Duration,
    ) -> Result<bool, String> {
        let deadline = time::Instant::now() + max_wait_duration;
        while time::Instant::now() <= deadline {
            if self.check_child_has_exited()? {
                return Ok(true);
            }
            thread::sleep(GRACEFUL_SHUTDOWN_POLL_TIME);
        }
        // If we get here we have timed out.
        Ok(false)
    }

    ///
    /// Attempt to gracefully shutdown the process group: SIGINT first, and
    /// SIGKILL if the group does not wind down within a fixed interval.
    ///
    pub fn graceful_shutdown_sync(&mut self) -> Result<(), String> {
        self.signal_pg(signal::Signal::SIGINT)?;
        match self.wait_for_child_exit_sync(GRACEFUL_SHUTDOWN_TIMEOUT) {
            Ok(true) => {
                self.killed = true;
                Ok(())
            }
            Ok(false) => {
                log::warn!(
                    "Timed out waiting for graceful shutdown of process group. Will try SIGKILL instead."
                );
                self.kill_pgid()
            }
            Err(e) => {
                log::warn!(
                    "An error occurred while waiting for graceful shutdown of process group ({e}). Will try SIGKILL instead."
                );
                self.kill_pgid()
            }
        }
    }

    fn kill_pgid(&mut self) -> Result<(), String> {
        self.signal_pg(signal::Signal::SIGKILL)?;
        self.killed = true;
        Ok(())
    }
}

impl Deref for ManagedChild {
    type Target = Child;

    fn deref(&self) -> &Child {
        &self.child
    }
}

impl DerefMut for ManagedChild {
    fn deref_mut(&mut self) -> &mut Child {
        &mut self.child
    }
}

/// Implements drop by killing the process group, unless it already exited.
impl Drop for ManagedChild {
    fn drop(&mut self) {
        if self.killed {
            return;
        }
        if let Ok(Some(_)) = self.child.try_wait() {
            return;
        }
        let _ = self.graceful_shutdown_sync();
    }
}
