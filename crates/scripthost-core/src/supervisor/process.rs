// ABOUTME: Spawns one hosted script as a child process and stops it.
// ABOUTME: Stop sends SIGTERM, waits out the grace period, then kills.

use crate::output::OutputCollector;
use crate::uid::Uid;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, ChildStdin, Command};
use tracing::{debug, info, warn};

/// How a process ended when it was stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopKind {
    /// It had already exited on its own
    AlreadyExited,
    /// It exited after the stop signal
    Graceful,
    /// It ignored the stop signal and was killed
    Killed,
}

/// A live hosted process and its output stream.
pub struct RunningHandle {
    uid: Uid,
    child: Child,
    // Held so the child's stdin stays open until it is stopped
    _stdin: Option<ChildStdin>,
    output: OutputCollector,
    pid: u32,
}

impl RunningHandle {
    /// Run `interpreter file_name` inside `cwd`, stdout and stderr merged into one stream.
    pub fn spawn(
        uid: &Uid,
        interpreter: &str,
        file_name: &str,
        cwd: &Path,
        buffer_lines: usize,
    ) -> std::io::Result<Self> {
        let mut command = Command::new(interpreter);
        command
            .arg(file_name)
            .current_dir(cwd)
            .stdin(Stdio::piped())
            .kill_on_drop(false);
        let (mut child, output) = spawn_with_output(command, buffer_lines)?;

        let pid = child.id().unwrap_or(0);
        let stdin = child.stdin.take();

        info!(uid = %uid, pid, interpreter, file = file_name, "Spawned script");

        Ok(Self {
            uid: uid.clone(),
            child,
            _stdin: stdin,
            output,
            pid,
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn output_mut(&mut self) -> &mut OutputCollector {
        &mut self.output
    }

    /// Exit status if the process has already exited.
    pub fn try_exit_status(&mut self) -> Option<ExitStatus> {
        match self.child.try_wait() {
            Ok(status) => status,
            Err(e) => {
                warn!(uid = %self.uid, pid = self.pid, error = %e, "Failed to poll process");
                None
            }
        }
    }

    /// Stop the process: stop signal, up to `grace` to exit, then kill.
    pub async fn stop(mut self, grace: Duration) -> StopKind {
        self.output.cancel();

        if self.try_exit_status().is_some() {
            debug!(uid = %self.uid, pid = self.pid, "Process already exited");
            return StopKind::AlreadyExited;
        }

        self.send_stop_signal();

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                info!(uid = %self.uid, pid = self.pid, %status, "Process stopped");
                StopKind::Graceful
            }
            Ok(Err(e)) => {
                warn!(uid = %self.uid, pid = self.pid, error = %e, "Failed waiting for process");
                self.force_kill().await;
                StopKind::Killed
            }
            Err(_) => {
                warn!(
                    uid = %self.uid,
                    pid = self.pid,
                    grace_secs = grace.as_secs_f64(),
                    "Process ignored stop signal, killing"
                );
                self.force_kill().await;
                StopKind::Killed
            }
        }
    }

    #[cfg(unix)]
    fn send_stop_signal(&mut self) {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Ok(raw) = i32::try_from(self.pid) else {
            let _ = self.child.start_kill();
            return;
        };
        if raw == 0 {
            let _ = self.child.start_kill();
            return;
        }
        if let Err(e) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
            debug!(uid = %self.uid, pid = self.pid, error = %e, "SIGTERM failed");
        }
    }

    #[cfg(not(unix))]
    fn send_stop_signal(&mut self) {
        let _ = self.child.start_kill();
    }

    async fn force_kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            warn!(uid = %self.uid, pid = self.pid, error = %e, "Failed to kill process");
        }
    }
}

#[cfg(unix)]
fn spawn_with_output(
    mut command: Command,
    buffer_lines: usize,
) -> std::io::Result<(Child, OutputCollector)> {
    let (output, stdio) = OutputCollector::merged(buffer_lines)?;
    command.stdout(stdio.stdout).stderr(stdio.stderr);
    let child = command.spawn();
    // Close the parent's write ends so the stream ends with the child
    drop(command);
    Ok((child?, output))
}

// Without a shared pipe only stdout is captured; stderr goes to the host's stderr.
#[cfg(not(unix))]
fn spawn_with_output(
    mut command: Command,
    buffer_lines: usize,
) -> std::io::Result<(Child, OutputCollector)> {
    command.stdout(Stdio::piped()).stderr(Stdio::inherit());
    let mut child = command.spawn()?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("child stdout was not piped"))?;
    Ok((child, OutputCollector::from_reader(stdout, buffer_lines)))
}
