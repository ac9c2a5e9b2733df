// ABOUTME: Collects a child's stdout and stderr into one line stream.
// ABOUTME: Reader tasks never block on a full queue; overflow lines are dropped and counted.

use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Line stream of one running process.
pub struct OutputCollector {
    rx: mpsc::Receiver<String>,
    cancel: CancellationToken,
    dropped: Arc<AtomicU64>,
}

/// Child ends of a merged output pipe, to hand to `Command::stdout` and `Command::stderr`.
pub struct MergedStdio {
    pub stdout: Stdio,
    pub stderr: Stdio,
}

impl OutputCollector {
    /// Open one pipe shared by the child's stdout and stderr, so lines keep the
    /// order the child wrote them in. Must be called from within a tokio runtime.
    ///
    /// The returned `MergedStdio` must be dropped once the child is spawned or
    /// the stream never reaches end of file.
    #[cfg(unix)]
    pub fn merged(capacity: usize) -> std::io::Result<(Self, MergedStdio)> {
        let (read, write) = open_pipe()?;
        let write_err = write.try_clone()?;
        let receiver = tokio::net::unix::pipe::Receiver::from_file(std::fs::File::from(read))?;

        let collector = Self::from_reader(receiver, capacity);
        let stdio = MergedStdio {
            stdout: Stdio::from(write),
            stderr: Stdio::from(write_err),
        };
        Ok((collector, stdio))
    }

    /// Start a reader task over any line-oriented byte stream.
    pub fn from_reader<R>(reader: R, capacity: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let cancel = CancellationToken::new();
        let dropped = Arc::new(AtomicU64::new(0));

        spawn_reader(reader, tx, cancel.clone(), dropped.clone());

        Self {
            rx,
            cancel,
            dropped,
        }
    }

    /// Next buffered line, if any, without waiting.
    pub fn try_next(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }

    /// Every line buffered right now.
    pub fn drain(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = self.try_next() {
            lines.push(line);
        }
        lines
    }

    /// Gather lines for `window`, sleeping `poll` whenever the queue is empty.
    pub async fn collect_for(&mut self, window: Duration, poll: Duration) -> Vec<String> {
        let deadline = Instant::now() + window;
        let mut lines = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(line) => lines.push(line),
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    tokio::time::sleep(poll.min(deadline - now)).await;
                }
            }
        }
        lines
    }

    /// Wait up to `grace` for the pipe to close and return everything left.
    pub async fn drain_closed(&mut self, grace: Duration) -> Vec<String> {
        let mut lines = Vec::new();
        let _ = tokio::time::timeout(grace, async {
            while let Some(line) = self.rx.recv().await {
                lines.push(line);
            }
        })
        .await;
        lines.extend(self.drain());
        lines
    }

    /// Stop the reader tasks. Lines already queued stay readable.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Lines discarded because the queue was full.
    pub fn dropped_lines(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for OutputCollector {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn open_pipe() -> nix::Result<(std::os::fd::OwnedFd, std::os::fd::OwnedFd)> {
    nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC)
}

#[cfg(all(unix, not(any(target_os = "linux", target_os = "android"))))]
fn open_pipe() -> nix::Result<(std::os::fd::OwnedFd, std::os::fd::OwnedFd)> {
    use nix::fcntl::{fcntl, FcntlArg, FdFlag};
    use std::os::fd::AsRawFd;

    let (read, write) = nix::unistd::pipe()?;
    for fd in [&read, &write] {
        fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    }
    Ok((read, write))
}

fn spawn_reader<R>(
    pipe: R,
    tx: mpsc::Sender<String>,
    cancel: CancellationToken,
    dropped: Arc<AtomicU64>,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let read = tokio::select! {
                _ = cancel.cancelled() => break,
                read = reader.read_until(b'\n', &mut buf) => read,
            };
            match read {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }

            let line = String::from_utf8_lossy(&buf)
                .trim_end_matches(['\r', '\n'])
                .to_string();
            match tx.try_send(line) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    dropped.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Closed(_)) => break,
            }
        }
    });
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tokio::process::{Child, Command};

    fn sh(script: &str, capacity: usize) -> (Child, OutputCollector) {
        let (output, stdio) = OutputCollector::merged(capacity).unwrap();
        // The builder holds the parent's copies of the write ends until dropped
        let child = Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdout(stdio.stdout)
            .stderr(stdio.stderr)
            .spawn()
            .unwrap();
        (child, output)
    }

    #[tokio::test]
    async fn test_merges_stdout_and_stderr() {
        let (mut child, mut output) = sh("echo out; echo err 1>&2", 16);
        child.wait().await.unwrap();

        let lines = output.drain_closed(Duration::from_secs(5)).await;
        assert_eq!(lines, vec!["out".to_string(), "err".to_string()]);
    }

    #[tokio::test]
    async fn test_interleaved_streams_keep_write_order() {
        let script = "i=0; while [ $i -lt 20 ]; do echo out$i; echo err$i 1>&2; i=$((i+1)); done";
        let (mut child, mut output) = sh(script, 64);
        child.wait().await.unwrap();

        let lines = output.drain_closed(Duration::from_secs(5)).await;
        let expected: Vec<String> = (0..20)
            .flat_map(|i| [format!("out{i}"), format!("err{i}")])
            .collect();
        assert_eq!(lines, expected);
    }

    #[tokio::test]
    async fn test_collect_for_returns_after_window() {
        let (mut child, mut output) = sh("echo first; sleep 5", 16);

        let started = std::time::Instant::now();
        let lines = output
            .collect_for(Duration::from_millis(300), Duration::from_millis(20))
            .await;
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(lines, vec!["first".to_string()]);

        child.kill().await.unwrap();
    }

    #[tokio::test]
    async fn test_overflow_is_dropped_not_blocking() {
        let (mut child, mut output) =
            sh("i=0; while [ $i -lt 50 ]; do echo line$i; i=$((i+1)); done", 4);

        // The child must be able to finish even though nobody reads
        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(status.success());

        let lines = output.drain_closed(Duration::from_secs(5)).await;
        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], "line0");
        assert_eq!(output.dropped_lines(), 46);
    }

    #[tokio::test]
    async fn test_invalid_utf8_is_replaced() {
        let (mut child, mut output) = sh("printf 'ok\\377\\n'", 4);
        child.wait().await.unwrap();

        let lines = output.drain_closed(Duration::from_secs(5)).await;
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("ok"));
        assert!(lines[0].contains('\u{FFFD}'));
    }
}
