//! Platform process launchers.
//!
//! A launcher spawns a service executable, drains its stdout/stderr into the
//! guardian log line by line, confirms the process is alive after the start
//! timeout and keeps a background waiter that reports the exit.
//!
//! Two variants exist:
//! - [`ChildLauncher`] (unix): the spawned child is the tracked process.
//! - [`SnapshotLauncher`]: the executable runs behind a shell wrapper, so the
//!   real process is located by scanning the process table for its image name.

#[cfg(unix)]
pub mod child;
pub mod snapshot;

#[cfg(unix)]
pub use child::ChildLauncher;
pub use snapshot::SnapshotLauncher;

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};
use tokio::process::Child;
use tracing::{debug, error, warn};

/// Longest output line kept as one log entry.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Callbacks a launcher uses to report back into the supervisor.
#[async_trait]
pub trait ProcessEvents: Send + Sync {
    /// A line of output (or a diagnostic) for `service`.
    async fn append_line(&self, service: &str, line: String);

    /// The process started under `launch_id` has terminated.
    async fn process_exited(&self, service: &str, launch_id: u64);
}

/// Everything a launcher needs for one start attempt.
#[derive(Debug, Clone)]
pub struct LaunchRequest {
    pub service: String,
    pub executable: String,
    pub env: Vec<String>,
    pub timeout: Duration,
    pub launch_id: u64,
}

#[async_trait]
pub trait Launcher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Spawn the process and wait out `request.timeout` to confirm it is alive.
    async fn launch(
        &self,
        request: LaunchRequest,
        events: Arc<dyn ProcessEvents>,
    ) -> Result<ProcessHandle>;

    /// Terminate the process behind `handle`. A process that is already gone
    /// counts as success.
    async fn kill(&self, service: &str, handle: &ProcessHandle) -> Result<()>;
}

#[derive(Debug, Default)]
struct Liveness {
    kill_requested: AtomicBool,
    exited: AtomicBool,
}

/// Handle to a confirmed-running service process.
///
/// Cloning shares the kill/exit flags with the background waiter.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    pub launch_id: u64,
    pub pid: u32,
    pub executable: String,
    pub env: Vec<String>,
    liveness: Arc<Liveness>,
}

impl ProcessHandle {
    pub fn new(launch_id: u64, pid: u32, executable: impl Into<String>, env: Vec<String>) -> Self {
        Self {
            launch_id,
            pid,
            executable: executable.into(),
            env,
            liveness: Arc::new(Liveness::default()),
        }
    }

    /// Mark the coming termination as deliberate.
    pub fn request_kill(&self) {
        self.liveness.kill_requested.store(true, Ordering::SeqCst);
    }

    pub fn cancel_kill(&self) {
        self.liveness.kill_requested.store(false, Ordering::SeqCst);
    }

    pub fn kill_requested(&self) -> bool {
        self.liveness.kill_requested.load(Ordering::SeqCst)
    }

    pub fn mark_exited(&self) {
        self.liveness.exited.store(true, Ordering::SeqCst);
    }

    pub fn has_exited(&self) -> bool {
        self.liveness.exited.load(Ordering::SeqCst)
    }
}

/// Which launcher variant to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LauncherKind {
    Child,
    Snapshot,
}

impl LauncherKind {
    pub fn platform_default() -> Self {
        if cfg!(unix) {
            LauncherKind::Child
        } else {
            LauncherKind::Snapshot
        }
    }

    pub fn build(self) -> Arc<dyn Launcher> {
        match self {
            #[cfg(unix)]
            LauncherKind::Child => Arc::new(ChildLauncher::new()),
            #[cfg(not(unix))]
            LauncherKind::Child => {
                warn!("Child launcher is unix-only, using snapshot launcher");
                Arc::new(SnapshotLauncher::default())
            }
            LauncherKind::Snapshot => Arc::new(SnapshotLauncher::default()),
        }
    }
}

impl FromStr for LauncherKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "child" => Ok(LauncherKind::Child),
            "snapshot" => Ok(LauncherKind::Snapshot),
            other => Err(format!("unknown launcher '{other}', expected 'child' or 'snapshot'")),
        }
    }
}

/// Launcher for the current platform.
pub fn platform_launcher() -> Arc<dyn Launcher> {
    LauncherKind::platform_default().build()
}

/// Split `KEY=VALUE` entries; malformed entries are skipped.
pub fn env_pairs(env: &[String]) -> Vec<(String, String)> {
    env.iter()
        .filter_map(|entry| match entry.split_once('=') {
            Some((key, value)) if !key.is_empty() => Some((key.to_string(), value.to_string())),
            _ => {
                warn!(entry = %entry, "Ignoring malformed environment entry");
                None
            }
        })
        .collect()
}

/// Spawn background tasks that push stdout/stderr lines of `child` into the log.
pub(crate) fn spawn_output_readers(
    service: &str,
    child: &mut Child,
    events: &Arc<dyn ProcessEvents>,
) {
    if let Some(stdout) = child.stdout.take() {
        spawn_line_reader("stdout", service, stdout, Arc::clone(events));
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_line_reader("stderr", service, stderr, Arc::clone(events));
    }
}

fn spawn_line_reader<R>(stream: &'static str, service: &str, reader: R, events: Arc<dyn ProcessEvents>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let service = service.to_string();
    tokio::spawn(async move {
        forward_lines(stream, &service, reader, events.as_ref()).await;
        debug!(service = %service, stream, "Output stream closed");
    });
}

/// Push every line of `reader` to `events` until EOF or a read error.
///
/// A line longer than [`MAX_LINE_BYTES`] is emitted in chunks of that size.
async fn forward_lines<R>(stream: &str, service: &str, reader: R, events: &dyn ProcessEvents)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = (&mut reader)
            .take(MAX_LINE_BYTES as u64)
            .read_until(b'\n', &mut buf)
            .await;
        match read {
            Ok(0) => break,
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                }
                let line = String::from_utf8_lossy(&buf).into_owned();
                events.append_line(service, line).await;
            }
            Err(e) => {
                events
                    .append_line(service, format!("{stream} read error: {e}"))
                    .await;
                break;
            }
        }
    }
}

/// Record the termination of `handle` and notify the supervisor.
pub(crate) async fn report_exit(
    service: &str,
    handle: &ProcessHandle,
    outcome: &str,
    events: &Arc<dyn ProcessEvents>,
) {
    handle.mark_exited();
    if handle.kill_requested() {
        debug!(service = %service, pid = handle.pid, "Service exited after kill");
    } else {
        error!(
            service = %service,
            pid = handle.pid,
            executable = %handle.executable,
            environment_vars = %handle.env.join(", "),
            outcome = %outcome,
            "Service errored out"
        );
        events
            .append_line(service, format!("Exiting... {outcome}"))
            .await;
    }
    events.process_exited(service, handle.launch_id).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::pin::Pin;
    use std::sync::Mutex as StdMutex;
    use std::task::{Context, Poll};
    use tokio::io::ReadBuf;

    #[derive(Default)]
    struct RecordedLines(StdMutex<Vec<String>>);

    impl RecordedLines {
        fn drain(&self) -> Vec<String> {
            std::mem::take(&mut *self.0.lock().unwrap())
        }
    }

    #[async_trait]
    impl ProcessEvents for RecordedLines {
        async fn append_line(&self, _service: &str, line: String) {
            self.0.lock().unwrap().push(line);
        }

        async fn process_exited(&self, _service: &str, _launch_id: u64) {}
    }

    /// Pipe whose every read fails.
    struct BrokenPipe;

    impl AsyncRead for BrokenPipe {
        fn poll_read(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Poll::Ready(Err(io::Error::new(io::ErrorKind::BrokenPipe, "pipe broke")))
        }
    }

    #[tokio::test]
    async fn lines_are_split_and_trimmed() {
        let events = RecordedLines::default();
        let input: &[u8] = b"first\r\nsecond\nno newline";
        forward_lines("stdout", "svc", input, &events).await;
        assert_eq!(events.drain(), vec!["first", "second", "no newline"]);
    }

    #[tokio::test]
    async fn read_error_is_logged_after_earlier_lines() {
        let events = RecordedLines::default();
        let input: &[u8] = b"before\n";
        forward_lines("stderr", "svc", input.chain(BrokenPipe), &events).await;
        assert_eq!(events.drain(), vec!["before", "stderr read error: pipe broke"]);
    }

    #[tokio::test]
    async fn overlong_line_is_chunked() {
        let events = RecordedLines::default();
        let mut input = vec![b'x'; MAX_LINE_BYTES + 10];
        input.extend_from_slice(b"\nok\n");
        forward_lines("stdout", "svc", input.as_slice(), &events).await;

        let lines = events.drain();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].len(), MAX_LINE_BYTES);
        assert_eq!(lines[1], "x".repeat(10));
        assert_eq!(lines[2], "ok");
    }

    #[test]
    fn env_pairs_skips_malformed_entries() {
        let env = vec![
            "A=1".to_string(),
            "NOEQUALS".to_string(),
            "=novalue".to_string(),
            "B=x=y".to_string(),
        ];
        assert_eq!(
            env_pairs(&env),
            vec![
                ("A".to_string(), "1".to_string()),
                ("B".to_string(), "x=y".to_string())
            ]
        );
    }

    #[test]
    fn launcher_kind_parses() {
        assert_eq!("child".parse::<LauncherKind>().unwrap(), LauncherKind::Child);
        assert_eq!(" Snapshot ".parse::<LauncherKind>().unwrap(), LauncherKind::Snapshot);
        assert!("fork".parse::<LauncherKind>().is_err());
    }

    #[test]
    fn handle_flags_are_shared_between_clones() {
        let handle = ProcessHandle::new(1, 10, "svc", Vec::new());
        let other = handle.clone();
        other.request_kill();
        handle.mark_exited();
        assert!(handle.kill_requested());
        assert!(other.has_exited());
        other.cancel_kill();
        assert!(!handle.kill_requested());
    }
}
