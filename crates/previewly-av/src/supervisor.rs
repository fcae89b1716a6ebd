//! Supervision of the external transcoder process.
//!
//! [`ProcessSupervisor`] spawns a [`ToolCommand`], drains its stdout and
//! stderr into a bounded tail buffer, answers liveness polls, and stops the
//! process with SIGTERM followed by a kill once the grace period runs out.

use std::collections::VecDeque;
use std::process::ExitStatus;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Child;
use tokio::task::JoinHandle;

use crate::command::ToolCommand;

/// Default bound on captured output: 64 KiB.
pub const DEFAULT_OUTPUT_LIMIT: usize = 64 * 1024;

/// Default wait between SIGTERM and kill.
pub const DEFAULT_TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// How long to wait for the output drains to catch up after exit.
const OUTPUT_FLUSH_TIMEOUT: Duration = Duration::from_millis(500);

/// Liveness of a supervised process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Still running.
    Running,
    /// Exited. `code` is `None` when the process died from a signal.
    Exited {
        code: Option<i32>,
        diagnostics: String,
    },
}

/// The process operations the readiness poller and session lifecycle rely on.
#[async_trait]
pub trait Supervised: Send {
    /// Check whether the process is still running, without blocking.
    async fn poll(&mut self) -> previewly_common::Result<ProcessStatus>;

    /// Stop the process. Safe to call any number of times.
    async fn terminate(&mut self) -> previewly_common::Result<()>;

    /// Tail of the captured output.
    fn diagnostics(&self) -> String;
}

/// Ring buffer of the most recent output bytes.
#[derive(Debug)]
struct OutputTail {
    bytes: VecDeque<u8>,
    limit: usize,
}

impl OutputTail {
    fn new(limit: usize) -> Self {
        Self {
            bytes: VecDeque::new(),
            limit,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        let chunk = if chunk.len() > self.limit {
            &chunk[chunk.len() - self.limit..]
        } else {
            chunk
        };
        let overflow = (self.bytes.len() + chunk.len()).saturating_sub(self.limit);
        self.bytes.drain(..overflow);
        self.bytes.extend(chunk);
    }

    fn to_string_lossy(&self) -> String {
        let (a, b) = self.bytes.as_slices();
        let mut joined = Vec::with_capacity(a.len() + b.len());
        joined.extend_from_slice(a);
        joined.extend_from_slice(b);
        String::from_utf8_lossy(&joined).into_owned()
    }
}

async fn drain<R: AsyncRead + Unpin>(mut reader: R, tail: Arc<Mutex<OutputTail>>) {
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => tail.lock().push(&buf[..n]),
        }
    }
}

/// Handle to a running transcoder.
///
/// The child is spawned with `kill_on_drop`, so dropping the supervisor
/// without calling [`terminate`](Supervised::terminate) still kills it.
#[derive(Debug)]
pub struct ProcessSupervisor {
    name: String,
    child: Child,
    pid: Option<u32>,
    exit: Option<ExitStatus>,
    tail: Arc<Mutex<OutputTail>>,
    drains: Vec<JoinHandle<()>>,
    grace: Duration,
}

impl ProcessSupervisor {
    /// Spawn with the default grace period and output bound.
    pub fn spawn(command: &ToolCommand) -> previewly_common::Result<Self> {
        Self::spawn_with(command, DEFAULT_TERMINATE_GRACE, DEFAULT_OUTPUT_LIMIT)
    }

    /// Spawn the command.
    ///
    /// # Errors
    ///
    /// Returns [`previewly_common::Error::LaunchFailure`] if the process
    /// cannot be started.
    pub fn spawn_with(
        command: &ToolCommand,
        grace: Duration,
        output_limit: usize,
    ) -> previewly_common::Result<Self> {
        let name = command.program_name();
        let mut child = command
            .to_command()
            .spawn()
            .map_err(|e| previewly_common::Error::launch(&name, format!("failed to spawn: {e}")))?;

        let tail = Arc::new(Mutex::new(OutputTail::new(output_limit)));
        let mut drains = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            drains.push(tokio::spawn(drain(stdout, Arc::clone(&tail))));
        }
        if let Some(stderr) = child.stderr.take() {
            drains.push(tokio::spawn(drain(stderr, Arc::clone(&tail))));
        }

        let pid = child.id();
        tracing::debug!(pid, "Spawned {name}: {command}");

        Ok(Self {
            name,
            child,
            pid,
            exit: None,
            tail,
            drains,
            grace,
        })
    }

    /// OS process id, if the process was running when spawned.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Exit status once the process has been observed to exit.
    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit
    }

    async fn flush_output(&mut self) {
        for handle in self.drains.drain(..) {
            let _ = tokio::time::timeout(OUTPUT_FLUSH_TIMEOUT, handle).await;
        }
    }

    #[cfg(unix)]
    fn send_terminate_signal(&self) -> bool {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;

        let Some(raw) = self.pid.and_then(|p| i32::try_from(p).ok()) else {
            return false;
        };
        kill(Pid::from_raw(raw), Signal::SIGTERM).is_ok()
    }

    #[cfg(not(unix))]
    fn send_terminate_signal(&self) -> bool {
        false
    }

    fn record_exit(&mut self, status: ExitStatus) {
        tracing::debug!(pid = self.pid, "{} exited with {status}", self.name);
        self.exit = Some(status);
    }
}

#[async_trait]
impl Supervised for ProcessSupervisor {
    async fn poll(&mut self) -> previewly_common::Result<ProcessStatus> {
        if self.exit.is_none() {
            match self.child.try_wait()? {
                Some(status) => self.record_exit(status),
                None => return Ok(ProcessStatus::Running),
            }
        }
        self.flush_output().await;
        Ok(ProcessStatus::Exited {
            code: self.exit.and_then(|s| s.code()),
            diagnostics: self.diagnostics(),
        })
    }

    async fn terminate(&mut self) -> previewly_common::Result<()> {
        if self.exit.is_some() {
            return Ok(());
        }
        if let Some(status) = self.child.try_wait()? {
            self.record_exit(status);
            self.flush_output().await;
            return Ok(());
        }

        if self.send_terminate_signal() {
            match tokio::time::timeout(self.grace, self.child.wait()).await {
                Ok(result) => {
                    self.record_exit(result?);
                    self.flush_output().await;
                    return Ok(());
                }
                Err(_) => {
                    tracing::warn!(
                        pid = self.pid,
                        "{} ignored SIGTERM for {:?}; killing",
                        self.name,
                        self.grace
                    );
                }
            }
        }

        // start_kill fails only if the process already exited; wait covers both.
        let _ = self.child.start_kill();
        let status = self.child.wait().await?;
        self.record_exit(status);
        self.flush_output().await;
        Ok(())
    }

    fn diagnostics(&self) -> String {
        self.tail.lock().to_string_lossy()
    }
}
