//! Readiness polling.
//!
//! After the transcoder is spawned, [`ReadinessPoller::wait`] watches the
//! output directory and the process until one of:
//!
//! - the manifest exists and at least `min_segments` segments are on disk
//!   ([`Readiness::Ready`]);
//! - the process exits (ready, degraded, or failed depending on how many
//!   segments it left behind);
//! - `max_wait` elapses (degraded if anything was produced, otherwise the
//!   process is terminated and the wait fails);
//! - the caller cancels.

use std::time::{Duration, Instant};

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::supervisor::{ProcessStatus, Supervised};
use crate::workspace::PreviewDir;

/// Poller configuration.
#[derive(Debug, Clone)]
pub struct ReadinessConfig {
    /// Segments required for a fully ready preview. Values below 1 are
    /// treated as 1.
    pub min_segments: usize,
    /// Time between checks.
    pub poll_interval: Duration,
    /// Upper bound on the whole wait.
    pub max_wait: Duration,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            min_segments: 1,
            poll_interval: Duration::from_millis(500),
            max_wait: Duration::from_secs(600),
        }
    }
}

/// Why readiness could not be reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The process exited without producing any segment.
    ProcessExited {
        code: Option<i32>,
        diagnostics: String,
    },
    /// Nothing was produced within `max_wait`; the process was terminated.
    TimedOut { waited: Duration, diagnostics: String },
    /// The caller cancelled the wait.
    Cancelled,
    /// The process or directory could not be inspected.
    Inspection(String),
}

impl FailureReason {
    /// Convert into the error surfaced to API callers.
    pub fn into_error(self) -> previewly_common::Error {
        match self {
            FailureReason::ProcessExited { code, diagnostics } => {
                let code = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
                previewly_common::Error::readiness(
                    format!("transcoder exited ({code}) before producing a segment"),
                    non_empty(diagnostics),
                )
            }
            FailureReason::TimedOut { waited, diagnostics } => previewly_common::Error::readiness(
                format!("no segments after {}s", waited.as_secs()),
                non_empty(diagnostics),
            ),
            FailureReason::Cancelled => previewly_common::Error::launch("session", "cancelled"),
            FailureReason::Inspection(msg) => previewly_common::Error::Internal(msg),
        }
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

/// Outcome of a readiness wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    /// At least `min_segments` segments are available.
    Ready(usize),
    /// Fewer than `min_segments`, but at least one, segment is available.
    Degraded(usize),
    /// No usable output.
    Failed(FailureReason),
}

/// Waits for a transcoder to produce servable output.
#[derive(Debug, Clone)]
pub struct ReadinessPoller {
    config: ReadinessConfig,
}

impl ReadinessPoller {
    pub fn new(config: ReadinessConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ReadinessConfig {
        &self.config
    }

    fn classify_exit(&self, count: usize) -> Option<Readiness> {
        match count {
            0 => None,
            n if n < self.min_segments() => Some(Readiness::Degraded(n)),
            n => Some(Readiness::Ready(n)),
        }
    }

    fn min_segments(&self) -> usize {
        self.config.min_segments.max(1)
    }

    /// Poll until the output is servable, the process dies, time runs out,
    /// or `cancel` fires.
    ///
    /// On timeout with no segments the process is terminated before
    /// returning. The directory is never touched; cleaning it up is the
    /// caller's job.
    pub async fn wait<P>(
        &self,
        process: &mut P,
        dir: &PreviewDir,
        cancel: &CancellationToken,
    ) -> Readiness
    where
        P: Supervised + ?Sized,
    {
        let started = Instant::now();
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Readiness::Failed(FailureReason::Cancelled),
                _ = ticker.tick() => {}
            }

            let count = match dir.count_segments() {
                Ok(n) => n,
                Err(e) => {
                    return Readiness::Failed(FailureReason::Inspection(format!(
                        "cannot read {}: {e}",
                        dir.path().display()
                    )))
                }
            };

            if dir.manifest_exists() && count >= self.min_segments() {
                return Readiness::Ready(count);
            }

            match process.poll().await {
                Ok(ProcessStatus::Running) => {}
                Ok(ProcessStatus::Exited { code, diagnostics }) => {
                    // The last segment may land between the count and the exit check.
                    let count = dir.count_segments().unwrap_or(count);
                    tracing::debug!(?code, count, "Transcoder exited during readiness wait");
                    return self.classify_exit(count).unwrap_or(Readiness::Failed(
                        FailureReason::ProcessExited { code, diagnostics },
                    ));
                }
                Err(e) => return Readiness::Failed(FailureReason::Inspection(e.to_string())),
            }

            let waited = started.elapsed();
            if waited >= self.config.max_wait {
                if count >= 1 {
                    tracing::warn!(count, "Readiness wait expired; serving degraded preview");
                    return Readiness::Degraded(count);
                }
                if let Err(e) = process.terminate().await {
                    tracing::warn!("Failed to terminate transcoder after timeout: {e}");
                }
                return Readiness::Failed(FailureReason::TimedOut {
                    waited,
                    diagnostics: process.diagnostics(),
                });
            }
        }
    }
}
