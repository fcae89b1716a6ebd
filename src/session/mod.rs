//! Preview session lifecycle.
//!
//! [`SessionRegistry`] owns every in-flight session. Starting a session
//! spawns the transcoder, waits for readiness and initializes the segment
//! window; ending one (explicitly, by the expiry sweep, or at shutdown)
//! goes through a single teardown path that stops the process and deletes
//! the output directory exactly once.

mod types;

pub use types::{SessionPhase, SessionSnapshot, StartedSession};

use async_trait::async_trait;
use parking_lot::Mutex;
use previewly_av::{
    PreviewDir, ProcessSupervisor, Readiness, ReadinessConfig, ReadinessPoller, SegmentLayout,
    Supervised, Transcoder,
};
use previewly_common::{Error, PreviewId, Result};
use previewly_stream::{
    source, NetworkMetrics, PlaybackLoop, PredictorHandle, SegmentBuffer, SourceSettings,
    WindowCursor, WindowSizingPolicy, WindowSnapshot,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::{Config, SizingMode};
use types::{PreviewSession, Running, SessionState};

/// Output bound for captured transcoder diagnostics.
const DIAGNOSTICS_LIMIT: usize = previewly_av::supervisor::DEFAULT_OUTPUT_LIMIT;

/// Registry settings derived from [`Config`].
#[derive(Debug, Clone)]
pub struct RegistrySettings {
    pub hls_dir: PathBuf,
    /// URL prefix under which `hls_dir` is served.
    pub hls_url_prefix: String,
    pub max_concurrent: usize,
    pub session_timeout: Duration,
    pub terminate_grace: Duration,
    pub backward_segments: usize,
    pub segment_duration_secs: u32,
    pub readiness: ReadinessConfig,
    pub source: SourceSettings,
}

impl RegistrySettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            hls_dir: config.server.hls_dir.clone(),
            hls_url_prefix: "/hls".to_string(),
            max_concurrent: config.session.max_concurrent,
            session_timeout: Duration::from_secs(config.session.timeout_secs),
            terminate_grace: Duration::from_secs(config.session.terminate_grace_secs),
            backward_segments: config.buffer.backward_segments(),
            segment_duration_secs: config.buffer.segment_duration_secs,
            readiness: ReadinessConfig::from(&config.readiness),
            source: config.source.clone(),
        }
    }
}

/// The sizing policy selected by `buffer.sizing`.
pub fn sizing_policy(config: &Config) -> WindowSizingPolicy {
    let buffer = &config.buffer;
    match buffer.sizing {
        SizingMode::Static => WindowSizingPolicy::fixed(buffer.forward_segments(), buffer.forward_cap),
        SizingMode::Adaptive => {
            let predictor = PredictorHandle::load(config.predictor.model_path.as_deref());
            WindowSizingPolicy::adaptive(Arc::new(predictor), buffer.forward_cap)
        }
    }
}

struct RegistryInner {
    sessions: Mutex<HashMap<PreviewId, Arc<PreviewSession>>>,
    settings: RegistrySettings,
    transcoder: Arc<dyn Transcoder>,
    poller: ReadinessPoller,
    policy: WindowSizingPolicy,
    layout: SegmentLayout,
}

/// Concurrent table of preview sessions.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RegistryInner>,
}

impl SessionRegistry {
    pub fn new(
        settings: RegistrySettings,
        transcoder: Arc<dyn Transcoder>,
        policy: WindowSizingPolicy,
    ) -> Self {
        let poller = ReadinessPoller::new(settings.readiness.clone());
        Self {
            inner: Arc::new(RegistryInner {
                sessions: Mutex::new(HashMap::new()),
                settings,
                transcoder,
                poller,
                policy,
                layout: SegmentLayout::default(),
            }),
        }
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.inner.settings
    }

    pub fn sizing_policy(&self) -> &WindowSizingPolicy {
        &self.inner.policy
    }

    /// Reload the predictor model from disk. Returns `false` when sizing is
    /// static and there is nothing to reload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the model cannot be loaded; the previous
    /// predictor stays in use.
    pub fn refresh_predictor(&self) -> Result<bool> {
        match self.inner.policy.predictor() {
            Some(handle) => handle.refresh().map(|()| true),
            None => Ok(false),
        }
    }

    /// Number of sessions in the table, including ones still starting.
    pub fn active_count(&self) -> usize {
        self.inner.sessions.lock().len()
    }

    fn playlist_url(&self, id: PreviewId) -> String {
        format!(
            "{}/{id}/{}",
            self.inner.settings.hls_url_prefix.trim_end_matches('/'),
            self.inner.layout.manifest_name
        )
    }

    fn lookup(&self, id: PreviewId) -> Result<Arc<PreviewSession>> {
        self.inner
            .sessions
            .lock()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found("session", id))
    }

    /// Start a preview of `source_url` and wait until it is servable.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidInput`] for an empty or malformed locator.
    /// - [`Error::CapacityExceeded`] when `max_concurrent` sessions exist.
    /// - [`Error::LaunchFailure`] when the transcoder cannot start or the
    ///   session is ended while starting.
    /// - [`Error::ReadinessTimeout`] when no segment appears in time.
    pub async fn start_session(&self, source_url: &str) -> Result<StartedSession> {
        let source = parse_source(source_url)?;
        let id = PreviewId::new();
        let settings = &self.inner.settings;

        let dir = PreviewDir::create(&settings.hls_dir, &id.to_string(), self.inner.layout.clone())?;
        let session = Arc::new(PreviewSession::new(id, source, dir));

        {
            let mut sessions = self.inner.sessions.lock();
            if sessions.len() >= settings.max_concurrent {
                return Err(Error::CapacityExceeded {
                    active: sessions.len(),
                    limit: settings.max_concurrent,
                });
            }
            sessions.insert(id, Arc::clone(&session));
        }

        tracing::info!(preview_id = %id, source = %session.source, "Starting preview session");

        let guard = StartGuard {
            inner: &self.inner,
            session: Arc::clone(&session),
            armed: true,
        };

        match self.launch(&session).await {
            Ok(started) => {
                guard.disarm();
                tracing::info!(
                    preview_id = %id,
                    status = %started.status,
                    segments = started.segment_count,
                    "Preview session servable"
                );
                Ok(started)
            }
            Err(e) => {
                tracing::warn!(preview_id = %id, error = %e, "Preview session failed to start");
                Err(e)
            }
        }
    }

    async fn launch(&self, session: &PreviewSession) -> Result<StartedSession> {
        let settings = &self.inner.settings;

        session.set_state(SessionState::Launching).await;
        let command = self.inner.transcoder.command(&session.source, &session.dir);
        let mut process =
            match ProcessSupervisor::spawn_with(&command, settings.terminate_grace, DIAGNOSTICS_LIMIT) {
                Ok(p) => p,
                Err(e) => {
                    remove_dir(session);
                    session.set_state(SessionState::Failed).await;
                    return Err(e);
                }
            };

        session.set_state(SessionState::AwaitingReadiness).await;
        let outcome = self
            .inner
            .poller
            .wait(&mut process, &session.dir, &session.cancel)
            .await;

        let (status, segment_count) = match outcome {
            Readiness::Ready(n) => (SessionPhase::Ready, n),
            Readiness::Degraded(n) => (SessionPhase::Degraded, n),
            Readiness::Failed(reason) => {
                stop_process(session, &mut process).await;
                remove_dir(session);
                let cancelled = session.cancel.is_cancelled();
                session
                    .set_state(if cancelled {
                        SessionState::Terminated
                    } else {
                        SessionState::Failed
                    })
                    .await;
                return Err(reason.into_error());
            }
        };

        let buffer = SegmentBuffer::initialize(
            self.inner.policy.clone(),
            settings.backward_segments,
            &NetworkMetrics::default(),
        );

        let mut state = session.state.lock().await;
        // Checked under the state lock: an end request either lands here or
        // finds the session already servable.
        if session.cancel.is_cancelled() {
            stop_process(session, &mut process).await;
            remove_dir(session);
            *state = SessionState::Terminated;
            return Err(Error::launch("session", "cancelled"));
        }
        let running = Running { process, buffer };
        *state = match status {
            SessionPhase::Degraded => SessionState::Degraded(running),
            _ => SessionState::Ready(running),
        };

        Ok(StartedSession {
            preview_id: session.id,
            playlist_url: self.playlist_url(session.id),
            status,
            segment_count,
            segment_duration: settings.segment_duration_secs,
        })
    }

    /// End a session. A second call for the same id returns `NotFound`.
    pub async fn end_session(&self, id: PreviewId) -> Result<()> {
        let session = self
            .inner
            .sessions
            .lock()
            .remove(&id)
            .ok_or_else(|| Error::not_found("session", id))?;
        tracing::info!(preview_id = %id, "Ending preview session");
        teardown(&session).await;
        Ok(())
    }

    pub async fn get_session(&self, id: PreviewId) -> Result<SessionSnapshot> {
        let session = self.lookup(id)?;
        Ok(session.snapshot(self.playlist_url(id)).await)
    }

    /// Snapshots of every session, oldest first.
    pub async fn list_sessions(&self) -> Vec<SessionSnapshot> {
        let sessions: Vec<_> = self.inner.sessions.lock().values().cloned().collect();
        let mut snapshots = Vec::with_capacity(sessions.len());
        for session in sessions {
            snapshots.push(session.snapshot(self.playlist_url(session.id)).await);
        }
        snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        snapshots
    }

    /// Terminate every session older than the configured timeout. Returns
    /// the number of sessions removed.
    pub async fn sweep_expired(&self) -> usize {
        let timeout = self.inner.settings.session_timeout;
        let expired: Vec<_> = {
            let mut sessions = self.inner.sessions.lock();
            let ids: Vec<_> = sessions
                .iter()
                .filter(|(_, s)| s.started.elapsed() > timeout)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter().filter_map(|id| sessions.remove(&id)).collect()
        };

        for session in &expired {
            tracing::info!(
                preview_id = %session.id,
                age_secs = session.started.elapsed().as_secs(),
                "Expired preview session removed"
            );
            teardown(session).await;
        }
        expired.len()
    }

    /// Terminate every session. Used at process shutdown.
    pub async fn shutdown_all(&self) -> usize {
        let sessions: Vec<_> = self.inner.sessions.lock().drain().map(|(_, s)| s).collect();
        let count = sessions.len();
        futures::future::join_all(sessions.iter().map(|s| teardown(s))).await;
        if count > 0 {
            tracing::info!(count, "Terminated all preview sessions");
        }
        count
    }

    /// Current window of a servable session.
    pub async fn active_window(&self, id: PreviewId) -> Result<WindowSnapshot> {
        let session = self.lookup(id)?;
        let state = session.state.lock().await;
        state
            .running()
            .map(|r| r.buffer.snapshot())
            .ok_or_else(|| not_servable(id, &state))
    }

    /// Slide the window forward by one segment.
    pub async fn advance(&self, id: PreviewId, metrics: &NetworkMetrics) -> Result<WindowSnapshot> {
        let session = self.lookup(id)?;
        let mut state = session.state.lock().await;
        match state.running_mut() {
            Some(running) => {
                running.buffer.slide_forward(metrics);
                Ok(running.buffer.snapshot())
            }
            None => Err(not_servable(id, &state)),
        }
    }

    /// Build a playback loop over the session's source and window.
    ///
    /// The returned token is cancelled when the session ends.
    pub async fn open_playback(
        &self,
        id: PreviewId,
        metrics: NetworkMetrics,
    ) -> Result<(PlaybackLoop, CancellationToken)> {
        let session = self.lookup(id)?;
        {
            let state = session.state.lock().await;
            if !state.phase().is_servable() {
                return Err(not_servable(id, &state));
            }
        }

        let chunks = source::for_url(&session.source, &self.inner.settings.source).await?;
        let cancel = session.cancel.child_token();
        let cursor = SessionCursor { session, metrics };
        Ok((PlaybackLoop::new(Arc::from(chunks), Arc::new(cursor)), cancel))
    }
}

/// Releases a starting session's table entry and directory unless the start
/// completed. Covers both error returns and a dropped `start_session` future,
/// whose transcoder is killed by `kill_on_drop`.
struct StartGuard<'a> {
    inner: &'a RegistryInner,
    session: Arc<PreviewSession>,
    armed: bool,
}

impl StartGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let session = &self.session;
        self.inner.sessions.lock().remove(&session.id);
        session.cancel.cancel();
        remove_dir(session);
        if let Ok(mut state) = session.state.try_lock() {
            if !matches!(*state, SessionState::Failed | SessionState::Terminated) {
                tracing::debug!(preview_id = %session.id, "Abandoned start released");
                *state = SessionState::Terminated;
            }
        }
    }
}

/// Validate a source locator.
fn parse_source(raw: &str) -> Result<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Error::invalid_input("url must not be empty"));
    }
    let url = Url::parse(raw).map_err(|e| Error::invalid_input(format!("invalid url '{raw}': {e}")))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some_and(|h| !h.is_empty()) => Ok(url),
        "file" => Ok(url),
        "http" | "https" => Err(Error::invalid_input(format!("url '{raw}' has no host"))),
        other => Err(Error::invalid_input(format!("unsupported scheme '{other}'"))),
    }
}

fn not_servable(id: PreviewId, state: &SessionState) -> Error {
    Error::Conflict(format!("session {id} is {}", state.phase()))
}

async fn stop_process(session: &PreviewSession, process: &mut ProcessSupervisor) {
    if let Err(e) = process.terminate().await {
        tracing::warn!(preview_id = %session.id, error = %e, "Failed to stop transcoder");
    }
}

fn remove_dir(session: &PreviewSession) {
    if let Err(e) = session.dir.remove() {
        tracing::warn!(
            preview_id = %session.id,
            "Failed to remove {}: {e}",
            session.dir.path().display()
        );
    }
}

/// Stop a session already removed from the table.
///
/// Servable sessions are stopped here. Sessions still starting only have
/// their token cancelled; the start path owns their process and cleans up.
async fn teardown(session: &PreviewSession) {
    session.cancel.cancel();

    let previous = {
        let mut state = session.state.lock().await;
        if !state.phase().is_servable() {
            return;
        }
        std::mem::replace(&mut *state, SessionState::Ending)
    };

    if let SessionState::Ready(mut running) | SessionState::Degraded(mut running) = previous {
        stop_process(session, &mut running.process).await;
    }
    remove_dir(session);
    session.set_state(SessionState::Terminated).await;
    tracing::debug!(preview_id = %session.id, "Preview session terminated");
}

/// Window access for a playback loop, through the session lock.
struct SessionCursor {
    session: Arc<PreviewSession>,
    metrics: NetworkMetrics,
}

#[async_trait]
impl WindowCursor for SessionCursor {
    async fn window(&self) -> Result<Vec<u64>> {
        let state = self.session.state.lock().await;
        state
            .running()
            .map(|r| r.buffer.active_chunks())
            .ok_or_else(|| not_servable(self.session.id, &state))
    }

    async fn advance(&self) -> Result<()> {
        let mut state = self.session.state.lock().await;
        match state.running_mut() {
            Some(running) => {
                running.buffer.slide_forward(&self.metrics);
                Ok(())
            }
            None => Err(not_servable(self.session.id, &state)),
        }
    }
}

/// Start a background task that sweeps expired sessions every `interval`
/// until `shutdown` is cancelled.
pub fn start_sweep_task(
    registry: SessionRegistry,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = registry.sweep_expired().await;
                    if removed > 0 {
                        tracing::debug!(removed, "Swept expired preview sessions");
                    }
                }
            }
        }
        tracing::debug!("Session sweep task stopped");
    })
}
