use chrono::{DateTime, Utc};
use previewly_av::{PreviewDir, ProcessSupervisor};
use previewly_common::PreviewId;
use previewly_stream::SegmentBuffer;
use serde::Serialize;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

/// Lifecycle phase of a session, as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Created,
    Launching,
    AwaitingReadiness,
    Ready,
    Degraded,
    Ending,
    Terminated,
    Failed,
}

impl SessionPhase {
    /// Whether the window and playback operations are available.
    pub fn is_servable(self) -> bool {
        matches!(self, SessionPhase::Ready | SessionPhase::Degraded)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionPhase::Created => "created",
            SessionPhase::Launching => "launching",
            SessionPhase::AwaitingReadiness => "awaiting_readiness",
            SessionPhase::Ready => "ready",
            SessionPhase::Degraded => "degraded",
            SessionPhase::Ending => "ending",
            SessionPhase::Terminated => "terminated",
            SessionPhase::Failed => "failed",
        }
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resources of a servable session.
#[derive(Debug)]
pub(crate) struct Running {
    pub process: ProcessSupervisor,
    pub buffer: SegmentBuffer,
}

/// Mutable state of a session. The transcoder handle only exists while the
/// session is servable.
#[derive(Debug)]
pub(crate) enum SessionState {
    Created,
    Launching,
    AwaitingReadiness,
    Ready(Running),
    Degraded(Running),
    Ending,
    Terminated,
    Failed,
}

impl SessionState {
    pub fn phase(&self) -> SessionPhase {
        match self {
            SessionState::Created => SessionPhase::Created,
            SessionState::Launching => SessionPhase::Launching,
            SessionState::AwaitingReadiness => SessionPhase::AwaitingReadiness,
            SessionState::Ready(_) => SessionPhase::Ready,
            SessionState::Degraded(_) => SessionPhase::Degraded,
            SessionState::Ending => SessionPhase::Ending,
            SessionState::Terminated => SessionPhase::Terminated,
            SessionState::Failed => SessionPhase::Failed,
        }
    }

    pub fn running_mut(&mut self) -> Option<&mut Running> {
        match self {
            SessionState::Ready(r) | SessionState::Degraded(r) => Some(r),
            _ => None,
        }
    }

    pub fn running(&self) -> Option<&Running> {
        match self {
            SessionState::Ready(r) | SessionState::Degraded(r) => Some(r),
            _ => None,
        }
    }
}

/// One preview session. Owned by the registry table; playback streams hold
/// extra references while they run.
#[derive(Debug)]
pub(crate) struct PreviewSession {
    pub id: PreviewId,
    pub source: Url,
    pub created_at: DateTime<Utc>,
    pub started: Instant,
    pub dir: PreviewDir,
    pub cancel: CancellationToken,
    pub state: tokio::sync::Mutex<SessionState>,
}

impl PreviewSession {
    pub fn new(id: PreviewId, source: Url, dir: PreviewDir) -> Self {
        Self {
            id,
            source,
            created_at: Utc::now(),
            started: Instant::now(),
            dir,
            cancel: CancellationToken::new(),
            state: tokio::sync::Mutex::new(SessionState::Created),
        }
    }

    pub async fn set_state(&self, state: SessionState) {
        *self.state.lock().await = state;
    }

    pub async fn snapshot(&self, playlist_url: String) -> SessionSnapshot {
        let state = self.state.lock().await.phase();
        SessionSnapshot {
            preview_id: self.id,
            video_url: self.source.to_string(),
            state,
            created_at: self.created_at,
            age_seconds: self.started.elapsed().as_secs(),
            segment_count: self.dir.count_segments().unwrap_or(0),
            playlist_url,
        }
    }
}

/// Read-only view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub preview_id: PreviewId,
    pub video_url: String,
    pub state: SessionPhase,
    pub created_at: DateTime<Utc>,
    pub age_seconds: u64,
    pub segment_count: usize,
    pub playlist_url: String,
}

/// Result of a successful start.
#[derive(Debug, Clone, Serialize)]
pub struct StartedSession {
    pub preview_id: PreviewId,
    pub playlist_url: String,
    pub status: SessionPhase,
    pub segment_count: usize,
    pub segment_duration: u32,
}
