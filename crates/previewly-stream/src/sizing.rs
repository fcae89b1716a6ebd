//! Forward-window sizing.

use std::sync::Arc;

use crate::metrics::NetworkMetrics;
use crate::predictor::PredictorHandle;

/// Default upper bound on the forward limit.
pub const MAX_FORWARD_CAP: usize = 10;

/// Decides how many segments ahead of the playhead are admissible.
///
/// The result of [`evaluate`](Self::evaluate) is always in `[1, cap]`.
#[derive(Debug, Clone)]
pub enum WindowSizingPolicy {
    /// The same forward limit regardless of network conditions.
    Static { forward: usize },
    /// Forward limit estimated from network conditions.
    Adaptive {
        predictor: Arc<PredictorHandle>,
        cap: usize,
    },
}

impl WindowSizingPolicy {
    /// Fixed forward limit, clamped into `[1, cap]`.
    pub fn fixed(forward: usize, cap: usize) -> Self {
        let cap = cap.max(1);
        Self::Static {
            forward: forward.clamp(1, cap),
        }
    }

    /// Predictor-driven forward limit, bounded by `cap`.
    pub fn adaptive(predictor: Arc<PredictorHandle>, cap: usize) -> Self {
        Self::Adaptive {
            predictor,
            cap: cap.max(1),
        }
    }

    pub fn evaluate(&self, metrics: &NetworkMetrics) -> usize {
        match self {
            Self::Static { forward } => *forward,
            Self::Adaptive { predictor, cap } => {
                let raw = predictor.get().predict(&metrics.features());
                let forward = clamp_estimate(raw, *cap);
                tracing::trace!(raw, forward, "Evaluated forward window");
                forward
            }
        }
    }

    pub fn is_adaptive(&self) -> bool {
        matches!(self, Self::Adaptive { .. })
    }

    /// The predictor behind an adaptive policy.
    pub fn predictor(&self) -> Option<&Arc<PredictorHandle>> {
        match self {
            Self::Adaptive { predictor, .. } => Some(predictor),
            Self::Static { .. } => None,
        }
    }
}

/// Round a raw estimate into `[1, cap]`. NaN and non-positive values map to
/// 1, anything above `cap` (including infinity) maps to `cap`.
pub fn clamp_estimate(raw: f64, cap: usize) -> usize {
    let cap = cap.max(1);
    if raw.is_nan() || raw <= 0.0 {
        return 1;
    }
    if raw >= cap as f64 {
        return cap;
    }
    // raw is in (0, cap) here, so the cast cannot overflow.
    (raw.round() as usize).clamp(1, cap)
}
