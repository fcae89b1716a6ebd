//! Network condition features.

use serde::{Deserialize, Serialize};

/// Number of features a predictor consumes.
pub const FEATURE_COUNT: usize = 4;

/// Feature names, in the order of [`NetworkMetrics::features`].
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] =
    ["bandwidth_kbps", "latency_ms", "jitter_ms", "packet_loss_pct"];

/// Network conditions reported by (or assumed for) a viewer.
///
/// Missing fields deserialize to the [`Default`] profile, a healthy
/// broadband connection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkMetrics {
    pub bandwidth_kbps: f64,
    pub latency_ms: f64,
    pub jitter_ms: f64,
    pub packet_loss_pct: f64,
}

impl Default for NetworkMetrics {
    fn default() -> Self {
        Self {
            bandwidth_kbps: 5000.0,
            latency_ms: 40.0,
            jitter_ms: 5.0,
            packet_loss_pct: 0.0,
        }
    }
}

impl NetworkMetrics {
    pub fn new(bandwidth_kbps: f64, latency_ms: f64, jitter_ms: f64, packet_loss_pct: f64) -> Self {
        Self {
            bandwidth_kbps,
            latency_ms,
            jitter_ms,
            packet_loss_pct,
        }
    }

    /// Feature vector in fixed order.
    pub fn features(&self) -> [f64; FEATURE_COUNT] {
        [
            self.bandwidth_kbps,
            self.latency_ms,
            self.jitter_ms,
            self.packet_loss_pct,
        ]
    }
}
