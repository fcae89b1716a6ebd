//! Forward-window predictors.
//!
//! A [`ForwardPredictor`] maps the four network features to a raw estimate
//! of how many segments to keep ahead of the playhead. The estimate is not
//! bounded here; [`WindowSizingPolicy`](crate::WindowSizingPolicy) clamps it.
//!
//! Two implementations exist:
//!
//! - [`DecisionTreeModel`]: a regression tree exported by the offline
//!   training pipeline as JSON.
//! - [`RuleTable`]: the threshold rule the training labels were generated
//!   from, used when no model file is configured or it fails to load.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::metrics::FEATURE_COUNT;

/// Synchronous feature-vector to estimate mapping.
pub trait ForwardPredictor: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Raw forward-window estimate. May be any `f64`, including NaN.
    fn predict(&self, features: &[f64; FEATURE_COUNT]) -> f64;
}

/// Threshold rule over bandwidth, latency and loss.
///
/// | condition | forward |
/// |---|---|
/// | bandwidth < 800 kbps, latency > 200 ms, or loss > 3 % | 5 |
/// | bandwidth < 1500 kbps or latency > 120 ms | 3 |
/// | otherwise | 2 |
#[derive(Debug, Clone, Copy, Default)]
pub struct RuleTable;

impl ForwardPredictor for RuleTable {
    fn name(&self) -> &str {
        "rule-table"
    }

    fn predict(&self, features: &[f64; FEATURE_COUNT]) -> f64 {
        let [bandwidth, latency, _jitter, loss] = *features;
        if bandwidth < 800.0 || latency > 200.0 || loss > 3.0 {
            5.0
        } else if bandwidth < 1500.0 || latency > 120.0 {
            3.0
        } else {
            2.0
        }
    }
}

/// One node of a regression tree.
///
/// Internal nodes carry `feature`, `threshold`, `left` and `right`; a
/// sample goes left when `features[feature] <= threshold`. Leaves carry only
/// `value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    #[serde(default)]
    pub feature: Option<usize>,
    #[serde(default)]
    pub threshold: f64,
    #[serde(default)]
    pub left: Option<usize>,
    #[serde(default)]
    pub right: Option<usize>,
    #[serde(default)]
    pub value: f64,
}

impl TreeNode {
    fn is_leaf(&self) -> bool {
        self.feature.is_none() || self.left.is_none() || self.right.is_none()
    }
}

/// Regression tree loaded from the training pipeline's JSON export.
///
/// ```
/// use previewly_stream::{DecisionTreeModel, ForwardPredictor};
///
/// let model = DecisionTreeModel::from_json(r#"{
///     "nodes": [
///         {"feature": 0, "threshold": 800.0, "left": 1, "right": 2, "value": 3.0},
///         {"value": 5.0},
///         {"value": 2.0}
///     ]
/// }"#).unwrap();
/// assert_eq!(model.predict(&[500.0, 50.0, 5.0, 0.0]), 5.0);
/// assert_eq!(model.predict(&[5000.0, 50.0, 5.0, 0.0]), 2.0);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTreeModel {
    nodes: Vec<TreeNode>,
}

impl DecisionTreeModel {
    /// Build a model, checking that every path ends in a leaf.
    ///
    /// Children must point to a later node, which rules out cycles.
    pub fn new(nodes: Vec<TreeNode>) -> previewly_common::Result<Self> {
        if nodes.is_empty() {
            return Err(previewly_common::Error::Config(
                "decision tree has no nodes".into(),
            ));
        }
        for (i, node) in nodes.iter().enumerate() {
            if node.is_leaf() {
                continue;
            }
            if let Some(f) = node.feature {
                if f >= FEATURE_COUNT {
                    return Err(previewly_common::Error::Config(format!(
                        "node {i} splits on feature {f}; only {FEATURE_COUNT} exist"
                    )));
                }
            }
            for child in [node.left, node.right].into_iter().flatten() {
                if child <= i || child >= nodes.len() {
                    return Err(previewly_common::Error::Config(format!(
                        "node {i} has invalid child index {child}"
                    )));
                }
            }
        }
        Ok(Self { nodes })
    }

    /// Parse the JSON export.
    pub fn from_json(json: &str) -> previewly_common::Result<Self> {
        #[derive(Deserialize)]
        struct Export {
            nodes: Vec<TreeNode>,
        }
        let export: Export = serde_json::from_str(json)
            .map_err(|e| previewly_common::Error::Config(format!("invalid model JSON: {e}")))?;
        Self::new(export.nodes)
    }

    /// Read and parse a model file.
    pub fn from_path(path: &Path) -> previewly_common::Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            previewly_common::Error::Config(format!(
                "cannot read model {}: {e}",
                path.display()
            ))
        })?;
        Self::from_json(&json)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

impl ForwardPredictor for DecisionTreeModel {
    fn name(&self) -> &str {
        "decision-tree"
    }

    fn predict(&self, features: &[f64; FEATURE_COUNT]) -> f64 {
        let mut idx = 0;
        loop {
            let node = &self.nodes[idx];
            match (node.feature, node.left, node.right) {
                (Some(f), Some(left), Some(right)) => {
                    idx = if features[f] <= node.threshold { left } else { right };
                }
                _ => return node.value,
            }
        }
    }
}

/// Shared, cached predictor.
///
/// The model is loaded once and handed out as an `Arc`; [`refresh`] swaps
/// in a freshly loaded copy. Readers that already hold the old `Arc` keep
/// using it until they drop it.
///
/// [`refresh`]: PredictorHandle::refresh
pub struct PredictorHandle {
    model_path: Option<PathBuf>,
    current: RwLock<Arc<dyn ForwardPredictor>>,
}

impl PredictorHandle {
    /// Load from `model_path`, falling back to [`RuleTable`] when no path is
    /// given or the file cannot be loaded.
    pub fn load(model_path: Option<&Path>) -> Self {
        let predictor: Arc<dyn ForwardPredictor> = match model_path {
            Some(path) => match DecisionTreeModel::from_path(path) {
                Ok(model) => {
                    tracing::info!(
                        nodes = model.node_count(),
                        "Loaded predictor model from {}",
                        path.display()
                    );
                    Arc::new(model)
                }
                Err(e) => {
                    tracing::warn!("{e}; falling back to rule table");
                    Arc::new(RuleTable)
                }
            },
            None => Arc::new(RuleTable),
        };

        Self {
            model_path: model_path.map(Path::to_path_buf),
            current: RwLock::new(predictor),
        }
    }

    /// Wrap an existing predictor. [`refresh`](Self::refresh) is a no-op.
    pub fn from_predictor(predictor: Arc<dyn ForwardPredictor>) -> Self {
        Self {
            model_path: None,
            current: RwLock::new(predictor),
        }
    }

    /// The current predictor.
    pub fn get(&self) -> Arc<dyn ForwardPredictor> {
        Arc::clone(&self.current.read())
    }

    /// Reload the model file.
    ///
    /// # Errors
    ///
    /// Returns [`previewly_common::Error::Config`] if the file cannot be
    /// loaded; the previous predictor stays in place.
    pub fn refresh(&self) -> previewly_common::Result<()> {
        let Some(path) = &self.model_path else {
            return Ok(());
        };
        let model = DecisionTreeModel::from_path(path)?;
        tracing::info!(nodes = model.node_count(), "Reloaded predictor model");
        *self.current.write() = Arc::new(model);
        Ok(())
    }
}

impl fmt::Debug for PredictorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PredictorHandle")
            .field("model_path", &self.model_path)
            .field("predictor", &self.current.read().name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TREE: &str = r#"{
        "nodes": [
            {"feature": 0, "threshold": 800.0, "left": 1, "right": 2, "value": 3.0},
            {"value": 5.0},
            {"feature": 1, "threshold": 120.0, "left": 3, "right": 4, "value": 2.5},
            {"value": 2.0},
            {"value": 3.0}
        ]
    }"#;

    #[test]
    fn rule_table_thresholds() {
        let rt = RuleTable;
        assert_eq!(rt.predict(&[500.0, 50.0, 5.0, 0.0]), 5.0);
        assert_eq!(rt.predict(&[5000.0, 250.0, 5.0, 0.0]), 5.0);
        assert_eq!(rt.predict(&[5000.0, 50.0, 5.0, 4.0]), 5.0);
        assert_eq!(rt.predict(&[1000.0, 50.0, 5.0, 0.0]), 3.0);
        assert_eq!(rt.predict(&[5000.0, 150.0, 5.0, 0.0]), 3.0);
        assert_eq!(rt.predict(&[5000.0, 50.0, 5.0, 0.0]), 2.0);
    }

    #[test]
    fn tree_walks_to_leaves() {
        let model = DecisionTreeModel::from_json(TREE).unwrap();
        assert_eq!(model.node_count(), 5);
        assert_eq!(model.predict(&[800.0, 10.0, 0.0, 0.0]), 5.0);
        assert_eq!(model.predict(&[2000.0, 100.0, 0.0, 0.0]), 2.0);
        assert_eq!(model.predict(&[2000.0, 180.0, 0.0, 0.0]), 3.0);
    }

    #[test]
    fn single_leaf_tree() {
        let model = DecisionTreeModel::from_json(r#"{"nodes":[{"value":4.0}]}"#).unwrap();
        assert_eq!(model.predict(&[0.0; 4]), 4.0);
    }

    #[test]
    fn malformed_trees_are_rejected() {
        assert!(DecisionTreeModel::from_json(r#"{"nodes":[]}"#).is_err());
        assert!(DecisionTreeModel::from_json("not json").is_err());
        // self loop
        assert!(DecisionTreeModel::from_json(
            r#"{"nodes":[{"feature":0,"threshold":1,"left":0,"right":0}]}"#
        )
        .is_err());
        // out of range child
        assert!(DecisionTreeModel::from_json(
            r#"{"nodes":[{"feature":0,"threshold":1,"left":1,"right":9},{"value":1}]}"#
        )
        .is_err());
        // unknown feature
        assert!(DecisionTreeModel::from_json(
            r#"{"nodes":[{"feature":7,"threshold":1,"left":1,"right":2},{"value":1},{"value":2}]}"#
        )
        .is_err());
    }

    #[test]
    fn handle_without_path_uses_rule_table() {
        let handle = PredictorHandle::load(None);
        assert_eq!(handle.get().name(), "rule-table");
        handle.refresh().unwrap();
    }

    #[test]
    fn handle_falls_back_when_model_missing() {
        let dir = tempfile::tempdir().unwrap();
        let handle = PredictorHandle::load(Some(&dir.path().join("missing.json")));
        assert_eq!(handle.get().name(), "rule-table");
        assert!(handle.refresh().is_err());
        assert_eq!(handle.get().name(), "rule-table");
    }

    #[test]
    fn handle_refresh_picks_up_new_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, r#"{"nodes":[{"value":4.0}]}"#).unwrap();

        let handle = PredictorHandle::load(Some(&path));
        let before = handle.get();
        assert_eq!(before.name(), "decision-tree");
        assert_eq!(before.predict(&[0.0; 4]), 4.0);

        std::fs::write(&path, r#"{"nodes":[{"value":7.0}]}"#).unwrap();
        handle.refresh().unwrap();
        assert_eq!(handle.get().predict(&[0.0; 4]), 7.0);
        // Existing holders keep the old model.
        assert_eq!(before.predict(&[0.0; 4]), 4.0);
    }

    #[test]
    fn failed_refresh_keeps_previous_model() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        std::fs::write(&path, r#"{"nodes":[{"value":4.0}]}"#).unwrap();
        let handle = PredictorHandle::load(Some(&path));

        std::fs::write(&path, "garbage").unwrap();
        assert!(handle.refresh().is_err());
        assert_eq!(handle.get().predict(&[0.0; 4]), 4.0);
    }
}
