use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::fs as async_fs;
use tracing::info;

use crate::agent::AgentHistory;

pub const DEFAULT_RESULTS_DIR: &str = "saved_trajectories";
pub const TRAJECTORY_SUBDIR: &str = "trajectory";
pub const INFO_FILE: &str = "info.json";

/// The metadata document written next to a run's screenshots. Every field
/// defaults so documents written by older or newer builds still load.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunInfo {
    pub urls: Vec<String>,
    pub actions: Vec<Value>,
    pub extracted_content: Vec<String>,
}

impl RunInfo {
    pub fn from_history(history: &AgentHistory) -> Self {
        Self {
            urls: history.urls(),
            actions: history
                .model_actions()
                .iter()
                .map(|a| json_safe(&a.to_json()))
                .collect(),
            extracted_content: history.extracted_content(),
        }
    }
}

/// Writes one directory per run under `root`:
/// `<root>/<run_id>/trajectory/step_<index>.png` plus
/// `<root>/<run_id>/info.json`, written whole, exactly once.
pub struct TrajectoryStore {
    root: PathBuf,
}

impl TrajectoryStore {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist under a timestamp-derived run id.
    pub async fn save(&self, history: &AgentHistory) -> Result<PathBuf> {
        let run_id = Local::now().format("%Y%m%d_%H%M%S").to_string();
        self.save_as(&run_id, history).await
    }

    /// Persist under an explicit run id. The run directory is created even
    /// when no step carries a screenshot.
    pub async fn save_as(&self, run_id: &str, history: &AgentHistory) -> Result<PathBuf> {
        let run_dir = self.root.join(run_id);
        let traj_dir = run_dir.join(TRAJECTORY_SUBDIR);
        async_fs::create_dir_all(&traj_dir)
            .await
            .with_context(|| format!("create {}", traj_dir.display()))?;

        for step in &history.steps {
            if let Some(b64) = &step.screenshot_b64 {
                let png = B64
                    .decode(b64)
                    .with_context(|| format!("step {} screenshot is not valid base64", step.index))?;
                let path = traj_dir.join(format!("step_{}.png", step.index));
                async_fs::write(&path, &png)
                    .await
                    .with_context(|| format!("write {}", path.display()))?;
            }
        }

        let info = RunInfo::from_history(history);
        let doc = serde_json::to_vec_pretty(&info)?;
        let info_path = run_dir.join(INFO_FILE);
        async_fs::write(&info_path, &doc)
            .await
            .with_context(|| format!("write {}", info_path.display()))?;

        info!(run = run_id, steps = history.steps.len(), "trajectory saved");
        Ok(run_dir)
    }
}

/// Recursively reduce a value to the shape we are willing to persist:
/// underscore-prefixed map keys are dropped at every depth, arrays map
/// element-wise, primitives pass through. Total for any finite input.
pub fn json_safe(v: &Value) -> Value {
    match v {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| !k.starts_with('_'))
                .map(|(k, val)| (k.clone(), json_safe(val)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(json_safe).collect()),
        _ => v.clone(),
    }
}
