use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs as async_fs;

use crate::trajectory::{RunInfo, INFO_FILE, TRAJECTORY_SUBDIR};

#[derive(Clone, Debug)]
pub struct RunSummary {
    pub id: String,
    pub path: PathBuf,
}

#[derive(Clone, Debug)]
pub struct ScreenshotEntry {
    pub step: usize,
    pub path: PathBuf,
}

/// Everything the dashboard needs to render one saved run.
#[derive(Clone, Debug)]
pub struct RunView {
    pub id: String,
    pub path: PathBuf,
    pub screenshots: Vec<ScreenshotEntry>,
    pub info: Option<RunInfo>,
}

/// Immediate subdirectories of the results root, newest first. A missing
/// root or an empty one is the empty state, not an error.
pub async fn list_runs(root: &Path) -> Result<Vec<RunSummary>> {
    let mut runs = Vec::new();
    let mut entries = match async_fs::read_dir(root).await {
        Ok(entries) => entries,
        Err(_) => return Ok(runs),
    };
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            runs.push(RunSummary {
                id: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path(),
            });
        }
    }
    // Timestamp-derived ids, so newest-first is a reverse lexicographic sort.
    runs.sort_by(|a, b| b.id.cmp(&a.id));
    Ok(runs)
}

/// Load one run directory: screenshots in step order, metadata if present.
/// A run without a trajectory directory or without `info.json` still loads.
pub async fn load_run(dir: &Path) -> Result<RunView> {
    let id = dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut screenshots = Vec::new();
    if let Ok(mut entries) = async_fs::read_dir(dir.join(TRAJECTORY_SUBDIR)).await {
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().into_owned();
            if let Some(step) = step_ordinal(&name) {
                screenshots.push(ScreenshotEntry {
                    step,
                    path: entry.path(),
                });
            }
        }
    }
    // Ordinal order, not filename order, so step_10 follows step_9.
    screenshots.sort_by_key(|s| s.step);

    let info = match async_fs::read(dir.join(INFO_FILE)).await {
        Ok(bytes) => Some(
            serde_json::from_slice::<RunInfo>(&bytes)
                .with_context(|| format!("malformed {INFO_FILE} in {}", dir.display()))?,
        ),
        Err(_) => None,
    };

    Ok(RunView {
        id,
        path: dir.to_path_buf(),
        screenshots,
        info,
    })
}

/// Parse the step ordinal out of a `step_<index>.png` filename.
pub fn step_ordinal(file_name: &str) -> Option<usize> {
    file_name
        .strip_prefix("step_")?
        .strip_suffix(".png")?
        .parse()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_step_ordinals() {
        assert_eq!(step_ordinal("step_0.png"), Some(0));
        assert_eq!(step_ordinal("step_12.png"), Some(12));
        assert_eq!(step_ordinal("step_.png"), None);
        assert_eq!(step_ordinal("step_1.jpg"), None);
        assert_eq!(step_ordinal("start.png"), None);
    }
}
