use anyhow::Result;
use std::path::PathBuf;
use tracing::info;

use crate::agent::{Agent, AgentConfig, AgentHistory, ChromiumSurface, GeminiPlanner};
use crate::browser::BrowserConfig;
use crate::config::Config;
use crate::gemini::{GeminiClient, GeminiConfig};
use crate::trajectory::TrajectoryStore;

pub struct RunOutcome {
    pub history: AgentHistory,
    pub run_dir: PathBuf,
}

/// Wire the full stack for one task and persist the result: Gemini planner,
/// fresh Chromium, one agent run, one trajectory directory. Shared by the
/// CLI commands and the dashboard's background runs.
pub async fn run_task(cfg: &Config, task: &str) -> Result<RunOutcome> {
    let client = GeminiClient::new(GeminiConfig::from(cfg))?;
    let surface = ChromiumSurface::launch(BrowserConfig {
        headless: cfg.headless,
        ..Default::default()
    })
    .await?;
    let planner = GeminiPlanner::new(client);
    let agent = Agent::new(
        task,
        surface,
        planner,
        AgentConfig {
            max_steps: cfg.max_steps,
            max_actions_per_step: cfg.max_actions_per_step,
            use_vision: cfg.use_vision,
        },
    );

    let history = agent.run().await?;

    let store = TrajectoryStore::new(&cfg.results_dir);
    let run_dir = store.save(&history).await?;
    info!(
        dir = %run_dir.display(),
        status = ?history.status,
        steps = history.steps.len(),
        "run persisted"
    );
    Ok(RunOutcome { history, run_dir })
}
