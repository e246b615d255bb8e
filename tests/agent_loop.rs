//! Agent run-loop tests over scripted planner and surface doubles.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use nanoid::nanoid;
use std::sync::Mutex;

use webtrails::agent::{
    ActionOutcome, ActionRecord, Agent, AgentConfig, AgentError, Decision, NullSurface,
    Observation, Planner, RunStatus, Surface,
};

/// Planner that replays a fixed list of decisions, then declares done.
struct ScriptedPlanner {
    script: Mutex<Vec<Decision>>,
}

impl ScriptedPlanner {
    fn new(script: Vec<Decision>) -> Self {
        Self {
            script: Mutex::new(script),
        }
    }
}

#[async_trait]
impl Planner for ScriptedPlanner {
    async fn plan(
        &self,
        _task: &str,
        _observation: &Observation,
        _last_error: Option<&AgentError>,
    ) -> Result<Decision, AgentError> {
        let mut script = self.script.lock().unwrap();
        if script.is_empty() {
            Ok(Decision {
                thought: "script exhausted".into(),
                actions: vec![ActionRecord::Done {
                    summary: "exhausted".into(),
                }],
            })
        } else {
            Ok(script.remove(0))
        }
    }
}

struct FailingPlanner;

#[async_trait]
impl Planner for FailingPlanner {
    async fn plan(
        &self,
        _task: &str,
        _observation: &Observation,
        _last_error: Option<&AgentError>,
    ) -> Result<Decision, AgentError> {
        Err(AgentError::Llm("model unavailable".into()))
    }
}

/// Surface double with a fixed page: screenshots on demand, "pong" when
/// asked to extract.
struct StubSurface;

#[async_trait]
impl Surface for StubSurface {
    async fn observe(&self, with_screenshot: bool) -> Result<Observation, AgentError> {
        Ok(Observation {
            id: nanoid!(),
            url: Some("https://example.com".into()),
            title: Some("Example Domain".into()),
            screenshot_b64: with_screenshot.then(|| B64.encode([0x89, 0x50, 0x4e, 0x47])),
        })
    }

    async fn act(&self, action: &ActionRecord) -> Result<ActionOutcome, AgentError> {
        match action {
            ActionRecord::Extract { .. } => Ok(ActionOutcome {
                extracted: Some("pong".into()),
            }),
            ActionRecord::Click { .. } => Err(AgentError::Browser("nothing to click".into())),
            _ => Ok(ActionOutcome::default()),
        }
    }
}

fn scroll(dy: i64) -> ActionRecord {
    ActionRecord::Scroll { dx: 0, dy }
}

#[tokio::test]
async fn completes_on_done_decision() {
    let planner = ScriptedPlanner::new(vec![
        Decision {
            thought: "scroll a bit".into(),
            actions: vec![scroll(300)],
        },
        Decision {
            thought: "answer".into(),
            actions: vec![ActionRecord::Done {
                summary: "all done".into(),
            }],
        },
    ]);
    let agent = Agent::new("ping", NullSurface, planner, AgentConfig::default());

    let history = agent.run().await.unwrap();
    assert_eq!(history.status, RunStatus::Completed);
    assert_eq!(history.result.as_deref(), Some("all done"));
    assert_eq!(history.steps.len(), 2);
}

#[tokio::test]
async fn truncates_actions_to_per_step_budget() {
    let planner = ScriptedPlanner::new(vec![Decision {
        thought: "burst".into(),
        actions: vec![scroll(1), scroll(2), scroll(3)],
    }]);
    let cfg = AgentConfig {
        max_actions_per_step: 1,
        ..AgentConfig::default()
    };
    let agent = Agent::new("ping", NullSurface, planner, cfg);

    let history = agent.run().await.unwrap();
    assert_eq!(history.steps[0].actions.len(), 1);
}

#[tokio::test]
async fn step_budget_exhaustion_interrupts() {
    let planner = ScriptedPlanner::new(
        (0..10)
            .map(|i| Decision {
                thought: format!("scroll {i}"),
                actions: vec![scroll(100)],
            })
            .collect(),
    );
    let cfg = AgentConfig {
        max_steps: 3,
        ..AgentConfig::default()
    };
    let agent = Agent::new("ping", NullSurface, planner, cfg);

    let history = agent.run().await.unwrap();
    assert_eq!(history.status, RunStatus::Interrupted);
    assert_eq!(history.steps.len(), 3);
}

#[tokio::test]
async fn planner_failure_is_raised_not_swallowed() {
    let agent = Agent::new("ping", NullSurface, FailingPlanner, AgentConfig::default());
    let err = agent.run().await.unwrap_err();
    assert!(matches!(err, AgentError::Llm(_)));
}

#[tokio::test]
async fn records_urls_screenshots_and_extractions() {
    let planner = ScriptedPlanner::new(vec![
        Decision {
            thought: "read the page".into(),
            actions: vec![ActionRecord::Extract { selector: None }],
        },
        Decision {
            thought: "answer".into(),
            actions: vec![ActionRecord::Done {
                summary: "pong".into(),
            }],
        },
    ]);
    let agent = Agent::new("ping", StubSurface, planner, AgentConfig::default());

    let history = agent.run().await.unwrap();
    assert_eq!(history.extracted_content(), vec!["pong".to_string()]);
    assert!(history.urls().iter().all(|u| u == "https://example.com"));
    assert!(history.steps[0].screenshot_b64.is_some());
    let kinds: Vec<&str> = history.model_actions().iter().map(|a| a.kind()).collect();
    assert_eq!(kinds, vec!["extract", "done"]);
}

#[tokio::test]
async fn action_failure_is_recorded_and_run_continues() {
    let planner = ScriptedPlanner::new(vec![
        Decision {
            thought: "try a click".into(),
            actions: vec![ActionRecord::Click {
                selector: "#missing".into(),
            }],
        },
        Decision {
            thought: "give up".into(),
            actions: vec![ActionRecord::Done {
                summary: "done anyway".into(),
            }],
        },
    ]);
    let agent = Agent::new("ping", StubSurface, planner, AgentConfig::default());

    let history = agent.run().await.unwrap();
    assert_eq!(history.status, RunStatus::Completed);
    assert!(history.steps[0].error.as_deref().unwrap().contains("browser error"));
    assert!(history.steps[1].error.is_none());
}
