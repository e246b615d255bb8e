use async_trait::async_trait;
use nanoid::nanoid;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::browser::{Browser, BrowserConfig};
use crate::gemini::GeminiClient;

// ========================= Core Types =========================

/// A browser action the planner may request. Known kinds form a closed set;
/// anything the model emits outside it is carried verbatim as `Other` so a
/// run's record stays complete even when the shape is unrecognized.
#[derive(Clone, Debug, PartialEq)]
pub enum ActionRecord {
    Navigate { url: String },
    Click { selector: String },
    TypeText { selector: String, text: String },
    Press { key: String },
    Scroll { dx: i64, dy: i64 },
    Extract { selector: Option<String> },
    SetViewport { width: u32, height: u32 },
    Done { summary: String },
    Other(Value),
}

impl ActionRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Navigate { .. } => "navigate",
            Self::Click { .. } => "click",
            Self::TypeText { .. } => "type_text",
            Self::Press { .. } => "press",
            Self::Scroll { .. } => "scroll",
            Self::Extract { .. } => "extract",
            Self::SetViewport { .. } => "set_viewport",
            Self::Done { .. } => "done",
            Self::Other(_) => "other",
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::Navigate { url } => json!({ "kind": "navigate", "url": url }),
            Self::Click { selector } => json!({ "kind": "click", "selector": selector }),
            Self::TypeText { selector, text } => {
                json!({ "kind": "type_text", "selector": selector, "text": text })
            }
            Self::Press { key } => json!({ "kind": "press", "key": key }),
            Self::Scroll { dx, dy } => json!({ "kind": "scroll", "dx": dx, "dy": dy }),
            Self::Extract { selector } => json!({ "kind": "extract", "selector": selector }),
            Self::SetViewport { width, height } => {
                json!({ "kind": "set_viewport", "width": width, "height": height })
            }
            Self::Done { summary } => json!({ "kind": "done", "summary": summary }),
            Self::Other(v) => v.clone(),
        }
    }
}

impl Serialize for ActionRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ActionRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = Value::deserialize(deserializer)?;
        Ok(decode_action(&v))
    }
}

pub fn decode_action(v: &Value) -> ActionRecord {
    let kind = v.get("kind").and_then(|x| x.as_str()).unwrap_or("");
    let text_field = |name: &str| {
        v.get(name)
            .and_then(|x| x.as_str())
            .unwrap_or("")
            .to_string()
    };
    match kind {
        "navigate" => ActionRecord::Navigate { url: text_field("url") },
        "click" => ActionRecord::Click { selector: text_field("selector") },
        "type_text" => ActionRecord::TypeText {
            selector: text_field("selector"),
            text: text_field("text"),
        },
        "press" => ActionRecord::Press { key: text_field("key") },
        "scroll" => ActionRecord::Scroll {
            dx: v.get("dx").and_then(|x| x.as_i64()).unwrap_or(0),
            dy: v.get("dy").and_then(|x| x.as_i64()).unwrap_or(0),
        },
        "extract" => ActionRecord::Extract {
            selector: v
                .get("selector")
                .and_then(|x| x.as_str())
                .map(|s| s.to_string()),
        },
        "set_viewport" => ActionRecord::SetViewport {
            width: v.get("width").and_then(|x| x.as_u64()).unwrap_or(1280) as u32,
            height: v.get("height").and_then(|x| x.as_u64()).unwrap_or(800) as u32,
        },
        "done" => ActionRecord::Done { summary: text_field("summary") },
        _ => ActionRecord::Other(v.clone()),
    }
}

/// What the planner sees of the browser between actions.
#[derive(Clone, Debug, Default)]
pub struct Observation {
    pub id: String,
    pub url: Option<String>,
    pub title: Option<String>,
    pub screenshot_b64: Option<String>,
}

/// One planner reply: a thought plus the actions it wants executed.
#[derive(Clone, Debug, Default)]
pub struct Decision {
    pub thought: String,
    pub actions: Vec<ActionRecord>,
}

/// Decode a model reply into a `Decision`. Total: unknown action kinds map
/// to `Other`, malformed fields take defaults, and a reply that is not JSON
/// at all is read as a final message (the model talking instead of acting).
pub fn decode_decision(raw: &str) -> Decision {
    let trimmed = strip_fences(raw);
    match serde_json::from_str::<Value>(trimmed) {
        Ok(v) => {
            let thought = v
                .get("thought")
                .and_then(|x| x.as_str())
                .unwrap_or("")
                .to_string();
            let actions = v
                .get("actions")
                .and_then(|x| x.as_array())
                .map(|arr| arr.iter().map(decode_action).collect())
                .unwrap_or_default();
            Decision { thought, actions }
        }
        Err(_) => {
            let text = raw.trim().to_string();
            Decision {
                thought: text.clone(),
                actions: vec![ActionRecord::Done { summary: text }],
            }
        }
    }
}

fn strip_fences(raw: &str) -> &str {
    let t = raw.trim();
    let t = t
        .strip_prefix("```json")
        .or_else(|| t.strip_prefix("```"))
        .unwrap_or(t);
    t.strip_suffix("```").unwrap_or(t).trim()
}

#[derive(Debug, Error, Clone)]
pub enum AgentError {
    #[error("llm error: {0}")]
    Llm(String),
    #[error("browser error: {0}")]
    Browser(String),
    #[error("unsupported action: {0}")]
    Unsupported(String),
    #[error("interrupted: {0}")]
    Interrupted(String),
    #[error("other error: {0}")]
    Other(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Interrupted,
    Failed,
}

impl Default for RunStatus {
    fn default() -> Self {
        Self::Running
    }
}

/// One state snapshot from the run: what the page looked like after the
/// step's actions, plus what was done to get there.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryStep {
    pub index: usize,
    pub url: Option<String>,
    pub screenshot_b64: Option<String>,
    pub actions: Vec<ActionRecord>,
    pub extracted: Option<String>,
    pub error: Option<String>,
}

/// The ordered record of one agent run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AgentHistory {
    pub task: String,
    pub status: RunStatus,
    pub result: Option<String>,
    pub steps: Vec<HistoryStep>,
}

impl AgentHistory {
    pub fn urls(&self) -> Vec<String> {
        self.steps.iter().filter_map(|s| s.url.clone()).collect()
    }

    pub fn model_actions(&self) -> Vec<ActionRecord> {
        self.steps.iter().flat_map(|s| s.actions.clone()).collect()
    }

    pub fn extracted_content(&self) -> Vec<String> {
        self.steps
            .iter()
            .filter_map(|s| s.extracted.clone())
            .collect()
    }
}

// ========================= Pluggable Subsystems =========================

#[derive(Clone, Debug, Default)]
pub struct ActionOutcome {
    pub extracted: Option<String>,
}

/// The thing the agent acts on. Kept behind a trait so the run loop never
/// learns whether it is talking to Chromium or a test double.
#[async_trait]
pub trait Surface: Send + Sync {
    async fn observe(&self, with_screenshot: bool) -> Result<Observation, AgentError>;
    async fn act(&self, action: &ActionRecord) -> Result<ActionOutcome, AgentError>;
}

/// The thing that decides what to do next. The LLM lives behind this seam.
#[async_trait]
pub trait Planner: Send + Sync {
    async fn plan(
        &self,
        task: &str,
        observation: &Observation,
        last_error: Option<&AgentError>,
    ) -> Result<Decision, AgentError>;
}

// ========================= Controller =========================

/// Executes a decision's actions against a surface, bounded to
/// `max_actions_per_step`. `done` stops the step; `Other` is recorded but
/// never dispatched; an action failure ends the step and is carried to the
/// next planning turn instead of aborting the run.
#[derive(Clone, Debug)]
pub struct Controller {
    pub max_actions_per_step: usize,
}

impl Default for Controller {
    fn default() -> Self {
        Self { max_actions_per_step: 1 }
    }
}

#[derive(Clone, Debug, Default)]
pub struct StepOutcome {
    pub executed: Vec<ActionRecord>,
    pub extracted: Option<String>,
    pub finished: Option<String>,
    pub error: Option<AgentError>,
}

impl Controller {
    pub fn new(max_actions_per_step: usize) -> Self {
        Self { max_actions_per_step: max_actions_per_step.max(1) }
    }

    pub async fn apply<S: Surface + ?Sized>(
        &self,
        surface: &S,
        actions: Vec<ActionRecord>,
    ) -> StepOutcome {
        let mut out = StepOutcome::default();
        for action in actions.into_iter().take(self.max_actions_per_step) {
            match &action {
                ActionRecord::Done { summary } => {
                    out.finished = Some(summary.clone());
                    out.executed.push(action);
                    break;
                }
                ActionRecord::Other(v) => {
                    warn!(payload = %v, "skipping unrecognized action");
                    out.executed.push(action);
                    continue;
                }
                _ => {}
            }
            match surface.act(&action).await {
                Ok(res) => {
                    if res.extracted.is_some() {
                        out.extracted = res.extracted;
                    }
                    out.executed.push(action);
                }
                Err(err) => {
                    warn!(kind = action.kind(), "action failed: {}", err);
                    out.executed.push(action);
                    out.error = Some(err);
                    break;
                }
            }
        }
        out
    }
}

// ========================= Agent Core =========================

#[derive(Clone, Debug)]
pub struct AgentConfig {
    pub max_steps: usize,
    pub max_actions_per_step: usize,
    pub use_vision: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_steps: 25,
            max_actions_per_step: 1,
            use_vision: true,
        }
    }
}

pub struct Agent<S, P>
where
    S: Surface,
    P: Planner,
{
    task: String,
    surface: S,
    planner: P,
    controller: Controller,
    cfg: AgentConfig,
}

impl<S, P> Agent<S, P>
where
    S: Surface,
    P: Planner,
{
    pub fn new(task: impl Into<String>, surface: S, planner: P, cfg: AgentConfig) -> Self {
        let controller = Controller::new(cfg.max_actions_per_step);
        Self {
            task: task.into(),
            surface,
            planner,
            controller,
            cfg,
        }
    }

    /// Run the task to completion. One awaited call; the task string goes to
    /// the planner verbatim. Returns the full history, or an error when the
    /// planner or an observation fails outright.
    pub async fn run(&self) -> Result<AgentHistory, AgentError> {
        info!(task = %self.task, "agent run started");
        let mut history = AgentHistory {
            task: self.task.clone(),
            ..AgentHistory::default()
        };
        let mut last_error: Option<AgentError> = None;

        for index in 0..self.cfg.max_steps {
            let observation = self.surface.observe(self.cfg.use_vision).await?;
            let decision = self
                .planner
                .plan(&self.task, &observation, last_error.as_ref())
                .await?;
            info!(
                step = index,
                thought = %decision.thought,
                actions = decision.actions.len(),
                "planner decision"
            );

            let outcome = self.controller.apply(&self.surface, decision.actions).await;
            last_error = outcome.error.clone();

            // Record the state the actions produced, not the one they saw.
            let after = self.surface.observe(self.cfg.use_vision).await?;
            history.steps.push(HistoryStep {
                index,
                url: after.url,
                screenshot_b64: after.screenshot_b64,
                actions: outcome.executed,
                extracted: outcome.extracted,
                error: last_error.as_ref().map(|e| e.to_string()),
            });

            if let Some(summary) = outcome.finished {
                history.status = RunStatus::Completed;
                history.result = Some(summary);
                info!(steps = history.steps.len(), "agent run completed");
                return Ok(history);
            }
        }

        history.status = RunStatus::Interrupted;
        warn!(
            max_steps = self.cfg.max_steps,
            "step budget exhausted before completion"
        );
        Ok(history)
    }
}

// ========================= Run Gate =========================

/// Admits one run at a time. `try_acquire` hands out at most one token;
/// dropping the token re-opens the gate, including on the failure path.
#[derive(Clone, Default)]
pub struct RunGate {
    busy: Arc<AtomicBool>,
}

impl RunGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<RunToken> {
        self.busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RunToken {
                busy: Arc::clone(&self.busy),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }
}

pub struct RunToken {
    busy: Arc<AtomicBool>,
}

impl Drop for RunToken {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

// ========================= Gemini Planner =========================

const PLANNER_INSTRUCTIONS: &str = "\
You control a web browser one step at a time. Reply with a single JSON object:
{\"thought\": \"what you are doing and why\", \"actions\": [ ... ]}
Each action is one of:
  {\"kind\": \"navigate\", \"url\": \"https://...\"}
  {\"kind\": \"click\", \"selector\": \"<css selector>\"}
  {\"kind\": \"type_text\", \"selector\": \"<css selector>\", \"text\": \"...\"}
  {\"kind\": \"press\", \"key\": \"Enter\"}
  {\"kind\": \"scroll\", \"dx\": 0, \"dy\": 600}
  {\"kind\": \"extract\", \"selector\": null}
  {\"kind\": \"set_viewport\", \"width\": 375, \"height\": 812}
  {\"kind\": \"done\", \"summary\": \"<final answer>\"}
Use extract to capture page text you need for the answer. Finish with a
single done action carrying the final answer once the task is complete.";

/// `Planner` backed by the Gemini chat client. Each turn re-states the task
/// and the current page, attaches the screenshot when one is available, and
/// decodes the JSON reply leniently.
#[derive(Clone)]
pub struct GeminiPlanner {
    client: GeminiClient,
    instructions: String,
}

impl GeminiPlanner {
    pub fn new(client: GeminiClient) -> Self {
        Self {
            client,
            instructions: PLANNER_INSTRUCTIONS.to_string(),
        }
    }

    pub fn with_instructions(client: GeminiClient, instructions: impl Into<String>) -> Self {
        Self {
            client,
            instructions: instructions.into(),
        }
    }

    fn compose(
        &self,
        task: &str,
        observation: &Observation,
        last_error: Option<&AgentError>,
    ) -> String {
        let mut s = String::new();
        s.push_str(&self.instructions);
        s.push_str("\n\nTask: ");
        s.push_str(task);
        s.push('\n');
        if let Some(url) = &observation.url {
            s.push_str("Current URL: ");
            s.push_str(url);
            s.push('\n');
        }
        if let Some(title) = &observation.title {
            s.push_str("Page title: ");
            s.push_str(title);
            s.push('\n');
        }
        if let Some(err) = last_error {
            s.push_str("The previous action failed: ");
            s.push_str(&err.to_string());
            s.push('\n');
        }
        if observation.screenshot_b64.is_some() {
            s.push_str("A screenshot of the current page is attached.\n");
        }
        s
    }
}

#[async_trait]
impl Planner for GeminiPlanner {
    async fn plan(
        &self,
        task: &str,
        observation: &Observation,
        last_error: Option<&AgentError>,
    ) -> Result<Decision, AgentError> {
        let prompt = self.compose(task, observation, last_error);
        let raw = self
            .client
            .plan_turn(&prompt, observation.screenshot_b64.as_deref())
            .await
            .map_err(|e| AgentError::Llm(e.to_string()))?;
        Ok(decode_decision(&raw))
    }
}

// ========================= Chromium Surface =========================

pub struct ChromiumSurface {
    browser: Browser,
}

impl ChromiumSurface {
    pub async fn launch(cfg: BrowserConfig) -> Result<Self, AgentError> {
        let browser = Browser::launch(cfg)
            .await
            .map_err(|e| AgentError::Browser(e.to_string()))?;
        Ok(Self { browser })
    }

    pub fn new(browser: Browser) -> Self {
        Self { browser }
    }
}

#[async_trait]
impl Surface for ChromiumSurface {
    async fn observe(&self, with_screenshot: bool) -> Result<Observation, AgentError> {
        let url = self
            .browser
            .current_url()
            .await
            .map_err(|e| AgentError::Browser(e.to_string()))?;
        let title = self
            .browser
            .title()
            .await
            .map_err(|e| AgentError::Browser(e.to_string()))?;
        let screenshot_b64 = if with_screenshot {
            match self.browser.screenshot_b64().await {
                Ok(b64) => Some(b64),
                Err(e) => {
                    warn!("screenshot unavailable: {}", e);
                    None
                }
            }
        } else {
            None
        };
        Ok(Observation {
            id: nanoid!(),
            url: if url.is_empty() { None } else { Some(url) },
            title,
            screenshot_b64,
        })
    }

    async fn act(&self, action: &ActionRecord) -> Result<ActionOutcome, AgentError> {
        let browser_err = |e: anyhow::Error| AgentError::Browser(e.to_string());
        match action {
            ActionRecord::Navigate { url } => {
                self.browser.goto(url).await.map_err(browser_err)?;
            }
            ActionRecord::Click { selector } => {
                self.browser.click(selector).await.map_err(browser_err)?;
            }
            ActionRecord::TypeText { selector, text } => {
                self.browser
                    .type_text(selector, text)
                    .await
                    .map_err(browser_err)?;
            }
            ActionRecord::Press { key } => {
                self.browser.press(key).await.map_err(browser_err)?;
            }
            ActionRecord::Scroll { dx, dy } => {
                self.browser.scroll_by(*dx, *dy).await.map_err(browser_err)?;
            }
            ActionRecord::SetViewport { width, height } => {
                self.browser
                    .set_viewport(*width, *height)
                    .await
                    .map_err(browser_err)?;
            }
            ActionRecord::Extract { selector } => {
                let text = self
                    .browser
                    .visible_text(selector.as_deref())
                    .await
                    .map_err(browser_err)?;
                return Ok(ActionOutcome { extracted: Some(text) });
            }
            ActionRecord::Done { .. } | ActionRecord::Other(_) => {
                return Err(AgentError::Unsupported(action.kind().to_string()));
            }
        }
        Ok(ActionOutcome::default())
    }
}

// ========================= Defaults & Helpers =========================

/// Surface that goes nowhere. Stands in for Chromium when exercising the run
/// loop without a browser.
#[derive(Clone, Copy)]
pub struct NullSurface;

#[async_trait]
impl Surface for NullSurface {
    async fn observe(&self, _with_screenshot: bool) -> Result<Observation, AgentError> {
        Ok(Observation {
            id: nanoid!(),
            url: Some("about:blank".to_string()),
            title: Some("null".to_string()),
            screenshot_b64: None,
        })
    }

    async fn act(&self, action: &ActionRecord) -> Result<ActionOutcome, AgentError> {
        match action {
            ActionRecord::Extract { .. } => Ok(ActionOutcome {
                extracted: Some(String::new()),
            }),
            ActionRecord::Done { .. } | ActionRecord::Other(_) => {
                Err(AgentError::Unsupported(action.kind().to_string()))
            }
            _ => Ok(ActionOutcome::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_known_actions() {
        let v = json!({ "kind": "navigate", "url": "https://example.com" });
        assert_eq!(
            decode_action(&v),
            ActionRecord::Navigate { url: "https://example.com".into() }
        );
        let v = json!({ "kind": "scroll", "dy": 600 });
        assert_eq!(decode_action(&v), ActionRecord::Scroll { dx: 0, dy: 600 });
    }

    #[test]
    fn unknown_kind_becomes_other() {
        let v = json!({ "kind": "teleport", "where": "mars" });
        match decode_action(&v) {
            ActionRecord::Other(raw) => assert_eq!(raw, v),
            other => panic!("expected Other, got {other:?}"),
        }
        match decode_action(&json!(42)) {
            ActionRecord::Other(_) => {}
            other => panic!("expected Other, got {other:?}"),
        }
    }

    #[test]
    fn decision_from_json_reply() {
        let raw = r#"```json
        { "thought": "open the page",
          "actions": [ { "kind": "navigate", "url": "https://example.com" } ] }
        ```"#;
        let d = decode_decision(raw);
        assert_eq!(d.thought, "open the page");
        assert_eq!(d.actions.len(), 1);
    }

    #[test]
    fn decision_from_plain_text_is_done() {
        let d = decode_decision("The cheaper model is DeepSeek-V3.");
        assert_eq!(
            d.actions,
            vec![ActionRecord::Done { summary: "The cheaper model is DeepSeek-V3.".into() }]
        );
    }

    #[test]
    fn action_record_round_trips_through_serde() {
        let action = ActionRecord::TypeText {
            selector: "#q".into(),
            text: "rust".into(),
        };
        let v = serde_json::to_value(&action).unwrap();
        let back: ActionRecord = serde_json::from_value(v).unwrap();
        assert_eq!(back, action);
    }

    #[test]
    fn run_gate_admits_one_token() {
        let gate = RunGate::new();
        let token = gate.try_acquire().expect("gate should be open");
        assert!(gate.is_busy());
        assert!(gate.try_acquire().is_none());
        drop(token);
        assert!(!gate.is_busy());
        assert!(gate.try_acquire().is_some());
    }

    #[tokio::test]
    async fn controller_truncates_to_budget() {
        let controller = Controller::new(2);
        let actions = vec![
            ActionRecord::Scroll { dx: 0, dy: 100 },
            ActionRecord::Scroll { dx: 0, dy: 200 },
            ActionRecord::Scroll { dx: 0, dy: 300 },
        ];
        let out = controller.apply(&NullSurface, actions).await;
        assert_eq!(out.executed.len(), 2);
        assert!(out.finished.is_none());
        assert!(out.error.is_none());
    }

    #[tokio::test]
    async fn controller_stops_at_done() {
        let controller = Controller::new(3);
        let actions = vec![
            ActionRecord::Done { summary: "all set".into() },
            ActionRecord::Scroll { dx: 0, dy: 100 },
        ];
        let out = controller.apply(&NullSurface, actions).await;
        assert_eq!(out.finished.as_deref(), Some("all set"));
        assert_eq!(out.executed.len(), 1);
    }

    #[tokio::test]
    async fn controller_records_unrecognized_without_dispatch() {
        let controller = Controller::new(2);
        let raw = json!({ "kind": "teleport" });
        let out = controller
            .apply(&NullSurface, vec![ActionRecord::Other(raw.clone())])
            .await;
        assert_eq!(out.executed, vec![ActionRecord::Other(raw)]);
        assert!(out.error.is_none());
    }
}
