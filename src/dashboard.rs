use axum::extract::{Form, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Redirect};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::fs as async_fs;
use tracing::{error, info, warn};

use crate::agent::RunGate;
use crate::config::Config;
use crate::runner;
use crate::trajectory::TRAJECTORY_SUBDIR;
use crate::viewer;

#[derive(Clone)]
struct AppState {
    cfg: Arc<Config>,
    gate: RunGate,
    last_outcome: Arc<Mutex<Option<String>>>,
}

/// Serve the results dashboard: saved-run browsing plus a task form whose
/// submission runs the agent on a background task. The HTTP handlers never
/// block on a run; the gate keeps it to one run at a time.
pub async fn serve(cfg: Config, addr: SocketAddr) -> anyhow::Result<()> {
    let state = AppState {
        cfg: Arc::new(cfg),
        gate: RunGate::new(),
        last_outcome: Arc::new(Mutex::new(None)),
    };
    let app = Router::new()
        .route("/", get(index))
        .route("/run", post(start_run))
        .route("/runs/{id}", get(show_run))
        .route("/runs/{id}/trajectory/{file}", get(screenshot))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "dashboard listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn index(State(state): State<AppState>) -> Html<String> {
    let mut body = String::new();
    body.push_str("<h1>Browser Task Results</h1>");

    if state.gate.is_busy() {
        body.push_str("<p class=\"status\">Task is running...</p>");
    } else if let Some(msg) = state.last_outcome.lock().unwrap().clone() {
        body.push_str(&format!("<p class=\"status\">{}</p>", escape(&msg)));
    }

    body.push_str(
        "<form method=\"post\" action=\"/run\">\
         <textarea name=\"task\" rows=\"4\" cols=\"80\" \
         placeholder=\"Enter task...\"></textarea><br>\
         <button type=\"submit\">Run Task</button></form>",
    );

    body.push_str("<h2>Saved Runs</h2>");
    match viewer::list_runs(&state.cfg.results_dir).await {
        Ok(runs) if runs.is_empty() => {
            body.push_str("<p>No results found. Run a task first!</p>");
        }
        Ok(runs) => {
            body.push_str("<ul>");
            for run in runs {
                let id = escape(&run.id);
                body.push_str(&format!("<li><a href=\"/runs/{id}\">{id}</a></li>"));
            }
            body.push_str("</ul>");
        }
        Err(e) => {
            error!("listing runs failed: {}", e);
            body.push_str("<p>Could not read the results directory.</p>");
        }
    }

    page("Browser Task Results", &body)
}

#[derive(Deserialize)]
struct RunForm {
    task: String,
}

async fn start_run(State(state): State<AppState>, Form(form): Form<RunForm>) -> Redirect {
    let task = form.task.trim().to_string();
    if task.is_empty() {
        set_outcome(&state, "Please enter a task.");
        return Redirect::to("/");
    }
    match state.gate.try_acquire() {
        None => {
            warn!("run rejected: a task is already running");
            set_outcome(
                &state,
                "A task is already running. Please wait for it to complete.",
            );
        }
        Some(token) => {
            let cfg = Arc::clone(&state.cfg);
            let last_outcome = Arc::clone(&state.last_outcome);
            tokio::spawn(async move {
                let message = match runner::run_task(&cfg, &task).await {
                    Ok(outcome) => format!(
                        "Task completed ({} steps), saved to {}",
                        outcome.history.steps.len(),
                        outcome.run_dir.display()
                    ),
                    Err(e) => {
                        error!("task failed: {:#}", e);
                        format!("Error during task: {e:#}")
                    }
                };
                *last_outcome.lock().unwrap() = Some(message);
                drop(token);
            });
        }
    }
    Redirect::to("/")
}

async fn show_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Html<String>, StatusCode> {
    if !safe_component(&id) {
        return Err(StatusCode::BAD_REQUEST);
    }
    let dir = state.cfg.results_dir.join(&id);
    let view = viewer::load_run(&dir)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;

    let mut body = String::new();
    body.push_str(&format!("<p><a href=\"/\">&larr; all runs</a></p><h1>Run {}</h1>", escape(&view.id)));

    body.push_str("<h2>Screenshots</h2>");
    if view.screenshots.is_empty() {
        body.push_str("<p>No screenshots were captured for this run.</p>");
    }
    for shot in &view.screenshots {
        let file = shot
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        body.push_str(&format!(
            "<figure><figcaption>Step {}</figcaption>\
             <img src=\"/runs/{}/trajectory/{}\" alt=\"Step {}\"></figure>",
            shot.step + 1,
            escape(&view.id),
            escape(&file),
            shot.step + 1,
        ));
    }

    if let Some(info) = &view.info {
        body.push_str("<h2>Extracted Information</h2>");
        if !info.urls.is_empty() {
            body.push_str("<h3>URLs Visited</h3><ul>");
            for url in &info.urls {
                body.push_str(&format!("<li>{}</li>", escape(url)));
            }
            body.push_str("</ul>");
        }
        if !info.actions.is_empty() {
            let doc = serde_json::to_string_pretty(&info.actions).unwrap_or_default();
            body.push_str(&format!("<h3>Actions Taken</h3><pre>{}</pre>", escape(&doc)));
        }
        if !info.extracted_content.is_empty() {
            body.push_str("<h3>Extracted Content</h3><ul>");
            for item in &info.extracted_content {
                body.push_str(&format!("<li>{}</li>", escape(item)));
            }
            body.push_str("</ul>");
        }
    }

    Ok(page(&format!("Run {}", view.id), &body))
}

async fn screenshot(
    State(state): State<AppState>,
    Path((id, file)): Path<(String, String)>,
) -> Result<impl IntoResponse, StatusCode> {
    if !safe_component(&id) || viewer::step_ordinal(&file).is_none() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let path = state
        .cfg
        .results_dir
        .join(&id)
        .join(TRAJECTORY_SUBDIR)
        .join(&file);
    let bytes = async_fs::read(&path)
        .await
        .map_err(|_| StatusCode::NOT_FOUND)?;
    Ok(([(header::CONTENT_TYPE, "image/png")], bytes))
}

fn set_outcome(state: &AppState, message: &str) {
    *state.last_outcome.lock().unwrap() = Some(message.to_string());
}

fn safe_component(s: &str) -> bool {
    !s.is_empty() && s != "." && s != ".." && !s.contains(['/', '\\'])
}

fn page(title: &str, body: &str) -> Html<String> {
    Html(format!(
        "<!doctype html><html><head><meta charset=\"utf-8\">\
         <title>{}</title>\
         <style>\
         body {{ font-family: sans-serif; margin: 2rem auto; max-width: 60rem; }}\
         img {{ max-width: 100%; border: 1px solid #ccc; }}\
         pre {{ background: #f4f4f4; padding: 1rem; overflow-x: auto; }}\
         .status {{ background: #eef; padding: 0.5rem 1rem; }}\
         </style></head><body>{}</body></html>",
        escape(title),
        body
    ))
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
