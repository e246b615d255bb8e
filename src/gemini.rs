use anyhow::{bail, Context, Result};
use reqwest::Client;
use serde_json::{json, Value};
use std::env;

#[derive(Clone)]
pub struct GeminiConfig {
    pub api_base: String, // e.g. "https://generativelanguage.googleapis.com/v1beta"
    pub api_key: String,  // env GEMINI_API_KEY
    pub model: String,    // e.g. "gemini-2.0-flash-lite"
    pub temperature: f64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_base: env::var("GEMINI_BASE_URL")
                .unwrap_or_else(|_| "https://generativelanguage.googleapis.com/v1beta".into()),
            api_key: env::var(crate::config::ENV_API_KEY).unwrap_or_default(),
            model: env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-2.0-flash-lite".into()),
            temperature: 0.7,
        }
    }
}

impl From<&crate::config::Config> for GeminiConfig {
    fn from(cfg: &crate::config::Config) -> Self {
        Self {
            api_base: cfg.api_base.clone(),
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            temperature: 0.7,
        }
    }
}

#[derive(Clone)]
pub struct GeminiClient {
    http: Client,
    cfg: GeminiConfig,
}

impl GeminiClient {
    pub fn new(cfg: GeminiConfig) -> Result<Self> {
        if cfg.api_key.trim().is_empty() {
            bail!("{} missing", crate::config::ENV_API_KEY);
        }
        Ok(Self {
            http: Client::new(),
            cfg,
        })
    }

    pub fn model(&self) -> &str {
        &self.cfg.model
    }

    /// One-shot free-text generation. Used by the availability probe and any
    /// caller that wants a plain completion rather than a planning turn.
    pub async fn generate(&self, prompt: &str) -> Result<String> {
        let parts = vec![json!({ "text": prompt })];
        self.request(parts, false).await
    }

    /// A planning turn: the composed instruction text plus, when available,
    /// the current screenshot as an inline PNG part. The model is asked for a
    /// JSON reply; decoding happens at the planner layer.
    pub async fn plan_turn(&self, prompt: &str, screenshot_b64: Option<&str>) -> Result<String> {
        let mut parts = vec![json!({ "text": prompt })];
        if let Some(b64) = screenshot_b64 {
            parts.push(json!({
                "inline_data": { "mime_type": "image/png", "data": b64 }
            }));
        }
        self.request(parts, true).await
    }

    async fn request(&self, parts: Vec<Value>, json_reply: bool) -> Result<String> {
        let url = format!(
            "{}/models/{}:generateContent",
            self.cfg.api_base, self.cfg.model
        );
        let mut generation_config = json!({
            "temperature": self.cfg.temperature,
            "candidateCount": 1,
        });
        if json_reply {
            generation_config["responseMimeType"] = Value::String("application/json".into());
        }
        let req = json!({
            "contents": [ { "role": "user", "parts": parts } ],
            "generationConfig": generation_config,
        });

        let resp = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.cfg.api_key)
            .json(&req)
            .send()
            .await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            bail!("Gemini error {}: {}", status, text);
        }
        let v: Value =
            serde_json::from_str(&text).context("failed to parse Gemini response JSON")?;
        Self::extract_text(&v)
    }

    fn extract_text(v: &Value) -> Result<String> {
        v.pointer("/candidates/0/content/parts/0/text")
            .and_then(|x| x.as_str())
            .map(|s| s.to_string())
            .context("Gemini response carried no text part")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_key() {
        let cfg = GeminiConfig {
            api_base: "https://example.invalid".into(),
            api_key: "  ".into(),
            model: "gemini-2.0-flash-lite".into(),
            temperature: 0.7,
        };
        assert!(GeminiClient::new(cfg).is_err());
    }

    #[test]
    fn extracts_candidate_text() {
        let v = json!({
            "candidates": [
                { "content": { "parts": [ { "text": "pong" } ], "role": "model" } }
            ]
        });
        assert_eq!(GeminiClient::extract_text(&v).unwrap(), "pong");
        assert!(GeminiClient::extract_text(&json!({ "candidates": [] })).is_err());
    }
}
