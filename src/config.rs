use std::env;
use std::path::PathBuf;
use thiserror::Error;

pub const ENV_API_KEY: &str = "GEMINI_API_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{ENV_API_KEY} environment variable is not set")]
    MissingApiKey,
    #[error("invalid value for {var}: {value}")]
    Invalid { var: String, value: String },
}

/// Process-wide settings, resolved once at startup.
///
/// Values come from the environment (a `.env` file is honored when present).
/// The API key is a hard precondition: nothing network- or browser-facing is
/// constructed before it resolves.
#[derive(Clone, Debug)]
pub struct Config {
    pub api_key: String,
    pub model: String,
    pub api_base: String,
    pub results_dir: PathBuf,
    pub headless: bool,
    pub max_steps: usize,
    pub max_actions_per_step: usize,
    pub use_vision: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        // Best-effort: a missing .env file is not an error.
        let _ = dotenvy::dotenv();

        let api_key = env::var(ENV_API_KEY).unwrap_or_default();
        if api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }

        Ok(Self {
            api_key,
            model: env::var("GEMINI_MODEL").unwrap_or_else(|_| "gemini-2.0-flash-lite".into()),
            api_base: env::var("GEMINI_BASE_URL")
                .unwrap_or_else(|_| "https://generativelanguage.googleapis.com/v1beta".into()),
            results_dir: env::var("WEBTRAILS_RESULTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(crate::trajectory::DEFAULT_RESULTS_DIR)),
            headless: env_flag("WEBTRAILS_HEADLESS", true)?,
            max_steps: env_usize("WEBTRAILS_MAX_STEPS", 25)?,
            max_actions_per_step: env_usize("WEBTRAILS_MAX_ACTIONS_PER_STEP", 1)?,
            use_vision: env_flag("WEBTRAILS_USE_VISION", true)?,
        })
    }
}

fn env_flag(var: &str, default: bool) -> Result<bool, ConfigError> {
    match env::var(var) {
        Err(_) => Ok(default),
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::Invalid { var: var.into(), value: raw }),
        },
    }
}

fn env_usize(var: &str, default: usize) -> Result<usize, ConfigError> {
    match env::var(var) {
        Err(_) => Ok(default),
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            var: var.into(),
            value: raw,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_parsing() {
        std::env::set_var("WEBTRAILS_TEST_FLAG", "off");
        assert!(!env_flag("WEBTRAILS_TEST_FLAG", true).unwrap());
        std::env::set_var("WEBTRAILS_TEST_FLAG", "maybe");
        assert!(env_flag("WEBTRAILS_TEST_FLAG", true).is_err());
        std::env::remove_var("WEBTRAILS_TEST_FLAG");
        assert!(env_flag("WEBTRAILS_TEST_FLAG", true).unwrap());
    }
}
