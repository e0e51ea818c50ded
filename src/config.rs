//! Configuration management for conductor.
//!
//! Configuration can be set via environment variables:
//! - `GEMINI_API_KEY` - Required. Your Gemini API key.
//! - `GEMINI_API_BASE` - Optional. REST endpoint root. Defaults to `https://generativelanguage.googleapis.com`.
//! - `CONDUCTOR_MODEL` - Optional. Text model for planning and execution. Defaults to `gemini-2.5-pro`.
//! - `CONDUCTOR_IMAGE_MODEL` - Optional. Image generation model.
//! - `CONDUCTOR_WORKDIR` - Optional. Root of the logs/outputs tree. Defaults to current directory.
//! - `CONDUCTOR_MAX_ATTEMPTS` - Optional. Attempts per remote call. Defaults to `3`.
//! - `CONDUCTOR_RETRY_DELAY_SECS` - Optional. Delay before the first retry. Defaults to `5`.
//! - `CONDUCTOR_BACKOFF_FACTOR` - Optional. Multiplier applied per retry. Defaults to `2`.
//! - `CONDUCTOR_REQUEST_TIMEOUT_SECS` - Optional. Per-request transport timeout. Defaults to `600`.
//! - `CONDUCTOR_PLANNER_THINKING_BUDGET` - Optional. Thinking budget for the planner. Defaults to `1024`.
//! - `CONDUCTOR_MAX_TOOL_ROUNDS` - Optional. Tool rounds per sub-task. Defaults to `8`.
//! - `CONDUCTOR_CACHE_TTL_SECS` - Optional. Default content cache TTL. Defaults to `3600`.
//! - `CONDUCTOR_WEB_TOOLS` - Optional. Expose web search/fetch tools to the model. Defaults to `true`.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Retry settings applied to every remote call.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first one.
    pub max_attempts: u32,

    /// Wait before the first retry.
    pub initial_delay: Duration,

    /// Multiplier applied to the wait after each failed retry.
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
        }
    }
}

/// Directory tree under the working directory.
#[derive(Debug, Clone)]
pub struct Layout {
    pub root: PathBuf,
    pub logs_dir: PathBuf,
    pub outputs_dir: PathBuf,
    pub uploads_cache_dir: PathBuf,
    pub temp_artifacts_dir: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            logs_dir: root.join("logs"),
            outputs_dir: root.join("outputs"),
            uploads_cache_dir: root.join("uploads_cache"),
            temp_artifacts_dir: root.join("temp_artifacts"),
            root,
        }
    }

    /// Create every directory of the tree.
    pub fn ensure(&self) -> std::io::Result<()> {
        for dir in [
            &self.logs_dir,
            &self.outputs_dir,
            &self.uploads_cache_dir,
            &self.temp_artifacts_dir,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Gemini API key
    pub api_key: String,

    /// REST endpoint root (without version segment)
    pub api_base: String,

    /// Model used by the planner, the worker and content caches
    pub text_model: String,

    /// Model used by the image generation tool
    pub image_model: String,

    /// Root of logs/, outputs/, uploads_cache/ and temp_artifacts/
    pub working_dir: PathBuf,

    /// Retry policy for remote calls
    pub retry: RetryConfig,

    /// Per-request transport timeout
    pub request_timeout: Duration,

    /// Thinking budget for the planner call (bounded)
    pub planner_thinking_budget: i32,

    /// Upper bound on tool-invocation rounds within one sub-task
    pub max_tool_rounds: usize,

    /// Default TTL for content caches created by the model
    pub cache_ttl: Duration,

    /// Whether web_search / fetch_url are offered to the model
    pub web_tools: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `GEMINI_API_KEY` is not set.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = std::env::var("GEMINI_API_KEY")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("GEMINI_API_KEY".to_string()))?;

        let working_dir = std::env::var("CONDUCTOR_WORKDIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        let mut config = Self::new(api_key, working_dir);

        if let Ok(base) = std::env::var("GEMINI_API_BASE") {
            config.api_base = base.trim_end_matches('/').to_string();
        }
        if let Ok(model) = std::env::var("CONDUCTOR_MODEL") {
            config.text_model = model;
        }
        if let Ok(model) = std::env::var("CONDUCTOR_IMAGE_MODEL") {
            config.image_model = model;
        }

        config.retry.max_attempts = env_parse("CONDUCTOR_MAX_ATTEMPTS", config.retry.max_attempts)?;
        if config.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "CONDUCTOR_MAX_ATTEMPTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        config.retry.initial_delay = Duration::from_secs(env_parse(
            "CONDUCTOR_RETRY_DELAY_SECS",
            config.retry.initial_delay.as_secs(),
        )?);
        config.retry.backoff_factor =
            env_parse("CONDUCTOR_BACKOFF_FACTOR", config.retry.backoff_factor)?;
        if !config.retry.backoff_factor.is_finite() || config.retry.backoff_factor < 1.0 {
            return Err(ConfigError::InvalidValue(
                "CONDUCTOR_BACKOFF_FACTOR".to_string(),
                "must be a finite number >= 1".to_string(),
            ));
        }

        config.request_timeout = Duration::from_secs(env_parse(
            "CONDUCTOR_REQUEST_TIMEOUT_SECS",
            config.request_timeout.as_secs(),
        )?);
        config.planner_thinking_budget = env_parse(
            "CONDUCTOR_PLANNER_THINKING_BUDGET",
            config.planner_thinking_budget,
        )?;
        config.max_tool_rounds = env_parse("CONDUCTOR_MAX_TOOL_ROUNDS", config.max_tool_rounds)?;
        config.cache_ttl = Duration::from_secs(env_parse(
            "CONDUCTOR_CACHE_TTL_SECS",
            config.cache_ttl.as_secs(),
        )?);

        config.web_tools = std::env::var("CONDUCTOR_WEB_TOOLS")
            .ok()
            .map(|v| {
                parse_bool(&v)
                    .map_err(|e| ConfigError::InvalidValue("CONDUCTOR_WEB_TOOLS".to_string(), e))
            })
            .transpose()?
            .unwrap_or(true);

        Ok(config)
    }

    /// Create a config with default values (useful for testing).
    pub fn new(api_key: String, working_dir: PathBuf) -> Self {
        Self {
            api_key,
            api_base: "https://generativelanguage.googleapis.com".to_string(),
            text_model: "gemini-2.5-pro".to_string(),
            image_model: "gemini-2.0-flash-preview-image-generation".to_string(),
            working_dir,
            retry: RetryConfig::default(),
            request_timeout: Duration::from_secs(600),
            planner_thinking_budget: 1024,
            max_tool_rounds: 8,
            cache_ttl: Duration::from_secs(3600),
            web_tools: true,
        }
    }

    /// Directory tree rooted at the working directory.
    pub fn layout(&self) -> Layout {
        Layout::new(&self.working_dir)
    }
}

fn env_parse<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "t" | "yes" | "y" | "on" => Ok(true),
        "0" | "false" | "f" | "no" | "n" | "off" => Ok(false),
        other => Err(format!("expected boolean-like value, got: {}", other)),
    }
}
