//! Model-facing types shared by every remote call.
//!
//! The remote service is reached only through [`LlmTransport`]; the
//! [`gateway::Gateway`] wraps a transport with retry and backoff, and
//! [`gemini::GeminiClient`] is the production transport.

pub mod gateway;
pub mod gemini;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use gateway::{Gateway, GatewayFailure, RetryPolicy, Sleeper, TokioSleeper};
pub use gemini::GeminiClient;

/// Identifier prefix of every remote content cache.
pub const CACHE_HANDLE_PREFIX: &str = "cachedContents/";

/// Processing state of an uploaded file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileState {
    StateUnspecified,
    Processing,
    Active,
    Failed,
}

/// A file uploaded to the remote service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceFile {
    /// Remote resource name, e.g. `files/abc123`
    pub name: String,

    /// URI used when the file is attached to a prompt
    pub uri: String,

    pub display_name: String,

    pub mime_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_path: Option<PathBuf>,

    pub state: FileState,
}

impl ReferenceFile {
    /// Short identifier without the `files/` collection prefix.
    pub fn id(&self) -> &str {
        self.name.strip_prefix("files/").unwrap_or(&self.name)
    }

    /// Whether `file_id` designates this file (with or without the `files/` prefix).
    pub fn matches(&self, file_id: &str) -> bool {
        let wanted = file_id.trim();
        wanted == self.name || wanted == self.id()
    }
}

/// Handle to a named remote content cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheHandle {
    /// Resource name, always starting with [`CACHE_HANDLE_PREFIX`]
    pub id: String,

    /// Expiry reported by the service; unknown for handles recovered from text
    pub expires_at: Option<DateTime<Utc>>,
}

impl CacheHandle {
    pub fn new(id: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            id: id.into(),
            expires_at,
        }
    }

    /// Recover a handle from a free-form answer that starts with the cache prefix.
    pub fn from_text(text: &str) -> Option<Self> {
        let token = text.trim_start().split_whitespace().next()?;
        let token = token.trim_end_matches(|c: char| matches!(c, '.' | ',' | ';' | '`' | '"'));
        if token.starts_with(CACHE_HANDLE_PREFIX) && token.len() > CACHE_HANDLE_PREFIX.len() {
            Some(Self::new(token, None))
        } else {
            None
        }
    }

    /// Whether the handle is known to have expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// One item of a prompt, transmitted in order.
#[derive(Debug, Clone, PartialEq)]
pub enum PromptPart {
    Text(String),
    File(ReferenceFile),
    InlineData { mime_type: String, data: Vec<u8> },
    /// Echo of a tool request previously emitted by the model.
    ToolCall(ToolRequest),
    /// Result of a tool invocation, returned to the model.
    ToolResult { name: String, output: String },
}

impl PromptPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Model,
}

/// A turn of the conversation sent to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct Content {
    pub role: Role,
    pub parts: Vec<PromptPart>,
}

impl Content {
    pub fn user(parts: Vec<PromptPart>) -> Self {
        Self {
            role: Role::User,
            parts,
        }
    }

    pub fn model(parts: Vec<PromptPart>) -> Self {
        Self {
            role: Role::Model,
            parts,
        }
    }
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolRequest {
    pub name: String,
    pub args: Value,
    /// Opaque signature the service expects back when the call is echoed.
    pub thought_signature: Option<String>,
}

/// A classified part of a model response.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponsePart {
    Thought(String),
    Text(String),
    Blob { mime_type: String, data: Vec<u8> },
    ToolRequest(ToolRequest),
}

/// A successful model response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    pub parts: Vec<ResponsePart>,
}

impl ModelResponse {
    pub fn new(parts: Vec<ResponsePart>) -> Self {
        Self { parts }
    }

    pub fn parts(&self) -> impl Iterator<Item = &ResponsePart> {
        self.parts.iter()
    }

    /// Final answer: text parts concatenated in arrival order, thoughts excluded.
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|part| match part {
                ResponsePart::Text(text) => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    pub fn tool_requests(&self) -> impl Iterator<Item = &ToolRequest> {
        self.parts.iter().filter_map(|part| match part {
            ResponsePart::ToolRequest(request) => Some(request),
            _ => None,
        })
    }

    /// First binary blob, with its MIME type.
    pub fn first_blob(&self) -> Option<(&str, &[u8])> {
        self.parts.iter().find_map(|part| match part {
            ResponsePart::Blob { mime_type, data } => Some((mime_type.as_str(), data.as_slice())),
            _ => None,
        })
    }
}

/// Generation options recognized by the gateway.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationConfig {
    /// Strictly typed response body, e.g. `application/json`
    pub response_mime_type: Option<String>,

    /// Declared shape the response body must follow
    pub response_schema: Option<Value>,

    /// Bound on internal reasoning; negative means unbounded
    pub thinking_budget: Option<i32>,

    /// Partition the response into thought and final parts
    pub include_thoughts: Option<bool>,

    /// Bind the call to a named content cache
    pub cached_content: Option<String>,

    /// Output modalities, e.g. `["TEXT", "IMAGE"]` for image generation
    pub response_modalities: Option<Vec<String>>,
}

/// Declaration of a tool the model may request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// A generateContent request.
#[derive(Debug, Clone, PartialEq)]
pub struct LlmRequest {
    pub model: String,
    pub contents: Vec<Content>,
    pub system_instruction: Option<String>,
    pub tools: Vec<ToolDeclaration>,
    pub config: GenerationConfig,
}

impl LlmRequest {
    /// Single user turn made of `parts`.
    pub fn new(model: impl Into<String>, parts: Vec<PromptPart>) -> Self {
        Self {
            model: model.into(),
            contents: vec![Content::user(parts)],
            system_instruction: None,
            tools: Vec::new(),
            config: GenerationConfig::default(),
        }
    }

    pub fn with_system_instruction(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDeclaration>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_config(mut self, config: GenerationConfig) -> Self {
        self.config = config;
        self
    }

    /// Prompt parts of the first user turn.
    pub fn prompt_parts(&self) -> &[PromptPart] {
        self.contents
            .first()
            .map(|c| c.parts.as_slice())
            .unwrap_or(&[])
    }
}

/// Request to materialize a named content cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheRequest {
    pub model: String,
    pub files: Vec<ReferenceFile>,
    pub system_instruction: Option<String>,
    /// Tools stored with the cache; calls bound to it cannot declare their own.
    pub tools: Vec<ToolDeclaration>,
    pub ttl: Duration,
    pub display_name: Option<String>,
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to decode response: {0}")]
    Serialization(String),

    #[error("Model returned no candidates")]
    EmptyResponse,

    #[error("Prompt blocked: {0}")]
    Blocked(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LlmError {
    /// Short classification recorded for each failed attempt.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Http(_) => "transport",
            Self::Timeout(_) => "timeout",
            Self::Api { status: 429, .. } => "rate_limit",
            Self::Api { status, .. } if *status >= 500 => "server_error",
            Self::Api { .. } => "client_error",
            Self::Serialization(_) => "decode",
            Self::EmptyResponse => "empty_response",
            Self::Blocked(_) => "blocked",
            Self::Io(_) => "io",
        }
    }
}

/// Opaque RPC surface of the remote model service.
#[async_trait]
pub trait LlmTransport: Send + Sync {
    /// Generate content (text, thoughts, tool requests or images).
    async fn generate(&self, request: &LlmRequest) -> Result<ModelResponse, LlmError>;

    /// Upload a local file and return its remote handle.
    async fn upload_file(
        &self,
        path: &Path,
        display_name: &str,
        mime_type: &str,
    ) -> Result<ReferenceFile, LlmError>;

    /// List files previously uploaded with this credential.
    async fn list_files(&self) -> Result<Vec<ReferenceFile>, LlmError>;

    /// Fetch the current metadata of one file.
    async fn get_file(&self, name: &str) -> Result<ReferenceFile, LlmError>;

    /// Materialize a named content cache.
    async fn create_cache(&self, request: &CacheRequest) -> Result<CacheHandle, LlmError>;
}
