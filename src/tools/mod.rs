//! Tools the model may request during a sub-task.
//!
//! Each tool is synchronous from the worker's point of view and always
//! answers with a short human-readable string. Failures are returned as
//! `Err` and handed back to the model as `"Error: ..."` text.

mod cache;
mod files;
mod image;
mod web;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::Config;
use crate::llm::{CacheHandle, Gateway, ReferenceFile, ToolDeclaration};
use crate::session::Session;

pub use cache::CreateCache;
pub use files::{sanitize_filename, SaveFile};
pub use image::GenerateImage;
pub use web::{FetchUrl, WebSearch};

/// A callable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the arguments object.
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<ToolOutput>;
}

/// What a tool hands back: the string for the model, plus any cache it created.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub text: String,
    pub cache: Option<CacheHandle>,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            cache: None,
        }
    }

    /// The cache identifier is the text returned to the model.
    pub fn cache(handle: CacheHandle) -> Self {
        Self {
            text: handle.id.clone(),
            cache: Some(handle),
        }
    }
}

/// Everything a tool may touch while executing.
#[derive(Clone)]
pub struct ToolContext {
    pub gateway: Arc<Gateway>,
    pub output_dir: PathBuf,
    /// Model that content caches are created for.
    pub text_model: String,
    pub image_model: String,
    /// Reference files of the current workflow, used to resolve file ids.
    pub references: Vec<ReferenceFile>,
    pub default_cache_ttl: Duration,
    /// Persona stored in caches created during the sub-task.
    pub cache_instruction: Option<String>,
    /// Tool declarations stored in caches created during the sub-task.
    pub cache_tools: Vec<ToolDeclaration>,
}

impl ToolContext {
    pub fn new(session: &Session, gateway: Arc<Gateway>, references: Vec<ReferenceFile>) -> Self {
        let config = session.config();
        Self {
            gateway,
            output_dir: session.layout().outputs_dir.clone(),
            text_model: config.text_model.clone(),
            image_model: config.image_model.clone(),
            references,
            default_cache_ttl: config.cache_ttl,
            cache_instruction: None,
            cache_tools: Vec::new(),
        }
    }

    /// Persona and tools that calls bound to a new cache will rely on.
    pub fn with_cache_defaults(mut self, instruction: String, tools: Vec<ToolDeclaration>) -> Self {
        self.cache_instruction = Some(instruction);
        self.cache_tools = tools;
        self
    }
}

/// Name and description of a registered tool.
#[derive(Debug, Clone)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
}

/// Ordered set of tools offered to the model.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard tool set: save_file, generate_image, create_cache and,
    /// when enabled, the web helpers.
    pub fn standard(config: &Config) -> Self {
        let mut registry = Self::new();
        registry.register(SaveFile);
        registry.register(GenerateImage);
        registry.register(CreateCache);
        if config.web_tools {
            registry.register(WebSearch);
            registry.register(FetchUrl);
        }
        registry
    }

    /// Add a tool; a tool with the same name is replaced.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.retain(|t| t.name() != tool.name());
        self.tools.push(Box::new(tool));
    }

    pub fn list_tools(&self) -> Vec<ToolInfo> {
        self.tools
            .iter()
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
            })
            .collect()
    }

    /// Declarations sent with model calls.
    pub fn declarations(&self) -> Vec<ToolDeclaration> {
        self.tools
            .iter()
            .map(|t| ToolDeclaration {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    pub async fn execute(
        &self,
        name: &str,
        args: Value,
        ctx: &ToolContext,
    ) -> anyhow::Result<ToolOutput> {
        let tool = self
            .tools
            .iter()
            .find(|t| t.name() == name)
            .ok_or_else(|| anyhow::anyhow!("Unknown tool: {}", name))?;
        tool.execute(args, ctx).await
    }
}
