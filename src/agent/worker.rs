//! Sub-task execution.
//!
//! The worker follows a "tools in a loop" pattern:
//! 1. Build the prompt from the goal, prior results and reference files
//! 2. Call the model with the tool registry
//! 3. Execute requested tools and feed their results back
//! 4. Repeat until the model stops requesting tools or the round limit is hit

use std::sync::Arc;

use chrono::Utc;

use crate::llm::{
    CacheHandle, Content, Gateway, GenerationConfig, LlmRequest, PromptPart, ReferenceFile,
    ResponsePart,
};
use crate::session::{LogSink, Session};
use crate::tools::{ToolContext, ToolRegistry};

use super::ledger::{ExecutionLedger, SubTaskResult};
use super::prompt::{build_task_parts, build_worker_prompt};

/// Final answer of a sub-task that produced only tool side effects.
pub const TOOLS_ONLY_SENTINEL: &str = "action completed via tools";

/// Final answer of a sub-task whose model call failed after all retries.
pub const FAILURE_SENTINEL: &str = "Sub-task failed: the model call did not succeed after all retries.";

const MAX_LOGGED_TOOL_RESULT: usize = 1_000;

/// Executes one sub-task at a time. Holds no state between sub-tasks.
pub struct Worker {
    session: Session,
    gateway: Arc<Gateway>,
    tools: ToolRegistry,
    log: Arc<dyn LogSink>,
}

impl Worker {
    pub fn new(session: &Session, gateway: Arc<Gateway>) -> Self {
        Self::with_tools(session, gateway, ToolRegistry::standard(session.config()))
    }

    pub fn with_tools(session: &Session, gateway: Arc<Gateway>, tools: ToolRegistry) -> Self {
        Self {
            session: session.clone(),
            gateway,
            tools,
            log: session.log(),
        }
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Run `sub_task` to completion. Never fails: an unreachable model
    /// yields a result carrying [`FAILURE_SENTINEL`].
    pub async fn execute(
        &self,
        sub_task: &str,
        prior: &ExecutionLedger,
        references: &[ReferenceFile],
        goal: &str,
    ) -> SubTaskResult {
        self.log.write("Worker", &format!("Executing sub-task: {}", sub_task));

        let cache = self.propagated_cache(prior);
        let parts = build_task_parts(goal, sub_task, prior, references, cache.is_none());

        let persona = build_worker_prompt(&self.tools);
        let declarations = self.tools.declarations();
        let request = LlmRequest::new(&self.session.config().text_model, parts)
            .with_system_instruction(persona.clone())
            .with_tools(declarations.clone())
            .with_config(GenerationConfig {
                thinking_budget: Some(-1),
                include_thoughts: Some(true),
                cached_content: cache.map(|c| c.id),
                ..Default::default()
            });

        let ctx = ToolContext::new(&self.session, self.gateway.clone(), references.to_vec())
            .with_cache_defaults(persona, declarations);
        match self.run_tool_loop(request, &ctx).await {
            Some((text, created_cache)) => {
                let text = if text.trim().is_empty() {
                    TOOLS_ONLY_SENTINEL.to_string()
                } else {
                    text
                };
                let cache_handle = created_cache.or_else(|| CacheHandle::from_text(&text));
                self.log.write("Worker", &format!("Result: {}", text));
                SubTaskResult::completed(text, cache_handle)
            }
            None => SubTaskResult::failed(FAILURE_SENTINEL),
        }
    }

    /// Cache handle surfaced by the immediately preceding sub-task, unless
    /// it is known to have expired.
    fn propagated_cache(&self, prior: &ExecutionLedger) -> Option<CacheHandle> {
        let last = prior.last()?;
        let handle = last
            .result
            .cache_handle
            .clone()
            .or_else(|| CacheHandle::from_text(&last.result.text))?;

        if handle.is_expired_at(Utc::now()) {
            self.log.write(
                "Worker",
                &format!(
                    "Cache {} has expired; attaching reference files instead",
                    handle.id
                ),
            );
            return None;
        }
        self.log.write("Worker", &format!("Using cache {}", handle.id));
        Some(handle)
    }

    /// Returns the concatenated answer text and the last cache created by a
    /// tool, or `None` when a model call failed.
    async fn run_tool_loop(
        &self,
        mut request: LlmRequest,
        ctx: &ToolContext,
    ) -> Option<(String, Option<CacheHandle>)> {
        let max_rounds = self.session.config().max_tool_rounds;
        let mut answer = String::new();
        let mut created_cache = None;
        let mut round = 0;

        loop {
            let response = match self.gateway.call(&request).await {
                Ok(response) => response,
                Err(failure) => {
                    self.log.write("Worker", &format!("Model call failed: {}", failure));
                    return None;
                }
            };

            let mut echoed = Vec::new();
            let mut calls = Vec::new();
            for part in response.parts() {
                match part {
                    ResponsePart::Thought(thought) => self.log.write("Worker thought", thought),
                    ResponsePart::Text(text) => {
                        answer.push_str(text);
                        echoed.push(PromptPart::Text(text.clone()));
                    }
                    ResponsePart::ToolRequest(call) => {
                        echoed.push(PromptPart::ToolCall(call.clone()));
                        calls.push(call.clone());
                    }
                    ResponsePart::Blob { .. } => {}
                }
            }

            if calls.is_empty() {
                return Some((answer, created_cache));
            }
            if round >= max_rounds {
                self.log.write(
                    "Worker",
                    &format!(
                        "Tool round limit ({}) reached; ignoring {} pending tool request(s)",
                        max_rounds,
                        calls.len()
                    ),
                );
                return Some((answer, created_cache));
            }
            round += 1;

            let mut results = Vec::with_capacity(calls.len());
            for call in calls {
                self.log.write(
                    "Tool",
                    &format!("Calling {} with args: {}", call.name, call.args),
                );
                let output = match self.tools.execute(&call.name, call.args, ctx).await {
                    Ok(output) => {
                        if output.cache.is_some() {
                            created_cache = output.cache;
                        }
                        output.text
                    }
                    Err(e) => format!("Error: {}", e),
                };
                self.log.write(
                    "Tool",
                    &format!("{} returned: {}", call.name, truncate_for_log(&output)),
                );
                results.push(PromptPart::ToolResult {
                    name: call.name,
                    output,
                });
            }

            request.contents.push(Content::model(echoed));
            request.contents.push(Content::user(results));
        }
    }
}

fn truncate_for_log(s: &str) -> String {
    match s.char_indices().nth(MAX_LOGGED_TOOL_RESULT) {
        Some((idx, _)) => format!("{}... [truncated]", &s[..idx]),
        None => s.to_string(),
    }
}
