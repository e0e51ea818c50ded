//! Content cache tool.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::llm::{CacheRequest, ReferenceFile};

use super::{Tool, ToolContext, ToolOutput};

/// Bundle uploaded files (and an optional system instruction) into a
/// remote content cache that later sub-tasks can reuse.
pub struct CreateCache;

#[async_trait]
impl Tool for CreateCache {
    fn name(&self) -> &str {
        "create_cache"
    }

    fn description(&self) -> &str {
        "Create a content cache from uploaded reference files so later steps can reuse them cheaply. Returns the cache identifier (starting with 'cachedContents/'). Reply with that identifier as your final answer so the next step can use the cache."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_ids": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "IDs of uploaded files to include, e.g. 'files/abc123'"
                },
                "system_instruction": {
                    "type": "string",
                    "description": "Optional: system instruction stored with the cache"
                },
                "ttl_seconds": {
                    "type": "integer",
                    "description": "Optional: lifetime of the cache in seconds (default: 3600)"
                }
            },
            "required": ["file_ids"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<ToolOutput> {
        let file_ids: Vec<&str> = args["file_ids"]
            .as_array()
            .map(|ids| ids.iter().filter_map(|v| v.as_str()).collect())
            .unwrap_or_default();
        if file_ids.is_empty() {
            return Err(anyhow::anyhow!("'file_ids' must list at least one uploaded file"));
        }

        let mut files: Vec<ReferenceFile> = Vec::with_capacity(file_ids.len());
        for id in file_ids {
            let file = match ctx.references.iter().find(|f| f.matches(id)) {
                Some(file) => file.clone(),
                None => ctx
                    .gateway
                    .get_file(id.trim())
                    .await
                    .map_err(|e| anyhow::anyhow!("Could not resolve file '{}': {}", id, e))?,
            };
            files.push(file);
        }

        let requested = args["system_instruction"]
            .as_str()
            .map(str::trim)
            .filter(|s| !s.is_empty());
        let system_instruction = match (ctx.cache_instruction.as_deref(), requested) {
            (Some(persona), Some(extra)) => Some(format!("{}\n\n{}", persona, extra)),
            (Some(persona), None) => Some(persona.to_string()),
            (None, extra) => extra.map(str::to_string),
        };

        let ttl = args["ttl_seconds"]
            .as_u64()
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(ctx.default_cache_ttl);

        let request = CacheRequest {
            model: ctx.text_model.clone(),
            files,
            system_instruction,
            tools: ctx.cache_tools.clone(),
            ttl,
            display_name: Some(format!(
                "conductor-{}",
                chrono::Local::now().format("%Y%m%d_%H%M%S")
            )),
        };

        let handle = ctx
            .gateway
            .create_cache(&request)
            .await
            .map_err(|e| anyhow::anyhow!("Cache creation failed: {}", e))?;

        tracing::info!(cache = %handle.id, files = request.files.len(), "Created content cache");
        Ok(ToolOutput::cache(handle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{CacheHandle, LlmError, ToolDeclaration};
    use crate::testing::{reference_file, ScriptedTransport, TestHarness};
    use chrono::Utc;

    #[tokio::test]
    async fn cache_is_created_from_known_references() {
        let transport = ScriptedTransport::new();
        let expires = Utc::now() + chrono::Duration::hours(1);
        transport.push_cache_result(Ok(CacheHandle::new("cachedContents/abc123", Some(expires))));
        let harness = TestHarness::new(transport);
        let references = vec![reference_file("a1", "a.txt"), reference_file("b2", "b.txt")];
        let ctx = ToolContext::new(&harness.session, harness.gateway(), references);

        let output = CreateCache
            .execute(
                json!({ "file_ids": ["files/b2", "a1"], "system_instruction": "Be terse", "ttl_seconds": 600 }),
                &ctx,
            )
            .await
            .unwrap();

        assert_eq!(output.text, "cachedContents/abc123");
        assert_eq!(
            output.cache,
            Some(CacheHandle::new("cachedContents/abc123", Some(expires)))
        );

        let request = &harness.transport.cache_requests()[0];
        let names: Vec<&str> = request.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["files/b2", "files/a1"]);
        assert_eq!(request.system_instruction.as_deref(), Some("Be terse"));
        assert_eq!(request.ttl, Duration::from_secs(600));
        assert_eq!(request.model, ctx.text_model);
    }

    #[tokio::test]
    async fn cache_stores_worker_persona_and_tools() {
        let transport = ScriptedTransport::new();
        transport.push_cache_result(Ok(CacheHandle::new("cachedContents/p", None)));
        let harness = TestHarness::new(transport);
        let declarations = vec![ToolDeclaration {
            name: "save_file".to_string(),
            description: "Save".to_string(),
            parameters: json!({ "type": "object" }),
        }];
        let ctx = ToolContext::new(
            &harness.session,
            harness.gateway(),
            vec![reference_file("a1", "a.txt")],
        )
        .with_cache_defaults("You are a worker.".to_string(), declarations.clone());

        CreateCache
            .execute(json!({ "file_ids": ["a1"], "system_instruction": "Answer in French" }), &ctx)
            .await
            .unwrap();

        let request = &harness.transport.cache_requests()[0];
        assert_eq!(
            request.system_instruction.as_deref(),
            Some("You are a worker.\n\nAnswer in French")
        );
        assert_eq!(request.tools, declarations);
    }

    #[tokio::test]
    async fn default_ttl_is_one_hour() {
        let transport = ScriptedTransport::new();
        transport.push_cache_result(Ok(CacheHandle::new("cachedContents/x", None)));
        let harness = TestHarness::new(transport);
        let ctx = ToolContext::new(
            &harness.session,
            harness.gateway(),
            vec![reference_file("a1", "a.txt")],
        );

        CreateCache
            .execute(json!({ "file_ids": ["files/a1"] }), &ctx)
            .await
            .unwrap();

        assert_eq!(
            harness.transport.cache_requests()[0].ttl,
            Duration::from_secs(3600)
        );
    }

    #[tokio::test]
    async fn unknown_ids_are_resolved_remotely() {
        let transport = ScriptedTransport::new();
        transport.add_file(reference_file("remote9", "remote.pdf"));
        transport.push_cache_result(Ok(CacheHandle::new("cachedContents/r", None)));
        let harness = TestHarness::new(transport);
        let ctx = ToolContext::new(&harness.session, harness.gateway(), Vec::new());

        let output = CreateCache
            .execute(json!({ "file_ids": ["remote9"] }), &ctx)
            .await
            .unwrap();

        assert_eq!(output.text, "cachedContents/r");
        assert_eq!(
            harness.transport.cache_requests()[0].files[0].display_name,
            "remote.pdf"
        );
    }

    #[tokio::test]
    async fn failure_returns_error_instead_of_identifier() {
        let transport = ScriptedTransport::new();
        for _ in 0..3 {
            transport.push_cache_result(Err(LlmError::Api {
                status: 400,
                message: "content too small".to_string(),
            }));
        }
        let harness = TestHarness::new(transport);
        let ctx = ToolContext::new(
            &harness.session,
            harness.gateway(),
            vec![reference_file("a1", "a.txt")],
        );

        let err = CreateCache
            .execute(json!({ "file_ids": ["a1"] }), &ctx)
            .await
            .unwrap_err();

        assert!(err.to_string().starts_with("Cache creation failed"));
        assert!(!err.to_string().starts_with("cachedContents/"));
    }

    #[tokio::test]
    async fn empty_file_list_is_rejected() {
        let harness = TestHarness::new(ScriptedTransport::new());
        let ctx = ToolContext::new(&harness.session, harness.gateway(), Vec::new());

        let err = CreateCache
            .execute(json!({ "file_ids": [] }), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("file_ids"));
        assert!(harness.transport.cache_requests().is_empty());
    }
}
