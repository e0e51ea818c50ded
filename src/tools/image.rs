//! Image generation tool.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde_json::{json, Value};

use crate::llm::{GenerationConfig, LlmRequest, PromptPart};

use super::files::sanitize_filename;
use super::{Tool, ToolContext, ToolOutput};

/// Generate an image (optionally from a base image) and save it as PNG.
pub struct GenerateImage;

#[async_trait]
impl Tool for GenerateImage {
    fn name(&self) -> &str {
        "generate_image"
    }

    fn description(&self) -> &str {
        "Generate an image from an English text prompt and save it as a PNG in the output directory. Optionally edit an existing image given by base_image_path."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "prompt_text_english": {
                    "type": "string",
                    "description": "Detailed description of the image, written in English"
                },
                "base_image_path": {
                    "type": "string",
                    "description": "Optional: path of an image to use as the starting point (absolute, or relative to the output directory)"
                }
            },
            "required": ["prompt_text_english"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<ToolOutput> {
        let prompt = args["prompt_text_english"]
            .as_str()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .ok_or_else(|| anyhow::anyhow!("Missing 'prompt_text_english' argument"))?;

        let mut parts = vec![PromptPart::text(prompt)];

        if let Some(base) = args["base_image_path"].as_str().map(str::trim).filter(|p| !p.is_empty()) {
            let path = resolve_base_image(base, &ctx.output_dir)
                .ok_or_else(|| anyhow::anyhow!("Base image not found: {}", base))?;
            let data = tokio::fs::read(&path)
                .await
                .map_err(|e| anyhow::anyhow!("Failed to read base image {}: {}", path.display(), e))?;
            let mime_type = mime_guess::from_path(&path)
                .first_or(mime_guess::mime::IMAGE_PNG)
                .to_string();
            parts.push(PromptPart::InlineData { mime_type, data });
        }

        let request = LlmRequest::new(&ctx.image_model, parts).with_config(GenerationConfig {
            response_modalities: Some(vec!["TEXT".to_string(), "IMAGE".to_string()]),
            ..Default::default()
        });

        let response = ctx
            .gateway
            .call(&request)
            .await
            .map_err(|e| anyhow::anyhow!("Image generation failed: {}", e))?;

        let (_, data) = response
            .first_blob()
            .ok_or_else(|| anyhow::anyhow!("The image model returned no image data"))?;

        let filename = image_filename(prompt, Local::now());
        tokio::fs::create_dir_all(&ctx.output_dir).await?;
        tokio::fs::write(ctx.output_dir.join(&filename), data)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to write '{}': {}", filename, e))?;

        Ok(ToolOutput::text(format!(
            "Image generated and saved as '{}' in the output directory.",
            filename
        )))
    }
}

fn resolve_base_image(raw: &str, output_dir: &Path) -> Option<PathBuf> {
    let given = PathBuf::from(raw);
    let mut candidates = vec![output_dir.join(&given)];
    if given.is_absolute() || given.exists() {
        candidates.insert(0, given.clone());
    }
    if let Some(name) = given.file_name() {
        candidates.push(output_dir.join(name));
    }
    candidates.into_iter().find(|p| p.is_file())
}

/// `<first 20 prompt chars, sanitized>_<timestamp>.png`
fn image_filename(prompt: &str, now: DateTime<Local>) -> String {
    let prefix: String = prompt.chars().take(20).collect();
    let stem = sanitize_filename(&prefix.replace('.', " "))
        .map(|s| s.trim_end_matches('-').to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "image".to_string());
    format!("{}_{}.png", stem, now.format("%Y%m%d_%H%M%S"))
}
