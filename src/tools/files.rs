//! File output tool and filename sanitization.

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};

use super::{Tool, ToolContext, ToolOutput};

const MAX_BASE_LEN: usize = 100;
const MAX_EXT_LEN: usize = 10;

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"))
}

fn disallowed_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\w.\-]").expect("valid regex"))
}

fn dash_run_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"-{2,}").expect("valid regex"))
}

fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Reduce an arbitrary model-supplied name to a flat, safe file name.
///
/// Path components are flattened (`.`/`..` dropped), whitespace becomes
/// `-`, characters outside `[\w.-]` are removed, and the base name and
/// extension are capped at 100 and 10 characters. Returns `None` when
/// nothing usable remains. Applying it twice yields the same result.
pub fn sanitize_filename(raw: &str) -> Option<String> {
    let flattened = raw
        .split(['/', '\\'])
        .map(str::trim)
        .filter(|c| !c.is_empty() && *c != "." && *c != "..")
        .collect::<Vec<_>>()
        .join(" ");

    let dashed = whitespace_re().replace_all(&flattened, "-");
    let stripped = disallowed_re().replace_all(&dashed, "");
    let collapsed = dash_run_re().replace_all(&stripped, "-");
    let cleaned = collapsed.trim_matches(|c: char| c == '.' || c == '-');

    let (base, ext) = match cleaned.rfind('.') {
        Some(idx) => (&cleaned[..idx], &cleaned[idx + 1..]),
        None => (cleaned, ""),
    };
    let base = truncate_chars(base, MAX_BASE_LEN).trim_end_matches(['-', '.']);
    let ext = truncate_chars(ext, MAX_EXT_LEN).trim_end_matches('-');

    if base.is_empty() {
        return None;
    }
    if ext.is_empty() {
        Some(base.to_string())
    } else {
        Some(format!("{}.{}", base, ext))
    }
}

/// Write UTF-8 text into the output directory.
pub struct SaveFile;

#[async_trait]
impl Tool for SaveFile {
    fn name(&self) -> &str {
        "save_file"
    }

    fn description(&self) -> &str {
        "Save text content to a file in the output directory. The filename is sanitized; an existing file with the same name is overwritten."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "filename": {
                    "type": "string",
                    "description": "Name of the file to create, e.g. 'report.md'"
                },
                "content": {
                    "type": "string",
                    "description": "Full UTF-8 text content of the file"
                }
            },
            "required": ["filename", "content"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<ToolOutput> {
        let raw_name = args["filename"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'filename' argument"))?;
        let content = args["content"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'content' argument"))?;

        let filename = sanitize_filename(raw_name)
            .ok_or_else(|| anyhow::anyhow!("Invalid filename '{}': nothing left after sanitizing", raw_name))?;

        tokio::fs::create_dir_all(&ctx.output_dir).await?;
        let path = ctx.output_dir.join(&filename);
        tokio::fs::write(&path, content)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to write '{}': {}", filename, e))?;

        tracing::info!("Saved {} ({} bytes)", path.display(), content.len());
        Ok(ToolOutput::text(format!(
            "File '{}' saved successfully to the output directory.",
            filename
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ScriptedTransport, TestHarness};

    #[test]
    fn traversal_and_whitespace_are_flattened() {
        assert_eq!(
            sanitize_filename("../../etc/pa ss wd!.txt").as_deref(),
            Some("etc-pa-ss-wd.txt")
        );
        assert_eq!(sanitize_filename("notes.md").as_deref(), Some("notes.md"));
        assert_eq!(sanitize_filename("  my   report .md").as_deref(), Some("my-report.md"));
        assert_eq!(sanitize_filename(".bashrc").as_deref(), Some("bashrc"));
        assert_eq!(sanitize_filename("C:\\Users\\me\\plan.txt").as_deref(), Some("C-Users-me-plan.txt"));
    }

    #[test]
    fn empty_results_are_rejected() {
        assert_eq!(sanitize_filename(""), None);
        assert_eq!(sanitize_filename("../.."), None);
        assert_eq!(sanitize_filename("!!!"), None);
        assert_eq!(sanitize_filename("..."), None);
    }

    #[test]
    fn base_and_extension_are_capped() {
        let long = format!("{}.{}", "a".repeat(150), "extension_too_long");
        let sanitized = sanitize_filename(&long).unwrap();
        let (base, ext) = sanitized.rsplit_once('.').unwrap();
        assert_eq!(base.chars().count(), 100);
        assert_eq!(ext, "extension_");
    }

    #[test]
    fn unicode_word_characters_survive() {
        assert_eq!(sanitize_filename("résumé final.txt").as_deref(), Some("résumé-final.txt"));
    }

    #[test]
    fn sanitizing_is_idempotent() {
        let samples = [
            "../../etc/pa ss wd!.txt",
            "a..b",
            "a.-b",
            "x - y -- z.tar.gz",
            "   .hidden.",
            "dir/sub/file name (1).json",
            "weird\u{00a0}space\tand\nnewline.md",
            "über/straße.txt",
            "trailing-dash-.txt-",
            "abc.defghijkl-mnop",
        ];
        let long = format!("{}-.{}", "b".repeat(99), "c".repeat(12));
        for sample in samples.iter().copied().chain(std::iter::once(long.as_str())) {
            if let Some(once) = sanitize_filename(sample) {
                assert_eq!(
                    sanitize_filename(&once).as_deref(),
                    Some(once.as_str()),
                    "not idempotent for {:?}",
                    sample
                );
            }
        }
    }

    #[tokio::test]
    async fn save_file_writes_sanitized_name_inside_output_dir() {
        let harness = TestHarness::new(ScriptedTransport::new());
        let ctx = ToolContext::new(&harness.session, harness.gateway(), Vec::new());

        let output = SaveFile
            .execute(
                json!({ "filename": "../../etc/pa ss wd!.txt", "content": "x" }),
                &ctx,
            )
            .await
            .unwrap();

        assert!(output.text.contains("etc-pa-ss-wd.txt"));
        let written = ctx.output_dir.join("etc-pa-ss-wd.txt");
        assert_eq!(std::fs::read_to_string(written).unwrap(), "x");
    }

    #[tokio::test]
    async fn save_file_overwrites_silently() {
        let harness = TestHarness::new(ScriptedTransport::new());
        let ctx = ToolContext::new(&harness.session, harness.gateway(), Vec::new());

        for content in ["first", "second"] {
            SaveFile
                .execute(json!({ "filename": "out.txt", "content": content }), &ctx)
                .await
                .unwrap();
        }
        assert_eq!(
            std::fs::read_to_string(ctx.output_dir.join("out.txt")).unwrap(),
            "second"
        );
    }

    #[tokio::test]
    async fn save_file_rejects_unusable_names() {
        let harness = TestHarness::new(ScriptedTransport::new());
        let ctx = ToolContext::new(&harness.session, harness.gateway(), Vec::new());

        let err = SaveFile
            .execute(json!({ "filename": "../..", "content": "x" }), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Invalid filename"));
        assert_eq!(std::fs::read_dir(&ctx.output_dir).unwrap().count(), 0);
    }
}
