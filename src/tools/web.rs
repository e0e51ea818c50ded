//! Web access tools: search and fetch URLs.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{Tool, ToolContext, ToolOutput};

const USER_AGENT: &str = "Mozilla/5.0 (compatible; conductor/0.3)";
const MAX_FETCH_CHARS: usize = 20_000;
const MAX_SEARCH_RESULTS: usize = 10;

fn http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()?)
}

/// Search the web through the DuckDuckGo HTML endpoint.
pub struct WebSearch;

#[async_trait]
impl Tool for WebSearch {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for information. Returns search results with titles and snippets. Use for finding current facts or sources."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "num_results": {
                    "type": "integer",
                    "description": "Maximum number of results to return (default: 5)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> anyhow::Result<ToolOutput> {
        let query = args["query"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'query' argument"))?;
        let limit = args["num_results"]
            .as_u64()
            .map(|n| (n as usize).clamp(1, MAX_SEARCH_RESULTS))
            .unwrap_or(5);

        let url = format!(
            "https://html.duckduckgo.com/html/?q={}",
            urlencoding::encode(query)
        );
        let html = http_client(Duration::from_secs(30))?
            .get(&url)
            .send()
            .await?
            .text()
            .await?;

        let results = extract_ddg_results(&html, limit);
        if results.is_empty() {
            Ok(ToolOutput::text(format!("No results found for: {}", query)))
        } else {
            Ok(ToolOutput::text(results.join("\n\n")))
        }
    }
}

fn extract_ddg_results(html: &str, limit: usize) -> Vec<String> {
    let field = |chunk: &str, class: &str| -> Option<String> {
        chunk
            .split(class)
            .nth(1)
            .and_then(|s| s.split('>').nth(1))
            .and_then(|s| s.split('<').next())
            .map(|s| html_decode(s.trim()))
    };

    html.split("class=\"result__body\"")
        .skip(1)
        .filter_map(|chunk| {
            let title = field(chunk, "class=\"result__a\"").filter(|t| !t.is_empty())?;
            let snippet = field(chunk, "class=\"result__snippet\"").unwrap_or_default();
            let url = field(chunk, "class=\"result__url\"").unwrap_or_default();
            Some(format!("**{}**\n{}\nURL: {}", title, snippet, url))
        })
        .take(limit)
        .collect()
}

fn html_decode(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&nbsp;", " ")
}

/// Fetch the text content of a URL.
pub struct FetchUrl;

#[async_trait]
impl Tool for FetchUrl {
    fn name(&self) -> &str {
        "fetch_url"
    }

    fn description(&self) -> &str {
        "Fetch the content of a URL. Returns the text content of the page, truncated to 20000 characters."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The URL to fetch"
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> anyhow::Result<ToolOutput> {
        let url = args["url"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'url' argument"))?;

        let response = http_client(Duration::from_secs(30))?.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(anyhow::anyhow!("HTTP error: {}", status));
        }

        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("text/html"));
        let body = response.text().await?;

        let text = if is_html {
            extract_text_from_html(&body)
        } else {
            body
        };
        Ok(ToolOutput::text(truncate_content(text, MAX_FETCH_CHARS)))
    }
}

fn truncate_content(text: String, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!(
            "{}... [content truncated, showing first {} chars]",
            &text[..idx],
            max_chars
        ),
        None => text,
    }
}

fn strip_element(mut html: String, open: &str, close: &str) -> String {
    while let Some(start) = html.find(open) {
        match html[start..].find(close) {
            Some(end) => html.replace_range(start..start + end + close.len(), ""),
            None => break,
        }
    }
    html
}

/// Readable text from an HTML page: scripts and styles removed, tags
/// replaced by spaces, whitespace collapsed.
fn extract_text_from_html(html: &str) -> String {
    let text = strip_element(html.to_string(), "<script", "</script>");
    let text = strip_element(text, "<style", "</style>");

    let mut result = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                result.push(' ');
            }
            _ if !in_tag => result.push(c),
            _ => {}
        }
    }

    html_decode(&result)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
