//! Gemini REST transport.
//!
//! Implements [`LlmTransport`] over the public `v1beta` endpoints:
//! `models/*:generateContent`, the resumable Files API and `cachedContents`.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::Config;

use super::{
    CacheHandle, CacheRequest, Content, FileState, GenerationConfig, LlmError, LlmRequest,
    LlmTransport, ModelResponse, PromptPart, ReferenceFile, ResponsePart, Role, ToolDeclaration,
    ToolRequest,
};

const API_VERSION: &str = "v1beta";
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Gemini LLM client.
pub struct GeminiClient {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl GeminiClient {
    /// Create a new Gemini client.
    pub fn new(api_key: impl Into<String>, endpoint: impl Into<String>, timeout: Duration) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Http(e.to_string()))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, LlmError> {
        Self::new(&config.api_key, &config.api_base, config.request_timeout)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}/{}", self.endpoint, API_VERSION, path)
    }

    fn headers(&self) -> Result<HeaderMap, LlmError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            API_KEY_HEADER,
            HeaderValue::from_str(&self.api_key)
                .map_err(|_| LlmError::Http("API key is not a valid header value".to_string()))?,
        );
        Ok(headers)
    }

    async fn post_json<B: Serialize, T: DeserializeOwned>(&self, url: &str, body: &B) -> Result<T, LlmError> {
        let response = self
            .client
            .post(url)
            .headers(self.headers()?)
            .json(body)
            .send()
            .await
            .map_err(transport_error)?;
        read_json(response).await
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, LlmError> {
        let response = self
            .client
            .get(url)
            .headers(self.headers()?)
            .send()
            .await
            .map_err(transport_error)?;
        read_json(response).await
    }
}

fn transport_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout(e.to_string())
    } else {
        LlmError::Http(e.to_string())
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, LlmError> {
    let status = response.status();
    let text = response.text().await.map_err(transport_error)?;

    if !status.is_success() {
        let message = serde_json::from_str::<ErrorEnvelope>(&text)
            .map(|e| e.error.message)
            .unwrap_or(text);
        return Err(LlmError::Api {
            status: status.as_u16(),
            message,
        });
    }

    serde_json::from_str(&text).map_err(|e| LlmError::Serialization(e.to_string()))
}

fn model_path(model: &str) -> String {
    if model.starts_with("models/") {
        model.to_string()
    } else {
        format!("models/{}", model)
    }
}

// Gemini API request/response structures

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentBody {
    contents: Vec<WireContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<WireContent>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<WireGenerationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cached_content: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct WireContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<WirePart>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WirePart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thought: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    thought_signature: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    inline_data: Option<WireBlob>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    file_data: Option<WireFileData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_call: Option<WireFunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    function_response: Option<WireFunctionResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireBlob {
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFileData {
    mime_type: String,
    file_uri: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionResponse {
    name: String,
    response: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireTool {
    function_declarations: Vec<WireFunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct WireFunctionDeclaration {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_schema: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking_config: Option<WireThinkingConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_modalities: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireThinkingConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    thinking_budget: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    include_thoughts: Option<bool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<WireCandidate>,
    #[serde(default)]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct WireCandidate {
    #[serde(default)]
    content: Option<WireContent>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    #[serde(default)]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireFile {
    name: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    state: Option<FileState>,
}

#[derive(Debug, Deserialize)]
struct FileEnvelope {
    file: WireFile,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListFilesResponse {
    #[serde(default)]
    files: Vec<WireFile>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedContentResponse {
    name: String,
    #[serde(default)]
    expire_time: Option<DateTime<Utc>>,
}

impl From<WireFile> for ReferenceFile {
    fn from(file: WireFile) -> Self {
        let display_name = file
            .display_name
            .unwrap_or_else(|| file.name.trim_start_matches("files/").to_string());
        Self {
            uri: file.uri.unwrap_or_default(),
            display_name,
            mime_type: file
                .mime_type
                .unwrap_or_else(|| "application/octet-stream".to_string()),
            source_path: None,
            state: file.state.unwrap_or(FileState::StateUnspecified),
            name: file.name,
        }
    }
}

/// Gemini function schemas use upper-case OpenAPI type names.
fn to_gemini_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| {
                    let value = match (key.as_str(), value) {
                        ("type", Value::String(t)) => Value::String(t.to_uppercase()),
                        _ => to_gemini_schema(value),
                    };
                    (key.clone(), value)
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(to_gemini_schema).collect()),
        other => other.clone(),
    }
}

fn encode_part(part: &PromptPart) -> WirePart {
    match part {
        PromptPart::Text(text) => WirePart {
            text: Some(text.clone()),
            ..Default::default()
        },
        PromptPart::File(file) => WirePart {
            file_data: Some(WireFileData {
                mime_type: file.mime_type.clone(),
                file_uri: file.uri.clone(),
            }),
            ..Default::default()
        },
        PromptPart::InlineData { mime_type, data } => WirePart {
            inline_data: Some(WireBlob {
                mime_type: mime_type.clone(),
                data: base64::engine::general_purpose::STANDARD.encode(data),
            }),
            ..Default::default()
        },
        PromptPart::ToolCall(request) => WirePart {
            function_call: Some(WireFunctionCall {
                name: request.name.clone(),
                args: request.args.clone(),
            }),
            thought_signature: request.thought_signature.clone(),
            ..Default::default()
        },
        PromptPart::ToolResult { name, output } => WirePart {
            function_response: Some(WireFunctionResponse {
                name: name.clone(),
                response: json!({ "result": output }),
            }),
            ..Default::default()
        },
    }
}

fn encode_content(content: &Content) -> WireContent {
    let role = match content.role {
        Role::User => "user",
        Role::Model => "model",
    };
    WireContent {
        role: Some(role.to_string()),
        parts: content.parts.iter().map(encode_part).collect(),
    }
}

fn encode_generation_config(config: &GenerationConfig) -> Option<WireGenerationConfig> {
    let thinking_config = if config.thinking_budget.is_some() || config.include_thoughts.is_some() {
        Some(WireThinkingConfig {
            thinking_budget: config.thinking_budget,
            include_thoughts: config.include_thoughts,
        })
    } else {
        None
    };

    let wire = WireGenerationConfig {
        response_mime_type: config.response_mime_type.clone(),
        response_schema: config.response_schema.as_ref().map(to_gemini_schema),
        thinking_config,
        response_modalities: config.response_modalities.clone(),
    };

    if wire.response_mime_type.is_none()
        && wire.response_schema.is_none()
        && wire.thinking_config.is_none()
        && wire.response_modalities.is_none()
    {
        None
    } else {
        Some(wire)
    }
}

fn encode_tools(tools: &[ToolDeclaration]) -> Vec<WireTool> {
    if tools.is_empty() {
        return Vec::new();
    }
    vec![WireTool {
        function_declarations: tools
            .iter()
            .map(|t| WireFunctionDeclaration {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: to_gemini_schema(&t.parameters),
            })
            .collect(),
    }]
}

fn encode_cache_request(request: &CacheRequest) -> Value {
    let file_parts: Vec<WirePart> = request
        .files
        .iter()
        .map(|f| encode_part(&PromptPart::File(f.clone())))
        .collect();

    let mut body = json!({
        "model": model_path(&request.model),
        "contents": [{ "role": "user", "parts": file_parts }],
        "ttl": format!("{}s", request.ttl.as_secs()),
    });
    if let Some(instruction) = &request.system_instruction {
        body["systemInstruction"] = json!(encode_system_instruction(instruction));
    }
    let tools = encode_tools(&request.tools);
    if !tools.is_empty() {
        body["tools"] = json!(tools);
    }
    if let Some(display_name) = &request.display_name {
        body["displayName"] = json!(display_name);
    }
    body
}

/// A request bound to a content cache leaves the system instruction and
/// tools out: the service only accepts them on the cache itself.
fn encode_request(request: &LlmRequest) -> GenerateContentBody {
    let cached = request.config.cached_content.is_some();
    let system_instruction = request
        .system_instruction
        .as_ref()
        .filter(|_| !cached)
        .map(|text| encode_system_instruction(text));
    let tools = if cached {
        Vec::new()
    } else {
        encode_tools(&request.tools)
    };

    GenerateContentBody {
        contents: request.contents.iter().map(encode_content).collect(),
        system_instruction,
        tools,
        generation_config: encode_generation_config(&request.config),
        cached_content: request.config.cached_content.clone(),
    }
}

fn encode_system_instruction(text: &str) -> WireContent {
    WireContent {
        role: None,
        parts: vec![WirePart {
            text: Some(text.to_string()),
            ..Default::default()
        }],
    }
}

fn decode_response(response: GenerateContentResponse) -> Result<ModelResponse, LlmError> {
    let candidate = match response.candidates.into_iter().next() {
        Some(c) => c,
        None => {
            if let Some(reason) = response.prompt_feedback.and_then(|f| f.block_reason) {
                return Err(LlmError::Blocked(reason));
            }
            return Err(LlmError::EmptyResponse);
        }
    };

    let content = candidate.content.ok_or(LlmError::EmptyResponse)?;
    let mut parts = Vec::with_capacity(content.parts.len());

    for part in content.parts {
        if let Some(call) = part.function_call {
            parts.push(ResponsePart::ToolRequest(ToolRequest {
                name: call.name,
                args: call.args,
                thought_signature: part.thought_signature,
            }));
        } else if let Some(blob) = part.inline_data {
            let data = base64::engine::general_purpose::STANDARD
                .decode(blob.data.as_bytes())
                .map_err(|e| LlmError::Serialization(format!("invalid inline data: {}", e)))?;
            parts.push(ResponsePart::Blob {
                mime_type: blob.mime_type,
                data,
            });
        } else if let Some(text) = part.text {
            if part.thought.unwrap_or(false) {
                parts.push(ResponsePart::Thought(text));
            } else {
                parts.push(ResponsePart::Text(text));
            }
        }
    }

    Ok(ModelResponse::new(parts))
}

#[async_trait]
impl LlmTransport for GeminiClient {
    async fn generate(&self, request: &LlmRequest) -> Result<ModelResponse, LlmError> {
        let url = self.url(&format!("{}:generateContent", model_path(&request.model)));
        let body = encode_request(request);
        let response: GenerateContentResponse = self.post_json(&url, &body).await?;
        decode_response(response)
    }

    async fn upload_file(
        &self,
        path: &Path,
        display_name: &str,
        mime_type: &str,
    ) -> Result<ReferenceFile, LlmError> {
        let bytes = tokio::fs::read(path).await?;

        // Resumable protocol: start a session, then upload and finalize in one request.
        let start = self
            .client
            .post(format!("{}/upload/{}/files", self.endpoint, API_VERSION))
            .headers(self.headers()?)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", bytes.len().to_string())
            .header("X-Goog-Upload-Header-Content-Type", mime_type)
            .json(&json!({ "file": { "display_name": display_name } }))
            .send()
            .await
            .map_err(transport_error)?;

        let status = start.status();
        if !status.is_success() {
            let message = start.text().await.unwrap_or_default();
            return Err(LlmError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let upload_url = start
            .headers()
            .get("x-goog-upload-url")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| LlmError::Serialization("missing x-goog-upload-url header".to_string()))?;

        let response = self
            .client
            .post(&upload_url)
            .header(API_KEY_HEADER, &self.api_key)
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(bytes)
            .send()
            .await
            .map_err(transport_error)?;

        let envelope: FileEnvelope = read_json(response).await?;
        let mut file = ReferenceFile::from(envelope.file);
        file.source_path = Some(path.to_path_buf());
        Ok(file)
    }

    async fn list_files(&self) -> Result<Vec<ReferenceFile>, LlmError> {
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = format!("{}?pageSize=100", self.url("files"));
            if let Some(token) = &page_token {
                url.push_str("&pageToken=");
                url.push_str(&urlencoding::encode(token));
            }

            let page: ListFilesResponse = self.get_json(&url).await?;
            files.extend(page.files.into_iter().map(ReferenceFile::from));

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        Ok(files)
    }

    async fn get_file(&self, name: &str) -> Result<ReferenceFile, LlmError> {
        let name = if name.starts_with("files/") {
            name.to_string()
        } else {
            format!("files/{}", name)
        };
        let file: WireFile = self.get_json(&self.url(&name)).await?;
        Ok(file.into())
    }

    async fn create_cache(&self, request: &CacheRequest) -> Result<CacheHandle, LlmError> {
        let body = encode_cache_request(request);
        let response: CachedContentResponse = self.post_json(&self.url("cachedContents"), &body).await?;
        Ok(CacheHandle::new(response.name, response.expire_time))
    }
}
