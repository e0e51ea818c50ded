//! Test doubles for the model transport, the backoff sleeper and the log sink.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use crate::config::Config;
use crate::llm::{
    CacheHandle, CacheRequest, FileState, Gateway, LlmError, LlmRequest, LlmTransport,
    ModelResponse, ReferenceFile, ResponsePart, Sleeper,
};
use crate::session::{LogSink, Session};

#[derive(Default)]
pub struct MemoryLogSink {
    lines: Mutex<Vec<(String, String)>>,
}

impl MemoryLogSink {
    pub fn lines(&self) -> Vec<(String, String)> {
        self.lines.lock().unwrap().clone()
    }

    pub fn messages_from(&self, source: &str) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|(s, _)| s == source)
            .map(|(_, m)| m)
            .collect()
    }
}

impl LogSink for MemoryLogSink {
    fn write(&self, source: &str, message: &str) {
        self.lines
            .lock()
            .unwrap()
            .push((source.to_string(), message.to_string()));
    }
}

#[derive(Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn recorded(&self) -> Vec<Duration> {
        self.delays.lock().unwrap().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().unwrap().push(duration);
    }
}

/// Transport that replays queued results and records every request.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<Result<ModelResponse, LlmError>>>,
    requests: Mutex<Vec<LlmRequest>>,
    cache_results: Mutex<VecDeque<Result<CacheHandle, LlmError>>>,
    cache_requests: Mutex<Vec<CacheRequest>>,
    files: Mutex<Vec<ReferenceFile>>,
    uploads: Mutex<Vec<(PathBuf, String, String)>>,
    upload_state: Mutex<Option<FileState>>,
    file_states: Mutex<VecDeque<FileState>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, response: ModelResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    pub fn push_text(&self, text: &str) {
        self.push_response(ModelResponse::new(vec![ResponsePart::Text(text.to_string())]));
    }

    pub fn push_error(&self, error: LlmError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn push_cache_result(&self, result: Result<CacheHandle, LlmError>) {
        self.cache_results.lock().unwrap().push_back(result);
    }

    pub fn add_file(&self, file: ReferenceFile) {
        self.files.lock().unwrap().push(file);
    }

    /// State reported for freshly uploaded files (defaults to `Active`).
    pub fn set_upload_state(&self, state: FileState) {
        *self.upload_state.lock().unwrap() = Some(state);
    }

    /// States returned by successive `get_file` calls.
    pub fn push_file_state(&self, state: FileState) {
        self.file_states.lock().unwrap().push_back(state);
    }

    pub fn requests(&self) -> Vec<LlmRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn generate_calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn cache_requests(&self) -> Vec<CacheRequest> {
        self.cache_requests.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> Vec<(PathBuf, String, String)> {
        self.uploads.lock().unwrap().clone()
    }
}

pub fn reference_file(id: &str, display_name: &str) -> ReferenceFile {
    ReferenceFile {
        name: format!("files/{}", id),
        uri: format!("https://generativelanguage.googleapis.com/v1beta/files/{}", id),
        display_name: display_name.to_string(),
        mime_type: "text/plain".to_string(),
        source_path: None,
        state: FileState::Active,
    }
}

#[async_trait]
impl LlmTransport for ScriptedTransport {
    async fn generate(&self, request: &LlmRequest) -> Result<ModelResponse, LlmError> {
        self.requests.lock().unwrap().push(request.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Err(LlmError::EmptyResponse))
    }

    async fn upload_file(
        &self,
        path: &Path,
        display_name: &str,
        mime_type: &str,
    ) -> Result<ReferenceFile, LlmError> {
        let mut uploads = self.uploads.lock().unwrap();
        uploads.push((path.to_path_buf(), display_name.to_string(), mime_type.to_string()));
        let mut file = reference_file(&format!("upload{}", uploads.len()), display_name);
        file.mime_type = mime_type.to_string();
        file.source_path = Some(path.to_path_buf());
        file.state = self.upload_state.lock().unwrap().unwrap_or(FileState::Active);
        self.files.lock().unwrap().push(file.clone());
        Ok(file)
    }

    async fn list_files(&self) -> Result<Vec<ReferenceFile>, LlmError> {
        Ok(self.files.lock().unwrap().clone())
    }

    async fn get_file(&self, name: &str) -> Result<ReferenceFile, LlmError> {
        let mut file = self
            .files
            .lock()
            .unwrap()
            .iter()
            .find(|f| f.matches(name))
            .cloned()
            .ok_or_else(|| LlmError::Api {
                status: 404,
                message: format!("file {} not found", name),
            })?;
        if let Some(state) = self.file_states.lock().unwrap().pop_front() {
            file.state = state;
        }
        Ok(file)
    }

    async fn create_cache(&self, request: &CacheRequest) -> Result<CacheHandle, LlmError> {
        self.cache_requests.lock().unwrap().push(request.clone());
        self.cache_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Http("no scripted cache result".to_string())))
    }
}

/// Session over a scripted transport, rooted in a temporary directory.
pub struct TestHarness {
    pub dir: TempDir,
    pub transport: Arc<ScriptedTransport>,
    pub log: Arc<MemoryLogSink>,
    pub session: Session,
}

impl TestHarness {
    pub fn new(transport: ScriptedTransport) -> Self {
        Self::with_config(transport, |_| {})
    }

    pub fn with_config(transport: ScriptedTransport, adjust: impl FnOnce(&mut Config)) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = Config::new("test-key".to_string(), dir.path().to_path_buf());
        config.web_tools = false;
        adjust(&mut config);

        let transport = Arc::new(transport);
        let log = Arc::new(MemoryLogSink::default());
        let session = Session::new(config, log.clone(), transport.clone());
        session.layout().ensure().expect("layout");

        Self {
            dir,
            transport,
            log,
            session,
        }
    }

    pub fn gateway_with_sleeper(&self, sleeper: Arc<dyn Sleeper>) -> Gateway {
        Gateway::new(&self.session).with_sleeper(sleeper)
    }

    /// Gateway whose backoff waits complete immediately.
    pub fn gateway(&self) -> Arc<Gateway> {
        Arc::new(self.gateway_with_sleeper(Arc::new(RecordingSleeper::default())))
    }
}
