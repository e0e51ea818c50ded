//! Session state shared by the gateway, the worker and the task manager.
//!
//! A [`Session`] bundles the configuration, the on-disk layout, the log
//! sink and the model transport. It is created once at start-up and
//! passed to every component constructor.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use crate::config::{Config, Layout};
use crate::llm::{GeminiClient, LlmError, LlmTransport};

/// Destination for logged events.
pub trait LogSink: Send + Sync {
    fn write(&self, source: &str, message: &str);
}

/// Appends `[ts] [source]: message` lines to `logs/agent_log_<timestamp>.txt`
/// and mirrors each event to `tracing`.
pub struct FileLogSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileLogSink {
    /// Create a fresh log file in `logs_dir`.
    pub fn create(logs_dir: &Path) -> std::io::Result<Self> {
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let path = logs_dir.join(format!("agent_log_{}.txt", stamp));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LogSink for FileLogSink {
    fn write(&self, source: &str, message: &str) {
        tracing::info!(source, "{}", message);

        let line = format!(
            "[{}] [{}]: {}\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            source,
            message
        );
        let mut file = match self.file.lock() {
            Ok(file) => file,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Err(e) = file.write_all(line.as_bytes()) {
            tracing::warn!("Failed to write to {}: {}", self.path.display(), e);
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Failed to create working directories under {path}: {source}")]
    Directories {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to create log file: {0}")]
    LogFile(#[source] std::io::Error),

    #[error("Failed to initialize model transport: {0}")]
    Transport(#[from] LlmError),
}

/// Explicit replacement for process-wide credential, client and log state.
#[derive(Clone)]
pub struct Session {
    config: Config,
    layout: Layout,
    log: Arc<dyn LogSink>,
    transport: Arc<dyn LlmTransport>,
}

impl Session {
    /// Create directories, the log file and the Gemini transport.
    pub fn start(config: Config) -> Result<Self, SessionError> {
        let layout = config.layout();
        layout.ensure().map_err(|source| SessionError::Directories {
            path: layout.root.clone(),
            source,
        })?;

        let log = FileLogSink::create(&layout.logs_dir).map_err(SessionError::LogFile)?;
        let transport = GeminiClient::from_config(&config)?;

        log.write(
            "System",
            &format!(
                "Session started (model={}, log={})",
                config.text_model,
                log.path().display()
            ),
        );

        Ok(Self {
            config,
            layout,
            log: Arc::new(log),
            transport: Arc::new(transport),
        })
    }

    /// Assemble a session from existing parts without touching the filesystem.
    pub fn new(config: Config, log: Arc<dyn LogSink>, transport: Arc<dyn LlmTransport>) -> Self {
        Self {
            layout: config.layout(),
            config,
            log,
            transport,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn log(&self) -> Arc<dyn LogSink> {
        self.log.clone()
    }

    pub fn transport(&self) -> Arc<dyn LlmTransport> {
        self.transport.clone()
    }
}
