//! Reference file uploads.
//!
//! User input is expanded (plain path or glob), each file is staged into
//! `uploads_cache/` and uploaded through the gateway, then polled until
//! the remote service has finished processing it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::llm::{FileState, Gateway, GatewayFailure, ReferenceFile, Sleeper, TokioSleeper};
use crate::session::{LogSink, Session};
use crate::tools::sanitize_filename;

const POLL_INTERVAL: Duration = Duration::from_secs(2);
const MAX_POLLS: u32 = 30;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Not a file: {0}")]
    NotAFile(PathBuf),

    #[error("Failed to stage {path}: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Remote(#[from] GatewayFailure),

    #[error("Remote processing of {0} failed")]
    ProcessingFailed(String),

    #[error("{0} is still processing after {1} checks")]
    StillProcessing(String, u32),
}

/// Files designated by one line of user input.
///
/// An existing path is taken as is; anything else is treated as a glob
/// pattern. Directories are skipped and matches are sorted.
pub fn expand_input(line: &str) -> Vec<PathBuf> {
    let trimmed = line.trim().trim_matches(|c: char| c == '"' || c == '\'');
    if trimmed.is_empty() {
        return Vec::new();
    }

    let direct = Path::new(trimmed);
    if direct.is_file() {
        return vec![direct.to_path_buf()];
    }

    let mut matches: Vec<PathBuf> = match glob::glob(trimmed) {
        Ok(paths) => paths.filter_map(Result::ok).filter(|p| p.is_file()).collect(),
        Err(e) => {
            tracing::warn!("Invalid pattern '{}': {}", trimmed, e);
            Vec::new()
        }
    };
    matches.sort();
    matches
}

pub struct Uploader {
    gateway: Arc<Gateway>,
    staging_dir: PathBuf,
    log: Arc<dyn LogSink>,
    sleeper: Arc<dyn Sleeper>,
}

impl Uploader {
    pub fn new(session: &Session, gateway: Arc<Gateway>) -> Self {
        Self {
            gateway,
            staging_dir: session.layout().uploads_cache_dir.clone(),
            log: session.log(),
            sleeper: Arc::new(TokioSleeper),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Stage, upload and wait for one file.
    pub async fn upload(&self, path: &Path) -> Result<ReferenceFile, UploadError> {
        if !path.is_file() {
            return Err(UploadError::NotAFile(path.to_path_buf()));
        }
        let display_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let staged_name = sanitize_filename(&display_name).unwrap_or_else(|| "upload".to_string());
        let staged = self.staging_dir.join(staged_name);
        tokio::fs::create_dir_all(&self.staging_dir)
            .await
            .map_err(|source| UploadError::Staging {
                path: self.staging_dir.clone(),
                source,
            })?;
        tokio::fs::copy(path, &staged)
            .await
            .map_err(|source| UploadError::Staging {
                path: path.to_path_buf(),
                source,
            })?;

        let mime_type = mime_guess::from_path(path).first_or_octet_stream().to_string();
        let mut file = self
            .gateway
            .upload_file(&staged, &display_name, &mime_type)
            .await?;

        let mut polls = 0;
        while file.state == FileState::Processing {
            if polls >= MAX_POLLS {
                return Err(UploadError::StillProcessing(file.name, polls));
            }
            polls += 1;
            self.sleeper.sleep(POLL_INTERVAL).await;
            file = self.gateway.get_file(&file.name).await?;
        }
        if file.state == FileState::Failed {
            return Err(UploadError::ProcessingFailed(file.name));
        }

        file.source_path = Some(path.to_path_buf());
        self.log.write(
            "Uploads",
            &format!("Uploaded {} as {} ({})", path.display(), file.name, file.mime_type),
        );
        Ok(file)
    }

    /// Upload every path; failures are logged and skipped.
    pub async fn upload_all(&self, paths: &[PathBuf]) -> Vec<ReferenceFile> {
        let mut uploaded = Vec::with_capacity(paths.len());
        for path in paths {
            match self.upload(path).await {
                Ok(file) => uploaded.push(file),
                Err(e) => self.log.write("Uploads", &format!("Skipping {}: {}", path.display(), e)),
            }
        }
        uploaded
    }
}
