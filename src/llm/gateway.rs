//! Single chokepoint for remote model calls.
//!
//! Every call is retried up to `max_attempts` times with exponential
//! backoff. Exhausted retries surface as [`GatewayFailure`], never as
//! partial data.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::RetryConfig;
use crate::session::{LogSink, Session};

use super::{
    CacheHandle, CacheRequest, LlmError, LlmRequest, LlmTransport, ModelResponse, ReferenceFile,
};

/// Upper bound on a single wait between attempts.
pub const MAX_RETRY_DELAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Backoff schedule between attempts.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryConfig::default().into()
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(config: RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: config.initial_delay,
            backoff_factor: config.backoff_factor,
        }
    }
}

impl RetryPolicy {
    /// Wait after the `retry_index`-th failure (0-based): `D * F^i`,
    /// saturating at [`MAX_RETRY_DELAY`].
    pub fn delay_for(&self, retry_index: u32) -> Duration {
        if self.initial_delay.is_zero() {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(retry_index).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(MAX_RETRY_DELAY)
            .min(MAX_RETRY_DELAY)
    }
}

/// Suspends the caller between attempts.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Production sleeper backed by the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// All attempts of a remote call failed.
#[derive(Debug, Clone, Error)]
#[error("{operation} failed after {attempts} attempt(s) [{kind}]: {message}")]
pub struct GatewayFailure {
    pub operation: String,
    pub attempts: u32,
    /// Classification of the last error (see [`LlmError::kind`]).
    pub kind: &'static str,
    pub message: String,
}

/// Retrying wrapper around the model transport.
pub struct Gateway {
    transport: Arc<dyn LlmTransport>,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    log: Arc<dyn LogSink>,
}

impl Gateway {
    pub fn new(session: &Session) -> Self {
        Self {
            transport: session.transport(),
            policy: session.config().retry.clone().into(),
            sleeper: Arc::new(TokioSleeper),
            log: session.log(),
        }
    }

    /// Replace the sleeper (tests observe the backoff schedule through it).
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Generate content with retry.
    pub async fn call(&self, request: &LlmRequest) -> Result<ModelResponse, GatewayFailure> {
        let operation = format!("generate_content({})", request.model);
        self.with_retry(&operation, || self.transport.generate(request))
            .await
    }

    pub async fn upload_file(
        &self,
        path: &Path,
        display_name: &str,
        mime_type: &str,
    ) -> Result<ReferenceFile, GatewayFailure> {
        self.with_retry("upload_file", || {
            self.transport.upload_file(path, display_name, mime_type)
        })
        .await
    }

    pub async fn list_files(&self) -> Result<Vec<ReferenceFile>, GatewayFailure> {
        self.with_retry("list_files", || self.transport.list_files())
            .await
    }

    pub async fn get_file(&self, name: &str) -> Result<ReferenceFile, GatewayFailure> {
        self.with_retry("get_file", || self.transport.get_file(name))
            .await
    }

    pub async fn create_cache(&self, request: &CacheRequest) -> Result<CacheHandle, GatewayFailure> {
        self.with_retry("create_cache", || self.transport.create_cache(request))
            .await
    }

    async fn with_retry<T, F, Fut>(&self, operation: &str, mut attempt_fn: F) -> Result<T, GatewayFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, LlmError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let err = match attempt_fn().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            self.log.write(
                "Gateway",
                &format!(
                    "{} attempt {}/{} failed [{}]: {}",
                    operation,
                    attempt,
                    max_attempts,
                    err.kind(),
                    err
                ),
            );

            if attempt >= max_attempts {
                return Err(GatewayFailure {
                    operation: operation.to_string(),
                    attempts: attempt,
                    kind: err.kind(),
                    message: err.to_string(),
                });
            }

            let delay = self.policy.delay_for(attempt - 1);
            tracing::debug!(
                operation,
                attempt,
                delay_secs = delay.as_secs_f64(),
                "Retrying remote call"
            );
            self.sleeper.sleep(delay).await;
        }
    }
}
