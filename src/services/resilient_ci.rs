//! CI client wrapper that retries transient backend errors.
//!
//! Every backend query goes through a bounded exponential backoff. Errors
//! that are still transient after the last attempt surface as
//! [`CiError::TransientInfra`] so callers can tell them apart from
//! permanent rejections.

use async_trait::async_trait;
use backoff::future::retry_notify;
use backoff::{Error as BackoffError, ExponentialBackoff, ExponentialBackoffBuilder};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::models::{CiClientConfig, PipelineId, PipelineSnapshot};
use crate::domain::ports::{CiBackend, CiError};

pub struct ResilientCiClient {
    inner: Arc<dyn CiBackend>,
    config: CiClientConfig,
}

impl ResilientCiClient {
    pub fn new(inner: Arc<dyn CiBackend>, config: CiClientConfig) -> Self {
        Self { inner, config }
    }

    fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(self.config.initial_backoff_ms))
            .with_max_interval(Duration::from_millis(self.config.max_backoff_ms))
            .with_multiplier(2.0)
            .with_max_elapsed_time(None)
            .build()
    }

    async fn with_retry<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T, CiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CiError>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0u32;

        let result = retry_notify(
            self.backoff(),
            || {
                attempt += 1;
                let current = attempt;
                let fut = call();
                async move {
                    match fut.await {
                        Ok(value) => Ok(value),
                        Err(err) if err.is_transient() && current < max_attempts => {
                            Err(BackoffError::transient(err))
                        }
                        Err(err) => Err(BackoffError::permanent(err)),
                    }
                }
            },
            |err: CiError, delay: Duration| {
                tracing::warn!(
                    operation,
                    error = %err,
                    retry_in_ms = delay.as_millis() as u64,
                    "CI backend call failed, retrying"
                );
            },
        )
        .await;

        result.map_err(|err| match err {
            CiError::Transient(message) => {
                tracing::error!(operation, attempts = max_attempts, %message, "CI backend unavailable");
                CiError::TransientInfra {
                    attempts: max_attempts,
                    message,
                }
            }
            other => other,
        })
    }
}

#[async_trait]
impl CiBackend for ResilientCiClient {
    async fn trigger_pipeline(
        &self,
        branch: &str,
        commit_sha: &str,
    ) -> Result<PipelineSnapshot, CiError> {
        self.with_retry("trigger_pipeline", || {
            self.inner.trigger_pipeline(branch, commit_sha)
        })
        .await
    }

    async fn get_pipeline(&self, id: &PipelineId) -> Result<PipelineSnapshot, CiError> {
        self.with_retry("get_pipeline", || self.inner.get_pipeline(id))
            .await
    }

    async fn get_job_trace(&self, job_id: &str) -> Result<String, CiError> {
        self.with_retry("get_job_trace", || self.inner.get_job_trace(job_id))
            .await
    }

    async fn cancel_pipeline(&self, id: &PipelineId) -> Result<(), CiError> {
        self.with_retry("cancel_pipeline", || self.inner.cancel_pipeline(id))
            .await
    }
}
