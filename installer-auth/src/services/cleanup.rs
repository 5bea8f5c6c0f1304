//! Periodic background cleanup of expired lockout and revocation rows.

use async_trait::async_trait;
use service_core::error::AppError;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::services::blacklist::TokenBlacklist;
use crate::services::lockout::FailedAttemptTracker;

#[async_trait]
pub trait CleanupJob: Send + Sync {
    fn name(&self) -> &'static str;

    async fn cleanup(&self) -> Result<u64, AppError>;
}

#[async_trait]
impl CleanupJob for TokenBlacklist {
    fn name(&self) -> &'static str {
        "revoked_tokens"
    }

    async fn cleanup(&self) -> Result<u64, AppError> {
        self.cleanup_expired().await
    }
}

#[async_trait]
impl CleanupJob for FailedAttemptTracker {
    fn name(&self) -> &'static str {
        "failed_login_attempts"
    }

    async fn cleanup(&self) -> Result<u64, AppError> {
        self.cleanup_expired().await
    }
}

/// Runs every job once per interval until stopped.
pub struct CleanupTask {
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CleanupTask {
    pub fn spawn(jobs: Vec<Arc<dyn CleanupJob>>, interval: Duration) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + interval;
            let mut ticker = tokio::time::interval_at(start, interval);
            tracing::info!(interval_secs = interval.as_secs(), "Cleanup task started");

            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::info!("Cleanup task stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        run_jobs(&jobs).await;
                    }
                }
            }
        });

        Self {
            cancel,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Signals the loop to exit. Safe to call any number of times.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stops the loop and waits for the in-flight run to finish.
    pub async fn shutdown(&self) {
        self.stop();
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            tracing::warn!(error = %e, "Cleanup task ended abnormally");
        }
    }
}

pub async fn run_jobs(jobs: &[Arc<dyn CleanupJob>]) {
    for job in jobs {
        match job.cleanup().await {
            Ok(removed) => {
                tracing::debug!(job = job.name(), removed, "Cleanup run completed");
            }
            Err(e) => {
                tracing::warn!(job = job.name(), error = %e, "Cleanup run failed");
            }
        }
    }
}
