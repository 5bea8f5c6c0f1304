use chrono::{DateTime, Utc};
use service_core::error::AppError;
use thiserror::Error;

/// Failure classes of the authentication and authorization engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AuthError {
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Locked until {until} due to too many failed attempts")]
    Locked { until: DateTime<Utc> },

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn unauthorized(msg: impl Into<String>) -> Self {
        AuthError::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        AuthError::Forbidden(msg.into())
    }

    /// Whether an outcome of this class may be remembered in a cache.
    /// Transient failures never are, so an outage is not replayed later.
    pub fn is_cacheable(&self) -> bool {
        matches!(
            self,
            AuthError::Unauthorized(_)
                | AuthError::Forbidden(_)
                | AuthError::NotFound(_)
                | AuthError::BadRequest(_)
        )
    }
}

pub fn should_cache<T>(result: &Result<T, AuthError>) -> bool {
    match result {
        Ok(_) => true,
        Err(e) => e.is_cacheable(),
    }
}

impl From<AppError> for AuthError {
    fn from(err: AppError) -> Self {
        AuthError::Internal(err.to_string())
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Unauthorized(msg) => AppError::Unauthorized(anyhow::anyhow!(msg)),
            AuthError::Forbidden(msg) => AppError::Forbidden(anyhow::anyhow!(msg)),
            AuthError::NotFound(msg) => AppError::NotFound(anyhow::anyhow!(msg)),
            AuthError::BadRequest(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            AuthError::Locked { until } => {
                let retry_after = (until - Utc::now()).num_seconds().max(1) as u64;
                AppError::TooManyRequests(
                    "Too many failed attempts".to_string(),
                    Some(retry_after),
                )
            }
            AuthError::ServiceUnavailable(msg) => {
                tracing::warn!(error = %msg, "Dependency unavailable");
                AppError::ServiceUnavailable
            }
            AuthError::Internal(msg) => AppError::InternalError(anyhow::anyhow!(msg)),
        }
    }
}
