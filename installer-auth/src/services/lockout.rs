//! Brute-force lockout: the policy arithmetic and the persisted failure tracker.

use chrono::{DateTime, Utc};
use service_core::error::AppError;
use std::sync::Arc;
use std::time::Duration;

use crate::models::IdentifierType;
use crate::services::stores::AttemptStore;

/// Caps exponential backoff at 2^10 times the base duration.
pub const MAX_BACKOFF_EXPONENT: u32 = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct LockoutPolicy {
    pub max_attempts: u32,
    pub lockout_duration: Duration,
    pub window_duration: Duration,
    pub use_exponential: bool,
    pub enabled: bool,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            lockout_duration: Duration::from_secs(15 * 60),
            window_duration: Duration::from_secs(5 * 60),
            use_exponential: true,
            enabled: true,
        }
    }
}

impl LockoutPolicy {
    /// Lock duration for an identifier that has failed `attempt_count` times.
    pub fn calculate_lockout(&self, attempt_count: u32) -> Duration {
        if attempt_count < self.max_attempts {
            return Duration::ZERO;
        }
        if !self.use_exponential {
            return self.lockout_duration;
        }

        let exponent = (attempt_count - self.max_attempts).min(MAX_BACKOFF_EXPONENT);
        self.lockout_duration.saturating_mul(1u32 << exponent)
    }
}

fn to_chrono(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::weeks(52))
}

/// Failure counters per identifier, persisted so that every instance sharing
/// the database sees the same lock state.
///
/// With the policy disabled or no store configured every operation is a
/// no-op that reports "not locked". Store errors are logged and treated the
/// same way.
pub struct FailedAttemptTracker {
    store: Option<Arc<dyn AttemptStore>>,
    policy: LockoutPolicy,
}

impl FailedAttemptTracker {
    pub fn new(store: Option<Arc<dyn AttemptStore>>, policy: LockoutPolicy) -> Self {
        if policy.enabled && store.is_some() {
            tracing::info!(
                max_attempts = policy.max_attempts,
                lockout_secs = policy.lockout_duration.as_secs(),
                window_secs = policy.window_duration.as_secs(),
                exponential = policy.use_exponential,
                "Account lockout enabled"
            );
        }
        Self { store, policy }
    }

    pub fn disabled() -> Self {
        Self {
            store: None,
            policy: LockoutPolicy {
                enabled: false,
                ..LockoutPolicy::default()
            },
        }
    }

    pub fn policy(&self) -> &LockoutPolicy {
        &self.policy
    }

    pub fn is_active(&self) -> bool {
        self.active_store().is_some()
    }

    fn active_store(&self) -> Option<&Arc<dyn AttemptStore>> {
        if !self.policy.enabled {
            return None;
        }
        self.store.as_ref()
    }

    fn window_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - to_chrono(self.policy.window_duration)
    }

    /// Counts one failure and locks the identifier once the policy says so.
    /// Returns the new count and the lock duration applied (zero if none).
    pub async fn record_failure(&self, identifier: &str, kind: IdentifierType) -> (u32, Duration) {
        let Some(store) = self.active_store() else {
            return (0, Duration::ZERO);
        };

        let now = Utc::now();
        let count = match store
            .increment_attempt(identifier, kind, now, self.window_cutoff(now))
            .await
        {
            Ok(count) => u32::try_from(count).unwrap_or(0),
            Err(e) => {
                tracing::warn!(error = %e, identifier_type = %kind, "Failed to record failed attempt");
                return (0, Duration::ZERO);
            }
        };

        let lock = self.policy.calculate_lockout(count);
        if lock > Duration::ZERO {
            let until = now + to_chrono(lock);
            if let Err(e) = store.set_locked_until(identifier, kind, until).await {
                tracing::warn!(error = %e, identifier_type = %kind, "Failed to set lockout time");
            }
        }

        (count, lock)
    }

    /// Whether the identifier is locked right now, and until when.
    pub async fn is_locked(
        &self,
        identifier: &str,
        kind: IdentifierType,
    ) -> (bool, Option<DateTime<Utc>>) {
        let Some(store) = self.active_store() else {
            return (false, None);
        };

        match store.find_attempt(identifier, kind).await {
            Ok(Some(row)) => match row.locked_at(Utc::now()) {
                Some(until) => (true, Some(until)),
                None => (false, None),
            },
            Ok(None) => (false, None),
            Err(e) => {
                tracing::warn!(error = %e, identifier_type = %kind, "Failed to read lockout state");
                (false, None)
            }
        }
    }

    pub async fn reset(&self, identifier: &str, kind: IdentifierType) {
        let Some(store) = self.active_store() else {
            return;
        };
        if let Err(e) = store.delete_attempt(identifier, kind).await {
            tracing::warn!(error = %e, identifier_type = %kind, "Failed to reset failed attempts");
        }
    }

    /// Failures within the current window; zero once the window has lapsed.
    pub async fn get_attempt_count(&self, identifier: &str, kind: IdentifierType) -> u32 {
        let Some(store) = self.active_store() else {
            return 0;
        };

        match store.find_attempt(identifier, kind).await {
            Ok(Some(row)) if row.last_attempt >= self.window_cutoff(Utc::now()) => {
                u32::try_from(row.attempt_count).unwrap_or(0)
            }
            Ok(_) => 0,
            Err(e) => {
                tracing::warn!(error = %e, identifier_type = %kind, "Failed to read attempt count");
                0
            }
        }
    }

    /// Removes lapsed locks and idle counters. Runs off the request path.
    pub async fn cleanup_expired(&self) -> Result<u64, AppError> {
        let Some(store) = self.store.as_ref() else {
            return Ok(0);
        };
        let now = Utc::now();
        store
            .delete_stale_attempts(now, self.window_cutoff(now))
            .await
    }
}
