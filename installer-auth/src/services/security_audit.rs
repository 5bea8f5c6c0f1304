//! Security audit trail for authentication outcomes and lockouts.
//!
//! Events are emitted as structured tracing records under the
//! `security_audit` target, so the log pipeline can route them separately
//! from application logs. Raw credentials never appear in an event; tokens
//! are referred to by hash prefix only.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::IdentifierType;

pub const AUDIT_TARGET: &str = "security_audit";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventType {
    /// Credential rejected
    FailedLogin,
    /// Identifier crossed the failure threshold
    AccountLocked,
    /// Client address crossed the failure threshold
    IpLocked,
    /// Request refused because its identifier is already locked
    LockedAttempt,
    SuccessfulLogin,
    TokenRevoked,
    AccessDenied,
}

impl SecurityEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityEventType::FailedLogin => "failed_login",
            SecurityEventType::AccountLocked => "account_locked",
            SecurityEventType::IpLocked => "ip_locked",
            SecurityEventType::LockedAttempt => "locked_attempt",
            SecurityEventType::SuccessfulLogin => "successful_login",
            SecurityEventType::TokenRevoked => "token_revoked",
            SecurityEventType::AccessDenied => "access_denied",
        }
    }
}

/// Short, non-reversible reference to a token hash for log correlation.
fn hash_ref(token_hash: &str) -> &str {
    token_hash.get(..12).unwrap_or(token_hash)
}

#[derive(Debug, Clone, Default)]
pub struct SecurityAuditLogger;

impl SecurityAuditLogger {
    pub fn new() -> Self {
        Self
    }

    pub fn failed_login(&self, username: Option<&str>, client_ip: Option<&str>, reason: &str) {
        tracing::warn!(
            target: AUDIT_TARGET,
            event_type = SecurityEventType::FailedLogin.as_str(),
            username = username.unwrap_or(""),
            client_ip = client_ip.unwrap_or(""),
            reason,
            "Authentication failed"
        );
    }

    pub fn account_locked(
        &self,
        identifier: &str,
        kind: IdentifierType,
        attempts: u32,
        until: DateTime<Utc>,
    ) {
        let event = match kind {
            IdentifierType::Ip => SecurityEventType::IpLocked,
            _ => SecurityEventType::AccountLocked,
        };
        // Token identifiers are already hashes; usernames and addresses are
        // the values an operator needs to act on.
        tracing::warn!(
            target: AUDIT_TARGET,
            event_type = event.as_str(),
            identifier,
            identifier_type = %kind,
            attempts,
            locked_until = %until.to_rfc3339(),
            "Identifier locked after repeated failures"
        );
    }

    pub fn locked_attempt(&self, identifier: &str, kind: IdentifierType, until: DateTime<Utc>) {
        tracing::warn!(
            target: AUDIT_TARGET,
            event_type = SecurityEventType::LockedAttempt.as_str(),
            identifier,
            identifier_type = %kind,
            locked_until = %until.to_rfc3339(),
            "Request refused for locked identifier"
        );
    }

    pub fn successful_login(&self, username: &str, org_id: &str, client_ip: Option<&str>) {
        tracing::info!(
            target: AUDIT_TARGET,
            event_type = SecurityEventType::SuccessfulLogin.as_str(),
            username,
            org_id,
            client_ip = client_ip.unwrap_or(""),
            "Authentication succeeded"
        );
    }

    pub fn token_revoked(&self, token_hash: &str, username: &str, reason: &str) {
        tracing::info!(
            target: AUDIT_TARGET,
            event_type = SecurityEventType::TokenRevoked.as_str(),
            token_ref = hash_ref(token_hash),
            username,
            reason,
            "Token revoked"
        );
    }

    pub fn access_denied(&self, username: &str, method: &str, path: &str, reason: &str) {
        tracing::warn!(
            target: AUDIT_TARGET,
            event_type = SecurityEventType::AccessDenied.as_str(),
            username,
            method,
            path,
            reason,
            "Access denied"
        );
    }
}
