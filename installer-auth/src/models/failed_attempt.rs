use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// What a failure counter is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierType {
    Username,
    Ip,
    UserIp,
}

impl IdentifierType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdentifierType::Username => "username",
            IdentifierType::Ip => "ip",
            IdentifierType::UserIp => "user_ip",
        }
    }
}

impl fmt::Display for IdentifierType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row per (identifier, identifier_type).
#[derive(Debug, Clone, FromRow)]
pub struct FailedLoginAttempt {
    pub identifier: String,
    pub identifier_type: String,
    pub attempt_count: i32,
    pub first_attempt: DateTime<Utc>,
    pub last_attempt: DateTime<Utc>,
    pub locked_until: Option<DateTime<Utc>>,
}

impl FailedLoginAttempt {
    pub fn first_failure(identifier: &str, kind: IdentifierType, now: DateTime<Utc>) -> Self {
        Self {
            identifier: identifier.to_string(),
            identifier_type: kind.as_str().to_string(),
            attempt_count: 1,
            first_attempt: now,
            last_attempt: now,
            locked_until: None,
        }
    }

    pub fn locked_at(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.locked_until.filter(|until| *until > now)
    }
}
