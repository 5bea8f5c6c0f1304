use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// A revoked bearer token, stored by hash only.
#[derive(Debug, Clone, FromRow)]
pub struct RevokedToken {
    pub token_hash: String,
    pub revoked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub entity_id: Option<String>,
    pub entity_type: Option<String>,
    pub reason: Option<String>,
}

impl RevokedToken {
    /// Matches the `expires_at < now` sweep in the SQL store.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}
