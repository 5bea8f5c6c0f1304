//! Registry of bearer tokens revoked before their natural expiry.

use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;
use service_core::error::AppError;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::models::RevokedToken;
use crate::services::cache::TtlCache;
use crate::services::error::AuthError;
use crate::services::stores::RevocationStore;

/// SHA-256 of the raw token, hex encoded. The raw value is never stored.
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[derive(Deserialize)]
struct ExpiryClaims {
    #[serde(default)]
    exp: Option<i64>,
}

/// `exp` of a JWT that was already verified upstream; the signature is not
/// checked again.
pub fn token_expiry(token: &str) -> Option<DateTime<Utc>> {
    let mut validation = Validation::new(Algorithm::RS256);
    validation.insecure_disable_signature_validation();
    validation.required_spec_claims = HashSet::new();
    validation.validate_exp = false;
    validation.validate_aud = false;

    let data = decode::<ExpiryClaims>(token, &DecodingKey::from_secret(&[]), &validation).ok()?;
    DateTime::from_timestamp(data.claims.exp?, 0)
}

pub struct TokenBlacklist {
    store: Arc<dyn RevocationStore>,
    cache: TtlCache<String, DateTime<Utc>>,
}

impl TokenBlacklist {
    pub fn new(store: Arc<dyn RevocationStore>, cache_capacity: usize) -> Self {
        Self {
            store,
            cache: TtlCache::new(Duration::from_secs(3600), cache_capacity),
        }
    }

    /// Revokes `token` until `expires_at`. Revoking twice is not an error.
    pub async fn revoke(
        &self,
        token: &str,
        expires_at: DateTime<Utc>,
        entity_id: Option<&str>,
        entity_type: Option<&str>,
        reason: &str,
    ) -> Result<(), AuthError> {
        let token_hash = hash_token(token);
        let row = RevokedToken {
            token_hash: token_hash.clone(),
            revoked_at: Utc::now(),
            expires_at,
            entity_id: entity_id.map(str::to_string),
            entity_type: entity_type.map(str::to_string),
            reason: Some(reason.to_string()).filter(|r| !r.is_empty()),
        };

        let inserted = self.store.insert_revoked(&row).await?;
        if !inserted {
            tracing::debug!("Token already revoked");
        }

        self.remember(token_hash, expires_at);
        Ok(())
    }

    /// Cache first; on a miss the store is consulted and a hit is cached.
    pub async fn is_revoked(&self, token: &str) -> Result<bool, AuthError> {
        let token_hash = hash_token(token);
        if self.cache.get(&token_hash).is_some() {
            return Ok(true);
        }

        match self.store.find_revoked(&token_hash).await? {
            Some(row) => {
                self.remember(token_hash, row.expires_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Drops rows whose token has expired on its own.
    pub async fn cleanup_expired(&self) -> Result<u64, AppError> {
        self.cache.purge_expired();
        self.store.delete_expired_revoked(Utc::now()).await
    }

    fn remember(&self, token_hash: String, expires_at: DateTime<Utc>) {
        let ttl = (expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        self.cache.set_with_ttl(token_hash, expires_at, ttl);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::stores::MemoryStore;

    #[test]
    fn test_hash_token_is_stable_and_not_the_token() {
        let hash = hash_token("my-token");
        assert_eq!(hash, hash_token("my-token"));
        assert_ne!(hash, "my-token");
        assert_eq!(hash.len(), 64);
        assert_ne!(hash, hash_token("other-token"));
    }

    #[test]
    fn test_token_expiry_reads_exp_claim() {
        use jsonwebtoken::{EncodingKey, Header, encode};

        let exp = Utc::now().timestamp() + 600;
        let token = encode(
            &Header::default(),
            &serde_json::json!({ "sub": "jdoe", "exp": exp }),
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();
        assert_eq!(token_expiry(&token).map(|t| t.timestamp()), Some(exp));

        let no_exp = encode(
            &Header::default(),
            &serde_json::json!({ "sub": "jdoe" }),
            &EncodingKey::from_secret(b"secret"),
        )
        .unwrap();
        assert_eq!(token_expiry(&no_exp), None);
        assert_eq!(token_expiry("not-a-jwt"), None);
    }

    #[tokio::test]
    async fn test_cache_is_backfilled_from_store() {
        let store = Arc::new(MemoryStore::new());
        let writer = TokenBlacklist::new(store.clone(), 100);
        let reader = TokenBlacklist::new(store.clone(), 100);

        writer
            .revoke(
                "shared-token",
                Utc::now() + chrono::Duration::hours(1),
                None,
                None,
                "logout",
            )
            .await
            .unwrap();

        // A second instance learns about the revocation through the store.
        assert!(reader.cache.get(&hash_token("shared-token")).is_none());
        assert!(reader.is_revoked("shared-token").await.unwrap());
        assert!(reader.cache.get(&hash_token("shared-token")).is_some());
    }
}
