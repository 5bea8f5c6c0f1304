mod common;

use chrono::{Duration, Utc};
use installer_auth::services::cleanup::run_jobs;
use installer_auth::services::{CleanupJob, MemoryStore, TokenBlacklist, hash_token};
use std::sync::Arc;

fn blacklist(store: &Arc<MemoryStore>) -> TokenBlacklist {
    TokenBlacklist::new(store.clone(), 100)
}

#[tokio::test]
async fn test_revoked_token_is_reported() {
    let store = Arc::new(MemoryStore::new());
    let blacklist = blacklist(&store);

    assert!(!blacklist.is_revoked("token-a").await.unwrap());

    blacklist
        .revoke(
            "token-a",
            Utc::now() + Duration::hours(1),
            Some("jdoe"),
            Some("user"),
            "logout",
        )
        .await
        .unwrap();

    assert!(blacklist.is_revoked("token-a").await.unwrap());
    assert!(!blacklist.is_revoked("token-b").await.unwrap());
}

#[tokio::test]
async fn test_only_the_hash_is_stored() {
    let store = Arc::new(MemoryStore::new());
    let blacklist = blacklist(&store);

    blacklist
        .revoke(
            "raw-secret-token",
            Utc::now() + Duration::hours(1),
            Some("jdoe"),
            Some("user"),
            "logout",
        )
        .await
        .unwrap();

    let rows = store.revoked_rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].token_hash, hash_token("raw-secret-token"));
    assert_eq!(rows[0].entity_id.as_deref(), Some("jdoe"));
    assert_eq!(rows[0].entity_type.as_deref(), Some("user"));
    assert_eq!(rows[0].reason.as_deref(), Some("logout"));
}

#[tokio::test]
async fn test_revoking_twice_keeps_one_row() {
    let store = Arc::new(MemoryStore::new());
    let blacklist = blacklist(&store);
    let expires_at = Utc::now() + Duration::hours(1);

    blacklist
        .revoke("token-a", expires_at, None, None, "logout")
        .await
        .unwrap();
    blacklist
        .revoke("token-a", expires_at, None, None, "compromised")
        .await
        .unwrap();

    let rows = store.revoked_rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].reason.as_deref(), Some("logout"));
}

#[tokio::test]
async fn test_revocation_is_shared_through_the_store() {
    let store = Arc::new(MemoryStore::new());
    let first = blacklist(&store);
    let second = blacklist(&store);

    first
        .revoke("token-a", Utc::now() + Duration::hours(1), None, None, "")
        .await
        .unwrap();

    assert!(second.is_revoked("token-a").await.unwrap());
    assert_eq!(store.revoked_rows()[0].reason, None);
}

#[tokio::test]
async fn test_cleanup_drops_naturally_expired_tokens() {
    let store = Arc::new(MemoryStore::new());
    let blacklist = Arc::new(blacklist(&store));

    blacklist
        .revoke("expired", Utc::now() - Duration::minutes(1), None, None, "logout")
        .await
        .unwrap();
    blacklist
        .revoke("live", Utc::now() + Duration::hours(1), None, None, "logout")
        .await
        .unwrap();

    assert_eq!(blacklist.cleanup_expired().await.unwrap(), 1);
    let rows = store.revoked_rows();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].token_hash, hash_token("live"));

    // The scheduled job goes through the same path.
    blacklist
        .revoke("expired-again", Utc::now() - Duration::minutes(1), None, None, "logout")
        .await
        .unwrap();
    run_jobs(&[blacklist.clone() as Arc<dyn CleanupJob>]).await;
    assert_eq!(store.revoked_rows().len(), 1);
    assert!(blacklist.is_revoked("live").await.unwrap());
}
