//! PostgreSQL implementation of the engine stores.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use sqlx::postgres::PgPool;
use sqlx::{Postgres, QueryBuilder};

use crate::models::{
    ClusterKind, ClusterOwnership, FailedLoginAttempt, HostOwnership, IdentifierType,
    InfraEnvOwnership, RevokedToken,
};
use crate::services::authorizer::OwnershipFilter;
use crate::services::stores::{AttemptStore, EntityStore, RevocationStore};

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                tracing::error!("Database health check failed: {}", e);
                AppError::DatabaseError(anyhow::anyhow!("Database health check failed: {}", e))
            })?;
        Ok(())
    }
}

fn db_error(e: sqlx::Error) -> AppError {
    AppError::DatabaseError(anyhow::anyhow!(e))
}

#[async_trait]
impl AttemptStore for Database {
    async fn increment_attempt(
        &self,
        identifier: &str,
        kind: IdentifierType,
        now: DateTime<Utc>,
        window_cutoff: DateTime<Utc>,
    ) -> Result<i32, AppError> {
        // Every column is qualified with the table name: bare names are
        // ambiguous against EXCLUDED inside ON CONFLICT DO UPDATE.
        let count: i32 = sqlx::query_scalar(
            r#"
            INSERT INTO failed_login_attempts
                (identifier, identifier_type, attempt_count, first_attempt, last_attempt, locked_until)
            VALUES ($1, $2, 1, $3, $3, NULL)
            ON CONFLICT (identifier, identifier_type) DO UPDATE SET
                attempt_count = CASE
                    WHEN failed_login_attempts.last_attempt < $4 THEN 1
                    ELSE failed_login_attempts.attempt_count + 1
                END,
                first_attempt = CASE
                    WHEN failed_login_attempts.last_attempt < $4 THEN $3
                    ELSE failed_login_attempts.first_attempt
                END,
                locked_until = CASE
                    WHEN failed_login_attempts.last_attempt < $4 THEN NULL
                    ELSE failed_login_attempts.locked_until
                END,
                last_attempt = $3
            RETURNING attempt_count
            "#,
        )
        .bind(identifier)
        .bind(kind.as_str())
        .bind(now)
        .bind(window_cutoff)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(count)
    }

    async fn set_locked_until(
        &self,
        identifier: &str,
        kind: IdentifierType,
        until: DateTime<Utc>,
    ) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE failed_login_attempts SET locked_until = $3 WHERE identifier = $1 AND identifier_type = $2",
        )
        .bind(identifier)
        .bind(kind.as_str())
        .bind(until)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn find_attempt(
        &self,
        identifier: &str,
        kind: IdentifierType,
    ) -> Result<Option<FailedLoginAttempt>, AppError> {
        sqlx::query_as::<_, FailedLoginAttempt>(
            r#"
            SELECT identifier, identifier_type, attempt_count, first_attempt, last_attempt, locked_until
            FROM failed_login_attempts
            WHERE identifier = $1 AND identifier_type = $2
            "#,
        )
        .bind(identifier)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)
    }

    async fn delete_attempt(&self, identifier: &str, kind: IdentifierType) -> Result<(), AppError> {
        sqlx::query("DELETE FROM failed_login_attempts WHERE identifier = $1 AND identifier_type = $2")
            .bind(identifier)
            .bind(kind.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn delete_stale_attempts(
        &self,
        now: DateTime<Utc>,
        window_cutoff: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let result = sqlx::query(
            r#"
            DELETE FROM failed_login_attempts
            WHERE (locked_until IS NOT NULL AND locked_until < $1 AND last_attempt < $2)
               OR (locked_until IS NULL AND last_attempt < $2)
            "#,
        )
        .bind(now)
        .bind(window_cutoff)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl RevocationStore for Database {
    async fn insert_revoked(&self, token: &RevokedToken) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO revoked_tokens (token_hash, revoked_at, expires_at, entity_id, entity_type, reason)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&token.token_hash)
        .bind(token.revoked_at)
        .bind(token.expires_at)
        .bind(&token.entity_id)
        .bind(&token.entity_type)
        .bind(&token.reason)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(true),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(false),
            Err(e) => Err(db_error(e)),
        }
    }

    async fn find_revoked(&self, token_hash: &str) -> Result<Option<RevokedToken>, AppError> {
        sqlx::query_as::<_, RevokedToken>(
            r#"
            SELECT token_hash, revoked_at, expires_at, entity_id, entity_type, reason
            FROM revoked_tokens
            WHERE token_hash = $1
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)
    }

    async fn delete_expired_revoked(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let result = sqlx::query("DELETE FROM revoked_tokens WHERE expires_at < $1")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl EntityStore for Database {
    async fn find_cluster(&self, id: &str) -> Result<Option<ClusterOwnership>, AppError> {
        sqlx::query_as::<_, ClusterOwnership>(
            r#"
            SELECT id, user_name, org_id, ams_subscription_id, kind, openshift_cluster_id
            FROM clusters
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)
    }

    async fn find_day1_cluster(
        &self,
        openshift_cluster_id: &str,
    ) -> Result<Option<ClusterOwnership>, AppError> {
        sqlx::query_as::<_, ClusterOwnership>(
            r#"
            SELECT id, user_name, org_id, ams_subscription_id, kind, openshift_cluster_id
            FROM clusters
            WHERE openshift_cluster_id = $1 AND kind = $2
            LIMIT 1
            "#,
        )
        .bind(openshift_cluster_id)
        .bind(ClusterKind::Cluster.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)
    }

    async fn find_infra_env(&self, id: &str) -> Result<Option<InfraEnvOwnership>, AppError> {
        sqlx::query_as::<_, InfraEnvOwnership>(
            "SELECT id, user_name, org_id, cluster_id, image_token_key FROM infra_envs WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)
    }

    async fn find_host(&self, id: &str) -> Result<Option<HostOwnership>, AppError> {
        sqlx::query_as::<_, HostOwnership>(
            "SELECT id, infra_env_id, cluster_id FROM hosts WHERE id = $1 LIMIT 1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)
    }

    async fn list_clusters(
        &self,
        filter: &OwnershipFilter,
    ) -> Result<Vec<ClusterOwnership>, AppError> {
        let mut builder = QueryBuilder::<Postgres>::new(
            "SELECT id, user_name, org_id, ams_subscription_id, kind, openshift_cluster_id FROM clusters",
        );
        filter.push_where(&mut builder);
        builder.push(" ORDER BY id");

        builder
            .build_query_as::<ClusterOwnership>()
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)
    }
}
