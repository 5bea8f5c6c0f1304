//! Persistence seams of the engine.
//!
//! `Database` implements these against PostgreSQL; `MemoryStore` keeps the
//! same contract in process for tests and single-instance development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use service_core::error::AppError;

use crate::models::{
    ClusterKind, ClusterOwnership, FailedLoginAttempt, HostOwnership, IdentifierType,
    InfraEnvOwnership, RevokedToken,
};
use crate::services::authorizer::OwnershipFilter;

#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Records one failure in a single atomic step and returns the new count.
    ///
    /// A row whose `last_attempt` is older than `window_cutoff` restarts at 1
    /// with its lock cleared.
    async fn increment_attempt(
        &self,
        identifier: &str,
        kind: IdentifierType,
        now: DateTime<Utc>,
        window_cutoff: DateTime<Utc>,
    ) -> Result<i32, AppError>;

    async fn set_locked_until(
        &self,
        identifier: &str,
        kind: IdentifierType,
        until: DateTime<Utc>,
    ) -> Result<(), AppError>;

    async fn find_attempt(
        &self,
        identifier: &str,
        kind: IdentifierType,
    ) -> Result<Option<FailedLoginAttempt>, AppError>;

    async fn delete_attempt(&self, identifier: &str, kind: IdentifierType) -> Result<(), AppError>;

    /// Deletes rows whose lock has lapsed with no activity since `window_cutoff`,
    /// and unlocked rows idle since `window_cutoff`.
    async fn delete_stale_attempts(
        &self,
        now: DateTime<Utc>,
        window_cutoff: DateTime<Utc>,
    ) -> Result<u64, AppError>;
}

#[async_trait]
pub trait RevocationStore: Send + Sync {
    /// Returns `false` when the hash was already present.
    async fn insert_revoked(&self, token: &RevokedToken) -> Result<bool, AppError>;

    async fn find_revoked(&self, token_hash: &str) -> Result<Option<RevokedToken>, AppError>;

    async fn delete_expired_revoked(&self, now: DateTime<Utc>) -> Result<u64, AppError>;
}

#[async_trait]
pub trait EntityStore: Send + Sync {
    async fn find_cluster(&self, id: &str) -> Result<Option<ClusterOwnership>, AppError>;

    /// The installed (day-1) cluster sharing `openshift_cluster_id`.
    async fn find_day1_cluster(
        &self,
        openshift_cluster_id: &str,
    ) -> Result<Option<ClusterOwnership>, AppError>;

    async fn find_infra_env(&self, id: &str) -> Result<Option<InfraEnvOwnership>, AppError>;

    async fn find_host(&self, id: &str) -> Result<Option<HostOwnership>, AppError>;

    /// Clusters visible under `filter`, ordered by id.
    async fn list_clusters(&self, filter: &OwnershipFilter)
    -> Result<Vec<ClusterOwnership>, AppError>;
}

/// In-process store. Per-key updates go through `dashmap` entries, which
/// hold the shard lock for the whole read-modify-write.
#[derive(Default)]
pub struct MemoryStore {
    attempts: DashMap<(String, IdentifierType), FailedLoginAttempt>,
    revoked: DashMap<String, RevokedToken>,
    clusters: DashMap<String, ClusterOwnership>,
    infra_envs: DashMap<String, InfraEnvOwnership>,
    hosts: DashMap<String, HostOwnership>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_cluster(&self, cluster: ClusterOwnership) {
        self.clusters.insert(cluster.id.clone(), cluster);
    }

    pub fn insert_infra_env(&self, infra_env: InfraEnvOwnership) {
        self.infra_envs.insert(infra_env.id.clone(), infra_env);
    }

    pub fn insert_host(&self, host: HostOwnership) {
        self.hosts.insert(host.id.clone(), host);
    }

    /// Rewinds an attempt row, letting tests step past the window.
    pub fn backdate_attempt(
        &self,
        identifier: &str,
        kind: IdentifierType,
        last_attempt: DateTime<Utc>,
    ) {
        if let Some(mut row) = self.attempts.get_mut(&(identifier.to_string(), kind)) {
            row.last_attempt = last_attempt;
        }
    }

    pub fn attempt_rows(&self) -> usize {
        self.attempts.len()
    }

    pub fn revoked_rows(&self) -> Vec<RevokedToken> {
        self.revoked.iter().map(|r| r.value().clone()).collect()
    }
}

#[async_trait]
impl AttemptStore for MemoryStore {
    async fn increment_attempt(
        &self,
        identifier: &str,
        kind: IdentifierType,
        now: DateTime<Utc>,
        window_cutoff: DateTime<Utc>,
    ) -> Result<i32, AppError> {
        let count = match self.attempts.entry((identifier.to_string(), kind)) {
            Entry::Occupied(mut occupied) => {
                let row = occupied.get_mut();
                if row.last_attempt < window_cutoff {
                    row.attempt_count = 1;
                    row.first_attempt = now;
                    row.locked_until = None;
                } else {
                    row.attempt_count += 1;
                }
                row.last_attempt = now;
                row.attempt_count
            }
            Entry::Vacant(vacant) => {
                vacant.insert(FailedLoginAttempt::first_failure(identifier, kind, now));
                1
            }
        };
        Ok(count)
    }

    async fn set_locked_until(
        &self,
        identifier: &str,
        kind: IdentifierType,
        until: DateTime<Utc>,
    ) -> Result<(), AppError> {
        if let Some(mut row) = self.attempts.get_mut(&(identifier.to_string(), kind)) {
            row.locked_until = Some(until);
        }
        Ok(())
    }

    async fn find_attempt(
        &self,
        identifier: &str,
        kind: IdentifierType,
    ) -> Result<Option<FailedLoginAttempt>, AppError> {
        Ok(self
            .attempts
            .get(&(identifier.to_string(), kind))
            .map(|row| row.value().clone()))
    }

    async fn delete_attempt(&self, identifier: &str, kind: IdentifierType) -> Result<(), AppError> {
        self.attempts.remove(&(identifier.to_string(), kind));
        Ok(())
    }

    async fn delete_stale_attempts(
        &self,
        now: DateTime<Utc>,
        window_cutoff: DateTime<Utc>,
    ) -> Result<u64, AppError> {
        let before = self.attempts.len();
        self.attempts.retain(|_, row| match row.locked_until {
            Some(until) => !(until < now && row.last_attempt < window_cutoff),
            None => row.last_attempt >= window_cutoff,
        });
        Ok(before.saturating_sub(self.attempts.len()) as u64)
    }
}

#[async_trait]
impl RevocationStore for MemoryStore {
    async fn insert_revoked(&self, token: &RevokedToken) -> Result<bool, AppError> {
        match self.revoked.entry(token.token_hash.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(vacant) => {
                vacant.insert(token.clone());
                Ok(true)
            }
        }
    }

    async fn find_revoked(&self, token_hash: &str) -> Result<Option<RevokedToken>, AppError> {
        Ok(self.revoked.get(token_hash).map(|r| r.value().clone()))
    }

    async fn delete_expired_revoked(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let before = self.revoked.len();
        self.revoked.retain(|_, row| !row.is_expired(now));
        Ok(before.saturating_sub(self.revoked.len()) as u64)
    }
}

#[async_trait]
impl EntityStore for MemoryStore {
    async fn find_cluster(&self, id: &str) -> Result<Option<ClusterOwnership>, AppError> {
        Ok(self.clusters.get(id).map(|c| c.value().clone()))
    }

    async fn find_day1_cluster(
        &self,
        openshift_cluster_id: &str,
    ) -> Result<Option<ClusterOwnership>, AppError> {
        Ok(self
            .clusters
            .iter()
            .find(|c| {
                c.kind() == ClusterKind::Cluster
                    && c.openshift_cluster_id.as_deref() == Some(openshift_cluster_id)
            })
            .map(|c| c.value().clone()))
    }

    async fn find_infra_env(&self, id: &str) -> Result<Option<InfraEnvOwnership>, AppError> {
        Ok(self.infra_envs.get(id).map(|i| i.value().clone()))
    }

    async fn find_host(&self, id: &str) -> Result<Option<HostOwnership>, AppError> {
        Ok(self.hosts.get(id).map(|h| h.value().clone()))
    }

    async fn list_clusters(
        &self,
        filter: &OwnershipFilter,
    ) -> Result<Vec<ClusterOwnership>, AppError> {
        let mut clusters: Vec<ClusterOwnership> = self
            .clusters
            .iter()
            .filter(|c| filter.matches(&c.org_id, &c.user_name))
            .map(|c| c.value().clone())
            .collect();
        clusters.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(clusters)
    }
}
