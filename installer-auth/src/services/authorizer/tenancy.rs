use std::sync::Arc;

use crate::config::CacheConfig;
use crate::models::{ClusterOwnership, Principal, Role};
use crate::services::authorizer::{Action, EntityRef, OwnershipFilter, RequestScope, RouteSecurity};
use crate::services::cache::TtlCache;
use crate::services::error::AuthError;
use crate::services::identity::{
    ACTION_CREATE, CAPABILITY_TYPE_ORGANIZATION, IdentityClient, RESOURCE_BARE_METAL_CLUSTER,
    RESOURCE_SUBSCRIPTION,
};
use crate::services::metrics;
use crate::services::security_audit::SecurityAuditLogger;
use crate::services::stores::EntityStore;

type AccessKey = (String, String, String, &'static str);

/// Ownership and entitlement checks backed by the entitlement service.
///
/// With org tenancy on, members of the owning organization may read each
/// other's resources, and writes go through a subscription access review.
/// Without it, only the creating user has access.
pub struct TenancyAuthorizer {
    tenancy: bool,
    org_feature_gates: bool,
    identity: Arc<dyn IdentityClient>,
    entities: Arc<dyn EntityStore>,
    audit: SecurityAuditLogger,
    entitlements: TtlCache<String, bool>,
    access_reviews: TtlCache<AccessKey, bool>,
    capabilities: TtlCache<(String, String), bool>,
}

impl TenancyAuthorizer {
    pub fn new(
        tenancy: bool,
        org_feature_gates: bool,
        identity: Arc<dyn IdentityClient>,
        entities: Arc<dyn EntityStore>,
        cache: &CacheConfig,
        audit: SecurityAuditLogger,
    ) -> Self {
        Self {
            tenancy,
            org_feature_gates,
            identity,
            entities,
            audit,
            entitlements: TtlCache::new(cache.access_review_ttl, cache.max_entries),
            access_reviews: TtlCache::new(cache.access_review_ttl, cache.max_entries),
            capabilities: TtlCache::new(cache.capability_ttl, cache.max_entries),
        }
    }

    pub fn owned_by(&self, principal: &Principal) -> OwnershipFilter {
        if principal.is_admin() {
            OwnershipFilter::unrestricted()
        } else if self.tenancy {
            OwnershipFilter::org(principal.org_id.clone())
        } else {
            OwnershipFilter::user(principal.username.clone())
        }
    }

    pub async fn has_access_to(
        &self,
        principal: &Principal,
        entity: &EntityRef,
        action: Action,
    ) -> Result<bool, AuthError> {
        match principal.role {
            Role::Admin => return Ok(true),
            Role::ReadOnlyAdmin => return Ok(!action.is_write()),
            Role::User => {}
        }

        match entity {
            EntityRef::Cluster(id) => self.cluster_access(id, action, principal).await,
            EntityRef::InfraEnv(id) => self.infra_env_access(id, action, principal).await,
            EntityRef::Host(id) => {
                let Some(host) = self.entities.find_host(id).await? else {
                    return Ok(false);
                };
                match host.bound_cluster() {
                    Some(cluster_id) => self.cluster_access(cluster_id, action, principal).await,
                    None => {
                        self.infra_env_access(&host.infra_env_id, action, principal)
                            .await
                    }
                }
            }
        }
    }

    pub async fn has_org_based_capability(
        &self,
        principal: &Principal,
        capability: &str,
    ) -> Result<bool, AuthError> {
        if !self.org_feature_gates {
            return Ok(false);
        }

        let key = (principal.username.clone(), capability.to_string());
        if let Some(allowed) = self.capabilities.get(&key) {
            return Ok(allowed);
        }

        let allowed = review_outcome(
            self.identity
                .capability_review(&principal.username, capability, CAPABILITY_TYPE_ORGANIZATION)
                .await,
        )?;
        self.capabilities.set(key, allowed);
        Ok(allowed)
    }

    pub async fn authorize_request(
        &self,
        principal: &mut Principal,
        route: &RouteSecurity,
        scope: &RequestScope,
    ) -> Result<(), AuthError> {
        if route.scheme.is_image() {
            return self.authorize_image(principal, scope);
        }

        if !route.permits(principal.role) {
            return Err(self.deny(
                principal,
                scope,
                "role",
                AuthError::forbidden(format!("role {} may not call this route", principal.role)),
            ));
        }

        if principal.role == Role::ReadOnlyAdmin && scope.action().is_write() {
            return Err(self.deny(
                principal,
                scope,
                "read_only",
                AuthError::forbidden("read-only administrators may not modify resources"),
            ));
        }

        if !self.is_entitled(&principal.username).await? {
            return Err(self.deny(
                principal,
                scope,
                "entitlement",
                AuthError::forbidden("account is not entitled to use the installer"),
            ));
        }

        if principal.role == Role::User
            && let Some(entity) = scope.entity()
            && !self.has_access_to(principal, &entity, scope.action()).await?
        {
            // Resources the caller may not see are reported as absent.
            return Err(self.deny(
                principal,
                scope,
                "ownership",
                AuthError::NotFound("resource not found".to_string()),
            ));
        }

        principal.is_authorized = true;
        Ok(())
    }

    fn authorize_image(
        &self,
        principal: &mut Principal,
        scope: &RequestScope,
    ) -> Result<(), AuthError> {
        let Some(requested) = scope.infra_env_id.as_deref() else {
            return Err(self.deny(
                principal,
                scope,
                "image_scope",
                AuthError::BadRequest("infra_env_id path parameter is required".to_string()),
            ));
        };

        if principal.image_subject.as_deref() != Some(requested) {
            return Err(self.deny(
                principal,
                scope,
                "image_scope",
                AuthError::forbidden("image token is not valid for this infra env"),
            ));
        }

        principal.is_authorized = true;
        Ok(())
    }

    /// Whether the account may use the installer at all. Cached per username,
    /// so a revoked entitlement stays usable until the entry expires.
    async fn is_entitled(&self, username: &str) -> Result<bool, AuthError> {
        if let Some(entitled) = self.entitlements.get(&username.to_string()) {
            return Ok(entitled);
        }

        let entitled = review_outcome(
            self.identity
                .access_review(username, ACTION_CREATE, RESOURCE_BARE_METAL_CLUSTER, "")
                .await,
        )?;
        self.entitlements.set(username.to_string(), entitled);
        Ok(entitled)
    }

    fn owner_access(&self, user_name: &str, org_id: &str, principal: &Principal) -> bool {
        user_name == principal.username
            || (self.tenancy && !org_id.is_empty() && org_id == principal.org_id)
    }

    async fn cluster_access(
        &self,
        cluster_id: &str,
        action: Action,
        principal: &Principal,
    ) -> Result<bool, AuthError> {
        let Some(cluster) = self.entities.find_cluster(cluster_id).await? else {
            return Ok(false);
        };

        match action {
            Action::Read => Ok(self.owner_access(&cluster.user_name, &cluster.org_id, principal)),
            Action::Update | Action::Delete => {
                self.subscription_access(&cluster, action, principal).await
            }
        }
    }

    async fn infra_env_access(
        &self,
        infra_env_id: &str,
        action: Action,
        principal: &Principal,
    ) -> Result<bool, AuthError> {
        let Some(infra_env) = self.entities.find_infra_env(infra_env_id).await? else {
            return Ok(false);
        };

        if !self.tenancy {
            return Ok(infra_env.user_name == principal.username);
        }
        if action == Action::Read {
            return Ok(self.owner_access(&infra_env.user_name, &infra_env.org_id, principal));
        }
        if infra_env.user_name == principal.username {
            return Ok(true);
        }

        match infra_env.bound_cluster() {
            Some(cluster_id) => self.cluster_access(cluster_id, action, principal).await,
            None => Ok(false),
        }
    }

    /// Writes by the creator always pass; otherwise tenancy defers to an
    /// access review on the subscription.
    async fn subscription_access(
        &self,
        cluster: &ClusterOwnership,
        action: Action,
        principal: &Principal,
    ) -> Result<bool, AuthError> {
        if cluster.user_name == principal.username {
            return Ok(true);
        }
        if !self.tenancy {
            return Ok(false);
        }

        let Some(subscription_id) = self.governing_subscription(cluster).await? else {
            tracing::debug!(cluster_id = %cluster.id, "Cluster has no subscription to review");
            return Ok(false);
        };

        let key = (
            principal.username.clone(),
            principal.org_id.clone(),
            subscription_id,
            action.review_action(),
        );
        if let Some(allowed) = self.access_reviews.get(&key) {
            return Ok(allowed);
        }

        let allowed = review_outcome(
            self.identity
                .access_review(
                    &principal.username,
                    action.review_action(),
                    RESOURCE_SUBSCRIPTION,
                    &key.2,
                )
                .await,
        )?;
        self.access_reviews.set(key, allowed);
        Ok(allowed)
    }

    /// Day-2 records are governed by the subscription of the installed
    /// cluster they extend, when that cluster is known here.
    async fn governing_subscription(
        &self,
        cluster: &ClusterOwnership,
    ) -> Result<Option<String>, AuthError> {
        if cluster.is_day2()
            && let Some(openshift_id) = cluster.openshift_cluster_id.as_deref()
            && let Some(day1) = self.entities.find_day1_cluster(openshift_id).await?
            && let Some(subscription) = day1.ams_subscription_id.filter(|s| !s.is_empty())
        {
            return Ok(Some(subscription));
        }

        Ok(cluster
            .ams_subscription_id
            .clone()
            .filter(|s| !s.is_empty()))
    }

    fn deny(
        &self,
        principal: &Principal,
        scope: &RequestScope,
        reason: &'static str,
        err: AuthError,
    ) -> AuthError {
        self.audit.access_denied(
            &principal.username,
            scope.method.as_str(),
            &scope.path,
            reason,
        );
        metrics::record_authz_denial(reason);
        err
    }
}

/// A rejected review call means "not allowed"; outages propagate.
fn review_outcome(result: Result<bool, AuthError>) -> Result<bool, AuthError> {
    match result {
        Err(AuthError::Unauthorized(_)) | Err(AuthError::Forbidden(_)) => Ok(false),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClusterKind, InfraEnvOwnership};
    use crate::services::identity::MockIdentityClient;
    use crate::services::stores::MemoryStore;
    use axum::http::Method;

    fn cluster(id: &str, user: &str, org: &str, subscription: Option<&str>) -> ClusterOwnership {
        ClusterOwnership {
            id: id.to_string(),
            user_name: user.to_string(),
            org_id: org.to_string(),
            ams_subscription_id: subscription.map(str::to_string),
            kind: ClusterKind::Cluster.as_str().to_string(),
            openshift_cluster_id: None,
        }
    }

    fn authorizer(
        tenancy: bool,
        store: Arc<MemoryStore>,
        identity: Arc<MockIdentityClient>,
    ) -> TenancyAuthorizer {
        TenancyAuthorizer::new(
            tenancy,
            true,
            identity,
            store,
            &CacheConfig::default(),
            SecurityAuditLogger::new(),
        )
    }

    fn user(name: &str, org: &str) -> Principal {
        Principal::new(Role::User, name).with_org(org)
    }

    #[test]
    fn test_owned_by() {
        let store = Arc::new(MemoryStore::new());
        let identity = Arc::new(MockIdentityClient::new());

        let tenant = authorizer(true, store.clone(), identity.clone());
        assert_eq!(tenant.owned_by(&user("jdoe", "org-1")), OwnershipFilter::org("org-1"));
        assert!(tenant.owned_by(&Principal::admin()).is_unrestricted());

        let solo = authorizer(false, store, identity);
        assert_eq!(solo.owned_by(&user("jdoe", "org-1")), OwnershipFilter::user("jdoe"));
    }

    #[tokio::test]
    async fn test_org_member_reads_but_needs_review_to_write() {
        let store = Arc::new(MemoryStore::new());
        store.insert_cluster(cluster("c-1", "owner", "org-1", Some("sub-1")));
        let identity = Arc::new(MockIdentityClient::new());
        let authz = authorizer(true, store, identity.clone());
        let member = user("member", "org-1");
        let entity = EntityRef::Cluster("c-1".to_string());

        assert!(authz.has_access_to(&member, &entity, Action::Read).await.unwrap());
        assert!(!authz.has_access_to(&member, &entity, Action::Update).await.unwrap());

        identity.set_access("member", "sub-1", Ok(true));
        // The earlier denial is cached for this action; delete is reviewed fresh.
        assert!(!authz.has_access_to(&member, &entity, Action::Update).await.unwrap());
        assert!(authz.has_access_to(&member, &entity, Action::Delete).await.unwrap());
        assert_eq!(identity.access_review_calls(), 2);
    }

    #[tokio::test]
    async fn test_outage_is_not_cached() {
        let store = Arc::new(MemoryStore::new());
        store.insert_cluster(cluster("c-1", "owner", "org-1", Some("sub-1")));
        let identity = Arc::new(MockIdentityClient::new());
        identity.set_access(
            "member",
            "sub-1",
            Err(AuthError::ServiceUnavailable("503".to_string())),
        );
        let authz = authorizer(true, store, identity.clone());
        let member = user("member", "org-1");
        let entity = EntityRef::Cluster("c-1".to_string());

        assert!(matches!(
            authz.has_access_to(&member, &entity, Action::Update).await,
            Err(AuthError::ServiceUnavailable(_))
        ));

        identity.set_access("member", "sub-1", Ok(true));
        assert!(authz.has_access_to(&member, &entity, Action::Update).await.unwrap());
    }

    #[tokio::test]
    async fn test_infra_env_without_tenancy_is_owner_only() {
        let store = Arc::new(MemoryStore::new());
        store.insert_infra_env(InfraEnvOwnership {
            id: "ie-1".to_string(),
            user_name: "owner".to_string(),
            org_id: "org-1".to_string(),
            cluster_id: None,
            image_token_key: None,
        });
        let authz = authorizer(false, store, Arc::new(MockIdentityClient::new()));
        let entity = EntityRef::InfraEnv("ie-1".to_string());

        assert!(
            authz
                .has_access_to(&user("owner", "org-1"), &entity, Action::Update)
                .await
                .unwrap()
        );
        assert!(
            !authz
                .has_access_to(&user("member", "org-1"), &entity, Action::Read)
                .await
                .unwrap()
        );
        assert!(
            !authz
                .has_access_to(
                    &user("owner", "org-1"),
                    &EntityRef::InfraEnv("missing".to_string()),
                    Action::Read
                )
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_read_only_admin_cannot_write() {
        let store = Arc::new(MemoryStore::new());
        let identity = Arc::new(MockIdentityClient::new());
        identity.set_access("viewer", "", Ok(true));
        let authz = authorizer(true, store, identity);

        let mut viewer = Principal::new(Role::ReadOnlyAdmin, "viewer");
        let route = RouteSecurity::new(crate::services::authenticator::AuthScheme::UserAuth);

        let read = RequestScope::new(Method::GET, "/clusters/c-1").with_cluster("c-1");
        authz.authorize_request(&mut viewer, &route, &read).await.unwrap();
        assert!(viewer.is_authorized);

        let mut viewer = Principal::new(Role::ReadOnlyAdmin, "viewer");
        let write = RequestScope::new(Method::PATCH, "/clusters/c-1").with_cluster("c-1");
        assert!(matches!(
            authz.authorize_request(&mut viewer, &route, &write).await,
            Err(AuthError::Forbidden(_))
        ));
        assert!(!viewer.is_authorized);
    }

    #[tokio::test]
    async fn test_capabilities_respect_feature_gate_flag() {
        let store = Arc::new(MemoryStore::new());
        let identity = Arc::new(MockIdentityClient::new());
        identity.set_capability("jdoe", Ok(true));

        let gated = authorizer(true, store.clone(), identity.clone());
        let principal = user("jdoe", "org-1");
        assert!(gated.has_org_based_capability(&principal, "feature.x").await.unwrap());
        assert!(gated.has_org_based_capability(&principal, "feature.x").await.unwrap());
        assert_eq!(identity.capability_review_calls(), 1);

        let ungated = TenancyAuthorizer::new(
            true,
            false,
            identity.clone(),
            store,
            &CacheConfig::default(),
            SecurityAuditLogger::new(),
        );
        assert!(!ungated.has_org_based_capability(&principal, "feature.x").await.unwrap());
        assert_eq!(identity.capability_review_calls(), 1);
    }

    #[test]
    fn test_rejected_reviews_mean_false() {
        assert_eq!(review_outcome(Err(AuthError::unauthorized("403"))), Ok(false));
        assert!(review_outcome(Err(AuthError::Internal("db".into()))).is_err());
        assert_eq!(review_outcome(Ok(true)), Ok(true));
    }
}
