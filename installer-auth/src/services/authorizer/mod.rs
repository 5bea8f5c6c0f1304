//! Authorization decisions for authenticated principals.
//!
//! The strategy follows the authenticator: federated deployments get the
//! tenancy-aware authorizer, everything else trusts the caller fully.

mod filter;
mod tenancy;

pub use filter::OwnershipFilter;
pub use tenancy::TenancyAuthorizer;

use axum::http::Method;
use std::sync::Arc;

use crate::config::CacheConfig;
use crate::models::{Principal, Role};
use crate::services::authenticator::{AuthScheme, Authenticator};
use crate::services::error::AuthError;
use crate::services::identity::IdentityClient;
use crate::services::security_audit::SecurityAuditLogger;
use crate::services::stores::EntityStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Read,
    Update,
    Delete,
}

impl Action {
    pub fn from_method(method: &Method) -> Self {
        if method == Method::GET || method == Method::HEAD {
            Action::Read
        } else if method == Method::DELETE {
            Action::Delete
        } else {
            Action::Update
        }
    }

    pub fn is_write(&self) -> bool {
        !matches!(self, Action::Read)
    }

    /// Verb sent to the entitlement service's access review.
    pub fn review_action(&self) -> &'static str {
        match self {
            Action::Read => crate::services::identity::ACTION_GET,
            Action::Update => crate::services::identity::ACTION_UPDATE,
            Action::Delete => crate::services::identity::ACTION_DELETE,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityRef {
    Cluster(String),
    InfraEnv(String),
    Host(String),
}

/// Security requirements a route declares.
#[derive(Debug, Clone)]
pub struct RouteSecurity {
    pub scheme: AuthScheme,
    /// Roles allowed on the route; empty allows every role.
    pub roles: Vec<Role>,
}

impl RouteSecurity {
    pub fn new(scheme: AuthScheme) -> Self {
        Self {
            scheme,
            roles: Vec::new(),
        }
    }

    pub fn with_roles(mut self, roles: &[Role]) -> Self {
        self.roles = roles.to_vec();
        self
    }

    pub fn permits(&self, role: Role) -> bool {
        self.roles.is_empty() || self.roles.contains(&role)
    }
}

/// The parts of a request an authorization decision looks at.
#[derive(Debug, Clone)]
pub struct RequestScope {
    pub method: Method,
    pub path: String,
    pub cluster_id: Option<String>,
    pub infra_env_id: Option<String>,
}

impl RequestScope {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            cluster_id: None,
            infra_env_id: None,
        }
    }

    pub fn with_cluster(mut self, cluster_id: impl Into<String>) -> Self {
        self.cluster_id = Some(cluster_id.into()).filter(|id: &String| !id.is_empty());
        self
    }

    pub fn with_infra_env(mut self, infra_env_id: impl Into<String>) -> Self {
        self.infra_env_id = Some(infra_env_id.into()).filter(|id: &String| !id.is_empty());
        self
    }

    pub fn action(&self) -> Action {
        Action::from_method(&self.method)
    }

    /// The entity the path addresses; the cluster wins when both are present.
    pub fn entity(&self) -> Option<EntityRef> {
        self.cluster_id
            .clone()
            .map(EntityRef::Cluster)
            .or_else(|| self.infra_env_id.clone().map(EntityRef::InfraEnv))
    }
}

pub enum Authorizer {
    /// Every check passes.
    None,
    TenancyAware(Box<TenancyAuthorizer>),
}

impl Authorizer {
    pub fn for_authenticator(
        authenticator: &Authenticator,
        identity: Option<Arc<dyn IdentityClient>>,
        entities: Arc<dyn EntityStore>,
        cache: &CacheConfig,
        audit: SecurityAuditLogger,
    ) -> Result<Self, AuthError> {
        let Authenticator::Federated(_) = authenticator else {
            return Ok(Authorizer::None);
        };
        let identity = identity.ok_or_else(|| {
            AuthError::Internal("identity service client is required for rhsso".to_string())
        })?;

        Ok(Authorizer::TenancyAware(Box::new(TenancyAuthorizer::new(
            authenticator.tenancy_enabled(),
            authenticator.org_feature_gates_enabled(),
            identity,
            entities,
            cache,
            audit,
        ))))
    }

    pub fn is_admin(&self, principal: &Principal) -> bool {
        match self {
            Authorizer::None => true,
            Authorizer::TenancyAware(_) => principal.is_admin(),
        }
    }

    pub fn owned_by(&self, principal: &Principal) -> OwnershipFilter {
        match self {
            Authorizer::None => OwnershipFilter::unrestricted(),
            Authorizer::TenancyAware(a) => a.owned_by(principal),
        }
    }

    /// `owned_by` narrowed to one user; an empty username narrows nothing.
    pub fn owned_by_user(&self, principal: &Principal, username: &str) -> OwnershipFilter {
        let filter = self.owned_by(principal);
        if username.is_empty() || matches!(self, Authorizer::None) {
            return filter;
        }
        filter.and_user(username)
    }

    pub async fn has_access_to(
        &self,
        principal: &Principal,
        entity: &EntityRef,
        action: Action,
    ) -> Result<bool, AuthError> {
        match self {
            Authorizer::None => Ok(true),
            Authorizer::TenancyAware(a) => a.has_access_to(principal, entity, action).await,
        }
    }

    pub async fn has_org_based_capability(
        &self,
        principal: &Principal,
        capability: &str,
    ) -> Result<bool, AuthError> {
        match self {
            Authorizer::None => Ok(true),
            Authorizer::TenancyAware(a) => a.has_org_based_capability(principal, capability).await,
        }
    }

    /// Gates one request after authentication. Marks the principal
    /// authorized on success.
    pub async fn authorize_request(
        &self,
        principal: &mut Principal,
        route: &RouteSecurity,
        scope: &RequestScope,
    ) -> Result<(), AuthError> {
        match self {
            Authorizer::None => {
                principal.is_authorized = true;
                Ok(())
            }
            Authorizer::TenancyAware(a) => a.authorize_request(principal, route, scope).await,
        }
    }
}
