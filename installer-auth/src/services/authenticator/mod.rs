//! Credential verification strategies.
//!
//! One strategy is selected from configuration at startup and never changes.
//! Every strategy exposes the same four entry points because each request
//! surface carries a differently shaped credential; a strategy may reject
//! some of them outright.

mod federated;
mod local;
mod none;

pub use federated::{FederatedAuthenticator, FederatedSettings, lockout_identifier};
pub use local::{AgentLocalAuthenticator, LocalAuthenticator};
pub use none::NoneAuthenticator;

use axum::extract::Query;
use axum::http::{HeaderMap, Uri};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::{AuthSettings, CacheConfig};
use crate::models::Principal;
use crate::services::blacklist::TokenBlacklist;
use crate::services::error::AuthError;
use crate::services::identity::IdentityClient;
use crate::services::jwks::KeySet;
use crate::services::lockout::FailedAttemptTracker;
use crate::services::security_audit::SecurityAuditLogger;
use crate::services::stores::EntityStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthType {
    None,
    Local,
    AgentLocal,
    Rhsso,
}

impl AuthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthType::None => "none",
            AuthType::Local => "local",
            AuthType::AgentLocal => "agent-installer-local",
            AuthType::Rhsso => "rhsso",
        }
    }
}

impl fmt::Display for AuthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuthType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "none" => Ok(AuthType::None),
            "local" => Ok(AuthType::Local),
            "agent-installer-local" => Ok(AuthType::AgentLocal),
            "rhsso" => Ok(AuthType::Rhsso),
            other => Err(format!("Invalid authenticator type: {}", other)),
        }
    }
}

/// Named security schemes a route can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthScheme {
    UserAuth,
    AgentAuth,
    UrlAuth,
    ImageAuth,
    ImageUrlAuth,
}

impl AuthScheme {
    pub fn name(&self) -> &'static str {
        match self {
            AuthScheme::UserAuth => "userAuth",
            AuthScheme::AgentAuth => "agentAuth",
            AuthScheme::UrlAuth => "urlAuth",
            AuthScheme::ImageAuth => "imageAuth",
            AuthScheme::ImageUrlAuth => "imageURLAuth",
        }
    }

    pub fn location(&self) -> CredentialLocation {
        match self {
            AuthScheme::UserAuth => CredentialLocation::Header("Authorization"),
            AuthScheme::AgentAuth => CredentialLocation::Header("X-Secret-Key"),
            AuthScheme::UrlAuth => CredentialLocation::Query("api_key"),
            AuthScheme::ImageAuth => CredentialLocation::Header("Image-Token"),
            AuthScheme::ImageUrlAuth => CredentialLocation::Query("image_token"),
        }
    }

    /// Image schemes carry a capability token scoped to one infra env.
    pub fn is_image(&self) -> bool {
        matches!(self, AuthScheme::ImageAuth | AuthScheme::ImageUrlAuth)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialLocation {
    Header(&'static str),
    Query(&'static str),
}

/// Reads the credential for one scheme out of a request.
#[derive(Debug, Clone, Copy)]
pub struct CredentialExtractor {
    scheme: AuthScheme,
}

impl CredentialExtractor {
    pub fn new(scheme: AuthScheme) -> Self {
        Self { scheme }
    }

    pub fn scheme(&self) -> AuthScheme {
        self.scheme
    }

    /// The raw credential, or `None` when absent or empty.
    pub fn extract(&self, headers: &HeaderMap, uri: &Uri) -> Option<String> {
        let value = match self.scheme.location() {
            CredentialLocation::Header(name) => headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
            CredentialLocation::Query(name) => {
                let Query(params) = Query::<HashMap<String, String>>::try_from_uri(uri).ok()?;
                params.get(name).cloned()
            }
        };
        value.filter(|v| !v.trim().is_empty())
    }
}

/// Collaborators the strategies may need. Each strategy takes only what it uses.
pub struct AuthenticatorDeps {
    pub entities: Arc<dyn EntityStore>,
    pub identity: Option<Arc<dyn IdentityClient>>,
    pub tracker: Arc<FailedAttemptTracker>,
    pub blacklist: Arc<TokenBlacklist>,
    pub audit: SecurityAuditLogger,
    pub http: reqwest::Client,
}

pub enum Authenticator {
    None(NoneAuthenticator),
    Local(LocalAuthenticator),
    AgentLocal(AgentLocalAuthenticator),
    Federated(Box<FederatedAuthenticator>),
}

impl Authenticator {
    pub async fn from_config(
        settings: &AuthSettings,
        cache: &CacheConfig,
        deps: AuthenticatorDeps,
    ) -> Result<Self, AuthError> {
        let authenticator = match settings.auth_type {
            AuthType::None => Authenticator::None(NoneAuthenticator::new()),
            AuthType::Local => {
                let pem = required_pem(settings)?;
                Authenticator::Local(LocalAuthenticator::new(
                    pem,
                    deps.entities,
                    deps.blacklist,
                )?)
            }
            AuthType::AgentLocal => {
                let pem = required_pem(settings)?;
                Authenticator::AgentLocal(AgentLocalAuthenticator::new(
                    pem,
                    deps.entities,
                    deps.blacklist,
                    cache.infra_env_ttl,
                    cache.max_entries,
                )?)
            }
            AuthType::Rhsso => {
                let identity = deps.identity.ok_or_else(|| {
                    AuthError::Internal("identity service client is required for rhsso".to_string())
                })?;
                let keys = match &settings.jwks_cert {
                    Some(document) => KeySet::from_json(document)?,
                    None => KeySet::from_url(&deps.http, &settings.jwks_url).await?,
                };
                let federated = FederatedAuthenticator::new(
                    FederatedSettings {
                        admin_users: settings.admin_users.clone(),
                        enable_org_tenancy: settings.enable_org_tenancy,
                        enable_org_based_feature_gates: settings.enable_org_based_feature_gates,
                        cache: cache.clone(),
                    },
                    keys,
                    identity,
                    deps.entities,
                    deps.tracker,
                    deps.blacklist,
                    deps.audit,
                    deps.http,
                );
                Authenticator::Federated(Box::new(federated))
            }
        };

        tracing::info!(auth_type = %authenticator.auth_type(), "Created authenticator");
        Ok(authenticator)
    }

    pub fn auth_type(&self) -> AuthType {
        match self {
            Authenticator::None(_) => AuthType::None,
            Authenticator::Local(_) => AuthType::Local,
            Authenticator::AgentLocal(_) => AuthType::AgentLocal,
            Authenticator::Federated(_) => AuthType::Rhsso,
        }
    }

    pub fn tenancy_enabled(&self) -> bool {
        match self {
            Authenticator::Federated(f) => f.tenancy_enabled(),
            _ => false,
        }
    }

    pub fn org_feature_gates_enabled(&self) -> bool {
        match self {
            Authenticator::Federated(f) => f.org_feature_gates_enabled(),
            _ => false,
        }
    }

    /// Whether requests must present a credential at all.
    pub fn requires_credential(&self) -> bool {
        !matches!(self, Authenticator::None(_))
    }

    pub fn credential_extractor(&self, scheme: AuthScheme) -> CredentialExtractor {
        CredentialExtractor::new(scheme)
    }

    pub async fn authenticate_user(
        &self,
        credential: &str,
        client_ip: Option<&str>,
    ) -> Result<Principal, AuthError> {
        match self {
            Authenticator::None(a) => Ok(a.authenticate()),
            Authenticator::Local(_) => Err(AuthError::unauthorized(
                "user authentication is not allowed for local authentication",
            )),
            Authenticator::AgentLocal(a) => a.authenticate_user(credential).await,
            Authenticator::Federated(a) => a.authenticate_user(credential, client_ip).await,
        }
    }

    pub async fn authenticate_agent(
        &self,
        credential: &str,
        client_ip: Option<&str>,
    ) -> Result<Principal, AuthError> {
        match self {
            Authenticator::None(a) => Ok(a.authenticate()),
            Authenticator::Local(a) => a.authenticate(credential).await,
            Authenticator::AgentLocal(a) => a.authenticate(credential).await,
            Authenticator::Federated(a) => a.authenticate_agent(credential, client_ip).await,
        }
    }

    pub async fn authenticate_url(&self, credential: &str) -> Result<Principal, AuthError> {
        match self {
            Authenticator::None(a) => Ok(a.authenticate()),
            Authenticator::Local(a) => a.authenticate(credential).await,
            Authenticator::AgentLocal(a) => a.authenticate_user(credential).await,
            Authenticator::Federated(_) => Err(AuthError::unauthorized(
                "URL authentication is not allowed for rhsso authentication",
            )),
        }
    }

    pub async fn authenticate_image(&self, credential: &str) -> Result<Principal, AuthError> {
        match self {
            Authenticator::None(a) => Ok(a.authenticate()),
            Authenticator::Local(_) | Authenticator::AgentLocal(_) => Err(AuthError::unauthorized(
                "image authentication is not allowed for local authentication",
            )),
            Authenticator::Federated(a) => a.authenticate_image(credential).await,
        }
    }

    /// Routes a credential to the entry point matching its scheme.
    pub async fn authenticate(
        &self,
        scheme: AuthScheme,
        credential: &str,
        client_ip: Option<&str>,
    ) -> Result<Principal, AuthError> {
        match scheme {
            AuthScheme::UserAuth => self.authenticate_user(credential, client_ip).await,
            AuthScheme::AgentAuth => self.authenticate_agent(credential, client_ip).await,
            AuthScheme::UrlAuth => self.authenticate_url(credential).await,
            AuthScheme::ImageAuth | AuthScheme::ImageUrlAuth => {
                self.authenticate_image(credential).await
            }
        }
    }

    /// Re-fetches the identity provider keys. Only meaningful for rhsso.
    pub async fn refresh_keys(&self) -> Result<usize, AuthError> {
        match self {
            Authenticator::Federated(a) => a.refresh_keys().await,
            _ => Ok(0),
        }
    }
}

fn required_pem(settings: &AuthSettings) -> Result<&str, AuthError> {
    settings.ec_public_key_pem.as_deref().ok_or_else(|| {
        AuthError::Internal(format!(
            "EC public key is required for {} authentication",
            settings.auth_type
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_auth_type_parsing() {
        for auth_type in [
            AuthType::None,
            AuthType::Local,
            AuthType::AgentLocal,
            AuthType::Rhsso,
        ] {
            assert_eq!(auth_type.to_string().parse::<AuthType>(), Ok(auth_type));
        }
        assert!("".parse::<AuthType>().is_err());
        assert!("oauth".parse::<AuthType>().is_err());
    }

    #[test]
    fn test_extracts_header_credentials() {
        let mut headers = HeaderMap::new();
        headers.insert("x-secret-key", HeaderValue::from_static("pull-secret"));
        let uri: Uri = "/api/clusters".parse().unwrap();

        let agent = CredentialExtractor::new(AuthScheme::AgentAuth);
        assert_eq!(agent.extract(&headers, &uri), Some("pull-secret".to_string()));

        let user = CredentialExtractor::new(AuthScheme::UserAuth);
        assert_eq!(user.extract(&headers, &uri), None);
    }

    #[test]
    fn test_extracts_query_credentials() {
        let headers = HeaderMap::new();
        let uri: Uri = "/images/abc?arch=x86_64&image_token=tok%2Ben".parse().unwrap();

        let image = CredentialExtractor::new(AuthScheme::ImageUrlAuth);
        assert_eq!(image.extract(&headers, &uri), Some("tok+en".to_string()));

        let url = CredentialExtractor::new(AuthScheme::UrlAuth);
        assert_eq!(url.extract(&headers, &uri), None);
    }

    #[test]
    fn test_empty_credentials_are_absent() {
        let mut headers = HeaderMap::new();
        headers.insert("image-token", HeaderValue::from_static("  "));
        let uri: Uri = "/images?api_key=".parse().unwrap();

        assert_eq!(
            CredentialExtractor::new(AuthScheme::ImageAuth).extract(&headers, &uri),
            None
        );
        assert_eq!(
            CredentialExtractor::new(AuthScheme::UrlAuth).extract(&headers, &uri),
            None
        );
    }

    #[test]
    fn test_scheme_names() {
        assert_eq!(AuthScheme::ImageUrlAuth.name(), "imageURLAuth");
        assert!(AuthScheme::ImageAuth.is_image());
        assert!(!AuthScheme::UrlAuth.is_image());
    }
}
