//! Client for the remote identity and entitlement service.
//!
//! Three calls are used: pull-secret authentication, access review and
//! capability review. Response status bands are normalised before they reach
//! the engine: 4xx means the caller is not entitled (`Unauthorized`), while
//! 5xx, transport failures and undecodable bodies mean the service could not
//! answer (`ServiceUnavailable`).

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use service_core::observability::TracedClientExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::instrument;

use crate::services::error::AuthError;

pub const BARE_METAL_CAPABILITY: &str = "capability.account.bare_metal_installer_admin";
pub const CAPABILITY_TYPE_ACCOUNT: &str = "Account";
pub const CAPABILITY_TYPE_ORGANIZATION: &str = "Organization";

pub const RESOURCE_BARE_METAL_CLUSTER: &str = "BareMetalCluster";
pub const RESOURCE_SUBSCRIPTION: &str = "Subscription";

pub const ACTION_CREATE: &str = "create";
pub const ACTION_UPDATE: &str = "update";
pub const ACTION_DELETE: &str = "delete";
pub const ACTION_GET: &str = "get";

/// The account a pull secret belongs to.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AccountIdentity {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub org_id: String,
}

#[async_trait]
pub trait IdentityClient: Send + Sync {
    async fn authenticate_pull_secret(&self, token: &str) -> Result<AccountIdentity, AuthError>;

    async fn access_review(
        &self,
        username: &str,
        action: &str,
        resource_type: &str,
        subscription_id: &str,
    ) -> Result<bool, AuthError>;

    async fn capability_review(
        &self,
        username: &str,
        capability: &str,
        capability_type: &str,
    ) -> Result<bool, AuthError>;
}

#[derive(Serialize)]
struct TokenAuthorizationRequest<'a> {
    authorization_token: &'a str,
}

#[derive(Deserialize)]
struct TokenAuthorizationResponse {
    account: AccountPayload,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct AccountPayload {
    username: String,
    email: String,
    first_name: String,
    last_name: String,
    organization: OrganizationPayload,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct OrganizationPayload {
    external_id: String,
}

#[derive(Serialize)]
struct AccessReviewRequest<'a> {
    account_username: &'a str,
    action: &'a str,
    resource_type: &'a str,
    subscription_id: &'a str,
}

#[derive(Deserialize)]
struct AccessReviewResponse {
    allowed: bool,
}

#[derive(Serialize)]
struct CapabilityReviewRequest<'a> {
    account_username: &'a str,
    capability: &'a str,
    #[serde(rename = "type")]
    capability_type: &'a str,
}

#[derive(Deserialize)]
struct CapabilityReviewResponse {
    result: String,
}

/// HTTP implementation against the accounts-management API.
#[derive(Clone)]
pub struct AccountsClient {
    client: Client,
    base_url: String,
    token: Option<String>,
    timeout: Duration,
}

impl AccountsClient {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Self {
        tracing::info!(base_url = %base_url, "Identity service client configured");
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            timeout,
        }
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, AuthError>
    where
        B: Serialize + Sync,
        R: for<'de> Deserialize<'de>,
    {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.traced_post(&url).json(body).timeout(self.timeout);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!(error = %e, path, "Identity service request failed");
            AuthError::ServiceUnavailable(format!("identity service unreachable: {}", e))
        })?;

        let status = response.status();
        if status.is_client_error() {
            tracing::debug!(status = %status, path, "Identity service rejected request");
            return Err(AuthError::unauthorized(format!(
                "identity service returned {}",
                status
            )));
        }
        if !status.is_success() {
            tracing::error!(status = %status, path, "Identity service error");
            return Err(unavailable(status));
        }

        response.json::<R>().await.map_err(|e| {
            tracing::error!(error = %e, path, "Failed to decode identity service response");
            AuthError::ServiceUnavailable(format!("invalid identity service response: {}", e))
        })
    }
}

fn unavailable(status: StatusCode) -> AuthError {
    AuthError::ServiceUnavailable(format!("identity service returned {}", status))
}

#[async_trait]
impl IdentityClient for AccountsClient {
    #[instrument(skip_all)]
    async fn authenticate_pull_secret(&self, token: &str) -> Result<AccountIdentity, AuthError> {
        let response: TokenAuthorizationResponse = self
            .post(
                "/api/accounts_mgmt/v1/token_authorization",
                &TokenAuthorizationRequest {
                    authorization_token: token,
                },
            )
            .await?;

        let account = response.account;
        Ok(AccountIdentity {
            username: account.username,
            email: account.email,
            first_name: account.first_name,
            last_name: account.last_name,
            org_id: account.organization.external_id,
        })
    }

    #[instrument(skip(self))]
    async fn access_review(
        &self,
        username: &str,
        action: &str,
        resource_type: &str,
        subscription_id: &str,
    ) -> Result<bool, AuthError> {
        let response: AccessReviewResponse = self
            .post(
                "/api/authorizations/v1/access_review",
                &AccessReviewRequest {
                    account_username: username,
                    action,
                    resource_type,
                    subscription_id,
                },
            )
            .await?;
        Ok(response.allowed)
    }

    #[instrument(skip(self))]
    async fn capability_review(
        &self,
        username: &str,
        capability: &str,
        capability_type: &str,
    ) -> Result<bool, AuthError> {
        let response: CapabilityReviewResponse = self
            .post(
                "/api/authorizations/v1/capability_review",
                &CapabilityReviewRequest {
                    account_username: username,
                    capability,
                    capability_type,
                },
            )
            .await?;
        Ok(response.result == "true")
    }
}

/// In-process identity service for tests and offline development.
///
/// Unknown pull secrets are rejected as unauthorized; unknown reviews answer
/// `false`. Every call is counted so tests can assert cache behaviour.
#[derive(Default)]
pub struct MockIdentityClient {
    pull_secrets: DashMap<String, Result<AccountIdentity, AuthError>>,
    access: DashMap<(String, String), Result<bool, AuthError>>,
    capabilities: DashMap<String, Result<bool, AuthError>>,
    pull_secret_calls: AtomicUsize,
    access_review_calls: AtomicUsize,
    capability_review_calls: AtomicUsize,
}

impl MockIdentityClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_pull_secret(&self, token: &str, identity: AccountIdentity) {
        self.pull_secrets.insert(token.to_string(), Ok(identity));
    }

    pub fn set_pull_secret_error(&self, token: &str, error: AuthError) {
        self.pull_secrets.insert(token.to_string(), Err(error));
    }

    /// Answer for access reviews by `username` on `subscription_id`, any action.
    pub fn set_access(&self, username: &str, subscription_id: &str, result: Result<bool, AuthError>) {
        self.access
            .insert((username.to_string(), subscription_id.to_string()), result);
    }

    pub fn set_capability(&self, username: &str, result: Result<bool, AuthError>) {
        self.capabilities.insert(username.to_string(), result);
    }

    pub fn pull_secret_calls(&self) -> usize {
        self.pull_secret_calls.load(Ordering::SeqCst)
    }

    pub fn access_review_calls(&self) -> usize {
        self.access_review_calls.load(Ordering::SeqCst)
    }

    pub fn capability_review_calls(&self) -> usize {
        self.capability_review_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityClient for MockIdentityClient {
    async fn authenticate_pull_secret(&self, token: &str) -> Result<AccountIdentity, AuthError> {
        self.pull_secret_calls.fetch_add(1, Ordering::SeqCst);
        match self.pull_secrets.get(token) {
            Some(result) => result.value().clone(),
            None => Err(AuthError::unauthorized("unknown pull secret")),
        }
    }

    async fn access_review(
        &self,
        username: &str,
        _action: &str,
        _resource_type: &str,
        subscription_id: &str,
    ) -> Result<bool, AuthError> {
        self.access_review_calls.fetch_add(1, Ordering::SeqCst);
        self.access
            .get(&(username.to_string(), subscription_id.to_string()))
            .map(|result| result.value().clone())
            .unwrap_or(Ok(false))
    }

    async fn capability_review(
        &self,
        username: &str,
        _capability: &str,
        _capability_type: &str,
    ) -> Result<bool, AuthError> {
        self.capability_review_calls.fetch_add(1, Ordering::SeqCst);
        self.capabilities
            .get(username)
            .map(|result| result.value().clone())
            .unwrap_or(Ok(false))
    }
}
