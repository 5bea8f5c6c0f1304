//! Federated single sign-on.
//!
//! Users present RS256 bearer tokens issued by the identity provider; agents
//! present pull secrets validated by the identity service; image downloads
//! carry HS256 tokens signed with a per-infra-env secret. Brute-force
//! lockout applies to the user and agent paths.

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::Deserialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;

use crate::config::CacheConfig;
use crate::models::{IdentifierType, Principal, Role};
use crate::services::blacklist::{TokenBlacklist, hash_token};
use crate::services::cache::TtlCache;
use crate::services::error::{AuthError, should_cache};
use crate::services::identity::{
    AccountIdentity, BARE_METAL_CAPABILITY, CAPABILITY_TYPE_ACCOUNT, IdentityClient,
};
use crate::services::jwks::KeySet;
use crate::services::lockout::FailedAttemptTracker;
use crate::services::metrics;
use crate::services::security_audit::SecurityAuditLogger;
use crate::services::stores::EntityStore;

const USER_TOKEN_ALGORITHM: Algorithm = Algorithm::RS256;
const IMAGE_TOKEN_ALGORITHM: Algorithm = Algorithm::HS256;

/// Lockout key for a credential whose owner is not known yet: the first
/// 128 bits of its SHA-256, hex encoded.
pub fn lockout_identifier(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    hex::encode(&digest[..16])
}

#[derive(Debug, Clone)]
pub struct FederatedSettings {
    pub admin_users: Vec<String>,
    pub enable_org_tenancy: bool,
    pub enable_org_based_feature_gates: bool,
    pub cache: CacheConfig,
}

#[derive(Deserialize)]
struct SubjectClaims {
    sub: String,
}

pub struct FederatedAuthenticator {
    settings: FederatedSettings,
    keys: KeySet,
    identity: Arc<dyn IdentityClient>,
    entities: Arc<dyn EntityStore>,
    tracker: Arc<FailedAttemptTracker>,
    blacklist: Arc<TokenBlacklist>,
    audit: SecurityAuditLogger,
    http: reqwest::Client,
    /// Pull-secret outcomes by token hash. `None` marks a known-bad secret.
    token_cache: TtlCache<String, Option<Principal>>,
    role_cache: TtlCache<String, Role>,
    capability_cache: TtlCache<String, bool>,
}

impl FederatedAuthenticator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: FederatedSettings,
        keys: KeySet,
        identity: Arc<dyn IdentityClient>,
        entities: Arc<dyn EntityStore>,
        tracker: Arc<FailedAttemptTracker>,
        blacklist: Arc<TokenBlacklist>,
        audit: SecurityAuditLogger,
        http: reqwest::Client,
    ) -> Self {
        let cache = &settings.cache;
        let token_cache = TtlCache::new(cache.token_ttl, cache.max_entries);
        let role_cache = TtlCache::new(cache.role_ttl, cache.max_entries);
        let capability_cache = TtlCache::new(cache.capability_ttl, cache.max_entries);

        if tracker.is_active() {
            tracing::info!("Lockout tracking enabled for federated authentication");
        }

        Self {
            settings,
            keys,
            identity,
            entities,
            tracker,
            blacklist,
            audit,
            http,
            token_cache,
            role_cache,
            capability_cache,
        }
    }

    pub fn tenancy_enabled(&self) -> bool {
        self.settings.enable_org_tenancy
    }

    pub fn org_feature_gates_enabled(&self) -> bool {
        self.settings.enable_org_based_feature_gates
    }

    pub async fn refresh_keys(&self) -> Result<usize, AuthError> {
        self.keys.refresh(&self.http).await
    }

    /// Pull-secret authentication for installer agents.
    pub async fn authenticate_agent(
        &self,
        token: &str,
        client_ip: Option<&str>,
    ) -> Result<Principal, AuthError> {
        let token_id = lockout_identifier(token);
        self.ensure_unlocked(client_ip, IdentifierType::Ip).await?;
        self.ensure_unlocked(Some(token_id.as_str()), IdentifierType::Username)
            .await?;

        let cache_key = hash_token(token);
        let principal = match self.token_cache.get(&cache_key) {
            Some(Some(principal)) => principal,
            Some(None) => {
                self.record_failure(&token_id, client_ip, "invalid pull secret")
                    .await;
                return Err(AuthError::unauthorized("invalid pull secret"));
            }
            None => {
                let identity = match self.identity.authenticate_pull_secret(token).await {
                    Ok(identity) => identity,
                    Err(e) => {
                        if e.is_cacheable() {
                            self.token_cache.set(cache_key, None);
                        }
                        tracing::warn!(error = %e, "Pull secret authentication failed");
                        self.record_failure(&token_id, client_ip, "invalid pull secret")
                            .await;
                        return Err(e);
                    }
                };

                let mut principal = principal_from_account(identity);
                principal.role = self.user_role(&principal.username).await.map_err(|e| {
                    tracing::error!(error = %e, "Unable to fetch user's role");
                    e
                })?;
                self.token_cache.set(cache_key, Some(principal.clone()));
                principal
            }
        };

        self.reset(&[token_id.as_str()], client_ip).await;
        self.audit
            .successful_login(&principal.username, &principal.org_id, client_ip);
        Ok(principal)
    }

    /// Bearer-token authentication for users.
    pub async fn authenticate_user(
        &self,
        credential: &str,
        client_ip: Option<&str>,
    ) -> Result<Principal, AuthError> {
        let token = parse_bearer(credential)?;
        let token_id = lockout_identifier(token);

        self.ensure_unlocked(client_ip, IdentifierType::Ip).await?;
        self.ensure_unlocked(Some(token_id.as_str()), IdentifierType::Username)
            .await?;

        if self.blacklist.is_revoked(token).await? {
            self.record_failure(&token_id, client_ip, "revoked token")
                .await;
            return Err(AuthError::unauthorized("token has been revoked"));
        }

        let claims = match self.verify_user_token(token).await {
            Ok(claims) => claims,
            Err(e) => {
                self.record_failure(&token_id, client_ip, "invalid or expired token")
                    .await;
                return Err(e);
            }
        };

        let mut principal = principal_from_claims(&claims);
        if principal.username.is_empty() {
            tracing::error!("Missing username in token");
            self.record_failure(&token_id, client_ip, "missing username in token")
                .await;
            return Err(AuthError::unauthorized("missing username in token"));
        }

        let username = principal.username.clone();
        self.ensure_unlocked(Some(username.as_str()), IdentifierType::Username)
            .await?;

        principal.role = match self.user_role(&username).await {
            Ok(role) => role,
            Err(e) => {
                tracing::error!(error = %e, "Unable to fetch user's role");
                self.record_failure(&username, client_ip, "failed to fetch user role")
                    .await;
                return Err(e);
            }
        };

        self.reset(&[token_id.as_str(), username.as_str()], client_ip).await;
        self.audit
            .successful_login(&username, &principal.org_id, client_ip);

        principal.raw_token = Some(token.to_string());
        Ok(principal)
    }

    /// Image download tokens: HS256, signed with the secret of the infra env
    /// named in `sub`.
    pub async fn authenticate_image(&self, token: &str) -> Result<Principal, AuthError> {
        let infra_env_id = unverified_subject(token)?;

        let infra_env = self
            .entities
            .find_infra_env(&infra_env_id)
            .await?
            .ok_or_else(|| AuthError::unauthorized("image token references an unknown infra env"))?;
        let secret = infra_env
            .image_token_key
            .filter(|k| !k.is_empty())
            .ok_or_else(|| AuthError::unauthorized("infra env has no image token key"))?;

        let mut validation = Validation::new(IMAGE_TOKEN_ALGORITHM);
        validation.required_spec_claims = HashSet::from(["sub".to_string()]);
        validation.validate_aud = false;

        decode::<SubjectClaims>(
            token,
            &DecodingKey::from_secret(secret.as_bytes()),
            &validation,
        )
        .map_err(|e| {
            tracing::debug!(error = %e, "Image token rejected");
            AuthError::unauthorized(format!("invalid image token: {}", e))
        })?;

        Ok(Principal::image_scoped(infra_env_id))
    }

    async fn verify_user_token(&self, token: &str) -> Result<Map<String, Value>, AuthError> {
        let header = decode_header(token)
            .map_err(|e| AuthError::unauthorized(format!("malformed token: {}", e)))?;
        let kid = header
            .kid
            .ok_or_else(|| AuthError::unauthorized("no kid found in token"))?;
        let key = self.keys.decoding_key(&kid).await.ok_or_else(|| {
            AuthError::unauthorized(format!("no matching key for key id [{}]", kid))
        })?;

        let mut validation = Validation::new(USER_TOKEN_ALGORITHM);
        validation.validate_aud = false;
        validation.validate_nbf = true;

        match decode::<Map<String, Value>>(token, &key, &validation) {
            Ok(data) => Ok(data.claims),
            // Issuer clocks run slightly ahead; a not-yet-valid token is accepted.
            Err(e) if matches!(e.kind(), ErrorKind::ImmatureSignature) => {
                tracing::debug!("Accepting token used before its nbf");
                validation.validate_nbf = false;
                decode::<Map<String, Value>>(token, &key, &validation)
                    .map(|data| data.claims)
                    .map_err(|e| AuthError::unauthorized(format!("invalid token: {}", e)))
            }
            Err(e) => {
                tracing::debug!(error = %e, "User token rejected");
                Err(AuthError::unauthorized(format!("invalid token: {}", e)))
            }
        }
    }

    /// Admin allow-list first, then the account capability. Cached per user.
    async fn user_role(&self, username: &str) -> Result<Role, AuthError> {
        if let Some(role) = self.role_cache.get(&username.to_string()) {
            return Ok(role);
        }

        let result = if self.settings.admin_users.iter().any(|u| u == username) {
            Ok(Role::Admin)
        } else {
            self.is_read_only_admin(username).await.map(|read_only| {
                if read_only {
                    Role::ReadOnlyAdmin
                } else {
                    Role::User
                }
            })
        };

        // Only decisions are remembered; an outage is asked again next time.
        if should_cache(&result)
            && let Ok(role) = &result
        {
            self.role_cache.set(username.to_string(), *role);
        }
        result
    }

    async fn is_read_only_admin(&self, username: &str) -> Result<bool, AuthError> {
        if let Some(allowed) = self.capability_cache.get(&username.to_string()) {
            return Ok(allowed);
        }

        let result = self
            .identity
            .capability_review(username, BARE_METAL_CAPABILITY, CAPABILITY_TYPE_ACCOUNT)
            .await;
        if let Ok(allowed) = &result {
            self.capability_cache.set(username.to_string(), *allowed);
        }
        result
    }

    async fn ensure_unlocked(
        &self,
        identifier: Option<&str>,
        kind: IdentifierType,
    ) -> Result<(), AuthError> {
        let Some(identifier) = identifier.filter(|i| !i.is_empty()) else {
            return Ok(());
        };
        if let (true, Some(until)) = self.tracker.is_locked(identifier, kind).await {
            self.audit.locked_attempt(identifier, kind, until);
            return Err(AuthError::Locked { until });
        }
        Ok(())
    }

    async fn record_failure(&self, identifier: &str, client_ip: Option<&str>, reason: &str) {
        if !self.tracker.is_active() {
            self.audit.failed_login(Some(identifier), client_ip, reason);
            return;
        }

        let (count, lock) = self
            .tracker
            .record_failure(identifier, IdentifierType::Username)
            .await;
        self.audit.failed_login(Some(identifier), client_ip, reason);
        if !lock.is_zero() {
            self.audit.account_locked(
                identifier,
                IdentifierType::Username,
                count,
                lock_deadline(lock),
            );
            metrics::record_lockout(IdentifierType::Username.as_str());
        }

        if let Some(ip) = client_ip.filter(|ip| !ip.is_empty()) {
            let (ip_count, ip_lock) = self.tracker.record_failure(ip, IdentifierType::Ip).await;
            if !ip_lock.is_zero() {
                self.audit
                    .account_locked(ip, IdentifierType::Ip, ip_count, lock_deadline(ip_lock));
                metrics::record_lockout(IdentifierType::Ip.as_str());
            }
        }
    }

    async fn reset(&self, identifiers: &[&str], client_ip: Option<&str>) {
        for identifier in identifiers {
            self.tracker
                .reset(identifier, IdentifierType::Username)
                .await;
        }
        if let Some(ip) = client_ip.filter(|ip| !ip.is_empty()) {
            self.tracker.reset(ip, IdentifierType::Ip).await;
        }
    }
}

fn lock_deadline(lock: std::time::Duration) -> chrono::DateTime<chrono::Utc> {
    chrono::Utc::now() + chrono::Duration::from_std(lock).unwrap_or_else(|_| chrono::Duration::weeks(52))
}

/// Exactly two whitespace-separated fields, the first `Bearer` in any case.
fn parse_bearer(credential: &str) -> Result<&str, AuthError> {
    let mut parts = credential.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(scheme), Some(token), None) if scheme.eq_ignore_ascii_case("bearer") => Ok(token),
        _ => Err(AuthError::unauthorized(
            "Authorization header format must be Bearer {token}",
        )),
    }
}

/// Reads `sub` without checking the signature. The value only selects which
/// secret the real verification uses.
fn unverified_subject(token: &str) -> Result<String, AuthError> {
    let mut validation = Validation::new(IMAGE_TOKEN_ALGORITHM);
    validation.insecure_disable_signature_validation();
    validation.required_spec_claims = HashSet::from(["sub".to_string()]);
    validation.validate_exp = false;
    validation.validate_aud = false;

    decode::<SubjectClaims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims.sub)
        .map_err(|e| AuthError::unauthorized(format!("malformed image token: {}", e)))
}

fn claim(claims: &Map<String, Value>, name: &str) -> String {
    claims
        .get(name)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn claim_or(claims: &Map<String, Value>, primary: &str, fallback: &str) -> String {
    let value = claim(claims, primary);
    if value.is_empty() {
        claim(claims, fallback)
    } else {
        value
    }
}

/// Maps provider claims, falling back to the alternative claim names used by
/// the developer-portal token shape.
fn principal_from_claims(claims: &Map<String, Value>) -> Principal {
    let mut principal = Principal::new(Role::User, claim_or(claims, "username", "preferred_username"));
    principal.org_id = claim(claims, "org_id");
    principal.email = claim(claims, "email");
    principal.issuer = claim(claims, "iss");
    principal.client_id = claim_or(claims, "client_id", "clientId");
    principal.first_name = claim_or(claims, "first_name", "given_name");
    principal.last_name = claim_or(claims, "last_name", "family_name");

    if principal.first_name.is_empty() || principal.last_name.is_empty() {
        let name = claim(claims, "name");
        let mut names = name.split_whitespace();
        let first = names.next().unwrap_or_default();
        let last = names.next().unwrap_or_default();
        if principal.first_name.is_empty() {
            principal.first_name = first.to_string();
        }
        if principal.last_name.is_empty() {
            principal.last_name = last.to_string();
        }
    }
    principal
}

fn principal_from_account(account: AccountIdentity) -> Principal {
    let mut principal = Principal::new(Role::User, account.username).with_org(account.org_id);
    principal.email = account.email;
    principal.first_name = account.first_name;
    principal.last_name = account.last_name;
    principal
}
