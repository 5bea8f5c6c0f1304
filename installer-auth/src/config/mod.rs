use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::services::authenticator::AuthType;
use crate::services::lockout::LockoutPolicy;

pub const DEFAULT_JWKS_URL: &str = "https://api.openshift.com/.well-known/jwks.json";

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub database: DatabaseConfig,
    pub auth: AuthSettings,
    pub lockout: LockoutConfig,
    pub identity: IdentityServiceConfig,
    pub cache: CacheConfig,
    pub cleanup_interval: Duration,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Empty means the in-memory store is used instead of PostgreSQL.
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct AuthSettings {
    pub auth_type: AuthType,
    pub jwks_cert: Option<String>,
    pub jwks_url: String,
    pub ec_public_key_pem: Option<String>,
    pub admin_users: Vec<String>,
    pub enable_org_tenancy: bool,
    pub enable_org_based_feature_gates: bool,
    pub trusted_proxy_cidrs: String,
}

/// Raw lockout settings as read from the environment.
#[derive(Debug, Clone)]
pub struct LockoutConfig {
    pub enabled: bool,
    pub max_attempts: i64,
    pub duration_minutes: i64,
    pub window_minutes: i64,
    pub exponential_backoff: bool,
}

impl LockoutConfig {
    /// Builds the policy, falling back to the defaults for non-positive values.
    pub fn lockout_policy(&self) -> LockoutPolicy {
        let defaults = LockoutPolicy::default();

        let max_attempts = u32::try_from(self.max_attempts)
            .ok()
            .filter(|v| *v > 0)
            .unwrap_or(defaults.max_attempts);
        let lockout_duration = positive_minutes(self.duration_minutes)
            .unwrap_or(defaults.lockout_duration);
        let window_duration =
            positive_minutes(self.window_minutes).unwrap_or(defaults.window_duration);

        LockoutPolicy {
            max_attempts,
            lockout_duration,
            window_duration,
            use_exponential: self.exponential_backoff,
            enabled: self.enabled,
        }
    }
}

fn positive_minutes(minutes: i64) -> Option<Duration> {
    u64::try_from(minutes)
        .ok()
        .filter(|m| *m > 0)
        .map(|m| Duration::from_secs(m * 60))
}

#[derive(Debug, Clone)]
pub struct IdentityServiceConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub request_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub token_ttl: Duration,
    pub role_ttl: Duration,
    pub capability_ttl: Duration,
    pub access_review_ttl: Duration,
    pub infra_env_ttl: Duration,
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            token_ttl: Duration::from_secs(600),
            role_ttl: Duration::from_secs(600),
            capability_ttl: Duration::from_secs(60),
            access_review_ttl: Duration::from_secs(600),
            infra_env_ttl: Duration::from_secs(300),
            max_entries: 10_000,
        }
    }
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let auth_type: AuthType = get_env("AUTH_TYPE", Some("none"), is_prod)?
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let config = AuthConfig {
            common: common_config,
            environment: environment.clone(),
            service_name: get_env("SERVICE_NAME", Some("installer-auth"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            log_level: get_env("LOG_LEVEL", Some("info"), is_prod)?,
            otlp_endpoint: optional_env("OTLP_ENDPOINT"),
            database: DatabaseConfig {
                url: get_env("DATABASE_URL", Some(""), is_prod)?,
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", "10", is_prod)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", "1", is_prod)?,
            },
            auth: AuthSettings {
                auth_type,
                jwks_cert: optional_env("JWKS_CERT"),
                jwks_url: get_env("JWKS_URL", Some(DEFAULT_JWKS_URL), is_prod)?,
                ec_public_key_pem: optional_env("EC_PUBLIC_KEY_PEM"),
                admin_users: split_list(&get_env("ADMIN_USERS", Some(""), is_prod)?),
                enable_org_tenancy: parse_env("ENABLE_ORG_TENANCY", "false", is_prod)?,
                enable_org_based_feature_gates: parse_env(
                    "ENABLE_ORG_BASED_FEATURE_GATES",
                    "false",
                    is_prod,
                )?,
                trusted_proxy_cidrs: get_env("TRUSTED_PROXY_CIDRS", Some(""), is_prod)?,
            },
            lockout: LockoutConfig {
                enabled: parse_env("ENABLE_ACCOUNT_LOCKOUT", "true", is_prod)?,
                max_attempts: parse_env("LOCKOUT_MAX_ATTEMPTS", "5", is_prod)?,
                duration_minutes: parse_env("LOCKOUT_DURATION_MINUTES", "15", is_prod)?,
                window_minutes: parse_env("LOCKOUT_WINDOW_MINUTES", "5", is_prod)?,
                exponential_backoff: parse_env("LOCKOUT_EXPONENTIAL_BACKOFF", "true", is_prod)?,
            },
            identity: IdentityServiceConfig {
                base_url: get_env("IDENTITY_SERVICE_URL", Some(""), is_prod)?,
                token: optional_env("IDENTITY_SERVICE_TOKEN"),
                request_timeout: Duration::from_secs(parse_env(
                    "IDENTITY_REQUEST_TIMEOUT_SECONDS",
                    "10",
                    is_prod,
                )?),
            },
            cache: CacheConfig {
                token_ttl: Duration::from_secs(parse_env("CACHE_TOKEN_TTL_SECONDS", "600", is_prod)?),
                role_ttl: Duration::from_secs(parse_env("CACHE_ROLE_TTL_SECONDS", "600", is_prod)?),
                capability_ttl: Duration::from_secs(parse_env(
                    "CACHE_CAPABILITY_TTL_SECONDS",
                    "60",
                    is_prod,
                )?),
                access_review_ttl: Duration::from_secs(parse_env(
                    "CACHE_ACCESS_REVIEW_TTL_SECONDS",
                    "600",
                    is_prod,
                )?),
                infra_env_ttl: Duration::from_secs(parse_env(
                    "CACHE_INFRA_ENV_TTL_SECONDS",
                    "300",
                    is_prod,
                )?),
                max_entries: parse_env("CACHE_MAX_ENTRIES", "10000", is_prod)?,
            },
            cleanup_interval: Duration::from_secs(parse_env(
                "CLEANUP_INTERVAL_SECONDS",
                "3600",
                is_prod,
            )?),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!("Port must be non-zero")));
        }

        match self.auth.auth_type {
            AuthType::Rhsso => {
                if self.identity.base_url.is_empty() {
                    return Err(AppError::ConfigError(anyhow::anyhow!(
                        "IDENTITY_SERVICE_URL is required for rhsso authentication"
                    )));
                }
                if self.auth.jwks_cert.is_none() && self.auth.jwks_url.is_empty() {
                    return Err(AppError::ConfigError(anyhow::anyhow!(
                        "JWKS_CERT or JWKS_URL is required for rhsso authentication"
                    )));
                }
            }
            AuthType::Local | AuthType::AgentLocal => {
                if self.auth.ec_public_key_pem.is_none() {
                    return Err(AppError::ConfigError(anyhow::anyhow!(
                        "EC_PUBLIC_KEY_PEM is required for {} authentication",
                        self.auth.auth_type
                    )));
                }
            }
            AuthType::None => {}
        }

        Ok(())
    }
}

/// Reads `key`; in production every key must be set explicitly.
pub(crate) fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(value) => Ok(value),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production",
                    key
                )))
            } else {
                default.map(|s| s.to_string()).ok_or_else(|| {
                    AppError::ConfigError(anyhow::anyhow!("{} is required", key))
                })
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .trim()
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("Invalid {}: {}", key, e)))
}

fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lockout(max_attempts: i64, duration: i64, window: i64) -> LockoutConfig {
        LockoutConfig {
            enabled: true,
            max_attempts,
            duration_minutes: duration,
            window_minutes: window,
            exponential_backoff: false,
        }
    }

    #[test]
    fn test_environment_from_str() {
        assert_eq!("PROD".parse::<Environment>(), Ok(Environment::Prod));
        assert!("staging".parse::<Environment>().is_err());
    }

    #[test]
    fn test_lockout_policy_uses_configured_values() {
        let policy = lockout(3, 10, 2).lockout_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.lockout_duration, Duration::from_secs(600));
        assert_eq!(policy.window_duration, Duration::from_secs(120));
        assert!(!policy.use_exponential);
    }

    #[test]
    fn test_lockout_policy_falls_back_on_non_positive_values() {
        let defaults = LockoutPolicy::default();
        let policy = lockout(0, -1, 0).lockout_policy();
        assert_eq!(policy.max_attempts, defaults.max_attempts);
        assert_eq!(policy.lockout_duration, defaults.lockout_duration);
        assert_eq!(policy.window_duration, defaults.window_duration);
    }

    #[test]
    fn test_split_list_skips_blanks() {
        assert_eq!(
            split_list(" alice, ,bob ,"),
            vec!["alice".to_string(), "bob".to_string()]
        );
    }

    #[test]
    fn test_get_env_requires_keys_in_prod() {
        let key = "INSTALLER_AUTH_TEST_UNSET_KEY";
        assert!(get_env(key, Some("x"), true).is_err());
        assert_eq!(get_env(key, Some("x"), false).ok(), Some("x".to_string()));
    }
}
