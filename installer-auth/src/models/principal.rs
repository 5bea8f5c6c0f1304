//! The authenticated identity handed from authenticators to the authorizer.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const ADMIN_USERNAME: &str = "admin";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "admin")]
    Admin,
    #[serde(rename = "read-only-admin")]
    ReadOnlyAdmin,
    #[serde(rename = "user")]
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::ReadOnlyAdmin => "read-only-admin",
            Role::User => "user",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "read-only-admin" => Ok(Role::ReadOnlyAdmin),
            "user" => Ok(Role::User),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

/// Verified identity for one request.
///
/// Built fresh by an authenticator and never persisted. Only `role` and
/// `is_authorized` change after construction, during enrichment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Principal {
    pub role: Role,
    pub username: String,
    pub org_id: String,
    pub email: String,
    pub client_id: String,
    pub issuer: String,
    pub first_name: String,
    pub last_name: String,
    pub is_authorized: bool,
    /// Credential as presented, for flows that forward it downstream.
    #[serde(skip)]
    pub raw_token: Option<String>,
    /// Infra-env id carried by an image token.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_subject: Option<String>,
}

impl Principal {
    pub fn new(role: Role, username: impl Into<String>) -> Self {
        Self {
            role,
            username: username.into(),
            org_id: String::new(),
            email: String::new(),
            client_id: String::new(),
            issuer: String::new(),
            first_name: String::new(),
            last_name: String::new(),
            is_authorized: false,
            raw_token: None,
            image_subject: None,
        }
    }

    /// The fixed principal used when authentication is disabled or the
    /// deployment trusts locally signed tokens.
    pub fn admin() -> Self {
        Self {
            is_authorized: true,
            ..Self::new(Role::Admin, ADMIN_USERNAME)
        }
    }

    pub fn image_scoped(infra_env_id: impl Into<String>) -> Self {
        Self {
            image_subject: Some(infra_env_id.into()),
            ..Self::new(Role::User, "")
        }
    }

    pub fn with_org(mut self, org_id: impl Into<String>) -> Self {
        self.org_id = org_id.into();
        self
    }

    /// Admin or read-only admin.
    pub fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin | Role::ReadOnlyAdmin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trips_through_str() {
        for role in [Role::Admin, Role::ReadOnlyAdmin, Role::User] {
            assert_eq!(role.as_str().parse::<Role>(), Ok(role));
        }
        assert!("owner".parse::<Role>().is_err());
    }

    #[test]
    fn test_admin_principal() {
        let principal = Principal::admin();
        assert_eq!(principal.role, Role::Admin);
        assert_eq!(principal.username, ADMIN_USERNAME);
        assert!(principal.is_admin());
    }

    #[test]
    fn test_raw_token_is_never_serialized() {
        let mut principal = Principal::new(Role::User, "jdoe").with_org("org-1");
        principal.raw_token = Some("secret-token".to_string());

        let json = serde_json::to_string(&principal).unwrap();
        assert!(!json.contains("secret-token"));
        assert!(json.contains("\"role\":\"user\""));
        assert!(!principal.is_admin());
    }
}
