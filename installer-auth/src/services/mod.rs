//! Authentication and authorization engine.
//!
//! Credential verification, lockout, token revocation and ownership checks,
//! plus the stores and remote clients they depend on.

pub mod authenticator;
pub mod authorizer;
pub mod blacklist;
pub mod cache;
pub mod cleanup;
mod database;
pub mod error;
pub mod identity;
pub mod jwks;
pub mod lockout;
pub mod metrics;
pub mod security_audit;
pub mod stores;

pub use authenticator::{AuthScheme, AuthType, Authenticator, AuthenticatorDeps};
pub use authorizer::{Action, Authorizer, EntityRef, OwnershipFilter, RequestScope, RouteSecurity};
pub use blacklist::{TokenBlacklist, hash_token, token_expiry};
pub use cleanup::{CleanupJob, CleanupTask};
pub use database::Database;
pub use error::AuthError;
pub use identity::{AccountsClient, IdentityClient, MockIdentityClient};
pub use lockout::{FailedAttemptTracker, LockoutPolicy};
pub use security_audit::SecurityAuditLogger;
pub use stores::{AttemptStore, EntityStore, MemoryStore, RevocationStore};
