pub mod failed_attempt;
pub mod ownership;
pub mod principal;
pub mod revoked_token;

pub use failed_attempt::{FailedLoginAttempt, IdentifierType};
pub use ownership::{ClusterKind, ClusterOwnership, HostOwnership, InfraEnvOwnership};
pub use principal::{ADMIN_USERNAME, Principal, Role};
pub use revoked_token::RevokedToken;
