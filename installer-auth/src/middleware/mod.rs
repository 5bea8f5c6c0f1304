pub mod auth;
pub mod client_ip;

pub use auth::{AuthPrincipal, RouteGate, auth_middleware, secured};
pub use client_ip::{TrustedProxyChecker, extract_client_ip};
