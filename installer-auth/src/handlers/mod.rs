pub mod admin;
pub mod inventory;
pub mod metrics;
pub mod session;
