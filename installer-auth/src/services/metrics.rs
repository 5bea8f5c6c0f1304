use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use service_core::error::AppError;
use std::sync::OnceLock;

pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub const AUTH_ATTEMPTS_TOTAL: &str = "installer_auth_attempts_total";
pub const LOCKOUTS_TOTAL: &str = "installer_auth_lockouts_total";
pub const TOKENS_REVOKED_TOTAL: &str = "installer_auth_tokens_revoked_total";
pub const AUTHZ_DENIALS_TOTAL: &str = "installer_auth_authz_denials_total";

/// Installs the global Prometheus recorder. Calling it twice is harmless.
pub fn init_metrics() -> Result<(), AppError> {
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
        AppError::ConfigError(anyhow::anyhow!("Failed to install Prometheus recorder: {}", e))
    })?;
    let _ = METRICS_HANDLE.set(handle);
    Ok(())
}

pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized\n".to_string())
}

pub fn record_auth_attempt(scheme: &'static str, outcome: &'static str) {
    metrics::counter!(AUTH_ATTEMPTS_TOTAL, "scheme" => scheme, "outcome" => outcome).increment(1);
}

pub fn record_lockout(identifier_type: &'static str) {
    metrics::counter!(LOCKOUTS_TOTAL, "identifier_type" => identifier_type).increment(1);
}

pub fn record_revocation() {
    metrics::counter!(TOKENS_REVOKED_TOTAL).increment(1);
}

pub fn record_authz_denial(reason: &'static str) {
    metrics::counter!(AUTHZ_DENIALS_TOTAL, "reason" => reason).increment(1);
}
