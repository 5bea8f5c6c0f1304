//! Operator endpoints, restricted to administrator roles at the route.

use axum::{
    Json,
    extract::{Query, State},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;

use crate::AppState;
use crate::models::IdentifierType;

#[derive(Debug, Deserialize)]
pub struct LockoutQuery {
    pub identifier: String,
    #[serde(default = "default_identifier_type")]
    pub identifier_type: IdentifierType,
}

fn default_identifier_type() -> IdentifierType {
    IdentifierType::Username
}

#[derive(Debug, Serialize)]
pub struct LockoutStatus {
    pub identifier: String,
    pub identifier_type: IdentifierType,
    pub attempt_count: u32,
    pub locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_until: Option<DateTime<Utc>>,
}

pub async fn lockout_status(
    State(state): State<AppState>,
    Query(query): Query<LockoutQuery>,
) -> Result<Json<LockoutStatus>, AppError> {
    if query.identifier.trim().is_empty() {
        return Err(AppError::BadRequest(anyhow::anyhow!("identifier is required")));
    }

    let kind = query.identifier_type;
    let attempt_count = state.tracker.get_attempt_count(&query.identifier, kind).await;
    let (locked, locked_until) = state.tracker.is_locked(&query.identifier, kind).await;

    Ok(Json(LockoutStatus {
        identifier: query.identifier,
        identifier_type: kind,
        attempt_count,
        locked,
        locked_until,
    }))
}

#[derive(Debug, Serialize)]
pub struct KeyRefresh {
    pub keys: usize,
}

/// Re-fetches the identity provider's signing keys.
pub async fn refresh_keys(State(state): State<AppState>) -> Result<Json<KeyRefresh>, AppError> {
    let keys = state.authenticator.refresh_keys().await?;
    tracing::info!(keys, "Signing keys refreshed");
    Ok(Json(KeyRefresh { keys }))
}
