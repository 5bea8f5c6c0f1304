use axum::{
    Json,
    extract::State,
    http::{HeaderMap, StatusCode, header},
    response::IntoResponse,
};
use chrono::Utc;
use service_core::error::AppError;

use crate::AppState;
use crate::middleware::AuthPrincipal;
use crate::models::Principal;
use crate::services::error::AuthError;
use crate::services::{hash_token, metrics, token_expiry};

/// Revocation lifetime for tokens that carry no `exp`.
const DEFAULT_REVOCATION_HOURS: i64 = 24;

/// Revokes the presented bearer token until it would have expired anyway.
pub async fn logout(
    State(state): State<AppState>,
    AuthPrincipal(principal): AuthPrincipal,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let token = principal
        .raw_token
        .clone()
        .or_else(|| bearer_token(&headers))
        .ok_or_else(|| AuthError::BadRequest("no bearer token to revoke".to_string()))?;

    let expires_at = token_expiry(&token)
        .unwrap_or_else(|| Utc::now() + chrono::Duration::hours(DEFAULT_REVOCATION_HOURS));
    state
        .blacklist
        .revoke(
            &token,
            expires_at,
            Some(principal.username.as_str()).filter(|u| !u.is_empty()),
            Some("user"),
            "logout",
        )
        .await?;

    state
        .audit
        .token_revoked(&hash_token(&token), &principal.username, "logout");
    metrics::record_revocation();

    Ok((
        StatusCode::OK,
        Json(serde_json::json!({
            "message": "Logged out successfully"
        })),
    ))
}

/// The authenticated principal, as the engine sees it.
pub async fn principal(AuthPrincipal(principal): AuthPrincipal) -> Json<Principal> {
    Json(principal)
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| {
            value
                .strip_prefix("Bearer ")
                .or_else(|| value.strip_prefix("bearer "))
        })
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}
