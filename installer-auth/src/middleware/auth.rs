use axum::{
    Router,
    extract::{ConnectInfo, FromRequestParts, RawPathParams, Request, State},
    http::request::Parts,
    middleware::{Next, from_fn_with_state},
    response::Response,
};
use service_core::error::AppError;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::AppState;
use crate::middleware::client_ip::extract_client_ip;
use crate::models::Principal;
use crate::services::error::AuthError;
use crate::services::metrics;
use crate::services::{RequestScope, RouteSecurity};

const CLUSTER_ID_PARAM: &str = "cluster_id";
const INFRA_ENV_ID_PARAM: &str = "infra_env_id";

/// State of one gated route: the shared app state plus what the route declares.
#[derive(Clone)]
pub struct RouteGate {
    state: AppState,
    security: Arc<RouteSecurity>,
}

/// Puts every route of `router` behind authentication and authorization.
pub fn secured(
    router: Router<AppState>,
    state: &AppState,
    security: RouteSecurity,
) -> Router<AppState> {
    let gate = RouteGate {
        state: state.clone(),
        security: Arc::new(security),
    };
    router.route_layer(from_fn_with_state(gate, auth_middleware))
}

/// Authenticates with the route's scheme, authorizes against its role set and
/// path, then hands the principal to the handler through request extensions.
pub async fn auth_middleware(
    State(gate): State<RouteGate>,
    params: Option<RawPathParams>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let RouteGate { state, security } = gate;
    let scheme = security.scheme;

    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());
    let client_ip = extract_client_ip(req.headers(), peer, &state.proxies);

    let credential = state
        .authenticator
        .credential_extractor(scheme)
        .extract(req.headers(), req.uri());
    let credential = match credential {
        Some(credential) => credential,
        None if !state.authenticator.requires_credential() => String::new(),
        None => {
            metrics::record_auth_attempt(scheme.name(), "missing");
            return Err(AuthError::unauthorized(format!(
                "missing credential for {}",
                scheme.name()
            ))
            .into());
        }
    };

    let mut principal = match state
        .authenticator
        .authenticate(scheme, &credential, client_ip.as_deref())
        .await
    {
        Ok(principal) => {
            metrics::record_auth_attempt(scheme.name(), "success");
            principal
        }
        Err(e) => {
            metrics::record_auth_attempt(scheme.name(), failure_label(&e));
            tracing::debug!(scheme = scheme.name(), error = %e, "Authentication rejected");
            return Err(e.into());
        }
    };

    let mut scope = RequestScope::new(req.method().clone(), req.uri().path());
    if let Some(params) = &params {
        for (name, value) in params.iter() {
            match name {
                CLUSTER_ID_PARAM => scope = scope.with_cluster(value),
                INFRA_ENV_ID_PARAM => scope = scope.with_infra_env(value),
                _ => {}
            }
        }
    }

    state
        .authorizer
        .authorize_request(&mut principal, &security, &scope)
        .await?;

    req.extensions_mut().insert(principal);
    Ok(next.run(req).await)
}

fn failure_label(err: &AuthError) -> &'static str {
    match err {
        AuthError::Locked { .. } => "locked",
        AuthError::ServiceUnavailable(_) | AuthError::Internal(_) => "error",
        _ => "failure",
    }
}

/// Extractor for the principal the middleware authenticated.
pub struct AuthPrincipal(pub Principal);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthPrincipal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .map(AuthPrincipal)
            .ok_or_else(|| {
                AppError::InternalError(anyhow::anyhow!(
                    "Principal missing from request extensions"
                ))
            })
    }
}
