pub mod config;
pub mod db;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

use axum::{
    Json, Router,
    extract::State,
    middleware::from_fn,
    routing::{get, post},
};
use service_core::error::AppError;
use service_core::middleware::request_id_middleware;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::AuthConfig;
use crate::middleware::{TrustedProxyChecker, secured};
use crate::models::Role;
use crate::services::{
    AttemptStore, AuthScheme, Authenticator, AuthenticatorDeps, Authorizer, Database,
    EntityStore, FailedAttemptTracker, IdentityClient, MemoryStore, RevocationStore,
    RouteSecurity, SecurityAuditLogger, TokenBlacklist,
};

#[derive(Clone)]
pub struct AppState {
    pub service_name: String,
    pub service_version: String,
    pub authenticator: Arc<Authenticator>,
    pub authorizer: Arc<Authorizer>,
    pub blacklist: Arc<TokenBlacklist>,
    pub tracker: Arc<FailedAttemptTracker>,
    pub entities: Arc<dyn EntityStore>,
    pub audit: SecurityAuditLogger,
    pub proxies: TrustedProxyChecker,
    /// Present when backed by PostgreSQL; checked by `/health`.
    pub db: Option<Database>,
}

/// The persistence backends the engine runs on.
pub struct Stores {
    pub attempts: Arc<dyn AttemptStore>,
    pub revocations: Arc<dyn RevocationStore>,
    pub entities: Arc<dyn EntityStore>,
    pub database: Option<Database>,
}

impl Stores {
    pub fn memory(store: Arc<MemoryStore>) -> Self {
        Self {
            attempts: store.clone(),
            revocations: store.clone(),
            entities: store,
            database: None,
        }
    }

    pub fn postgres(db: Database) -> Self {
        let shared = Arc::new(db.clone());
        Self {
            attempts: shared.clone(),
            revocations: shared.clone(),
            entities: shared,
            database: Some(db),
        }
    }
}

/// Wires the engine from configuration. `identity` is required for rhsso.
pub async fn build_state(
    config: &AuthConfig,
    stores: Stores,
    identity: Option<Arc<dyn IdentityClient>>,
) -> Result<AppState, AppError> {
    let audit = SecurityAuditLogger::new();
    let tracker = Arc::new(FailedAttemptTracker::new(
        Some(stores.attempts.clone()),
        config.lockout.lockout_policy(),
    ));
    let blacklist = Arc::new(TokenBlacklist::new(
        stores.revocations.clone(),
        config.cache.max_entries,
    ));
    let http = reqwest::Client::builder()
        .timeout(config.identity.request_timeout)
        .build()
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Failed to build HTTP client: {}", e)))?;

    let authenticator = Authenticator::from_config(
        &config.auth,
        &config.cache,
        AuthenticatorDeps {
            entities: stores.entities.clone(),
            identity: identity.clone(),
            tracker: tracker.clone(),
            blacklist: blacklist.clone(),
            audit: audit.clone(),
            http,
        },
    )
    .await?;
    let authorizer = Authorizer::for_authenticator(
        &authenticator,
        identity,
        stores.entities.clone(),
        &config.cache,
        audit.clone(),
    )?;

    let proxies = TrustedProxyChecker::parse(&config.auth.trusted_proxy_cidrs);
    if proxies.is_empty() {
        tracing::info!("No trusted proxies configured; forwarding headers are ignored");
    }

    Ok(AppState {
        service_name: config.service_name.clone(),
        service_version: config.service_version.clone(),
        authenticator: Arc::new(authenticator),
        authorizer: Arc::new(authorizer),
        blacklist,
        tracker,
        entities: stores.entities,
        audit,
        proxies,
        db: stores.database,
    })
}

pub fn build_router(state: AppState) -> Router {
    let user = || RouteSecurity::new(AuthScheme::UserAuth);

    let session_routes = Router::new()
        .route("/v2/logout", post(handlers::session::logout))
        .route("/v2/principal", get(handlers::session::principal));

    let inventory_routes = Router::new()
        .route("/v2/clusters", get(handlers::inventory::list_clusters))
        .route("/v2/clusters/:cluster_id", get(handlers::inventory::get_cluster))
        .route(
            "/v2/clusters/:cluster_id/permissions",
            get(handlers::inventory::cluster_permissions),
        )
        .route(
            "/v2/infra-envs/:infra_env_id",
            get(handlers::inventory::get_infra_env),
        )
        .route(
            "/v2/feature-gates/:capability",
            get(handlers::inventory::feature_gate),
        );

    let agent_routes = Router::new().route(
        "/v2/infra-envs/:infra_env_id/hosts/:host_id",
        get(handlers::inventory::get_host),
    );

    let image_routes = Router::new().route(
        "/v2/infra-envs/:infra_env_id/downloads/image-access",
        get(handlers::inventory::image_access),
    );

    let admin_routes = Router::new().route(
        "/v2/admin/lockouts",
        get(handlers::admin::lockout_status),
    );

    let key_routes = Router::new().route(
        "/v2/admin/keys/refresh",
        post(handlers::admin::refresh_keys),
    );

    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(handlers::metrics::metrics))
        .merge(secured(session_routes, &state, user()))
        .merge(secured(inventory_routes, &state, user()))
        .merge(secured(
            agent_routes,
            &state,
            RouteSecurity::new(AuthScheme::AgentAuth),
        ))
        .merge(secured(
            image_routes,
            &state,
            RouteSecurity::new(AuthScheme::ImageUrlAuth),
        ))
        .merge(secured(
            admin_routes,
            &state,
            user().with_roles(&[Role::Admin, Role::ReadOnlyAdmin]),
        ))
        .merge(secured(
            key_routes,
            &state,
            user().with_roles(&[Role::Admin]),
        ))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(request_id_middleware))
}

pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let database = match &state.db {
        Some(db) => {
            db.health_check().await.map_err(|e| {
                tracing::error!(error = %e, "PostgreSQL health check failed");
                e
            })?;
            "up"
        }
        None => "memory",
    };

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.service_name,
        "version": state.service_version,
        "auth_type": state.authenticator.auth_type().as_str(),
        "checks": {
            "database": database
        }
    })))
}
