use installer_auth::{
    Stores, build_router, build_state,
    config::AuthConfig,
    db,
    services::{AccountsClient, CleanupJob, CleanupTask, Database, IdentityClient, MemoryStore},
};
use service_core::error::AppError;
use service_core::observability::init_tracing;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = AuthConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )?;
    installer_auth::services::metrics::init_metrics()?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        auth_type = %config.auth.auth_type,
        "Starting installer auth service"
    );

    let stores = if config.database.url.is_empty() {
        tracing::warn!("DATABASE_URL is empty; lockout and revocation state is process-local");
        Stores::memory(Arc::new(MemoryStore::new()))
    } else {
        let pool = db::create_pool(&config.database)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::Error::new(e)))?;
        db::run_migrations(&pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::Error::new(e)))?;
        Stores::postgres(Database::new(pool))
    };

    let identity: Option<Arc<dyn IdentityClient>> = if config.identity.base_url.is_empty() {
        None
    } else {
        Some(Arc::new(AccountsClient::new(
            &config.identity.base_url,
            config.identity.token.clone(),
            config.identity.request_timeout,
        )))
    };

    let state = build_state(&config, stores, identity).await?;

    let jobs: Vec<Arc<dyn CleanupJob>> = vec![
        state.blacklist.clone() as Arc<dyn CleanupJob>,
        state.tracker.clone() as Arc<dyn CleanupJob>,
    ];
    let cleanup = CleanupTask::spawn(jobs, config.cleanup_interval);

    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    cleanup.shutdown().await;
    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
