mod auth;
mod config;
mod service;

use config::ServerConfig;
use service::{create_router, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uidkeep_core::{
    Clock, CredentialHandle, CredentialProvider, HttpAccessControl, HttpTokenIssuer, Mirror,
    RecordStore, Registry, Sweeper, SystemClock,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "uidkeep_server=info,uidkeep_core=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::from_env()?;
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Fail fast on an unreadable store instead of serving from it
    let store = RecordStore::with_config(config.store.clone());
    let existing = store.load().await?;
    tracing::info!(
        "Loaded {} UIDs from {}",
        existing.len(),
        store.path().display()
    );

    let (credentials, refresh_task) = match &config.credential {
        Some(credential_config) => {
            let issuer = Arc::new(HttpTokenIssuer::new(credential_config)?);
            let provider = CredentialProvider::new(issuer, Arc::clone(&clock));
            if provider.refresh().await.is_err() {
                tracing::warn!("Starting without a credential; upstream calls are skipped until a refresh succeeds");
            }
            let task = provider.spawn(credential_config.refresh_interval);
            (provider.handle(), Some(task))
        }
        None => {
            tracing::warn!(
                "UIDKEEP_ISSUER_UID/UIDKEEP_ISSUER_SECRET not set; running without upstream mirroring"
            );
            (CredentialHandle::none(), None)
        }
    };

    let access = Arc::new(HttpAccessControl::new(config.access.clone())?);
    let mirror = Mirror::new(access, credentials);

    let sweeper = Sweeper::new(store.clone(), mirror.clone(), Arc::clone(&clock));
    let sweep_task = sweeper.spawn(&config.sweeper);

    let registry = Registry::new(store, mirror, clock);
    let state = Arc::new(AppState::new(registry, config.admin_key.clone()));
    let app = create_router(state);

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("🚀 uidkeep server listening on {}", addr);
    tracing::info!("   Sweep interval: {:?}", config.sweeper.interval);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutting down background tasks");
    sweep_task.shutdown().await;
    if let Some(task) = refresh_task {
        task.shutdown().await;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!("Failed to listen for SIGTERM: {}", err);
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
}
