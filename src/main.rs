mod challenge;
mod clock;
mod config;
mod drop_id;
mod entities;
mod error;
mod gateway;
mod http;
mod janitor;
mod lifecycle;
mod models;
mod state;
mod store;
mod throttle;

use std::sync::Arc;
use std::time::Duration;

use crate::challenge::{HCaptchaVerifier, HumanityVerifier, PermissiveVerifier};
use crate::clock::SystemClock;
use crate::config::{ApiConfig, GatewayKind, StoreBackend};
use crate::gateway::{LnbitsGateway, MockGateway, PaymentGateway};
use crate::janitor::Janitor;
use crate::lifecycle::{DropEngine, LifecycleSettings};
use crate::state::{ApiCache, AppState};
use crate::store::{DatabaseDropStore, DropStore, MemoryDropStore};
use crate::throttle::ViewThrottle;
use anyhow::{Context, Result};
use axum::Router;
use migration::MigratorTrait;
use sea_orm::ConnectOptions;
use sea_orm::Database;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = ApiConfig::load().context("Failed to load configuration")?;

    let store = build_store(&config).await?;
    let gateway = build_gateway(&config)?;
    let verifier = build_verifier(&config)?;

    let engine = Arc::new(DropEngine::new(
        store,
        gateway,
        verifier,
        Arc::new(SystemClock),
        ViewThrottle::from_config(&config.throttle),
        LifecycleSettings::from_config(&config.lifecycle, &config.gateway),
    ));
    let restored = engine
        .restore_holds()
        .await
        .context("Failed to load reconciliation holds")?;
    if restored > 0 {
        warn!("{restored} drop(s) held for manual reconciliation");
    }

    let cache = Arc::new(ApiCache::new(&config.cache));
    let app_state = AppState::new(Arc::clone(&engine), Arc::clone(&cache))
        .with_webhook_secret(config.gateway.webhook_secret.clone())
        .with_admin_token(config.server.admin_token.clone());

    let janitor = Janitor::new(Arc::clone(&engine), config.lifecycle.sweep_interval());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let janitor_handle = tokio::spawn(janitor.run(shutdown_rx));

    let listener = TcpListener::bind(config.server.address())
        .await
        .context("Failed to bind HTTP listener")?;
    let local_addr = listener
        .local_addr()
        .context("Failed to obtain listener address")?;
    info!("ZapDrop API listening on {local_addr}");

    let router: Router = http::router(app_state);
    let server = axum::serve(listener, router.into_make_service());
    server
        .with_graceful_shutdown(shutdown_signal(shutdown_tx.clone()))
        .await
        .context("HTTP server exited with error")?;

    shutdown_tx.send(true).ok();
    if let Err(join_err) = janitor_handle.await {
        error!("Janitor task join error: {join_err}");
    }

    Ok(())
}

fn init_tracing() {
    let default_filter = "info";
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.to_string());
    assert!(!filter.is_empty(), "Tracing filter must not be empty");
    assert!(filter.len() < 256, "Tracing filter length exceeds bounds");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .compact()
        .init();
}

async fn build_store(config: &ApiConfig) -> Result<Arc<dyn DropStore>> {
    match config.store.backend {
        StoreBackend::Memory => {
            warn!("Using in-memory drop store; drops are lost on restart");
            Ok(Arc::new(MemoryDropStore::new()))
        }
        StoreBackend::Postgres => {
            let database = connect_database(config).await?;
            run_migrations(&database).await?;
            Ok(Arc::new(DatabaseDropStore::new(database)))
        }
    }
}

async fn connect_database(config: &ApiConfig) -> Result<sea_orm::DatabaseConnection> {
    let url = config
        .store
        .url
        .clone()
        .context("store.url is required for the postgres backend")?;
    let mut options = ConnectOptions::new(url);
    options
        .max_connections(config.store.max_connections)
        .sqlx_logging(true)
        .sqlx_logging_level(tracing::log::LevelFilter::Debug)
        .acquire_timeout(Duration::from_secs(10));

    if let Some(min) = config.store.min_connections {
        options.min_connections(min);
    }

    Database::connect(options)
        .await
        .context("Failed to connect to PostgreSQL")
}

async fn run_migrations(database: &sea_orm::DatabaseConnection) -> Result<()> {
    migration::Migrator::up(database, None)
        .await
        .context("Database migrations failed")
}

fn build_gateway(config: &ApiConfig) -> Result<Arc<dyn PaymentGateway>> {
    let gateway = &config.gateway;
    match gateway.kind {
        GatewayKind::Mock => {
            warn!("Using mock payment gateway; no real payments are made");
            Ok(Arc::new(MockGateway::new()))
        }
        GatewayKind::Lnbits => {
            let url = gateway.url.as_deref().unwrap_or_default();
            let admin_key = gateway.admin_key.as_deref().unwrap_or_default();
            let client = LnbitsGateway::new(url, admin_key, gateway.request_timeout())
                .context("Failed to initialize LNbits client")?;
            Ok(Arc::new(client))
        }
    }
}

fn build_verifier(config: &ApiConfig) -> Result<Arc<dyn HumanityVerifier>> {
    match config.challenge.hcaptcha_secret.as_deref() {
        Some(secret) if !secret.is_empty() => {
            let verifier = HCaptchaVerifier::new(
                &config.challenge.verify_url,
                secret,
                config.gateway.request_timeout(),
            )
            .context("Failed to initialize hCaptcha client")?;
            Ok(Arc::new(verifier))
        }
        _ => {
            warn!("No hCaptcha secret configured; any non-empty token passes");
            Ok(Arc::new(PermissiveVerifier))
        }
    }
}

async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {err}");
        return;
    }
    shutdown_tx.send(true).ok();
    info!("Shutdown signal dispatched");
}
