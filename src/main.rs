use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use numbr_backend::api::{self, AppState};
use numbr_backend::cache::{init_cache_pool, Cache, RedisCache, RedisPoolConfig};
use numbr_backend::config::AppConfig;
use numbr_backend::database::models::Order;
use numbr_backend::database::postgres::PgStore;
use numbr_backend::database::store::LedgerStore;
use numbr_backend::database::{init_pool_from_config, run_migrations};
use numbr_backend::health::HealthChecker;
use numbr_backend::logging::init_tracing;
use numbr_backend::numbers::providers::SmsActivateProvider;
use numbr_backend::numbers::{NumberProvider, ServiceOffer};
use numbr_backend::numbers::ProviderGateway;
use numbr_backend::payments::PaymentGatewayFactory;
use numbr_backend::services::{CatalogService, OrderService, WalletService, WebhookProcessor};
use numbr_backend::workers::ExpirySweeper;

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
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

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("loading configuration")?;
    init_tracing(&config.logging);
    config.validate().context("validating configuration")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
        "Starting numbr backend"
    );

    // Database
    let db_pool = init_pool_from_config(&config.database).await.map_err(|e| {
        error!("Failed to initialize database pool: {}", e);
        e
    })?;
    if config.database.run_migrations {
        run_migrations(&db_pool).await?;
    }
    let store: Arc<dyn LedgerStore> = Arc::new(PgStore::new(db_pool.clone()));

    // Cache
    let cache_pool = init_cache_pool(RedisPoolConfig::from(&config.cache))
        .await
        .map_err(|e| {
            error!("Failed to initialize cache pool: {}", e);
            e
        })?;
    let redis_cache = RedisCache::new(cache_pool.clone());

    // Number providers
    let mut gateway = ProviderGateway::from_config(&config.orders);
    match SmsActivateProvider::from_config(
        &config.sms_activate,
        config.orders.provider_call_timeout(),
    )? {
        Some(provider) => {
            info!(provider = provider.id(), "number provider registered");
            gateway.register(Arc::new(provider));
        }
        None => warn!("SMS_ACTIVATE_API_KEY not set; no number provider registered"),
    }

    // Payment gateways
    let payments = Arc::new(PaymentGatewayFactory::from_env()?);

    let order_cache: Arc<dyn Cache<Order>> = Arc::new(redis_cache.clone());
    let catalog_cache: Arc<dyn Cache<Vec<ServiceOffer>>> = Arc::new(redis_cache);

    let orders = OrderService::new(store.clone(), gateway.clone(), config.orders.clone())
        .with_cache(order_cache, config.cache.order_status_ttl());
    let state = AppState {
        orders: orders.clone(),
        wallet: WalletService::new(store.clone(), payments.clone()),
        catalog: CatalogService::new(store.clone(), gateway).with_cache(catalog_cache),
        webhooks: Arc::new(WebhookProcessor::new(store.clone(), payments)),
        health: HealthChecker::new()
            .with_timeout(Duration::from_secs(5))
            .with_probe("database", Arc::new(db_pool))
            .with_probe("cache", Arc::new(cache_pool)),
        auth: Arc::new(config.auth.clone()),
    };

    // Workers
    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let sweeper = ExpirySweeper::new(store, orders, config.sweeper.clone());
    let sweeper_handle = tokio::spawn(sweeper.run(worker_shutdown_rx));

    let app = api::router(state);

    let addr: SocketAddr = config
        .server
        .bind_address()
        .parse()
        .context("parsing bind address")?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to address {}: {}", addr, e);
        e
    })?;
    info!(%addr, "numbr backend listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await
        .context("server error")?;

    let _ = worker_shutdown_tx.send(true);
    if let Err(e) = sweeper_handle.await {
        error!(error = %e, "expiry sweeper task failed");
    }

    info!("numbr backend stopped");
    Ok(())
}
