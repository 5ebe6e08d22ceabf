use std::net::SocketAddr;
use std::sync::Arc;

use shared::config::AppConfig;
use shared::dispatcher::Dispatcher;
use shared::kv::connect_ttl_store;
use shared::messaging::WhatsAppClient;
use shared::repos::Store;
use tracing::{error, info, warn};
use webhook_server::http;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "webhook_server=debug,shared=info,axum=info".to_string()),
        )
        .init();

    let config = match AppConfig::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            error!("failed to read config: {err}");
            std::process::exit(1);
        }
    };

    let store = match Store::connect(&config.database_url, config.database_max_connections).await
    {
        Ok(store) => store,
        Err(err) => {
            error!("failed to connect to postgres: {err}");
            std::process::exit(1);
        }
    };

    let migrator = match sqlx::migrate::Migrator::new(config.migrations_dir.clone()).await {
        Ok(migrator) => migrator,
        Err(err) => {
            error!("failed to load migrations: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = migrator.run(store.pool()).await {
        error!("failed to run migrations: {err}");
        std::process::exit(1);
    }

    let kv = match connect_ttl_store(&config.session_backend).await {
        Ok(kv) => kv,
        Err(err) => {
            error!("failed to connect session store: {err}");
            std::process::exit(1);
        }
    };

    let client = match WhatsAppClient::new(&config.whatsapp) {
        Ok(client) => client,
        Err(err) => {
            error!("failed to build whatsapp client: {err}");
            std::process::exit(1);
        }
    };
    if !config.whatsapp.delivery_enabled() {
        warn!("WHATSAPP_PHONE_NUMBER_ID or WHATSAPP_ACCESS_TOKEN unset; outbound messages are simulated");
    }

    let store = Arc::new(store);
    let dispatcher = Dispatcher::assemble(
        store.clone(),
        kv,
        Arc::new(client),
        &config.marketplace,
    );

    let app = http::build_router(http::AppState {
        store,
        dispatcher,
        verify_token: config.whatsapp.verify_token.clone(),
    });

    let addr: SocketAddr = match config.bind_addr.parse() {
        Ok(addr) => addr,
        Err(err) => {
            error!("invalid WEBHOOK_BIND_ADDR '{}': {err}", config.bind_addr);
            std::process::exit(1);
        }
    };

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!("failed to bind {addr}: {err}");
            std::process::exit(1);
        }
    };

    info!(
        "webhook server listening on {}",
        listener.local_addr().unwrap_or(addr)
    );
    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("server stopped: {err}");
        std::process::exit(1);
    }
    info!("webhook server stopped; pending offer timers are dropped");
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
}
