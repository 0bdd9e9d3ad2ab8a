use anyhow::Context;
use clap::Parser;
use simtrade::adapters::{build_price_source, MemoryStore, PostgresStore, PriceCache};
use simtrade::api::{create_router, spawn_event_forwarder, spawn_snapshot_refresher, AppState};
use simtrade::cli::{Cli, Commands};
use simtrade::config::AppConfig;
use simtrade::engine::OrderService;
use simtrade::ledger::LedgerStore;
use simtrade::services::OrderSweeper;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

mod main_runtime;

use main_runtime::{init_logging, shutdown_signal};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_from(&cli.config_dir)
        .with_context(|| format!("loading configuration from {}", cli.config_dir))?;
    if cli.memory {
        config.database.in_memory = true;
    }
    if let Err(errors) = config.validate() {
        anyhow::bail!("invalid configuration:\n  {}", errors.join("\n  "));
    }

    init_logging(&config.logging);

    let command = cli.command.unwrap_or(Commands::Serve);

    let store: Arc<dyn LedgerStore> = if config.database.in_memory {
        if command == Commands::Migrate {
            warn!("In-memory ledger selected, nothing to migrate");
            return Ok(());
        }
        info!("Using in-memory ledger");
        Arc::new(MemoryStore::new())
    } else {
        let store = PostgresStore::new(&config.database.url, config.database.max_connections)
            .await
            .context("connecting to PostgreSQL")?;
        store.migrate().await?;
        if command == Commands::Migrate {
            return Ok(());
        }
        Arc::new(store)
    };

    let source = build_price_source(&config.price_feed)?;
    info!("Price source: {}", source.name());
    let prices = Arc::new(PriceCache::new(
        source,
        Duration::from_millis(config.price_feed.timeout_ms),
    ));

    let service = Arc::new(OrderService::new(
        store,
        prices,
        config.trading.clone(),
        config.store.clone(),
    ));
    let sweeper = Arc::new(OrderSweeper::new(service.clone(), &config.sweeper));

    match command {
        Commands::Migrate => Ok(()),
        Commands::SweepOnce => {
            let report = sweeper.run_once().await?;
            println!(
                "checked {} pending orders, filled {}, errors {}",
                report.total_checked, report.executed_count, report.errors
            );
            Ok(())
        }
        Commands::Serve => serve(config, service, sweeper).await,
    }
}

async fn serve(
    config: AppConfig,
    service: Arc<OrderService>,
    sweeper: Arc<OrderSweeper>,
) -> anyhow::Result<()> {
    if config.sweeper.enabled {
        sweeper.start();
    } else {
        warn!("Order sweeper disabled; pending orders only fill on placement or manual processing");
    }

    let state = AppState::new(service.clone(), sweeper.clone());
    let forwarder = spawn_event_forwarder(service.clone(), state.sessions.clone());
    let refresher = (config.server.snapshot_interval_secs > 0).then(|| {
        spawn_snapshot_refresher(
            service.clone(),
            state.sessions.clone(),
            Duration::from_secs(config.server.snapshot_interval_secs),
        )
    });

    let app = create_router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down...");
    sweeper.stop();
    forwarder.abort();
    if let Some(refresher) = refresher {
        refresher.abort();
    }
    Ok(())
}
