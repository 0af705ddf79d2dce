use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info};

use kite_index_relay::api;
use kite_index_relay::catalog::CatalogFetcher;
use kite_index_relay::config::RelayConfig;
use kite_index_relay::market_data::adapters::kite::KiteTickerAdapter;
use kite_index_relay::market_data::index::IndexName;
use kite_index_relay::market_data::router;
use kite_index_relay::telemetry;
use kite_index_relay::RelayState;

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn run(config: RelayConfig) -> anyhow::Result<()> {
    // Fatal before any connection is opened
    let credentials = config.credentials()?;
    let allowed_origin = config.allowed_origin_header()?;
    let refresh_every = config.catalog_refresh_interval()?;
    let read_timeout = config.ticker_read_timeout()?;
    info!(?config, "starting relay");

    let state = Arc::new(RelayState::new());

    // 1) Streaming ticker -> latest price cache
    let adapter = KiteTickerAdapter::new(&config.ticker_url, &credentials, IndexName::tokens())?
        .with_read_timeout(read_timeout);
    info!(tokens = ?adapter.tokens(), "subscribing to index tokens");
    let (adapter_task, router_task) = router::spawn_ticker(adapter, Arc::clone(&state));

    // 2) Instrument catalog: once now, then on a timer
    let fetcher = Arc::new(CatalogFetcher::new(config.instruments_url.clone(), Arc::clone(&state))?);
    let catalog_task = tokio::spawn(fetcher.run_periodic(refresh_every));

    // 3) HTTP gateway
    let listener = TcpListener::bind(config.listen_addr()).await?;
    let app = api::create_router(Arc::clone(&state), allowed_origin);
    api::serve(listener, app, shutdown_signal()).await?;

    adapter_task.abort();
    router_task.abort();
    catalog_task.abort();
    info!("relay stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok(); // load .env

    let config = RelayConfig::parse();
    telemetry::init_tracing(&config.log_filter);
    if let Err(e) = telemetry::init_metrics() {
        error!(error = %e, "metrics exporter unavailable");
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
