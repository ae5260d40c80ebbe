use anyhow::Result;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use flow_dashboard_core::config::Config;
use flow_dashboard_core::market_data::adapters::WsTransport;
use flow_dashboard_core::market_data::connection::spawn_connection;
use flow_dashboard_core::market_data::router;
use flow_dashboard_core::metrics;
use flow_dashboard_core::state::StateStore;
use flow_dashboard_core::views::publisher;
use flow_dashboard_core::watchlist::{HttpWatchlistClient, WatchlistApi};

/// Connection→router frame buffer.
/// Sized to absorb stream bursts without back-pressuring the socket task.
const FRAME_CHANNEL_BUFFER: usize = 4_096;

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(&config.log_level);

    if let Some(port) = config.metrics_port {
        metrics::init_metrics_server(port)?;
        info!(port, "metrics exporter listening");
    }

    info!(stream = %config.stream_url, api = %config.api_base_url, "flow-dashboard starting");

    let store = StateStore::new().shared();
    let (frames_tx, frames_rx) = mpsc::channel(FRAME_CHANNEL_BUFFER);
    let (changes_tx, changes_rx) = watch::channel(0u64);
    let (_filter_tx, filter_rx) = watch::channel(config.flow_filter());

    let router_handle = tokio::spawn(router::run_router(frames_rx, store.clone(), changes_tx));
    let views_handle = tokio::spawn(publisher::run_view_publisher(
        store.clone(),
        changes_rx,
        filter_rx,
        config.summary_interval,
    ));

    let connection = spawn_connection(WsTransport::new(config.stream_url.clone()), config.backoff(), frames_tx);

    if !config.watchlist_seed.is_empty() {
        let client = HttpWatchlistClient::new(config.api_base_url.clone());
        let seed = config.watchlist_seed.clone();
        tokio::spawn(async move {
            for symbol in seed {
                if let Err(err) = client.add(&symbol).await {
                    debug!(symbol = %symbol, error = %err, "watchlist seed entry skipped");
                }
            }
        });
    }

    tokio::select! {
        res = router_handle => {
            match res {
                Ok(Ok(())) => warn!("router task exited"),
                Ok(Err(err)) => warn!(error = %err, "router task returned error"),
                Err(err) => warn!(error = %err, "router task panicked"),
            }
        }
        res = views_handle => {
            match res {
                Ok(Ok(())) => warn!("view publisher exited"),
                Ok(Err(err)) => warn!(error = %err, "view publisher returned error"),
                Err(err) => warn!(error = %err, "view publisher panicked"),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl-C, shutting down");
        }
    }

    connection.stop().await;
    info!("flow-dashboard stopped");
    Ok(())
}
