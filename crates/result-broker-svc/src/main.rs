//! Result Broker Service binary

use anyhow::Result;
use clap::Parser;
use result_broker::Hub;
use result_broker_svc::{router, AppState};
use std::time::Duration;
use tracing::{debug, info, Level};

/// Result broker service CLI arguments
#[derive(Parser, Debug)]
#[command(name = "result-broker-svc")]
#[command(about = "Publish/subscribe broker for MPC ceremony results")]
struct Args {
    /// Listen address
    #[arg(short, long, env = "BROKER_LISTEN", default_value = "0.0.0.0:8090")]
    listen: String,

    /// Per-channel buffer size
    #[arg(long, default_value = "64")]
    capacity: usize,

    /// Seconds between sweeps of channels without subscribers
    #[arg(long, default_value = "60")]
    prune_interval: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    info!(
        listen = %args.listen,
        capacity = args.capacity,
        prune_interval = args.prune_interval,
        "Starting result broker service"
    );

    let state = AppState::new(Hub::new(args.capacity));

    // Spawn prune task
    let prune_hub = state.hub.clone();
    let prune_every = Duration::from_secs(args.prune_interval.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(prune_every);
        loop {
            interval.tick().await;
            let removed = prune_hub.prune();
            if removed > 0 {
                debug!(removed, "Pruned idle channels");
            }
        }
    });

    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&args.listen).await?;
    info!(address = %args.listen, "Listening");

    axum::serve(listener, app).await?;

    Ok(())
}
