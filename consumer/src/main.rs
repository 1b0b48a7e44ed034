mod api;
mod bill;
mod ingest;
mod session;
mod tracker;

use checkout_cam_common::config::Config;
use session::BillingSession;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        brokers = config.kafka.brokers,
        topic = config.kafka.topic,
        group_id = config.kafka.group_id,
        station = config.detector.station_id,
        time_threshold_secs = config.tracker.time_threshold_secs,
        tax_rate = config.billing.tax_rate,
        priced_labels = config.billing.prices.len(),
        excluded = ?config.billing.excluded_labels,
        "starting checkout-cam consumer"
    );

    let session = match BillingSession::from_config(&config) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = %e, "failed to set up billing session");
            std::process::exit(1);
        }
    };

    let consumer = match ingest::create_consumer(&config.kafka) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to create Kafka consumer");
            std::process::exit(1);
        }
    };

    // Kafka -> bounded channel -> tick loop, so slow ticks apply backpressure
    // instead of piling up in memory.
    let (tick_tx, tick_rx) = mpsc::channel(config.tracker.queue_capacity);
    tokio::spawn(ingest::run_kafka_ingest(
        consumer,
        config.detector.station_id.clone(),
        tick_tx,
    ));
    tokio::spawn(ingest::run_tick_loop(tick_rx, Arc::clone(&session)));

    let app = api::router(session);
    let addr = format!("0.0.0.0:{}", config.api.port);
    info!(addr, "billing API server starting");

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        eprintln!("Failed to bind to {addr}: {e}");
        std::process::exit(1);
    });
    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "API server stopped");
        std::process::exit(1);
    }
}
