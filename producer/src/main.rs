mod clock;
mod detector;

use checkout_cam_common::config::Config;
use clock::MonotonicClock;
use detector::ObservationPublisher;
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    #[error("failed to create Kafka producer: {0}")]
    KafkaCreate(String),
    #[error("HTTP connection failed: {0}")]
    HttpConnect(reqwest::Error),
    #[error("HTTP stream error: {0}")]
    HttpStream(reqwest::Error),
    #[error("HTTP status {0}")]
    HttpStatus(u16),
}

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
        mode = config.detector.mode,
        station = config.detector.station_id,
        min_confidence = config.detector.min_confidence,
        "starting checkout-cam producer"
    );

    let producer =
        match detector::create_producer(&config.kafka.brokers, &config.kafka.compression) {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "failed to create Kafka producer");
                std::process::exit(1);
            }
        };
    let clock = MonotonicClock::new();
    let publisher =
        ObservationPublisher::new(&producer, &config.kafka.topic, &config.detector, &clock);

    let result = match config.detector.mode.as_str() {
        "stream" => detector::run_stream_producer(&config.detector.url, &publisher).await,
        "polling" => match config.detector.poll_interval() {
            Ok(interval) => {
                detector::run_polling_producer(&config.detector.url, &publisher, interval).await
            }
            Err(e) => {
                error!(error = %e, "invalid polling interval");
                std::process::exit(1);
            }
        },
        other => {
            error!(mode = other, "unknown detector mode, expected 'stream' or 'polling'");
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        error!(error = %e, "producer stopped");
        std::process::exit(1);
    }
}
