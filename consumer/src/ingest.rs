use std::sync::Arc;
use std::time::Duration;

use checkout_cam_common::config::KafkaConfig;
use checkout_cam_common::observation::Observation;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, KafkaResult};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::ClientConfig;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::session::BillingSession;

pub fn create_consumer(config: &KafkaConfig) -> Result<StreamConsumer, KafkaError> {
    let consumer: StreamConsumer = ClientConfig::new()
        .set("bootstrap.servers", &config.brokers)
        .set("group.id", &config.group_id)
        .set("auto.offset.reset", "latest")
        .set("enable.auto.commit", "true")
        .set("auto.commit.interval.ms", "1000")
        .create()?;
    consumer.subscribe(&[&config.topic])?;
    info!(topic = config.topic, "subscribed to Kafka topic");
    Ok(consumer)
}

/// Extract the station id from a Kafka message key of the form
/// `{station_id}:{timestamp_ms}`. Falls back to "unknown".
fn station_from_key(key: Option<&[u8]>) -> &str {
    key.and_then(|k| std::str::from_utf8(k).ok())
        .and_then(|s| s.split(':').next())
        .filter(|s| !s.is_empty())
        .unwrap_or("unknown")
}

/// Decode observations for `station` from Kafka and forward them to the tick
/// loop. Returns when the tick loop is gone or the stream ends.
pub async fn run_kafka_ingest(
    consumer: StreamConsumer,
    station: String,
    ticks: mpsc::Sender<Observation>,
) {
    use futures_util::StreamExt;
    let mut stream = consumer.stream();
    info!(station, "ingesting observations");

    while let Some(result) = stream.next().await {
        let Some(observation) = decode(result, &station) else {
            continue;
        };
        if ticks.send(observation).await.is_err() {
            info!("tick loop closed, stopping Kafka ingestion");
            return;
        }
    }
}

fn decode(result: KafkaResult<BorrowedMessage<'_>>, station: &str) -> Option<Observation> {
    match result {
        Ok(msg) => accept(msg.key(), msg.payload(), station),
        Err(e) => {
            warn!(error = %e, "Kafka consume error");
            None
        }
    }
}

/// One tracker bills one till, so messages keyed for any other station are
/// dropped before decoding.
fn accept(key: Option<&[u8]>, payload: Option<&[u8]>, station: &str) -> Option<Observation> {
    let from = station_from_key(key);
    if from != station {
        debug!(from, station, "observation from another station, skipping");
        return None;
    }

    let Some(payload) = payload else {
        debug!("empty Kafka message, skipping");
        return None;
    };

    match Observation::deserialize(payload) {
        Ok(o) => Some(o),
        Err(e) => {
            warn!(error = %e, station = from, "failed to decode observation, skipping");
            None
        }
    }
}

/// Capture time of an observation as a tracker timestamp.
fn capture_time(observation: &Observation) -> Option<Duration> {
    u64::try_from(observation.captured_at_ms)
        .ok()
        .map(Duration::from_millis)
}

/// Apply observations to the session in arrival order.
///
/// Each tick is timed by when its frame was captured, not when it arrived, so
/// a backlog delivered in one burst still bills the dwell it recorded.
pub async fn run_tick_loop(mut ticks: mpsc::Receiver<Observation>, session: Arc<BillingSession>) {
    let mut total: u64 = 0;

    while let Some(observation) = ticks.recv().await {
        let Some(now) = capture_time(&observation) else {
            warn!(
                seq = observation.seq,
                captured_at_ms = observation.captured_at_ms,
                "observation predates the Unix epoch, skipping"
            );
            continue;
        };
        if let Err(e) = session.apply(&observation, now).await {
            warn!(error = %e, seq = observation.seq, "rejected observation tick");
            continue;
        }

        total += 1;
        if total % 100 == 0 {
            debug!(total, "ticks processed");
        }
    }
    info!(total, "observation channel closed, tick loop exiting");
}
