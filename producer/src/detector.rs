use bytes::BytesMut;
use checkout_cam_common::config::DetectorConfig;
use checkout_cam_common::observation::{DetectionFrame, Observation};
use futures_util::StreamExt;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::ProducerError;

static SEQ_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Upper bound on one buffered detector line; anything longer is garbage.
const MAX_LINE_BYTES: usize = 1024 * 1024;

pub fn create_producer(
    brokers: &str,
    compression: &str,
) -> Result<FutureProducer, ProducerError> {
    let producer: FutureProducer = ClientConfig::new()
        .set("bootstrap.servers", brokers)
        .set("compression.type", compression)
        .set("linger.ms", "5")
        .set("batch.num.messages", "10")
        .set("queue.buffering.max.messages", "1000")
        .set("request.timeout.ms", "5000")
        .create()
        .map_err(|e| ProducerError::KafkaCreate(e.to_string()))?;
    Ok(producer)
}

/// Publishes detector frames as observation ticks.
pub struct ObservationPublisher<'a> {
    producer: &'a FutureProducer,
    topic: &'a str,
    station_id: &'a str,
    min_confidence: f32,
    clock: &'a dyn Clock,
}

impl<'a> ObservationPublisher<'a> {
    pub fn new(
        producer: &'a FutureProducer,
        topic: &'a str,
        detector: &'a DetectorConfig,
        clock: &'a dyn Clock,
    ) -> Self {
        Self {
            producer,
            topic,
            station_id: &detector.station_id,
            min_confidence: detector.min_confidence,
            clock,
        }
    }

    /// Publish one frame. Frames with no detections are published too:
    /// absence is what ends a visibility run.
    async fn publish(&self, frame: &DetectionFrame) {
        let seq = SEQ_COUNTER.fetch_add(1, Ordering::Relaxed);
        let observation = observe(frame, self.min_confidence, self.clock, seq);
        let payload = observation.serialize();
        let key = format!("{}:{}", self.station_id, observation.captured_at_ms);

        debug!(
            seq,
            labels = observation.labels.len(),
            bytes = payload.len(),
            "producing observation to Kafka"
        );

        let record = FutureRecord::to(self.topic).key(&key).payload(&payload);
        if let Err((e, _)) = self.producer.send(record, Duration::from_secs(5)).await {
            warn!(error = %e, seq, "failed to produce observation to Kafka");
        }
    }
}

/// Stamp a frame with the capture clock. The consumer times dwell from these
/// stamps, so they must come from a clock that never runs backwards.
fn observe(frame: &DetectionFrame, min_confidence: f32, clock: &dyn Clock, seq: u64) -> Observation {
    Observation::from_detections(frame, min_confidence, clock.timestamp_ms(), seq)
}

/// Follow the detector's newline-delimited JSON stream and publish every
/// frame. Reconnects with exponential backoff on failure.
pub async fn run_stream_producer(
    stream_url: &str,
    publisher: &ObservationPublisher<'_>,
) -> Result<(), ProducerError> {
    let mut backoff = Duration::from_secs(2);
    let max_backoff = Duration::from_secs(30);

    loop {
        info!(url = stream_url, station = publisher.station_id, "connecting to detector stream");
        match consume_stream(stream_url, publisher).await {
            Ok(()) => {
                info!(station = publisher.station_id, "stream ended cleanly, reconnecting");
                backoff = Duration::from_secs(2);
            }
            Err(e) => {
                error!(error = %e, "stream error, reconnecting in {:?}", backoff);
            }
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(max_backoff);
    }
}

async fn consume_stream(url: &str, publisher: &ObservationPublisher<'_>) -> Result<(), ProducerError> {
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(ProducerError::HttpConnect)?;
    let response = client
        .get(url)
        .send()
        .await
        .map_err(ProducerError::HttpConnect)?;

    if !response.status().is_success() {
        return Err(ProducerError::HttpStatus(response.status().as_u16()));
    }

    info!(status = %response.status(), "connected to detector stream");

    let mut byte_stream = response.bytes_stream();
    let mut buffer = BytesMut::with_capacity(64 * 1024);

    while let Some(chunk) = byte_stream.next().await {
        let chunk = chunk.map_err(ProducerError::HttpStream)?;
        buffer.extend_from_slice(&chunk);

        for line in drain_lines(&mut buffer) {
            match parse_frame(&line) {
                Some(Ok(frame)) => publisher.publish(&frame).await,
                Some(Err(e)) => warn!(error = %e, "malformed detector line, skipping"),
                None => {}
            }
        }

        if buffer.len() > MAX_LINE_BYTES {
            warn!(bytes = buffer.len(), "detector line too long, discarding buffer");
            buffer.clear();
        }
    }

    Ok(())
}

/// Periodically fetch a single detector frame.
pub async fn run_polling_producer(
    frame_url: &str,
    publisher: &ObservationPublisher<'_>,
    interval: Duration,
) -> Result<(), ProducerError> {
    let client = reqwest::Client::new();
    let mut ticker = tokio::time::interval(interval);

    loop {
        ticker.tick().await;

        match client.get(frame_url).send().await {
            Ok(resp) if resp.status().is_success() => match resp.json::<DetectionFrame>().await {
                Ok(frame) => publisher.publish(&frame).await,
                Err(e) => warn!(error = %e, "malformed detector response, skipping"),
            },
            Ok(resp) => {
                warn!(status = %resp.status(), "non-success response from detector");
            }
            Err(e) => {
                warn!(error = %e, "failed to fetch detector frame");
            }
        }
    }
}

/// Split complete `\n`-terminated lines off the front of `buffer`, leaving
/// any trailing partial line in place.
fn drain_lines(buffer: &mut BytesMut) -> Vec<Vec<u8>> {
    let mut lines = Vec::new();
    while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
        let line = buffer.split_to(pos + 1);
        lines.push(line[..pos].to_vec());
    }
    lines
}

/// `None` for blank lines (keep-alives).
fn parse_frame(line: &[u8]) -> Option<Result<DetectionFrame, serde_json::Error>> {
    let trimmed = line.trim_ascii();
    if trimmed.is_empty() {
        return None;
    }
    Some(serde_json::from_slice(trimmed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkout_cam_common::observation::Detection;
    use std::sync::Mutex;

    struct FixedClock(Mutex<Duration>);

    impl Clock for FixedClock {
        fn now(&self) -> Duration {
            *self.0.lock().unwrap()
        }

        fn origin_ms(&self) -> i64 {
            1_708_300_000_000
        }
    }

    #[test]
    fn frames_are_stamped_from_the_clock() {
        let clock = FixedClock(Mutex::new(Duration::from_millis(2500)));
        let frame = DetectionFrame {
            detections: vec![
                Detection { label: "nivea".into(), confidence: 0.9 },
                Detection { label: "blur".into(), confidence: 0.1 },
            ],
        };

        let obs = observe(&frame, 0.5, &clock, 7);
        assert_eq!(obs.captured_at_ms, 1_708_300_002_500);
        assert_eq!(obs.seq, 7);
        assert_eq!(obs.labels.len(), 1);

        *clock.0.lock().unwrap() = Duration::from_millis(2600);
        let next = observe(&DetectionFrame::default(), 0.5, &clock, 8);
        assert_eq!(next.captured_at_ms - obs.captured_at_ms, 100);
        assert!(next.is_empty());
    }

    #[test]
    fn drain_lines_keeps_partial_tail() {
        let mut buffer = BytesMut::from(&b"{\"detections\":[]}\n{\"detec"[..]);
        let lines = drain_lines(&mut buffer);
        assert_eq!(lines, vec![b"{\"detections\":[]}".to_vec()]);
        assert_eq!(&buffer[..], b"{\"detec");

        buffer.extend_from_slice(b"tions\":[]}\r\n\n");
        let lines = drain_lines(&mut buffer);
        assert_eq!(lines.len(), 2);
        assert!(buffer.is_empty());
    }

    #[test]
    fn parse_frame_handles_crlf_and_blank_lines() {
        let frame = parse_frame(b"{\"detections\":[{\"label\":\"nivea\",\"confidence\":0.9}]}\r")
            .unwrap()
            .unwrap();
        assert_eq!(frame.detections[0].label, "nivea");
        assert!(parse_frame(b"   ").is_none());
        assert!(parse_frame(b"").is_none());
        assert!(parse_frame(b"not json").unwrap().is_err());
    }
}
