use std::path::PathBuf;
use std::time::Duration;

use checkout_cam_common::config::{Config, ConfigError};
use checkout_cam_common::observation::Observation;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::bill::receipt::renderer_for;
use crate::bill::{
    visible_items, BillAggregator, BillSnapshot, ExclusionList, PriceBook, Receipt, ReceiptError,
    ReceiptWriter,
};
use crate::tracker::{ItemState, PresenceTracker, TrackerError};

/// The tracker plus everything needed to bill what it counted.
///
/// `apply` and `reset` take the write lock for their whole duration, so
/// readers always see the state between two complete ticks.
pub struct BillingSession {
    tracker: RwLock<PresenceTracker>,
    aggregator: BillAggregator,
    excluded: ExclusionList,
    receipts: ReceiptWriter,
}

impl BillingSession {
    pub fn new(
        tracker: PresenceTracker,
        aggregator: BillAggregator,
        excluded: ExclusionList,
        receipts: ReceiptWriter,
    ) -> Self {
        Self {
            tracker: RwLock::new(tracker),
            aggregator,
            excluded,
            receipts,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self, SessionError> {
        let tracker = PresenceTracker::new(config.tracker.threshold()?);
        let aggregator = BillAggregator::new(
            PriceBook::from_config(&config.billing),
            config.billing.tax_rate,
            config.billing.currency_decimals,
        );
        let excluded = ExclusionList::new(&config.billing.excluded_labels);
        let receipts = ReceiptWriter::new(
            &config.receipt.output_dir,
            renderer_for(&config.receipt.format)?,
        );
        info!(
            threshold_secs = tracker.threshold().as_secs_f64(),
            receipts = receipts.output_dir().display().to_string(),
            "billing session ready"
        );
        if !excluded.is_empty() {
            info!(
                count = excluded.len(),
                "excluded labels will be neither displayed nor billed"
            );
        }
        Ok(Self::new(tracker, aggregator, excluded, receipts))
    }

    /// Apply one observation tick at `now`.
    pub async fn apply(&self, observation: &Observation, now: Duration) -> Result<(), TrackerError> {
        let mut tracker = self.tracker.write().await;
        let states = tracker.update(&observation.labels, now)?;
        debug!(
            seq = observation.seq,
            visible = observation.labels.len(),
            in_view = states.iter().filter(|s| s.in_run()).count(),
            tracked = states.len(),
            "tick applied"
        );
        Ok(())
    }

    pub async fn reset(&self) {
        self.tracker.write().await.reset();
    }

    pub async fn current_bill(&self) -> BillSnapshot {
        let tracker = self.tracker.read().await;
        self.aggregator.snapshot(tracker.snapshot(), &self.excluded)
    }

    /// Tracked items, minus excluded labels, in first-observed order.
    pub async fn visible_items(&self) -> Vec<ItemState> {
        let tracker = self.tracker.read().await;
        visible_items(tracker.snapshot(), &self.excluded)
            .into_iter()
            .cloned()
            .collect()
    }

    /// A single tracked item, unless its label is excluded.
    pub async fn item(&self, label: &str) -> Option<ItemState> {
        if self.excluded.contains(label) {
            return None;
        }
        self.tracker.read().await.get(label).cloned()
    }

    pub fn price_of(&self, label: &str) -> f64 {
        self.aggregator.price_of(label)
    }

    /// Render the current bill and write it out. Returns the document path.
    pub async fn generate_receipt(&self) -> Result<PathBuf, ReceiptError> {
        let snapshot = self.current_bill().await;
        let receipt = Receipt::from_snapshot(
            snapshot,
            self.aggregator.tax_rate(),
            self.aggregator.decimals(),
            chrono::Local::now(),
        );
        self.receipts.write(&receipt).await
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Receipt(#[from] ReceiptError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bill::receipt::TextRenderer;
    use std::collections::{BTreeSet, HashMap};
    use std::sync::Arc;

    fn session(output_dir: &std::path::Path, excluded: &[&str]) -> BillingSession {
        let prices = HashMap::from([("nivea".to_string(), 50.0)]);
        BillingSession::new(
            PresenceTracker::new(Duration::from_secs(5)),
            BillAggregator::new(PriceBook::new(prices, 2.0), 0.07, 2),
            ExclusionList::new(excluded),
            ReceiptWriter::new(output_dir, Box::new(TextRenderer)),
        )
    }

    fn obs(labels: &[&str], seq: u64) -> Observation {
        let labels: BTreeSet<String> = labels.iter().map(|s| s.to_string()).collect();
        Observation::new(labels, 0, seq)
    }

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    #[tokio::test]
    async fn ticks_flow_into_the_bill() {
        let dir = tempfile::tempdir().unwrap();
        let s = session(dir.path(), &[]);
        for (i, t) in [0.0, 2.0, 5.0].into_iter().enumerate() {
            s.apply(&obs(&["nivea", "gum"], i as u64), secs(t)).await.unwrap();
        }
        let bill = s.current_bill().await;
        assert_eq!(bill.lines.len(), 2);
        assert_eq!(bill.subtotal, 52.0);
        assert_eq!(bill.tax, 3.64);
        assert_eq!(bill.total, 55.64);
        assert_eq!(s.price_of("gum"), 2.0);
    }

    #[tokio::test]
    async fn exclusion_hides_without_touching_tracker_state() {
        let dir = tempfile::tempdir().unwrap();
        let s = session(dir.path(), &["kissan mixed fruit jam"]);
        let both = ["Kissan mixed fruit jam", "nivea"];
        s.apply(&obs(&both, 0), secs(0.0)).await.unwrap();
        s.apply(&obs(&both, 1), secs(5.0)).await.unwrap();

        let bill = s.current_bill().await;
        assert_eq!(bill.lines.len(), 1);
        assert_eq!(bill.lines[0].label, "nivea");

        let shown = s.visible_items().await;
        assert!(shown.iter().all(|i| i.label != "Kissan mixed fruit jam"));

        assert!(s.item("Kissan mixed fruit jam").await.is_none());
        assert_eq!(s.item("nivea").await.unwrap().count, 1);
        let tracker = s.tracker.read().await;
        assert_eq!(tracker.get("Kissan mixed fruit jam").unwrap().count, 1);
    }

    #[tokio::test]
    async fn rejected_tick_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let s = session(dir.path(), &[]);
        s.apply(&obs(&["nivea"], 0), secs(3.0)).await.unwrap();
        let err = s.apply(&obs(&["nivea"], 1), secs(1.0)).await.unwrap_err();
        assert!(matches!(err, TrackerError::InvalidTimestamp { .. }));
    }

    #[tokio::test]
    async fn reset_clears_the_bill() {
        let dir = tempfile::tempdir().unwrap();
        let s = session(dir.path(), &[]);
        s.apply(&obs(&["nivea"], 0), secs(0.0)).await.unwrap();
        s.apply(&obs(&["nivea"], 1), secs(5.0)).await.unwrap();
        assert!(!s.current_bill().await.is_empty());

        s.reset().await;
        assert!(s.current_bill().await.is_empty());
        assert!(s.visible_items().await.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn readers_never_see_a_partial_tick() {
        let dir = tempfile::tempdir().unwrap();
        let s = Arc::new(session(dir.path(), &[]));
        let labels: Vec<String> = (0..20).map(|i| format!("item-{i}")).collect();
        let refs: Vec<&str> = labels.iter().map(String::as_str).collect();

        let writer = {
            let s = Arc::clone(&s);
            let all = obs(&refs, 0);
            tokio::spawn(async move {
                for tick in 0..=50u64 {
                    s.apply(&all, Duration::from_secs(tick)).await.unwrap();
                }
            })
        };

        // Every label shares the same history, so a consistent view always
        // shows identical counts across the whole bill.
        for _ in 0..200 {
            let bill = s.current_bill().await;
            if let Some(first) = bill.lines.first() {
                assert_eq!(bill.lines.len(), 20);
                assert!(bill.lines.iter().all(|l| l.quantity == first.quantity));
            }
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();
        assert!(s.current_bill().await.lines.iter().all(|l| l.quantity == 10));
    }

    #[test]
    fn unrepresentable_threshold_fails_session_setup() {
        let config = Config::parse(
            r#"
            [kafka]
            brokers = "localhost:9092"

            [detector]
            url = "http://localhost:8000/detections"

            [tracker]
            time_threshold_secs = 1e30
            "#,
        )
        .unwrap();
        assert!(matches!(
            BillingSession::from_config(&config),
            Err(SessionError::Config(ConfigError::Invalid(_)))
        ));
    }

    #[tokio::test]
    async fn receipt_for_empty_bill_has_placeholder() {
        let dir = tempfile::tempdir().unwrap();
        let s = session(dir.path(), &[]);
        let path = s.generate_receipt().await.unwrap();
        assert!(path.starts_with(dir.path()));
        let text = std::fs::read_to_string(path).unwrap();
        assert!(text.contains("No items detected"));
    }
}
