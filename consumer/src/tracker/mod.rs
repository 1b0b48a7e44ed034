pub mod state;

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use tracing::{debug, info};

pub use state::{CountPath, ItemState, TrackerError};

/// Turns per-tick label sets into billed quantities.
///
/// Each label is billed once when it stays in view for `threshold`, or once
/// when it leaves view after a partial run. After an increment the same label
/// cannot be billed again until `threshold` has passed (cooldown).
pub struct PresenceTracker {
    /// Item states in first-observed order.
    items: Vec<ItemState>,
    index: HashMap<String, usize>,
    threshold: Duration,
    /// Timestamp of the latest applied tick; ticks may never go back past it.
    latest_tick: Option<Duration>,
}

impl PresenceTracker {
    pub fn new(threshold: Duration) -> Self {
        Self {
            items: Vec::new(),
            index: HashMap::new(),
            threshold,
            latest_tick: None,
        }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    /// Apply one observation tick.
    ///
    /// Every tracked label and every label in `observed` is visited once.
    /// A tick older than the previous one is rejected before any state
    /// changes.
    pub fn update(
        &mut self,
        observed: &BTreeSet<String>,
        now: Duration,
    ) -> Result<&[ItemState], TrackerError> {
        if let Some(latest) = self.latest_tick {
            if now < latest {
                return Err(TrackerError::InvalidTimestamp { now, latest });
            }
        }
        self.latest_tick = Some(now);

        for label in observed {
            if !self.index.contains_key(label) {
                debug!(label, "tracking new label");
                self.index.insert(label.clone(), self.items.len());
                self.items.push(ItemState::new(label));
            }
        }

        let threshold = self.threshold;
        for item in &mut self.items {
            let visible = observed.contains(&item.label);
            let counted = if visible {
                step_visible(item, now, threshold)
            } else {
                step_absent(item, now, threshold)
            };
            if let Some(path) = counted {
                info!(
                    label = item.label,
                    count = item.count,
                    path = path.as_str(),
                    at_secs = now.as_secs_f64(),
                    "adding item to bill"
                );
            }
        }

        Ok(&self.items)
    }

    /// Forget every label, including billed quantities.
    pub fn reset(&mut self) {
        info!(labels = self.items.len(), "resetting tracker");
        self.items.clear();
        self.index.clear();
        self.latest_tick = None;
    }

    /// Current states in first-observed order.
    pub fn snapshot(&self) -> &[ItemState] {
        &self.items
    }

    pub fn get(&self, label: &str) -> Option<&ItemState> {
        self.index.get(label).map(|&i| &self.items[i])
    }
}

fn step_visible(item: &mut ItemState, now: Duration, threshold: Duration) -> Option<CountPath> {
    let Some(last_seen) = item.last_seen_at else {
        // Run starts; nothing can be billed on its first tick.
        item.last_seen_at = Some(now);
        item.continuous = Duration::ZERO;
        return None;
    };

    item.continuous += now.saturating_sub(last_seen);
    item.last_seen_at = Some(now);

    if item.continuous >= threshold && item.cooldown_elapsed(now, threshold) {
        item.count += 1;
        item.continuous = Duration::ZERO;
        item.last_counted_at = Some(now);
        return Some(CountPath::Sustained);
    }
    None
}

fn step_absent(item: &mut ItemState, now: Duration, threshold: Duration) -> Option<CountPath> {
    let last_seen = item.last_seen_at?;

    let total_visible = item.continuous + now.saturating_sub(last_seen);
    let brief = total_visible > Duration::ZERO
        && total_visible < threshold
        && item.continuous > Duration::ZERO
        && item.cooldown_elapsed(now, threshold);

    let counted = if brief {
        item.count += 1;
        item.last_counted_at = Some(now);
        Some(CountPath::Brief)
    } else {
        None
    };

    item.last_seen_at = None;
    item.continuous = Duration::ZERO;
    counted
}
