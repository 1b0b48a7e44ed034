use serde::Serialize;
use std::time::Duration;

/// Per-label presence record.
///
/// `last_seen_at` is `Some` only while a visibility run is active, and
/// `continuous` is zero whenever it is `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemState {
    pub label: String,
    /// Billed quantity. Only grows, except on tracker reset.
    pub count: u32,
    #[serde(serialize_with = "opt_secs")]
    pub last_seen_at: Option<Duration>,
    /// Visible time accumulated in the current run since the last increment.
    #[serde(serialize_with = "secs")]
    pub continuous: Duration,
    #[serde(serialize_with = "opt_secs")]
    pub last_counted_at: Option<Duration>,
}

impl ItemState {
    pub(crate) fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            count: 0,
            last_seen_at: None,
            continuous: Duration::ZERO,
            last_counted_at: None,
        }
    }

    pub fn in_run(&self) -> bool {
        self.last_seen_at.is_some()
    }

    /// True when no increment happened yet, or the last one is at least
    /// `threshold` in the past.
    pub(crate) fn cooldown_elapsed(&self, now: Duration, threshold: Duration) -> bool {
        match self.last_counted_at {
            None => true,
            Some(at) => now.saturating_sub(at) >= threshold,
        }
    }
}

/// Which rule produced an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountPath {
    /// Held in view for a full threshold.
    Sustained,
    /// Shown, then removed before reaching the threshold.
    Brief,
}

impl CountPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            CountPath::Sustained => "sustained",
            CountPath::Brief => "brief",
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TrackerError {
    #[error("tick at {now:?} is earlier than the latest applied tick at {latest:?}")]
    InvalidTimestamp { now: Duration, latest: Duration },
}

fn secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

fn opt_secs<S: serde::Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
    match d {
        Some(d) => s.serialize_some(&d.as_secs_f64()),
        None => s.serialize_none(),
    }
}
