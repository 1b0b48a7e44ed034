use std::collections::HashMap;

use checkout_cam_common::config::BillingConfig;

/// Unit prices by label, with a fallback for labels nobody priced.
#[derive(Debug, Clone)]
pub struct PriceBook {
    prices: HashMap<String, f64>,
    default_price: f64,
}

impl PriceBook {
    pub fn new(prices: HashMap<String, f64>, default_price: f64) -> Self {
        Self {
            prices,
            default_price,
        }
    }

    pub fn from_config(config: &BillingConfig) -> Self {
        Self::new(config.prices.clone(), config.default_price)
    }

    pub fn price_of(&self, label: &str) -> f64 {
        self.prices
            .get(label)
            .copied()
            .unwrap_or(self.default_price)
    }
}

/// Labels that are never displayed or billed.
///
/// Matching ignores case and surrounding whitespace.
#[derive(Debug, Clone, Default)]
pub struct ExclusionList {
    labels: Vec<String>,
}

impl ExclusionList {
    pub fn new<I, S>(labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut labels: Vec<String> = labels.into_iter().map(|l| normalize(l.as_ref())).collect();
        labels.sort();
        labels.dedup();
        Self { labels }
    }

    pub fn contains(&self, label: &str) -> bool {
        self.labels.binary_search(&normalize(label)).is_ok()
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

fn normalize(label: &str) -> String {
    label.trim().to_lowercase()
}
