use serde::Serialize;

use crate::tracker::ItemState;

use super::prices::{ExclusionList, PriceBook};

/// One priced row of the bill. Derived on demand, never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BillLine {
    #[serde(rename = "name")]
    pub label: String,
    pub quantity: u32,
    pub unit_price: f64,
    #[serde(rename = "total")]
    pub line_total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BillSnapshot {
    #[serde(rename = "items")]
    pub lines: Vec<BillLine>,
    pub subtotal: f64,
    pub tax: f64,
    pub total: f64,
}

impl BillSnapshot {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Prices tracked quantities and computes the bill totals.
#[derive(Debug, Clone)]
pub struct BillAggregator {
    prices: PriceBook,
    tax_rate: f64,
    decimals: u32,
}

impl BillAggregator {
    pub fn new(prices: PriceBook, tax_rate: f64, decimals: u32) -> Self {
        Self {
            prices,
            tax_rate,
            decimals,
        }
    }

    pub fn tax_rate(&self) -> f64 {
        self.tax_rate
    }

    pub fn decimals(&self) -> u32 {
        self.decimals
    }

    pub fn price_of(&self, label: &str) -> f64 {
        self.prices.price_of(label)
    }

    /// Build the bill from tracker states, in the order given.
    ///
    /// Labels with a zero count or on the exclusion list are left out.
    pub fn snapshot(&self, states: &[ItemState], excluded: &ExclusionList) -> BillSnapshot {
        let lines: Vec<BillLine> = states
            .iter()
            .filter(|s| s.count > 0 && !excluded.contains(&s.label))
            .map(|s| {
                let unit_price = self.price_of(&s.label);
                BillLine {
                    label: s.label.clone(),
                    quantity: s.count,
                    unit_price,
                    line_total: self.round(unit_price * f64::from(s.count)),
                }
            })
            .collect();

        let subtotal = self.round(lines.iter().map(|l| l.line_total).sum());
        let tax = self.round(subtotal * self.tax_rate);
        let total = self.round(subtotal + tax);

        BillSnapshot {
            lines,
            subtotal,
            tax,
            total,
        }
    }

    /// Round half away from zero to the configured currency precision.
    pub fn round(&self, value: f64) -> f64 {
        round_half_away(value, self.decimals)
    }
}

/// Rounds the decimal number `value` prints as, in integer minor units, so
/// `1.015` rounds to `1.02` even though the nearest `f64` is just below it.
fn round_half_away(value: f64, decimals: u32) -> f64 {
    let binary = || {
        let scale = 10f64.powi(decimals as i32);
        (value * scale).round() / scale
    };
    if !value.is_finite() {
        return value;
    }
    let Some(scale) = 10i128.checked_pow(decimals) else {
        return binary();
    };

    // `Display` gives the shortest digits that parse back to `value`, never
    // in exponent form.
    let text = value.abs().to_string();
    let (whole, frac) = text.split_once('.').unwrap_or((text.as_str(), ""));
    let Some(mut minor) = whole.parse::<i128>().ok().and_then(|w| w.checked_mul(scale)) else {
        return binary();
    };

    let mut digits = frac.bytes().map(|b| i128::from(b - b'0'));
    let mut place = scale;
    for _ in 0..decimals {
        place /= 10;
        minor += digits.next().unwrap_or(0) * place;
    }
    if digits.next().is_some_and(|d| d >= 5) {
        minor += 1;
    }

    let rounded = minor as f64 / scale as f64;
    if value.is_sign_negative() {
        -rounded
    } else {
        rounded
    }
}

/// Tracker states with excluded labels removed, for display.
pub fn visible_items<'a>(states: &'a [ItemState], excluded: &ExclusionList) -> Vec<&'a ItemState> {
    states
        .iter()
        .filter(|s| !excluded.contains(&s.label))
        .collect()
}
