use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub kafka: KafkaConfig,
    pub detector: DetectorConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub billing: BillingConfig,
    #[serde(default)]
    pub receipt: ReceiptConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct KafkaConfig {
    pub brokers: String,
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_group_id")]
    pub group_id: String,
    #[serde(default = "default_compression")]
    pub compression: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorConfig {
    pub url: String,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_fps")]
    pub fps: f64,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
    #[serde(default = "default_station_id")]
    pub station_id: String,
}

impl DetectorConfig {
    /// Time between two polls, `1 / fps`.
    pub fn poll_interval(&self) -> Result<Duration, ConfigError> {
        let fps = self.fps;
        match Duration::try_from_secs_f64(1.0 / fps) {
            Ok(d) if fps > 0.0 && !d.is_zero() => Ok(d),
            _ => Err(ConfigError::Invalid(format!(
                "detector.fps must give a non-zero polling interval, got {fps}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackerConfig {
    /// Dwell time required before a visible item is billed, and the cooldown
    /// between two increments of the same label.
    #[serde(default = "default_time_threshold")]
    pub time_threshold_secs: f64,
    /// Capacity of the channel between Kafka ingestion and tick processing.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl TrackerConfig {
    pub fn threshold(&self) -> Result<Duration, ConfigError> {
        let t = self.time_threshold_secs;
        match Duration::try_from_secs_f64(t) {
            Ok(d) if !d.is_zero() => Ok(d),
            _ => Err(ConfigError::Invalid(format!(
                "tracker.time_threshold_secs must be a positive duration, got {t}"
            ))),
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            time_threshold_secs: default_time_threshold(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BillingConfig {
    #[serde(default = "default_price")]
    pub default_price: f64,
    #[serde(default = "default_tax_rate")]
    pub tax_rate: f64,
    #[serde(default = "default_currency_decimals")]
    pub currency_decimals: u32,
    #[serde(default)]
    pub excluded_labels: Vec<String>,
    #[serde(default)]
    pub prices: HashMap<String, f64>,
    /// JSON object of `label -> price`, merged over `prices` at load time.
    #[serde(default)]
    pub prices_file: Option<PathBuf>,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            default_price: default_price(),
            tax_rate: default_tax_rate(),
            currency_decimals: default_currency_decimals(),
            excluded_labels: Vec::new(),
            prices: HashMap::new(),
            prices_file: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReceiptConfig {
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default = "default_receipt_format")]
    pub format: String,
}

impl Default for ReceiptConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            format: default_receipt_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        let mut config = Self::parse(&content)?;

        if let Some(prices_file) = config.billing.prices_file.clone() {
            // Relative price files are resolved next to the config file.
            let prices_path = match path.parent() {
                Some(dir) if prices_file.is_relative() => dir.join(&prices_file),
                _ => prices_file,
            };
            let from_file = load_prices_file(&prices_path)?;
            tracing::debug!(
                path = prices_path.display().to_string(),
                entries = from_file.len(),
                "merged price file"
            );
            config.billing.prices.extend(from_file);
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document without touching the filesystem or validating.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.tracker.threshold()?;
        if self.tracker.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "tracker.queue_capacity must be at least 1".into(),
            ));
        }
        let rate = self.billing.tax_rate;
        if !rate.is_finite() || rate < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "billing.tax_rate must be non-negative, got {rate}"
            )));
        }
        check_price("billing.default_price", self.billing.default_price)?;
        for (label, price) in &self.billing.prices {
            check_price(&format!("price of {label:?}"), *price)?;
        }
        self.detector.poll_interval()?;
        if !(0.0..=1.0).contains(&self.detector.min_confidence) {
            return Err(ConfigError::Invalid(format!(
                "detector.min_confidence must be within [0, 1], got {}",
                self.detector.min_confidence
            )));
        }
        Ok(())
    }
}

fn check_price(what: &str, price: f64) -> Result<(), ConfigError> {
    if price.is_finite() && price >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!(
            "{what} must be a non-negative number, got {price}"
        )))
    }
}

fn load_prices_file(path: &Path) -> Result<HashMap<String, f64>, ConfigError> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
    serde_json::from_str(&content)
        .map_err(|e| ConfigError::Parse(format!("{}: {e}", path.display())))
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

// Default value functions
fn default_topic() -> String {
    "checkout.observations".into()
}
fn default_group_id() -> String {
    "checkout-billing-group".into()
}
fn default_compression() -> String {
    "snappy".into()
}
fn default_mode() -> String {
    "stream".into()
}
fn default_fps() -> f64 {
    10.0
}
fn default_min_confidence() -> f32 {
    0.5
}
fn default_station_id() -> String {
    "till-01".into()
}
fn default_time_threshold() -> f64 {
    5.0
}
fn default_queue_capacity() -> usize {
    64
}
fn default_price() -> f64 {
    2.00
}
fn default_tax_rate() -> f64 {
    0.07
}
fn default_currency_decimals() -> u32 {
    2
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("output/receipts")
}
fn default_receipt_format() -> String {
    "text".into()
}
fn default_port() -> u16 {
    5000
}
fn default_log_level() -> String {
    "info".into()
}
