use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use super::aggregator::{BillLine, BillSnapshot};

pub const PLACEHOLDER_LABEL: &str = "No items detected";

/// A finalized bill, ready to hand to a renderer.
#[derive(Debug, Clone, Serialize)]
pub struct Receipt {
    pub issued_at: DateTime<Local>,
    pub lines: Vec<BillLine>,
    pub subtotal: f64,
    pub tax_rate: f64,
    pub tax: f64,
    pub total: f64,
    #[serde(skip)]
    pub decimals: u32,
}

impl Receipt {
    /// An empty bill becomes a single zero placeholder line.
    pub fn from_snapshot(
        snapshot: BillSnapshot,
        tax_rate: f64,
        decimals: u32,
        issued_at: DateTime<Local>,
    ) -> Self {
        let lines = if snapshot.is_empty() {
            warn!("no items with a non-zero count, emitting placeholder line");
            vec![BillLine {
                label: PLACEHOLDER_LABEL.to_string(),
                quantity: 0,
                unit_price: 0.0,
                line_total: 0.0,
            }]
        } else {
            snapshot.lines
        };
        Self {
            issued_at,
            lines,
            subtotal: snapshot.subtotal,
            tax_rate,
            tax: snapshot.tax,
            total: snapshot.total,
            decimals,
        }
    }

    fn money(&self, value: f64) -> String {
        format!("{value:.prec$}", prec = self.decimals as usize)
    }
}

/// Turns a receipt into a document.
pub trait ReceiptRenderer: Send + Sync {
    fn render(&self, receipt: &Receipt) -> Result<Vec<u8>, ReceiptError>;

    /// File extension for rendered documents, without the dot.
    fn extension(&self) -> &'static str;
}

/// Fixed-width plain-text receipt.
pub struct TextRenderer;

impl ReceiptRenderer for TextRenderer {
    fn render(&self, receipt: &Receipt) -> Result<Vec<u8>, ReceiptError> {
        let item_width = receipt
            .lines
            .iter()
            .map(|l| l.label.chars().count())
            .max()
            .unwrap_or(0)
            .max(12);
        let rule = "-".repeat(item_width + 36);

        let mut out = String::new();
        writeln!(out, "Retail Billing Receipt")?;
        writeln!(out, "Date: {}", receipt.issued_at.format("%Y-%m-%d %H:%M:%S"))?;
        writeln!(out)?;
        writeln!(
            out,
            "{:<item_width$}  {:>8}  {:>12}  {:>10}",
            "Item", "Quantity", "Unit Price", "Total"
        )?;
        writeln!(out, "{rule}")?;
        for line in &receipt.lines {
            writeln!(
                out,
                "{:<item_width$}  {:>8}  {:>12}  {:>10}",
                line.label,
                line.quantity,
                receipt.money(line.unit_price),
                receipt.money(line.line_total),
            )?;
        }
        writeln!(out, "{rule}")?;

        let tax_label = format!("Tax ({}%):", format_percent(receipt.tax_rate));
        let label_width = item_width + 24;
        for (label, value) in [
            ("Subtotal:", receipt.subtotal),
            (tax_label.as_str(), receipt.tax),
            ("Total:", receipt.total),
        ] {
            writeln!(out, "{label:>label_width$}  {:>10}", receipt.money(value))?;
        }
        writeln!(out)?;
        writeln!(out, "Thank you for shopping with us!")?;

        Ok(out.into_bytes())
    }

    fn extension(&self) -> &'static str {
        "txt"
    }
}

/// Pretty-printed JSON receipt.
pub struct JsonRenderer;

impl ReceiptRenderer for JsonRenderer {
    fn render(&self, receipt: &Receipt) -> Result<Vec<u8>, ReceiptError> {
        Ok(serde_json::to_vec_pretty(receipt)?)
    }

    fn extension(&self) -> &'static str {
        "json"
    }
}

/// Pick a renderer by its configured name.
pub fn renderer_for(format: &str) -> Result<Box<dyn ReceiptRenderer>, ReceiptError> {
    match format {
        "text" | "txt" => Ok(Box::new(TextRenderer)),
        "json" => Ok(Box::new(JsonRenderer)),
        other => Err(ReceiptError::UnknownFormat(other.to_string())),
    }
}

/// `0.07` -> `"7"`, `0.075` -> `"7.5"`.
fn format_percent(rate: f64) -> String {
    let pct = format!("{:.4}", rate * 100.0);
    pct.trim_end_matches('0').trim_end_matches('.').to_string()
}

/// Renders receipts and stores them under a directory.
pub struct ReceiptWriter {
    output_dir: PathBuf,
    renderer: Box<dyn ReceiptRenderer>,
}

impl ReceiptWriter {
    pub fn new(output_dir: impl Into<PathBuf>, renderer: Box<dyn ReceiptRenderer>) -> Self {
        Self {
            output_dir: output_dir.into(),
            renderer,
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write `receipt_{YYYYmmdd_HHMMSS}.{ext}` and return its path. A receipt
    /// issued in the same second as an existing one gets a `_N` suffix
    /// instead of replacing it.
    pub async fn write(&self, receipt: &Receipt) -> Result<PathBuf, ReceiptError> {
        let document = self.renderer.render(receipt)?;
        tokio::fs::create_dir_all(&self.output_dir).await?;

        let stem = format!("receipt_{}", receipt.issued_at.format("%Y%m%d_%H%M%S"));
        let ext = self.renderer.extension();
        let mut attempt = 0u32;
        let (path, mut file) = loop {
            let name = match attempt {
                0 => format!("{stem}.{ext}"),
                n => format!("{stem}_{n}.{ext}"),
            };
            let path = self.output_dir.join(name);
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => break (path, file),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => return Err(e.into()),
            }
        };
        file.write_all(&document).await?;
        file.flush().await?;

        info!(
            path = path.display().to_string(),
            lines = receipt.lines.len(),
            total = receipt.total,
            "receipt generated"
        );
        Ok(path)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReceiptError {
    #[error("failed to render receipt: {0}")]
    Render(String),
    #[error("unknown receipt format {0:?}, expected 'text' or 'json'")]
    UnknownFormat(String),
    #[error("failed to write receipt: {0}")]
    Io(#[from] std::io::Error),
}

impl From<std::fmt::Error> for ReceiptError {
    fn from(e: std::fmt::Error) -> Self {
        ReceiptError::Render(e.to_string())
    }
}

impl From<serde_json::Error> for ReceiptError {
    fn from(e: serde_json::Error) -> Self {
        ReceiptError::Render(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn issued() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap()
    }

    fn snapshot() -> BillSnapshot {
        BillSnapshot {
            lines: vec![
                BillLine {
                    label: "nivea".into(),
                    quantity: 2,
                    unit_price: 50.0,
                    line_total: 100.0,
                },
                BillLine {
                    label: "Moong Dal".into(),
                    quantity: 1,
                    unit_price: 40.0,
                    line_total: 40.0,
                },
            ],
            subtotal: 140.0,
            tax: 9.8,
            total: 149.8,
        }
    }

    fn empty() -> BillSnapshot {
        BillSnapshot {
            lines: vec![],
            subtotal: 0.0,
            tax: 0.0,
            total: 0.0,
        }
    }

    #[test]
    fn empty_bill_gets_placeholder_line() {
        let receipt = Receipt::from_snapshot(empty(), 0.07, 2, issued());
        assert_eq!(receipt.lines.len(), 1);
        assert_eq!(receipt.lines[0].label, PLACEHOLDER_LABEL);
        assert_eq!(receipt.lines[0].quantity, 0);
        assert_eq!(receipt.total, 0.0);
    }

    #[test]
    fn text_receipt_lists_lines_and_totals() {
        let receipt = Receipt::from_snapshot(snapshot(), 0.07, 2, issued());
        let text = String::from_utf8(TextRenderer.render(&receipt).unwrap()).unwrap();
        assert!(text.starts_with("Retail Billing Receipt\n"));
        assert!(text.contains("Date: 2025-03-14 09:26:53"));
        assert!(text.contains("nivea"));
        assert!(text.contains("100.00"));
        assert!(text.contains("Subtotal:      140.00"));
        assert!(text.contains("Tax (7%):        9.80"));
        assert!(text.contains("Total:      149.80"));
        assert!(text.trim_end().ends_with("Thank you for shopping with us!"));
    }

    #[test]
    fn text_receipt_for_empty_bill_shows_placeholder() {
        let receipt = Receipt::from_snapshot(empty(), 0.07, 2, issued());
        let text = String::from_utf8(TextRenderer.render(&receipt).unwrap()).unwrap();
        assert!(text.contains(PLACEHOLDER_LABEL));
        assert!(text.contains("0.00"));
    }

    #[test]
    fn json_receipt_carries_totals() {
        let receipt = Receipt::from_snapshot(snapshot(), 0.07, 2, issued());
        let bytes = JsonRenderer.render(&receipt).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["lines"][1]["name"], "Moong Dal");
        assert_eq!(value["subtotal"], 140.0);
        assert_eq!(value["tax_rate"], 0.07);
        assert_eq!(value["total"], 149.8);
    }

    #[test]
    fn percent_formatting() {
        assert_eq!(format_percent(0.07), "7");
        assert_eq!(format_percent(0.075), "7.5");
        assert_eq!(format_percent(0.0), "0");
    }

    #[test]
    fn unknown_format_is_rejected() {
        assert!(renderer_for("pdf").is_err());
        assert_eq!(renderer_for("json").unwrap().extension(), "json");
        assert_eq!(renderer_for("text").unwrap().extension(), "txt");
    }

    #[tokio::test]
    async fn writer_creates_directory_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("receipts");
        let writer = ReceiptWriter::new(&out, Box::new(TextRenderer));
        let receipt = Receipt::from_snapshot(snapshot(), 0.07, 2, issued());

        let path = writer.write(&receipt).await.unwrap();
        assert_eq!(path, out.join("receipt_20250314_092653.txt"));
        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("Moong Dal"));
    }

    #[tokio::test]
    async fn same_second_receipts_do_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ReceiptWriter::new(dir.path(), Box::new(TextRenderer));
        let full = Receipt::from_snapshot(snapshot(), 0.07, 2, issued());
        let blank = Receipt::from_snapshot(empty(), 0.07, 2, issued());

        let first = writer.write(&full).await.unwrap();
        let second = writer.write(&blank).await.unwrap();
        let third = writer.write(&blank).await.unwrap();

        assert_eq!(first, dir.path().join("receipt_20250314_092653.txt"));
        assert_eq!(second, dir.path().join("receipt_20250314_092653_1.txt"));
        assert_eq!(third, dir.path().join("receipt_20250314_092653_2.txt"));
        assert!(std::fs::read_to_string(&first).unwrap().contains("Moong Dal"));
        assert!(std::fs::read_to_string(&second)
            .unwrap()
            .contains(PLACEHOLDER_LABEL));
    }
}
