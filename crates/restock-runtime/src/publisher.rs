//! Report destinations.
//!
//! Every sink overwrites its destination with the complete grid. Failures
//! surface as [`RestockError::Publish`] and are not retried within a run.

use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use restock_core::{RestockError, Result};
use serde_json::json;

use crate::credentials::SheetCredentials;
use crate::report::to_csv;

/// Public endpoint of the spreadsheet API.
pub const DEFAULT_SHEETS_BASE_URL: &str = "https://sheets.googleapis.com";

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// A destination for the rendered report.
#[async_trait]
pub trait ReportSink: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Replace the destination's contents with `grid`.
    async fn publish(&self, grid: &[Vec<String>]) -> Result<()>;
}

// ── SheetsPublisher ───────────────────────────────────────────────────────────

/// Overwrites one sheet of a spreadsheet through the values API.
pub struct SheetsPublisher {
    client: reqwest::Client,
    base_url: String,
    credentials: SheetCredentials,
    sheet_name: String,
}

impl SheetsPublisher {
    pub fn new(base_url: &str, credentials: SheetCredentials, sheet_name: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| RestockError::Publish(format!("building HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            sheet_name: sheet_name.into(),
        })
    }

    /// A1 range covering the whole sheet.
    pub fn range(&self) -> String {
        format!("'{}'", self.sheet_name.replace('\'', "''"))
    }

    /// `values/{range}{suffix}` under the spreadsheet, with path segments encoded.
    pub fn values_url(&self, suffix: &str) -> Result<reqwest::Url> {
        let mut url = reqwest::Url::parse(&self.base_url)
            .map_err(|e| RestockError::Publish(format!("invalid base URL {}: {}", self.base_url, e)))?;
        let target = format!("{}{}", self.range(), suffix);
        url.path_segments_mut()
            .map_err(|_| RestockError::Publish(format!("invalid base URL {}", self.base_url)))?
            .pop_if_empty()
            .extend([
                "v4",
                "spreadsheets",
                self.credentials.spreadsheet_id.as_str(),
                "values",
                target.as_str(),
            ]);
        Ok(url)
    }

    async fn check(resp: reqwest::Response, step: &str) -> Result<()> {
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(RestockError::Publish(format!(
            "{} failed with {}: {}",
            step,
            status.as_u16(),
            body
        )))
    }
}

#[async_trait]
impl ReportSink for SheetsPublisher {
    fn name(&self) -> &str {
        "sheet"
    }

    async fn publish(&self, grid: &[Vec<String>]) -> Result<()> {
        let token = self
            .credentials
            .auth
            .access_token(&self.client, Utc::now())
            .await
            .map_err(|e| RestockError::Publish(format!("authorisation failed: {}", e)))?;

        let clear = self
            .client
            .post(self.values_url(":clear")?)
            .bearer_auth(&token)
            .json(&json!({}))
            .send()
            .await
            .map_err(|e| RestockError::Publish(format!("clearing sheet: {}", e)))?;
        Self::check(clear, "clearing sheet").await?;

        let update = self
            .client
            .put(self.values_url("")?)
            .query(&[("valueInputOption", "RAW")])
            .bearer_auth(&token)
            .json(&json!({
                "range": self.range(),
                "majorDimension": "ROWS",
                "values": grid,
            }))
            .send()
            .await
            .map_err(|e| RestockError::Publish(format!("writing sheet: {}", e)))?;
        Self::check(update, "writing sheet").await?;

        tracing::info!(
            sheet = %self.sheet_name,
            rows = grid.len(),
            "spreadsheet updated"
        );
        Ok(())
    }
}

// ── CsvPublisher ──────────────────────────────────────────────────────────────

/// Writes the grid to a local CSV file, replacing it atomically.
pub struct CsvPublisher {
    path: PathBuf,
}

impl CsvPublisher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn write(&self, csv: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let tmp = self.path.with_extension("csv.tmp");
        std::fs::write(&tmp, csv)?;
        std::fs::rename(&tmp, &self.path)
    }
}

#[async_trait]
impl ReportSink for CsvPublisher {
    fn name(&self) -> &str {
        "csv"
    }

    async fn publish(&self, grid: &[Vec<String>]) -> Result<()> {
        self.write(&to_csv(grid))
            .map_err(|e| RestockError::Publish(format!("writing {}: {}", self.path.display(), e)))?;
        tracing::info!(path = %self.path.display(), rows = grid.len(), "report written");
        Ok(())
    }
}

// ── StdoutPublisher ───────────────────────────────────────────────────────────

/// Prints the grid as CSV; used for dry runs.
#[derive(Default)]
pub struct StdoutPublisher;

#[async_trait]
impl ReportSink for StdoutPublisher {
    fn name(&self) -> &str {
        "stdout"
    }

    async fn publish(&self, grid: &[Vec<String>]) -> Result<()> {
        write_stdout(&to_csv(grid))
            .map_err(|e| RestockError::Publish(format!("writing to stdout: {}", e)))
    }
}

fn write_stdout(csv: &str) -> std::io::Result<()> {
    let mut out = std::io::stdout().lock();
    out.write_all(csv.as_bytes())?;
    out.flush()
}

// ── Tests ─────────────────────────────────────────────────────────────────────
