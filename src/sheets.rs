use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use tracing::{info, warn};

use crate::reddit::ClientError;

const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/";

/// Read access to the subscriber spreadsheet.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Rows of `range` in sheet order, each cell rendered as a string.
    async fn read_range(&self, sheet_id: &str, range: &str) -> Result<Vec<Vec<String>>>;
}

#[derive(Clone)]
pub struct SheetsClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl fmt::Debug for SheetsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SheetsClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl SheetsClient {
    pub fn new(token: String) -> Result<Self> {
        Self::with_base_url(token, Url::parse(SHEETS_API_BASE)?)
    }

    pub fn with_base_url(token: String, base_url: Url) -> Result<Self> {
        let http = Client::builder()
            .user_agent("summonbot/0.1")
            .build()
            .context("failed to build reqwest client")?;
        Ok(Self {
            http,
            base_url,
            token,
        })
    }

    pub fn build_request(&self, sheet_id: &str, range: &str) -> Result<reqwest::Request> {
        let mut endpoint = self
            .base_url
            .join("v4/spreadsheets/")
            .context("invalid Sheets base URL")?;
        endpoint
            .path_segments_mut()
            .map_err(|_| anyhow::anyhow!("Sheets base URL cannot be a base"))?
            .pop_if_empty()
            .extend([sheet_id, "values", range]);
        endpoint
            .query_pairs_mut()
            .append_pair("majorDimension", "ROWS")
            .append_pair("valueRenderOption", "FORMATTED_VALUE");
        self.http
            .get(endpoint)
            .bearer_auth(&self.token)
            .build()
            .context("failed to build Sheets request")
    }
}

#[async_trait]
impl Directory for SheetsClient {
    async fn read_range(&self, sheet_id: &str, range: &str) -> Result<Vec<Vec<String>>> {
        let request = self.build_request(sheet_id, range)?;
        let res = self
            .http
            .execute(request)
            .await
            .map_err(ClientError::from)?;

        let status = res.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!("Rate limited by Sheets: {}", body);
            return Err(ClientError::RateLimited(body).into());
        }
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(%status, "Sheets API error: {}", body);
            return Err(ClientError::Status { status, body }.into());
        }

        let body: Value = res.json().await.map_err(ClientError::from)?;
        let rows = parse_value_range(&body)?;
        info!(rows = rows.len(), range, "read subscriber directory");
        Ok(rows)
    }
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

/// Flatten a `ValueRange` into string cells. Sheets omits `values` entirely
/// for an empty range.
pub fn parse_value_range(body: &Value) -> Result<Vec<Vec<String>>> {
    let range = ValueRange::deserialize(body)
        .map_err(|e| ClientError::Payload(format!("value range: {}", e)))?;
    Ok(range
        .values
        .into_iter()
        .map(|row| row.into_iter().map(cell_to_string).collect())
        .collect())
}

fn cell_to_string(cell: Value) -> String {
    match cell {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
