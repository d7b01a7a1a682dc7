//! Google Sheets v4 REST backend over `ureq`.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{json, Value};

use tasksheet_core::types::Row;
use tasksheet_core::{Config, CoreError};

use crate::backend::{Dimension, RangeWrite, SheetBackend, ValueRender};
use crate::error::SheetError;

pub struct HttpSheetsBackend {
    agent: ureq::Agent,
    base_url: String,
    spreadsheet_id: String,
    access_token: String,
}

impl HttpSheetsBackend {
    pub fn new(
        base_url: &str,
        spreadsheet_id: &str,
        access_token: &str,
        timeout: Duration,
    ) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            base_url: base_url.trim_end_matches('/').to_string(),
            spreadsheet_id: spreadsheet_id.to_string(),
            access_token: access_token.to_string(),
        }
    }

    /// Build from a validated configuration.
    pub fn from_config(config: &Config) -> Result<Self, CoreError> {
        config.validate()?;
        let token = config
            .access_token
            .as_deref()
            .ok_or(CoreError::MissingSetting("access_token"))?;
        Ok(Self::new(
            &config.api_base_url,
            &config.spreadsheet_id,
            token,
            config.request_timeout(),
        ))
    }

    fn url(&self, suffix: &str) -> String {
        format!(
            "{}/v4/spreadsheets/{}{}",
            self.base_url, self.spreadsheet_id, suffix
        )
    }

    fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }

    fn decode<T: for<'de> Deserialize<'de>>(response: ureq::Response) -> Result<T, SheetError> {
        response
            .into_json::<T>()
            .map_err(|e| SheetError::Decode(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetMeta>,
}

#[derive(Debug, Deserialize)]
struct SheetMeta {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    title: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchGetResponse {
    #[serde(default)]
    value_ranges: Vec<ValueRange>,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Row>,
}

impl SheetBackend for HttpSheetsBackend {
    fn worksheet_titles(&self) -> Result<Vec<String>, SheetError> {
        let response = self
            .agent
            .get(&self.url(""))
            .set("Authorization", &self.bearer())
            .query("fields", "sheets.properties.title")
            .call()
            .map_err(classify)?;
        let meta: SpreadsheetMeta = Self::decode(response)?;
        Ok(meta.sheets.into_iter().map(|s| s.properties.title).collect())
    }

    fn batch_get(
        &self,
        ranges: &[String],
        dimension: Dimension,
        render: ValueRender,
    ) -> Result<Vec<Vec<Row>>, SheetError> {
        let mut request = self
            .agent
            .get(&self.url("/values:batchGet"))
            .set("Authorization", &self.bearer())
            .query("majorDimension", dimension.as_str())
            .query("valueRenderOption", render.as_str());
        for range in ranges {
            request = request.query("ranges", range);
        }
        let response = request.call().map_err(classify)?;
        let body: BatchGetResponse = Self::decode(response)?;
        if body.value_ranges.len() != ranges.len() {
            return Err(SheetError::Decode(format!(
                "asked for {} ranges, got {}",
                ranges.len(),
                body.value_ranges.len()
            )));
        }
        Ok(body.value_ranges.into_iter().map(|r| r.values).collect())
    }

    fn batch_update(&self, writes: &[RangeWrite]) -> Result<(), SheetError> {
        let body = json!({
            "valueInputOption": "USER_ENTERED",
            "data": writes
                .iter()
                .map(|w| json!({"range": w.range, "values": w.values}))
                .collect::<Vec<Value>>(),
        });
        self.agent
            .post(&self.url("/values:batchUpdate"))
            .set("Authorization", &self.bearer())
            .send_json(body)
            .map_err(classify)?;
        Ok(())
    }
}

fn classify(err: ureq::Error) -> SheetError {
    match err {
        ureq::Error::Status(status, response) => {
            let body = response.into_string().unwrap_or_default();
            classify_status(status, &body)
        }
        ureq::Error::Transport(transport) => classify_transport(&transport.to_string()),
    }
}

/// Map an HTTP error status and body onto the retry taxonomy.
pub fn classify_status(status: u16, body: &str) -> SheetError {
    let message = api_message(body);
    let quota_text = body.contains("RESOURCE_EXHAUSTED")
        || body.contains("RATE_LIMIT_EXCEEDED")
        || body.to_ascii_lowercase().contains("quota");
    match status {
        429 => SheetError::Quota { status, message },
        403 if quota_text => SheetError::Quota { status, message },
        500..=599 => SheetError::Transient { status, message },
        _ => SheetError::Api { status, message },
    }
}

/// Network failures: timeouts are told apart by the transport message.
pub fn classify_transport(message: &str) -> SheetError {
    if message.to_ascii_lowercase().contains("timed out") {
        SheetError::Timeout(message.to_string())
    } else {
        SheetError::Connection(message.to_string())
    }
}

/// `error.message` from a Google API error body, else the raw body.
fn api_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.pointer("/error/message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}
