//! Google Sheets v4 REST implementation of [`RemoteStore`].

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use sheetline_core::{Grid, RangeSpec, RemoteError, RowPosition, StoreConfig};
use tracing::debug;

use crate::store::{CellUpdate, RemoteStore};

const VALUE_INPUT_OPTION: &str = "USER_ENTERED";

/// Sheets REST client authenticated with a bearer token.
pub struct SheetsClient {
    client: Client,
    base_url: String,
    spreadsheet_id: String,
    access_token: SecretString,
}

impl SheetsClient {
    pub fn new(config: &StoreConfig) -> Result<Self, RemoteError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| RemoteError::transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            spreadsheet_id: config.spreadsheet_id.clone(),
            access_token: config.access_token.clone(),
        })
    }

    pub fn spreadsheet_id(&self) -> &str {
        &self.spreadsheet_id
    }

    fn spreadsheet_url(&self) -> String {
        format!("{}/spreadsheets/{}", self.base_url, self.spreadsheet_id)
    }

    fn values_url(&self, range: &str) -> String {
        format!(
            "{}/values/{}",
            self.spreadsheet_url(),
            urlencoding::encode(range)
        )
    }

    async fn send(&self, request: RequestBuilder) -> Result<String, RemoteError> {
        let response = request
            .bearer_auth(self.access_token.expose_secret())
            .send()
            .await
            .map_err(|e| RemoteError::transport(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RemoteError::transport(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(decode_error(status.as_u16(), &body));
        }
        Ok(body)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, RemoteError> {
        let body = self.send(request).await?;
        serde_json::from_str(&body)
            .map_err(|e| RemoteError::transport(format!("Failed to parse response: {}", e)))
    }
}

impl std::fmt::Debug for SheetsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SheetsClient")
            .field("base_url", &self.base_url)
            .field("spreadsheet_id", &self.spreadsheet_id)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
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
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    sheet_id: i64,
    title: String,
}

#[derive(Debug, Deserialize)]
struct AppendResponse {
    updates: AppendUpdates,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendUpdates {
    updated_range: String,
}

/// Row the append landed on, from `updates.updatedRange` (`Sheet!A5:C5`).
fn appended_position(response: &AppendResponse) -> Result<RowPosition, RemoteError> {
    let updated = &response.updates.updated_range;
    RangeSpec::parse(updated)
        .ok()
        .and_then(|spec| spec.start.and_then(|cell| cell.row))
        .map(RowPosition::new)
        .ok_or_else(|| {
            RemoteError::transport(format!("Append reported an unusable range: {}", updated))
        })
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: i32,
    #[serde(default)]
    message: String,
}

fn decode_error(status: u16, body: &str) -> RemoteError {
    match serde_json::from_str::<ErrorEnvelope>(body) {
        Ok(envelope) => RemoteError::new(envelope.error.code, envelope.error.message),
        Err(_) if body.trim().is_empty() => RemoteError::new(status as i32, "Unknown error"),
        Err(_) => RemoteError::new(status as i32, body.trim()),
    }
}

fn cell_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn into_grid(range: ValueRange) -> Grid {
    range
        .values
        .into_iter()
        .map(|row| row.into_iter().map(cell_to_string).collect())
        .collect()
}

#[async_trait]
impl RemoteStore for SheetsClient {
    async fn read_range(&self, range: &str) -> Result<Grid, RemoteError> {
        debug!(range, "GET values");
        let values: ValueRange = self
            .send_json(self.client.get(self.values_url(range)))
            .await?;
        Ok(into_grid(values))
    }

    async fn append_row(
        &self,
        range: &str,
        row: Vec<String>,
    ) -> Result<RowPosition, RemoteError> {
        debug!(range, "POST values:append");
        let url = format!("{}:append", self.values_url(range));
        let request = self
            .client
            .post(url)
            .query(&[("valueInputOption", VALUE_INPUT_OPTION)])
            .json(&json!({ "values": [row] }));
        let response: AppendResponse = self.send_json(request).await?;
        appended_position(&response)
    }

    async fn update_range(&self, range: &str, rows: Grid) -> Result<(), RemoteError> {
        debug!(range, rows = rows.len(), "PUT values");
        let request = self
            .client
            .put(self.values_url(range))
            .query(&[("valueInputOption", VALUE_INPUT_OPTION)])
            .json(&json!({ "range": range, "values": rows }));
        self.send(request).await.map(drop)
    }

    async fn batch_update_cells(&self, updates: Vec<CellUpdate>) -> Result<(), RemoteError> {
        debug!(updates = updates.len(), "POST values:batchUpdate");
        let url = format!("{}/values:batchUpdate", self.spreadsheet_url());
        let request = self.client.post(url).json(&json!({
            "valueInputOption": VALUE_INPUT_OPTION,
            "data": updates,
        }));
        self.send(request).await.map(drop)
    }

    async fn delete_rows(
        &self,
        structural_id: i64,
        start_index: u32,
        end_index: u32,
    ) -> Result<(), RemoteError> {
        debug!(structural_id, start_index, end_index, "POST batchUpdate deleteDimension");
        let url = format!("{}:batchUpdate", self.spreadsheet_url());
        let request = self.client.post(url).json(&json!({
            "requests": [{
                "deleteDimension": {
                    "range": {
                        "sheetId": structural_id,
                        "dimension": "ROWS",
                        "startIndex": start_index,
                        "endIndex": end_index,
                    }
                }
            }]
        }));
        self.send(request).await.map(drop)
    }

    async fn structural_id(&self, sheet_name: &str) -> Result<i64, RemoteError> {
        let request = self
            .client
            .get(self.spreadsheet_url())
            .query(&[("fields", "sheets.properties(sheetId,title)")]);
        let meta: SpreadsheetMeta = self.send_json(request).await?;
        meta.sheets
            .into_iter()
            .find(|sheet| sheet.properties.title == sheet_name)
            .map(|sheet| sheet.properties.sheet_id)
            .ok_or_else(|| RemoteError::new(404, format!("Sheet not found: {}", sheet_name)))
    }
}
