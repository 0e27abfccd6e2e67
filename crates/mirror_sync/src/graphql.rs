//! GraphQL over HTTP client for an upstream catalog server.

use crate::client::{CatalogClient, CatalogPage, SourceConnector};
use crate::error::SourceError;
use crate::wire::{decode_page, kind_query, query_document};
use async_trait::async_trait;
use mirror_db::SourceConfig;
use mirror_ids::EntityKind;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Header carrying the source credential.
const API_KEY_HEADER: &str = "ApiKey";

/// Upstream timestamps have second precision; listings ask for one second
/// earlier than the cursor so entities sharing the cursor's second are seen.
const SINCE_SLACK_MS: i64 = 1000;

/// Longest upstream error body kept in an error message.
const MAX_ERROR_BODY: usize = 500;

#[derive(Debug, Deserialize)]
struct GraphQlResponse {
    data: Option<Value>,
    #[serde(default)]
    errors: Vec<GraphQlErrorItem>,
}

#[derive(Debug, Deserialize)]
struct GraphQlErrorItem {
    message: String,
}

pub struct GraphQlClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl GraphQlClient {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SourceError::transient(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            api_key: api_key.filter(|key| !key.is_empty()),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn list(
        &self,
        kind: EntityKind,
        page: u32,
        per_page: u32,
        since: Option<i64>,
    ) -> Result<CatalogPage, SourceError> {
        let variables = list_variables(kind, page, per_page, since)?;
        let body = json!({ "query": query_document(kind), "variables": variables });

        let mut request = self.http.post(&self.endpoint).json(&body);
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }

        let response = request.send().await.map_err(|e| {
            SourceError::transient(format!("request to {} failed: {e}", self.endpoint))
        })?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(|e| {
            SourceError::transient(format!("reading response from {} failed: {e}", self.endpoint))
        })?;

        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(SourceError::transient(format!(
                "{} answered {status}",
                self.endpoint
            )));
        }
        if !status.is_success() {
            return Err(SourceError::Upstream {
                status: status.as_u16(),
                message: truncate(&String::from_utf8_lossy(&bytes)),
            });
        }

        let parsed: GraphQlResponse = serde_json::from_slice(&bytes)
            .map_err(|e| SourceError::malformed(format!("undecodable response body: {e}")))?;
        if !parsed.errors.is_empty() {
            let messages: Vec<_> = parsed.errors.into_iter().map(|e| e.message).collect();
            return Err(SourceError::malformed(format!(
                "GraphQL errors: {}",
                messages.join("; ")
            )));
        }
        let data = parsed
            .data
            .ok_or_else(|| SourceError::malformed("response has no data"))?;

        let page_result = decode_page(kind, &data)?;
        debug!(
            endpoint = %self.endpoint,
            kind = %kind,
            page,
            count = page_result.records.len(),
            total = page_result.total,
            "Fetched upstream page"
        );
        Ok(page_result)
    }
}

/// Variables for one listing page.
///
/// Full listings page by `id`, which edits cannot reorder; change listings
/// page by `updated_at` ascending.
fn list_variables(
    kind: EntityKind,
    page: u32,
    per_page: u32,
    since: Option<i64>,
) -> Result<Value, SourceError> {
    let mut variables = json!({
        "filter": {
            "page": page,
            "per_page": per_page,
            "sort": if since.is_some() { "updated_at" } else { "id" },
            "direction": "ASC",
        }
    });
    if let Some(since) = since {
        let value = chrono::DateTime::from_timestamp_millis(since - SINCE_SLACK_MS)
            .ok_or_else(|| SourceError::malformed(format!("cursor {since} is out of range")))?
            .to_rfc3339();
        variables[kind_query(kind).filter_arg] = json!({
            "updated_at": { "value": value, "modifier": "GREATER_THAN" }
        });
    }
    Ok(variables)
}

fn truncate(text: &str) -> String {
    if text.len() > MAX_ERROR_BODY {
        let cut = (0..=MAX_ERROR_BODY)
            .rev()
            .find(|i| text.is_char_boundary(*i))
            .unwrap_or(0);
        format!("{}... (truncated)", &text[..cut])
    } else {
        text.to_string()
    }
}

#[async_trait]
impl CatalogClient for GraphQlClient {
    async fn list_all(
        &self,
        kind: EntityKind,
        page: u32,
        per_page: u32,
    ) -> Result<CatalogPage, SourceError> {
        self.list(kind, page, per_page, None).await
    }

    async fn list_updated_since(
        &self,
        kind: EntityKind,
        since: i64,
        page: u32,
        per_page: u32,
    ) -> Result<CatalogPage, SourceError> {
        self.list(kind, page, per_page, Some(since)).await
    }
}

/// Connects sources through [`GraphQlClient`].
#[derive(Debug, Clone)]
pub struct GraphQlConnector {
    timeout: Duration,
}

impl GraphQlConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for GraphQlConnector {
    fn default() -> Self {
        Self::new(DEFAULT_REQUEST_TIMEOUT)
    }
}

impl SourceConnector for GraphQlConnector {
    fn connect(&self, source: &SourceConfig) -> Result<Arc<dyn CatalogClient>, SourceError> {
        let client = GraphQlClient::new(&source.endpoint, source.api_key.clone(), self.timeout)?;
        Ok(Arc::new(client))
    }
}
