//! REST client for the todo-style server API
//!
//! `GET {base}/{resource}?col=value`, `GET {base}/{resource}?lastSeenDeletion=ts`,
//! `GET|PUT|DELETE {base}/{resource}/{id}`, `POST {base}/{resource}`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use super::{RemoteApi, RemoteError, RemoteResult};
use crate::filter::Filter;
use crate::models::{RemoteRow, Row};
use crate::schema::TableSchema;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Longest slice of a response body quoted in an error
const BODY_EXCERPT_CHARS: usize = 180;

/// Body field carrying the client's temporary key on insert
pub const LOCAL_ID: &str = "localId";

/// Query parameter selecting tombstones newer than a checkpoint
pub const LAST_SEEN_DELETION: &str = "lastSeenDeletion";

#[derive(Clone)]
pub struct HttpRemote {
    base_url: String,
    resource: String,
    schema: Arc<TableSchema>,
    client: reqwest::Client,
}

impl std::fmt::Debug for HttpRemote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRemote")
            .field("base_url", &self.base_url)
            .field("resource", &self.resource)
            .finish_non_exhaustive()
    }
}

impl HttpRemote {
    /// Client for `schema`'s table at `base_url`; the resource path defaults
    /// to the table name
    pub fn new(base_url: impl Into<String>, schema: Arc<TableSchema>) -> RemoteResult<Self> {
        Self::with_timeout(base_url, schema, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: impl Into<String>,
        schema: Arc<TableSchema>,
        timeout: Duration,
    ) -> RemoteResult<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        Ok(Self {
            base_url,
            resource: schema.name().to_string(),
            schema,
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    #[must_use]
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = resource.into().trim_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn collection_url(&self) -> String {
        format!("{}/{}", self.base_url, self.resource)
    }

    fn item_url(&self, id: i64) -> String {
        format!("{}/{}/{id}", self.base_url, self.resource)
    }

    fn server_key(&self, row: &Row) -> RemoteResult<i64> {
        let pk = self.schema.primary_key();
        row.key(pk)
            .filter(|key| *key >= 0)
            .ok_or_else(|| RemoteError::InvalidPayload(format!("row has no server `{pk}`")))
    }
}

#[async_trait]
impl RemoteApi for HttpRemote {
    async fn get(&self, filter: &Filter) -> RemoteResult<Vec<RemoteRow>> {
        let query = filter
            .query_pairs(&self.schema)
            .map_err(|error| RemoteError::InvalidPayload(error.to_string()))?;
        tracing::debug!(url = %self.collection_url(), ?query, "GET");
        let response = self
            .client
            .get(self.collection_url())
            .query(&query)
            .header("Accept", "application/json")
            .send()
            .await?;
        read_json(response).await
    }

    async fn get_by_id(&self, id: i64) -> RemoteResult<Option<RemoteRow>> {
        tracing::debug!(url = %self.item_url(id), "GET");
        let response = self
            .client
            .get(self.item_url(id))
            .header("Accept", "application/json")
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let rows: OneOrMany = read_json(response).await?;
        Ok(rows.into_first())
    }

    async fn insert(&self, row: &Row) -> RemoteResult<RemoteRow> {
        let body = insert_body(row, self.schema.primary_key());
        tracing::debug!(url = %self.collection_url(), "POST");
        let response = self
            .client
            .post(self.collection_url())
            .json(&body)
            .send()
            .await?;
        let rows: OneOrMany = read_json(response).await?;
        rows.into_first()
            .ok_or_else(|| RemoteError::InvalidPayload("insert returned no row".to_string()))
    }

    async fn update(&self, row: &Row) -> RemoteResult<RemoteRow> {
        let id = self.server_key(row)?;
        tracing::debug!(url = %self.item_url(id), "PUT");
        let response = self.client.put(self.item_url(id)).json(row).send().await?;
        let rows: OneOrMany = read_json(response).await?;
        rows.into_first()
            .ok_or_else(|| RemoteError::InvalidPayload("update returned no row".to_string()))
    }

    async fn delete(&self, row: &Row) -> RemoteResult<()> {
        let id = self.server_key(row)?;
        tracing::debug!(url = %self.item_url(id), "DELETE");
        let response = self.client.delete(self.item_url(id)).send().await?;
        check_status(response).await.map(|_| ())
    }

    async fn get_deletions(&self, since: i64) -> RemoteResult<Vec<RemoteRow>> {
        tracing::debug!(url = %self.collection_url(), since, "GET deletions");
        let response = self
            .client
            .get(self.collection_url())
            .query(&[(LAST_SEEN_DELETION, since)])
            .header("Accept", "application/json")
            .send()
            .await?;
        read_json(response).await
    }
}

/// Some endpoints answer a single row as a one-element array
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    Many(Vec<RemoteRow>),
    One(RemoteRow),
}

impl OneOrMany {
    fn into_first(self) -> Option<RemoteRow> {
        match self {
            Self::Many(rows) => rows.into_iter().next(),
            Self::One(row) => Some(row),
        }
    }
}

fn insert_body(row: &Row, pk: &str) -> Row {
    let mut body = row.clone();
    if let Some(key) = row.key(pk).filter(|key| *key < 0) {
        body.remove(pk);
        body.set(LOCAL_ID, key);
    }
    body
}

async fn check_status(response: Response) -> RemoteResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RemoteError::Api {
        status: status.as_u16(),
        message: parse_api_error(status, &body),
    })
}

async fn read_json<T: DeserializeOwned>(response: Response) -> RemoteResult<T> {
    let response = check_status(response).await?;
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|error| {
        RemoteError::InvalidPayload(format!("{error}: {}", body_excerpt(&body)))
    })
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<Value>,
    message: Option<String>,
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        let error = payload.error.map(|error| match error {
            Value::String(text) => text,
            other => other.to_string(),
        });
        if let Some(message) = payload.message.or(error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body_excerpt(body);
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", trimmed, status.as_u16())
    }
}

fn body_excerpt(body: &str) -> String {
    match body.trim().char_indices().nth(BODY_EXCERPT_CHARS) {
        Some((end, _)) => body.trim()[..end].to_string(),
        None => body.trim().to_string(),
    }
}

fn normalize_base_url(raw: String) -> RemoteResult<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(RemoteError::InvalidConfiguration(
            "API URL must not be empty".to_string(),
        ));
    }
    let parsed = Url::parse(trimmed).map_err(|error| {
        RemoteError::InvalidConfiguration(format!("API URL {trimmed} is invalid: {error}"))
    })?;
    match parsed.scheme() {
        "http" | "https" if parsed.has_host() => Ok(trimmed.to_string()),
        scheme => Err(RemoteError::InvalidConfiguration(format!(
            "API URL must use http or https, not {scheme}"
        ))),
    }
}
