//! Bulk fetch against the hosted database's REST surface

mod memory;
pub mod query;

pub use memory::MemoryDataSource;
pub use query::{Filter, Query};

use crate::config::RealtimeConfig;
use crate::error::{Error, Result};
use crate::models::{decode_rows, Record};
use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder};
use serde_json::Value;
use tracing::debug;
use url::Url;

/// Row store the view stores read from and write to
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Rows matching the query, in the query's order
    async fn select(&self, query: &Query) -> Result<Vec<Value>>;

    /// Number of rows matching the query's filters (order and limit ignored)
    async fn count(&self, query: &Query) -> Result<u64>;

    /// Insert one row and return it as stored
    async fn insert(&self, table: &str, row: Value) -> Result<Value>;

    /// Patch the row with the given id; `None` when no such row exists
    async fn update(&self, table: &str, id: &str, patch: Value) -> Result<Option<Value>>;
}

/// Run a query and decode the rows, skipping any that do not fit `T`
pub async fn fetch_records<T: Record>(source: &dyn DataSource, query: &Query) -> Result<Vec<T>> {
    let rows = source.select(query).await?;
    Ok(decode_rows(rows))
}

/// Parse the total out of a `Content-Range` header (`0-24/3573`, `*/0`)
pub fn parse_content_range(header: &str) -> Option<u64> {
    header.rsplit('/').next()?.trim().parse().ok()
}

/// Data source speaking PostgREST over HTTP
pub struct HttpDataSource {
    client: Client,
    base_url: Url,
    key: String,
}

impl HttpDataSource {
    pub fn new(config: &RealtimeConfig, timeout_secs: u64) -> Result<Self> {
        let key = config.key().ok_or_else(|| {
            Error::Config(format!(
                "Realtime service key not set (expected in ${})",
                config.key_env
            ))
        })?;
        Self::with_key(&config.url, key, timeout_secs)
    }

    pub fn with_key(url: &str, key: String, timeout_secs: u64) -> Result<Self> {
        let mut base_url =
            Url::parse(url).map_err(|e| Error::Config(format!("Invalid realtime URL: {}", e)))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let base_url = base_url
            .join("rest/v1/")
            .map_err(|e| Error::Config(format!("Invalid realtime URL: {}", e)))?;
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url,
            key,
        })
    }

    fn endpoint(&self, table: &str) -> Result<Url> {
        self.base_url
            .join(table)
            .map_err(|e| Error::Config(format!("Invalid table name {}: {}", table, e)))
    }

    fn request(&self, method: Method, table: &str) -> Result<RequestBuilder> {
        let url = self.endpoint(table)?;
        Ok(self
            .client
            .request(method, url)
            .header("apikey", &self.key)
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {}", self.key)))
    }

    async fn rows(response: reqwest::Response) -> Result<Vec<Value>> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_string))
                .unwrap_or(body);
            return Err(Error::Status {
                status: status.as_u16(),
                message,
            });
        }
        match response.json::<Value>().await? {
            Value::Array(rows) => Ok(rows),
            Value::Null => Ok(Vec::new()),
            single => Ok(vec![single]),
        }
    }
}

#[async_trait]
impl DataSource for HttpDataSource {
    async fn select(&self, query: &Query) -> Result<Vec<Value>> {
        debug!("select {} {:?}", query.table, query.to_params());
        let response = self
            .request(Method::GET, &query.table)?
            .query(&query.to_params())
            .send()
            .await?;
        Self::rows(response).await
    }

    async fn count(&self, query: &Query) -> Result<u64> {
        let params: Vec<(String, String)> = query
            .filters
            .iter()
            .map(|f| (f.column().to_string(), f.expression()))
            .chain(std::iter::once(("select".to_string(), "id".to_string())))
            .collect();
        debug!("count {} {:?}", query.table, params);

        let response = self
            .request(Method::HEAD, &query.table)?
            .query(&params)
            .header("Prefer", "count=exact")
            .send()
            .await?
            .error_for_status()?;

        response
            .headers()
            .get(reqwest::header::CONTENT_RANGE)
            .and_then(|h| h.to_str().ok())
            .and_then(parse_content_range)
            .ok_or_else(|| Error::Other(format!("count for {} missing Content-Range", query.table)))
    }

    async fn insert(&self, table: &str, row: Value) -> Result<Value> {
        debug!("insert into {}", table);
        let response = self
            .request(Method::POST, table)?
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await?;
        Self::rows(response)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Other(format!("insert into {} returned no row", table)))
    }

    async fn update(&self, table: &str, id: &str, patch: Value) -> Result<Option<Value>> {
        debug!("update {} id={}", table, id);
        let response = self
            .request(Method::PATCH, table)?
            .query(&[("id", format!("eq.{}", id))])
            .header("Prefer", "return=representation")
            .json(&patch)
            .send()
            .await?;
        Ok(Self::rows(response).await?.into_iter().next())
    }
}
