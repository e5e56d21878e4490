use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Datastore is not configured")]
    NotConfigured,

    #[error("Datastore request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Datastore returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Datastore returned an unexpected response: {0}")]
    InvalidResponse(String),
}

/// Tables the assistant is allowed to read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Table {
    Products,
    Orders,
    Users,
    Profiles,
}

impl Table {
    pub const ALL: [Table; 4] = [Table::Products, Table::Orders, Table::Users, Table::Profiles];

    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Products => "products",
            Table::Orders => "orders",
            Table::Users => "users",
            Table::Profiles => "profiles",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Table {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Table::ALL
            .into_iter()
            .find(|table| table.as_str() == s)
            .ok_or_else(|| format!("unknown table '{}'", s))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Case-insensitive substring match
    Contains { column: String, value: String },
    Equals { column: String, value: String },
}

/// A bounded read against one table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordQuery {
    pub table: Table,
    pub filters: Vec<Filter>,
    pub limit: usize,
}

impl RecordQuery {
    pub fn new(table: Table, limit: usize) -> Self {
        Self {
            table,
            filters: Vec::new(),
            limit,
        }
    }

    pub fn contains<C: Into<String>, V: Into<String>>(mut self, column: C, value: V) -> Self {
        self.filters.push(Filter::Contains {
            column: column.into(),
            value: value.into(),
        });
        self
    }

    pub fn equals<C: Into<String>, V: Into<String>>(mut self, column: C, value: V) -> Self {
        self.filters.push(Filter::Equals {
            column: column.into(),
            value: value.into(),
        });
        self
    }
}

/// Structured lookups against the marketplace database
#[async_trait]
pub trait MarketplaceStore: Send + Sync {
    /// Rows matching the query, never more than `query.limit`
    async fn select(&self, query: &RecordQuery) -> Result<Vec<Value>, StoreError>;

    /// Exact number of rows in a table
    async fn count(&self, table: Table) -> Result<u64, StoreError>;
}

/// Store backed by the hosted database's PostgREST interface
pub struct PostgrestStore {
    client: Client,
    base_url: Option<Url>,
    service_key: Option<String>,
}

impl PostgrestStore {
    pub fn new(base_url: Option<&str>, service_key: Option<String>) -> anyhow::Result<Self> {
        let base_url = base_url
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(|url| Url::parse(&format!("{}/", url.trim_end_matches('/'))))
            .transpose()?;
        let client = Client::builder().timeout(Duration::from_secs(15)).build()?;

        Ok(Self {
            client,
            base_url,
            service_key: service_key.filter(|key| !key.trim().is_empty()),
        })
    }

    fn table_url(&self, table: Table) -> Result<(Url, &str), StoreError> {
        let (Some(base), Some(key)) = (&self.base_url, &self.service_key) else {
            return Err(StoreError::NotConfigured);
        };
        let url = base
            .join(&format!("rest/v1/{}", table.as_str()))
            .map_err(|e| StoreError::InvalidResponse(e.to_string()))?;
        Ok((url, key.as_str()))
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, StoreError> {
        match response.status() {
            status if status.is_success() => Ok(response),
            status => Err(StoreError::Status {
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }
}

/// Strip characters that carry meaning in PostgREST filter syntax
fn sanitize_filter_value(value: &str) -> String {
    value
        .chars()
        .filter(|c| !matches!(c, '*' | '%' | ',' | '(' | ')'))
        .collect()
}

#[async_trait]
impl MarketplaceStore for PostgrestStore {
    async fn select(&self, query: &RecordQuery) -> Result<Vec<Value>, StoreError> {
        let (mut url, key) = self.table_url(query.table)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("select", "*");
            for filter in &query.filters {
                match filter {
                    Filter::Contains { column, value } => pairs.append_pair(
                        column,
                        &format!("ilike.*{}*", sanitize_filter_value(value)),
                    ),
                    Filter::Equals { column, value } => {
                        pairs.append_pair(column, &format!("eq.{}", value))
                    }
                };
            }
            pairs.append_pair("limit", &query.limit.to_string());
        }

        let response = self
            .client
            .get(url)
            .header("apikey", key)
            .bearer_auth(key)
            .send()
            .await?;
        let rows: Vec<Value> = Self::check(response).await?.json().await?;
        Ok(rows.into_iter().take(query.limit).collect())
    }

    async fn count(&self, table: Table) -> Result<u64, StoreError> {
        let (mut url, key) = self.table_url(table)?;
        url.query_pairs_mut().append_pair("select", "*");

        let response = self
            .client
            .head(url)
            .header("apikey", key)
            .bearer_auth(key)
            .header("Prefer", "count=exact")
            .send()
            .await?;
        let response = Self::check(response).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(0);
        }

        // Content-Range looks like "0-24/3573" or "*/0"
        response
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(|range| range.rsplit('/').next())
            .and_then(|total| total.parse::<u64>().ok())
            .ok_or_else(|| StoreError::InvalidResponse("missing Content-Range total".to_string()))
    }
}
