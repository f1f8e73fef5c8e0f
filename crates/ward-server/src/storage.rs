//! PostgREST table client.
//!
//! A thin `reqwest` wrapper exposing the four row operations the handlers need. Calls are not
//! retried here; every call site goes through [`ward_core::RetryExecutor`], which classifies
//! [`StorageError`] through its [`Classify`] impl.

use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response, header};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use ward_core::Classify;

use crate::config::StorageConfig;

#[derive(Debug, Error)]
pub enum StorageError {
    /// Upstream answered with a non-success status.
    #[error("storage returned {status}{}: {message}", code_suffix(.code))]
    Status {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// No response was obtained (connect, reset, DNS, timeout).
    #[error("storage transport error: {0}")]
    Transport(String),

    /// A success response whose body could not be read as expected.
    #[error("failed to decode storage response: {0}")]
    Decode(String),

    /// A write was accepted but no row came back (e.g. hidden by row-level security).
    #[error("{operation} into {table} returned no rows")]
    EmptyRepresentation {
        operation: &'static str,
        table: String,
    },
}

fn code_suffix(code: &Option<String>) -> String {
    code.as_deref().map(|c| format!(" ({c})")).unwrap_or_default()
}

impl StorageError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl Classify for StorageError {
    fn status_code(&self) -> Option<u16> {
        self.status()
    }

    fn upstream_code(&self) -> Option<&str> {
        match self {
            Self::Status { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Success responses whose body was unusable.
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::EmptyRepresentation { .. })
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// PostgREST error body.
#[derive(Debug, Deserialize)]
struct PostgrestError {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// A row filter rendered into the query string.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `column=eq.value`
    Eq(String, String),
    /// `column=in.(a,b)`
    In(String, Vec<String>),
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl ToString) -> Self {
        Self::Eq(column.into(), value.to_string())
    }

    pub fn one_of<I, S>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::In(column.into(), values.into_iter().map(Into::into).collect())
    }

    fn to_query(&self) -> (String, String) {
        match self {
            Self::Eq(column, value) => (column.clone(), format!("eq.{value}")),
            Self::In(column, values) => (column.clone(), format!("in.({})", values.join(","))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TableClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl TableClient {
    pub fn new(config: &StorageConfig) -> Result<Self, StorageError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;
        Ok(Self::with_client(http, &config.url, &config.api_key))
    }

    pub fn with_client(http: reqwest::Client, base_url: &str, api_key: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        }
    }

    /// Insert one row and return it as stored.
    pub async fn insert(&self, table: &str, row: &Value) -> Result<Value, StorageError> {
        let response = self
            .request(Method::POST, table)
            .header("Prefer", "return=representation")
            .json(row)
            .send()
            .await?;
        let mut rows: Vec<Value> = check(response).await?.json().await?;
        if rows.is_empty() {
            return Err(StorageError::EmptyRepresentation {
                operation: "insert",
                table: table.to_string(),
            });
        }
        Ok(rows.swap_remove(0))
    }

    /// Insert or merge one row on the `on_conflict` columns and return it as stored.
    pub async fn upsert(
        &self,
        table: &str,
        row: &Value,
        on_conflict: &str,
    ) -> Result<Value, StorageError> {
        let response = self
            .request(Method::POST, table)
            .header("Prefer", "return=representation,resolution=merge-duplicates")
            .query(&[("on_conflict", on_conflict)])
            .json(row)
            .send()
            .await?;
        let mut rows: Vec<Value> = check(response).await?.json().await?;
        if rows.is_empty() {
            return Err(StorageError::EmptyRepresentation {
                operation: "upsert",
                table: table.to_string(),
            });
        }
        Ok(rows.swap_remove(0))
    }

    pub async fn select(
        &self,
        table: &str,
        columns: &str,
        filters: &[Filter],
    ) -> Result<Vec<Value>, StorageError> {
        let response = self
            .request(Method::GET, table)
            .query(&[("select", columns)])
            .query(&render(filters))
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    /// First matching row, if any.
    pub async fn select_one(
        &self,
        table: &str,
        columns: &str,
        filters: &[Filter],
    ) -> Result<Option<Value>, StorageError> {
        let rows = self.select(table, columns, filters).await?;
        Ok(rows.into_iter().next())
    }

    /// Patch matching rows and return them as stored.
    pub async fn update(
        &self,
        table: &str,
        patch: &Value,
        filters: &[Filter],
    ) -> Result<Vec<Value>, StorageError> {
        let response = self
            .request(Method::PATCH, table)
            .header("Prefer", "return=representation")
            .query(&render(filters))
            .json(patch)
            .send()
            .await?;
        Ok(check(response).await?.json().await?)
    }

    pub async fn delete(&self, table: &str, filters: &[Filter]) -> Result<(), StorageError> {
        let response = self
            .request(Method::DELETE, table)
            .query(&render(filters))
            .send()
            .await?;
        check(response).await?;
        Ok(())
    }

    fn request(&self, method: Method, table: &str) -> RequestBuilder {
        let url = format!("{}/rest/v1/{}", self.base_url, table);
        let mut builder = self
            .http
            .request(method, url)
            .header(header::ACCEPT, "application/json");
        if !self.api_key.is_empty() {
            builder = builder
                .header("apikey", &self.api_key)
                .bearer_auth(&self.api_key);
        }
        builder
    }
}

fn render(filters: &[Filter]) -> Vec<(String, String)> {
    filters.iter().map(Filter::to_query).collect()
}

/// Turn a non-success response into [`StorageError::Status`].
async fn check(response: Response) -> Result<Response, StorageError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let parsed = serde_json::from_str::<PostgrestError>(&body).ok();
    let (code, message) = match parsed {
        Some(err) => (err.code, err.message.unwrap_or_else(|| body.clone())),
        None => (None, body),
    };
    Err(StorageError::Status {
        status: status.as_u16(),
        code,
        message: if message.is_empty() {
            status.canonical_reason().unwrap_or("unknown").to_string()
        } else {
            message
        },
    })
}
