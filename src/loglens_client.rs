//! HTTP transport against the log service API.
//!
//! Two endpoints are consumed: `GET /api/log/messages` with `level`, `date`,
//! and `timezone` query parameters, and `GET /api/login-check`, which reports
//! the level names the server has enabled. When a token is configured it is
//! sent verbatim in the `Authorization` header; without one the requests go
//! out unauthenticated and the server decides.

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::loglens_core::types::{Level, LogRecord};
use crate::loglens_fetch::{MessageQuery, Transport};

pub const DEFAULT_TIMEOUT_SECS: u64 = 20;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("failed to construct http client: {0}")]
    Build(#[source] reqwest::Error),
    #[error("request to {url} failed: {source}")]
    Request { url: String, source: reqwest::Error },
    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },
    #[error("failed to decode response from {url}: {source}")]
    Decode { url: String, source: reqwest::Error },
}

#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    auth_token: Option<String>,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()
            .map_err(ClientError::Build)?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { client, base_url, auth_token })
    }

    pub fn is_authenticated(&self) -> bool {
        self.auth_token.is_some()
    }

    /// Level names the server has enabled, from the login-check endpoint.
    pub async fn fetch_levels(&self) -> Result<Vec<Level>, ClientError> {
        let url = format!("{}/api/login-check", self.base_url);
        let response: LoginCheckResponse = self.get_json(&url, &[]).await?;
        Ok(response.log_levels.into_iter().map(Level::new).collect())
    }

    pub async fn fetch_messages(&self, query: &MessageQuery) -> Result<Vec<LogRecord>, ClientError> {
        let url = format!("{}/api/log/messages", self.base_url);
        let params = [
            ("level", query.level.as_str()),
            ("date", query.date.as_str()),
            ("timezone", query.timezone.as_str()),
        ];
        self.get_json(&url, &params).await
    }

    async fn get_json<T>(&self, url: &str, params: &[(&str, &str)]) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
    {
        let mut request = self.client.get(url).query(params);
        if let Some(token) = &self.auth_token {
            request = request.header(reqwest::header::AUTHORIZATION, token);
        }
        let response = request
            .send()
            .await
            .map_err(|source| ClientError::Request { url: url.to_string(), source })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Status { url: url.to_string(), status: status.as_u16() });
        }
        response
            .json()
            .await
            .map_err(|source| ClientError::Decode { url: url.to_string(), source })
    }
}

impl Transport for HttpTransport {
    async fn fetch_messages(&self, query: &MessageQuery) -> Result<Vec<LogRecord>, String> {
        HttpTransport::fetch_messages(self, query).await.map_err(|error| error.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct LoginCheckResponse {
    #[serde(rename = "logLevels", default)]
    log_levels: Vec<String>,
}
