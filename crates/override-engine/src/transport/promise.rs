//! Promise-based client convention (axios-like).

use super::{body_to_data, headers_to_map};
use crate::error::TransportError;
use crate::transport::fetch::{Fetch, FetchRequest};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Request description passed to `request(config)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestConfig {
    pub url: String,
    pub method: Option<String>,
    pub base_url: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub data: Option<Value>,
}

impl RequestConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// URL the request is issued to: `base_url` joined with a relative `url`.
    pub fn full_url(&self) -> String {
        match &self.base_url {
            Some(base) if !is_absolute(&self.url) => format!(
                "{}/{}",
                base.trim_end_matches('/'),
                self.url.trim_start_matches('/')
            ),
            _ => self.url.clone(),
        }
    }

    pub(crate) fn to_fetch_request(&self) -> FetchRequest {
        let mut request = FetchRequest::new(self.full_url())
            .method(self.method.clone().unwrap_or_else(|| "GET".to_string()));
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }
        if let Some(data) = &self.data {
            let body = match data {
                Value::String(s) => s.clone(),
                other => {
                    if !self.headers.keys().any(|k| k.eq_ignore_ascii_case("content-type")) {
                        request = request.header("Content-Type", "application/json");
                    }
                    other.to_string()
                }
            };
            request = request.body(body);
        }
        request
    }
}

fn is_absolute(url: &str) -> bool {
    url.contains("://") || url.starts_with("//")
}

/// Resolved value of a successful request.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientResponse {
    pub data: Value,
    pub status: u16,
    pub status_text: String,
    /// Lower-cased header names
    pub headers: BTreeMap<String, String>,
    pub config: RequestConfig,
}

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("request failed with status code {}", .0.status)]
    Status(Box<ClientResponse>),
}

#[async_trait]
pub trait PromiseClient: Send + Sync {
    async fn request(&self, config: RequestConfig) -> Result<ClientResponse, ClientError>;

    async fn get(&self, url: &str) -> Result<ClientResponse, ClientError> {
        self.request(RequestConfig::new(url).method("GET")).await
    }

    async fn delete(&self, url: &str) -> Result<ClientResponse, ClientError> {
        self.request(RequestConfig::new(url).method("DELETE")).await
    }

    async fn post(&self, url: &str, data: Value) -> Result<ClientResponse, ClientError> {
        self.request(RequestConfig::new(url).method("POST").data(data))
            .await
    }

    async fn put(&self, url: &str, data: Value) -> Result<ClientResponse, ClientError> {
        self.request(RequestConfig::new(url).method("PUT").data(data))
            .await
    }

    async fn patch(&self, url: &str, data: Value) -> Result<ClientResponse, ClientError> {
        self.request(RequestConfig::new(url).method("PATCH").data(data))
            .await
    }
}

/// Promise client over a [`Fetch`]; statuses outside 2xx reject.
pub struct FetchPromiseClient {
    fetch: Arc<dyn Fetch>,
}

impl FetchPromiseClient {
    pub fn new(fetch: Arc<dyn Fetch>) -> Self {
        Self { fetch }
    }
}

#[async_trait]
impl PromiseClient for FetchPromiseClient {
    async fn request(&self, config: RequestConfig) -> Result<ClientResponse, ClientError> {
        debug!(url = %config.full_url(), "Promise client request");
        let response = self.fetch.fetch(config.to_fetch_request()).await?;

        let client_response = ClientResponse {
            data: body_to_data(&response.text()),
            status: response.status,
            status_text: response.status_text.clone(),
            headers: headers_to_map(&response.headers),
            config,
        };

        if response.ok() {
            Ok(client_response)
        } else {
            Err(ClientError::Status(Box::new(client_response)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_full_url() {
        let config = RequestConfig::new("/users").base_url("https://api.x/v1/");
        assert_eq!(config.full_url(), "https://api.x/v1/users");

        let absolute = RequestConfig::new("https://other/x").base_url("https://api.x");
        assert_eq!(absolute.full_url(), "https://other/x");
    }

    #[test]
    fn test_json_data_sets_content_type() {
        let request = RequestConfig::new("/users")
            .method("post")
            .data(json!({"name": "Ada"}))
            .to_fetch_request();

        assert_eq!(request.effective_method(), "POST");
        assert_eq!(
            request.headers.get("content-type").unwrap(),
            "application/json"
        );
        assert_eq!(request.body.as_deref(), Some(&br#"{"name":"Ada"}"#[..]));
    }
}
