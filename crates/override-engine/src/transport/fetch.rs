//! The `fetch` call convention.

use crate::error::TransportError;
use crate::request::normalize_method;
use async_trait::async_trait;
use bytes::Bytes;
use hyper::http::{HeaderName, HeaderValue};
use hyper::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;
use std::str::FromStr;
use tracing::debug;

/// Arguments of a `fetch(input, init)` call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchRequest {
    pub url: String,
    /// As passed by the caller; `None` means GET
    pub method: Option<String>,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl FetchRequest {
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

    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (HeaderName::from_str(name), HeaderValue::from_str(value)) {
            self.headers.insert(name, value);
        }
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Upper-cased method, defaulting to GET.
    pub fn effective_method(&self) -> String {
        normalize_method(self.method.as_deref())
    }
}

/// What a `fetch` promise resolves to.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub url: String,
}

impl FetchResponse {
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// A value occupying the page's `fetch` slot.
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, TransportError>;
}

/// Real network fetch.
#[derive(Debug, Clone, Default)]
pub struct ReqwestFetch {
    client: reqwest::Client,
}

impl ReqwestFetch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetch for ReqwestFetch {
    async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, TransportError> {
        let method = reqwest::Method::from_bytes(request.effective_method().as_bytes())
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;

        debug!(url = %request.url, method = %method, "Issuing network request");

        let mut builder = self
            .client
            .request(method, &request.url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let url = response.url().to_string();
        let headers = response.headers().clone();
        let body = response.bytes().await?;

        Ok(FetchResponse {
            status: status.as_u16(),
            status_text: reason_phrase(status),
            headers,
            body,
            url,
        })
    }
}

pub(crate) fn reason_phrase(status: StatusCode) -> String {
    status.canonical_reason().unwrap_or("").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let req = FetchRequest::new("/api/users")
            .method("post")
            .header("Content-Type", "application/json")
            .body(r#"{"a":1}"#);

        assert_eq!(req.effective_method(), "POST");
        assert_eq!(req.headers.get("content-type").unwrap(), "application/json");
        assert_eq!(req.body.as_deref(), Some(&b"{\"a\":1}"[..]));
        assert_eq!(FetchRequest::new("/x").effective_method(), "GET");
    }

    #[test]
    fn test_response_accessors() {
        let response = FetchResponse {
            status: 201,
            status_text: "Created".to_string(),
            headers: HeaderMap::new(),
            body: Bytes::from_static(br#"{"id":7}"#),
            url: "/api/users".to_string(),
        };
        assert!(response.ok());
        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["id"], 7);
    }
}
