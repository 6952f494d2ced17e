//! Fluent builder client convention (superagent-like).
//!
//! Requests are assembled with a builder and dispatched by the agent's
//! terminal `end` step, which reports through a callback.

use super::{body_to_data, headers_to_map};
use crate::transport::fetch::{Fetch, FetchRequest, FetchResponse};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FluentRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl FluentRequest {
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new("POST", url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new("PUT", url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new("DELETE", url)
    }

    pub fn set(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn send(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// URL with query pairs appended.
    pub fn full_url(&self) -> String {
        if self.query.is_empty() {
            return self.url.clone();
        }
        let pairs: Vec<String> = self
            .query
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{}{}", self.url, separator, pairs.join("&"))
    }

    pub(crate) fn to_fetch_request(&self) -> FetchRequest {
        let mut request = FetchRequest::new(self.full_url()).method(self.method.clone());
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }
        match &self.body {
            Some(Value::String(s)) => request = request.body(s.clone()),
            Some(other) => {
                request = request
                    .header("Content-Type", "application/json")
                    .body(other.to_string())
            }
            None => {}
        }
        request
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FluentResponse {
    pub status: u16,
    pub ok: bool,
    pub text: String,
    /// Parsed JSON body, or the text when it is not JSON
    pub body: Value,
    /// Lower-cased header names
    pub headers: BTreeMap<String, String>,
    pub content_type: Option<String>,
}

impl FluentResponse {
    pub fn from_fetch(response: &FetchResponse) -> Self {
        let text = response.text();
        Self {
            status: response.status,
            ok: response.ok(),
            body: body_to_data(&text),
            text,
            headers: headers_to_map(&response.headers),
            content_type: response.header("content-type").map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("{message}")]
pub struct FluentError {
    pub status: Option<u16>,
    pub message: String,
    pub response: Option<FluentResponse>,
}

pub type EndCallback = Box<dyn FnOnce(Result<FluentResponse, FluentError>) + Send>;

/// The agent whose `end` dispatches a built request.
pub trait FluentClient: Send + Sync {
    fn end(&self, request: FluentRequest, callback: EndCallback);
}

/// `end` as an awaitable.
pub async fn end_async(
    client: &dyn FluentClient,
    request: FluentRequest,
) -> Result<FluentResponse, FluentError> {
    let (tx, rx) = oneshot::channel();
    client.end(
        request,
        Box::new(move |result| {
            let _ = tx.send(result);
        }),
    );
    rx.await.unwrap_or_else(|_| {
        Err(FluentError {
            status: None,
            message: "request dropped without completing".to_string(),
            response: None,
        })
    })
}

/// Fluent agent over a [`Fetch`]; statuses outside 2xx are errors.
pub struct FetchFluentClient {
    fetch: Arc<dyn Fetch>,
}

impl FetchFluentClient {
    pub fn new(fetch: Arc<dyn Fetch>) -> Self {
        Self { fetch }
    }
}

impl FluentClient for FetchFluentClient {
    fn end(&self, request: FluentRequest, callback: EndCallback) {
        let fetch = Arc::clone(&self.fetch);
        tokio::spawn(async move {
            let result = match fetch.fetch(request.to_fetch_request()).await {
                Ok(response) => {
                    let fluent = FluentResponse::from_fetch(&response);
                    if fluent.ok {
                        Ok(fluent)
                    } else {
                        Err(FluentError {
                            status: Some(fluent.status),
                            message: response.status_text.clone(),
                            response: Some(fluent),
                        })
                    }
                }
                Err(e) => Err(FluentError {
                    status: None,
                    message: e.to_string(),
                    response: None,
                }),
            };
            callback(result);
        });
    }
}
