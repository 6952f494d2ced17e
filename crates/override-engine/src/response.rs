//! Canonical synthetic response and its builder.

use crate::rule::SyntheticAction;
use crate::transport::FetchResponse;
use bytes::Bytes;
use hyper::header::CONTENT_TYPE;
use hyper::http::{HeaderName, HeaderValue};
use hyper::HeaderMap;
use std::str::FromStr;

/// Response produced by the executor before transport-specific shaping.
#[derive(Debug, Clone, PartialEq)]
pub struct SyntheticResponse {
    pub status_code: u16,
    pub content_type: String,
    pub body: String,
    pub headers: HeaderMap,
}

impl SyntheticResponse {
    /// Build the response a `replace`/`status` action describes.
    ///
    /// A missing status code falls back to 200.
    pub fn from_action(action: &SyntheticAction) -> Self {
        let content_type = action
            .content_type
            .clone()
            .unwrap_or_else(|| action.content.response_type().default_content_type().to_string());

        ResponseBuilder::new(action.status_code.unwrap_or(200))
            .content_type(content_type)
            .body(action.content.to_body())
            .merge_headers(&action.headers)
            .build()
    }

    /// `"Error"` for 4xx and above, otherwise `"OK"`.
    pub fn status_text(&self) -> &'static str {
        status_text(self.status_code)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Add a header unless the rule already set one with that name.
    pub fn mark(&mut self, name: &str, value: &str) {
        if let (Ok(name), Ok(value)) = (HeaderName::from_str(name), HeaderValue::from_str(value)) {
            self.headers.entry(name).or_insert(value);
        }
    }

    pub fn json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_str(&self.body)
    }

    pub fn into_fetch_response(self, url: impl Into<String>) -> FetchResponse {
        FetchResponse {
            status: self.status_code,
            status_text: status_text(self.status_code).to_string(),
            headers: self.headers,
            body: Bytes::from(self.body),
            url: url.into(),
        }
    }
}

pub fn status_text(status: u16) -> &'static str {
    if status >= 400 {
        "Error"
    } else {
        "OK"
    }
}

/// Assembles a [`SyntheticResponse`]; headers merged later win, and the
/// defaulted Content-Type is only used when no merged header replaces it.
pub struct ResponseBuilder {
    status: u16,
    content_type: Option<String>,
    body: String,
    headers: HeaderMap,
}

impl ResponseBuilder {
    pub fn new(status_code: u16) -> Self {
        ResponseBuilder {
            status: status_code,
            content_type: None,
            body: String::new(),
            headers: Default::default(),
        }
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (HeaderName::from_str(name), HeaderValue::from_str(value)) {
            self.headers.insert(name, value);
        }
        self
    }

    /// Entries with invalid names or values are skipped.
    pub fn merge_headers<H, K, V>(mut self, headers: H) -> Self
    where
        H: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_str(key.as_ref()),
                HeaderValue::from_str(value.as_ref()),
            ) {
                self.headers.insert(name, value);
            }
        }
        self
    }

    pub fn build(mut self) -> SyntheticResponse {
        if !self.headers.contains_key(CONTENT_TYPE) {
            if let Some(value) = self
                .content_type
                .as_deref()
                .and_then(|ct| HeaderValue::from_str(ct).ok())
            {
                self.headers.insert(CONTENT_TYPE, value);
            }
        }

        let content_type = self
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .or(self.content_type)
            .unwrap_or_default();

        SyntheticResponse {
            status_code: self.status,
            content_type,
            body: self.body,
            headers: self.headers,
        }
    }
}
