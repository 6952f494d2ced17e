use chrono::{DateTime, Utc};

/// A transport call as seen by the matcher.
///
/// Built when the call is observed and dropped once it has been resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptedRequest {
    pub url: String,
    /// Always upper-case
    pub method: String,
    pub timestamp: DateTime<Utc>,
}

impl InterceptedRequest {
    /// Method defaults to `GET` and is upper-cased.
    pub fn new(url: impl Into<String>, method: Option<&str>) -> Self {
        Self {
            url: url.into(),
            method: normalize_method(method),
            timestamp: Utc::now(),
        }
    }
}

pub(crate) fn normalize_method(method: Option<&str>) -> String {
    match method.map(str::trim) {
        Some(m) if !m.is_empty() => m.to_ascii_uppercase(),
        _ => "GET".to_string(),
    }
}
