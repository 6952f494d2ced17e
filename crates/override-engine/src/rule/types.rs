//! Rule type definitions.
//!
//! Field names follow the JSON the rule store persists (camelCase, `type` tags),
//! so rule files exported by the store load without translation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A declarative matcher + action pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub id: String,
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub matcher: RuleMatcher,
    pub action: Action,
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Matcher
// ============================================================================

/// Predicate portion of a rule.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleMatcher {
    /// URL pattern; absent matches any URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<UrlPattern>,
    /// Upper-case method name; absent matches any method
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
}

/// URL pattern with its match strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrlPattern {
    #[serde(rename = "type")]
    pub match_type: UrlMatchType,
    pub value: String,
    /// JavaScript-style regex flags (`i`, `m`, `s`, `u`, `g`, `y`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<String>,
}

impl UrlPattern {
    pub fn exact(value: impl Into<String>) -> Self {
        Self {
            match_type: UrlMatchType::Exact,
            value: value.into(),
            flags: None,
        }
    }

    pub fn prefix(value: impl Into<String>) -> Self {
        Self {
            match_type: UrlMatchType::Prefix,
            value: value.into(),
            flags: None,
        }
    }

    pub fn regex(value: impl Into<String>, flags: Option<&str>) -> Self {
        Self {
            match_type: UrlMatchType::Regex,
            value: value.into(),
            flags: flags.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlMatchType {
    Exact,
    Prefix,
    Regex,
}

// ============================================================================
// Actions
// ============================================================================

/// Effect portion of a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Action {
    /// Synthesize a full response
    Replace(SyntheticAction),
    /// Synthesize a response whose point is the status code
    Status(SyntheticAction),
    /// Rewrite fields of the real JSON response
    Patch(PatchAction),
    /// Wait, then let the request through untouched
    Delay(DelayAction),
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Replace(_) => "replace",
            Action::Status(_) => "status",
            Action::Patch(_) => "patch",
            Action::Delay(_) => "delay",
        }
    }

    /// Artificial latency inserted before the response is delivered.
    pub fn delay_ms(&self) -> u64 {
        match self {
            Action::Replace(a) | Action::Status(a) => a.delay.unwrap_or(0),
            Action::Patch(a) => a.delay.unwrap_or(0),
            Action::Delay(a) => a.delay,
        }
    }
}

/// Payload of `replace` and `status` actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SyntheticActionRaw", into = "SyntheticActionRaw")]
pub struct SyntheticAction {
    pub status_code: Option<u16>,
    pub content: ResponseContent,
    pub content_type: Option<String>,
    pub headers: BTreeMap<String, String>,
    pub delay: Option<u64>,
}

impl SyntheticAction {
    pub fn new(content: ResponseContent) -> Self {
        Self {
            status_code: None,
            content,
            content_type: None,
            headers: BTreeMap::new(),
            delay: None,
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_delay(mut self, delay_ms: u64) -> Self {
        self.delay = Some(delay_ms);
        self
    }
}

/// Response body keyed by its declared `responseType`.
///
/// The tag fixes how the body is serialized; the runtime shape of the
/// payload never decides it.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseContent {
    /// Object bodies are JSON-encoded, string bodies are taken as already encoded
    Json(serde_json::Value),
    Text(String),
    Html(String),
    Xml(String),
    Javascript(String),
    Css(String),
}

impl ResponseContent {
    pub fn response_type(&self) -> ResponseType {
        match self {
            ResponseContent::Json(_) => ResponseType::Json,
            ResponseContent::Text(_) => ResponseType::Text,
            ResponseContent::Html(_) => ResponseType::Html,
            ResponseContent::Xml(_) => ResponseType::Xml,
            ResponseContent::Javascript(_) => ResponseType::Javascript,
            ResponseContent::Css(_) => ResponseType::Css,
        }
    }

    /// Body text delivered to the caller.
    pub fn to_body(&self) -> String {
        match self {
            ResponseContent::Json(serde_json::Value::String(encoded)) => encoded.clone(),
            ResponseContent::Json(value) => serde_json::to_string(value).unwrap_or_default(),
            ResponseContent::Text(s)
            | ResponseContent::Html(s)
            | ResponseContent::Xml(s)
            | ResponseContent::Javascript(s)
            | ResponseContent::Css(s) => s.clone(),
        }
    }

    fn from_parts(response_type: ResponseType, response: Option<serde_json::Value>) -> Self {
        let text = |value: Option<serde_json::Value>| match value {
            None | Some(serde_json::Value::Null) => String::new(),
            Some(serde_json::Value::String(s)) => s,
            Some(other) => other.to_string(),
        };
        match response_type {
            ResponseType::Json => ResponseContent::Json(
                response.unwrap_or_else(|| serde_json::Value::Object(Default::default())),
            ),
            ResponseType::Text => ResponseContent::Text(text(response)),
            ResponseType::Html => ResponseContent::Html(text(response)),
            ResponseType::Xml => ResponseContent::Xml(text(response)),
            ResponseType::Javascript => ResponseContent::Javascript(text(response)),
            ResponseType::Css => ResponseContent::Css(text(response)),
        }
    }

    fn into_value(self) -> serde_json::Value {
        match self {
            ResponseContent::Json(v) => v,
            ResponseContent::Text(s)
            | ResponseContent::Html(s)
            | ResponseContent::Xml(s)
            | ResponseContent::Javascript(s)
            | ResponseContent::Css(s) => serde_json::Value::String(s),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    #[default]
    Json,
    Text,
    Html,
    Xml,
    Javascript,
    Css,
}

impl ResponseType {
    /// Content-Type used when the rule does not name one.
    pub fn default_content_type(self) -> &'static str {
        match self {
            ResponseType::Json => "application/json",
            ResponseType::Text => "text/plain",
            ResponseType::Html => "text/html",
            ResponseType::Xml => "application/xml",
            ResponseType::Javascript => "application/javascript",
            ResponseType::Css => "text/css",
        }
    }
}

/// Wire shape of a synthetic action: flat `responseType` + `response` fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SyntheticActionRaw {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status_code: Option<u16>,
    #[serde(default)]
    response_type: ResponseType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    response: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    delay: Option<u64>,
}

impl TryFrom<SyntheticActionRaw> for SyntheticAction {
    type Error = String;

    fn try_from(raw: SyntheticActionRaw) -> Result<Self, Self::Error> {
        Ok(SyntheticAction {
            status_code: raw.status_code,
            content: ResponseContent::from_parts(raw.response_type, raw.response),
            content_type: raw.content_type,
            headers: raw.headers,
            delay: raw.delay,
        })
    }
}

impl From<SyntheticAction> for SyntheticActionRaw {
    fn from(action: SyntheticAction) -> Self {
        SyntheticActionRaw {
            status_code: action.status_code,
            response_type: action.content.response_type(),
            content_type: action.content_type,
            response: Some(action.content.into_value()),
            headers: action.headers,
            delay: action.delay,
        }
    }
}

/// Payload of `patch` actions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PatchAction {
    #[serde(default)]
    pub patches: Vec<Patch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<u64>,
}

/// Single field assignment: dot-separated path and the value to store there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub path: String,
    pub value: serde_json::Value,
}

impl Patch {
    pub fn new(path: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            path: path.into(),
            value,
        }
    }
}

/// Payload of `delay` actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelayAction {
    pub delay: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_replace_rule_from_store_json() {
        let rule: Rule = serde_json::from_value(json!({
            "id": "1700000000000-abc",
            "name": "mock users",
            "matcher": {"url": {"type": "prefix", "value": "/api/"}, "method": "GET"},
            "action": {
                "type": "replace",
                "statusCode": 201,
                "responseType": "json",
                "response": {"ok": true},
                "headers": {"X-Test": "1"},
                "delay": 50
            }
        }))
        .unwrap();

        assert!(rule.enabled);
        assert_eq!(rule.matcher.method.as_deref(), Some("GET"));
        let Action::Replace(action) = &rule.action else {
            panic!("expected replace action");
        };
        assert_eq!(action.status_code, Some(201));
        assert_eq!(action.content, ResponseContent::Json(json!({"ok": true})));
        assert_eq!(action.headers.get("X-Test").map(String::as_str), Some("1"));
        assert_eq!(rule.action.delay_ms(), 50);
    }

    #[test]
    fn test_response_type_defaults_to_json() {
        let action: Action = serde_json::from_value(json!({
            "type": "status",
            "statusCode": 503
        }))
        .unwrap();
        let Action::Status(action) = action else {
            panic!("expected status action");
        };
        assert_eq!(action.content.response_type(), ResponseType::Json);
        assert_eq!(action.content.to_body(), "{}");
    }

    #[test]
    fn test_json_string_body_used_as_is() {
        let content = ResponseContent::Json(json!("{\"already\":\"encoded\"}"));
        assert_eq!(content.to_body(), "{\"already\":\"encoded\"}");
    }

    #[test]
    fn test_text_body_verbatim() {
        let action: Action = serde_json::from_value(json!({
            "type": "replace",
            "responseType": "html",
            "response": "<h1>hi</h1>"
        }))
        .unwrap();
        let Action::Replace(action) = action else {
            panic!("expected replace action");
        };
        assert_eq!(action.content, ResponseContent::Html("<h1>hi</h1>".to_string()));
        assert_eq!(action.content.to_body(), "<h1>hi</h1>");
    }

    #[test]
    fn test_default_content_types() {
        assert_eq!(ResponseType::Json.default_content_type(), "application/json");
        assert_eq!(ResponseType::Text.default_content_type(), "text/plain");
        assert_eq!(ResponseType::Html.default_content_type(), "text/html");
        assert_eq!(ResponseType::Xml.default_content_type(), "application/xml");
        assert_eq!(
            ResponseType::Javascript.default_content_type(),
            "application/javascript"
        );
        assert_eq!(ResponseType::Css.default_content_type(), "text/css");
    }

    #[test]
    fn test_synthetic_action_serializes_flat() {
        let action = Action::Replace(
            SyntheticAction::new(ResponseContent::Text("pong".to_string())).with_status(200),
        );
        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["type"], "replace");
        assert_eq!(value["responseType"], "text");
        assert_eq!(value["response"], "pong");
        assert_eq!(value["statusCode"], 200);
    }

    #[test]
    fn test_patch_and_delay_actions() {
        let patch: Action = serde_json::from_value(json!({
            "type": "patch",
            "patches": [{"path": "user.name", "value": "Ada"}],
            "statusCode": 202
        }))
        .unwrap();
        assert_eq!(patch.kind(), "patch");

        let delay: Action = serde_json::from_value(json!({"type": "delay", "delay": 250})).unwrap();
        assert_eq!(delay.delay_ms(), 250);

        let negative = serde_json::from_value::<Action>(json!({"type": "delay", "delay": -1}));
        assert!(negative.is_err());
    }

    #[test]
    fn test_unknown_action_type_rejected() {
        let result = serde_json::from_value::<Action>(json!({"type": "redirect"}));
        assert!(result.is_err());
    }
}
